mod clickhouse;
mod domain;
mod nats;
mod telemetry;

pub use self::clickhouse::*;
pub use domain::*;
pub use nats::*;
pub use telemetry::*;

// Re-export mocks when testing feature is enabled
#[cfg(any(test, feature = "testing"))]
pub use domain::MockBroadcastBus;
#[cfg(any(test, feature = "testing"))]
pub use domain::MockTimeSeriesSink;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamConsumer;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockJetStreamPublisher;
#[cfg(any(test, feature = "testing"))]
pub use nats::MockPullConsumer;
