pub mod clickhouse;
pub mod connectivity_worker;
pub mod domain;
pub mod nats;

pub use self::clickhouse::*;
pub use connectivity_worker::*;
pub use domain::*;
pub use nats::*;
