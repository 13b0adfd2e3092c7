use crate::domain::normalize;
use common::{
    BroadcastBus, BusPublishRequest, Dimension, DomainError, DomainResult,
    RawPresenceNotification, SinkAction, TimeSeriesSink, TimeSeriesTarget,
    TimeSeriesWriteRequest, TimeUnit,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub time_series: TimeSeriesTarget,
    pub event_bus_name: String,
}

/// Per-action results of one dual dispatch
#[derive(Debug)]
pub struct DispatchOutcome {
    pub time_series: DomainResult<()>,
    pub publish: DomainResult<()>,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        self.time_series.is_ok() && self.publish.is_ok()
    }

    /// Collapse both results into one; any failed action fails the invocation
    pub fn into_result(self) -> DomainResult<()> {
        match (self.time_series, self.publish) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) => Err(DomainError::PartialFailure {
                failed: SinkAction::TimeSeriesWrite,
                source: Box::new(e),
            }),
            (Ok(()), Err(e)) => Err(DomainError::PartialFailure {
                failed: SinkAction::DomainPublish,
                source: Box::new(e),
            }),
            (Err(time_series), Err(publish)) => Err(DomainError::DispatchFailed {
                time_series: Box::new(time_series),
                publish: Box::new(publish),
            }),
        }
    }
}

/// Fans a presence notification out to the time-series sink and the broadcast bus.
///
/// The two actions never depend on each other. There is no retry here; redelivery
/// is driven by whoever invoked the dispatcher.
pub struct DualSinkDispatcher {
    time_series_sink: Arc<dyn TimeSeriesSink>,
    broadcast_bus: Arc<dyn BroadcastBus>,
    config: Arc<DispatcherConfig>,
}

impl DualSinkDispatcher {
    pub fn new(
        time_series_sink: Arc<dyn TimeSeriesSink>,
        broadcast_bus: Arc<dyn BroadcastBus>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            time_series_sink,
            broadcast_bus,
            config: Arc::new(config),
        }
    }

    #[instrument(
        skip(self, raw),
        fields(
            client_id = %raw.client_id,
            session_identifier = %raw.session_identifier,
            event_type = %raw.event_type,
        )
    )]
    pub async fn dispatch(&self, raw: &RawPresenceNotification) -> DispatchOutcome {
        info!(timestamp = raw.timestamp, "received presence notification");

        let (time_series, publish) =
            tokio::join!(self.write_time_series(raw), self.publish_domain_event(raw));

        let outcome = DispatchOutcome {
            time_series,
            publish,
        };

        if !outcome.is_success() {
            warn!(
                time_series_ok = outcome.time_series.is_ok(),
                publish_ok = outcome.publish.is_ok(),
                "dispatch incomplete"
            );
        }

        outcome
    }

    /// Action A: record the raw notification fields
    pub async fn write_time_series(&self, raw: &RawPresenceNotification) -> DomainResult<()> {
        let request = self.time_series_request(raw);

        debug!(
            database = %request.database,
            table = %request.table,
            client_id = %raw.client_id,
            "writing time-series record"
        );

        self.time_series_sink
            .write_record(&request)
            .await
            .inspect_err(|e| warn!(client_id = %raw.client_id, error = %e, "time-series write failed"))
    }

    /// Action B: normalize and publish on the broadcast bus
    pub async fn publish_domain_event(&self, raw: &RawPresenceNotification) -> DomainResult<()> {
        let event = normalize(raw);

        let request = BusPublishRequest {
            source: event.source.to_string(),
            detail_type: event.detail_type.to_string(),
            detail: event.detail_json()?,
            event_bus_name: self.config.event_bus_name.clone(),
        };

        match self.broadcast_bus.put_event(&request).await {
            Ok(()) => {
                info!(
                    client_id = %raw.client_id,
                    detail_type = event.detail_type,
                    event_bus = %request.event_bus_name,
                    "published {}",
                    event.detail_type
                );
                Ok(())
            }
            Err(e) => {
                warn!(client_id = %raw.client_id, error = %e, "domain event publish failed");
                Err(e)
            }
        }
    }

    fn time_series_request(&self, raw: &RawPresenceNotification) -> TimeSeriesWriteRequest {
        TimeSeriesWriteRequest {
            database: self.config.time_series.database.clone(),
            table: self.config.time_series.table.clone(),
            dimensions: vec![
                Dimension::new("clientId", raw.client_id.as_str()),
                Dimension::new("eventType", raw.event_type.as_str()),
                Dimension::new("sessionIdentifier", raw.session_identifier.as_str()),
                Dimension::new(
                    "disconnectReason",
                    raw.disconnect_reason.as_deref().unwrap_or_default(),
                ),
            ],
            time: raw.timestamp,
            time_unit: TimeUnit::Milliseconds,
        }
    }
}
