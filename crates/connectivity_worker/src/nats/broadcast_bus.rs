use async_trait::async_trait;
use common::{
    build_publish_stack, BroadcastBus, BusPublishRequest, DomainError, DomainResult,
    JetStreamPublisher, PublishRequest, PublishStack,
};
use std::sync::Arc;
use tower::{Service, ServiceExt};
use tracing::debug;

/// Broadcast bus backed by a JetStream stream named after the bus.
///
/// Entries go to `{event_bus_name}.{detail type slug}`, e.g.
/// `connectivity-bus.device_connected`, so subscribers can filter by type.
pub struct NatsBroadcastBus {
    publisher: PublishStack,
}

impl NatsBroadcastBus {
    pub fn new(jetstream: Arc<dyn JetStreamPublisher>) -> Self {
        Self {
            publisher: build_publish_stack(jetstream, "connectivity_broadcast_bus"),
        }
    }

    /// Subjects the bus stream must capture
    pub fn stream_subjects(event_bus_name: &str) -> Vec<String> {
        vec![format!("{event_bus_name}.>")]
    }

    pub fn subject_for(request: &BusPublishRequest) -> String {
        format!(
            "{}.{}",
            request.event_bus_name,
            detail_type_slug(&request.detail_type)
        )
    }
}

fn detail_type_slug(detail_type: &str) -> String {
    detail_type
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join("_")
}

#[async_trait]
impl BroadcastBus for NatsBroadcastBus {
    async fn put_event(&self, request: &BusPublishRequest) -> DomainResult<()> {
        let subject = Self::subject_for(request);
        let body = serde_json::to_vec(request).map_err(|e| DomainError::PublishFailure(e.into()))?;

        debug!(subject = %subject, detail_type = %request.detail_type, "putting event on bus");

        let mut publisher = self.publisher.clone();
        publisher
            .ready()
            .await
            .map_err(DomainError::PublishFailure)?
            .call(PublishRequest::new(subject, body))
            .await
            .map_err(DomainError::PublishFailure)?;

        Ok(())
    }
}
