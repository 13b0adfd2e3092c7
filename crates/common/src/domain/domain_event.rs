use crate::domain::{ConnectivityEventType, DomainError, DomainResult};
use serde::Serialize;

/// Source identifier stamped on every connectivity domain event
pub const CONNECTIVITY_EVENT_SOURCE: &str = "connectivity.service";

/// Detail body of a connectivity domain event.
///
/// Field order is the serialized key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityPayload {
    pub client_id: String,
    pub event_type: ConnectivityEventType,
    pub session_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_reason: Option<String>,
    pub timestamp: u64,
}

/// Canonical, business-level representation of a presence notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub source: &'static str,
    pub detail_type: &'static str,
    pub payload: ConnectivityPayload,
}

impl DomainEvent {
    /// Serialize the payload into the JSON detail string carried on the bus
    pub fn detail_json(&self) -> DomainResult<String> {
        serde_json::to_string(&self.payload).map_err(|e| {
            DomainError::PublishFailure(anyhow::Error::new(e).context("failed to serialize detail"))
        })
    }
}
