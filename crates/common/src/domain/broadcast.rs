use crate::domain::result::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Entry published on the broadcast bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusPublishRequest {
    pub source: String,
    pub detail_type: String,
    /// JSON-serialized domain event payload
    pub detail: String,
    pub event_bus_name: String,
}

/// Trait for publishing domain events to the broadcast bus
///
/// Implementations should:
/// - Deliver the entry to the bus named by `event_bus_name`
/// - Await broker acknowledgment before returning
/// - Return `DomainError::PublishFailure` on failure
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BroadcastBus: Send + Sync {
    async fn put_event(&self, request: &BusPublishRequest) -> DomainResult<()>;
}
