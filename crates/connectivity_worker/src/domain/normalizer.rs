use common::{ConnectivityPayload, DomainEvent, RawPresenceNotification, CONNECTIVITY_EVENT_SOURCE};

/// Map a raw presence notification onto its canonical domain event.
///
/// Pure: the returned event owns copies of every field, and `disconnectReason`
/// is carried over exactly when the input has one, even if it is empty.
pub fn normalize(raw: &RawPresenceNotification) -> DomainEvent {
    DomainEvent {
        source: CONNECTIVITY_EVENT_SOURCE,
        detail_type: raw.event_type.detail_type(),
        payload: ConnectivityPayload {
            client_id: raw.client_id.clone(),
            event_type: raw.event_type,
            session_identifier: raw.session_identifier.clone(),
            disconnect_reason: raw.disconnect_reason.clone(),
            timestamp: raw.timestamp,
        },
    }
}
