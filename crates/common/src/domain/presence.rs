use crate::domain::{DomainError, DomainResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Connectivity lifecycle transition reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityEventType {
    Connected,
    Disconnected,
}

impl ConnectivityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityEventType::Connected => "connected",
            ConnectivityEventType::Disconnected => "disconnected",
        }
    }

    /// Human-readable label used as the domain event type
    pub fn detail_type(&self) -> &'static str {
        match self {
            ConnectivityEventType::Connected => "Device Connected",
            ConnectivityEventType::Disconnected => "Device Disconnected",
        }
    }
}

impl fmt::Display for ConnectivityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectivityEventType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(ConnectivityEventType::Connected),
            "disconnected" => Ok(ConnectivityEventType::Disconnected),
            other => Err(DomainError::malformed(format!(
                "unrecognized eventType '{}'",
                other
            ))),
        }
    }
}

/// Latest instant a DateTime64(3) column can hold (2299-12-31T23:59:59.999Z)
pub const MAX_PRESENCE_TIMESTAMP_MS: u64 = 10_413_791_999_999;

/// Raw connect/disconnect signal for a single device session.
///
/// `disconnect_reason` tracks presence separately from emptiness:
/// `None` means the field was absent, `Some("")` means it was sent empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPresenceNotification {
    pub client_id: String,
    pub event_type: ConnectivityEventType,
    pub session_identifier: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_reason: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

/// Loosely typed wire shape so every missing field can be reported by name.
/// Extra broker fields (principalIdentifier, ipAddress, ...) are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresenceWire {
    client_id: Option<String>,
    event_type: Option<String>,
    session_identifier: Option<String>,
    #[serde(default)]
    disconnect_reason: Option<String>,
    timestamp: Option<serde_json::Value>,
}

impl RawPresenceNotification {
    /// Parse and validate a JSON presence notification
    pub fn from_json(payload: &[u8]) -> DomainResult<Self> {
        let wire: PresenceWire = serde_json::from_slice(payload)
            .map_err(|e| DomainError::malformed(format!("invalid JSON: {}", e)))?;
        Self::try_from(wire)
    }

    /// Check the invariants a well-formed notification must hold
    pub fn validate(&self) -> DomainResult<()> {
        if self.client_id.is_empty() {
            return Err(DomainError::malformed("clientId cannot be empty"));
        }

        if self.session_identifier.is_empty() {
            return Err(DomainError::malformed("sessionIdentifier cannot be empty"));
        }

        if self.event_type == ConnectivityEventType::Connected && self.disconnect_reason.is_some()
        {
            return Err(DomainError::malformed(
                "disconnectReason is only allowed on disconnected notifications",
            ));
        }

        if self.timestamp > MAX_PRESENCE_TIMESTAMP_MS {
            return Err(DomainError::malformed(format!(
                "timestamp {} is out of range",
                self.timestamp
            )));
        }

        Ok(())
    }
}

impl TryFrom<PresenceWire> for RawPresenceNotification {
    type Error = DomainError;

    fn try_from(wire: PresenceWire) -> Result<Self, Self::Error> {
        let client_id = wire.client_id.ok_or_else(|| missing("clientId"))?;
        let event_type = wire
            .event_type
            .ok_or_else(|| missing("eventType"))?
            .parse::<ConnectivityEventType>()?;
        let session_identifier = wire
            .session_identifier
            .ok_or_else(|| missing("sessionIdentifier"))?;
        let timestamp = wire
            .timestamp
            .ok_or_else(|| missing("timestamp"))?
            .as_u64()
            .ok_or_else(|| {
                DomainError::malformed("timestamp must be a non-negative integer (milliseconds)")
            })?;

        let notification = RawPresenceNotification {
            client_id,
            event_type,
            session_identifier,
            disconnect_reason: wire.disconnect_reason,
            timestamp,
        };
        notification.validate()?;

        Ok(notification)
    }
}

fn missing(field: &str) -> DomainError {
    DomainError::malformed(format!("missing required field '{}'", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_connected_notification() {
        let json = br#"{
            "clientId": "dev-1",
            "eventType": "connected",
            "sessionIdentifier": "s-100",
            "timestamp": 1700000000000
        }"#;

        let raw = RawPresenceNotification::from_json(json).unwrap();
        assert_eq!(raw.client_id, "dev-1");
        assert_eq!(raw.event_type, ConnectivityEventType::Connected);
        assert_eq!(raw.session_identifier, "s-100");
        assert_eq!(raw.disconnect_reason, None);
        assert_eq!(raw.timestamp, 1_700_000_000_000);
    }

    #[test]
    fn test_parse_disconnected_notification_ignores_broker_extras() {
        let json = br#"{
            "clientId": "dev-1",
            "eventType": "disconnected",
            "sessionIdentifier": "s-100",
            "disconnectReason": "MQTT_KEEP_ALIVE_TIMEOUT",
            "clientInitiatedDisconnect": false,
            "principalIdentifier": "abc",
            "ipAddress": "10.0.0.1",
            "versionNumber": 3,
            "timestamp": 1700000005000
        }"#;

        let raw = RawPresenceNotification::from_json(json).unwrap();
        assert_eq!(raw.event_type, ConnectivityEventType::Disconnected);
        assert_eq!(
            raw.disconnect_reason.as_deref(),
            Some("MQTT_KEEP_ALIVE_TIMEOUT")
        );
    }

    #[test]
    fn test_empty_disconnect_reason_is_kept_as_present() {
        let json = br#"{"clientId":"dev-1","eventType":"disconnected","sessionIdentifier":"s-1","disconnectReason":"","timestamp":1}"#;

        let raw = RawPresenceNotification::from_json(json).unwrap();
        assert_eq!(raw.disconnect_reason, Some(String::new()));
    }

    #[test]
    fn test_null_disconnect_reason_is_absent() {
        let json = br#"{"clientId":"dev-1","eventType":"disconnected","sessionIdentifier":"s-1","disconnectReason":null,"timestamp":1}"#;

        let raw = RawPresenceNotification::from_json(json).unwrap();
        assert_eq!(raw.disconnect_reason, None);
    }

    #[test]
    fn test_unrecognized_event_type_is_malformed() {
        let json = br#"{"clientId":"dev-1","eventType":"reconnected","sessionIdentifier":"s-1","timestamp":1}"#;

        let result = RawPresenceNotification::from_json(json);
        match result {
            Err(DomainError::MalformedInput(reason)) => assert!(reason.contains("reconnected")),
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_fields_are_malformed() {
        let cases: [(&[u8], &str); 4] = [
            (
                br#"{"eventType":"connected","sessionIdentifier":"s-1","timestamp":1}"#,
                "clientId",
            ),
            (
                br#"{"clientId":"dev-1","sessionIdentifier":"s-1","timestamp":1}"#,
                "eventType",
            ),
            (
                br#"{"clientId":"dev-1","eventType":"connected","timestamp":1}"#,
                "sessionIdentifier",
            ),
            (
                br#"{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1"}"#,
                "timestamp",
            ),
        ];

        for (json, field) in cases {
            match RawPresenceNotification::from_json(json) {
                Err(DomainError::MalformedInput(reason)) => {
                    assert!(reason.contains(field), "{} not in '{}'", field, reason)
                }
                other => panic!("expected MalformedInput for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_negative_timestamp_is_malformed() {
        let json = br#"{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1","timestamp":-5}"#;
        assert!(matches!(
            RawPresenceNotification::from_json(json),
            Err(DomainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_out_of_range_timestamp_is_malformed() {
        let json = br#"{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1","timestamp":9000000000000000}"#;
        match RawPresenceNotification::from_json(json) {
            Err(DomainError::MalformedInput(reason)) => {
                assert!(reason.contains("9000000000000000"))
            }
            other => panic!("expected MalformedInput, got {:?}", other),
        }
    }

    #[test]
    fn test_timestamp_at_upper_bound_is_accepted() {
        let json = format!(
            r#"{{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1","timestamp":{}}}"#,
            MAX_PRESENCE_TIMESTAMP_MS
        );
        let raw = RawPresenceNotification::from_json(json.as_bytes()).unwrap();
        assert_eq!(raw.timestamp, MAX_PRESENCE_TIMESTAMP_MS);

        let json = format!(
            r#"{{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1","timestamp":{}}}"#,
            MAX_PRESENCE_TIMESTAMP_MS + 1
        );
        assert!(matches!(
            RawPresenceNotification::from_json(json.as_bytes()),
            Err(DomainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_string_timestamp_is_malformed() {
        let json = br#"{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1","timestamp":"1700000000000"}"#;
        assert!(matches!(
            RawPresenceNotification::from_json(json),
            Err(DomainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_connected_with_disconnect_reason_is_malformed() {
        let json = br#"{"clientId":"dev-1","eventType":"connected","sessionIdentifier":"s-1","disconnectReason":"X","timestamp":1}"#;
        assert!(matches!(
            RawPresenceNotification::from_json(json),
            Err(DomainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_empty_client_id_is_malformed() {
        let json = br#"{"clientId":"","eventType":"connected","sessionIdentifier":"s-1","timestamp":1}"#;
        assert!(matches!(
            RawPresenceNotification::from_json(json),
            Err(DomainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_malformed() {
        assert!(matches!(
            RawPresenceNotification::from_json(b"not json"),
            Err(DomainError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_event_type_labels() {
        assert_eq!(
            ConnectivityEventType::Connected.detail_type(),
            "Device Connected"
        );
        assert_eq!(
            ConnectivityEventType::Disconnected.detail_type(),
            "Device Disconnected"
        );
        assert_eq!(ConnectivityEventType::Disconnected.to_string(), "disconnected");
    }
}
