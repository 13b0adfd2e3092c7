use async_nats::HeaderMap;
use bytes::Bytes;

/// Message to publish through the publish middleware stack
#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub subject: String,
    pub payload: Bytes,
    /// Trace context is injected here by the tracing layer
    pub headers: HeaderMap,
}

impl PublishRequest {
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            payload: payload.into(),
            headers: HeaderMap::new(),
        }
    }
}

#[derive(Debug)]
pub struct PublishResponse {
    pub subject: String,
}

/// Owned copy of a consumed JetStream message, so it can travel through tower layers
#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Option<HeaderMap>,
}

impl ConsumeRequest {
    pub fn new(subject: String, payload: Bytes, headers: Option<HeaderMap>) -> Self {
        Self {
            subject,
            payload,
            headers,
        }
    }
}

/// What the consumer should do with a message once the service is done with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeResponse {
    /// Processed; acknowledge
    Ack,
    /// Failed but may succeed later; reject for redelivery
    Nak(Option<String>),
    /// Can never succeed; terminate so it is not redelivered
    Term(String),
}

impl ConsumeResponse {
    pub fn ack() -> Self {
        Self::Ack
    }

    pub fn nak(reason: impl Into<String>) -> Self {
        Self::Nak(Some(reason.into()))
    }

    pub fn term(reason: impl Into<String>) -> Self {
        Self::Term(reason.into())
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }

    pub fn is_nak(&self) -> bool {
        matches!(self, Self::Nak(_))
    }

    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak(_) => "nak",
            Self::Term(_) => "term",
        }
    }
}
