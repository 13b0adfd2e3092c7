use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// The two independent actions triggered for every matched presence notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkAction {
    TimeSeriesWrite,
    DomainPublish,
}

impl SinkAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkAction::TimeSeriesWrite => "time_series_write",
            SinkAction::DomainPublish => "domain_publish",
        }
    }
}

impl fmt::Display for SinkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Malformed presence notification: {0}")]
    MalformedInput(String),

    #[error("Topic '{0}' is not selected by any rule")]
    UnmatchedTopic(String),

    #[error("Time-series sink unavailable: {0}")]
    SinkUnavailable(#[source] anyhow::Error),

    #[error("Domain event publish failed: {0}")]
    PublishFailure(#[source] anyhow::Error),

    #[error("Partial failure, {failed} did not complete: {source}")]
    PartialFailure {
        failed: SinkAction,
        source: Box<DomainError>,
    },

    #[error("All actions failed (time-series: {time_series}; publish: {publish})")]
    DispatchFailed {
        time_series: Box<DomainError>,
        publish: Box<DomainError>,
    },

    #[error("Invocation timed out after {0:?}")]
    InvocationTimeout(Duration),
}

impl DomainError {
    /// Whether redelivering the same notification could succeed.
    ///
    /// Malformed input and unroutable topics fail identically on every
    /// attempt, including when they surface inside a dispatch failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            DomainError::MalformedInput(_) | DomainError::UnmatchedTopic(_) => false,
            DomainError::PartialFailure { source, .. } => source.is_retryable(),
            DomainError::DispatchFailed {
                time_series,
                publish,
            } => time_series.is_retryable() && publish.is_retryable(),
            _ => true,
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        DomainError::MalformedInput(reason.into())
    }
}
