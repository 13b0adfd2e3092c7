use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// Unit of the measurement timestamp on a time-series record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Milliseconds => "MILLISECONDS",
        }
    }
}

/// Named string attribute attached to a time-series record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Database/table pair that time-series writes are scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesTarget {
    pub database: String,
    pub table: String,
}

/// Single record write against the time-series store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeriesWriteRequest {
    pub database: String,
    pub table: String,
    pub dimensions: Vec<Dimension>,
    pub time: u64,
    pub time_unit: TimeUnit,
}

impl TimeSeriesWriteRequest {
    /// Look up a dimension value by name
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// Trait for writing records to the time-series store
///
/// Implementations should:
/// - Persist one record per request, scoped to `database`/`table`
/// - Tolerate duplicate writes of identical dimensions and timestamp
/// - Return `DomainError::SinkUnavailable` on failure
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait TimeSeriesSink: Send + Sync {
    async fn write_record(&self, request: &TimeSeriesWriteRequest) -> DomainResult<()>;
}
