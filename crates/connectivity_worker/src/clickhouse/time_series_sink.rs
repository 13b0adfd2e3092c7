use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::{
    ClickHouseClient, DomainError, DomainResult, TimeSeriesSink, TimeSeriesTarget,
    TimeSeriesWriteRequest, TimeUnit,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Row, Serialize, Deserialize)]
pub struct DeviceEventRow {
    pub client_id: String,
    pub event_type: String,
    pub session_identifier: String,
    /// Empty when the notification carried no reason
    pub disconnect_reason: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub time: DateTime<Utc>,
}

impl TryFrom<&TimeSeriesWriteRequest> for DeviceEventRow {
    type Error = DomainError;

    fn try_from(request: &TimeSeriesWriteRequest) -> Result<Self, Self::Error> {
        let millis = match request.time_unit {
            TimeUnit::Milliseconds => i64::try_from(request.time).ok(),
        };
        let time = millis
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| {
                DomainError::malformed(format!("timestamp {} is out of range", request.time))
            })?;

        let dimension = |name: &str| request.dimension(name).unwrap_or_default().to_string();

        Ok(DeviceEventRow {
            client_id: dimension("clientId"),
            event_type: dimension("eventType"),
            session_identifier: dimension("sessionIdentifier"),
            disconnect_reason: dimension("disconnectReason"),
            time,
        })
    }
}

/// DDL for the device events table.
///
/// `ReplacingMergeTree` collapses the duplicate rows that redelivery can produce.
pub fn device_events_table_ddl(target: &TimeSeriesTarget) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (
            client_id String,
            event_type LowCardinality(String),
            session_identifier String,
            disconnect_reason String,
            time DateTime64(3, 'UTC')
        )
        ENGINE = ReplacingMergeTree
        ORDER BY (client_id, session_identifier, event_type, time)",
        target.database, target.table
    )
}

/// ClickHouse implementation of [`TimeSeriesSink`]
#[derive(Clone)]
pub struct ClickHouseTimeSeriesSink {
    client: ClickHouseClient,
}

impl ClickHouseTimeSeriesSink {
    pub fn new(client: ClickHouseClient) -> Self {
        Self { client }
    }

    pub async fn ensure_table(&self, target: &TimeSeriesTarget) -> anyhow::Result<()> {
        self.client
            .execute(&device_events_table_ddl(target))
            .await
            .with_context(|| format!("failed to ensure table {}.{}", target.database, target.table))?;

        info!(database = %target.database, table = %target.table, "time-series table ready");
        Ok(())
    }
}

#[async_trait]
impl TimeSeriesSink for ClickHouseTimeSeriesSink {
    async fn write_record(&self, request: &TimeSeriesWriteRequest) -> DomainResult<()> {
        let row = DeviceEventRow::try_from(request)?;
        let table = format!("{}.{}", request.database, request.table);

        debug!(
            table = %table,
            client_id = %row.client_id,
            event_type = %row.event_type,
            time_unit = request.time_unit.as_str(),
            "inserting device event row"
        );

        let mut insert = self
            .client
            .get_client()
            .insert::<DeviceEventRow>(&table)
            .await
            .map_err(|e| {
                error!(table = %table, error = %e, "failed to create ClickHouse inserter");
                DomainError::SinkUnavailable(e.into())
            })?;

        insert.write(&row).await.map_err(|e| {
            error!(table = %table, error = %e, "failed to write row to ClickHouse");
            DomainError::SinkUnavailable(e.into())
        })?;

        insert.end().await.map_err(|e| {
            error!(table = %table, error = %e, "failed to finalize ClickHouse insert");
            DomainError::SinkUnavailable(e.into())
        })?;

        Ok(())
    }
}
