use anyhow::{Context, Result};
use clickhouse::Client;
use tracing::debug;

/// Connection settings for the analytics store
#[derive(Debug, Clone)]
pub struct ClickHouseSettings {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

#[derive(Clone)]
pub struct ClickHouseClient {
    client: Client,
    database: String,
}

impl ClickHouseClient {
    pub fn new(settings: &ClickHouseSettings) -> Self {
        let client = Client::default()
            .with_url(&settings.url)
            .with_database(&settings.database)
            .with_user(&settings.username)
            .with_password(&settings.password)
            .with_compression(clickhouse::Compression::Lz4);

        Self {
            client,
            database: settings.database.clone(),
        }
    }

    pub async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("clickhouse ping failed")?;
        Ok(())
    }

    /// Run a statement that returns no rows (DDL)
    pub async fn execute(&self, statement: &str) -> Result<()> {
        debug!(statement, "executing clickhouse statement");
        self.client
            .query(statement)
            .execute()
            .await
            .with_context(|| format!("failed to execute: {statement}"))?;
        Ok(())
    }

    pub async fn ensure_database(&self) -> Result<()> {
        // The default client is bound to a database that may not exist yet
        let bootstrap = self.client.clone().with_database("default");
        let statement = format!("CREATE DATABASE IF NOT EXISTS {}", self.database);
        bootstrap
            .query(&statement)
            .execute()
            .await
            .with_context(|| format!("failed to create database {}", self.database))?;
        Ok(())
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }
}
