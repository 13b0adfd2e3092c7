use config::{Config, ConfigError, Environment};
use connectivity_worker::TopicFilter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Broadcast bus that domain events are published to
    pub eventbus_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // NATS configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// JetStream stream holding raw presence notifications
    #[serde(default = "default_presence_stream")]
    pub presence_stream: String,

    /// MQTT-style filter selecting presence topics
    #[serde(default = "default_presence_topic_filter")]
    pub presence_topic_filter: String,

    /// One durable consumer per rule target; when false one consumer runs both
    #[serde(default = "default_per_target_delivery")]
    pub per_target_delivery: bool,

    #[serde(default = "default_nats_batch_size")]
    pub nats_batch_size: usize,

    #[serde(default = "default_nats_batch_wait_secs")]
    pub nats_batch_wait_secs: u64,

    /// Upper bound on handling a single notification
    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    // ClickHouse configuration
    #[serde(default = "default_clickhouse_url")]
    pub clickhouse_url: String,

    #[serde(default = "default_clickhouse_database")]
    pub clickhouse_database: String,

    #[serde(default = "default_clickhouse_table")]
    pub clickhouse_table: String,

    #[serde(default = "default_clickhouse_username")]
    pub clickhouse_username: String,

    #[serde(default)]
    pub clickhouse_password: String,

    // Telemetry configuration
    #[serde(default)]
    pub otel_enabled: bool,

    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,

    /// Time allowed for closers during shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_presence_stream() -> String {
    "presence".to_string()
}

fn default_presence_topic_filter() -> String {
    connectivity_worker::DEFAULT_PRESENCE_TOPIC_FILTER.to_string()
}

fn default_per_target_delivery() -> bool {
    true
}

fn default_nats_batch_size() -> usize {
    30
}

fn default_nats_batch_wait_secs() -> u64 {
    5
}

fn default_invocation_timeout_secs() -> u64 {
    30
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_clickhouse_url() -> String {
    "http://localhost:8123".to_string()
}

fn default_clickhouse_database() -> String {
    "connectivity".to_string()
}

fn default_clickhouse_table() -> String {
    "device_events".to_string()
}

fn default_clickhouse_username() -> String {
    "default".to_string()
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "connectivity-service".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServiceConfig {
    /// Load from unprefixed environment variables (`EVENTBUS_NAME`, `NATS_URL`, ...)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(Environment::default())
    }

    fn load(environment: Environment) -> Result<Self, ConfigError> {
        let config: Self = Config::builder()
            .add_source(environment.try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    #[cfg(test)]
    fn from_map(vars: &[(&str, &str)]) -> Result<Self, ConfigError> {
        let source: config::Map<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::load(Environment::default().source(Some(source)))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.eventbus_name.trim().is_empty() {
            return Err(ConfigError::Message("EVENTBUS_NAME cannot be empty".to_string()));
        }

        self.topic_filter()?;

        if self.invocation_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "INVOCATION_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn topic_filter(&self) -> Result<TopicFilter, ConfigError> {
        TopicFilter::new(&self.presence_topic_filter).map_err(|e| {
            ConfigError::Message(format!("invalid PRESENCE_TOPIC_FILTER: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_map(&[("EVENTBUS_NAME", "connectivity-bus")]).unwrap();

        assert_eq!(config.eventbus_name, "connectivity-bus");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.nats_url, "nats://localhost:4222");
        assert_eq!(config.presence_stream, "presence");
        assert_eq!(config.presence_topic_filter, "presence/+/+");
        assert!(config.per_target_delivery);
        assert_eq!(config.nats_batch_size, 30);
        assert_eq!(config.nats_batch_wait_secs, 5);
        assert_eq!(config.invocation_timeout_secs, 30);
        assert_eq!(config.startup_timeout_secs, 30);
        assert_eq!(config.clickhouse_url, "http://localhost:8123");
        assert_eq!(config.clickhouse_database, "connectivity");
        assert_eq!(config.clickhouse_table, "device_events");
        assert_eq!(config.clickhouse_username, "default");
        assert_eq!(config.clickhouse_password, "");
        assert!(!config.otel_enabled);
        assert_eq!(config.otel_endpoint, "http://localhost:4317");
        assert_eq!(config.otel_service_name, "connectivity-service");
        assert_eq!(config.shutdown_timeout_secs, 10);
    }

    #[test]
    fn test_eventbus_name_is_required() {
        assert!(ServiceConfig::from_map(&[("LOG_LEVEL", "debug")]).is_err());
        assert!(ServiceConfig::from_map(&[("EVENTBUS_NAME", " ")]).is_err());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = ServiceConfig::from_map(&[
            ("EVENTBUS_NAME", "bus"),
            ("LOG_LEVEL", "debug"),
            ("PER_TARGET_DELIVERY", "false"),
            ("NATS_BATCH_SIZE", "100"),
            ("INVOCATION_TIMEOUT_SECS", "5"),
            ("PRESENCE_TOPIC_FILTER", "presence/#"),
        ])
        .unwrap();

        assert_eq!(config.log_level, "debug");
        assert!(!config.per_target_delivery);
        assert_eq!(config.nats_batch_size, 100);
        assert_eq!(config.invocation_timeout_secs, 5);
        assert_eq!(config.topic_filter().unwrap().to_nats_subject(), "presence.>");
    }

    #[test]
    fn test_invalid_topic_filter_is_rejected() {
        let err = ServiceConfig::from_map(&[
            ("EVENTBUS_NAME", "bus"),
            ("PRESENCE_TOPIC_FILTER", "presence/#/x"),
        ])
        .unwrap_err();

        assert!(err.to_string().contains("PRESENCE_TOPIC_FILTER"));
    }
}
