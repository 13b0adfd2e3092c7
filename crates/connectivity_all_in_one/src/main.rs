mod config;

use common::{
    init_telemetry, shutdown_telemetry, ClickHouseClient, ClickHouseSettings, NatsClient,
    TelemetryConfig, TelemetryProviders, TimeSeriesTarget,
};
use crate::config::ServiceConfig;
use connectivity_runner::Runner;
use connectivity_worker::{
    ClickHouseTimeSeriesSink, ConnectivityWorker, ConnectivityWorkerConfig, DispatcherConfig,
    DualSinkDispatcher, IngestionRule, NatsBroadcastBus,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("failed to initialize telemetry: {e:#}");
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        event_bus = %config.eventbus_name,
        "starting connectivity service"
    );
    debug!("configuration: {:?}", config);

    let startup = Duration::from_secs(config.startup_timeout_secs);
    let (nats_client, clickhouse_client) =
        match tokio::time::timeout(startup, initialize_shared_dependencies(&config)).await {
            Ok(Ok(deps)) => deps,
            Ok(Err(e)) => {
                error!(error = %format!("{e:#}"), "failed to initialize shared dependencies");
                std::process::exit(1);
            }
            Err(_) => {
                error!(timeout = ?startup, "startup timed out");
                std::process::exit(1);
            }
        };

    let worker = match build_worker(&config, &nats_client, clickhouse_client).await {
        Ok(worker) => worker,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to initialize connectivity worker");
            std::process::exit(1);
        }
    };

    let mut runner = Runner::new();
    for (name, process) in worker.into_runner_processes() {
        runner = runner.with_named_process(name, process);
    }

    runner
        .with_closer(move || async move {
            info!("running cleanup tasks");
            if let Err(e) = nats_client.flush().await {
                error!(error = %e, "failed to flush NATS connection");
            }
            shutdown_telemetry(telemetry_providers);
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(config.shutdown_timeout_secs))
        .run()
        .await;
}

async fn initialize_shared_dependencies(
    config: &ServiceConfig,
) -> anyhow::Result<(Arc<NatsClient>, ClickHouseClient)> {
    info!("initializing ClickHouse");
    let clickhouse_client = ClickHouseClient::new(&ClickHouseSettings {
        url: config.clickhouse_url.clone(),
        database: config.clickhouse_database.clone(),
        username: config.clickhouse_username.clone(),
        password: config.clickhouse_password.clone(),
    });
    clickhouse_client.ensure_database().await?;
    clickhouse_client.ping().await?;

    info!("initializing NATS");
    let nats_client = Arc::new(
        NatsClient::connect(
            &config.nats_url,
            Duration::from_secs(config.startup_timeout_secs),
        )
        .await?,
    );
    ensure_nats_streams(&nats_client, config).await?;

    Ok((nats_client, clickhouse_client))
}

async fn ensure_nats_streams(nats_client: &NatsClient, config: &ServiceConfig) -> anyhow::Result<()> {
    let filter = config.topic_filter()?;
    let presence_subjects = match filter.namespace() {
        Some(namespace) => vec![format!("{namespace}.>")],
        None => vec![filter.to_nats_subject()],
    };

    nats_client
        .ensure_stream(
            &config.presence_stream,
            presence_subjects,
            "Raw device presence notifications bridged from MQTT",
        )
        .await?;

    nats_client
        .ensure_stream(
            &config.eventbus_name,
            NatsBroadcastBus::stream_subjects(&config.eventbus_name),
            "Connectivity domain events",
        )
        .await?;

    Ok(())
}

async fn build_worker(
    config: &ServiceConfig,
    nats_client: &NatsClient,
    clickhouse_client: ClickHouseClient,
) -> anyhow::Result<ConnectivityWorker> {
    let time_series = TimeSeriesTarget {
        database: config.clickhouse_database.clone(),
        table: config.clickhouse_table.clone(),
    };

    let sink = ClickHouseTimeSeriesSink::new(clickhouse_client);
    sink.ensure_table(&time_series).await?;

    let dispatcher = Arc::new(DualSinkDispatcher::new(
        Arc::new(sink),
        Arc::new(NatsBroadcastBus::new(nats_client.create_publisher_client())),
        DispatcherConfig {
            time_series,
            event_bus_name: config.eventbus_name.clone(),
        },
    ));

    ConnectivityWorker::new(
        dispatcher,
        nats_client.create_consumer_client(),
        ConnectivityWorkerConfig {
            presence_stream: config.presence_stream.clone(),
            rule: IngestionRule::connectivity(config.topic_filter()?),
            per_target_delivery: config.per_target_delivery,
            nats_batch_size: config.nats_batch_size,
            nats_batch_wait_secs: config.nats_batch_wait_secs,
            invocation_timeout: Duration::from_secs(config.invocation_timeout_secs),
        },
    )
    .await
}
