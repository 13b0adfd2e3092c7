use crate::domain::{DualSinkDispatcher, IngestionRule, PresenceInvocation, RuleTarget};
use crate::nats::PresenceConsumerService;
use common::{
    ConsumeLoggingLayer, ConsumeLoggingService, ConsumeTracingLayer, ConsumeTracingService,
    ConsumerSettings, JetStreamConsumer, TowerConsumer,
};
use connectivity_runner::{app_process, AppProcess};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::info;

pub type PresenceConsumerStack =
    ConsumeTracingService<ConsumeLoggingService<PresenceConsumerService>>;

pub struct ConnectivityWorkerConfig {
    pub presence_stream: String,
    pub rule: IngestionRule,
    /// One durable consumer per rule target instead of a single combined one
    pub per_target_delivery: bool,
    pub nats_batch_size: usize,
    pub nats_batch_wait_secs: u64,
    pub invocation_timeout: Duration,
}

impl ConnectivityWorkerConfig {
    /// A batch runs concurrently, so every message settles within one timeout of delivery
    fn ack_wait(&self) -> Duration {
        self.invocation_timeout * 2
    }

    /// Target sets served by each consumer, with its durable name
    fn consumer_plan(&self) -> Vec<(String, Vec<RuleTarget>)> {
        if self.per_target_delivery {
            self.rule
                .targets()
                .iter()
                .map(|target| (self.rule.consumer_name(*target), vec![*target]))
                .collect()
        } else {
            vec![(
                self.rule.combined_consumer_name(),
                self.rule.targets().to_vec(),
            )]
        }
    }
}

pub struct ConnectivityWorker {
    consumers: Vec<TowerConsumer<PresenceConsumerStack>>,
}

impl ConnectivityWorker {
    pub async fn new(
        dispatcher: Arc<DualSinkDispatcher>,
        jetstream: Arc<dyn JetStreamConsumer>,
        config: ConnectivityWorkerConfig,
    ) -> anyhow::Result<Self> {
        info!(
            rule = %config.rule.name(),
            filter = %config.rule.filter(),
            per_target_delivery = config.per_target_delivery,
            "initializing connectivity worker"
        );

        let rule = Arc::new(config.rule.clone());
        let subject_filter = rule.filter().to_nats_subject();
        let mut consumers = Vec::new();

        for (consumer_name, targets) in config.consumer_plan() {
            let invocation = Arc::new(PresenceInvocation::new(
                Arc::clone(&dispatcher),
                Arc::clone(&rule),
                targets,
                config.invocation_timeout,
            ));

            let service = ServiceBuilder::new()
                .layer(ConsumeTracingLayer::new(consumer_name.clone()))
                .layer(ConsumeLoggingLayer)
                .service(PresenceConsumerService::new(invocation));

            let settings = ConsumerSettings {
                stream_name: config.presence_stream.clone(),
                consumer_name,
                subject_filter: subject_filter.clone(),
                batch_size: config.nats_batch_size,
                max_wait: Duration::from_secs(config.nats_batch_wait_secs),
                ack_wait: config.ack_wait(),
            };

            consumers.push(TowerConsumer::new(Arc::clone(&jetstream), settings, service).await?);
        }

        info!(consumers = consumers.len(), "connectivity worker initialized");

        Ok(Self { consumers })
    }

    pub fn consumer_names(&self) -> Vec<&str> {
        self.consumers.iter().map(|c| c.consumer_name()).collect()
    }

    /// One named runner process per consumer
    pub fn into_runner_processes(self) -> Vec<(String, AppProcess)> {
        self.consumers
            .into_iter()
            .map(|consumer| {
                let name = consumer.consumer_name().to_string();
                (name, app_process(move |ctx| consumer.run(ctx)))
            })
            .collect()
    }
}
