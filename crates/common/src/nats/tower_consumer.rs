use crate::nats::{ConsumeRequest, ConsumeResponse, JetStreamConsumer, PullConsumer};
use anyhow::{Context, Result};
use async_nats::jetstream::{self, AckKind};
use futures::stream::{self, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::{debug, error, info, warn};

/// Durable pull consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub stream_name: String,
    pub consumer_name: String,
    pub subject_filter: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    /// How long the server waits for an ack before redelivering
    pub ack_wait: Duration,
}

impl ConsumerSettings {
    fn pull_config(&self) -> jetstream::consumer::pull::Config {
        jetstream::consumer::pull::Config {
            name: Some(self.consumer_name.clone()),
            durable_name: Some(self.consumer_name.clone()),
            filter_subject: self.subject_filter.clone(),
            ack_policy: jetstream::consumer::AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            ..Default::default()
        }
    }
}

/// Drives a durable JetStream pull consumer, feeding each message through a tower service
/// and settling it according to the returned [`ConsumeResponse`].
pub struct TowerConsumer<S> {
    consumer: Box<dyn PullConsumer>,
    settings: ConsumerSettings,
    service: S,
}

impl<S> TowerConsumer<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    pub async fn new(
        jetstream: Arc<dyn JetStreamConsumer>,
        settings: ConsumerSettings,
        service: S,
    ) -> Result<Self> {
        debug!(
            stream = %settings.stream_name,
            consumer = %settings.consumer_name,
            filter_subject = %settings.subject_filter,
            "creating durable consumer"
        );

        let consumer = jetstream
            .create_consumer(settings.pull_config(), &settings.stream_name)
            .await
            .with_context(|| {
                format!("failed to create consumer {}", settings.consumer_name)
            })?;

        Ok(Self {
            consumer,
            settings,
            service,
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.settings.consumer_name
    }

    /// Fetch and process batches until `ctx` is cancelled
    pub async fn run(mut self, ctx: CancellationToken) -> Result<()> {
        info!(
            stream = %self.settings.stream_name,
            consumer = %self.settings.consumer_name,
            "consumer started"
        );

        loop {
            tokio::select! {
                _ = ctx.cancelled() => {
                    info!(consumer = %self.settings.consumer_name, "shutdown requested, stopping consumer");
                    break;
                }
                result = self.process_batch() => {
                    if let Err(e) = result {
                        error!(
                            consumer = %self.settings.consumer_name,
                            error = %e,
                            "batch failed"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }

        Ok(())
    }

    async fn process_batch(&mut self) -> Result<usize> {
        let messages = self
            .consumer
            .fetch_messages(self.settings.batch_size, self.settings.max_wait)
            .await?;

        if messages.is_empty() {
            return Ok(0);
        }

        let count = messages.len();
        debug!(
            consumer = %self.settings.consumer_name,
            count,
            "processing batch"
        );

        let batch = messages.into_iter().map(|msg| {
            let request = ConsumeRequest::new(
                msg.subject.to_string(),
                msg.payload.clone(),
                msg.headers.clone(),
            );
            (msg, request)
        });

        Self::dispatch_batch(self.service.clone(), count, batch)
            .for_each(|(msg, response)| async move { settle(&msg, &response).await })
            .await;

        Ok(count)
    }

    /// Runs up to `limit` requests at once and yields each response as soon as it completes.
    ///
    /// ack_wait starts at delivery for every message in a batch, so no message
    /// may wait for another one's invocation before its own starts.
    fn dispatch_batch<T, I>(
        service: S,
        limit: usize,
        batch: I,
    ) -> impl Stream<Item = (T, ConsumeResponse)>
    where
        I: IntoIterator<Item = (T, ConsumeRequest)>,
    {
        stream::iter(batch)
            .map(move |(tag, request)| {
                let service = service.clone();
                async move { (tag, dispatch(service, request).await) }
            })
            .buffer_unordered(limit.max(1))
    }
}

/// Service errors are treated as retryable
async fn dispatch<S>(mut service: S, request: ConsumeRequest) -> ConsumeResponse
where
    S: Service<ConsumeRequest, Response = ConsumeResponse, Error = anyhow::Error>,
{
    let subject = request.subject.clone();
    let result = match service.ready().await {
        Ok(svc) => svc.call(request).await,
        Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
        error!(subject = %subject, error = %e, "service failed to process message");
        ConsumeResponse::nak(e.to_string())
    })
}

async fn settle(msg: &jetstream::Message, response: &ConsumeResponse) {
    let subject = msg.subject.as_str();

    let settled = match response {
        ConsumeResponse::Ack => msg.ack().await,
        ConsumeResponse::Nak(reason) => {
            warn!(subject, reason = ?reason, "message will be redelivered");
            msg.ack_with(AckKind::Nak(None)).await
        }
        ConsumeResponse::Term(reason) => {
            warn!(subject, reason = %reason, "message terminated");
            msg.ack_with(AckKind::Term).await
        }
    };

    if let Err(e) = settled {
        error!(
            subject,
            outcome = response.outcome(),
            error = %e,
            "failed to settle message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::traits::{MockJetStreamConsumer, MockPullConsumer};
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{Context, Poll};

    #[derive(Clone)]
    struct AckAll;

    impl Service<ConsumeRequest> for AckAll {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            Box::pin(async move { Ok(ConsumeResponse::Ack) })
        }
    }

    #[derive(Clone)]
    struct AlwaysFails;

    impl Service<ConsumeRequest> for AlwaysFails {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            Box::pin(async move { Err(anyhow::anyhow!("boom")) })
        }
    }

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            stream_name: "presence".to_string(),
            consumer_name: "connectivity-rule-time-series".to_string(),
            subject_filter: "presence.*.*".to_string(),
            batch_size: 10,
            max_wait: Duration::from_secs(5),
            ack_wait: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_creates_durable_explicit_ack_consumer() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .withf(|config: &jetstream::consumer::pull::Config, stream_name: &str| {
                config.durable_name.as_deref() == Some("connectivity-rule-time-series")
                    && config.filter_subject == "presence.*.*"
                    && config.ack_policy == jetstream::consumer::AckPolicy::Explicit
                    && config.ack_wait == Duration::from_secs(60)
                    && stream_name == "presence"
            })
            .times(1)
            .returning(|_, _| Ok(Box::new(MockPullConsumer::new())));

        let consumer = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAll)
            .await
            .unwrap();

        assert_eq!(consumer.consumer_name(), "connectivity-rule-time-series");
    }

    #[tokio::test]
    async fn test_creation_failure_names_consumer() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("stream not found")));

        let result = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAll).await;

        let err = result.err().unwrap();
        assert!(err
            .to_string()
            .contains("failed to create consumer connectivity-rule-time-series"));
    }

    #[tokio::test]
    async fn test_empty_batch_processes_nothing() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| {
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages()
                    .times(1)
                    .returning(|_, _| Ok(vec![]));
                Ok(Box::new(pull))
            });

        let mut consumer = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAll)
            .await
            .unwrap();

        assert_eq!(consumer.process_batch().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_error_surfaces() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream
            .expect_create_consumer()
            .times(1)
            .returning(|_, _| {
                let mut pull = MockPullConsumer::new();
                pull.expect_fetch_messages()
                    .times(1)
                    .returning(|_, _| Err(anyhow::anyhow!("connection closed")));
                Ok(Box::new(pull))
            });

        let mut consumer = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAll)
            .await
            .unwrap();

        assert!(consumer.process_batch().await.is_err());
    }

    #[tokio::test]
    async fn test_service_error_becomes_nak() {
        let response = dispatch(AlwaysFails, request(0)).await;

        assert_eq!(response, ConsumeResponse::nak("boom"));
    }

    /// Holds every call for ten seconds and records the peak number in flight
    #[derive(Clone, Default)]
    struct SlowService {
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Service<ConsumeRequest> for SlowService {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            let in_flight = Arc::clone(&self.in_flight);
            let peak = Arc::clone(&self.peak);
            Box::pin(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(ConsumeResponse::Ack)
            })
        }
    }

    fn request(i: usize) -> ConsumeRequest {
        ConsumeRequest::new(
            format!("presence.connected.dev-{i}"),
            bytes::Bytes::from_static(b"{}"),
            None,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_is_dispatched_concurrently() {
        let service = SlowService::default();
        let peak = Arc::clone(&service.peak);
        let started = tokio::time::Instant::now();

        let mut done: Vec<(usize, ConsumeResponse)> =
            TowerConsumer::dispatch_batch(service, 30, (0..30).map(|i| (i, request(i))))
                .collect()
                .await;

        // Every message settles within one invocation's duration of delivery
        assert!(started.elapsed() < Duration::from_secs(20));
        assert_eq!(peak.load(Ordering::SeqCst), 30);

        done.sort_by_key(|(i, _)| *i);
        assert_eq!(done.len(), 30);
        assert!(done.iter().enumerate().all(|(n, (i, r))| n == *i && r.is_ack()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_concurrency_is_bounded() {
        let service = SlowService::default();
        let peak = Arc::clone(&service.peak);

        let done: Vec<(usize, ConsumeResponse)> =
            TowerConsumer::dispatch_batch(service, 2, (0..4).map(|i| (i, request(i))))
                .collect()
                .await;

        assert_eq!(done.len(), 4);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let mut mock_jetstream = MockJetStreamConsumer::new();
        mock_jetstream.expect_create_consumer().returning(|_, _| {
            let mut pull = MockPullConsumer::new();
            pull.expect_fetch_messages().returning(|_, _| Ok(vec![]));
            Ok(Box::new(pull))
        });

        let consumer = TowerConsumer::new(Arc::new(mock_jetstream), settings(), AckAll)
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();

        consumer.run(token).await.unwrap();
    }
}
