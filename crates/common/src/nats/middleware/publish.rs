use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use super::types::{PublishRequest, PublishResponse};
use crate::nats::trace_context::inject_trace_context;
use crate::nats::JetStreamPublisher;
use tower::{Layer, Service, ServiceBuilder};
use tracing::{error, field, info, info_span, Instrument, Span};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Innermost service: hands the request to JetStream and waits for the ack
#[derive(Clone)]
pub struct JetStreamPublishService {
    publisher: Arc<dyn JetStreamPublisher>,
}

impl JetStreamPublishService {
    pub fn new(publisher: Arc<dyn JetStreamPublisher>) -> Self {
        Self { publisher }
    }
}

impl Service<PublishRequest> for JetStreamPublishService {
    type Response = PublishResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<Result<PublishResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let publisher = Arc::clone(&self.publisher);

        Box::pin(async move {
            publisher
                .publish_with_headers(req.subject.clone(), req.headers, req.payload)
                .await?;
            Ok(PublishResponse {
                subject: req.subject,
            })
        })
    }
}

/// Logs outcome and latency of every publish
#[derive(Clone, Default)]
pub struct PublishLoggingLayer;

impl<S> Layer<S> for PublishLoggingLayer {
    type Service = PublishLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PublishLoggingService { inner }
    }
}

#[derive(Clone)]
pub struct PublishLoggingService<S> {
    inner: S,
}

impl<S> Service<PublishRequest> for PublishLoggingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: PublishRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_bytes = req.payload.len();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(_) => info!(
                        subject = %subject,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        "published to {subject} in {duration_ms}ms"
                    ),
                    Err(e) => error!(
                        subject = %subject,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        error = %e,
                        "failed to publish to {subject} in {duration_ms}ms: {e}"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}

/// Opens a `nats_publish` span and injects its context into the message headers
#[derive(Clone)]
pub struct PublishTracingLayer {
    service_name: String,
}

impl PublishTracingLayer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }
}

impl<S> Layer<S> for PublishTracingLayer {
    type Service = PublishTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PublishTracingService {
            inner,
            service_name: self.service_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PublishTracingService<S> {
    inner: S,
    service_name: String,
}

impl<S> Service<PublishRequest> for PublishTracingService<S>
where
    S: Service<PublishRequest, Response = PublishResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: PublishRequest) -> Self::Future {
        let span = info_span!(
            target: "nats",
            "nats_publish",
            otel.name = "nats_publish",
            messaging.system = "nats",
            messaging.operation = "publish",
            messaging.destination.name = %req.subject,
            messaging.message.body.size = req.payload.len(),
            service.name = %self.service_name,
            otel.status_code = field::Empty,
        );

        // Headers must carry the publish span, not the caller's
        span.in_scope(|| inject_trace_context(&mut req.headers));

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let status = if result.is_ok() { "OK" } else { "ERROR" };
                Span::current().record("otel.status_code", status);
                result
            }
            .instrument(span),
        )
    }
}

/// Publish service with tracing (outermost) and logging layers applied
pub type PublishStack = PublishTracingService<PublishLoggingService<JetStreamPublishService>>;

pub fn build_publish_stack(
    publisher: Arc<dyn JetStreamPublisher>,
    service_name: impl Into<String>,
) -> PublishStack {
    ServiceBuilder::new()
        .layer(PublishTracingLayer::new(service_name))
        .layer(PublishLoggingLayer)
        .service(JetStreamPublishService::new(publisher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nats::MockJetStreamPublisher;

    #[tokio::test]
    async fn test_publish_stack_forwards_subject_and_payload() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish_with_headers()
            .withf(|subject, _headers, payload| {
                subject == "connectivity.device_connected" && &payload[..] == b"{}"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        let mut stack = build_publish_stack(Arc::new(mock_publisher), "test");
        let response = stack
            .call(PublishRequest::new("connectivity.device_connected", "{}"))
            .await
            .unwrap();

        assert_eq!(response.subject, "connectivity.device_connected");
    }

    #[tokio::test]
    async fn test_publish_stack_propagates_errors() {
        let mut mock_publisher = MockJetStreamPublisher::new();
        mock_publisher
            .expect_publish_with_headers()
            .times(1)
            .returning(|_, _, _| Err(anyhow::anyhow!("no responders")));

        let mut stack = build_publish_stack(Arc::new(mock_publisher), "test");
        let result = stack.call(PublishRequest::new("bus.x", "{}")).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no responders"));
    }
}
