use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use super::types::{ConsumeRequest, ConsumeResponse};
use crate::nats::trace_context::set_parent_from_headers;
use tower::{Layer, Service};
use tracing::{error, field, info, info_span, Instrument, Span};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Logs outcome and latency of every consumed message
#[derive(Clone, Default)]
pub struct ConsumeLoggingLayer;

impl<S> Layer<S> for ConsumeLoggingLayer {
    type Service = ConsumeLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConsumeLoggingService { inner }
    }
}

#[derive(Clone)]
pub struct ConsumeLoggingService<S> {
    inner: S,
}

impl<S> Service<ConsumeRequest> for ConsumeLoggingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let subject = req.subject.clone();
        let payload_bytes = req.payload.len();
        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let duration_ms = start.elapsed().as_millis();

                match &result {
                    Ok(response) => {
                        let outcome = response.outcome();
                        info!(
                            subject = %subject,
                            payload_bytes,
                            outcome = %outcome,
                            duration_ms = %duration_ms,
                            "consumed from {subject} in {duration_ms}ms [{outcome}]"
                        );
                    }
                    Err(e) => error!(
                        subject = %subject,
                        payload_bytes,
                        duration_ms = %duration_ms,
                        error = %e,
                        "failed to consume from {subject} in {duration_ms}ms: {e}"
                    ),
                }

                result
            }
            .instrument(Span::current()),
        )
    }
}

/// Opens a `nats_consume` span per message, parented on the publisher's trace
#[derive(Clone)]
pub struct ConsumeTracingLayer {
    consumer_name: String,
}

impl ConsumeTracingLayer {
    pub fn new(consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
        }
    }
}

impl<S> Layer<S> for ConsumeTracingLayer {
    type Service = ConsumeTracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConsumeTracingService {
            inner,
            consumer_name: self.consumer_name.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ConsumeTracingService<S> {
    inner: S,
    consumer_name: String,
}

impl<S> Service<ConsumeRequest> for ConsumeTracingService<S>
where
    S: Service<ConsumeRequest, Response = ConsumeResponse> + Clone + Send + 'static,
    S::Error: std::fmt::Display + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<Result<S::Response, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        // Each message starts its own trace unless the publisher sent one
        let span = info_span!(
            target: "nats",
            parent: None,
            "nats_consume",
            otel.name = "nats_consume",
            messaging.system = "nats",
            messaging.operation = "process",
            messaging.destination.name = %req.subject,
            messaging.consumer.name = %self.consumer_name,
            messaging.message.body.size = req.payload.len(),
            otel.status_code = field::Empty,
        );

        if let Some(headers) = &req.headers {
            span.in_scope(|| set_parent_from_headers(headers));
        }

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let result = inner.call(req).await;
                let status = match &result {
                    Ok(response) if response.is_ack() => "OK",
                    _ => "ERROR",
                };
                Span::current().record("otel.status_code", status);
                result
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::future::BoxFuture as FutBox;
    use tower::ServiceBuilder;

    #[derive(Clone)]
    struct FixedResponse(ConsumeResponse);

    impl Service<ConsumeRequest> for FixedResponse {
        type Response = ConsumeResponse;
        type Error = anyhow::Error;
        type Future = FutBox<'static, Result<ConsumeResponse, anyhow::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: ConsumeRequest) -> Self::Future {
            let response = self.0.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    #[tokio::test]
    async fn test_layers_pass_response_through() {
        let mut svc = ServiceBuilder::new()
            .layer(ConsumeTracingLayer::new("test-consumer"))
            .layer(ConsumeLoggingLayer)
            .service(FixedResponse(ConsumeResponse::nak("sink down")));

        let response = svc
            .call(ConsumeRequest::new(
                "presence.connected.dev-1".to_string(),
                Bytes::from_static(b"{}"),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response, ConsumeResponse::nak("sink down"));
    }
}
