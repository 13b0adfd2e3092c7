use crate::domain::PresenceInvocation;
use common::{ConsumeRequest, ConsumeResponse};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;
use tracing::{debug, error, warn};

/// Tower service that runs one [`PresenceInvocation`] per consumed presence message.
///
/// Malformed or unroutable notifications are terminated so they are never
/// redelivered. Every other failure is nak'd and left to JetStream redelivery.
#[derive(Clone)]
pub struct PresenceConsumerService {
    invocation: Arc<PresenceInvocation>,
}

impl PresenceConsumerService {
    pub fn new(invocation: Arc<PresenceInvocation>) -> Self {
        Self { invocation }
    }
}

impl Service<ConsumeRequest> for PresenceConsumerService {
    type Response = ConsumeResponse;
    type Error = anyhow::Error;
    type Future = BoxFuture<'static, Result<ConsumeResponse, anyhow::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ConsumeRequest) -> Self::Future {
        let invocation = Arc::clone(&self.invocation);

        Box::pin(async move {
            match invocation.handle(&req.subject, &req.payload).await {
                Ok(targets) => {
                    debug!(subject = %req.subject, targets = ?targets, "presence notification handled");
                    Ok(ConsumeResponse::ack())
                }
                Err(e) if !e.is_retryable() => {
                    error!(subject = %req.subject, error = %e, "dropping unprocessable presence notification");
                    Ok(ConsumeResponse::term(e.to_string()))
                }
                Err(e) => {
                    warn!(subject = %req.subject, error = %e, "presence notification failed, requesting redelivery");
                    Ok(ConsumeResponse::nak(e.to_string()))
                }
            }
        })
    }
}
