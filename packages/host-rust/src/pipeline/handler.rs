//! Business handler contract and the innermost pipeline service.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::anyhow;
use async_trait::async_trait;
use conduit_core::{Envelope, ExecutionContext, PipelineError};
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tower::Service;
use tracing::error;

use super::request::{MessageRequest, PipelineFuture, Processed};

// ---------------------------------------------------------------------------
// MessageHandler
// ---------------------------------------------------------------------------

/// Domain-specific processing of one message.
///
/// The handler may add values to the message's execution context, for
/// example a correlation id for a [`Publisher`](crate::producer::Publisher)
/// to forward. The context belongs to this message only.
///
/// Any error returned here reaches the broker adapter as
/// `PipelineError::ConsumerProcessing` with the error kept as its source.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync + 'static {
    async fn process_message(
        &self,
        envelope: &Envelope<T>,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()>;
}

/// Creates a fresh handler instance for each message.
///
/// Implemented for any `Fn() -> H` closure.
pub trait HandlerFactory<T>: Send + Sync + 'static {
    type Handler: MessageHandler<T>;

    fn create(&self) -> Self::Handler;
}

impl<T, F, H> HandlerFactory<T> for F
where
    F: Fn() -> H + Send + Sync + 'static,
    H: MessageHandler<T>,
{
    type Handler = H;

    fn create(&self) -> H {
        self()
    }
}

// ---------------------------------------------------------------------------
// HandlerService
// ---------------------------------------------------------------------------

/// Invokes the business handler once per request and classifies its failures.
///
/// Returned errors and panics are both wrapped into
/// `PipelineError::ConsumerProcessing`. The failure is logged here so the
/// record carries the message's logging scope.
#[derive(Debug)]
pub struct HandlerService<H> {
    handler: Arc<H>,
}

impl<H> HandlerService<H> {
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<H> Clone for HandlerService<H> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<H, T> Service<MessageRequest<T>> for HandlerService<H>
where
    H: MessageHandler<T>,
    T: Send + Sync + 'static,
{
    type Response = Processed;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: MessageRequest<T>) -> Self::Future {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let MessageRequest {
                envelope,
                mut context,
                cancel,
            } = req;

            let outcome =
                AssertUnwindSafe(handler.process_message(&envelope, &mut context, &cancel))
                    .catch_unwind()
                    .await;

            let source = match outcome {
                Ok(Ok(())) => return Ok(Processed { context }),
                Ok(Err(source)) => source,
                Err(panic) => anyhow!("message handler panicked: {}", panic_message(&*panic)),
            };

            let err = PipelineError::consumer(source);
            error!(error = %err.chain_text(), "message handler failed");
            Err(err)
        })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
