//! The request/response types flowing through the decorator chain.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use conduit_core::{Envelope, ExecutionContext, PipelineError};
use tokio_util::sync::CancellationToken;

/// One message travelling through the pipeline.
///
/// The envelope is shared read-only. The context is owned: each decorator
/// receives it by value, so nothing outside this message can observe it.
#[derive(Debug)]
pub struct MessageRequest<T> {
    pub envelope: Arc<Envelope<T>>,
    pub context: ExecutionContext,
    pub cancel: CancellationToken,
}

impl<T> MessageRequest<T> {
    #[must_use]
    pub fn new(
        envelope: Envelope<T>,
        context: ExecutionContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            envelope: Arc::new(envelope),
            context,
            cancel,
        }
    }
}

/// Successful pipeline outcome: the message's final execution context.
#[derive(Debug)]
pub struct Processed {
    pub context: ExecutionContext,
}

/// Boxed future returned by every pipeline service.
pub type PipelineFuture = Pin<Box<dyn Future<Output = Result<Processed, PipelineError>> + Send>>;

/// Future that fails immediately, used by decorators rejecting a message.
pub(crate) fn reject(err: PipelineError) -> PipelineFuture {
    Box::pin(async move { Err(err) })
}
