//! Context decorator: validates declared header keys and copies them into the
//! message's execution context.

use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::{
    header_text, Culture, ExecutionContext, Headers, PipelineError, ScopedContextSettings,
    CULTURE_KEY,
};
use tower::{Layer, Service};
use tracing::warn;

use super::request::{reject, MessageRequest, PipelineFuture, Processed};

// ---------------------------------------------------------------------------
// ContextLayer
// ---------------------------------------------------------------------------

/// Tower layer that propagates declared headers into the execution context.
///
/// Runs before the culture and logging decorators so propagated values are
/// visible to both and to the business handler.
#[derive(Debug, Clone)]
pub struct ContextLayer {
    settings: Arc<ScopedContextSettings>,
}

impl ContextLayer {
    #[must_use]
    pub fn new(settings: Arc<ScopedContextSettings>) -> Self {
        Self { settings }
    }
}

impl<S> Layer<S> for ContextLayer {
    type Service = ContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ContextService {
            inner,
            settings: Arc::clone(&self.settings),
        }
    }
}

// ---------------------------------------------------------------------------
// ContextService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContextService<S> {
    inner: S,
    settings: Arc<ScopedContextSettings>,
}

impl<S, T> Service<MessageRequest<T>> for ContextService<S>
where
    S: Service<MessageRequest<T>, Response = Processed, Error = PipelineError> + Send,
    S::Future: Send + 'static,
{
    type Response = Processed;
    type Error = PipelineError;
    type Future = PipelineFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: MessageRequest<T>) -> Self::Future {
        if let Err(err) = propagate(&self.settings, req.envelope.headers(), &mut req.context) {
            return reject(err);
        }
        Box::pin(self.inner.call(req))
    }
}

/// Copies every declared key present in `headers` into `context`.
///
/// Stops at the first required key that is missing. When the culture flag is
/// set, a parsable `culture` header also replaces the context culture; an
/// unparsable one is logged and ignored.
///
/// # Errors
///
/// Returns `PipelineError::MissingContextKey` naming the missing key.
pub fn propagate(
    settings: &ScopedContextSettings,
    headers: &Headers,
    context: &mut ExecutionContext,
) -> Result<(), PipelineError> {
    for key in &settings.keys {
        match headers.get(&key.key_name) {
            Some(value) => context.insert(key.key_name.clone(), value.clone()),
            None if key.required => {
                return Err(PipelineError::MissingContextKey {
                    key: key.key_name.clone(),
                });
            }
            None => {}
        }
    }

    if settings.culture {
        if let Some(raw) = headers.get(CULTURE_KEY) {
            let tag = header_text(raw);
            match tag.parse::<Culture>() {
                Ok(culture) => context.set_culture(culture),
                Err(err) => warn!(culture = %tag, error = %err, "ignoring culture header"),
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
