//! Culture decorator: applies a configured default culture to the message.

use std::task::{Context, Poll};

use conduit_core::{Culture, PipelineError};
use tower::{Layer, Service};

use super::request::{MessageRequest, PipelineFuture, Processed};

/// Tower layer that sets a default culture on every message's context.
///
/// With no default configured the context culture is left as it is. The
/// layer sits after the context decorator, so a configured default replaces
/// any culture read from headers for the same message.
#[derive(Debug, Clone, Default)]
pub struct CultureLayer {
    default: Option<Culture>,
}

impl CultureLayer {
    #[must_use]
    pub fn new(default: Option<Culture>) -> Self {
        Self { default }
    }
}

impl<S> Layer<S> for CultureLayer {
    type Service = CultureService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CultureService {
            inner,
            default: self.default.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CultureService<S> {
    inner: S,
    default: Option<Culture>,
}

impl<S, T> Service<MessageRequest<T>> for CultureService<S>
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
        if let Some(culture) = &self.default {
            req.context.set_culture(culture.clone());
        }
        Box::pin(self.inner.call(req))
    }
}
