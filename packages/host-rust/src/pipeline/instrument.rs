//! Outermost pipeline layer: per-message span, outcome logging and metrics.
//!
//! Not one of the message decorators. It only observes the result of the
//! chain it wraps and never changes it.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use conduit_core::PipelineError;
use tower::{Layer, Service};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use super::request::{MessageRequest, PipelineFuture, Processed};

pub const MESSAGES_TOTAL: &str = "conduit_messages_total";
pub const MESSAGE_DURATION_SECONDS: &str = "conduit_message_duration_seconds";

// ---------------------------------------------------------------------------
// InstrumentLayer
// ---------------------------------------------------------------------------

/// Tower layer that wraps each message in a `message` span and records its
/// duration and outcome.
#[derive(Debug, Clone)]
pub struct InstrumentLayer {
    consumer: Arc<str>,
}

impl InstrumentLayer {
    #[must_use]
    pub fn new(consumer: &str) -> Self {
        Self {
            consumer: Arc::from(consumer),
        }
    }
}

impl<S> Layer<S> for InstrumentLayer {
    type Service = InstrumentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InstrumentService {
            inner,
            consumer: Arc::clone(&self.consumer),
        }
    }
}

// ---------------------------------------------------------------------------
// InstrumentService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct InstrumentService<S> {
    inner: S,
    consumer: Arc<str>,
}

impl<S, T> Service<MessageRequest<T>> for InstrumentService<S>
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

    fn call(&mut self, req: MessageRequest<T>) -> Self::Future {
        let consumer = Arc::clone(&self.consumer);
        let span = info_span!(
            "message",
            consumer = %consumer,
            message_id = %Uuid::new_v4(),
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        // Decorators validate synchronously in `call`; keep their logs in the span.
        let start = Instant::now();
        let fut = span.in_scope(|| self.inner.call(req));

        Box::pin(
            async move {
                let result = fut.await;
                let elapsed = start.elapsed();

                let outcome = match &result {
                    Ok(_) => "ok",
                    Err(err) => err.kind().as_str(),
                };
                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                metrics::counter!(
                    MESSAGES_TOTAL,
                    "consumer" => consumer.to_string(),
                    "outcome" => outcome
                )
                .increment(1);
                metrics::histogram!(MESSAGE_DURATION_SECONDS, "consumer" => consumer.to_string())
                    .record(elapsed.as_secs_f64());

                match &result {
                    Ok(_) => debug!(duration_ms, "message processed"),
                    Err(err) if err.is_validation() => {
                        warn!(error = %err, "message rejected by pipeline validation");
                    }
                    // Handler failures are logged inside the message scope.
                    Err(_) => {}
                }

                result
            }
            .instrument(span),
        )
    }
}
