//! Scoped logging decorator.
//!
//! Validates the declared logging keys and opens a [`LoggingScope`] for the
//! rest of the message's processing. The scope is visible in two ways: as the
//! `scope` field of a `message_scope` tracing span, and through
//! [`current_scope`] for code running inside the message's task. Both end
//! when the inner future completes, whether it succeeded or failed.
//!
//! Header keys are only known at runtime while span field names are fixed at
//! compile time, so the span carries the scope as one logfmt-style `scope`
//! field (`correlation-id=c-1 tenant=acme`). Code that needs the individual
//! values reads them from [`current_scope`].

use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use conduit_core::{header_text, Headers, PipelineError, ScopedLoggingSettings};
use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use super::request::{reject, MessageRequest, PipelineFuture, Processed};

tokio::task_local! {
    static CURRENT_SCOPE: LoggingScope;
}

/// Returns the logging scope of the message being processed by the current
/// task, or `None` outside of a scoped logging decorator.
#[must_use]
pub fn current_scope() -> Option<LoggingScope> {
    CURRENT_SCOPE.try_with(Clone::clone).ok()
}

// ---------------------------------------------------------------------------
// LoggingScope
// ---------------------------------------------------------------------------

/// Key/value fields attached to every log line of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingScope {
    fields: Vec<(String, String)>,
}

impl LoggingScope {
    /// Builds the scope from the declared keys present in `headers`, in
    /// declaration order.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::MissingScopedLoggingKey` for the first required
    /// key absent from `headers`.
    pub fn from_headers(
        settings: &ScopedLoggingSettings,
        headers: &Headers,
    ) -> Result<Self, PipelineError> {
        let mut fields = Vec::with_capacity(settings.keys.len());
        for key in &settings.keys {
            match headers.get(&key.key_name) {
                Some(value) => fields.push((key.key_name.clone(), header_text(value))),
                None if key.required => {
                    return Err(PipelineError::MissingScopedLoggingKey {
                        key: key.key_name.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(Self { fields })
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for LoggingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ScopedLoggingLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScopedLoggingLayer {
    settings: Arc<ScopedLoggingSettings>,
}

impl ScopedLoggingLayer {
    #[must_use]
    pub fn new(settings: Arc<ScopedLoggingSettings>) -> Self {
        Self { settings }
    }
}

impl<S> Layer<S> for ScopedLoggingLayer {
    type Service = ScopedLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ScopedLoggingService {
            inner,
            settings: Arc::clone(&self.settings),
        }
    }
}

// ---------------------------------------------------------------------------
// ScopedLoggingService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ScopedLoggingService<S> {
    inner: S,
    settings: Arc<ScopedLoggingSettings>,
}

impl<S, T> Service<MessageRequest<T>> for ScopedLoggingService<S>
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
        let scope = match LoggingScope::from_headers(&self.settings, req.envelope.headers()) {
            Ok(scope) => scope,
            Err(err) => return reject(err),
        };

        let span = info_span!("message_scope", scope = %scope);
        let fut = span.in_scope(|| self.inner.call(req));
        Box::pin(CURRENT_SCOPE.scope(scope, fut.instrument(span)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use conduit_core::{Envelope, ExecutionContext, KeySetting};
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::*;
    use crate::pipeline::testing::{CaptureService, Captured};

    fn layer(keys: Vec<KeySetting>) -> ScopedLoggingLayer {
        ScopedLoggingLayer::new(Arc::new(ScopedLoggingSettings { keys }))
    }

    fn request(headers: Headers) -> MessageRequest<()> {
        MessageRequest::new(
            Envelope::new((), headers),
            ExecutionContext::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn scope_is_open_during_inner_call_and_closed_after() {
        let captured = Captured::default();
        let svc = layer(vec![KeySetting::required("test")])
            .layer(CaptureService::new(captured.clone()));

        assert!(current_scope().is_none());
        svc.oneshot(request(Headers::new().with("test", "success")))
            .await
            .unwrap();

        let seen = captured.last_scope().expect("scope visible to inner service");
        assert_eq!(seen.get("test"), Some("success"));
        assert!(current_scope().is_none());
    }

    #[tokio::test]
    async fn missing_required_key_is_rejected_before_inner_call() {
        let captured = Captured::default();
        let svc = layer(vec![KeySetting::required("test")])
            .layer(CaptureService::new(captured.clone()));

        let err = svc.oneshot(request(Headers::new())).await.unwrap_err();

        assert!(matches!(err, PipelineError::MissingScopedLoggingKey { key } if key == "test"));
        assert_eq!(captured.calls(), 0);
    }

    #[tokio::test]
    async fn scope_closes_when_inner_service_fails() {
        let captured = Captured::failing();
        let svc = layer(vec![KeySetting::optional("test")])
            .layer(CaptureService::new(captured.clone()));

        let err = svc
            .oneshot(request(Headers::new().with("test", "x")))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ConsumerProcessing { .. }));
        assert_eq!(captured.last_scope().unwrap().get("test"), Some("x"));
        assert!(current_scope().is_none());
    }

    #[test]
    fn scope_keeps_declaration_order_and_skips_absent_optional_keys() {
        let settings = ScopedLoggingSettings {
            keys: vec![
                KeySetting::optional("b"),
                KeySetting::optional("missing"),
                KeySetting::required("a"),
            ],
        };
        let headers = Headers::new().with("a", "1").with("b", 2);
        let scope = LoggingScope::from_headers(&settings, &headers).unwrap();
        assert_eq!(scope.to_string(), "b=2 a=1");
        assert!(scope.get("missing").is_none());
    }
}
