//! Pipeline composition: wraps a business handler in the decorator chain.

use std::sync::Arc;

use conduit_core::{PipelineError, SettingsError, CULTURE_SECTION};
use tower::ServiceBuilder;

use super::context::ContextLayer;
use super::culture::CultureLayer;
use super::handler::{HandlerService, MessageHandler};
use super::instrument::InstrumentLayer;
use super::logging::ScopedLoggingLayer;
use super::request::{MessageRequest, PipelineFuture, Processed};
use crate::config::PipelineSettings;

/// The decorator layers of one consumer, built once from validated settings
/// and cloned into every per-message chain.
#[derive(Debug, Clone)]
pub struct PipelineLayers {
    instrument: InstrumentLayer,
    context: ContextLayer,
    culture: CultureLayer,
    logging: ScopedLoggingLayer,
}

impl PipelineLayers {
    /// Validates `settings` and prepares the layers.
    ///
    /// # Errors
    ///
    /// Returns the first settings validation error.
    pub fn new(consumer_name: &str, settings: &PipelineSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self {
            instrument: InstrumentLayer::new(consumer_name),
            context: ContextLayer::new(Arc::new(settings.context.clone())),
            culture: CultureLayer::new(settings.culture.parsed(CULTURE_SECTION)?),
            logging: ScopedLoggingLayer::new(Arc::new(settings.logging.clone())),
        })
    }
}

/// Wraps `handler` with the decorator chain.
///
/// Layer order (outermost to innermost):
/// 1. `InstrumentLayer` -- message span, outcome and duration metrics
/// 2. `ContextLayer` -- required context keys, header propagation, header culture
/// 3. `CultureLayer` -- configured default culture
/// 4. `ScopedLoggingLayer` -- required logging keys, logging scope
///
/// followed by the `HandlerService` running the business handler.
#[must_use]
pub fn build_message_pipeline<T, H>(
    handler: H,
    layers: &PipelineLayers,
) -> impl tower::Service<
    MessageRequest<T>,
    Response = Processed,
    Error = PipelineError,
    Future = PipelineFuture,
>
where
    H: MessageHandler<T>,
    T: Send + Sync + 'static,
{
    ServiceBuilder::new()
        .layer(layers.instrument.clone())
        .layer(layers.context.clone())
        .layer(layers.culture.clone())
        .layer(layers.logging.clone())
        .service(HandlerService::new(handler))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use conduit_core::{
        CultureSettings, Envelope, ExecutionContext, Headers, KeySetting, ScopedContextSettings,
        ScopedLoggingSettings,
    };
    use parking_lot::Mutex;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;
    use tracing_subscriber::layer::SubscriberExt;

    use super::*;
    use crate::pipeline::logging::{current_scope, LoggingScope};

    /// Records what the handler observed.
    #[derive(Clone, Default)]
    struct Observer {
        seen: Arc<Mutex<Vec<(String, Option<LoggingScope>)>>>,
    }

    #[async_trait]
    impl MessageHandler<()> for Observer {
        async fn process_message(
            &self,
            _envelope: &Envelope<()>,
            context: &mut ExecutionContext,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<()> {
            self.seen
                .lock()
                .push((context.culture().to_string(), current_scope()));
            Ok(())
        }
    }

    fn request(headers: Headers) -> MessageRequest<()> {
        MessageRequest::new(
            Envelope::new((), headers),
            ExecutionContext::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn default_culture_is_applied_after_header_culture() {
        let settings = PipelineSettings {
            context: ScopedContextSettings {
                keys: Vec::new(),
                culture: true,
            },
            culture: CultureSettings {
                default_culture: "de-DE".to_string(),
            },
            logging: ScopedLoggingSettings::default(),
        };
        let layers = PipelineLayers::new("orders", &settings).unwrap();
        let observer = Observer::default();

        let processed = build_message_pipeline(observer.clone(), &layers)
            .oneshot(request(Headers::new().with("culture", "pt-BR")))
            .await
            .unwrap();

        assert_eq!(processed.context.culture().to_string(), "de-DE");
        assert_eq!(observer.seen.lock()[0].0, "de-DE");
    }

    #[tokio::test]
    async fn context_validation_runs_before_logging_validation() {
        let settings = PipelineSettings {
            context: ScopedContextSettings {
                keys: vec![KeySetting::required("tenant")],
                culture: false,
            },
            logging: ScopedLoggingSettings {
                keys: vec![KeySetting::required("correlation-id")],
            },
            ..PipelineSettings::default()
        };
        let layers = PipelineLayers::new("orders", &settings).unwrap();
        let observer = Observer::default();

        let err = build_message_pipeline(observer.clone(), &layers)
            .oneshot(request(Headers::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::MissingContextKey { key } if key == "tenant"));
        assert!(observer.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_sees_logging_scope() {
        let settings = PipelineSettings {
            logging: ScopedLoggingSettings {
                keys: vec![KeySetting::required("correlation-id")],
            },
            ..PipelineSettings::default()
        };
        let layers = PipelineLayers::new("orders", &settings).unwrap();
        let observer = Observer::default();

        build_message_pipeline(observer.clone(), &layers)
            .oneshot(request(Headers::new().with("correlation-id", "c-1")))
            .await
            .unwrap();

        let seen = observer.seen.lock();
        let scope = seen[0].1.as_ref().expect("scope open during handler call");
        assert_eq!(scope.get("correlation-id"), Some("c-1"));
    }

    #[test]
    fn invalid_settings_fail_when_layers_are_built() {
        let settings = PipelineSettings {
            culture: CultureSettings {
                default_culture: "nope nope".to_string(),
            },
            ..PipelineSettings::default()
        };
        assert!(matches!(
            PipelineLayers::new("orders", &settings),
            Err(SettingsError::InvalidCulture { .. })
        ));
    }

    /// Counts `WARN` events seen by the thread's default subscriber.
    #[derive(Clone, Default)]
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn rejected_message_is_warned_about_once() {
        let counter = WarnCounter::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(counter.clone()));

        let settings = PipelineSettings {
            logging: ScopedLoggingSettings {
                keys: vec![KeySetting::required("correlation-id")],
            },
            ..PipelineSettings::default()
        };
        let layers = PipelineLayers::new("orders", &settings).unwrap();

        let err = build_message_pipeline(Observer::default(), &layers)
            .oneshot(request(Headers::new()))
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
