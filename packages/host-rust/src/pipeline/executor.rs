//! Runs one message through a freshly built decorator chain.

use conduit_core::{Culture, Envelope, ExecutionContext, PipelineError, SettingsError};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::builder::{build_message_pipeline, PipelineLayers};
use super::handler::MessageHandler;
use super::request::{MessageRequest, Processed};
use crate::config::PipelineSettings;

/// Executes the pipeline for single messages.
///
/// Every call builds a new chain around the handler instance it is given and
/// a new execution context seeded with the process culture, so concurrent
/// executions share nothing but the read-only settings.
#[derive(Debug, Clone)]
pub struct PipelineExecutor {
    layers: PipelineLayers,
    process_culture: Culture,
}

impl PipelineExecutor {
    /// Validates `settings` and creates an executor using the invariant
    /// culture as process default.
    ///
    /// # Errors
    ///
    /// Returns the first settings validation error.
    pub fn new(consumer_name: &str, settings: &PipelineSettings) -> Result<Self, SettingsError> {
        Ok(Self {
            layers: PipelineLayers::new(consumer_name, settings)?,
            process_culture: Culture::invariant(),
        })
    }

    #[must_use]
    pub fn with_process_culture(mut self, culture: Culture) -> Self {
        self.process_culture = culture;
        self
    }

    #[must_use]
    pub fn process_culture(&self) -> &Culture {
        &self.process_culture
    }

    /// Runs `envelope` through the decorator chain and `handler`, once.
    ///
    /// # Errors
    ///
    /// Missing-key errors are returned as raised by the decorators; handler
    /// failures come back as `PipelineError::ConsumerProcessing`.
    pub async fn execute<T, H>(
        &self,
        handler: H,
        envelope: Envelope<T>,
        cancel: CancellationToken,
    ) -> Result<Processed, PipelineError>
    where
        H: MessageHandler<T>,
        T: Send + Sync + 'static,
    {
        let context = ExecutionContext::new(self.process_culture.clone());
        let request = MessageRequest::new(envelope, context, cancel);
        build_message_pipeline(handler, &self.layers)
            .oneshot(request)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
