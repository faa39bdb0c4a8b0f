//! Outbound side: publishing messages with the execution context attached.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::{
    Envelope, ExecutionContext, Headers, PipelineError, ScopedContextSettings, CULTURE_KEY,
};
use tracing::error;

/// Wire-level producer for one broker technology.
#[async_trait]
pub trait MessageProducer<T>: Send + Sync {
    async fn send(&self, envelope: Envelope<T>) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, P> MessageProducer<T> for Arc<P>
where
    P: MessageProducer<T> + ?Sized,
    T: Send + 'static,
{
    async fn send(&self, envelope: Envelope<T>) -> anyhow::Result<()> {
        (**self).send(envelope).await
    }
}

/// Publishes messages, forwarding execution context values as headers.
///
/// Keys listed in `propagated_keys` are copied from the current context into
/// the outgoing headers unless the caller already set them, so a consumer
/// further down the line receives the same correlation/tenant metadata.
/// Every send failure is returned as `PipelineError::ProducerSend`.
#[derive(Debug)]
pub struct Publisher<P> {
    producer: P,
    propagated_keys: Vec<String>,
    propagate_culture: bool,
}

impl<P> Publisher<P> {
    /// A publisher that forwards nothing from the context.
    #[must_use]
    pub fn new(producer: P) -> Self {
        Self {
            producer,
            propagated_keys: Vec::new(),
            propagate_culture: false,
        }
    }

    /// A publisher forwarding the keys (and culture flag) a consumer with
    /// `settings` propagates into its own context.
    #[must_use]
    pub fn from_context_settings(producer: P, settings: &ScopedContextSettings) -> Self {
        Self {
            producer,
            propagated_keys: settings.keys.iter().map(|k| k.key_name.clone()).collect(),
            propagate_culture: settings.culture,
        }
    }

    #[must_use]
    pub fn propagate_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.propagated_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn propagate_culture(mut self, enabled: bool) -> Self {
        self.propagate_culture = enabled;
        self
    }

    #[must_use]
    pub fn producer(&self) -> &P {
        &self.producer
    }

    /// Publishes `data` with `headers`, enriched from `context` when given.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::ProducerSend` wrapping the producer's error.
    pub async fn publish<T>(
        &self,
        data: T,
        headers: Headers,
        context: Option<&ExecutionContext>,
    ) -> Result<(), PipelineError>
    where
        P: MessageProducer<T>,
        T: Send,
    {
        let headers = match context {
            Some(context) => self.outgoing_headers(headers, context),
            None => headers,
        };
        self.producer
            .send(Envelope::new(data, headers))
            .await
            .map_err(|source| {
                let err = PipelineError::producer(source);
                error!(error = %err.chain_text(), "publish failed");
                err
            })
    }

    fn outgoing_headers(&self, mut headers: Headers, context: &ExecutionContext) -> Headers {
        for key in &self.propagated_keys {
            if headers.contains_key(key) {
                continue;
            }
            if let Some(value) = context.get(key) {
                headers.insert(key.clone(), value);
            }
        }
        if self.propagate_culture
            && !headers.contains_key(CULTURE_KEY)
            && !context.culture().is_invariant()
        {
            headers.insert(CULTURE_KEY, context.culture().to_string());
        }
        headers
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use conduit_core::KeySetting;
    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<Envelope<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageProducer<String> for Recording {
        async fn send(&self, envelope: Envelope<String>) -> anyhow::Result<()> {
            if self.fail {
                return Err(anyhow!("broker connection reset"));
            }
            self.sent.lock().push(envelope);
            Ok(())
        }
    }

    fn context() -> ExecutionContext {
        let mut ctx = ExecutionContext::new("pt-BR".parse().unwrap());
        ctx.insert("tenant", "acme");
        ctx.insert("correlation-id", "c-42");
        ctx
    }

    #[tokio::test]
    async fn forwards_declared_context_keys_and_culture() {
        let settings = ScopedContextSettings {
            keys: vec![KeySetting::required("tenant"), KeySetting::optional("missing")],
            culture: true,
        };
        let publisher = Publisher::from_context_settings(Recording::default(), &settings);

        publisher
            .publish("body".to_string(), Headers::new(), Some(&context()))
            .await
            .unwrap();

        let sent = publisher.producer().sent.lock();
        let headers = sent[0].headers();
        assert_eq!(headers.get("tenant"), Some(&json!("acme")));
        assert_eq!(headers.get("culture"), Some(&json!("pt-BR")));
        assert!(!headers.contains_key("correlation-id"));
        assert!(!headers.contains_key("missing"));
    }

    #[tokio::test]
    async fn explicit_headers_win_over_context() {
        let publisher = Publisher::new(Recording::default()).propagate_keys(["tenant"]);

        publisher
            .publish(
                "body".to_string(),
                Headers::new().with("tenant", "override"),
                Some(&context()),
            )
            .await
            .unwrap();

        let sent = publisher.producer().sent.lock();
        assert_eq!(sent[0].headers().get_text("tenant").as_deref(), Some("override"));
    }

    #[tokio::test]
    async fn send_failure_is_producer_send() {
        let publisher = Publisher::new(Recording {
            fail: true,
            ..Recording::default()
        });

        let err = publisher
            .publish("body".to_string(), Headers::new(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::ProducerSend { .. }));
        assert!(!err.is_retryable());
        assert_eq!(err.cause().unwrap().to_string(), "broker connection reset");
    }
}
