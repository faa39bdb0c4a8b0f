//! The contract every broker adapter satisfies to plug into the host.

use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::PipelineError;
use tokio_util::sync::CancellationToken;

use super::dispatcher::{DispatchError, MessageDispatcher};

/// A wire-level consumer for one broker technology.
///
/// The adapter owns connection handling, deserialization and ack/nack. For
/// each inbound message it builds an `Envelope` and awaits
/// `dispatcher.dispatch`, then settles the message with the broker according
/// to the result (see [`Disposition::for_outcome`] for the default policy).
/// Concurrency is the adapter's own setting (prefetch count, max concurrent
/// calls, partitions); the host is safe to dispatch to in parallel.
#[async_trait]
pub trait BrokerAdapter<T>: Send + Sync + 'static {
    /// Short technology name for logs (`"kafka"`, `"rabbitmq"`, ...).
    fn name(&self) -> &'static str;

    /// Consumes until `shutdown` fires or the source is exhausted.
    async fn run(
        &self,
        dispatcher: MessageDispatcher<T>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<T, A> BrokerAdapter<T> for Arc<A>
where
    A: BrokerAdapter<T>,
    T: Send + 'static,
{
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn run(
        &self,
        dispatcher: MessageDispatcher<T>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        (**self).run(dispatcher, shutdown).await
    }
}

/// How an adapter settles a message with its broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Processing succeeded; remove the message.
    Ack,
    /// Transient failure; make the message available again.
    Requeue,
    /// The message can never succeed as sent; move it aside.
    DeadLetter,
}

impl Disposition {
    /// Default settlement policy.
    ///
    /// Only business failures and host shutdown lead to redelivery. Missing
    /// required keys are a producer contract mismatch and are dead-lettered.
    #[must_use]
    pub fn for_outcome(outcome: &Result<(), DispatchError>) -> Self {
        match outcome {
            Ok(()) => Self::Ack,
            Err(DispatchError::HostStopped) => Self::Requeue,
            Err(DispatchError::Pipeline(err)) => Self::for_error(err),
        }
    }

    #[must_use]
    pub fn for_error(err: &PipelineError) -> Self {
        if err.is_retryable() {
            Self::Requeue
        } else {
            Self::DeadLetter
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;

    #[test]
    fn success_is_acked() {
        assert_eq!(Disposition::for_outcome(&Ok(())), Disposition::Ack);
    }

    #[test]
    fn processing_failure_and_shutdown_are_requeued() {
        let failure = Err(DispatchError::Pipeline(PipelineError::consumer(anyhow!("db"))));
        assert_eq!(Disposition::for_outcome(&failure), Disposition::Requeue);
        assert_eq!(
            Disposition::for_outcome(&Err(DispatchError::HostStopped)),
            Disposition::Requeue
        );
    }

    #[test]
    fn validation_failures_are_dead_lettered() {
        let missing = PipelineError::MissingScopedLoggingKey { key: "k".into() };
        assert_eq!(Disposition::for_error(&missing), Disposition::DeadLetter);
        let missing = PipelineError::MissingContextKey { key: "k".into() };
        assert_eq!(Disposition::for_error(&missing), Disposition::DeadLetter);
    }
}
