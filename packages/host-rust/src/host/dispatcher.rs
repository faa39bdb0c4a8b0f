//! Channel-based delivery from broker adapters to the consumer host.

use conduit_core::{Envelope, PipelineError};
use tokio::sync::{mpsc, oneshot};

/// One envelope handed to the host, with the channel its outcome goes back on.
#[derive(Debug)]
pub struct Delivery<T> {
    pub envelope: Envelope<T>,
    pub(crate) reply: oneshot::Sender<Result<(), PipelineError>>,
}

/// Receiving half consumed by the host loop.
pub type DeliveryReceiver<T> = mpsc::Receiver<Delivery<T>>;

/// Outcome of a dispatch as seen by the adapter.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("consumer host is not accepting messages")]
    HostStopped,
}

impl DispatchError {
    /// The pipeline error, if the message was processed at all.
    #[must_use]
    pub fn pipeline(&self) -> Option<&PipelineError> {
        match self {
            Self::Pipeline(err) => Some(err),
            Self::HostStopped => None,
        }
    }
}

/// Handle a broker adapter uses to submit messages.
///
/// Cloneable; adapters delivering in parallel give each worker its own clone.
/// `dispatch` resolves once the message has been fully processed, so the
/// adapter can ack or nack based on the result.
#[derive(Debug)]
pub struct MessageDispatcher<T> {
    tx: mpsc::Sender<Delivery<T>>,
}

impl<T> Clone for MessageDispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> MessageDispatcher<T> {
    /// Submits `envelope` and waits for its processing outcome.
    ///
    /// # Errors
    ///
    /// `DispatchError::Pipeline` carries the pipeline's error for this
    /// message. `DispatchError::HostStopped` means the host shut down before
    /// the message was processed.
    pub async fn dispatch(&self, envelope: Envelope<T>) -> Result<(), DispatchError> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(Delivery { envelope, reply })
            .await
            .map_err(|_| DispatchError::HostStopped)?;
        outcome
            .await
            .map_err(|_| DispatchError::HostStopped)?
            .map_err(DispatchError::from)
    }

    /// True once the host has stopped receiving.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Creates a dispatcher and the receiver for the host loop.
#[must_use]
pub fn channel<T>(capacity: usize) -> (MessageDispatcher<T>, DeliveryReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MessageDispatcher { tx }, rx)
}
