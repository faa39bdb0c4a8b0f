//! In-process reference broker.
//!
//! `MemoryBroker` behaves like a minimal queueing broker: published messages
//! are delivered with a bounded prefetch, settled according to
//! [`Disposition::for_outcome`], and requeued messages are redelivered until
//! `max_deliveries` is reached, after which they are dead-lettered. Every
//! settlement is recorded for inspection.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use conduit_core::Envelope;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::adapter::{BrokerAdapter, Disposition};
use super::dispatcher::MessageDispatcher;
use crate::producer::MessageProducer;

/// Delivery settings of the in-process broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBrokerConfig {
    /// Messages delivered to the host without having been settled yet.
    /// Clamped to `1..=Semaphore::MAX_PERMITS`.
    pub prefetch: usize,
    /// Deliveries attempted before a requeued message is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for MemoryBrokerConfig {
    fn default() -> Self {
        Self {
            prefetch: 8,
            max_deliveries: 3,
        }
    }
}

/// One settlement of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRecord {
    pub message_id: Uuid,
    pub attempt: u32,
    pub disposition: Disposition,
    pub error: Option<String>,
}

#[derive(Debug)]
struct QueuedMessage<T> {
    id: Uuid,
    envelope: Envelope<T>,
    attempt: u32,
}

/// In-process queue implementing [`BrokerAdapter`] and [`MessageProducer`].
pub struct MemoryBroker<T> {
    config: MemoryBrokerConfig,
    tx: mpsc::UnboundedSender<QueuedMessage<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedMessage<T>>>>,
    unsettled: Arc<watch::Sender<usize>>,
    records: Arc<Mutex<Vec<DeliveryRecord>>>,
}

impl<T> MemoryBroker<T>
where
    T: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(config: MemoryBrokerConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            tx,
            rx: Mutex::new(Some(rx)),
            unsettled: Arc::new(watch::Sender::new(0)),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Enqueues `envelope` and returns its message id.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue has been torn down.
    pub fn publish(&self, envelope: Envelope<T>) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        self.unsettled.send_modify(|n| *n += 1);
        if self
            .tx
            .send(QueuedMessage {
                id,
                envelope,
                attempt: 1,
            })
            .is_err()
        {
            self.unsettled.send_modify(|n| *n = n.saturating_sub(1));
            return Err(anyhow!("memory broker queue is closed"));
        }
        Ok(id)
    }

    /// Number of published messages not yet acked or dead-lettered.
    #[must_use]
    pub fn unsettled(&self) -> usize {
        *self.unsettled.borrow()
    }

    /// Resolves once every published message has been acked or dead-lettered.
    pub async fn wait_idle(&self) {
        let mut rx = self.unsettled.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    #[must_use]
    pub fn records(&self) -> Vec<DeliveryRecord> {
        self.records.lock().clone()
    }

    /// Settlements of one message, in delivery order.
    #[must_use]
    pub fn dispositions_for(&self, message_id: Uuid) -> Vec<Disposition> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.message_id == message_id)
            .map(|r| r.disposition)
            .collect()
    }
}

/// Everything a delivery task needs to settle one message.
struct Settlement<T> {
    dispatcher: MessageDispatcher<T>,
    requeue: mpsc::UnboundedSender<QueuedMessage<T>>,
    unsettled: Arc<watch::Sender<usize>>,
    records: Arc<Mutex<Vec<DeliveryRecord>>>,
    max_deliveries: u32,
}

impl<T: Clone + Send + 'static> Settlement<T> {
    async fn deliver(self, message: QueuedMessage<T>) {
        let outcome = self.dispatcher.dispatch(message.envelope.clone()).await;

        let mut disposition = Disposition::for_outcome(&outcome);
        if disposition == Disposition::Requeue && message.attempt >= self.max_deliveries {
            disposition = Disposition::DeadLetter;
        }
        debug!(
            message_id = %message.id,
            attempt = message.attempt,
            ?disposition,
            "memory broker settled message"
        );

        self.records.lock().push(DeliveryRecord {
            message_id: message.id,
            attempt: message.attempt,
            disposition,
            error: outcome.err().map(|err| err.to_string()),
        });

        if disposition == Disposition::Requeue {
            let redelivery = QueuedMessage {
                attempt: message.attempt + 1,
                ..message
            };
            if self.requeue.send(redelivery).is_ok() {
                return;
            }
        }
        self.unsettled.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[async_trait]
impl<T> BrokerAdapter<T> for MemoryBroker<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn run(
        &self,
        dispatcher: MessageDispatcher<T>,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        let mut queue = self
            .rx
            .lock()
            .take()
            .ok_or_else(|| anyhow!("memory broker is already being consumed"))?;
        let prefetch = Arc::new(Semaphore::new(
            self.config.prefetch.clamp(1, Semaphore::MAX_PERMITS),
        ));
        let mut in_flight = JoinSet::new();

        info!(prefetch = self.config.prefetch, "memory broker consuming");

        loop {
            let permit = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                permit = Arc::clone(&prefetch).acquire_owned() => permit?,
            };
            let message = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                message = queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let settlement = Settlement {
                dispatcher: dispatcher.clone(),
                requeue: self.tx.clone(),
                unsettled: Arc::clone(&self.unsettled),
                records: Arc::clone(&self.records),
                max_deliveries: self.config.max_deliveries,
            };
            in_flight.spawn(async move {
                settlement.deliver(message).await;
                drop(permit);
            });
            while in_flight.try_join_next().is_some() {}
        }

        while in_flight.join_next().await.is_some() {}
        *self.rx.lock() = Some(queue);
        info!("memory broker stopped consuming");
        Ok(())
    }
}

#[async_trait]
impl<T> MessageProducer<T> for MemoryBroker<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn send(&self, envelope: Envelope<T>) -> anyhow::Result<()> {
        self.publish(envelope).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use conduit_core::{Headers, PipelineError};

    use super::*;
    use crate::host::dispatcher;

    /// Host stand-in answering every delivery with `answer(envelope)`.
    fn fake_host<T: Send + 'static>(
        answer: impl Fn(&Envelope<T>) -> Result<(), PipelineError> + Send + 'static,
    ) -> (MessageDispatcher<T>, tokio::task::JoinHandle<()>) {
        let (dispatcher, mut rx) = dispatcher::channel::<T>(16);
        let handle = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                let outcome = answer(&delivery.envelope);
                let _ = delivery.reply.send(outcome);
            }
        });
        (dispatcher, handle)
    }

    #[tokio::test]
    async fn acks_successful_messages() {
        let broker = Arc::new(MemoryBroker::<u32>::new(MemoryBrokerConfig::default()));
        let (dispatcher, _host) = fake_host(|_| Ok(()));
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn({
            let broker = Arc::clone(&broker);
            let shutdown = shutdown.clone();
            async move { broker.run(dispatcher, shutdown).await }
        });

        let id = broker.publish(Envelope::new(1, Headers::new())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), broker.wait_idle())
            .await
            .unwrap();

        assert_eq!(broker.dispositions_for(id), vec![Disposition::Ack]);
        shutdown.cancel();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unbounded_prefetch_is_clamped() {
        let broker = Arc::new(MemoryBroker::<u32>::new(MemoryBrokerConfig {
            prefetch: usize::MAX,
            max_deliveries: 1,
        }));
        let (dispatcher, _host) = fake_host(|_| Ok(()));
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn({
            let broker = Arc::clone(&broker);
            let shutdown = shutdown.clone();
            async move { broker.run(dispatcher, shutdown).await }
        });

        let id = broker.publish(Envelope::new(7, Headers::new())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), broker.wait_idle())
            .await
            .unwrap();

        assert_eq!(broker.dispositions_for(id), vec![Disposition::Ack]);
        shutdown.cancel();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn requeues_until_max_deliveries_then_dead_letters() {
        let broker = Arc::new(MemoryBroker::<u32>::new(MemoryBrokerConfig {
            prefetch: 1,
            max_deliveries: 3,
        }));
        let (dispatcher, _host) =
            fake_host(|_| Err(PipelineError::consumer(anyhow!("still failing"))));
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn({
            let broker = Arc::clone(&broker);
            let shutdown = shutdown.clone();
            async move { broker.run(dispatcher, shutdown).await }
        });

        let id = broker.publish(Envelope::new(1, Headers::new())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), broker.wait_idle())
            .await
            .unwrap();

        assert_eq!(
            broker.dispositions_for(id),
            vec![
                Disposition::Requeue,
                Disposition::Requeue,
                Disposition::DeadLetter
            ]
        );
        let records = broker.records();
        assert_eq!(records.last().unwrap().attempt, 3);
        assert_eq!(
            records[0].error.as_deref(),
            Some("consumer processing failure")
        );
        shutdown.cancel();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn validation_failure_is_dead_lettered_immediately() {
        let broker = Arc::new(MemoryBroker::<u32>::new(MemoryBrokerConfig::default()));
        let (dispatcher, _host) = fake_host(|_| {
            Err(PipelineError::MissingContextKey {
                key: "tenant".into(),
            })
        });
        let shutdown = CancellationToken::new();
        let consumer = tokio::spawn({
            let broker = Arc::clone(&broker);
            let shutdown = shutdown.clone();
            async move { broker.run(dispatcher, shutdown).await }
        });

        let id = broker.publish(Envelope::new(1, Headers::new())).unwrap();
        tokio::time::timeout(Duration::from_secs(2), broker.wait_idle())
            .await
            .unwrap();

        assert_eq!(broker.dispositions_for(id), vec![Disposition::DeadLetter]);
        shutdown.cancel();
        consumer.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cannot_be_consumed_twice_at_once() {
        let broker = Arc::new(MemoryBroker::<u32>::new(MemoryBrokerConfig::default()));
        let (dispatcher, _host) = fake_host(|_| Ok(()));
        let shutdown = CancellationToken::new();
        let first = tokio::spawn({
            let broker = Arc::clone(&broker);
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            async move { broker.run(dispatcher, shutdown).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(broker.run(dispatcher, shutdown.clone()).await.is_err());
        shutdown.cancel();
        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn producer_send_enqueues() {
        let broker = MemoryBroker::<u32>::new(MemoryBrokerConfig::default());
        broker.send(Envelope::new(9, Headers::new())).await.unwrap();
        assert_eq!(broker.unsettled(), 1);
    }
}
