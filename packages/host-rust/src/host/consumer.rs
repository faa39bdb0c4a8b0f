//! Background host loop: receives deliveries from a broker adapter and runs
//! each one through the pipeline in its own task.

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::Context as _;
use conduit_core::{Culture, SettingsError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::adapter::BrokerAdapter;
use super::dispatcher::{self, Delivery, DeliveryReceiver, MessageDispatcher};
use super::shutdown::{HealthState, ShutdownController};
use crate::config::{HostConfig, PipelineSettings};
use crate::pipeline::{HandlerFactory, PipelineExecutor};

// ---------------------------------------------------------------------------
// ConsumerHost
// ---------------------------------------------------------------------------

/// Hosts one consumer: a delivery loop, a handler factory and the pipeline.
///
/// For every delivery the host creates a fresh handler through the factory
/// and a fresh execution context, runs the pipeline once and sends the
/// outcome back to the adapter. It never retries and never swallows errors;
/// settling the message with the broker is the adapter's job.
pub struct ConsumerHost<T, F> {
    config: HostConfig,
    executor: Arc<PipelineExecutor>,
    factory: Arc<F>,
    controller: Arc<ShutdownController>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> ConsumerHost<T, F>
where
    T: Send + Sync + 'static,
    F: HandlerFactory<T>,
{
    /// Builds the host, validating the host limits and the pipeline settings
    /// up front.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn new(
        config: HostConfig,
        settings: &PipelineSettings,
        factory: F,
    ) -> Result<Self, SettingsError> {
        config.validate()?;
        let executor = PipelineExecutor::new(&config.consumer_name, settings)?;
        Ok(Self {
            config,
            executor: Arc::new(executor),
            factory: Arc::new(factory),
            controller: Arc::new(ShutdownController::new()),
            _payload: PhantomData,
        })
    }

    /// Replaces the culture new execution contexts start with.
    #[must_use]
    pub fn with_process_culture(mut self, culture: Culture) -> Self {
        let executor = (*self.executor).clone().with_process_culture(culture);
        self.executor = Arc::new(executor);
        self
    }

    /// Ties the host's shutdown signal to `token`.
    #[must_use]
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.controller = Arc::new(ShutdownController::with_token(token));
        self
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.controller)
    }

    /// Spawns the host loop and returns the adapter's dispatcher with a
    /// handle to the loop.
    #[must_use]
    pub fn start(self) -> (MessageDispatcher<T>, HostHandle) {
        let (dispatcher, deliveries) = dispatcher::channel(self.config.channel_capacity);
        let controller = Arc::clone(&self.controller);
        controller.set_ready();

        info!(
            consumer = %self.config.consumer_name,
            max_concurrent = self.config.max_concurrent_messages,
            "consumer host started"
        );

        let task = tokio::spawn(self.run_loop(deliveries));
        (dispatcher, HostHandle { controller, task })
    }

    /// Runs `adapter` against this host until `shutdown` fires or the adapter
    /// returns, then drains in-flight messages.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error, or an error if the host loop panicked.
    pub async fn run<A>(self, adapter: A, shutdown: CancellationToken) -> anyhow::Result<()>
    where
        A: BrokerAdapter<T>,
    {
        let host = self.with_shutdown_token(shutdown.child_token());
        let consumer = host.config.consumer_name.clone();
        let (dispatcher, handle) = host.start();

        info!(consumer = %consumer, adapter = adapter.name(), "adapter attached");
        let adapter_result = adapter.run(dispatcher, shutdown).await;
        if let Err(err) = &adapter_result {
            warn!(consumer = %consumer, error = %err, "broker adapter stopped with an error");
        }

        handle.shutdown();
        handle.join().await?;
        adapter_result
    }

    async fn run_loop(self, mut deliveries: DeliveryReceiver<T>) -> bool {
        let token = self.controller.token();
        let permits = Arc::new(Semaphore::new(self.config.max_concurrent_messages));

        loop {
            let permit = tokio::select! {
                biased;
                () = token.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let delivery = tokio::select! {
                biased;
                () = token.cancelled() => break,
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let guard = self.controller.in_flight_guard();
            let task = self.message_task(delivery);
            tokio::spawn(async move {
                task.await;
                drop(guard);
                drop(permit);
            });
        }

        // Deliveries still queued are dropped; their dispatchers observe
        // `DispatchError::HostStopped`.
        deliveries.close();
        drop(deliveries);
        self.controller.mark_draining();

        info!(
            consumer = %self.config.consumer_name,
            in_flight = self.controller.in_flight_count(),
            "consumer host draining"
        );
        let drained = self
            .controller
            .wait_for_drain(self.config.drain_timeout())
            .await;
        if drained {
            info!(consumer = %self.config.consumer_name, "consumer host stopped");
        } else {
            warn!(
                consumer = %self.config.consumer_name,
                in_flight = self.controller.in_flight_count(),
                "drain timeout elapsed with messages still in flight"
            );
        }
        drained
    }

    /// Prepares the isolated processing of one delivery.
    fn message_task(&self, delivery: Delivery<T>) -> impl std::future::Future<Output = ()> + Send {
        let handler = self.factory.create();
        let executor = Arc::clone(&self.executor);
        let cancel = if self.config.propagate_shutdown {
            self.controller.token().child_token()
        } else {
            CancellationToken::new()
        };

        async move {
            let Delivery { envelope, reply } = delivery;
            let outcome = executor
                .execute(handler, envelope, cancel)
                .await
                .map(|_processed| ());
            if reply.send(outcome).is_err() {
                debug!("adapter stopped waiting for the message outcome");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HostHandle
// ---------------------------------------------------------------------------

/// Handle to a running host loop.
#[derive(Debug)]
pub struct HostHandle {
    controller: Arc<ShutdownController>,
    task: JoinHandle<bool>,
}

impl HostHandle {
    /// Stops accepting deliveries; in-flight messages keep running.
    pub fn shutdown(&self) {
        self.controller.trigger_shutdown();
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        self.controller.health_state()
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.controller.in_flight_count()
    }

    /// Waits for the loop to finish draining.
    ///
    /// Returns `true` if every in-flight message completed within the drain
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the host loop task panicked.
    pub async fn join(self) -> anyhow::Result<bool> {
        self.task.await.context("consumer host loop panicked")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
