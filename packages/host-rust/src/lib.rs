//! Conduit host: broker-agnostic message consumption.
//!
//! A [`ConsumerHost`] receives deliveries from a [`BrokerAdapter`] and runs
//! each one through a fixed decorator chain (context propagation, default
//! culture, scoped logging) before the business [`MessageHandler`]. Outgoing
//! messages go through a [`Publisher`], which copies context keys back into
//! headers.

pub mod config;
pub mod host;
pub mod pipeline;
pub mod producer;
pub mod telemetry;

pub use config::{ConduitConfig, HostConfig, PipelineSettings};
pub use host::{
    BrokerAdapter, ConsumerHost, DispatchError, Disposition, HostHandle, MessageDispatcher,
};
pub use pipeline::{current_scope, HandlerFactory, LoggingScope, MessageHandler, PipelineExecutor};
pub use producer::{MessageProducer, Publisher};
