//! Hosting: the background delivery loop and the broker adapter seam.
//!
//! - `consumer`: [`ConsumerHost`], bounded-concurrency loop running the pipeline per delivery
//! - `dispatcher`: channel between an adapter and the host, one reply per message
//! - `adapter`: [`BrokerAdapter`] contract and the settlement [`Disposition`] policy
//! - `shutdown`: health state, in-flight tracking and drain
//! - `memory`: in-process broker used by tests and the demo binary

pub mod adapter;
pub mod consumer;
pub mod dispatcher;
pub mod memory;
pub mod shutdown;

pub use adapter::{BrokerAdapter, Disposition};
pub use consumer::{ConsumerHost, HostHandle};
pub use dispatcher::{channel, Delivery, DeliveryReceiver, DispatchError, MessageDispatcher};
pub use memory::{DeliveryRecord, MemoryBroker, MemoryBrokerConfig};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
