//! The per-message decorator pipeline.
//!
//! 1. **Request** (`request`): envelope + owned execution context + cancellation
//! 2. **Decorators**: context propagation (`context`), default culture
//!    (`culture`), scoped logging (`logging`), each a Tower layer
//! 3. **Handler** (`handler`): business handler contract and failure wrapping
//! 4. **Composition** (`builder`, `executor`): fixed-order chain, run once per message

pub mod builder;
pub mod context;
pub mod culture;
pub mod executor;
pub mod handler;
pub mod instrument;
pub mod logging;
pub mod request;

#[cfg(test)]
pub(crate) mod testing;

pub use builder::{build_message_pipeline, PipelineLayers};
pub use context::ContextLayer;
pub use culture::CultureLayer;
pub use executor::PipelineExecutor;
pub use handler::{HandlerFactory, HandlerService, MessageHandler};
pub use instrument::InstrumentLayer;
pub use logging::{current_scope, LoggingScope, ScopedLoggingLayer};
pub use request::{MessageRequest, PipelineFuture, Processed};
