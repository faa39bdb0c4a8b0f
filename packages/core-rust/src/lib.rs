//! Conduit core: the broker-independent data model of the consumption pipeline.
//!
//! Message envelopes and headers, the per-message execution context, culture
//! values, decorator settings and the shared error taxonomy.

pub mod context;
pub mod culture;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod settings;

pub use context::{ExecutionContext, CULTURE_KEY};
pub use culture::{Culture, CultureParseError};
pub use envelope::Envelope;
pub use error::{ErrorKind, PipelineError, SettingsError};
pub use headers::{header_text, Headers};
pub use settings::{
    load_section, CultureSettings, KeySetting, ScopedContextSettings, ScopedLoggingSettings,
    SettingsSection, CULTURE_SECTION, SCOPED_CONTEXT_SECTION, SCOPED_LOGGING_SECTION,
};
