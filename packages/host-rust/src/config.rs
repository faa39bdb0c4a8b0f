//! Host and pipeline configuration.
//!
//! Configuration is one JSON document with named sections, read once at
//! startup and validated before any message is accepted:
//!
//! ```json
//! {
//!   "Host": { "ConsumerName": "orders", "MaxConcurrentMessages": 8 },
//!   "ScopedContext": { "Keys": [{ "KeyName": "tenant", "Required": true }], "Culture": true },
//!   "ScopedLogging": { "Keys": [{ "KeyName": "correlation-id" }] },
//!   "Culture": { "DefaultCulture": "" }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use conduit_core::{
    load_section, CultureSettings, ScopedContextSettings, ScopedLoggingSettings, SettingsError,
    SettingsSection, CULTURE_SECTION, SCOPED_CONTEXT_SECTION, SCOPED_LOGGING_SECTION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

pub const HOST_SECTION: &str = "Host";

/// Background host loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HostConfig {
    /// Name used in logs and metric labels.
    pub consumer_name: String,
    /// Maximum number of messages processed at the same time.
    pub max_concurrent_messages: usize,
    /// Capacity of the adapter-to-host delivery channel.
    pub channel_capacity: usize,
    /// How long shutdown waits for in-flight messages, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Cancel handlers' tokens when the host shuts down. When false, in-flight
    /// handlers run to completion undisturbed.
    pub propagate_shutdown: bool,
}

impl HostConfig {
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Checks the limits the host loop hands to tokio primitives.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::OutOfRange` when `MaxConcurrentMessages` or
    /// `ChannelCapacity` is zero or above [`Semaphore::MAX_PERMITS`].
    pub fn validate(&self) -> Result<(), SettingsError> {
        check_range("MaxConcurrentMessages", self.max_concurrent_messages)?;
        check_range("ChannelCapacity", self.channel_capacity)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            consumer_name: "consumer".to_string(),
            max_concurrent_messages: 16,
            channel_capacity: 64,
            drain_timeout_ms: 30_000,
            propagate_shutdown: false,
        }
    }
}

fn check_range(field: &'static str, value: usize) -> Result<(), SettingsError> {
    if (1..=Semaphore::MAX_PERMITS).contains(&value) {
        return Ok(());
    }
    Err(SettingsError::OutOfRange {
        section: HOST_SECTION.to_string(),
        field,
        value,
        max: Semaphore::MAX_PERMITS,
    })
}

/// Settings of the three message decorators.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSettings {
    pub context: ScopedContextSettings,
    pub culture: CultureSettings,
    pub logging: ScopedLoggingSettings,
}

impl PipelineSettings {
    /// Reads the decorator sections under their default names.
    ///
    /// # Errors
    ///
    /// Returns the first malformed or invalid section.
    pub fn from_value(root: &Value) -> Result<Self, SettingsError> {
        Self::from_sections(
            root,
            SCOPED_CONTEXT_SECTION,
            CULTURE_SECTION,
            SCOPED_LOGGING_SECTION,
        )
    }

    /// Reads the decorator sections under explicit section names.
    ///
    /// # Errors
    ///
    /// Returns the first malformed or invalid section.
    pub fn from_sections(
        root: &Value,
        context_section: &str,
        culture_section: &str,
        logging_section: &str,
    ) -> Result<Self, SettingsError> {
        Ok(Self {
            context: load_section(root, context_section)?,
            culture: load_section(root, culture_section)?,
            logging: load_section(root, logging_section)?,
        })
    }

    /// Validates settings built in code rather than loaded from a document.
    ///
    /// # Errors
    ///
    /// Returns the first validation error.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.context.validate(SCOPED_CONTEXT_SECTION)?;
        self.culture.validate(CULTURE_SECTION)?;
        self.logging.validate(SCOPED_LOGGING_SECTION)
    }
}

/// Complete configuration of one consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConduitConfig {
    pub host: HostConfig,
    pub pipeline: PipelineSettings,
}

impl ConduitConfig {
    /// # Errors
    ///
    /// Returns an error if any section is malformed or invalid.
    pub fn from_value(root: &Value) -> anyhow::Result<Self> {
        let host = match root.get(HOST_SECTION) {
            Some(raw) => HostConfig::deserialize(raw)
                .with_context(|| format!("section {HOST_SECTION}: malformed settings"))?,
            None => HostConfig::default(),
        };
        host.validate()?;
        Ok(Self {
            host,
            pipeline: PipelineSettings::from_value(root)?,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the text is not JSON or a section is invalid.
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        let root: Value = serde_json::from_str(text).context("configuration is not valid JSON")?;
        Self::from_value(&root)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its content is invalid.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration from {}", path.display()))?;
        Self::from_json_str(&text)
    }
}
