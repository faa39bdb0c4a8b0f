//! Decorator settings, loaded once at startup and read-only afterwards.
//!
//! Settings are deserialized from PascalCase JSON sections, e.g.
//!
//! ```json
//! {
//!   "ScopedContext": { "Keys": [{ "KeyName": "test", "Required": true }], "Culture": true },
//!   "ScopedLogging": { "Keys": [{ "KeyName": "correlation-id", "Required": false }] },
//!   "Culture": { "DefaultCulture": "pt-BR" }
//! }
//! ```

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::CULTURE_KEY;
use crate::culture::Culture;
use crate::error::SettingsError;

pub const SCOPED_CONTEXT_SECTION: &str = "ScopedContext";
pub const SCOPED_LOGGING_SECTION: &str = "ScopedLogging";
pub const CULTURE_SECTION: &str = "Culture";

/// One declared header key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeySetting {
    pub key_name: String,
    #[serde(default)]
    pub required: bool,
}

impl KeySetting {
    #[must_use]
    pub fn required(key_name: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            required: true,
        }
    }

    #[must_use]
    pub fn optional(key_name: impl Into<String>) -> Self {
        Self {
            key_name: key_name.into(),
            required: false,
        }
    }
}

/// Settings for the context decorator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScopedContextSettings {
    #[serde(default)]
    pub keys: Vec<KeySetting>,
    /// Read the `culture` header into the context.
    #[serde(default)]
    pub culture: bool,
}

/// Settings for the scoped logging decorator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScopedLoggingSettings {
    #[serde(default)]
    pub keys: Vec<KeySetting>,
}

/// Settings for the culture decorator. An empty default leaves the context
/// culture untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CultureSettings {
    #[serde(default)]
    pub default_culture: String,
}

impl CultureSettings {
    /// The configured default culture, `None` when unset.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidCulture` when the value is non-empty but
    /// not a culture tag.
    pub fn parsed(&self, section: &str) -> Result<Option<Culture>, SettingsError> {
        let raw = self.default_culture.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse()
            .map(Some)
            .map_err(|source| SettingsError::InvalidCulture {
                section: section.to_string(),
                source,
            })
    }
}

/// A settings block that can validate itself.
pub trait SettingsSection: DeserializeOwned + Default {
    /// Checks the settings, naming `section` in any error.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    fn validate(&self, section: &str) -> Result<(), SettingsError>;
}

impl SettingsSection for ScopedContextSettings {
    /// Besides the shared key checks, rejects [`CULTURE_KEY`] as a key name:
    /// the culture header is only read through the `Culture` flag.
    fn validate(&self, section: &str) -> Result<(), SettingsError> {
        validate_keys(section, &self.keys)?;
        match self.keys.iter().find(|key| key.key_name == CULTURE_KEY) {
            Some(key) => Err(SettingsError::ReservedKey {
                section: section.to_string(),
                key: key.key_name.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl SettingsSection for ScopedLoggingSettings {
    fn validate(&self, section: &str) -> Result<(), SettingsError> {
        validate_keys(section, &self.keys)
    }
}

impl SettingsSection for CultureSettings {
    fn validate(&self, section: &str) -> Result<(), SettingsError> {
        self.parsed(section).map(|_| ())
    }
}

/// Reads and validates the section named `section` from a settings document.
///
/// A missing section yields the default settings, which disable the
/// corresponding decorator's checks.
///
/// # Errors
///
/// Returns `SettingsError::Malformed` if the section does not match the
/// expected shape, or the validation error of the section.
pub fn load_section<S: SettingsSection>(root: &Value, section: &str) -> Result<S, SettingsError> {
    let settings = match root.get(section) {
        Some(raw) => S::deserialize(raw).map_err(|source| SettingsError::Malformed {
            section: section.to_string(),
            source,
        })?,
        None => S::default(),
    };
    settings.validate(section)?;
    Ok(settings)
}

fn validate_keys(section: &str, keys: &[KeySetting]) -> Result<(), SettingsError> {
    let mut seen = HashSet::with_capacity(keys.len());
    for (index, key) in keys.iter().enumerate() {
        if key.key_name.trim().is_empty() {
            return Err(SettingsError::EmptyKeyName {
                section: section.to_string(),
                index,
            });
        }
        if !seen.insert(key.key_name.as_str()) {
            return Err(SettingsError::DuplicateKey {
                section: section.to_string(),
                key: key.key_name.clone(),
            });
        }
    }
    Ok(())
}
