//! Per-message execution context.

use std::collections::HashMap;

use serde_json::Value;

use crate::culture::Culture;

/// Reserved context key for the message culture.
pub const CULTURE_KEY: &str = "culture";

/// Key/value store owned by exactly one in-flight message.
///
/// A fresh context is built for every message and dropped when that
/// message's processing ends. It is moved through the decorator chain by
/// value and never shared between messages. The culture lives in its own
/// field; the reserved [`CULTURE_KEY`] is answered from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: HashMap<String, Value>,
    culture: Culture,
}

impl ExecutionContext {
    /// Creates an empty context using the given process culture.
    #[must_use]
    pub fn new(culture: Culture) -> Self {
        Self {
            values: HashMap::new(),
            culture,
        }
    }

    /// Stores a propagated value. Writes to [`CULTURE_KEY`] are ignored unless
    /// the value parses as a culture, in which case the culture is replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if key == CULTURE_KEY {
            if let Some(culture) = value.as_str().and_then(|s| s.parse().ok()) {
                self.culture = culture;
            }
            return;
        }
        self.values.insert(key, value);
    }

    /// Looks up a propagated value. [`CULTURE_KEY`] yields the culture tag.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        if key == CULTURE_KEY {
            return Some(Value::String(self.culture.to_string()));
        }
        self.values.get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        key == CULTURE_KEY || self.values.contains_key(key)
    }

    /// Propagated keys, excluding the reserved culture key.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn culture(&self) -> &Culture {
        &self.culture
    }

    pub fn set_culture(&mut self, culture: Culture) {
        self.culture = culture;
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stores_and_reads_values() {
        let mut ctx = ExecutionContext::default();
        ctx.insert("test", "success");
        assert_eq!(ctx.get("test"), Some(json!("success")));
        assert_eq!(ctx.keys().collect::<Vec<_>>(), vec!["test"]);
    }

    #[test]
    fn culture_key_is_reserved() {
        let mut ctx = ExecutionContext::default();
        assert_eq!(ctx.get(CULTURE_KEY), Some(json!("invariant")));

        ctx.insert(CULTURE_KEY, "pt-BR");
        assert_eq!(ctx.culture().to_string(), "pt-BR");
        assert_eq!(ctx.keys().count(), 0);

        ctx.insert(CULTURE_KEY, 12);
        assert_eq!(ctx.culture().to_string(), "pt-BR");
    }

    #[test]
    fn clones_do_not_share_state() {
        let mut first = ExecutionContext::default();
        let mut second = first.clone();
        first.insert("tenant", "a");
        second.set_culture("de-DE".parse().unwrap());
        assert!(second.get("tenant").is_none());
        assert!(first.culture().is_invariant());
    }
}
