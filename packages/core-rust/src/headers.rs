//! Header metadata carried alongside every inbound message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header map delivered by a broker adapter with each message.
///
/// Keys are unique and case-sensitive. Values are arbitrary JSON values so
/// adapters can forward whatever their wire protocol carries (strings from
/// AMQP/Kafka headers, numbers from Service Bus application properties, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(HashMap<String, Value>);

impl Headers {
    /// Creates an empty header map.
    #[must_use]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Inserts a header, returning the previous value for the key if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns the header rendered as text (see [`header_text`]).
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<String> {
        self.0.get(key).map(header_text)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<HashMap<String, Value>> for Headers {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

/// Renders a header value as plain text.
///
/// Strings are returned without JSON quoting; every other value uses its
/// compact JSON form (`42`, `true`, `null`, `["a","b"]`).
#[must_use]
pub fn header_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
