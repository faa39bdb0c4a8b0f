//! Error taxonomy shared by every broker adapter.

use std::fmt::Write as _;

use crate::culture::CultureParseError;

/// Errors surfaced by the message pipeline to the hosting layer.
///
/// The set is closed. Validation errors (`MissingContextKey`,
/// `MissingScopedLoggingKey`) describe a producer/contract mismatch and are
/// never wrapped. Business failures always arrive as `ConsumerProcessing` with
/// the handler's original error kept as the source.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("missing context key: {key}")]
    MissingContextKey { key: String },
    #[error("missing scoped logging key: {key}")]
    MissingScopedLoggingKey { key: String },
    #[error("consumer processing failure")]
    ConsumerProcessing {
        #[source]
        source: anyhow::Error,
    },
    #[error("producer send failure")]
    ProducerSend {
        #[source]
        source: anyhow::Error,
    },
}

/// Copyable label for a [`PipelineError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingContextKey,
    MissingScopedLoggingKey,
    ConsumerProcessing,
    ProducerSend,
}

impl ErrorKind {
    /// Stable snake-case label, used for log fields and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingContextKey => "missing_context_key",
            Self::MissingScopedLoggingKey => "missing_scoped_logging_key",
            Self::ConsumerProcessing => "consumer_processing",
            Self::ProducerSend => "producer_send",
        }
    }
}

impl PipelineError {
    /// Wraps a business handler failure.
    pub fn consumer(source: impl Into<anyhow::Error>) -> Self {
        Self::ConsumerProcessing {
            source: source.into(),
        }
    }

    /// Wraps a publish failure.
    pub fn producer(source: impl Into<anyhow::Error>) -> Self {
        Self::ProducerSend {
            source: source.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingContextKey { .. } => ErrorKind::MissingContextKey,
            Self::MissingScopedLoggingKey { .. } => ErrorKind::MissingScopedLoggingKey,
            Self::ConsumerProcessing { .. } => ErrorKind::ConsumerProcessing,
            Self::ProducerSend { .. } => ErrorKind::ProducerSend,
        }
    }

    /// True for missing-key errors raised by decorator validation.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingContextKey { .. } | Self::MissingScopedLoggingKey { .. }
        )
    }

    /// Only business failures are candidates for broker-level redelivery.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConsumerProcessing { .. })
    }

    /// The original error for wrapped variants.
    #[must_use]
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::ConsumerProcessing { source } | Self::ProducerSend { source } => Some(source),
            _ => None,
        }
    }

    /// The error and all of its sources joined with `": "`.
    #[must_use]
    pub fn chain_text(&self) -> String {
        let mut out = self.to_string();
        if let Some(cause) = self.cause() {
            for err in cause.chain() {
                let _ = write!(out, ": {err}");
            }
        }
        out
    }
}

/// Startup validation failures for pipeline settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("section {section}: malformed settings")]
    Malformed {
        section: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("section {section}: key #{index} has an empty KeyName")]
    EmptyKeyName { section: String, index: usize },
    #[error("section {section}: key {key} is declared more than once")]
    DuplicateKey { section: String, key: String },
    #[error("section {section}: key {key} is reserved")]
    ReservedKey { section: String, key: String },
    #[error("section {section}: {field} must be between 1 and {max}, got {value}")]
    OutOfRange {
        section: String,
        field: &'static str,
        value: usize,
        max: usize,
    },
    #[error("section {section}: invalid default culture")]
    InvalidCulture {
        section: String,
        #[source]
        source: CultureParseError,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("database unavailable")]
    struct DbDown;

    #[test]
    fn consumer_failure_keeps_original_cause() {
        let err = PipelineError::consumer(DbDown);
        assert_eq!(err.kind(), ErrorKind::ConsumerProcessing);
        assert!(err.is_retryable());
        assert!(!err.is_validation());
        assert!(err.cause().unwrap().downcast_ref::<DbDown>().is_some());
        assert_eq!(err.source().unwrap().to_string(), "database unavailable");
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = PipelineError::MissingContextKey { key: "test".into() };
        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert!(err.cause().is_none());
        assert_eq!(err.to_string(), "missing context key: test");
    }

    #[test]
    fn chain_text_includes_every_cause() {
        let source = anyhow::Error::new(DbDown).context("loading order 17");
        let err = PipelineError::consumer(source);
        assert_eq!(
            err.chain_text(),
            "consumer processing failure: loading order 17: database unavailable"
        );
    }

    #[test]
    fn kind_labels_are_stable() {
        let err = PipelineError::producer(anyhow::anyhow!("broker closed"));
        assert_eq!(err.kind().as_str(), "producer_send");
        assert_eq!(ErrorKind::MissingScopedLoggingKey.as_str(), "missing_scoped_logging_key");
    }
}
