//! Process-wide tracing subscriber setup.
//!
//! Message spans (`message`, `message_scope`) carry the consumer name, the
//! message id and the scoped logging fields, so the JSON format is the one to
//! use when logs are shipped to an aggregator.

use std::io::IsTerminal;

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither `RUST_LOG` nor an explicit directive is given.
pub const DEFAULT_FILTER: &str = "info";

/// Output format for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines, colored on a terminal.
    #[default]
    Plain,
    /// One JSON object per line, including the current span list.
    Json,
}

/// Builds the filter from `directive`, then `RUST_LOG`, then [`DEFAULT_FILTER`].
///
/// # Errors
///
/// Returns an error if the directive does not parse.
pub fn env_filter(directive: Option<&str>) -> anyhow::Result<EnvFilter> {
    match directive {
        Some(directive) => Ok(EnvFilter::try_new(directive)?),
        None => Ok(EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a global subscriber
/// is already installed.
pub fn init_tracing(format: LogFormat, directive: Option<&str>) -> anyhow::Result<()> {
    let filter = env_filter(directive)?;
    let layer = match format {
        LogFormat::Plain => fmt::layer()
            .with_target(true)
            .with_ansi(std::io::stderr().is_terminal())
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;
    tracing::debug!(?format, "tracing initialized");
    Ok(())
}
