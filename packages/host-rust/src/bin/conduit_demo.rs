//! # Conduit demo
//!
//! Runs the consumer host against the in-process broker. Messages are read
//! from stdin, one JSON object per line:
//!
//! ```text
//! {"data": {"amount": 1234.5}, "headers": {"correlationId": "c-1", "culture": "fr-FR"}}
//! ```
//!
//! Each message is processed by a handler that formats `amount` with the
//! execution context's culture and republishes a receipt to an outbox queue,
//! carrying the propagated context keys as headers.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use conduit_core::{Envelope, ExecutionContext, Headers};
use conduit_host::host::{MemoryBroker, MemoryBrokerConfig};
use conduit_host::telemetry::{init_tracing, LogFormat};
use conduit_host::{current_scope, ConduitConfig, ConsumerHost, MessageHandler, Publisher};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "conduit-demo")]
#[command(about = "Feed JSON-line messages through a Conduit consumer host")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// JSON configuration file with `Host`, `ScopedContext`, `Culture` and
    /// `ScopedLogging` sections
    #[arg(short, long, env = "CONDUIT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `Host.ConsumerName`
    #[arg(long, env = "CONDUIT_CONSUMER")]
    consumer: Option<String>,

    /// Overrides `Host.MaxConcurrentMessages`
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Plain, env = "CONDUIT_LOG_FORMAT")]
    log_format: LogFormat,

    /// Tracing filter directive, defaults to `RUST_LOG` or `info`
    #[arg(long)]
    log_filter: Option<String>,

    /// Deliveries per message before it is dead-lettered
    #[arg(long, default_value_t = 3)]
    max_deliveries: u32,
}

#[derive(Deserialize)]
struct InputLine {
    data: Value,
    #[serde(default)]
    headers: Headers,
}

/// Formats the message amount for the context culture and emits a receipt.
struct ReceiptHandler {
    publisher: Arc<Publisher<Arc<MemoryBroker<Value>>>>,
}

#[async_trait]
impl MessageHandler<Value> for ReceiptHandler {
    async fn process_message(
        &self,
        envelope: &Envelope<Value>,
        context: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        if cancel.is_cancelled() {
            anyhow::bail!("processing cancelled");
        }
        let amount = envelope
            .data()
            .get("amount")
            .and_then(Value::as_f64)
            .context("message has no numeric `amount`")?;
        let formatted = context.culture().format_decimal(amount, 2);
        let scope = current_scope().map(|scope| scope.to_string()).unwrap_or_default();
        info!(culture = %context.culture(), amount = %formatted, scope = %scope, "receipt issued");

        self.publisher
            .publish(json!({ "receipt": formatted }), Headers::new(), Some(&*context))
            .await?;
        Ok(())
    }
}

fn read_messages(input: impl BufRead) -> anyhow::Result<Vec<Envelope<Value>>> {
    let mut messages = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line = line.context("failed to read stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: InputLine = serde_json::from_str(&line)
            .with_context(|| format!("line {} is not a valid message", index + 1))?;
        messages.push(Envelope::new(parsed.data, parsed.headers));
    }
    Ok(messages)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.log_filter.as_deref())?;

    let mut config = match &cli.config {
        Some(path) => ConduitConfig::from_file(path)?,
        None => ConduitConfig::default(),
    };
    if let Some(consumer) = cli.consumer {
        config.host.consumer_name = consumer;
    }
    if let Some(max_concurrent) = cli.max_concurrent {
        config.host.max_concurrent_messages = max_concurrent;
    }

    let broker_config = MemoryBrokerConfig {
        max_deliveries: cli.max_deliveries,
        ..MemoryBrokerConfig::default()
    };
    let inbox = Arc::new(MemoryBroker::<Value>::new(broker_config));
    let outbox = Arc::new(MemoryBroker::<Value>::new(broker_config));
    let publisher = Arc::new(Publisher::from_context_settings(
        Arc::clone(&outbox),
        &config.pipeline.context,
    ));

    let messages = read_messages(std::io::stdin().lock())?;
    let mut ids = Vec::with_capacity(messages.len());
    for message in messages {
        ids.push(inbox.publish(message)?);
    }
    info!(messages = ids.len(), "messages queued");

    let host = ConsumerHost::new(config.host, &config.pipeline, move || ReceiptHandler {
        publisher: Arc::clone(&publisher),
    })?;

    let shutdown = CancellationToken::new();
    let running = tokio::spawn(host.run(Arc::clone(&inbox), shutdown.clone()));

    tokio::select! {
        () = inbox.wait_idle() => info!("all messages settled"),
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            warn!("interrupted, shutting down");
        }
    }
    shutdown.cancel();
    running.await.context("host task panicked")??;

    for record in inbox.records() {
        println!(
            "{}\tattempt={}\t{:?}{}",
            record.message_id,
            record.attempt,
            record.disposition,
            record
                .error
                .map(|err| format!("\t{err}"))
                .unwrap_or_default()
        );
    }
    // Receipts are never consumed here; their count shows what was published.
    println!("receipts published: {}", outbox.unsettled());

    Ok(())
}
