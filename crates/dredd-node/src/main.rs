//! DREDD courier command-line tool.
//!
//! Sends one message to a sigil through its relay quorum, or listens on a
//! sigil's quorum for a while and prints what was accepted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

use dredd_core::{CancelToken, Courier, CourierConfig, ValidationResult};
use dredd_net::TcpRelayTransport;
use dredd_protocol::{SensitivityLevel, SigilId};

/// DREDD courier
///
/// Sigil-addressed encrypted messaging over untrusted relays.
#[derive(Parser, Debug)]
#[command(name = "dredd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the courier configuration file (JSON)
    #[arg(short, long, env = "DREDD_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DREDD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (plain, json)
    #[arg(long, env = "DREDD_LOG_FORMAT", default_value = "plain")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt and dispatch a message
    Send {
        /// Target sigil
        #[arg(short, long)]
        sigil: String,

        /// Message text
        #[arg(short, long)]
        message: String,

        /// Time to live in seconds
        #[arg(long, default_value = "3600")]
        ttl: u64,

        /// Sensitivity level (low, medium, high, critical)
        #[arg(long, default_value = "medium")]
        sensitivity: SensitivityLevel,
    },

    /// Listen for messages addressed to a sigil
    Receive {
        /// Sigil to receive for; defaults to the configured local sigil
        #[arg(short, long)]
        sigil: Option<String>,

        /// Seconds to listen before returning
        #[arg(long, default_value = "30")]
        timeout: u64,

        /// Write the audit trail to this file when done
        #[arg(long, env = "DREDD_AUDIT_LOG")]
        audit_log: Option<PathBuf>,
    },
}

fn setup_logging(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr; stdout carries received messages.
    match log_format.to_lowercase().as_str() {
        "json" => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .json()
                .flatten_event(true)
                .with_current_span(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
        _ => {
            let subscriber = fmt::Subscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set subscriber")?;
        }
    }

    Ok(())
}

fn build_courier(config: CourierConfig) -> Result<Courier> {
    let transport = Arc::new(TcpRelayTransport::new(config.relay.node_timeout));
    Courier::builder(config, transport)
        .build()
        .context("Failed to initialize courier")
}

async fn send(
    config: CourierConfig,
    sigil: &str,
    message: &str,
    ttl: u64,
    sensitivity: SensitivityLevel,
) -> Result<()> {
    let target = SigilId::new(sigil).context("Invalid target sigil")?;
    let courier = build_courier(config)?;

    let receipt = courier
        .dispatch(
            message.as_bytes(),
            &target,
            Duration::from_secs(ttl),
            sensitivity,
        )
        .await;

    for node in &receipt.nodes {
        info!(node = %node.node, outcome = ?node.outcome, attempts = node.attempts, "Relay outcome");
    }
    if let Some(failure) = receipt.failure {
        bail!("Dispatch to {} failed: {}", target, failure);
    }

    let message_id = receipt
        .message_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    println!(
        "{}",
        serde_json::json!({
            "status": "dispatched",
            "message_id": message_id,
            "target": target.as_str(),
            "accepted_by": receipt
                .nodes
                .iter()
                .filter(|n| n.outcome.is_accepted())
                .map(|n| n.node.as_str())
                .collect::<Vec<_>>(),
        })
    );
    Ok(())
}

async fn receive(
    config: CourierConfig,
    sigil: Option<&str>,
    timeout: u64,
    audit_log: Option<PathBuf>,
) -> Result<()> {
    let identity = match (sigil, &config.identity.local_sigil) {
        (Some(s), _) => SigilId::new(s).context("Invalid sigil")?,
        (None, Some(local)) => local.clone(),
        (None, None) => bail!("No sigil given and no identity.local_sigil configured"),
    };
    let courier = build_courier(config)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            on_signal.cancel();
        }
    });

    info!(sigil = %identity, timeout_secs = timeout, "Listening");
    let results = courier
        .listen_until(&identity, Duration::from_secs(timeout), &cancel)
        .await
        .context("Listen failed")?;

    let mut rejected = 0usize;
    for result in &results {
        match result {
            ValidationResult::Accepted(message) => {
                let p = &message.provenance;
                println!(
                    "{}",
                    serde_json::json!({
                        "message_id": p.message_id.as_str(),
                        "sensitivity": p.sensitivity.as_str(),
                        "content_type": p.content_type,
                        "created_at": p.created_at.to_rfc3339(),
                        "relay": p.relay.as_ref().map(|r| r.as_str()),
                        "body": String::from_utf8_lossy(&message.plaintext),
                    })
                );
            }
            ValidationResult::Rejected { stage, .. } => {
                rejected += 1;
                warn!(stage = %stage, "Envelope rejected");
            }
        }
    }
    info!(
        accepted = results.len() - rejected,
        rejected, "Listen complete"
    );

    if let Some(path) = audit_log {
        courier
            .audit()
            .save_json(&path)
            .with_context(|| format!("Failed to write audit log to {}", path.display()))?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level, &args.log_format)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "Starting DREDD courier"
    );

    let config = CourierConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    match args.command {
        Command::Send {
            sigil,
            message,
            ttl,
            sensitivity,
        } => send(config, &sigil, &message, ttl, sensitivity).await,
        Command::Receive {
            sigil,
            timeout,
            audit_log,
        } => receive(config, sigil.as_deref(), timeout, audit_log).await,
    }
}
