//! healthd - self-healing runtime host
//!
//! Runs the health monitoring and remediation loops for the current process
//! and offers one-shot diagnostics.
//!
//! # Usage
//!
//! ```bash
//! # Run until Ctrl+C
//! healthd run
//!
//! # One diagnostic pass, printed as JSON
//! healthd diagnose
//!
//! # Validate and print the effective configuration
//! healthd check-config --config ./healthd.toml
//! ```
//!
//! # Environment Variables
//!
//! - `HEALTHD_CONFIG`: Path to the TOML config (default search: ./healthd.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use healthd::config::defaults::{PERSISTED_TREE, SESSION_TREE};
use healthd::host::{HttpTransport, ProcessReloadHost, SystemHost};
use healthd::storage::{InMemoryStore, KeyValueStore, SledStore};
use healthd::{Collaborators, HealthOrchestrator, HealthSignal, RuntimeConfig, SignalBus};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "healthd")]
#[command(about = "Self-healing runtime: health monitoring and automatic remediation")]
#[command(version)]
struct CliArgs {
    /// Config file; overrides the HEALTHD_CONFIG / ./healthd.toml search
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Start all monitoring loops until Ctrl+C (default)
    Run {
        /// Schedule a low-urgency restart after a continuous idle period
        #[arg(long)]
        reload_when_idle: bool,
    },

    /// Take one sample, sweep every endpoint and print the report as JSON
    Diagnose,

    /// Load and validate the configuration, then print the effective TOML
    CheckConfig,
}

// ============================================================================
// Setup
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(RuntimeConfig::load()),
    }
}

/// Stores for a long-running process: sled trees under the data directory.
fn open_stores(config: &RuntimeConfig) -> Result<(Arc<dyn KeyValueStore>, SledStore)> {
    std::fs::create_dir_all(&config.storage.data_dir)
        .with_context(|| format!("Failed to create data directory {}", config.storage.data_dir))?;
    let persisted = SledStore::open(&config.storage.data_dir, PERSISTED_TREE)
        .context("Failed to open persisted store")?;
    let session = persisted
        .sibling(SESSION_TREE)
        .context("Failed to open session store")?;
    Ok((Arc::new(persisted), session))
}

fn build_runtime(
    config: &RuntimeConfig,
    persisted: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
) -> Result<Arc<HealthOrchestrator>> {
    let host = SystemHost::new(&config.host).context("Failed to initialise host probe")?;
    let transport = HttpTransport::new(
        &config.transport.base_url,
        config.transport.api_key.as_deref(),
    )
    .context("Failed to initialise remote transport")?;

    HealthOrchestrator::build(
        config,
        Collaborators {
            host: Arc::new(host),
            transport: Arc::new(transport),
            reload_host: Arc::new(ProcessReloadHost::new()),
            persisted,
            session,
        },
    )
    .context("Failed to build health runtime")
}

/// Log every broadcast signal; the restart countdown is the one user-visible notice.
fn spawn_signal_logger(signals: &SignalBus, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    let mut rx = signals.subscribe();
    tokio::spawn(async move {
        loop {
            let signal = tokio::select! {
                () = cancel.cancelled() => return,
                received = rx.recv() => received,
            };
            match signal {
                Ok(HealthSignal::ReloadScheduled { message, .. }) => warn!("{}", message),
                Ok(signal) => info!(signal = signal.name(), ?signal, "Health signal"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Signal logger lagged"),
                Err(RecvError::Closed) => return,
            }
        }
    })
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: RuntimeConfig, reload_when_idle: bool) -> Result<()> {
    let (persisted, session) = open_stores(&config)?;
    let runtime = build_runtime(&config, persisted, Arc::new(session.clone()))?;

    if let Some(snapshot) = runtime.reloader().check_reload_state() {
        info!(
            reason = %snapshot.reason,
            location = %snapshot.location,
            "Resumed after automatic restart"
        );
    }

    let cancel = CancellationToken::new();
    let logger = spawn_signal_logger(runtime.signals(), cancel.clone());

    info!(
        endpoints = config.endpoints.len(),
        data_dir = %config.storage.data_dir,
        "healthd starting"
    );
    runtime.start();
    if reload_when_idle {
        runtime.reloader().schedule_reload_when_idle();
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating shutdown...");

    runtime.stop().await;
    cancel.cancel();
    logger.await.ok();

    if let Err(e) = session.flush() {
        warn!(error = %e, "Failed to flush session store");
    }
    info!("healthd shutdown complete");
    Ok(())
}

async fn diagnose(config: RuntimeConfig) -> Result<()> {
    // Diagnostics never touch on-disk state
    let runtime = build_runtime(
        &config,
        Arc::new(InMemoryStore::new()),
        Arc::new(InMemoryStore::new()),
    )?;

    let report = runtime.run_diagnostic().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialise report")?
    );
    Ok(())
}

fn check_config(config: &RuntimeConfig) -> Result<()> {
    config.validate().context("Configuration is invalid")?;
    print!("{}", config.to_toml().context("Failed to render configuration")?);
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let config = load_config(args.config.as_ref())?;

    match args.command.unwrap_or(SubCommand::Run { reload_when_idle: false }) {
        SubCommand::Run { reload_when_idle } => run(config, reload_when_idle).await,
        SubCommand::Diagnose => diagnose(config).await,
        SubCommand::CheckConfig => check_config(&config),
    }
}
