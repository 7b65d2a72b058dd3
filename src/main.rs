//! edge-proxy
//!
//! ```text
//!                  ┌───────────────────────────────────────────────┐
//!   SIGHUP ───────▶│  Engine (start / reset / stop)                │
//!   SIGTERM ──────▶│    ConfigSource → plan → close / bind         │
//!                  └──────────────┬────────────────────────────────┘
//!                                 │ one task per port
//!                                 ▼
//!   Client ──▶ listener ──▶ dispatch ──▶ location ──┬──▶ hash ring ──▶ backend
//!                                                   └──▶ static files
//! ```
//!
//! `edge-proxy start` runs the proxy in the foreground and records its PID;
//! `edge-proxy reset` and `edge-proxy stop` signal that PID.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use edge_proxy::config::watcher::ConfigWatcher;
use edge_proxy::config::{load_config, FileSource};
use edge_proxy::lifecycle::{send_signal, LifecycleEvent, PidFile, SignalListener};
use edge_proxy::observability::{logging, metrics};
use edge_proxy::{Engine, ReconcileReport};

#[derive(Parser)]
#[command(name = "edge-proxy")]
#[command(about = "Hot-reloading reverse proxy with consistent-hash load balancing", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the foreground
    Start {
        #[arg(short, long, default_value = "./configs/config.cfg")]
        config: PathBuf,

        #[arg(short, long, default_value = "./edge-proxy.pid")]
        pid_file: PathBuf,

        /// Reload automatically when the config file changes
        #[arg(long)]
        watch: bool,

        /// Exit instead of keeping the last good config when a reload fails to load
        #[arg(long)]
        strict_reload: bool,
    },
    /// Ask a running proxy to reload its configuration
    Reset {
        #[arg(short, long, default_value = "./edge-proxy.pid")]
        pid_file: PathBuf,
    },
    /// Ask a running proxy to shut down
    Stop {
        #[arg(short, long, default_value = "./edge-proxy.pid")]
        pid_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            pid_file,
            watch,
            strict_reload,
        } => run(config, pid_file, watch, strict_reload).await,
        Commands::Reset { pid_file } => signal_running(&pid_file, LifecycleEvent::Reload),
        Commands::Stop { pid_file } => signal_running(&pid_file, LifecycleEvent::Shutdown),
    }
}

fn signal_running(pid_file: &Path, event: LifecycleEvent) -> Result<(), Box<dyn std::error::Error>> {
    let pid = PidFile::read(pid_file)?;
    send_signal(pid, event)?;
    println!("sent {:?} to edge-proxy (pid {})", event, pid);
    Ok(())
}

async fn run(
    config_path: PathBuf,
    pid_path: PathBuf,
    watch: bool,
    strict_reload: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Read once up front for logging and metrics settings.
    let initial = load_config(&config_path)?;
    let _log_guard = logging::init(&initial.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        services = initial.services.len(),
        upstreams = initial.upstreams.len(),
        "edge-proxy starting"
    );

    if let Some(address) = &initial.observability.metrics_address {
        match address.parse() {
            Ok(addr) => {
                if let Err(err) = metrics::init_metrics(addr) {
                    tracing::error!(metrics_address = %address, error = %err, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(metrics_address = %address, "Failed to parse metrics address"),
        }
    }

    let mut engine = Engine::new(Arc::new(FileSource::new(&config_path)));
    let report = engine.start().await?;
    log_report("start", &report);
    if engine.live_ports().is_empty() && !initial.services.is_empty() {
        engine.stop().await;
        return Err("no service could bind its port".into());
    }

    let pid_file = PidFile::create(&pid_path)?;
    tracing::info!(pid_file = %pid_file.path().display(), pid = std::process::id(), "PID file written");
    let mut signals = SignalListener::install()?;

    let (watcher, mut file_changes) = ConfigWatcher::new(&config_path);
    let _watch_handle = if watch { Some(watcher.run()?) } else { None };

    loop {
        let event = tokio::select! {
            event = signals.next() => event,
            Some(()) = file_changes.recv() => LifecycleEvent::Reload,
        };

        match event {
            LifecycleEvent::Reload => match engine.reset().await {
                Ok(report) => log_report("reset", &report),
                Err(err) if strict_reload => {
                    tracing::error!(error = %err, "Reload failed, exiting (--strict-reload)");
                    engine.stop().await;
                    pid_file.remove()?;
                    return Err(err.into());
                }
                Err(err) => tracing::error!(error = %err, "Reload failed, still serving previous configuration"),
            },
            LifecycleEvent::Shutdown => break,
        }
    }

    engine.stop().await;
    pid_file.remove()?;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn log_report(operation: &str, report: &ReconcileReport) {
    for (port, reason) in &report.failed {
        tracing::error!(operation, port = %port, reason = %reason, "Service not running");
    }
    for port in &report.restored {
        tracing::warn!(operation, port = %port, "Replacement failed, previous definition restored");
    }
    tracing::info!(
        operation,
        started = ?report.started,
        replaced = ?report.replaced,
        removed = ?report.removed,
        unchanged = report.unchanged.len(),
        "Services reconciled"
    );
}
