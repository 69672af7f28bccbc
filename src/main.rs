//! Main entry point for the curp-search CLI.

use clap::Parser;
use curp_search::cli::{Cli, Commands};
use curp_search::shutdown::{self, RunSignals};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting.
fn init_tracing() {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("curp_search=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    // Install the global run signals, the Ctrl+C drain handler, and (on
    // Unix) the SIGUSR1 pause/resume toggle.
    let signals = RunSignals::shared();
    shutdown::set_global_signals(signals.clone());
    tokio::spawn({
        let signals = signals.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Ctrl+C received - draining and saving progress...");
                signals.request_shutdown();
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn({
        let signals = signals.clone();
        async move {
            use tokio::signal::unix::{signal, SignalKind};
            let Ok(mut usr1) = signal(SignalKind::user_defined1()) else {
                return;
            };
            while usr1.recv().await.is_some() {
                signals.toggle_pause();
            }
        }
    });

    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = curp_search::metrics::init_metrics(addr).await {
            tracing::warn!("failed to initialize metrics exporter: {e}");
        }
    }

    let result = match cli.command {
        Commands::Run(ref args) => args
            .execute(signals.clone())
            .await
            .map(|_| ())
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Status(ref cmd) => cmd.execute().map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
