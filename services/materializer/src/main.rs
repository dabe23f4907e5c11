use clap::Parser;
use materializer::RuleMaterializer;
use sfu_hw::InMemoryRuntimeClient;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Rule materializer: connects to the session reconciler's event bus and
/// keeps switch hardware tables converged with the reported topology.
#[derive(Parser, Debug)]
struct Cli {
    /// Event-bus URL to connect to.
    #[arg(long, default_value = "ws://127.0.0.1:8765")]
    event_bus_url: String,

    /// Install the CPU-port entry for the physical switch's dev-port
    /// numbering instead of the software model's.
    #[arg(long)]
    hardware: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .init();

    let rc = InMemoryRuntimeClient::new();
    let mut rm = RuleMaterializer::start(rc, cli.hardware).unwrap_or_else(|e| {
        eprintln!("FATAL: failed to initialize hardware tables: {e}");
        std::process::exit(1);
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let client = tokio::spawn(async move {
        materializer::ws_client::run(&cli.event_bus_url, &mut rm, shutdown_rx).await;
        rm
    });

    sfu_common::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    let _ = client.await;
}
