use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use reconciler::state::MediaType;
use reconciler::Reconciler;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Session reconciler: maintains meeting topology and serves the event
/// bus that the rule materializer connects to.
#[derive(Parser, Debug)]
struct Cli {
    /// Run a hardcoded test scenario against an in-process reconciler,
    /// then exit.
    #[arg(long)]
    test: bool,
}

const LISTEN_ADDR: &str = "127.0.0.1:8765";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    if cli.test {
        run_test_scenario();
        std::process::exit(0);
    }

    let reconciler = Arc::new(Reconciler::new());
    let addr: SocketAddr = LISTEN_ADDR.parse().expect("valid listen address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            eprintln!("FATAL: failed to bind {addr}: {e}");
            std::process::exit(1);
        });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let serve = tokio::spawn(reconciler::ws_server::serve(reconciler, listener, shutdown_rx));

    sfu_common::shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    match serve.await {
        Ok(Ok(())) => info!("session reconciler shut down gracefully"),
        Ok(Err(e)) => eprintln!("FATAL: session reconciler failed: {e}"),
        Err(e) => eprintln!("FATAL: session reconciler task panicked: {e}"),
    }
}

/// Mirrors the reference agent's `--test` scenario: three participants
/// join a meeting with video on, one receive stream's quality is
/// lowered, a participant leaves, and the meeting is torn down.
fn run_test_scenario() {
    let reconciler = Reconciler::new();
    let mut rx = reconciler.subscribe();

    const M_ID: u32 = 0;
    const P1_IP: &str = "10.0.211.2";
    const P2_IP: &str = "10.0.211.2";
    const P3_IP: &str = "10.0.211.2";
    const P1_PORT: u16 = 1111;
    const P2_PORT: u16 = 2222;
    const P3_PORT: u16 = 3333;
    // veth4 is dev-port 2, veth6 is dev-port 3.
    const P1_EPORT: &str = "veth4";
    const P2_EPORT: &str = "veth6";
    const P3_EPORT: &str = "veth6";
    const P1_V_SSRC: u32 = 110;
    const P1_V_SSRC_RTX: u32 = 111;
    const P2_V_SSRC: u32 = 210;
    const P2_V_SSRC_RTX: u32 = 211;
    const P3_V_SSRC: u32 = 310;
    const P3_V_SSRC_RTX: u32 = 311;

    println!("Event(s): Participants P1, P2, P3 join meeting M one by one with video on");
    reconciler
        .add_stream(M_ID, P1_IP, P1_PORT, P1_V_SSRC, P1_V_SSRC_RTX, P1_EPORT, MediaType::Video)
        .expect("P1_EPORT resolves");
    reconciler
        .add_stream(M_ID, P2_IP, P2_PORT, P2_V_SSRC, P2_V_SSRC_RTX, P2_EPORT, MediaType::Video)
        .expect("P2_EPORT resolves");
    reconciler
        .add_stream(M_ID, P3_IP, P3_PORT, P3_V_SSRC, P3_V_SSRC_RTX, P3_EPORT, MediaType::Video)
        .expect("P3_EPORT resolves");
    drain_and_print(&mut rx);

    println!("Event(s): Lower P1's video quality towards P3");
    reconciler.set_quality(
        M_ID,
        P1_IP,
        P1_PORT,
        P1_V_SSRC,
        P3_IP,
        P3_PORT,
        sfu_protocol::Quality::Base,
    );
    drain_and_print(&mut rx);

    println!("Event(s): Participant P2 leaves meeting M");
    reconciler.remove_stream(M_ID, P2_IP, P2_PORT, P2_V_SSRC);
    drain_and_print(&mut rx);

    println!("Event(s): Meeting M ends, causing removal of all remaining streams");
    reconciler.remove_stream(M_ID, P1_IP, P1_PORT, P1_V_SSRC);
    reconciler.remove_stream(M_ID, P3_IP, P3_PORT, P3_V_SSRC);
    drain_and_print(&mut rx);
}

fn drain_and_print(rx: &mut tokio::sync::broadcast::Receiver<sfu_protocol::EbMessage>) {
    while let Ok(msg) = rx.try_recv() {
        println!("  -> {msg:?}");
    }
}
