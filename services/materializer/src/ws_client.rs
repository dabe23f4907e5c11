//! Event-bus client: connects to the session reconciler, decodes each
//! inbound message, and feeds it to a [`RuleMaterializer`].
//!
//! Reconnects on any disconnect with a flat 1-second backoff (§7) — no
//! state is replayed on reconnect; the materializer simply waits for the
//! reconciler to emit whatever deltas bring it up to date, which is
//! exactly how a fresh reconciler restart is handled too, since neither
//! side persists topology across a restart.

use std::time::Duration;

use futures_util::StreamExt;
use sfu_hw::RuntimeClient;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::materializer::RuleMaterializer;

const RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// How often to log while a connection attempt keeps failing, so a
/// prolonged outage doesn't spam the log once per second.
const STALL_LOG_INTERVAL: Duration = Duration::from_secs(300);

/// Runs until `shutdown` fires, reconnecting to `url` whenever the
/// connection drops or fails.
pub async fn run<R: RuntimeClient>(
    url: &str,
    rm: &mut RuleMaterializer<R>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut last_stall_log = tokio::time::Instant::now() - STALL_LOG_INTERVAL;

    loop {
        if *shutdown.borrow() {
            return;
        }

        match tokio_tungstenite::connect_async(url).await {
            Ok((ws, _response)) => {
                info!(url, "connected to event bus");
                let (_write, mut read) = ws.split();
                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str(&text) {
                                        Ok(decoded) => {
                                            if let Err(e) = rm.handle(decoded) {
                                                warn!(error = %e, "failed to materialize event");
                                            }
                                        }
                                        Err(e) => warn!(error = %e, "malformed event-bus message, ignoring"),
                                    }
                                }
                                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                                Some(Ok(Message::Close(_))) | None => {
                                    warn!("event bus connection closed, reconnecting");
                                    break;
                                }
                                Some(Ok(_)) => continue,
                                Some(Err(e)) => {
                                    warn!(error = %e, "event bus connection error, reconnecting");
                                    break;
                                }
                            }
                        }
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return;
                            }
                        }
                    }
                }
            }
            Err(e) => {
                let now = tokio::time::Instant::now();
                if now.duration_since(last_stall_log) >= STALL_LOG_INTERVAL {
                    warn!(url, error = %e, "unable to reach event bus, retrying");
                    last_stall_log = now;
                } else {
                    debug!(url, error = %e, "unable to reach event bus, retrying");
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }
    }
}
