//! The reconciler's WS server: accepts rule-materializer connections and
//! forwards every broadcast event-bus message to each one. No ping/pong
//! keepalive is sent — the materializer side owns reconnection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::Reconciler;

/// Serve the event bus on an already-bound listener until `shutdown`
/// resolves.
///
/// Each accepted connection gets its own broadcast subscription and a
/// dedicated forwarding task; a slow or disconnected materializer never
/// blocks delivery to any other connection.
pub async fn serve(
    reconciler: Arc<Reconciler>,
    listener: TcpListener,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "session reconciler listening");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("session reconciler shutting down");
                    return Ok(());
                }
            }
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let reconciler = Arc::clone(&reconciler);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(reconciler, stream, peer).await {
                        debug!(%peer, error = %e, "connection ended");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    reconciler: Arc<Reconciler>,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    info!(%peer, "rule materializer connected");
    let (mut write, mut read) = ws.split();
    let mut rx = reconciler.subscribe();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(msg) => {
                        let json = serde_json::to_string(&msg)
                            .expect("EbMessage always serializes");
                        write.send(Message::Text(json.into())).await?;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, skipped = n, "materializer too slow, dropped events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = read.next() => {
                match incoming {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => { write.send(Message::Pong(data)).await?; }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                }
            }
        }
    }
    info!(%peer, "rule materializer disconnected");
    Ok(())
}
