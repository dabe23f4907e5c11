use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use sfu_protocol::EbMessage;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A single accepted connection to a [`MockEbServer`].
///
/// Dropping this value closes the underlying socket, which is how tests
/// exercise the rule materializer's 1-second reconnect loop: accept a
/// connection, drop it, then accept the next one and assert it arrives
/// roughly a second later.
pub struct MockEbConnection {
    write: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
        Message,
    >,
}

impl MockEbConnection {
    pub async fn send(&mut self, msg: &EbMessage) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(msg)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }
}

/// A mock event-bus server standing in for the session reconciler in tests
/// of the rule materializer's WS client.
///
/// Binds to a random port and hands accepted connections out over a
/// channel, one per `accept()` call, so a test can script a sequence of
/// connect/disconnect cycles.
pub struct MockEbServer {
    addr: SocketAddr,
    conns: mpsc::Receiver<MockEbConnection>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockEbServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _peer)) => {
                        if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                            let (write, _read) = ws.split();
                            if tx.send(MockEbConnection { write }).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            addr,
            conns: rx,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the next inbound connection.
    pub async fn accept(&mut self) -> Option<MockEbConnection> {
        self.conns.recv().await
    }
}
