//! Mock event socket for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and record every text frame
//! - Answer an identity payload with `EVENT_CONNECTED` (optional)
//! - Push scripted frames to every open connection
//! - Drop every open connection without a close frame

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Drop,
}

/// A mock event socket for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    control_tx: broadcast::Sender<Control>,
    messages: Arc<Mutex<VecDeque<String>>>,
    close_frames: Arc<Mutex<Vec<(u16, String)>>>,
    connections: Arc<Mutex<u32>>,
}

#[derive(Clone)]
struct Shared {
    acknowledge: bool,
    control_tx: broadcast::Sender<Control>,
    messages: Arc<Mutex<VecDeque<String>>>,
    close_frames: Arc<Mutex<Vec<(u16, String)>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a server that acknowledges identity payloads.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    /// Start a server that never acknowledges.
    pub async fn start_silent() -> Self {
        Self::start_with(false).await
    }

    async fn start_with(acknowledge: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (control_tx, _) = broadcast::channel(16);

        let shared = Shared {
            acknowledge,
            control_tx: control_tx.clone(),
            messages: Arc::new(Mutex::new(VecDeque::new())),
            close_frames: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(Mutex::new(0)),
        };

        let server_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, server_shared.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            control_tx,
            messages: shared.messages,
            close_frames: shared.close_frames,
            connections: shared.connections,
        }
    }

    /// Endpoint in the shape the credential file carries.
    pub fn url(&self) -> String {
        format!("ws://{}/api/socket", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Close frames received from clients as `(code, reason)`.
    pub async fn close_frames(&self) -> Vec<(u16, String)> {
        self.close_frames.lock().await.clone()
    }

    /// Send a text frame to every open connection.
    pub fn push(&self, frame: &str) {
        let _ = self.control_tx.send(Control::Push(frame.to_string()));
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control_tx.send(Control::Drop);
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, shared: Shared) {
    let mut control_rx = shared.control_tx.subscribe();

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    {
        let mut count = shared.connections.lock().await;
        *count += 1;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    shared.messages.lock().await.push_back(text.clone());

                    let is_identity = serde_json::from_str::<serde_json::Value>(&text)
                        .map(|v| v.get("api_key").is_some())
                        .unwrap_or(false);
                    if is_identity && shared.acknowledge {
                        let ack = serde_json::json!({
                            "event": "EVENT_CONNECTED",
                            "data": {"message": "Connected to mock socket"}
                        });
                        let _ = write.send(Message::Text(ack.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    if let Some(frame) = frame {
                        shared
                            .close_frames
                            .lock()
                            .await
                            .push((frame.code.into(), frame.reason.to_string()));
                    }
                    break;
                }
                Some(Err(_)) | None => break,
                _ => {}
            },
            control = control_rx.recv() => match control {
                Ok(Control::Push(frame)) => {
                    let _ = write.send(Message::Text(frame)).await;
                }
                Ok(Control::Drop) | Err(_) => break,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        assert!(server.url().ends_with("/api/socket"));
        server.shutdown().await;
    }
}
