//! Transport layer.
//!
//! The supervisor talks to the socket through [`Transport`] and
//! [`TransportHandle`]. Socket callbacks (open, message, close, error) are
//! delivered as [`TransportEvent`]s over a channel, tagged with the generation
//! of the handle that produced them, and consumed by the supervisor's single
//! dispatch loop.

use crate::error::{WsError, WsResult};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Close code for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code reported when no status was present.
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Close code reported for an abnormal closure (no close frame).
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Codes that may only be reported locally and never sent in a close frame.
pub fn is_reserved_close_code(code: u16) -> bool {
    matches!(code, 1005 | 1006 | 1015)
}

/// Close details reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseInfo {
    pub fn abnormal() -> Self {
        Self {
            code: CLOSE_ABNORMAL,
            reason: String::new(),
            was_clean: false,
        }
    }

    /// 1000 and 1005 are expected closes.
    pub fn is_normal(&self) -> bool {
        matches!(self.code, CLOSE_NORMAL | CLOSE_NO_STATUS)
    }
}

/// Callback payload from a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// WebSocket handshake completed.
    Open,
    /// Text frame received.
    Text(String),
    /// Binary frame received.
    Binary(Vec<u8>),
    /// Connection closed (by either side, or lost).
    Close(CloseInfo),
    /// Transport error, with underlying detail when available.
    Error {
        message: String,
        detail: Option<String>,
    },
}

/// Callback from a specific transport handle.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub generation: u64,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(generation: u64, kind: TransportEventKind) -> Self {
        Self { generation, kind }
    }
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Factory for transport handles.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `endpoint` and return immediately.
    ///
    /// All callbacks for the new handle must be sent on `events` tagged with
    /// `generation`.
    fn open(
        &self,
        endpoint: &str,
        generation: u64,
        events: TransportEventSender,
    ) -> Box<dyn TransportHandle>;
}

/// One WebSocket connection attempt/session.
pub trait TransportHandle: Send + Sync {
    fn generation(&self) -> u64;

    /// Whether the socket itself reports an open connection.
    fn is_alive(&self) -> bool;

    /// Queue a text frame.
    fn send_text(&self, text: String) -> WsResult<()>;

    /// Request a close. Returns an error if the handle is already broken.
    fn close(&self, code: u16, reason: &str) -> WsResult<()>;
}

#[derive(Debug)]
enum Command {
    Send(String),
    Close { code: u16, reason: String },
    /// Drop the connection without a close frame.
    Abort,
}

/// tokio-tungstenite transport. Each handle runs in its own task.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    runtime: Handle,
}

impl TungsteniteTransport {
    /// Bind to the current tokio runtime.
    pub fn new() -> WsResult<Self> {
        let runtime = Handle::try_current().map_err(|e| WsError::Runtime(e.to_string()))?;
        Ok(Self { runtime })
    }
}

impl Transport for TungsteniteTransport {
    fn open(
        &self,
        endpoint: &str,
        generation: u64,
        events: TransportEventSender,
    ) -> Box<dyn TransportHandle> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(false));

        self.runtime.spawn(run_socket(
            endpoint.to_string(),
            generation,
            events,
            cmd_rx,
            alive.clone(),
        ));

        Box::new(TungsteniteHandle {
            generation,
            cmd_tx,
            alive,
        })
    }
}

struct TungsteniteHandle {
    generation: u64,
    cmd_tx: mpsc::UnboundedSender<Command>,
    alive: Arc<AtomicBool>,
}

impl TransportHandle for TungsteniteHandle {
    fn generation(&self) -> u64 {
        self.generation
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn send_text(&self, text: String) -> WsResult<()> {
        self.cmd_tx
            .send(Command::Send(text))
            .map_err(|_| WsError::SendFailed("socket task has exited".to_string()))
    }

    fn close(&self, code: u16, reason: &str) -> WsResult<()> {
        let cmd = if is_reserved_close_code(code) {
            Command::Abort
        } else {
            Command::Close {
                code,
                reason: reason.to_string(),
            }
        };
        self.cmd_tx
            .send(cmd)
            .map_err(|_| WsError::CloseFailed("socket task has already exited".to_string()))
    }
}

fn emit(events: &TransportEventSender, generation: u64, kind: TransportEventKind) {
    // Receiver gone means the supervisor is gone; nothing left to notify.
    let _ = events.send(TransportEvent::new(generation, kind));
}

fn emit_error(events: &TransportEventSender, generation: u64, message: &str, detail: String) {
    emit(
        events,
        generation,
        TransportEventKind::Error {
            message: message.to_string(),
            detail: Some(detail),
        },
    );
}

async fn run_socket(
    endpoint: String,
    generation: u64,
    events: TransportEventSender,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    alive: Arc<AtomicBool>,
) {
    debug!(generation, %endpoint, "Opening socket");

    let connect = connect_async(endpoint);
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            res = &mut connect => match res {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    emit_error(&events, generation, "Connect failed", e.to_string());
                    emit(&events, generation, TransportEventKind::Close(CloseInfo::abnormal()));
                    return;
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(_)) => {
                    debug!(generation, "Dropping frame queued before open");
                }
                Some(Command::Close { code, reason }) => {
                    emit(&events, generation, TransportEventKind::Close(CloseInfo {
                        code,
                        reason,
                        was_clean: true,
                    }));
                    return;
                }
                Some(Command::Abort) | None => {
                    emit(&events, generation, TransportEventKind::Close(CloseInfo::abnormal()));
                    return;
                }
            },
        }
    };

    alive.store(true, Ordering::Release);
    emit(&events, generation, TransportEventKind::Open);

    let (mut write, mut read) = ws_stream.split();

    let close_info = loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    emit(&events, generation, TransportEventKind::Text(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    emit(&events, generation, TransportEventKind::Binary(data));
                }
                Some(Ok(Message::Ping(data))) => {
                    debug!(generation, "Received ping, sending pong");
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        emit_error(&events, generation, "Pong failed", e.to_string());
                        break CloseInfo::abnormal();
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((CLOSE_NO_STATUS, String::new()));
                    break CloseInfo {
                        code,
                        reason,
                        was_clean: true,
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit_error(&events, generation, "Socket read error", e.to_string());
                    break CloseInfo::abnormal();
                }
                None => {
                    warn!(generation, "Socket stream ended");
                    break CloseInfo::abnormal();
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        emit_error(&events, generation, "Socket write error", e.to_string());
                        break CloseInfo::abnormal();
                    }
                }
                Some(Command::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let was_clean = write.send(Message::Close(Some(frame))).await.is_ok();
                    break CloseInfo {
                        code,
                        reason,
                        was_clean,
                    };
                }
                Some(Command::Abort) | None => {
                    break CloseInfo::abnormal();
                }
            },
        }
    };

    alive.store(false, Ordering::Release);
    emit(&events, generation, TransportEventKind::Close(close_info));
}
