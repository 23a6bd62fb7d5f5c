//! Supervised WebSocket client for the local event socket.
//!
//! Provides a single self-healing connection with:
//! - Identity handshake and EVENT_CONNECTED readiness tracking
//! - Health checks that detect stalled handshakes and dead transports
//! - A shared fixed-window cooldown between reconnect attempts
//! - Frame decoding with nested JSON payload unwrapping
//! - Channel-based event publishing

pub mod cooldown;
pub mod credentials;
pub mod decoder;
pub mod error;
pub mod handshake;
pub mod publisher;
pub mod supervisor;
pub mod transport;
pub mod watchdog;

pub use cooldown::CooldownTimer;
pub use credentials::Credentials;
pub use decoder::{decode_frame, Decoded, DecodedEvent, NestedPayload, ACK_EVENT_KIND};
pub use error::{DecodeError, WsError, WsResult};
pub use handshake::{parse_event_list, AuthPayload, Identity};
pub use publisher::{ChannelPublisher, EventPublisher};
pub use supervisor::{
    ConnectOutcome, ConnectionState, HealthAction, ReconnectReason, Supervisor, SupervisorConfig,
    SupervisorStatus,
};
pub use transport::{
    CloseInfo, Transport, TransportEvent, TransportEventKind, TransportEventSender,
    TransportHandle, TungsteniteTransport,
};
pub use watchdog::LivenessWatchdog;
