//! Connection supervisor.
//!
//! Owns the single transport handle and drives connect, disconnect and
//! recovery decisions. All mutable state (handle, readiness, cooldown,
//! watchdog) lives behind one mutex; transport callbacks arrive through a
//! channel and are applied by [`Supervisor::run`], while the host calls
//! [`Supervisor::on_health_check`] from its own tick loop.
//!
//! ```text
//! Disconnected --connect--> Connecting --open--> AuthPending --EVENT_CONNECTED--> Ready
//!       ^                                                                           |
//!       +--------------------- close / error / disconnect --------------------------+
//! ```

use crate::cooldown::{CooldownTimer, DEFAULT_COOLDOWN};
use crate::credentials::Credentials;
use crate::decoder::{decode_binary_frame, decode_frame, Decoded, NestedPayload};
use crate::error::{DecodeError, WsError, WsResult};
use crate::handshake::{AuthPayload, Identity};
use crate::publisher::EventPublisher;
use crate::transport::{
    CloseInfo, Transport, TransportEvent, TransportEventKind, TransportHandle, CLOSE_ABNORMAL,
    CLOSE_NORMAL,
};
use crate::watchdog::{LivenessWatchdog, DEFAULT_ACK_TIMEOUT};
use parking_lot::Mutex;
use sockrx_telemetry::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Author/website sent in the identity payload.
    pub identity: Identity,
    /// Event names to subscribe to, in order.
    pub subscriptions: Vec<String>,
    /// Minimum interval between reconnect attempts.
    pub cooldown: Duration,
    /// How long an attempt may wait for EVENT_CONNECTED.
    pub ack_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            identity: Identity::default(),
            subscriptions: Vec::new(),
            cooldown: DEFAULT_COOLDOWN,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AuthPending,
    Ready,
}

impl ConnectionState {
    /// Connecting, authenticating or ready.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Disconnected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AuthPending => "auth_pending",
            Self::Ready => "ready",
        }
    }
}

/// Result of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new transport was opened.
    Started,
    /// A handle is already connecting or connected; nothing was done.
    AlreadyActive,
    /// The previous socket has not reported its close yet. The connect runs
    /// when that close arrives.
    Deferred,
}

/// Why a health check forced a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// Transport up (or still connecting) but no EVENT_CONNECTED in time.
    AckTimeout,
    /// Transport reports the socket is not alive.
    DeadTransport,
}

impl ReconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AckTimeout => "ack_timeout",
            Self::DeadTransport => "dead_transport",
        }
    }

    fn close_reason(self) -> &'static str {
        match self {
            Self::AckTimeout => "No connection confirmation received",
            Self::DeadTransport => "No connection",
        }
    }
}

/// What a health check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    /// Disabled, or credentials unavailable.
    Idle,
    /// A reconnect happened recently.
    CoolingDown,
    /// Nothing to do.
    Healthy,
    /// Forced close and reconnect.
    Reconnected(ReconnectReason),
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorStatus {
    pub enabled: bool,
    pub has_credentials: bool,
    pub state: ConnectionState,
    pub transport_alive: bool,
    /// A replaced socket has not reported its close yet.
    pub closing_previous: bool,
    pub generation: u64,
    pub cooldown_remaining: Duration,
    pub attempt_age: Option<Duration>,
    pub since_last_frame: Option<Duration>,
}

struct Inner {
    enabled: bool,
    credentials: Option<Credentials>,
    identity: Identity,
    subscriptions: Vec<String>,
    state: ConnectionState,
    handle: Option<Box<dyn TransportHandle>>,
    /// Closed by us, close not yet reported by its task.
    draining: Option<Box<dyn TransportHandle>>,
    /// Connect requested while `draining` was held.
    connect_pending: bool,
    generation: u64,
    cooldown: CooldownTimer,
    watchdog: LivenessWatchdog,
    missing_credentials_logged: bool,
}

impl Inner {
    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!(from = self.state.as_str(), to = state.as_str(), "State transition");
            self.state = state;
            Metrics::ws_state_set(state.as_str());
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.handle.is_some() && self.generation == generation
    }
}

/// Supervisor for the single local socket connection.
pub struct Supervisor {
    inner: Mutex<Inner>,
    transport: Arc<dyn Transport>,
    publisher: Arc<dyn EventPublisher>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    shutdown_token: CancellationToken,
}

impl Supervisor {
    /// Create a supervisor. Nothing connects until [`enable`](Self::enable).
    pub fn new(
        config: SupervisorConfig,
        credentials: Option<Credentials>,
        transport: Arc<dyn Transport>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Mutex::new(Inner {
                enabled: false,
                credentials,
                identity: config.identity,
                subscriptions: config.subscriptions,
                state: ConnectionState::Disconnected,
                handle: None,
                draining: None,
                connect_pending: false,
                generation: 0,
                cooldown: CooldownTimer::new(config.cooldown),
                watchdog: LivenessWatchdog::new(config.ack_timeout),
                missing_credentials_logged: false,
            }),
            transport,
            publisher,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Check if the handshake has been acknowledged.
    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn has_credentials(&self) -> bool {
        self.inner.lock().credentials.is_some()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn status(&self) -> SupervisorStatus {
        let now = Instant::now();
        let inner = self.inner.lock();
        SupervisorStatus {
            enabled: inner.enabled,
            has_credentials: inner.credentials.is_some(),
            state: inner.state,
            transport_alive: inner.handle.as_ref().is_some_and(|h| h.is_alive()),
            closing_previous: inner.draining.is_some(),
            generation: inner.generation,
            cooldown_remaining: inner.cooldown.remaining_at(now),
            attempt_age: inner.watchdog.attempt_age_at(now),
            since_last_frame: inner.watchdog.since_last_frame_at(now),
        }
    }

    /// Open the connection if none is active.
    ///
    /// Idempotent while a handle is connecting or connected. While a closed
    /// socket has not yet reported its close, the connect is deferred until it
    /// does. Missing credentials are permanent: the error is logged once and
    /// never retried.
    pub fn connect(&self) -> WsResult<ConnectOutcome> {
        let mut inner = self.inner.lock();
        self.connect_locked(&mut inner, Instant::now())
    }

    /// Close the connection with `code`/`reason`.
    ///
    /// The handle is discarded and the state forced to `Disconnected` even
    /// when the close itself fails. A failed close means the socket task is
    /// already gone, so a later `connect` opens immediately.
    pub fn disconnect(&self, code: u16, reason: &str) -> WsResult<()> {
        let mut inner = self.inner.lock();
        Self::disconnect_locked(&mut inner, code, reason)
    }

    /// Enable supervision and connect. The first attempt starts the cooldown.
    pub fn enable(&self) -> WsResult<ConnectOutcome> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.enabled = true;
        info!("Supervisor enabled");
        let outcome = self.connect_locked(&mut inner, now);
        if outcome.is_ok() {
            inner.cooldown.reset_at(now);
        }
        outcome
    }

    /// Disable supervision and close with `1000 Program exit`.
    pub fn disable(&self) -> WsResult<()> {
        let mut inner = self.inner.lock();
        inner.enabled = false;
        info!("Supervisor disabled");
        Self::disconnect_locked(&mut inner, CLOSE_NORMAL, "Program exit")
    }

    /// Replace credentials and subscriptions. Takes effect on the next connect.
    pub fn reconfigure(&self, credentials: Option<Credentials>, subscriptions: Vec<String>) {
        let mut inner = self.inner.lock();
        inner.credentials = credentials;
        inner.subscriptions = subscriptions;
        inner.missing_credentials_logged = false;
        debug!(
            has_credentials = inner.credentials.is_some(),
            subscriptions = inner.subscriptions.len(),
            "Supervisor reconfigured"
        );
    }

    /// Periodic health check. Safe to call at any cadence.
    pub fn on_health_check(&self) {
        self.on_health_check_at(Instant::now());
    }

    /// Health check against an explicit clock.
    pub fn on_health_check_at(&self, now: Instant) -> HealthAction {
        let mut inner = self.inner.lock();

        if !inner.enabled || inner.credentials.is_none() {
            return HealthAction::Idle;
        }

        if inner.cooldown.is_active_at(now) {
            return HealthAction::CoolingDown;
        }

        let awaiting_ack = matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::AuthPending
        );
        if inner.watchdog.is_stalled_at(now, awaiting_ack) {
            warn!(
                state = inner.state.as_str(),
                "No EVENT_CONNECTED received, reconnecting"
            );
            self.force_reconnect_locked(&mut inner, now, ReconnectReason::AckTimeout);
            return HealthAction::Reconnected(ReconnectReason::AckTimeout);
        }

        // A handshake in progress is judged by the ack timeout alone.
        let alive = inner.handle.as_ref().is_some_and(|h| h.is_alive());
        if !awaiting_ack && !alive {
            warn!(state = inner.state.as_str(), "Socket seems dead, reconnecting");
            self.force_reconnect_locked(&mut inner, now, ReconnectReason::DeadTransport);
            return HealthAction::Reconnected(ReconnectReason::DeadTransport);
        }

        HealthAction::Healthy
    }

    /// Signal the dispatch loop to exit.
    pub fn shutdown(&self) {
        info!("Supervisor shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Dispatch loop: applies transport callbacks until shutdown.
    ///
    /// May only run once per supervisor.
    pub async fn run(&self) -> WsResult<()> {
        let mut events_rx = self.events_rx.lock().take().ok_or(WsError::AlreadyRunning)?;
        info!("Dispatch loop started");

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in dispatch loop");
                    return Ok(());
                }
                event = events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => return Ok(()),
                },
            }
        }
    }

    /// Apply one transport callback.
    pub fn handle_event(&self, event: TransportEvent) {
        let TransportEvent { generation, kind } = event;
        match kind {
            TransportEventKind::Open => self.on_open(generation),
            TransportEventKind::Text(text) => {
                if self.record_frame(generation) {
                    self.on_frame(generation, decode_frame(&text));
                }
            }
            TransportEventKind::Binary(data) => {
                if self.record_frame(generation) {
                    self.on_frame(generation, decode_binary_frame(&data));
                }
            }
            TransportEventKind::Close(info) => self.on_close(generation, &info),
            TransportEventKind::Error { message, detail } => {
                self.on_error(generation, &message, detail.as_deref())
            }
        }
    }

    fn connect_locked(&self, inner: &mut Inner, now: Instant) -> WsResult<ConnectOutcome> {
        let Some(credentials) = inner.credentials.as_ref() else {
            if !inner.missing_credentials_logged {
                error!("API key or socket endpoint unavailable, socket disabled");
                inner.missing_credentials_logged = true;
            }
            return Err(WsError::CredentialsUnavailable);
        };

        if inner.handle.is_some() && inner.state.is_active() {
            debug!(state = inner.state.as_str(), "Connect ignored, handle already active");
            return Ok(ConnectOutcome::AlreadyActive);
        }

        if let Some(previous) = inner.draining.as_ref() {
            debug!(
                previous = previous.generation(),
                "Previous socket still closing, connect deferred"
            );
            inner.connect_pending = true;
            return Ok(ConnectOutcome::Deferred);
        }

        let endpoint = credentials.endpoint().to_string();
        inner.handle = None;
        inner.generation += 1;
        let generation = inner.generation;

        info!(generation, %endpoint, "Connecting to socket");
        let handle = self
            .transport
            .open(&endpoint, generation, self.events_tx.clone());
        inner.handle = Some(handle);
        inner.watchdog.arm_at(now);
        inner.set_state(ConnectionState::Connecting);

        Ok(ConnectOutcome::Started)
    }

    fn disconnect_locked(inner: &mut Inner, code: u16, reason: &str) -> WsResult<()> {
        let handle = inner.handle.take();
        inner.watchdog.disarm();
        inner.connect_pending = false;
        inner.set_state(ConnectionState::Disconnected);

        let Some(handle) = handle else {
            return Ok(());
        };
        debug!(generation = handle.generation(), code, %reason, "Closing socket");
        handle.close(code, reason)?;
        // The task reports its close later; hold the handle until then.
        inner.draining = Some(handle);
        Ok(())
    }

    fn force_reconnect_locked(&self, inner: &mut Inner, now: Instant, reason: ReconnectReason) {
        // A socket closed a full window ago that never reported back is given up on.
        if let Some(stale) = inner.draining.take() {
            warn!(
                generation = stale.generation(),
                "Previous socket never reported its close, abandoning it"
            );
        }

        if let Err(e) = Self::disconnect_locked(inner, CLOSE_ABNORMAL, reason.close_reason()) {
            error!(error = %e, "Could not close socket gracefully");
        }

        Metrics::ws_reconnect(reason.as_str());
        if let Err(e) = self.connect_locked(inner, now) {
            warn!(error = %e, "Reconnect attempt not started");
        }
        inner.cooldown.reset_at(now);
    }

    fn on_open(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            debug!(generation, "Ignoring open from replaced handle");
            return;
        }
        if inner.state != ConnectionState::Connecting {
            debug!(state = inner.state.as_str(), "Ignoring duplicate open");
            return;
        }

        inner.set_state(ConnectionState::AuthPending);
        info!(generation, "Socket open, sending identity");

        let Some(credentials) = inner.credentials.as_ref() else {
            return;
        };
        let frame = AuthPayload::new(&inner.identity, credentials, &inner.subscriptions)
            .to_frame();
        let sent = frame.and_then(|frame| match inner.handle.as_ref() {
            Some(handle) => handle.send_text(frame),
            None => Err(WsError::NotConnected),
        });

        match sent {
            Ok(()) => debug!(
                author = %inner.identity.author,
                events = ?inner.subscriptions,
                "Identity payload sent"
            ),
            Err(e) => error!(error = %e, "Failed to send identity payload"),
        }
    }

    /// Returns false if the frame belongs to a replaced handle.
    fn record_frame(&self, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        if !inner.is_current(generation) {
            debug!(generation, "Ignoring frame from replaced handle");
            return false;
        }
        inner.watchdog.record_frame_at(Instant::now());
        true
    }

    fn on_frame(&self, generation: u64, decoded: Result<Decoded, DecodeError>) {
        let Decoded { event, nested } = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                Metrics::decode_failed("frame");
                return;
            }
        };

        if let NestedPayload::Raw { error } = &nested {
            warn!(kind = %event.kind, %error, "Nested payload is not JSON, forwarding raw string");
            Metrics::decode_failed("nested");
        }
        debug!(kind = %event.kind, payload = %event.payload, "Event received");

        if event.is_acknowledgement() {
            let mut inner = self.inner.lock();
            if !inner.is_current(generation) {
                return;
            }
            match inner.state {
                ConnectionState::AuthPending => {
                    inner.watchdog.acknowledge_at(Instant::now());
                    inner.set_state(ConnectionState::Ready);
                    info!(ack = event.message().unwrap_or_default(), "Socket ready");
                }
                state => {
                    debug!(state = state.as_str(), "Ignoring acknowledgement");
                }
            }
            return;
        }

        warn!(kind = %event.kind, payload = %event.payload, "Unhandled event");
        Metrics::event_forwarded(&event.kind);
        self.publisher.publish(event);
    }

    fn on_close(&self, generation: u64, info: &CloseInfo) {
        if !info.reason.is_empty() {
            debug!(code = info.code, reason = %info.reason, "Socket closed");
        } else if info.is_normal() {
            debug!(code = info.code, "Socket closed: Normal exit");
        } else {
            debug!(code = info.code, "Socket closed: Unknown reason");
        }
        if !info.was_clean {
            warn!(code = info.code, "Unclean socket disconnect");
        }
        Metrics::ws_close(info.code, info.was_clean);

        let mut inner = self.inner.lock();
        if inner.is_current(generation) {
            inner.handle = None;
            inner.watchdog.disarm();
            inner.set_state(ConnectionState::Disconnected);
            return;
        }

        let drained = inner
            .draining
            .as_ref()
            .is_some_and(|h| h.generation() == generation);
        if !drained {
            debug!(generation, "Ignoring close from replaced handle");
            return;
        }
        inner.draining = None;
        if inner.connect_pending {
            inner.connect_pending = false;
            debug!(generation, "Previous socket closed, running deferred connect");
            if let Err(e) = self.connect_locked(&mut inner, Instant::now()) {
                warn!(error = %e, "Deferred connect not started");
            }
        }
    }

    fn on_error(&self, generation: u64, message: &str, detail: Option<&str>) {
        Metrics::ws_error();
        match detail {
            Some(detail) => error!(generation, %message, %detail, "Socket error"),
            None => error!(generation, %message, "Socket error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::DecodedEvent;
    use crate::publisher::MockEventPublisher;
    use crate::transport::TransportEventSender;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_test::{assert_err, assert_ok};

    const ENDPOINT: &str = "ws://127.0.0.1:59650/api/v2/socket";

    #[derive(Default)]
    struct FakeLog {
        opens: Vec<u64>,
        closes: Vec<(u64, u16, String)>,
        sent: Vec<(u64, String)>,
        handles: Vec<Arc<AtomicBool>>,
        /// Socket task still running (cleared only when its close is delivered).
        running: Vec<Arc<AtomicBool>>,
        fail_close: bool,
    }

    #[derive(Clone, Default)]
    struct FakeTransport {
        log: Arc<Mutex<FakeLog>>,
    }

    impl FakeTransport {
        fn opens(&self) -> usize {
            self.log.lock().opens.len()
        }

        fn closes(&self) -> Vec<(u64, u16, String)> {
            self.log.lock().closes.clone()
        }

        fn sent(&self) -> Vec<(u64, String)> {
            self.log.lock().sent.clone()
        }

        fn set_alive(&self, generation: u64, alive: bool) {
            let log = self.log.lock();
            log.handles[(generation - 1) as usize].store(alive, Ordering::SeqCst);
        }

        fn running_tasks(&self) -> usize {
            self.log
                .lock()
                .running
                .iter()
                .filter(|r| r.load(Ordering::SeqCst))
                .count()
        }

        /// The socket task for `generation` exits.
        fn finish(&self, generation: u64) {
            let log = self.log.lock();
            let idx = (generation - 1) as usize;
            log.handles[idx].store(false, Ordering::SeqCst);
            log.running[idx].store(false, Ordering::SeqCst);
        }

        fn fail_close(&self) {
            self.log.lock().fail_close = true;
        }
    }

    struct FakeHandle {
        generation: u64,
        alive: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
        log: Arc<Mutex<FakeLog>>,
    }

    impl Transport for FakeTransport {
        fn open(
            &self,
            endpoint: &str,
            generation: u64,
            _events: TransportEventSender,
        ) -> Box<dyn TransportHandle> {
            assert_eq!(endpoint, ENDPOINT);
            let mut log = self.log.lock();
            assert!(
                log.running.iter().all(|r| !r.load(Ordering::SeqCst)),
                "generation {generation} opened while an earlier socket task is still running"
            );
            let alive = Arc::new(AtomicBool::new(false));
            let running = Arc::new(AtomicBool::new(true));
            log.opens.push(generation);
            log.handles.push(alive.clone());
            log.running.push(running.clone());
            Box::new(FakeHandle {
                generation,
                alive,
                running,
                log: self.log.clone(),
            })
        }
    }

    impl TransportHandle for FakeHandle {
        fn generation(&self) -> u64 {
            self.generation
        }

        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn send_text(&self, text: String) -> WsResult<()> {
            self.log.lock().sent.push((self.generation, text));
            Ok(())
        }

        fn close(&self, code: u16, reason: &str) -> WsResult<()> {
            let mut log = self.log.lock();
            log.closes.push((self.generation, code, reason.to_string()));
            if log.fail_close {
                // Broken handle: the task is already gone
                self.alive.store(false, Ordering::SeqCst);
                self.running.store(false, Ordering::SeqCst);
                return Err(WsError::CloseFailed("already broken".to_string()));
            }
            // Close is only queued; the task reports it later
            Ok(())
        }
    }

    impl Drop for FakeHandle {
        // Dropping the command sender ends the socket task
        fn drop(&mut self) {
            self.alive.store(false, Ordering::SeqCst);
            self.running.store(false, Ordering::SeqCst);
        }
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            identity: Identity {
                author: "tester".to_string(),
                website: "https://example.org".to_string(),
            },
            subscriptions: vec!["EVENT_FOLLOW".to_string(), "EVENT_SUB".to_string()],
            cooldown: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
        }
    }

    fn credentials() -> Option<Credentials> {
        Some(Credentials::new("0123abcd", ENDPOINT))
    }

    fn silent_publisher() -> MockEventPublisher {
        let mut publisher = MockEventPublisher::new();
        publisher.expect_publish().never();
        publisher
    }

    fn supervisor_with(
        creds: Option<Credentials>,
        publisher: MockEventPublisher,
    ) -> (Supervisor, FakeTransport) {
        supervisor_with_config(config(), creds, publisher)
    }

    fn supervisor_with_config(
        config: SupervisorConfig,
        creds: Option<Credentials>,
        publisher: MockEventPublisher,
    ) -> (Supervisor, FakeTransport) {
        let transport = FakeTransport::default();
        let supervisor = Supervisor::new(
            config,
            creds,
            Arc::new(transport.clone()),
            Arc::new(publisher),
        );
        (supervisor, transport)
    }

    fn open(sup: &Supervisor, transport: &FakeTransport, generation: u64) {
        transport.set_alive(generation, true);
        sup.handle_event(TransportEvent::new(generation, TransportEventKind::Open));
    }

    fn closed(sup: &Supervisor, transport: &FakeTransport, generation: u64) {
        transport.finish(generation);
        sup.handle_event(TransportEvent::new(
            generation,
            TransportEventKind::Close(CloseInfo::abnormal()),
        ));
    }

    fn text(sup: &Supervisor, generation: u64, frame: &str) {
        sup.handle_event(TransportEvent::new(
            generation,
            TransportEventKind::Text(frame.to_string()),
        ));
    }

    const ACK: &str = r#"{"event":"EVENT_CONNECTED","data":{"message":"ok"}}"#;

    #[test]
    fn test_connect_is_idempotent() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());

        assert_eq!(assert_ok!(sup.connect()), ConnectOutcome::Started);
        assert_eq!(sup.state(), ConnectionState::Connecting);
        assert_eq!(assert_ok!(sup.connect()), ConnectOutcome::AlreadyActive);

        open(&sup, &transport, 1);
        text(&sup, 1, ACK);
        assert!(sup.is_ready());
        assert_eq!(assert_ok!(sup.connect()), ConnectOutcome::AlreadyActive);

        assert_eq!(transport.opens(), 1);
    }

    #[test]
    fn test_open_sends_identity_and_waits_for_ack() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.connect());
        open(&sup, &transport, 1);

        assert_eq!(sup.state(), ConnectionState::AuthPending);
        assert!(!sup.is_ready());

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        let payload: Value = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(
            payload,
            json!({
                "author": "tester",
                "website": "https://example.org",
                "api_key": "0123abcd",
                "events": ["EVENT_FOLLOW", "EVENT_SUB"]
            })
        );
    }

    #[test]
    fn test_other_event_before_ack_does_not_flip_readiness() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event: &DecodedEvent| event.kind == "EVENT_FOLLOW")
            .times(1)
            .return_const(());
        let (sup, transport) = supervisor_with(credentials(), publisher);

        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        text(&sup, 1, r#"{"event":"EVENT_FOLLOW","data":{"name":"a"}}"#);
        assert_eq!(sup.state(), ConnectionState::AuthPending);

        text(&sup, 1, ACK);
        assert!(sup.is_ready());
    }

    #[test]
    fn test_ack_before_open_is_ignored() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.connect());

        text(&sup, 1, ACK);
        assert_eq!(sup.state(), ConnectionState::Connecting);

        open(&sup, &transport, 1);
        text(&sup, 1, ACK);
        assert!(sup.is_ready());
    }

    #[test]
    fn test_ack_is_not_forwarded() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        text(&sup, 1, ACK);
        assert_eq!(sup.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_nested_payload_decoded_before_forwarding() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event: &DecodedEvent| event.kind == "custom" && event.payload == json!({"x": 1}))
            .times(1)
            .return_const(());
        let (sup, transport) = supervisor_with(credentials(), publisher);

        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        text(&sup, 1, ACK);
        text(&sup, 1, r#"{"event":"custom","data":"{\"x\":1}"}"#);
    }

    #[test]
    fn test_malformed_frames_are_contained() {
        let mut publisher = MockEventPublisher::new();
        publisher
            .expect_publish()
            .withf(|event: &DecodedEvent| event.payload == json!("{broken"))
            .times(1)
            .return_const(());
        let (sup, transport) = supervisor_with(credentials(), publisher);

        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        text(&sup, 1, ACK);
        text(&sup, 1, "garbage");
        text(&sup, 1, r#"{"event":"custom","data":"{broken"}"#);
        sup.handle_event(TransportEvent::new(
            1,
            TransportEventKind::Binary(vec![0xff, 0x00]),
        ));

        assert!(sup.is_ready());
    }

    #[test]
    fn test_missing_credentials_is_permanent_noop() {
        let (sup, transport) = supervisor_with(None, silent_publisher());

        assert!(matches!(sup.enable(), Err(WsError::CredentialsUnavailable)));
        assert!(matches!(sup.connect(), Err(WsError::CredentialsUnavailable)));

        let t0 = Instant::now();
        for secs in [0, 11, 60, 600] {
            assert_eq!(
                sup.on_health_check_at(t0 + Duration::from_secs(secs)),
                HealthAction::Idle
            );
        }
        assert_eq!(transport.opens(), 0);
        assert!(transport.closes().is_empty());
    }

    #[test]
    fn test_health_check_noop_while_disabled() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_eq!(
            sup.on_health_check_at(Instant::now() + Duration::from_secs(60)),
            HealthAction::Idle
        );
        assert_eq!(transport.opens(), 0);
    }

    #[test]
    fn test_dead_transport_reconnects_once() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());
        open(&sup, &transport, 1);
        text(&sup, 1, ACK);

        closed(&sup, &transport, 1);
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        let t1 = t0 + Duration::from_secs(11);
        assert_eq!(
            sup.on_health_check_at(t1),
            HealthAction::Reconnected(ReconnectReason::DeadTransport)
        );

        // Socket already reported its close, so there is nothing to wait for
        assert!(transport.closes().is_empty());
        assert_eq!(transport.opens(), 2);
        assert_eq!(sup.state(), ConnectionState::Connecting);
        assert!(sup.status().cooldown_remaining > Duration::from_secs(9));
    }

    #[test]
    fn test_ready_but_dead_socket_reconnects() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());
        open(&sup, &transport, 1);
        text(&sup, 1, ACK);

        // No close event delivered yet, but the socket reports dead
        transport.set_alive(1, false);
        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(30)),
            HealthAction::Reconnected(ReconnectReason::DeadTransport)
        );
        assert_eq!(transport.closes(), vec![(1, 1006, "No connection".to_string())]);
        assert_eq!(transport.opens(), 1);
        assert!(sup.status().closing_previous);

        closed(&sup, &transport, 1);
        assert_eq!(transport.opens(), 2);
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_stalled_handshake_reconnects() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());
        open(&sup, &transport, 1);

        // Transport alive, never acknowledged
        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(5)),
            HealthAction::CoolingDown
        );
        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(11)),
            HealthAction::Reconnected(ReconnectReason::AckTimeout)
        );
        assert_eq!(
            transport.closes(),
            vec![(1, 1006, "No connection confirmation received".to_string())]
        );
        assert_eq!(transport.opens(), 1);

        closed(&sup, &transport, 1);
        assert_eq!(transport.opens(), 2);
    }

    #[test]
    fn test_handshake_in_progress_gets_full_ack_timeout() {
        let config = SupervisorConfig {
            ack_timeout: Duration::from_secs(30),
            ..config()
        };
        let (sup, transport) = supervisor_with_config(config, credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());

        // Still connecting: the socket is not open yet, but the attempt is young
        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(11)),
            HealthAction::Healthy
        );
        assert_eq!(sup.state(), ConnectionState::Connecting);

        // Open but silent, and the socket drops its alive flag without a close
        open(&sup, &transport, 1);
        transport.set_alive(1, false);
        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(20)),
            HealthAction::Healthy
        );
        assert_eq!(transport.opens(), 1);
        assert!(transport.closes().is_empty());

        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(31)),
            HealthAction::Reconnected(ReconnectReason::AckTimeout)
        );
    }

    #[test]
    fn test_abandons_socket_that_never_reports_close() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());
        open(&sup, &transport, 1);

        let t1 = t0 + Duration::from_secs(11);
        assert_eq!(
            sup.on_health_check_at(t1),
            HealthAction::Reconnected(ReconnectReason::AckTimeout)
        );
        assert_eq!(transport.opens(), 1);

        // No close ever arrives for generation 1
        assert_eq!(
            sup.on_health_check_at(t1 + Duration::from_secs(5)),
            HealthAction::CoolingDown
        );
        assert_eq!(
            sup.on_health_check_at(t1 + Duration::from_secs(10)),
            HealthAction::Reconnected(ReconnectReason::DeadTransport)
        );
        assert_eq!(transport.opens(), 2);
        assert_eq!(transport.running_tasks(), 1);
        assert!(!sup.status().closing_previous);
    }

    #[test]
    fn test_reconnects_spaced_by_cooldown() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());

        let t1 = t0 + Duration::from_secs(11);
        assert!(matches!(sup.on_health_check_at(t1), HealthAction::Reconnected(_)));
        closed(&sup, &transport, 1);

        // Second request inside the window must not fire
        for offset in [0, 1, 5, 9] {
            assert_eq!(
                sup.on_health_check_at(t1 + Duration::from_secs(offset)),
                HealthAction::CoolingDown
            );
        }
        assert_eq!(transport.opens(), 2);

        assert!(matches!(
            sup.on_health_check_at(t1 + Duration::from_secs(10)),
            HealthAction::Reconnected(_)
        ));
        closed(&sup, &transport, 2);
        assert_eq!(transport.opens(), 3);
    }

    #[test]
    fn test_healthy_connection_untouched() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());
        open(&sup, &transport, 1);
        text(&sup, 1, ACK);

        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(120)),
            HealthAction::Healthy
        );
        assert_eq!(transport.opens(), 1);
        assert!(transport.closes().is_empty());
    }

    #[test]
    fn test_failed_close_does_not_block_reconnect() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());
        transport.fail_close();

        assert_eq!(
            sup.on_health_check_at(t0 + Duration::from_secs(11)),
            HealthAction::Reconnected(ReconnectReason::AckTimeout)
        );
        assert_eq!(transport.closes().len(), 1);
        assert_eq!(transport.opens(), 2);
        assert_eq!(sup.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_disconnect_forces_disconnected_even_on_failure() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        transport.fail_close();

        assert_err!(sup.disconnect(1000, "bye"));
        assert_eq!(sup.state(), ConnectionState::Disconnected);

        assert_eq!(assert_ok!(sup.connect()), ConnectOutcome::Started);
        assert_eq!(transport.opens(), 2);
    }

    #[test]
    fn test_stale_handle_events_ignored() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        assert_ok!(sup.disconnect(1000, "bye"));
        assert_eq!(assert_ok!(sup.connect()), ConnectOutcome::Deferred);

        // Late callbacks from the closed socket change nothing
        text(&sup, 1, ACK);
        sup.handle_event(TransportEvent::new(1, TransportEventKind::Open));
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(transport.opens(), 1);

        // Its close releases the deferred connect
        closed(&sup, &transport, 1);
        assert_eq!(transport.opens(), 2);
        assert_eq!(sup.state(), ConnectionState::Connecting);

        // A duplicate close from generation 1 must not touch generation 2
        sup.handle_event(TransportEvent::new(
            1,
            TransportEventKind::Close(CloseInfo::abnormal()),
        ));
        assert_eq!(sup.state(), ConnectionState::Connecting);

        open(&sup, &transport, 2);
        text(&sup, 2, ACK);
        assert!(sup.is_ready());
    }

    #[test]
    fn test_never_two_open_handles() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let t0 = Instant::now();
        assert_ok!(sup.enable());

        let mut now = t0;
        for round in 1..=5u64 {
            open(&sup, &transport, round);
            now += Duration::from_secs(11);
            assert!(matches!(sup.on_health_check_at(now), HealthAction::Reconnected(_)));

            // The replacement waits for the old socket task to finish
            assert_eq!(transport.running_tasks(), 1);
            assert_eq!(transport.opens() as u64, round);
            assert_eq!(sup.state(), ConnectionState::Disconnected);

            closed(&sup, &transport, round);
            assert_eq!(transport.running_tasks(), 1);
            assert_eq!(transport.opens() as u64, round + 1);
        }
    }

    #[test]
    fn test_error_event_does_not_change_state() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.connect());
        open(&sup, &transport, 1);
        sup.handle_event(TransportEvent::new(
            1,
            TransportEventKind::Error {
                message: "boom".to_string(),
                detail: Some("io".to_string()),
            },
        ));
        assert_eq!(sup.state(), ConnectionState::AuthPending);
        assert_eq!(transport.opens(), 1);
    }

    #[test]
    fn test_disable_closes_normally() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        assert_ok!(sup.enable());
        open(&sup, &transport, 1);

        assert_ok!(sup.disable());
        assert!(!sup.is_enabled());
        assert_eq!(transport.closes(), vec![(1, 1000, "Program exit".to_string())]);
        assert_eq!(
            sup.on_health_check_at(Instant::now() + Duration::from_secs(60)),
            HealthAction::Idle
        );
    }

    #[test]
    fn test_reconfigure_applies_on_next_connect() {
        let (sup, transport) = supervisor_with(None, silent_publisher());
        assert_err!(sup.enable());

        sup.reconfigure(credentials(), vec!["EVENT_RAID".to_string()]);
        assert_ok!(sup.disable());
        assert_eq!(assert_ok!(sup.enable()), ConnectOutcome::Started);
        open(&sup, &transport, 1);

        let payload: Value = serde_json::from_str(&transport.sent()[0].1).unwrap();
        assert_eq!(payload["events"], json!(["EVENT_RAID"]));
    }

    #[tokio::test]
    async fn test_run_applies_events_and_stops_on_shutdown() {
        let (sup, transport) = supervisor_with(credentials(), silent_publisher());
        let sup = Arc::new(sup);
        assert_ok!(sup.connect());
        transport.set_alive(1, true);

        sup.events_tx
            .send(TransportEvent::new(1, TransportEventKind::Open))
            .unwrap();
        sup.events_tx
            .send(TransportEvent::new(1, TransportEventKind::Text(ACK.to_string())))
            .unwrap();

        let runner = sup.clone();
        let task = tokio::spawn(async move { runner.run().await });

        tokio::time::timeout(Duration::from_secs(2), async {
            while !sup.is_ready() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(matches!(sup.run().await, Err(WsError::AlreadyRunning)));

        sup.shutdown();
        assert_ok!(task.await.unwrap());
    }
}
