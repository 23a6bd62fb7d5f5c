//! Main application orchestration.
//!
//! Coordinates:
//! - Supervisor lifecycle (enable on start, disable on shutdown)
//! - Health-check ticks at a fixed interval
//! - Settings reload (SIGHUP on unix)
//! - Event output to stdout

use crate::config::AppConfig;
use crate::credentials::load_credentials;
use crate::error::AppResult;
use crate::settings::Settings;
use sockrx_telemetry::Metrics;
use sockrx_ws::{
    ChannelPublisher, Credentials, DecodedEvent, EventPublisher, Supervisor, Transport,
    TungsteniteTransport, WsError,
};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Event kind used to broadcast merged settings after a reload.
pub const SETTINGS_UPDATE_EVENT: &str = "SOCKETRECEIVER_UPDATE_SETTINGS";

/// Main application.
pub struct Application {
    config: AppConfig,
    settings: Settings,
    credentials: Option<Credentials>,
    publisher: Arc<ChannelPublisher>,
    events_rx: mpsc::Receiver<DecodedEvent>,
    /// Set by `start()`; health checks are no-ops until then.
    supervisor: Option<Arc<Supervisor>>,
    dispatch_handle: Option<JoinHandle<()>>,
}

impl Application {
    /// Create a new application, reading credentials from `api_key_file`.
    pub fn new(config: AppConfig, settings: Settings) -> Self {
        let credentials = load_credentials(&config.api_key_file);
        Self::with_credentials(config, settings, credentials)
    }

    /// Create a new application with explicit credentials.
    pub fn with_credentials(
        config: AppConfig,
        settings: Settings,
        credentials: Option<Credentials>,
    ) -> Self {
        let (publisher, events_rx) =
            ChannelPublisher::channel(config.supervisor.event_channel_capacity);
        Self {
            config,
            settings,
            credentials,
            publisher: Arc::new(publisher),
            events_rx,
            supervisor: None,
            dispatch_handle: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn supervisor(&self) -> Option<&Arc<Supervisor>> {
        self.supervisor.as_ref()
    }

    /// Receiver for decoded events (when not using `run`).
    pub fn events(&mut self) -> &mut mpsc::Receiver<DecodedEvent> {
        &mut self.events_rx
    }

    /// Build the supervisor, spawn its dispatch loop and enable it.
    pub fn start(&mut self) -> AppResult<Arc<Supervisor>> {
        let transport: Arc<dyn Transport> = Arc::new(TungsteniteTransport::new()?);
        self.start_with_transport(transport)
    }

    /// Same as [`start`](Self::start) with a caller-provided transport.
    pub fn start_with_transport(
        &mut self,
        transport: Arc<dyn Transport>,
    ) -> AppResult<Arc<Supervisor>> {
        if let Some(supervisor) = &self.supervisor {
            return Ok(supervisor.clone());
        }

        let publisher: Arc<dyn EventPublisher> = self.publisher.clone();
        let supervisor = Arc::new(Supervisor::new(
            self.config.supervisor_config(&self.settings),
            self.credentials.clone(),
            transport,
            publisher,
        ));

        let runner = supervisor.clone();
        self.dispatch_handle = Some(tokio::spawn(async move {
            if let Err(e) = runner.run().await {
                error!(error = %e, "Dispatch loop failed");
            }
        }));

        match supervisor.enable() {
            Ok(outcome) => debug!(?outcome, "Supervisor started"),
            // Already logged by the supervisor; stays a standing no-op.
            Err(WsError::CredentialsUnavailable) => {}
            Err(e) => warn!(error = %e, "Initial connect failed"),
        }

        self.supervisor = Some(supervisor.clone());
        Ok(supervisor)
    }

    /// Periodic health check. No-op before `start()`.
    pub fn tick(&self) {
        if let Some(supervisor) = &self.supervisor {
            supervisor.on_health_check();
        }
    }

    /// Apply a settings blob: merge over defaults, broadcast, and cycle the
    /// supervisor so new credentials and subscriptions take effect.
    pub fn reload_settings(&mut self, json: &str) -> AppResult<()> {
        let settings = Settings::from_json(json)?;
        self.apply_settings(settings)
    }

    /// Re-read `settings_file` and the credential file.
    pub fn reload_from_disk(&mut self) -> AppResult<()> {
        let settings = self.config.load_settings()?;
        self.apply_settings(settings)
    }

    fn apply_settings(&mut self, settings: Settings) -> AppResult<()> {
        self.settings = settings;
        Metrics::settings_reloaded();
        info!(events = %self.settings.events, debug_mode = self.settings.debug_mode, "Settings reloaded");

        let payload = serde_json::to_value(&self.settings)?;
        self.publisher
            .publish(DecodedEvent::new(SETTINGS_UPDATE_EVENT, payload));

        self.credentials = load_credentials(&self.config.api_key_file);

        if let Some(supervisor) = &self.supervisor {
            if let Err(e) = supervisor.disable() {
                warn!(error = %e, "Could not close socket gracefully during reload");
            }
            supervisor.reconfigure(self.credentials.clone(), self.settings.subscriptions());
            match supervisor.enable() {
                Ok(_) | Err(WsError::CredentialsUnavailable) => {}
                Err(e) => warn!(error = %e, "Reconnect after reload failed"),
            }
        }

        Ok(())
    }

    /// Disable the supervisor and stop its dispatch loop.
    pub async fn stop(&mut self) {
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.disable() {
                warn!(error = %e, "Could not close socket gracefully");
            }
            supervisor.shutdown();
        }
        if let Some(handle) = self.dispatch_handle.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Dispatch task ended abnormally");
            }
        }
        if let Ok(text) = Metrics::gather_text() {
            debug!(metrics = %text, "Final metrics");
        }
    }

    /// Run until ctrl-c.
    pub async fn run(mut self) -> AppResult<()> {
        self.start()?;
        info!(
            interval_ms = self.config.supervisor.health_check_interval_ms,
            "Entering main event loop"
        );

        let mut tick = tokio::time::interval(self.config.health_check_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reload = ReloadSignal::new()?;

        loop {
            tokio::select! {
                _ = tick.tick() => self.tick(),

                Some(event) = self.events_rx.recv() => {
                    if let Err(e) = emit(&event) {
                        warn!(error = %e, kind = %event.kind, "Failed to write event");
                    }
                }

                () = reload.recv() => {
                    info!("Reload signal received");
                    if let Err(e) = self.reload_from_disk() {
                        error!(error = %e, "Settings reload failed");
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.stop().await;
        info!("Shut down");
        Ok(())
    }
}

/// Write one event as a JSON line on stdout.
fn emit(event: &DecodedEvent) -> AppResult<()> {
    let line = serde_json::to_string(event)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{line}")?;
    stdout.flush()?;
    Ok(())
}

/// SIGHUP on unix, never fires elsewhere.
struct ReloadSignal {
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    #[cfg(unix)]
    fn new() -> AppResult<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
        })
    }

    #[cfg(not(unix))]
    fn new() -> AppResult<Self> {
        Ok(Self {})
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        if self.hangup.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    #[cfg(not(unix))]
    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}
