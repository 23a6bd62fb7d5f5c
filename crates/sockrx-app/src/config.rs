//! Application configuration.

use crate::error::{AppError, AppResult};
use crate::settings::Settings;
use serde::{Deserialize, Serialize};
use sockrx_ws::{Identity, SupervisorConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Identity sent in the handshake payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_author")]
    pub author: String,
    #[serde(default = "default_website")]
    pub website: String,
}

fn default_author() -> String {
    Identity::default().author
}

fn default_website() -> String {
    Identity::default().website
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            author: default_author(),
            website: default_website(),
        }
    }
}

impl From<IdentityConfig> for Identity {
    fn from(config: IdentityConfig) -> Self {
        Self {
            author: config.author,
            website: config.website,
        }
    }
}

/// Supervisor tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSection {
    /// Minimum interval between reconnect attempts (seconds). Default: 10.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Time allowed for EVENT_CONNECTED after a connect attempt (seconds). Default: 10.
    #[serde(default = "default_ack_timeout_secs")]
    pub ack_timeout_secs: u64,
    /// Health check tick interval (ms). Default: 1,000.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    /// Capacity of the decoded event channel. Default: 1,000.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_cooldown_secs() -> u64 {
    10
}

fn default_ack_timeout_secs() -> u64 {
    10
}

fn default_health_check_interval_ms() -> u64 {
    1_000
}

fn default_event_channel_capacity() -> usize {
    1_000
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            ack_timeout_secs: default_ack_timeout_secs(),
            health_check_interval_ms: default_health_check_interval_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Top-level configuration (TOML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// File holding the API key and socket endpoint.
    #[serde(default = "default_api_key_file")]
    pub api_key_file: PathBuf,
    /// JSON settings file. Defaults apply when unset or unreadable.
    #[serde(default)]
    pub settings_file: Option<PathBuf>,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub supervisor: SupervisorSection,
}

fn default_api_key_file() -> PathBuf {
    PathBuf::from("API_Key.js")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key_file: default_api_key_file(),
            settings_file: None,
            identity: IdentityConfig::default(),
            supervisor: SupervisorSection::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.supervisor.health_check_interval_ms == 0 {
            return Err(AppError::Config(
                "supervisor.health_check_interval_ms must be > 0".to_string(),
            ));
        }
        if self.supervisor.event_channel_capacity == 0 {
            return Err(AppError::Config(
                "supervisor.event_channel_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Load script settings from `settings_file`, or defaults when unset.
    pub fn load_settings(&self) -> AppResult<Settings> {
        match &self.settings_file {
            Some(path) => Settings::from_file(path),
            None => Ok(Settings::default()),
        }
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.supervisor.health_check_interval_ms)
    }

    /// Build the supervisor configuration for the given settings.
    pub fn supervisor_config(&self, settings: &Settings) -> SupervisorConfig {
        SupervisorConfig {
            identity: self.identity.clone().into(),
            subscriptions: settings.subscriptions(),
            cooldown: Duration::from_secs(self.supervisor.cooldown_secs),
            ack_timeout: Duration::from_secs(self.supervisor.ack_timeout_secs),
        }
    }
}
