//! Host process for the local event socket receiver.
//!
//! Plays the role of the script host around the supervised socket:
//! - Configuration and settings loading (typed merge over defaults)
//! - Credential file parsing
//! - Periodic health-check ticks
//! - Settings reload with a full disable/re-enable cycle
//! - Event output as JSON lines on stdout

pub mod app;
pub mod config;
pub mod credentials;
pub mod error;
pub mod settings;

pub use app::{Application, SETTINGS_UPDATE_EVENT};
pub use config::AppConfig;
pub use credentials::{load_credentials, parse_credentials};
pub use error::{AppError, AppResult};
pub use settings::{Settings, SettingsPatch};
