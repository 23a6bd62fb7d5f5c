//! Script settings.
//!
//! Settings arrive as a JSON blob (from the settings file or a reload).
//! Merge rule: keys missing from the blob keep their default value, unknown
//! keys are ignored. The blob is always merged over the defaults, never over
//! the previously loaded settings.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use sockrx_ws::parse_event_list;
use std::path::Path;

/// Effective script settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Settings {
    /// Comma-separated event names to subscribe to.
    pub events: String,
    /// Lower the log level to debug for this workspace.
    pub debug_mode: bool,
    /// Drop empty entries from the event list.
    pub skip_empty_events: bool,
}

fn default_events() -> String {
    "EVENT_FOLLOW,EVENT_SUB,EVENT_CHEER,EVENT_HOST,EVENT_RAID,EVENT_DONATION".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            events: default_events(),
            debug_mode: false,
            skip_empty_events: false,
        }
    }
}

/// Partial settings as received. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SettingsPatch {
    pub events: Option<String>,
    pub debug_mode: Option<bool>,
    pub skip_empty_events: Option<bool>,
}

impl Settings {
    /// Merge a patch over the defaults.
    pub fn merged(patch: SettingsPatch) -> Self {
        let defaults = Self::default();
        Self {
            events: patch.events.unwrap_or(defaults.events),
            debug_mode: patch.debug_mode.unwrap_or(defaults.debug_mode),
            skip_empty_events: patch.skip_empty_events.unwrap_or(defaults.skip_empty_events),
        }
    }

    /// Parse a JSON blob (optionally BOM-prefixed) and merge it over the defaults.
    pub fn from_json(json: &str) -> AppResult<Self> {
        let patch: SettingsPatch = serde_json::from_str(strip_bom(json))
            .map_err(|e| AppError::Settings(format!("Failed to parse settings: {e}")))?;
        Ok(Self::merged(patch))
    }

    /// Load settings from a JSON file.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Settings(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Subscription list for the identity payload.
    pub fn subscriptions(&self) -> Vec<String> {
        parse_event_list(&self.events, self.skip_empty_events)
    }
}

pub(crate) fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{feff}').unwrap_or(text)
}
