//! Identity handshake sent on transport open.

use crate::credentials::Credentials;
use crate::error::WsResult;
use serde::Serialize;

/// Who this client claims to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub author: String,
    pub website: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            author: "socket-receiver".to_string(),
            website: "https://github.com/socket-receiver/socket-receiver".to_string(),
        }
    }
}

/// Identity payload, serialized once per successful transport open.
#[derive(Debug, Clone, Serialize)]
pub struct AuthPayload<'a> {
    pub author: &'a str,
    pub website: &'a str,
    pub api_key: &'a str,
    pub events: &'a [String],
}

impl<'a> AuthPayload<'a> {
    pub fn new(identity: &'a Identity, credentials: &'a Credentials, events: &'a [String]) -> Self {
        Self {
            author: &identity.author,
            website: &identity.website,
            api_key: credentials.key(),
            events,
        }
    }

    pub fn to_frame(&self) -> WsResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Split the configured comma-separated subscription list.
///
/// Entries are trimmed. Empty entries are kept unless `skip_empty` is set.
pub fn parse_event_list(raw: &str, skip_empty: bool) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !(skip_empty && name.is_empty()))
        .map(str::to_string)
        .collect()
}
