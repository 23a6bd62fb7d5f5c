//! Credentials for the local event socket.

use std::fmt;
use zeroize::Zeroizing;

/// API key and endpoint for the local socket.
///
/// Immutable once constructed. The key is wiped from memory on drop and never
/// printed by `Debug`.
#[derive(Clone)]
pub struct Credentials {
    key: Zeroizing<String>,
    endpoint: String,
}

impl Credentials {
    pub fn new(key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            key: Zeroizing::new(key.into()),
            endpoint: endpoint.into(),
        }
    }

    /// Hex API key sent in the identity payload.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `ws://host:port/path` endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key", &"<redacted>")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
