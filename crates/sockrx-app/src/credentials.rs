//! Credential file parsing.
//!
//! The local socket writes its API key and endpoint to a small script file,
//! e.g. `var API_Key = "0a1b..."; var API_Socket = "ws://127.0.0.1:3337/streamlabs";`.
//! Both values are pulled out with one pattern. A missing file or a missing
//! match disables the socket; it is not an error.

use crate::settings::strip_bom;
use once_cell::sync::Lazy;
use regex::Regex;
use sockrx_ws::Credentials;
use std::path::Path;
use tracing::{debug, warn};

static CREDENTIALS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)"\s?(?P<key>[0-9a-f]+)".*?"\s?(?P<socket>ws://[0-9.:a-z]+(?:/\w+)+)""#)
        .unwrap_or_else(|_| unreachable!())
});

/// Extract key and endpoint from the credential file contents.
pub fn parse_credentials(text: &str) -> Option<Credentials> {
    let captures = CREDENTIALS_REGEX.captures(strip_bom(text))?;
    let key = captures.name("key")?.as_str();
    let socket = captures.name("socket")?.as_str();
    Some(Credentials::new(key, socket))
}

/// Read the credential file. Any failure yields `None`.
pub fn load_credentials(path: &Path) -> Option<Credentials> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not read API key file");
            return None;
        }
    };

    match parse_credentials(&content) {
        Some(credentials) => {
            debug!(endpoint = %credentials.endpoint(), "Loaded API key and socket endpoint");
            Some(credentials)
        }
        None => {
            warn!(path = %path.display(), "No API key and socket endpoint found in file");
            None
        }
    }
}
