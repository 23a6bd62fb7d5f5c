//! Integration tests for sockrx-app.
//!
//! These tests drive the application against a local mock socket:
//! - Identity handshake and readiness
//! - Event forwarding
//! - Recovery after a dropped or silent connection

pub mod common;
