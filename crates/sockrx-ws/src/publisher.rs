//! Event publishing.

use crate::decoder::DecodedEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Sink for decoded events.
///
/// Called synchronously from the dispatch loop. An implementation that
/// blocks stalls dispatch of every later frame.
#[cfg_attr(test, mockall::automock)]
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: DecodedEvent);
}

/// Best-effort publisher backed by a bounded tokio channel.
///
/// Drops the event (with a warning) when the consumer lags or is gone.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<DecodedEvent>,
}

impl ChannelPublisher {
    pub fn new(tx: mpsc::Sender<DecodedEvent>) -> Self {
        Self { tx }
    }

    /// Create a publisher together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DecodedEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

impl EventPublisher for ChannelPublisher {
    fn publish(&self, event: DecodedEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(kind = %event.kind, "Event consumer lagging, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                warn!(kind = %event.kind, "Event receiver dropped");
            }
        }
    }
}
