//! Typed engine events.
//!
//! The reconciler, outbox, and presence layer all publish to one dispatcher
//! that UI collaborators subscribe to; there are no ad hoc global event
//! names anywhere in the engine.

use tokio::sync::broadcast;

use crate::duplicate::CrossDeviceDuplicate;
use crate::models::DeviceInfo;

/// Connectivity state machine for a sync session.
///
/// `Disconnected` is only reachable via explicit cleanup; `Error` and
/// `Offline` are side branches from any active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Syncing,
    Error,
    Offline,
}

/// Session-ending conditions that must not be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// Credentials expired; re-authentication required
    AuthExpired,
    /// The race was deleted server-side
    RaceDeleted,
}

/// Events published by the sync engine
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Connectivity changed; carries the last successful poll (Unix ms)
    Status {
        status: ConnectionStatus,
        last_poll: Option<i64>,
    },
    /// A poll applied this many new remote entries (zero polls stay silent)
    Synced { applied: usize },
    /// Transient sync failure, surfaced for diagnostics
    SyncError { message: String },
    /// Advisory cross-device duplicate flagged on a local recording
    Duplicate(CrossDeviceDuplicate),
    /// A device heartbeat arrived over the presence channel
    Presence(DeviceInfo),
    /// The session hit a non-retryable condition and was torn down
    Terminal(TerminalReason),
}

/// Broadcast dispatcher for [`EngineEvent`]s.
///
/// Best-effort: publishing with no subscribers is not an error, and slow
/// subscribers may observe lag rather than block the engine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to engine events from this point onward.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: EngineEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
