//! Session completion notifications.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::transcode::session::SessionKey;

/// Bus capacity; slow subscribers lag rather than block producers.
const EVENT_BUS_CAPACITY: usize = 64;

/// Terminal notification for a transcode session.
///
/// Fired at most once per session instance, by whichever context performs
/// the terminal transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The encoder exited cleanly; the artifact is complete.
    Finished { key: SessionKey },
    /// The job failed or was canceled before completing.
    Failed { key: SessionKey, reason: String },
}

/// Create the session event bus.
pub fn event_bus() -> broadcast::Sender<SessionEvent> {
    broadcast::channel(EVENT_BUS_CAPACITY).0
}
