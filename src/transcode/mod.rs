//! On-demand transcoding: sessions, sharing registry and encoder plumbing.

pub mod command;
pub mod events;
pub mod registry;
pub mod session;
pub mod target;

pub use events::{event_bus, SessionEvent};
pub use registry::{spawn_sweep_task, SessionLease, SessionRegistry, SessionSnapshot};
pub use session::{SessionKey, TranscodeRequest, TranscodeSession, TranscodeState};
pub use target::{OutputKind, Quality};

/// Errors surfaced when acquiring or starting a transcode job.
#[derive(Debug, thiserror::Error)]
pub enum TranscodeError {
    #[error("cannot produce {target} output from {kind} source")]
    UnsupportedTarget {
        kind: crate::library::MediaKind,
        target: OutputKind,
    },

    #[error("failed to spawn encoder '{encoder}'")]
    Spawn {
        encoder: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, TranscodeError>;
