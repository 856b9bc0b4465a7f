//! Transcode session state machine.
//!
//! A session owns one encoder process and the tokio task that reaps it.
//! It performs exactly one terminal transition (`Finished`, `Failed` or
//! `Canceled`) and fires exactly one notification for it; readers observe
//! progress through a watch channel rather than polling the session.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::library::MediaItem;
use crate::transcode::command::encoder_args;
use crate::transcode::events::SessionEvent;
use crate::transcode::target::{OutputKind, Quality};
use crate::transcode::{Result, TranscodeError};

/// Lines of encoder stderr retained for failure diagnostics.
const STDERR_TAIL_LINES: usize = 8;

/// Job lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscodeState {
    /// Constructed, not yet started.
    None,
    /// Encoder running (or pass-through serving, for direct sessions).
    Active,
    /// Encoder exited cleanly; the artifact is complete.
    Finished,
    /// Encoder could not be spawned or exited nonzero.
    Failed,
    /// Explicitly aborted before completion.
    Canceled,
}

impl TranscodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TranscodeState::Finished | TranscodeState::Failed | TranscodeState::Canceled
        )
    }

    /// Terminal without a usable artifact.
    pub fn is_aborted(self) -> bool {
        matches!(self, TranscodeState::Failed | TranscodeState::Canceled)
    }
}

/// Sharing identity of a non-direct session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub item_id: u64,
    pub target: OutputKind,
    pub quality: Quality,
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.item_id, self.target, self.quality)
    }
}

/// Parameters of one transcode request.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest {
    pub target: OutputKind,
    pub quality: Quality,
    pub offset_seconds: u32,
    pub length_seconds: Option<u32>,
    /// Pass the source through untouched instead of encoding.
    pub direct: bool,
}

enum TaskSlot {
    /// Not started.
    Idle,
    /// Background body attached.
    Running(JoinHandle<()>),
    /// Started without a background body (direct, or spawn failed), or
    /// the handle was already consumed by cancel.
    Detached,
}

/// One on-demand transcode job.
pub struct TranscodeSession {
    item: MediaItem,
    target: OutputKind,
    quality: Quality,
    is_direct: bool,
    offset_seconds: u32,
    length_seconds: Option<u32>,
    instance_id: Uuid,
    started_at: DateTime<Utc>,
    cache_dir: PathBuf,
    encoder: String,
    refs: AtomicUsize,
    idle_since: Mutex<Option<Instant>>,
    state_tx: watch::Sender<TranscodeState>,
    task_slot: Mutex<TaskSlot>,
    cancel_token: CancellationToken,
    stderr_tail: Mutex<Vec<String>>,
    events: broadcast::Sender<SessionEvent>,
}

impl TranscodeSession {
    pub fn new(
        item: MediaItem,
        request: TranscodeRequest,
        cache_dir: PathBuf,
        encoder: String,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (state_tx, _) = watch::channel(TranscodeState::None);
        Self {
            item,
            target: request.target,
            quality: request.quality,
            is_direct: request.direct,
            offset_seconds: request.offset_seconds,
            length_seconds: request.length_seconds,
            instance_id: Uuid::new_v4(),
            started_at: Utc::now(),
            cache_dir,
            encoder,
            refs: AtomicUsize::new(0),
            idle_since: Mutex::new(None),
            state_tx,
            task_slot: Mutex::new(TaskSlot::Idle),
            cancel_token: CancellationToken::new(),
            stderr_tail: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn item(&self) -> &MediaItem {
        &self.item
    }

    pub fn target(&self) -> OutputKind {
        self.target
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn is_direct(&self) -> bool {
        self.is_direct
    }

    pub fn offset_seconds(&self) -> u32 {
        self.offset_seconds
    }

    pub fn length_seconds(&self) -> Option<u32> {
        self.length_seconds
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            item_id: self.item.id,
            target: self.target,
            quality: self.quality,
        }
    }

    pub fn state(&self) -> TranscodeState {
        *self.state_tx.borrow()
    }

    /// Watch channel for state transitions, used by artifact readers.
    pub fn subscribe_state(&self) -> watch::Receiver<TranscodeState> {
        self.state_tx.subscribe()
    }

    pub fn reference_count(&self) -> usize {
        self.refs.load(Ordering::SeqCst)
    }

    /// Deterministic artifact location, `None` in direct mode.
    pub fn artifact_path(&self) -> Option<PathBuf> {
        if self.is_direct {
            return None;
        }
        Some(self.cache_dir.join(self.artifact_name()))
    }

    fn artifact_name(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            self.item.kind.type_id(),
            self.item.id,
            self.target,
            self.quality,
            self.target.extension()
        )
    }

    /// Best-known output size in bytes.
    ///
    /// Once finished this is the artifact's real length. Before that it is
    /// a projection from item duration and target bitrate, and `None` when
    /// the duration is unknown. Direct sessions report the source size.
    pub fn estimated_output_size(&self) -> Option<u64> {
        if self.is_direct {
            return Some(self.item.file_size);
        }
        if self.state() == TranscodeState::Finished {
            if let Some(path) = self.artifact_path() {
                if let Ok(metadata) = std::fs::metadata(&path) {
                    return Some(metadata.len());
                }
            }
        }
        let duration = u64::from(self.item.duration_seconds?);
        let kbps = u64::from(self.target.bitrate_kbps(self.quality));
        Some(duration * (kbps * 1024) / 8)
    }

    /// Start the encoder. Idempotent: a second call is a no-op.
    ///
    /// Direct sessions attach no process; starting one only marks it
    /// active. A stale artifact from a previously evicted session is
    /// removed before the encoder is spawned.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut slot = self.task_slot.lock();
        if !matches!(*slot, TaskSlot::Idle) {
            return Ok(());
        }
        self.state_tx.send_replace(TranscodeState::Active);

        let output = match self.artifact_path() {
            Some(path) => path,
            None => {
                *slot = TaskSlot::Detached;
                tracing::debug!(item_id = self.item.id, instance = %self.instance_id, "direct session active");
                return Ok(());
            }
        };

        if output.exists() {
            if let Err(e) = std::fs::remove_file(&output) {
                tracing::warn!(path = %output.display(), error = %e, "failed to remove stale artifact");
            }
        }

        let mut cmd = Command::new(&self.encoder);
        cmd.args(encoder_args(
            &self.item.path,
            &output,
            self.target,
            self.quality,
            self.offset_seconds,
            self.length_seconds,
        ));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                *slot = TaskSlot::Detached;
                drop(slot);
                self.finish(
                    TranscodeState::Failed,
                    format!("failed to spawn '{}': {}", self.encoder, e),
                );
                return Err(TranscodeError::Spawn {
                    encoder: self.encoder.clone(),
                    source: e,
                });
            }
        };

        tracing::info!(key = %self.key(), pid = ?child.id(), "encoder started");
        let task = tokio::spawn(Self::run(Arc::clone(self), child));
        *slot = TaskSlot::Running(task);
        Ok(())
    }

    /// Abort the encoder and wait for the background body to unwind.
    ///
    /// No-op when nothing is attached. Racing a natural completion is
    /// safe: whichever side reaches the terminal transition first wins,
    /// and cancel still waits for the task to finish before returning.
    pub async fn cancel(&self) {
        let task = {
            let mut slot = self.task_slot.lock();
            match std::mem::replace(&mut *slot, TaskSlot::Detached) {
                TaskSlot::Running(task) => task,
                TaskSlot::Idle => {
                    *slot = TaskSlot::Idle;
                    return;
                }
                TaskSlot::Detached => return,
            }
        };

        self.cancel_token.cancel();
        if let Err(e) = task.await {
            tracing::warn!(key = %self.key(), error = %e, "transcode task join failed");
        }
    }

    /// Background body: reap the encoder or kill it on cancellation.
    async fn run(session: Arc<TranscodeSession>, mut child: Child) {
        let drain = child.stderr.take().map(|stderr| {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.drain_stderr(stderr).await })
        });

        let (state, mut reason) = tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => (TranscodeState::Finished, String::new()),
                Ok(status) => (
                    TranscodeState::Failed,
                    format!("encoder exited with {}", status),
                ),
                Err(e) => (
                    TranscodeState::Failed,
                    format!("failed to reap encoder: {}", e),
                ),
            },
            _ = session.cancel_token.cancelled() => {
                if let Err(e) = child.start_kill() {
                    tracing::warn!(key = %session.key(), error = %e, "failed to kill encoder");
                }
                let _ = child.wait().await;
                (TranscodeState::Canceled, "canceled".to_string())
            }
        };

        // Let stderr drain fully so failure reasons carry the tail.
        if let Some(drain) = drain {
            let _ = drain.await;
        }
        if state == TranscodeState::Failed {
            reason.push_str(&session.stderr_excerpt());
        }
        session.finish(state, reason);
    }

    async fn drain_stderr(&self, stderr: ChildStderr) {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(key = %self.key(), "encoder: {}", line);
            let mut tail = self.stderr_tail.lock();
            if tail.len() == STDERR_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }
    }

    fn stderr_excerpt(&self) -> String {
        let tail = self.stderr_tail.lock();
        if tail.is_empty() {
            String::new()
        } else {
            format!(": {}", tail.join(" | "))
        }
    }

    /// Perform the terminal transition and fire its notification.
    /// Only the first caller per instance has any effect.
    fn finish(&self, state: TranscodeState, reason: String) {
        let transitioned = self.state_tx.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = state;
            true
        });
        if !transitioned {
            return;
        }

        match state {
            TranscodeState::Finished => {
                tracing::info!(key = %self.key(), "transcode finished");
                let _ = self.events.send(SessionEvent::Finished { key: self.key() });
            }
            _ => {
                tracing::warn!(key = %self.key(), state = ?state, reason = %reason, "transcode did not complete");
                let _ = self.events.send(SessionEvent::Failed {
                    key: self.key(),
                    reason,
                });
            }
        }
    }

    pub(crate) fn acquire_ref(&self) -> usize {
        self.refs.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn release_ref(&self) -> usize {
        self.refs.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn mark_idle(&self) {
        *self.idle_since.lock() = Some(Instant::now());
    }

    pub(crate) fn clear_idle(&self) {
        *self.idle_since.lock() = None;
    }

    pub(crate) fn idle_for(&self) -> Option<Duration> {
        self.idle_since.lock().map(|since| since.elapsed())
    }
}

impl PartialEq for TranscodeSession {
    /// Direct sessions equal only themselves; everything else compares by
    /// sharing key.
    fn eq(&self, other: &Self) -> bool {
        if self.is_direct || other.is_direct {
            return std::ptr::eq(self, other);
        }
        self.key() == other.key()
    }
}

impl Eq for TranscodeSession {}

impl std::hash::Hash for TranscodeSession {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.is_direct {
            self.instance_id.hash(state);
        } else {
            self.key().hash(state);
        }
    }
}

impl fmt::Debug for TranscodeSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscodeSession")
            .field("key", &self.key())
            .field("direct", &self.is_direct)
            .field("state", &self.state())
            .field("references", &self.reference_count())
            .finish()
    }
}
