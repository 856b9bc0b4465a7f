//! Session sharing and lifecycle.
//!
//! The registry deduplicates concurrent requests for the same (item,
//! target, quality): the first acquire creates and starts the session,
//! later ones join it. Sessions are evicted when their reference count
//! reaches zero, either immediately or after an idle retention window so
//! a paused player can resume without a fresh encode.
//!
//! Artifact deletion happens inside the map predicate, while the key is
//! still occupied. A successor session for the same key can only be
//! created once the key is vacant, so an evicted session can never
//! delete its successor's artifact.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::TranscodeConfig;
use crate::library::MediaItem;
use crate::transcode::events::SessionEvent;
use crate::transcode::session::{SessionKey, TranscodeRequest, TranscodeSession, TranscodeState};
use crate::transcode::{Result, TranscodeError};

#[derive(Debug)]
pub struct SessionRegistry {
    /// Shareable sessions, keyed by (item, target, quality).
    shared: DashMap<SessionKey, Arc<TranscodeSession>>,
    /// Direct sessions are never shared; each lives under its own id.
    direct: DashMap<Uuid, Arc<TranscodeSession>>,
    events: broadcast::Sender<SessionEvent>,
    cache_dir: PathBuf,
    encoder: String,
    retention: Duration,
}

enum Acquired {
    Hit(Arc<TranscodeSession>),
    Created(Arc<TranscodeSession>),
    Stale(Arc<TranscodeSession>),
}

impl SessionRegistry {
    pub fn new(config: &TranscodeConfig, events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            shared: DashMap::new(),
            direct: DashMap::new(),
            events,
            cache_dir: config.cache_dir.clone(),
            encoder: config.encoder.clone(),
            retention: Duration::from_secs(config.retention_secs),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Join or create the session for `request`, holding one reference.
    ///
    /// A terminal session found under the key is evicted and rebuilt
    /// unless it finished cleanly, in which case its artifact is served
    /// as-is. Failure to start a created session removes it again before
    /// the error is returned.
    pub async fn acquire(
        self: &Arc<Self>,
        item: &MediaItem,
        request: TranscodeRequest,
    ) -> Result<SessionLease> {
        if request.direct {
            let session = self.build_session(item, request);
            session.acquire_ref();
            session.start()?;
            self.direct.insert(session.instance_id(), Arc::clone(&session));
            tracing::debug!(item_id = item.id, instance = %session.instance_id(), "direct session acquired");
            return Ok(self.lease(session));
        }

        if !request.target.accepts(item.kind) {
            return Err(TranscodeError::UnsupportedTarget {
                kind: item.kind,
                target: request.target,
            });
        }

        let key = SessionKey {
            item_id: item.id,
            target: request.target,
            quality: request.quality,
        };

        loop {
            let acquired = match self.shared.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    if occupied.get().state().is_aborted() {
                        remove_artifact(occupied.get());
                        Acquired::Stale(occupied.remove())
                    } else {
                        let session = Arc::clone(occupied.get());
                        session.acquire_ref();
                        session.clear_idle();
                        Acquired::Hit(session)
                    }
                }
                Entry::Vacant(vacant) => {
                    let session = self.build_session(item, request);
                    session.acquire_ref();
                    vacant.insert(Arc::clone(&session));
                    Acquired::Created(session)
                }
            };

            match acquired {
                Acquired::Hit(session) => {
                    tracing::debug!(key = %key, references = session.reference_count(), "joined existing session");
                    return Ok(self.lease(session));
                }
                Acquired::Created(session) => {
                    if let Err(e) = session.start() {
                        self.shared
                            .remove_if(&key, |_, current| Arc::ptr_eq(current, &session));
                        session.release_ref();
                        return Err(e);
                    }
                    return Ok(self.lease(session));
                }
                Acquired::Stale(stale) => {
                    tracing::debug!(key = %key, state = ?stale.state(), "replacing aborted session");
                    stale.cancel().await;
                }
            }
        }
    }

    fn build_session(&self, item: &MediaItem, request: TranscodeRequest) -> Arc<TranscodeSession> {
        Arc::new(TranscodeSession::new(
            item.clone(),
            request,
            self.cache_dir.clone(),
            self.encoder.clone(),
            self.events.clone(),
        ))
    }

    fn lease(self: &Arc<Self>, session: Arc<TranscodeSession>) -> SessionLease {
        SessionLease {
            registry: Arc::clone(self),
            session,
        }
    }

    /// Drop one reference. The last reference evicts the session, either
    /// immediately (zero retention) or by marking it idle for the sweeper.
    fn release(&self, session: &Arc<TranscodeSession>) {
        let remaining = session.release_ref();

        if session.is_direct() {
            if remaining == 0 {
                self.direct.remove(&session.instance_id());
                spawn_reap(Arc::clone(session));
            }
            return;
        }

        if remaining > 0 {
            return;
        }
        if self.retention.is_zero() {
            let evicted = self.evict_if(&session.key(), |current| {
                Arc::ptr_eq(current, session) && current.reference_count() == 0
            });
            if let Some(victim) = evicted {
                spawn_reap(victim);
            }
        } else {
            session.mark_idle();
        }
    }

    /// Evict sessions that have sat unreferenced for the retention
    /// window. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let candidates: Vec<SessionKey> = self
            .shared
            .iter()
            .filter(|entry| {
                entry.reference_count() == 0
                    && entry.idle_for().is_some_and(|idle| idle >= self.retention)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            let victim = self.evict_if(&key, |current| {
                current.reference_count() == 0
                    && current.idle_for().is_some_and(|idle| idle >= self.retention)
            });
            if let Some(victim) = victim {
                tracing::debug!(key = %key, "evicted idle session");
                victim.cancel().await;
                evicted += 1;
            }
        }
        evicted
    }

    /// Cancel one session by instance id. Returns false when unknown.
    pub async fn cancel_instance(&self, instance_id: Uuid) -> bool {
        let key = self
            .shared
            .iter()
            .find(|entry| entry.instance_id() == instance_id)
            .map(|entry| entry.key().clone());
        if let Some(key) = key {
            if let Some(victim) = self.evict_if(&key, |current| current.instance_id() == instance_id) {
                victim.cancel().await;
                return true;
            }
        }

        if let Some((_, victim)) = self.direct.remove(&instance_id) {
            victim.cancel().await;
            return true;
        }
        false
    }

    /// Cancel everything. Used on shutdown.
    pub async fn cancel_all(&self) {
        let keys: Vec<SessionKey> = self.shared.iter().map(|e| e.key().clone()).collect();
        let mut count = 0;
        for key in keys {
            if let Some(victim) = self.evict_if(&key, |_| true) {
                victim.cancel().await;
                count += 1;
            }
        }

        let ids: Vec<Uuid> = self.direct.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, victim)) = self.direct.remove(&id) {
                victim.cancel().await;
                count += 1;
            }
        }
        if count > 0 {
            tracing::info!(count, "canceled all transcode sessions");
        }
    }

    /// Remove the entry at `key` when `condition` holds, unlinking its
    /// artifact before the key becomes vacant.
    fn evict_if<F>(&self, key: &SessionKey, condition: F) -> Option<Arc<TranscodeSession>>
    where
        F: FnOnce(&Arc<TranscodeSession>) -> bool,
    {
        self.shared
            .remove_if(key, |_, current| {
                if !condition(current) {
                    return false;
                }
                remove_artifact(current);
                true
            })
            .map(|(_, victim)| victim)
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> = self
            .shared
            .iter()
            .map(|entry| SessionSnapshot::from_session(entry.value()))
            .chain(
                self.direct
                    .iter()
                    .map(|entry| SessionSnapshot::from_session(entry.value())),
            )
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.shared.len() + self.direct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.direct.is_empty()
    }
}

/// Reap a session's encoder without blocking the caller.
fn spawn_reap(session: Arc<TranscodeSession>) {
    tokio::spawn(async move {
        session.cancel().await;
    });
}

/// Unlink a session's artifact, tolerating its absence.
fn remove_artifact(session: &TranscodeSession) {
    if let Some(path) = session.artifact_path() {
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact");
            }
        }
    }
}

/// One held reference to a session. Dropping it releases the reference;
/// registry bookkeeping runs synchronously so a client disconnect frees
/// the session even when the response future is simply dropped.
#[derive(Debug)]
pub struct SessionLease {
    registry: Arc<SessionRegistry>,
    session: Arc<TranscodeSession>,
}

impl SessionLease {
    pub fn session(&self) -> &Arc<TranscodeSession> {
        &self.session
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.registry.release(&self.session);
    }
}

/// Serializable view of one live session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub instance_id: Uuid,
    pub item_id: u64,
    pub target: crate::transcode::target::OutputKind,
    pub quality: crate::transcode::target::Quality,
    pub direct: bool,
    pub state: TranscodeState,
    pub references: usize,
    pub started_at: DateTime<Utc>,
    pub estimated_size: Option<u64>,
}

impl SessionSnapshot {
    fn from_session(session: &Arc<TranscodeSession>) -> Self {
        Self {
            instance_id: session.instance_id(),
            item_id: session.item().id,
            target: session.target(),
            quality: session.quality(),
            direct: session.is_direct(),
            state: session.state(),
            references: session.reference_count(),
            started_at: session.started_at(),
            estimated_size: session.estimated_output_size(),
        }
    }
}

/// Spawn the periodic eviction task for idle sessions.
pub fn spawn_sweep_task(registry: Arc<SessionRegistry>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let evicted = registry.sweep().await;
            if evicted > 0 {
                tracing::debug!(evicted, "session sweep complete");
            }
        }
    })
}
