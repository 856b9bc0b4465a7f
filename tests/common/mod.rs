//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] around a
//! temp directory and a stub encoder script, plus helpers for writing
//! stand-in encoder binaries with controlled output, timing and exit
//! codes. [`TestHarness::spawn_server`] starts Axum on a random port for
//! HTTP-level testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::broadcast;

use wavecast::config::Config;
use wavecast::library::{MediaItem, MediaKind, MediaLibrary};
use wavecast::server::{create_router, AppContext};
use wavecast::transcode::{
    event_bus, OutputKind, Quality, SessionEvent, SessionRegistry, TranscodeRequest,
    TranscodeSession, TranscodeState,
};

/// Test harness wrapping a fully-constructed [`AppContext`] backed by a
/// temp directory and a stub encoder.
pub struct TestHarness {
    pub ctx: AppContext,
    pub registry: Arc<SessionRegistry>,
    pub temp: TempDir,
    next_id: AtomicU64,
}

impl TestHarness {
    /// Create a new harness with the default test configuration: stub
    /// encoder, zero retention, fast polling.
    pub fn new() -> Self {
        Self::with_config(|_, _| {})
    }

    /// Create a harness after letting `tune` adjust the config. The temp
    /// root is passed so tuned paths can live inside it.
    pub fn with_config(tune: impl FnOnce(&mut Config, &Path)) -> Self {
        let temp = TempDir::new().expect("failed to create temp dir");
        std::fs::create_dir_all(temp.path().join("media")).expect("failed to create media dir");
        std::fs::create_dir_all(temp.path().join("cache")).expect("failed to create cache dir");

        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.library.media_dir = temp.path().join("media");
        config.transcode.cache_dir = temp.path().join("cache");
        config.transcode.encoder =
            write_stub_encoder(temp.path(), "encoder.sh", "stub output bytes", 0, 0);
        config.transcode.retention_secs = 0;
        config.transcode.sweep_secs = 1;
        config.transcode.poll_ms = 25;

        tune(&mut config, temp.path());

        let events = event_bus();
        let registry = Arc::new(SessionRegistry::new(&config.transcode, events));
        let library = Arc::new(MediaLibrary::new());

        let ctx = AppContext {
            config: Arc::new(config),
            library,
            registry: Arc::clone(&registry),
        };

        Self {
            ctx,
            registry,
            temp,
            next_id: AtomicU64::new(1),
        }
    }

    /// Register an audio item with a 180s duration and 320 kbps bitrate,
    /// backed by a real file in the temp media dir.
    pub fn add_item(&self, file_name: &str) -> MediaItem {
        self.add_item_with(file_name, b"source bytes", Some(180), Some(320))
    }

    pub fn add_item_with(
        &self,
        file_name: &str,
        contents: &[u8],
        duration_seconds: Option<u32>,
        bitrate_kbps: Option<u32>,
    ) -> MediaItem {
        let path = self.ctx.config.library.media_dir.join(file_name);
        std::fs::write(&path, contents).expect("failed to write source file");

        let kind = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaKind::from_extension)
            .unwrap_or(MediaKind::Audio);

        let item = MediaItem {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kind,
            path,
            file_name: file_name.to_string(),
            duration_seconds,
            bitrate_kbps,
            file_size: contents.len() as u64,
        };
        self.ctx.library.add(item.clone());
        item
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.registry.subscribe()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.ctx.config.transcode.cache_dir.clone()
    }

    /// Start the HTTP server on a random port and return its address.
    pub async fn spawn_server(&self) -> SocketAddr {
        let app = create_router(self.ctx.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        addr
    }
}

/// Default shareable transcode request.
pub fn request(target: OutputKind, quality: Quality) -> TranscodeRequest {
    TranscodeRequest {
        target,
        quality,
        offset_seconds: 0,
        length_seconds: None,
        direct: false,
    }
}

/// Wait until the session state satisfies `pred`, returning that state.
pub async fn wait_for_state(
    session: &Arc<TranscodeSession>,
    pred: impl FnMut(&TranscodeState) -> bool,
) -> TranscodeState {
    let mut rx = session.subscribe_state();
    let state = tokio::time::timeout(std::time::Duration::from_secs(5), rx.wait_for(pred))
        .await
        .expect("timed out waiting for session state")
        .expect("session state channel closed");
    *state
}

/// Wait until `path` exists with at least `min_len` bytes, returning its
/// length.
pub async fn wait_for_file(path: &Path, min_len: u64) -> u64 {
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        if let Ok(meta) = std::fs::metadata(path) {
            if meta.len() >= min_len {
                return meta.len();
            }
        }
        assert!(
            std::time::Instant::now() < deadline,
            "timed out waiting for {:?} to reach {} bytes",
            path,
            min_len
        );
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}

/// Write an executable stand-in for the encoder.
///
/// The script treats its last argument as the output path, waits
/// `delay_ms`, writes `payload` to it in one shot and exits with `code`.
/// Payloads must not contain single quotes.
pub fn write_stub_encoder(
    dir: &Path,
    name: &str,
    payload: &str,
    delay_ms: u64,
    code: i32,
) -> String {
    let script = format!(
        "#!/bin/sh\n\
         for arg; do out=$arg; done\n\
         sleep {}.{:03}\n\
         printf '%s' '{}' > \"$out\"\n\
         exit {}\n",
        delay_ms / 1000,
        delay_ms % 1000,
        payload,
        code
    );
    write_script(dir, name, &script)
}

/// Write a stub encoder that appends `chunk` to the output `count` times
/// with `interval_ms` between writes, then exits 0. Lets tests observe a
/// growing artifact and interrupt it midway.
pub fn write_chunked_encoder(
    dir: &Path,
    name: &str,
    chunk: &str,
    count: u32,
    interval_ms: u64,
) -> String {
    let script = format!(
        "#!/bin/sh\n\
         for arg; do out=$arg; done\n\
         : > \"$out\"\n\
         i=0\n\
         while [ $i -lt {} ]; do\n\
         \x20\x20printf '%s' '{}' >> \"$out\"\n\
         \x20\x20sleep {}.{:03}\n\
         \x20\x20i=$((i+1))\n\
         done\n\
         exit 0\n",
        count,
        chunk,
        interval_ms / 1000,
        interval_ms % 1000
    );
    write_script(dir, name, &script)
}

/// Stub encoder that appends one line to `counter` per invocation before
/// writing `payload`. Lets tests prove how many encoder processes ran.
pub fn write_counting_encoder(dir: &Path, name: &str, payload: &str, counter: &Path) -> String {
    let script = format!(
        "#!/bin/sh\n\
         for arg; do out=$arg; done\n\
         echo spawn >> '{}'\n\
         sleep 0.200\n\
         printf '%s' '{}' > \"$out\"\n\
         exit 0\n",
        counter.display(),
        payload
    );
    write_script(dir, name, &script)
}

fn write_script(dir: &Path, name: &str, contents: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write stub encoder");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("failed to mark stub encoder executable");
    path.to_string_lossy().into_owned()
}
