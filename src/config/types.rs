use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub transcode: TranscodeConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    6500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    /// Directory scanned for media files at startup.
    #[serde(default = "default_media_dir")]
    pub media_dir: PathBuf,

    /// Probe binary used to read duration and bitrate.
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

fn default_media_dir() -> PathBuf {
    PathBuf::from("./media")
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            ffprobe: default_ffprobe(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TranscodeConfig {
    /// Encoder binary spawned per session.
    #[serde(default = "default_encoder")]
    pub encoder: String,

    /// Directory where transcode artifacts are written.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// How long an unreferenced session is kept before eviction.
    /// Zero evicts on the last release.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,

    /// Interval of the idle-session sweep task.
    #[serde(default = "default_sweep_secs")]
    pub sweep_secs: u64,

    /// Artifact poll interval while waiting for the encoder to produce
    /// more bytes.
    #[serde(default = "default_poll_ms")]
    pub poll_ms: u64,
}

fn default_encoder() -> String {
    "ffmpeg".to_string()
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("./transcode-cache")
}
fn default_retention_secs() -> u64 {
    30
}
fn default_sweep_secs() -> u64 {
    10
}
fn default_poll_ms() -> u64 {
    250
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            encoder: default_encoder(),
            cache_dir: default_cache_dir(),
            retention_secs: default_retention_secs(),
            sweep_secs: default_sweep_secs(),
            poll_ms: default_poll_ms(),
        }
    }
}
