//! Duration and bitrate probing via ffprobe.
//!
//! The engine only needs two facts about a source file, so the probe
//! surface is deliberately small. The [`Prober`] trait is the seam used
//! to substitute a canned prober in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Errors raised while probing a source file.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    /// The probe binary is not installed or not on PATH.
    #[error("tool not found: {tool}")]
    ToolNotFound { tool: String },

    /// The probe binary ran but reported failure.
    #[error("tool execution failed: {tool}: {message}")]
    ToolFailed { tool: String, message: String },

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Probe output could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Media facts the engine consumes from a source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeInfo {
    pub duration_seconds: Option<u32>,
    pub bitrate_kbps: Option<u32>,
}

/// Probe backend seam.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<ProbeInfo>;
}

/// Probes by shelling out to ffprobe.
pub struct FfprobeProber {
    binary: String,
}

impl FfprobeProber {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<ProbeInfo> {
        let output = Command::new(&self.binary)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProbeError::ToolNotFound {
                        tool: self.binary.clone(),
                    }
                } else {
                    ProbeError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProbeError::ToolFailed {
                tool: self.binary.clone(),
                message: stderr.trim().to_string(),
            });
        }

        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        Ok(extract_info(parsed))
    }
}

/// Fixed-answer prober for tests and offline seeding.
pub struct StaticProber {
    info: ProbeInfo,
}

impl StaticProber {
    pub fn new(info: ProbeInfo) -> Self {
        Self { info }
    }
}

#[async_trait]
impl Prober for StaticProber {
    async fn probe(&self, _path: &Path) -> Result<ProbeInfo> {
        Ok(self.info)
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    bit_rate: Option<String>,
}

fn extract_info(output: FfprobeOutput) -> ProbeInfo {
    let duration_seconds = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .map(|secs| secs.round() as u32);

    // Some containers only report bitrate per stream; fall back to the
    // first audio/video stream that carries one.
    let bitrate_bps = output
        .format
        .as_ref()
        .and_then(|f| f.bit_rate.as_deref())
        .and_then(|s| s.parse::<u64>().ok())
        .or_else(|| {
            output
                .streams
                .iter()
                .filter(|s| {
                    matches!(s.codec_type.as_deref(), Some("audio") | Some("video"))
                })
                .find_map(|s| s.bit_rate.as_deref().and_then(|b| b.parse::<u64>().ok()))
        });

    ProbeInfo {
        duration_seconds,
        bitrate_kbps: bitrate_bps.map(|bps| (bps / 1000) as u32),
    }
}

/// Availability of one external tool.
#[derive(Debug)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    pub path: Option<PathBuf>,
}

/// Locate the external binaries the server shells out to.
pub fn check_tools(encoder: &str, prober: &str) -> Vec<ToolStatus> {
    [encoder, prober]
        .iter()
        .map(|name| {
            let path = which::which(name).ok();
            ToolStatus {
                name: name.to_string(),
                available: path.is_some(),
                path,
            }
        })
        .collect()
}
