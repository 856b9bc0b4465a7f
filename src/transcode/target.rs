//! Transcode targets: output formats, quality tiers, bitrate tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::library::MediaKind;

/// Encoder output format of a transcode job. Closed set; adding a format
/// means adding a variant plus its table rows below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Mp3,
    Aac,
    Ogg,
    Mp4,
    Webm,
}

impl OutputKind {
    /// Media class this format produces.
    pub fn media_kind(self) -> MediaKind {
        match self {
            OutputKind::Mp3 | OutputKind::Aac | OutputKind::Ogg => MediaKind::Audio,
            OutputKind::Mp4 | OutputKind::Webm => MediaKind::Video,
        }
    }

    /// Whether a source of `kind` can be transcoded to this format.
    /// Audio can be extracted from anything; video needs a video source.
    pub fn accepts(self, kind: MediaKind) -> bool {
        match self.media_kind() {
            MediaKind::Audio => true,
            MediaKind::Video => kind == MediaKind::Video,
        }
    }

    /// Artifact file extension.
    pub fn extension(self) -> &'static str {
        match self {
            OutputKind::Mp3 => "mp3",
            OutputKind::Aac => "m4a",
            OutputKind::Ogg => "ogg",
            OutputKind::Mp4 => "mp4",
            OutputKind::Webm => "webm",
        }
    }

    /// MIME type served with the artifact.
    pub fn content_type(self) -> &'static str {
        match self {
            OutputKind::Mp3 => "audio/mpeg",
            OutputKind::Aac => "audio/mp4",
            OutputKind::Ogg => "audio/ogg",
            OutputKind::Mp4 => "video/mp4",
            OutputKind::Webm => "video/webm",
        }
    }

    /// Target bitrate for a quality setting, in kbps.
    pub fn bitrate_kbps(self, quality: Quality) -> u32 {
        match (self.media_kind(), quality) {
            (_, Quality::Kbps(kbps)) => kbps,
            (MediaKind::Audio, Quality::Low) => 64,
            (MediaKind::Audio, Quality::Medium) => 128,
            (MediaKind::Audio, Quality::High) => 192,
            (MediaKind::Audio, Quality::Extreme) => 320,
            (MediaKind::Video, Quality::Low) => 512,
            (MediaKind::Video, Quality::Medium) => 1024,
            (MediaKind::Video, Quality::High) => 1536,
            (MediaKind::Video, Quality::Extreme) => 2048,
        }
    }

    /// Default format for a library item of `kind`.
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => OutputKind::Mp3,
            MediaKind::Video => OutputKind::Mp4,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::Mp3 => "mp3",
            OutputKind::Aac => "aac",
            OutputKind::Ogg => "ogg",
            OutputKind::Mp4 => "mp4",
            OutputKind::Webm => "webm",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for OutputKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputKind::Mp3),
            "aac" | "m4a" => Ok(OutputKind::Aac),
            "ogg" => Ok(OutputKind::Ogg),
            "mp4" => Ok(OutputKind::Mp4),
            "webm" => Ok(OutputKind::Webm),
            other => Err(format!("unknown output kind: {}", other)),
        }
    }
}

/// Requested output quality: a named tier or a literal bitrate.
///
/// Raw values 0-3 select the tiers; anything larger is taken as an
/// explicit bitrate in kbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u32", from = "u32")]
pub enum Quality {
    Low,
    Medium,
    High,
    Extreme,
    Kbps(u32),
}

impl Quality {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Quality::Low,
            1 => Quality::Medium,
            2 => Quality::High,
            3 => Quality::Extreme,
            kbps => Quality::Kbps(kbps),
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            Quality::Low => 0,
            Quality::Medium => 1,
            Quality::High => 2,
            Quality::Extreme => 3,
            Quality::Kbps(kbps) => kbps,
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Medium
    }
}

impl From<u32> for Quality {
    fn from(raw: u32) -> Self {
        Quality::from_raw(raw)
    }
}

impl From<Quality> for u32 {
    fn from(quality: Quality) -> Self {
        quality.as_raw()
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Low => write!(f, "low"),
            Quality::Medium => write!(f, "medium"),
            Quality::High => write!(f, "high"),
            Quality::Extreme => write!(f, "extreme"),
            Quality::Kbps(kbps) => write!(f, "{}", kbps),
        }
    }
}
