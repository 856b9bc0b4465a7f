//! Encoder command-line construction.

use std::ffi::OsString;
use std::path::Path;

use crate::transcode::target::{OutputKind, Quality};

/// Build the argument list for one encoder invocation.
///
/// Seek (`-ss`) is applied before the input for fast keyframe seeking;
/// MP4-family outputs are fragmented so the artifact stays parseable
/// while it grows.
pub fn encoder_args(
    source: &Path,
    output: &Path,
    target: OutputKind,
    quality: Quality,
    offset_seconds: u32,
    length_seconds: Option<u32>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-loglevel".into(), "error".into()];

    if offset_seconds > 0 {
        args.push("-ss".into());
        args.push(offset_seconds.to_string().into());
    }
    args.push("-i".into());
    args.push(source.into());
    if let Some(length) = length_seconds {
        args.push("-t".into());
        args.push(length.to_string().into());
    }

    let kbps = target.bitrate_kbps(quality);
    match target {
        OutputKind::Mp3 => args.extend([
            "-vn".into(),
            "-acodec".into(),
            "libmp3lame".into(),
            "-b:a".into(),
            format!("{}k", kbps).into(),
        ]),
        OutputKind::Aac => args.extend([
            "-vn".into(),
            "-acodec".into(),
            "aac".into(),
            "-b:a".into(),
            format!("{}k", kbps).into(),
            "-movflags".into(),
            "frag_keyframe+empty_moov".into(),
        ]),
        OutputKind::Ogg => args.extend([
            "-vn".into(),
            "-acodec".into(),
            "libvorbis".into(),
            "-b:a".into(),
            format!("{}k", kbps).into(),
        ]),
        OutputKind::Mp4 => args.extend([
            "-vcodec".into(),
            "libx264".into(),
            "-preset".into(),
            "veryfast".into(),
            "-b:v".into(),
            format!("{}k", kbps).into(),
            "-acodec".into(),
            "aac".into(),
            "-b:a".into(),
            "128k".into(),
            "-movflags".into(),
            "frag_keyframe+empty_moov".into(),
        ]),
        OutputKind::Webm => args.extend([
            "-vcodec".into(),
            "libvpx".into(),
            "-b:v".into(),
            format!("{}k", kbps).into(),
            "-acodec".into(),
            "libvorbis".into(),
            "-b:a".into(),
            "128k".into(),
        ]),
    }

    args.push(output.into());
    args
}
