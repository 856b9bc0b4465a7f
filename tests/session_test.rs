//! Session-level properties: size estimation, artifact naming, equality.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{request, wait_for_state, TestHarness};
use wavecast::library::{MediaItem, MediaKind};
use wavecast::transcode::{
    event_bus, OutputKind, Quality, TranscodeRequest, TranscodeSession, TranscodeState,
};

fn audio_item(id: u64, duration: Option<u32>) -> MediaItem {
    MediaItem {
        id,
        kind: MediaKind::Audio,
        path: PathBuf::from("/media/song.flac"),
        file_name: "song.flac".to_string(),
        duration_seconds: duration,
        bitrate_kbps: Some(1411),
        file_size: 44_100_000,
    }
}

fn session(item: MediaItem, req: TranscodeRequest) -> Arc<TranscodeSession> {
    Arc::new(TranscodeSession::new(
        item,
        req,
        PathBuf::from("/tmp/cache"),
        "ffmpeg".to_string(),
        event_bus(),
    ))
}

#[test]
fn estimate_projects_duration_times_bitrate() {
    // 180 seconds at 320 kbps: 180 * (320 * 1024) / 8 bytes.
    let s = session(
        audio_item(1, Some(180)),
        request(OutputKind::Mp3, Quality::Extreme),
    );
    assert_eq!(s.estimated_output_size(), Some(7_372_800));

    let s = session(
        audio_item(1, Some(180)),
        request(OutputKind::Mp3, Quality::Kbps(192)),
    );
    assert_eq!(s.estimated_output_size(), Some(4_423_680));
}

#[test]
fn estimate_unknown_without_duration() {
    let s = session(audio_item(1, None), request(OutputKind::Mp3, Quality::High));
    assert_eq!(s.estimated_output_size(), None);
}

#[test]
fn direct_estimate_is_source_size() {
    let req = TranscodeRequest {
        direct: true,
        ..request(OutputKind::Mp3, Quality::High)
    };
    let s = session(audio_item(1, None), req);
    assert_eq!(s.estimated_output_size(), Some(44_100_000));
}

#[tokio::test]
async fn finished_estimate_is_actual_artifact_length() {
    let h = TestHarness::new();
    let item = h.add_item("song.flac");

    let lease = h
        .registry
        .acquire(&item, request(OutputKind::Mp3, Quality::Medium))
        .await
        .unwrap();
    wait_for_state(lease.session(), |s| s.is_terminal()).await;
    assert_eq!(lease.session().state(), TranscodeState::Finished);

    let artifact = lease.session().artifact_path().unwrap();
    let on_disk = std::fs::metadata(&artifact).unwrap().len();
    // "stub output bytes" from the default stub encoder, not a projection.
    assert_eq!(on_disk, 17);
    assert_eq!(lease.session().estimated_output_size(), Some(on_disk));
}

#[test]
fn artifact_name_encodes_identity() {
    let s = session(
        audio_item(7, Some(60)),
        request(OutputKind::Mp3, Quality::Kbps(192)),
    );
    assert_eq!(
        s.artifact_path(),
        Some(PathBuf::from("/tmp/cache/1_7_mp3_192.mp3"))
    );

    let video = MediaItem {
        id: 9,
        kind: MediaKind::Video,
        path: PathBuf::from("/media/movie.mkv"),
        file_name: "movie.mkv".to_string(),
        duration_seconds: Some(5400),
        bitrate_kbps: None,
        file_size: 1,
    };
    let s = session(video, request(OutputKind::Mp4, Quality::Medium));
    assert_eq!(
        s.artifact_path(),
        Some(PathBuf::from("/tmp/cache/2_9_mp4_medium.mp4"))
    );
}

#[test]
fn direct_sessions_have_no_artifact() {
    let req = TranscodeRequest {
        direct: true,
        ..request(OutputKind::Mp3, Quality::Medium)
    };
    let s = session(audio_item(1, Some(60)), req);
    assert_eq!(s.artifact_path(), None);
}

#[test]
fn equality_follows_sharing_key() {
    let a = session(
        audio_item(1, Some(60)),
        request(OutputKind::Mp3, Quality::Kbps(128)),
    );
    let b = session(
        audio_item(1, Some(60)),
        request(OutputKind::Mp3, Quality::Kbps(128)),
    );
    let c = session(
        audio_item(1, Some(60)),
        request(OutputKind::Mp3, Quality::Kbps(192)),
    );
    let d = session(
        audio_item(2, Some(60)),
        request(OutputKind::Mp3, Quality::Kbps(128)),
    );

    // Distinct instances, same identity.
    assert_eq!(*a, *b);
    assert_ne!(a.instance_id(), b.instance_id());
    // Quality and item feed the identity.
    assert_ne!(*a, *c);
    assert_ne!(*a, *d);
}

#[test]
fn direct_sessions_equal_only_themselves() {
    let req = TranscodeRequest {
        direct: true,
        ..request(OutputKind::Mp3, Quality::Kbps(128))
    };
    let a = session(audio_item(1, Some(60)), req);
    let b = session(audio_item(1, Some(60)), req);
    let shared = session(audio_item(1, Some(60)), request(OutputKind::Mp3, Quality::Kbps(128)));

    assert_eq!(*a, *a);
    assert_ne!(*a, *b);
    assert_ne!(*a, *shared);
    assert_ne!(*shared, *a);
}

#[test]
fn new_sessions_begin_unstarted() {
    let s = session(
        audio_item(1, Some(60)),
        request(OutputKind::Mp3, Quality::Medium),
    );
    assert_eq!(s.state(), TranscodeState::None);
    assert_eq!(s.reference_count(), 0);
}
