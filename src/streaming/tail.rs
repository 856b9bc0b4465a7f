//! Tail-follow reader for a growing transcode artifact.
//!
//! End-of-file on the artifact is not end-of-stream while the encoder is
//! still running. The follower distinguishes the two through the session's
//! state channel: on EOF it waits for either a state change or a poll
//! tick, and only once the state is terminal does it drain the remaining
//! bytes and end. A finished session ends the stream cleanly; a failed or
//! canceled one surfaces an explicit error so clients never mistake a
//! truncated artifact for a complete one.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;

use crate::transcode::TranscodeState;

/// Read granularity for artifact tailing.
const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TailError {
    #[error("artifact read failed")]
    Artifact(#[from] std::io::Error),

    #[error("transcode aborted in state {state:?}")]
    Aborted { state: TranscodeState },
}

struct Follower {
    path: PathBuf,
    file: Option<File>,
    offset: u64,
    state: watch::Receiver<TranscodeState>,
    poll_interval: Duration,
    draining: bool,
    done: bool,
}

impl Follower {
    /// Read the next chunk from the current offset.
    ///
    /// `Ok(None)` means no bytes are available right now; a missing file
    /// counts as that, since the encoder may not have created it yet.
    async fn read_chunk(&mut self) -> std::io::Result<Option<Bytes>> {
        let file = match &mut self.file {
            Some(file) => file,
            None => {
                let mut file = match File::open(&self.path).await {
                    Ok(file) => file,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(e),
                };
                if self.offset > 0 {
                    file.seek(SeekFrom::Start(self.offset)).await?;
                }
                self.file.insert(file)
            }
        };

        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        self.offset += n as u64;
        Ok(Some(Bytes::from(buf)))
    }

    /// Park until the session state changes or a poll tick elapses.
    /// A dropped state sender flips straight to draining so the stream
    /// settles instead of waiting on a channel that will never fire.
    async fn wait_for_progress(&mut self) {
        tokio::select! {
            changed = self.state.changed() => {
                if changed.is_err() {
                    self.draining = true;
                }
            }
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }
}

/// Stream the artifact at `path` from the beginning, following appends
/// until the owning session reaches a terminal state.
pub fn follow(
    path: PathBuf,
    state: watch::Receiver<TranscodeState>,
    poll_interval: Duration,
) -> impl Stream<Item = Result<Bytes, TailError>> {
    let follower = Follower {
        path,
        file: None,
        offset: 0,
        state,
        poll_interval,
        draining: false,
        done: false,
    };

    futures::stream::unfold(follower, |mut f| async move {
        loop {
            if f.done {
                return None;
            }
            match f.read_chunk().await {
                Ok(Some(bytes)) => return Some((Ok(bytes), f)),
                Ok(None) => {
                    if f.draining {
                        // Artifact fully drained; how the stream ends
                        // depends on how the session ended.
                        let state = *f.state.borrow();
                        if state == TranscodeState::Finished {
                            return None;
                        }
                        f.done = true;
                        return Some((Err(TailError::Aborted { state }), f));
                    }
                    let state = *f.state.borrow_and_update();
                    if state.is_terminal() {
                        f.draining = true;
                    } else {
                        f.wait_for_progress().await;
                    }
                }
                Err(e) => {
                    f.done = true;
                    return Some((Err(TailError::Artifact(e)), f));
                }
            }
        }
    })
}
