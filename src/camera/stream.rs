use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{oneshot, watch};
use tracing::{info, warn};

use crate::core::{
    errors::CameraResult,
    status::{CameraMode, StatusFeed, StreamInfo},
};

use super::traits::{CameraAdapter, CaptureProfile};

/// Reader end of the single-slot frame cell. Each call waits for a frame
/// newer than the last one seen and copies it out; intermediate frames a
/// slow reader missed are simply gone, which keeps delivery fresh and
/// memory bounded.
pub struct FrameReader {
    rx: watch::Receiver<Option<Bytes>>,
}

impl FrameReader {
    pub fn new(rx: watch::Receiver<Option<Bytes>>) -> Self {
        Self { rx }
    }

    /// Next frame, or None once the stream session has ended.
    pub async fn next(&mut self) -> Option<Bytes> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }
}

/// Continuous-encode loop. Arms the hardware, reports readiness through
/// `armed`, then overwrites the frame cell with every produced frame until
/// cancelled or the source dries up. Always releases the camera and
/// restores the still profile before publishing a terminal status.
///
/// The worker owns the mode publishes for its own lifetime: Streaming goes
/// out before the armed signal, the terminal Idle after teardown. Both run
/// on this task, so a source that dies right after arming can never leave
/// a stale Streaming snapshot behind.
pub(crate) async fn run_stream_worker<A: CameraAdapter>(
    adapter: Arc<A>,
    frames: watch::Sender<Option<Bytes>>,
    mut cancel: watch::Receiver<bool>,
    status: StatusFeed,
    armed: oneshot::Sender<CameraResult<()>>,
    info: StreamInfo,
) {
    let arm = async {
        adapter.configure(CaptureProfile::VideoStream).await?;
        adapter.start().await?;
        adapter.start_stream().await
    };

    let mut source = match arm.await {
        Ok(source) => source,
        Err(err) => {
            release(&adapter).await;
            let _ = armed.send(Err(err));
            return;
        }
    };

    status.update(|s| {
        s.mode = CameraMode::Streaming;
        s.stream = Some(info);
        s.last_error = None;
    });

    let mut failure: Option<String> = None;
    if armed.send(Ok(())).is_err() {
        // Caller gave up during arming; unwind through the usual teardown.
        info!("stream caller went away during arming");
    } else {
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!("stream worker cancelled");
                        break;
                    }
                }
                frame = source.next_frame() => {
                    match frame {
                        Ok(Some(frame)) => {
                            frames.send_replace(Some(frame));
                        }
                        Ok(None) => {
                            warn!("stream frame source ended");
                            failure = Some("stream source ended unexpectedly".to_string());
                            break;
                        }
                        Err(err) => {
                            warn!("stream frame source failed: {err}");
                            failure = Some(err.to_string());
                            break;
                        }
                    }
                }
            }
        }
    }

    if let Err(err) = source.shutdown().await {
        warn!("stream source shutdown failed: {err}");
    }
    release(&adapter).await;

    status.update(|s| {
        s.mode = CameraMode::Idle;
        s.stream = None;
        if let Some(message) = failure {
            s.last_error = Some(message);
        }
    });
    // Dropping the sender wakes every blocked FrameReader with None.
    drop(frames);
}

async fn release<A: CameraAdapter>(adapter: &Arc<A>) {
    if let Err(err) = adapter.stop().await {
        warn!("camera stop after stream failed: {err}");
    }
    if let Err(err) = adapter.configure(CaptureProfile::Still).await {
        warn!("still profile restore after stream failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::sync::watch;

    use super::FrameReader;

    #[tokio::test]
    async fn reader_sees_only_the_latest_frame() {
        let (tx, rx) = watch::channel::<Option<Bytes>>(None);
        let mut reader = FrameReader::new(rx);

        tx.send_replace(Some(Bytes::from_static(b"old")));
        tx.send_replace(Some(Bytes::from_static(b"new")));

        let frame = reader.next().await.expect("frame should arrive");
        assert_eq!(frame.as_ref(), b"new");
    }

    #[tokio::test]
    async fn reader_unblocks_when_the_session_ends() {
        let (tx, rx) = watch::channel::<Option<Bytes>>(None);
        let mut reader = FrameReader::new(rx);

        let waiter = tokio::spawn(async move { reader.next().await });
        tokio::task::yield_now().await;
        drop(tx);

        let result = waiter.await.expect("reader task should not panic");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn late_subscriber_skips_the_stale_frame() {
        // A reader subscribing mid-session never replays the frame that
        // was already current when it joined; it waits for a newer one.
        let (tx, rx) = watch::channel::<Option<Bytes>>(Some(Bytes::from_static(b"stale")));
        let mut reader = FrameReader::new(rx);

        tx.send_replace(Some(Bytes::from_static(b"fresh")));
        let frame = reader.next().await.expect("fresh frame expected");
        assert_eq!(frame.as_ref(), b"fresh");
    }
}
