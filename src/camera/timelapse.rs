use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::watch, time::Instant};
use tracing::{info, warn};

use crate::core::status::{CameraMode, StatusFeed, TimelapseProgress};

use super::traits::CameraAdapter;

/// Granularity of the inter-capture wait. A stop request is honored
/// within one slice, and the published countdown refreshes at this rate.
pub(crate) const POLL_SLICE: Duration = Duration::from_millis(250);

/// Immutable parameters of one timelapse job, fixed at start.
#[derive(Debug, Clone)]
pub struct TimelapseJob {
    pub sequence_name: String,
    pub interval: Duration,
    pub total_frames: u32,
    pub output_directory: PathBuf,
}

impl TimelapseJob {
    pub fn frame_path(&self, index: u32) -> PathBuf {
        self.output_directory
            .join(format!("{}_{index:04}.jpg", self.sequence_name))
    }

    pub fn initial_progress(&self) -> TimelapseProgress {
        TimelapseProgress {
            sequence_name: self.sequence_name.clone(),
            interval_seconds: self.interval.as_secs_f64(),
            total_frames: self.total_frames,
            frames_captured: 0,
            frames_remaining: self.total_frames,
            next_capture_due_at: None,
            seconds_until_next_capture: None,
            is_running: true,
            output_directory: self.output_directory.display().to_string(),
        }
    }
}

/// Long-lived capture loop. Each tick: acquire the camera, capture one
/// numbered frame, release the camera, publish progress, then wait out
/// the interval in cancellable slices. The loop owns the hardware only
/// while a capture is in flight, so a stop observed during the wait
/// returns the session to idle without touching the sensor.
pub(crate) async fn run_timelapse_worker<A: CameraAdapter>(
    adapter: Arc<A>,
    job: TimelapseJob,
    mut cancel: watch::Receiver<bool>,
    status: StatusFeed,
) {
    for index in 0..job.total_frames {
        let acquire_start = Instant::now();

        if let Err(err) = capture_frame(&adapter, &job, index).await {
            warn!(sequence = %job.sequence_name, frame = index, "timelapse capture failed: {err}");
            status.update(|s| {
                s.mode = CameraMode::Idle;
                s.last_error = Some(format!("timelapse frame {index} failed: {err}"));
                if let Some(tl) = s.timelapse.as_mut() {
                    tl.is_running = false;
                    tl.next_capture_due_at = None;
                    tl.seconds_until_next_capture = None;
                }
            });
            return;
        }

        let captured = index + 1;
        let remaining = job.total_frames - captured;
        status.update(|s| {
            if let Some(tl) = s.timelapse.as_mut() {
                tl.frames_captured = captured;
                tl.frames_remaining = remaining;
            }
        });

        if remaining < 1 {
            info!(sequence = %job.sequence_name, frames = job.total_frames, "timelapse complete");
            status.update(|s| {
                s.mode = CameraMode::Idle;
                if let Some(tl) = s.timelapse.as_mut() {
                    tl.is_running = false;
                    tl.next_capture_due_at = None;
                    tl.seconds_until_next_capture = None;
                }
            });
            return;
        }

        let next_due = acquire_start + job.interval;
        if wait_until(next_due, &mut cancel, &status).await.is_stop() {
            info!(sequence = %job.sequence_name, captured, "timelapse stopped early");
            status.update(|s| {
                if let Some(tl) = s.timelapse.as_mut() {
                    tl.is_running = false;
                    tl.next_capture_due_at = None;
                    tl.seconds_until_next_capture = None;
                }
            });
            return;
        }
    }
}

async fn capture_frame<A: CameraAdapter>(
    adapter: &Arc<A>,
    job: &TimelapseJob,
    index: u32,
) -> crate::core::errors::CameraResult<()> {
    adapter.start().await?;
    let result = adapter.capture_still(&job.frame_path(index)).await;
    // Release the hardware even when the capture failed.
    let stop_result = adapter.stop().await;
    result?;
    stop_result
}

enum WaitOutcome {
    Elapsed,
    Stopped,
}

impl WaitOutcome {
    fn is_stop(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Sleep until `deadline` in short slices, refreshing the published
/// countdown each slice and aborting as soon as the cancel flag trips.
async fn wait_until(
    deadline: Instant,
    cancel: &mut watch::Receiver<bool>,
    status: &StatusFeed,
) -> WaitOutcome {
    loop {
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::Elapsed;
        }
        let left = deadline - now;

        status.update(|s| {
            if let Some(tl) = s.timelapse.as_mut() {
                tl.seconds_until_next_capture = Some(left.as_secs_f64());
                tl.next_capture_due_at =
                    Some(Utc::now().timestamp_millis() + left.as_millis() as i64);
            }
        });

        tokio::select! {
            _ = tokio::time::sleep(left.min(POLL_SLICE)) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return WaitOutcome::Stopped;
                }
            }
        }
    }
}
