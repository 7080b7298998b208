use serde::Serialize;
use tokio::sync::watch;

/// Which consumer currently owns the camera hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    Idle,
    StillBusy,
    Streaming,
    TimelapseRunning,
}

/// Live progress record for a running (or just-finished) timelapse job.
#[derive(Debug, Clone, Serialize)]
pub struct TimelapseProgress {
    pub sequence_name: String,
    pub interval_seconds: f64,
    pub total_frames: u32,
    pub frames_captured: u32,
    pub frames_remaining: u32,
    /// Epoch milliseconds of the next scheduled capture, if one is due.
    pub next_capture_due_at: Option<i64>,
    pub seconds_until_next_capture: Option<f64>,
    pub is_running: bool,
    pub output_directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub url: String,
}

/// Point-in-time view of the whole session, safe to hand to any poller.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub mode: CameraMode,
    pub timelapse: Option<TimelapseProgress>,
    pub stream: Option<StreamInfo>,
    pub last_error: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            mode: CameraMode::Idle,
            timelapse: None,
            stream: None,
            last_error: None,
        }
    }
}

/// Single-writer-discipline status cell. The manager and the active worker
/// publish through `update`; pollers clone the latest snapshot out of the
/// watch channel without ever touching the manager lock.
#[derive(Debug, Clone)]
pub struct StatusFeed {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusFeed {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    pub fn update(&self, apply: impl FnOnce(&mut StatusSnapshot)) {
        self.tx.send_modify(apply);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{CameraMode, StatusFeed};

    #[test]
    fn updates_are_visible_to_existing_subscribers() {
        let feed = StatusFeed::new();
        let rx = feed.subscribe();

        feed.update(|s| s.mode = CameraMode::Streaming);

        assert_eq!(rx.borrow().mode, CameraMode::Streaming);
        assert_eq!(feed.snapshot().mode, CameraMode::Streaming);
    }

    #[test]
    fn snapshot_is_a_copy_not_a_view() {
        let feed = StatusFeed::new();
        let before = feed.snapshot();
        feed.update(|s| s.last_error = Some("boom".to_string()));

        assert!(before.last_error.is_none());
        assert_eq!(feed.snapshot().last_error.as_deref(), Some("boom"));
    }
}
