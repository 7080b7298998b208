use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::{Mutex, oneshot, watch},
    task::JoinHandle,
    time::timeout,
};
use tracing::{info, warn};

use crate::core::{
    errors::{CameraError, CameraResult},
    status::{CameraMode, StatusFeed, StatusSnapshot, StreamInfo, TimelapseProgress},
};

use super::{
    histogram,
    metadata::CaptureMetadata,
    stream::{FrameReader, run_stream_worker},
    timelapse::{TimelapseJob, run_timelapse_worker},
    traits::CameraAdapter,
};

/// Upper bound on waiting for a worker to honor a stop signal. Covers one
/// poll slice plus a still capture already in flight.
const STOP_WAIT: Duration = Duration::from_secs(10);

/// Upper bound on waiting for the stream worker to arm the hardware.
const ARM_WAIT: Duration = Duration::from_secs(10);

/// Filesystem and delivery locations the manager hands to its workers.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub stills_dir: PathBuf,
    pub timelapse_root: PathBuf,
    pub stream_url: String,
}

struct TimelapseHandle {
    job: TimelapseJob,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct StreamHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
    frames: watch::Receiver<Option<bytes::Bytes>>,
    info: StreamInfo,
}

/// Exclusively-owned session state: the current mode plus at most one
/// background worker. Only command operations mutate this, under the
/// manager's lock; workers report progress through the status feed only.
struct SessionState {
    mode: CameraMode,
    timelapse: Option<TimelapseHandle>,
    stream: Option<StreamHandle>,
}

/// Owner of the camera. Serializes every mode transition, spawns and
/// stops the long-running workers, and keeps the published status
/// consistent with whoever currently drives the hardware.
pub struct SessionManager<A: CameraAdapter> {
    adapter: Arc<A>,
    state: Mutex<SessionState>,
    status: StatusFeed,
    paths: SessionPaths,
}

impl<A: CameraAdapter> SessionManager<A> {
    pub fn new(adapter: A, paths: SessionPaths) -> Self {
        Self {
            adapter: Arc::new(adapter),
            state: Mutex::new(SessionState {
                mode: CameraMode::Idle,
                timelapse: None,
                stream: None,
            }),
            status: StatusFeed::new(),
            paths,
        }
    }

    /// Current snapshot. Never touches the session lock, so a poller can
    /// never be stalled by a command or worker in progress.
    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn stills_dir(&self) -> &Path {
        &self.paths.stills_dir
    }

    /// Detach workers that terminated on their own (timelapse completion,
    /// stream source failure). Workers publish their terminal status after
    /// releasing the hardware, so a finished task implies an idle camera.
    fn reconcile(&self, state: &mut SessionState) {
        if state
            .timelapse
            .as_ref()
            .is_some_and(|h| h.task.is_finished())
        {
            state.timelapse = None;
            if state.mode == CameraMode::TimelapseRunning {
                state.mode = CameraMode::Idle;
            }
        }
        if state.stream.as_ref().is_some_and(|h| h.task.is_finished()) {
            state.stream = None;
            if state.mode == CameraMode::Streaming {
                state.mode = CameraMode::Idle;
            }
            // Normally the worker published this itself; repair the feed
            // in case it was torn down without running to completion.
            self.status.update(|s| {
                if s.mode == CameraMode::Streaming {
                    s.mode = CameraMode::Idle;
                    s.stream = None;
                }
            });
        }
    }

    pub async fn start_timelapse(
        &self,
        interval_seconds: f64,
        total_frames: i64,
    ) -> CameraResult<TimelapseProgress> {
        if !(interval_seconds > 0.0) || !interval_seconds.is_finite() {
            return Err(CameraError::invalid(
                "interval_seconds must be a positive number",
            ));
        }
        if total_frames <= 0 || total_frames > u32::MAX as i64 {
            return Err(CameraError::invalid(
                "total_frames must be a positive integer",
            ));
        }

        let mut state = self.state.lock().await;
        self.reconcile(&mut state);

        if let Some(handle) = &state.timelapse {
            // Already running: succeed without touching the hardware.
            let progress = self
                .status
                .snapshot()
                .timelapse
                .unwrap_or_else(|| handle.job.initial_progress());
            return Ok(progress);
        }
        if state.mode != CameraMode::Idle {
            return Err(self.mode_conflict(&state));
        }

        let started_at = Utc::now();
        let job = TimelapseJob {
            sequence_name: format!("tl_{}", started_at.format("%Y%m%d_%H%M%S")),
            interval: Duration::from_secs_f64(interval_seconds),
            total_frames: total_frames as u32,
            output_directory: self
                .paths
                .timelapse_root
                .join(started_at.format("%Y%m%d_%H%M%S").to_string()),
        };

        tokio::fs::create_dir_all(&job.output_directory).await?;
        self.write_manifest(&job).await?;

        let progress = job.initial_progress();
        self.status.update(|s| {
            s.mode = CameraMode::TimelapseRunning;
            s.timelapse = Some(progress.clone());
            s.last_error = None;
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_timelapse_worker(
            self.adapter.clone(),
            job.clone(),
            cancel_rx,
            self.status.clone(),
        ));
        state.timelapse = Some(TimelapseHandle {
            job,
            cancel: cancel_tx,
            task,
        });
        state.mode = CameraMode::TimelapseRunning;
        info!(
            interval_seconds,
            total_frames, "timelapse started: {}", progress.sequence_name
        );
        Ok(progress)
    }

    pub async fn stop_timelapse(&self) -> CameraResult<()> {
        let mut state = self.state.lock().await;
        self.reconcile(&mut state);

        let Some(mut handle) = state.timelapse.take() else {
            return Ok(());
        };
        handle.cancel.send_replace(true);
        if timeout(STOP_WAIT, &mut handle.task).await.is_err() {
            warn!("timelapse worker ignored stop signal; aborting task");
            handle.task.abort();
        }

        state.mode = CameraMode::Idle;
        self.status.update(|s| {
            s.mode = CameraMode::Idle;
            if let Some(tl) = s.timelapse.as_mut() {
                tl.is_running = false;
                tl.next_capture_due_at = None;
                tl.seconds_until_next_capture = None;
            }
        });
        info!("timelapse stopped");
        Ok(())
    }

    pub async fn start_stream(&self) -> CameraResult<StreamInfo> {
        self.open_stream().await.map(|(info, _)| info)
    }

    /// Idempotent stream start returning the access descriptor plus a
    /// reader over the latest-frame cell. A second call while streaming
    /// hands out the existing session instead of double-starting hardware.
    pub async fn open_stream(&self) -> CameraResult<(StreamInfo, FrameReader)> {
        let mut state = self.state.lock().await;
        self.reconcile(&mut state);

        if let Some(handle) = &state.stream {
            return Ok((
                handle.info.clone(),
                FrameReader::new(handle.frames.clone()),
            ));
        }
        if state.mode != CameraMode::Idle {
            return Err(self.mode_conflict(&state));
        }

        let info = StreamInfo {
            url: self.paths.stream_url.clone(),
        };
        let (frames_tx, frames_rx) = watch::channel(None);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (armed_tx, armed_rx) = oneshot::channel();
        let task = tokio::spawn(run_stream_worker(
            self.adapter.clone(),
            frames_tx,
            cancel_rx,
            self.status.clone(),
            armed_tx,
            info.clone(),
        ));

        // Hold the command until the worker has armed the encoder, so the
        // returned descriptor is immediately usable.
        match timeout(ARM_WAIT, armed_rx).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => return Err(err),
            Ok(Err(_)) => {
                return Err(CameraError::hardware("stream worker exited while arming"));
            }
            Err(_) => {
                cancel_tx.send_replace(true);
                return Err(CameraError::hardware("stream arming timed out"));
            }
        }

        // The worker published the Streaming snapshot before signaling
        // armed; publishing again here could overwrite the terminal Idle
        // of a source that died immediately after arming.
        state.stream = Some(StreamHandle {
            cancel: cancel_tx,
            task,
            frames: frames_rx.clone(),
            info: info.clone(),
        });
        state.mode = CameraMode::Streaming;
        info!("stream started at {}", info.url);
        Ok((info, FrameReader::new(frames_rx)))
    }

    pub async fn stop_stream(&self) -> CameraResult<()> {
        let mut state = self.state.lock().await;
        self.reconcile(&mut state);

        let Some(mut handle) = state.stream.take() else {
            return Ok(());
        };
        handle.cancel.send_replace(true);
        if timeout(STOP_WAIT, &mut handle.task).await.is_err() {
            warn!("stream worker ignored stop signal; aborting task");
            handle.task.abort();
        }

        state.mode = CameraMode::Idle;
        self.status.update(|s| {
            s.mode = CameraMode::Idle;
            s.stream = None;
        });
        info!("stream stopped");
        Ok(())
    }

    pub async fn capture_still(&self, destination: &Path) -> CameraResult<CaptureMetadata> {
        self.begin_still().await?;
        let result = self.exclusive_capture(destination).await;
        self.end_still(result.as_ref().err()).await;
        result
    }

    /// Still capture to a scratch file, histogram overlay rendered on top,
    /// result written to `destination`. The scratch file is removed on
    /// every path out, including generator failure.
    pub async fn capture_histogram_overlay(
        &self,
        destination: &Path,
    ) -> CameraResult<CaptureMetadata> {
        self.begin_still().await?;
        let result = async {
            let scratch_dir = destination
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(std::env::temp_dir);
            let scratch = ScratchFile::new(
                scratch_dir.join(format!(".capture-{}.jpg", Utc::now().timestamp_micros())),
            );

            let metadata = self.exclusive_capture(scratch.path()).await?;
            let raw = tokio::fs::read(scratch.path()).await?;
            let annotated = histogram::annotate_jpeg(&raw)?;
            tokio::fs::write(destination, annotated).await?;
            Ok(metadata)
        }
        .await;
        self.end_still(result.as_ref().err()).await;
        result
    }

    /// Exposure controls apply in any mode except during a still capture,
    /// and never change the mode.
    pub async fn configure_exposure(
        &self,
        shutter_us: Option<u32>,
        analog_gain: Option<f32>,
    ) -> CameraResult<()> {
        if shutter_us == Some(0) {
            return Err(CameraError::invalid("shutter_us must be positive"));
        }
        if analog_gain.is_some_and(|g| !(g > 0.0) || !g.is_finite()) {
            return Err(CameraError::invalid("analog_gain must be positive"));
        }

        let mut state = self.state.lock().await;
        self.reconcile(&mut state);
        if state.mode == CameraMode::StillBusy {
            return Err(CameraError::busy("still capture in progress"));
        }
        self.adapter.set_exposure(shutter_us, analog_gain).await
    }

    async fn begin_still(&self) -> CameraResult<()> {
        let mut state = self.state.lock().await;
        self.reconcile(&mut state);
        if state.mode != CameraMode::Idle {
            return Err(self.mode_conflict(&state));
        }
        state.mode = CameraMode::StillBusy;
        self.status.update(|s| s.mode = CameraMode::StillBusy);
        Ok(())
    }

    async fn end_still(&self, error: Option<&CameraError>) {
        let mut state = self.state.lock().await;
        state.mode = CameraMode::Idle;
        let message = error.map(ToString::to_string);
        self.status.update(|s| {
            s.mode = CameraMode::Idle;
            if let Some(message) = message {
                s.last_error = Some(message);
            }
        });
    }

    /// One start/capture/stop cycle. The hardware is released even when
    /// the capture itself fails.
    async fn exclusive_capture(&self, destination: &Path) -> CameraResult<CaptureMetadata> {
        self.adapter.start().await?;
        let captured = self.adapter.capture_still(destination).await;
        let stopped = self.adapter.stop().await;
        let metadata = captured?;
        stopped?;
        Ok(metadata)
    }

    fn mode_conflict(&self, state: &SessionState) -> CameraError {
        CameraError::busy(match state.mode {
            CameraMode::StillBusy => "still capture in progress",
            CameraMode::Streaming => "stream is active",
            CameraMode::TimelapseRunning => "timelapse is running",
            CameraMode::Idle => "camera busy",
        })
    }

    async fn write_manifest(&self, job: &TimelapseJob) -> CameraResult<()> {
        let mut lines = vec![
            format!("sequence_name={}", job.sequence_name),
            format!("interval_seconds={}", job.interval.as_secs_f64()),
            format!("total_frames={}", job.total_frames),
            format!("started_at={}", Utc::now().to_rfc3339()),
        ];
        for (key, value) in self.adapter.settings() {
            lines.push(format!("camera.{key}={value}"));
        }
        let body = lines.join("\n") + "\n";
        tokio::fs::write(job.output_directory.join("manifest.txt"), body).await?;
        Ok(())
    }
}

/// Scratch capture file removed when the guard drops, whatever happened
/// in between.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(path: PathBuf) -> Self {
        Self(path)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
