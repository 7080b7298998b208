use std::{
    collections::VecDeque,
    path::Path,
    process::Stdio,
    sync::Mutex,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::{
    io::AsyncReadExt,
    process::{Child, ChildStdout, Command},
};
use tracing::{debug, warn};

use crate::core::errors::{CameraError, CameraResult};

use super::{
    metadata::CaptureMetadata,
    mjpeg::MjpegSplitter,
    traits::{CameraAdapter, CaptureProfile, FrameSource},
};

#[derive(Debug, Clone, Copy, Default)]
struct ExposureSettings {
    shutter_us: Option<u32>,
    analog_gain: Option<f32>,
}

/// Camera adapter backed by ffmpeg (v4l2 input) for capture and v4l2-ctl
/// for sensor controls. One ffmpeg process per still, one long-lived
/// process per stream session.
pub struct FfmpegAdapter {
    device: String,
    input_format: String,
    still_size: (u32, u32),
    stream_size: (u32, u32),
    exposure: Mutex<ExposureSettings>,
}

impl FfmpegAdapter {
    pub fn new(
        device: String,
        input_format: String,
        still_size: (u32, u32),
        stream_size: (u32, u32),
    ) -> Self {
        Self {
            device,
            input_format,
            still_size,
            stream_size,
            exposure: Mutex::new(ExposureSettings::default()),
        }
    }

    fn exposure(&self) -> ExposureSettings {
        *self.exposure.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn size_arg(size: (u32, u32)) -> String {
        format!("{}x{}", size.0, size.1)
    }

    async fn apply_controls(&self, settings: ExposureSettings) -> CameraResult<()> {
        let mut controls = vec![
            // Manual exposure and fixed white balance keep timelapse
            // frames comparable across multi-hour sequences.
            "white_balance_automatic=0".to_string(),
        ];
        if let Some(shutter) = settings.shutter_us {
            controls.push("auto_exposure=1".to_string());
            // UVC exposure_time_absolute is in 100us units.
            controls.push(format!("exposure_time_absolute={}", shutter / 100));
        }
        if let Some(gain) = settings.analog_gain {
            controls.push(format!("gain={}", gain.round() as i64));
        }

        let output = Command::new("v4l2-ctl")
            .args(["-d", &self.device, "--set-ctrl", &controls.join(",")])
            .output()
            .await
            .map_err(|err| CameraError::hardware(format!("v4l2-ctl spawn failed: {err}")))?;

        if !output.status.success() {
            return Err(CameraError::hardware(format!(
                "v4l2-ctl set-ctrl exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    /// Read back the controls the driver reports. Best effort: cameras
    /// without these controls simply leave the fields unset.
    async fn read_controls(&self) -> (Option<u64>, Option<f32>) {
        let output = Command::new("v4l2-ctl")
            .args([
                "-d",
                &self.device,
                "--get-ctrl",
                "exposure_time_absolute,gain",
            ])
            .output()
            .await;

        let Ok(output) = output else {
            return (None, None);
        };
        if !output.status.success() {
            return (None, None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut exposure_us = None;
        let mut gain = None;
        for line in stdout.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            match name.trim() {
                "exposure_time_absolute" => {
                    exposure_us = value.trim().parse::<u64>().ok().map(|v| v * 100);
                }
                "gain" => {
                    gain = value.trim().parse::<f32>().ok();
                }
                _ => {}
            }
        }
        (exposure_us, gain)
    }
}

#[async_trait]
impl CameraAdapter for FfmpegAdapter {
    async fn configure(&self, profile: CaptureProfile) -> CameraResult<()> {
        debug!(?profile, device = %self.device, "configuring camera profile");
        let settings = self.exposure();
        // Missing v4l2 controls are tolerated here: the sensor still
        // captures, just without manual exposure pinned.
        if let Err(err) = self.apply_controls(settings).await {
            warn!("control reapply during configure failed: {err}");
        }
        Ok(())
    }

    async fn start(&self) -> CameraResult<()> {
        // Process-per-capture backend: the encode process is spawned by
        // capture_still/start_stream, so arming is bookkeeping only.
        debug!(device = %self.device, "camera armed");
        Ok(())
    }

    async fn stop(&self) -> CameraResult<()> {
        debug!(device = %self.device, "camera released");
        Ok(())
    }

    async fn capture_still(&self, destination: &Path) -> CameraResult<CaptureMetadata> {
        let status = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "v4l2",
                "-input_format",
                &self.input_format,
                "-video_size",
                &Self::size_arg(self.still_size),
                "-i",
                &self.device,
                "-frames:v",
                "1",
                "-y",
            ])
            .arg(destination.as_os_str())
            .status()
            .await
            .map_err(|err| CameraError::hardware(format!("ffmpeg spawn failed: {err}")))?;

        if !status.success() {
            return Err(CameraError::hardware(format!(
                "ffmpeg still capture exited with {status}"
            )));
        }

        let (exposure_time_us, reported_gain) = self.read_controls().await;
        let settings = self.exposure();
        Ok(CaptureMetadata {
            captured_at: Utc::now(),
            device: self.device.clone(),
            width: self.still_size.0,
            height: self.still_size.1,
            exposure_time_us: exposure_time_us.or(settings.shutter_us.map(u64::from)),
            analog_gain: reported_gain.or(settings.analog_gain),
            auto_white_balance: Some(false),
        })
    }

    async fn start_stream(&self) -> CameraResult<Box<dyn FrameSource>> {
        let mut child = Command::new("ffmpeg")
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-f",
                "v4l2",
                "-input_format",
                &self.input_format,
                "-video_size",
                &Self::size_arg(self.stream_size),
                "-i",
                &self.device,
                "-f",
                "mpjpeg",
                "pipe:1",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            // The child must not outlive its FrameSource: if the worker
            // task is torn down without a clean shutdown, a surviving
            // encoder would keep the video device locked.
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| CameraError::hardware(format!("ffmpeg stream spawn failed: {err}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CameraError::hardware("ffmpeg stream has no stdout pipe"))?;

        Ok(Box::new(FfmpegFrameSource {
            child,
            stdout: Some(stdout),
            splitter: MjpegSplitter::new(),
            ready: VecDeque::new(),
            buffer: vec![0u8; 32 * 1024],
        }))
    }

    async fn set_exposure(
        &self,
        shutter_us: Option<u32>,
        analog_gain: Option<f32>,
    ) -> CameraResult<()> {
        let settings = {
            let mut guard = self.exposure.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(shutter) = shutter_us {
                guard.shutter_us = Some(shutter);
            }
            if let Some(gain) = analog_gain {
                guard.analog_gain = Some(gain);
            }
            *guard
        };
        self.apply_controls(settings).await
    }

    fn settings(&self) -> Vec<(String, String)> {
        let exposure = self.exposure();
        let mut pairs = vec![
            ("device".to_string(), self.device.clone()),
            ("input_format".to_string(), self.input_format.clone()),
            ("still_size".to_string(), Self::size_arg(self.still_size)),
            ("stream_size".to_string(), Self::size_arg(self.stream_size)),
        ];
        if let Some(shutter) = exposure.shutter_us {
            pairs.push(("shutter_us".to_string(), shutter.to_string()));
        }
        if let Some(gain) = exposure.analog_gain {
            pairs.push(("analog_gain".to_string(), gain.to_string()));
        }
        pairs
    }
}

struct FfmpegFrameSource {
    child: Child,
    stdout: Option<ChildStdout>,
    splitter: MjpegSplitter,
    ready: VecDeque<Bytes>,
    buffer: Vec<u8>,
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn next_frame(&mut self) -> CameraResult<Option<Bytes>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            let Some(stdout) = self.stdout.as_mut() else {
                return Ok(None);
            };
            let n = stdout
                .read(&mut self.buffer)
                .await
                .map_err(|err| CameraError::hardware(format!("stream read failed: {err}")))?;
            if n == 0 {
                return Ok(None);
            }
            self.ready.extend(self.splitter.push(&self.buffer[..n]));
        }
    }

    async fn shutdown(&mut self) -> CameraResult<()> {
        self.stdout = None;
        if let Err(err) = self.child.kill().await {
            warn!("failed to kill ffmpeg stream process: {err}");
        }
        if let Err(err) = self.child.wait().await {
            warn!("failed to reap ffmpeg stream process: {err}");
        }
        Ok(())
    }
}
