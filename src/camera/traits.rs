use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;

use crate::core::errors::CameraResult;

use super::metadata::CaptureMetadata;

/// Hardware profile the sensor is configured for. Stills run at full
/// resolution; the stream profile trades resolution for encode rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureProfile {
    Still,
    VideoStream,
}

/// Boundary to the physical camera. Exactly one caller may drive the
/// hardware at a time; the session manager's mode machine enforces that,
/// so implementations do not need their own exclusion.
#[async_trait]
pub trait CameraAdapter: Send + Sync + 'static {
    /// Reconfigure the sensor for the given profile, reapplying any
    /// manual exposure settings previously set.
    async fn configure(&self, profile: CaptureProfile) -> CameraResult<()>;

    async fn start(&self) -> CameraResult<()>;

    async fn stop(&self) -> CameraResult<()>;

    /// Capture a single frame to `destination`. The camera must have been
    /// started; it stays started afterwards.
    async fn capture_still(&self, destination: &Path) -> CameraResult<CaptureMetadata>;

    /// Begin continuous encoding and return the frame source. The camera
    /// stays in streaming state until `FrameSource::shutdown` and `stop`.
    async fn start_stream(&self) -> CameraResult<Box<dyn FrameSource>>;

    /// Apply manual exposure controls. `None` leaves a control untouched.
    async fn set_exposure(
        &self,
        shutter_us: Option<u32>,
        analog_gain: Option<f32>,
    ) -> CameraResult<()>;

    /// Current configuration as key/value pairs, for job manifests.
    fn settings(&self) -> Vec<(String, String)>;
}

/// Pull side of a continuous encoded-frame stream.
#[async_trait]
pub trait FrameSource: Send {
    /// Next complete encoded frame, or None when the stream has ended.
    async fn next_frame(&mut self) -> CameraResult<Option<Bytes>>;

    /// Stop producing frames and release anything the stream holds.
    async fn shutdown(&mut self) -> CameraResult<()>;
}
