use chrono::{DateTime, Utc};
use serde::Serialize;

/// Hardware-reported settings at the moment a still was captured.
/// Immutable once created; fields the driver could not report stay None.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureMetadata {
    pub captured_at: DateTime<Utc>,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub exposure_time_us: Option<u64>,
    pub analog_gain: Option<f32>,
    pub auto_white_balance: Option<bool>,
}
