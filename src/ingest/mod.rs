//! Frame ingestion and detection normalization.
//!
//! Sources produce `Frame` values that flow into the broadcast layer and
//! the detector. The ingest layer is responsible for:
//! - Stamping frames with a monotonic frame number at capture time
//! - Rate limiting / frame decimation toward the source's target fps
//! - Filtering raw detections below the confidence threshold and assigning
//!   positional object ids, before the change detector ever sees them

mod camera;
mod normalize;

pub use camera::{CameraConfig, CameraSource, CameraStats};
pub use normalize::normalize_detections;

use chrono::{DateTime, Utc};

/// Pixel layout of a captured frame. Snapshots are written with a matching
/// file extension; encoding/rendering is the collaborator's concern.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Rgb24,
    Jpeg,
}

impl FrameFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            FrameFormat::Rgb24 => "rgb",
            FrameFormat::Jpeg => "jpg",
        }
    }
}

/// One captured frame. Cloneable so the broadcast layer can hand out
/// copies without sharing mutable buffers.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Monotonic capture counter, increases even across skipped frames.
    pub frame_number: u64,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}
