use anyhow::Result;

use crate::detect::result::RawDetection;

/// Detector backend trait: the black-box model boundary.
///
/// Backends receive pixel data and return raw detections in their own
/// output order. That order is load-bearing downstream: the ingest layer
/// assigns positional object ids from it.
///
/// Implementations must treat the pixel slice as read-only and ephemeral.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
