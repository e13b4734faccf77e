//! Camera frame source.
//!
//! `CameraSource` produces frames from a configured capture URL. A
//! synthetic backend handles `stub://` URLs for tests and demo runs; real
//! capture devices live behind the same interface in downstream builds.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::time::Duration;

use super::{Frame, FrameFormat};

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct CameraConfig {
    /// Capture URL (e.g. "stub://front_camera").
    pub url: String,
    /// Target frame rate; the producer loop paces itself to this.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Statistics for a camera source.
#[derive(Clone, Debug)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub url: String,
}

pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCameraSource),
}

impl CameraSource {
    pub fn new(config: CameraConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCameraSource::new(config)),
            })
        } else {
            Err(anyhow!(
                "unsupported capture url '{}': only stub:// sources are built in",
                config.url
            ))
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
        }
    }

    /// Connect with a bounded number of attempts and a short backoff.
    /// Exhausting the attempts is the only fatal source failure at startup.
    pub fn connect_with_retries(&mut self, attempts: u32, backoff: Duration) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=attempts.max(1) {
            match self.connect() {
                Ok(()) => return Ok(()),
                Err(err) => {
                    log::warn!("camera connect attempt {attempt}/{attempts} failed: {err}");
                    last_err = Some(err);
                    std::thread::sleep(backoff);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("camera connect failed")))
    }

    /// Capture the next frame, stamping it with the monotonic frame number
    /// and capture instant.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
        }
    }

    /// Delay that paces the producer loop to the configured target fps.
    pub fn frame_interval(&self) -> Duration {
        let fps = match &self.backend {
            CameraBackend::Synthetic(source) => source.config.target_fps,
        };
        Duration::from_millis(1000 / u64::from(fps.max(1)))
    }
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests and demo runs
// ----------------------------------------------------------------------------

struct SyntheticCameraSource {
    config: CameraConfig,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticCameraSource {
    fn new(config: CameraConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        log::info!("camera: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let data = self.generate_pixels();
        Ok(Frame {
            frame_number: self.frame_count,
            width: self.config.width,
            height: self.config.height,
            format: FrameFormat::Rgb24,
            data,
            captured_at: Utc::now(),
        })
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        // Shift the scene every 50 frames so downstream change detection
        // sees something other than a static image.
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}
