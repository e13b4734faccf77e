use anyhow::Result;
use rand::Rng;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;
use crate::BoundingBox;

const BOX_SIZE: i32 = 80;
const STEP: i32 = 4;

/// Stub backend for tests and demo runs. Synthesizes a single "person"
/// box that wanders across the frame, with an empty scene every so often
/// so change detection has count transitions to react to.
pub struct StubBackend {
    call_count: u64,
    x: i32,
    y: i32,
    dx: i32,
    dy: i32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            call_count: 0,
            x: 40,
            y: 40,
            dx: STEP,
            dy: STEP,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        self.call_count += 1;

        // Empty scene for a stretch every 120 calls.
        if self.call_count % 120 < 10 {
            return Ok(vec![]);
        }

        let max_x = (width as i32 - BOX_SIZE).max(1);
        let max_y = (height as i32 - BOX_SIZE).max(1);
        self.x += self.dx;
        self.y += self.dy;
        if self.x <= 0 || self.x >= max_x {
            self.dx = -self.dx;
            self.x = self.x.clamp(0, max_x);
        }
        if self.y <= 0 || self.y >= max_y {
            self.dy = -self.dy;
            self.y = self.y.clamp(0, max_y);
        }

        let confidence = rand::thread_rng().gen_range(0.75..0.95);
        Ok(vec![RawDetection {
            label: "person".to_string(),
            class_id: 0,
            bbox: BoundingBox {
                x1: self.x,
                y1: self.y,
                x2: self.x + BOX_SIZE,
                y2: self.y + BOX_SIZE,
            },
            confidence,
        }])
    }
}
