//! Runtime thresholds shared between the producer loop and the control
//! surface. One writer at a time, last-writer-wins; every read gets the
//! coherent struct in effect at read time.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Documented ranges for numeric thresholds. Out-of-range finite values are
/// clamped; non-finite values are rejected with the prior value retained.
pub const CONFIDENCE_RANGE: (f64, f64) = (0.05, 0.95);
pub const IOU_RANGE: (f64, f64) = (0.0, 1.0);
pub const POSITION_RANGE: (f64, f64) = (1.0, 500.0);

/// What the producer does with the change detector while paused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseMode {
    /// Skip detector invocation entirely; nothing is appended.
    #[default]
    SkipDetection,
    /// Run the detector and the significance check, then discard the frame
    /// before append. Keeps detector state warm at the cost of inference.
    AlwaysSignificantDiscarded,
}

/// Current runtime thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Minimum detector confidence; detections below this never reach the
    /// change detector.
    pub confidence: f64,
    /// IoU below this between matched boxes marks a frame significant.
    pub iou_threshold: f64,
    /// Center displacement above this (pixels) marks a frame significant.
    pub position_threshold: f64,
    pub paused: bool,
    /// Autosave cadence in seconds.
    pub save_interval_secs: u64,
    pub pause_mode: PauseMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou_threshold: 0.3,
            position_threshold: 50.0,
            paused: false,
            save_interval_secs: 30,
            pause_mode: PauseMode::default(),
        }
    }
}

/// Partial settings update. Unknown keys are rejected rather than silently
/// ignored.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsUpdate {
    pub confidence: Option<f64>,
    pub iou_threshold: Option<f64>,
    pub position_threshold: Option<f64>,
    pub paused: Option<bool>,
    pub save_interval_secs: Option<u64>,
    pub pause_mode: Option<PauseMode>,
}

/// Exclusive-write / shared-read settings cell.
pub struct SharedSettings {
    inner: Mutex<Settings>,
}

impl SharedSettings {
    pub fn new(initial: Settings) -> Self {
        Self {
            inner: Mutex::new(initial),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Settings>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    /// Copy of the settings currently in effect.
    pub fn get(&self) -> Result<Settings> {
        Ok(*self.lock()?)
    }

    /// Apply a partial update field by field. A rejected field keeps its
    /// prior value and fails the whole call; accepted fields in the same
    /// call are still applied only if every field validates.
    pub fn apply(&self, update: &SettingsUpdate) -> Result<Settings> {
        let mut guard = self.lock()?;
        let mut next = *guard;

        if let Some(confidence) = update.confidence {
            next.confidence = clamp_threshold("confidence", confidence, CONFIDENCE_RANGE)?;
        }
        if let Some(iou) = update.iou_threshold {
            next.iou_threshold = clamp_threshold("iou_threshold", iou, IOU_RANGE)?;
        }
        if let Some(position) = update.position_threshold {
            next.position_threshold =
                clamp_threshold("position_threshold", position, POSITION_RANGE)?;
        }
        if let Some(interval) = update.save_interval_secs {
            if interval == 0 {
                return Err(anyhow!("save_interval_secs must be greater than zero"));
            }
            next.save_interval_secs = interval;
        }
        if let Some(paused) = update.paused {
            next.paused = paused;
        }
        if let Some(mode) = update.pause_mode {
            next.pause_mode = mode;
        }

        *guard = next;
        Ok(next)
    }

    /// Flip the pause flag, returning the new state.
    pub fn toggle_pause(&self) -> Result<bool> {
        let mut guard = self.lock()?;
        guard.paused = !guard.paused;
        Ok(guard.paused)
    }
}

fn clamp_threshold(name: &str, value: f64, range: (f64, f64)) -> Result<f64> {
    if !value.is_finite() {
        return Err(anyhow!("{} must be a finite number", name));
    }
    Ok(value.clamp(range.0, range.1))
}
