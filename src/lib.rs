//! Annotation Kernel
//!
//! This crate implements the change-detection and session-state core of a
//! frame annotation service: an external detector produces per-frame bounding
//! boxes, and the kernel decides which frames are worth persisting while
//! sharing the live frame and running statistics with concurrent consumers.
//!
//! # Architecture
//!
//! - One producer loop pulls frames, runs detection, and appends significant
//!   frames to the session store.
//! - The control surface (HTTP API, export tools) only reads snapshots or
//!   writes settings; it never touches the producer's per-iteration state.
//! - The session grows monotonically for the life of the process. There is
//!   no eviction; memory growth is an operational constraint, not a cap.
//!
//! # Module Structure
//!
//! - `change`: significance heuristic (IoU + center displacement)
//! - `ingest`: frame sources and detection normalization
//! - `detect`: detector backend boundary
//! - `broadcast`: latest-frame cell + drop-oldest stream queue
//! - `stats`: running statistics with a bounded history ring
//! - `persist`: session document serialization (autosave + final save)
//! - `settings`: shared runtime thresholds
//! - `engine`: owned shared state + externally exposed operations
//! - `api`: minimal HTTP control surface

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub mod api;
pub mod broadcast;
pub mod change;
pub mod config;
pub mod detect;
pub mod engine;
pub mod ingest;
pub mod persist;
pub mod settings;
pub mod stats;

pub use broadcast::{FrameBroadcast, FrameStream, DEFAULT_STREAM_CAPACITY};
pub use detect::{BackendRegistry, DetectorBackend, RawDetection, StubBackend};
pub use engine::{AnnotatorEngine, EngineConfig, FrameOutcome, Lifecycle};
pub use ingest::{CameraConfig, CameraSource, Frame, FrameFormat};
pub use persist::{DocumentMetadata, PersistenceEngine, SessionDocument};
pub use settings::{PauseMode, Settings, SettingsUpdate, SharedSettings};
pub use stats::{HistorySample, Stats, StatsAggregator};

// -------------------- Bounding boxes --------------------

/// Axis-aligned bounding box in integer pixel coordinates.
///
/// Invariant: `x1 < x2` and `y1 < y2`. Ingest rejects boxes that violate
/// this, so downstream code may assume non-degenerate geometry (the IoU
/// routine still guards against zero-area division).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self> {
        if x1 >= x2 || y1 >= y2 {
            return Err(anyhow!(
                "degenerate bounding box: ({}, {}, {}, {})",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Integer box center, truncating division (matches the persisted
    /// `center_x`/`center_y` fields).
    pub fn center(&self) -> (i32, i32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

// -------------------- Detections --------------------

/// One recognized object in one frame.
///
/// Serialized flat with derived `width`/`height`/`center_x`/`center_y`
/// fields per the session document schema. Derived fields are recomputed
/// on serialization and ignored (never trusted) on deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "DetectionRecord", into = "DetectionRecord")]
pub struct Detection {
    pub label: String,
    pub class_id: u32,
    pub bbox: BoundingBox,
    /// Confidence in (0, 1].
    pub confidence: f32,
}

/// Wire shape of a detection in the session document.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct DetectionRecord {
    label: String,
    class_id: u32,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    confidence: f32,
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
    #[serde(default)]
    center_x: i32,
    #[serde(default)]
    center_y: i32,
}

impl From<Detection> for DetectionRecord {
    fn from(det: Detection) -> Self {
        let (center_x, center_y) = det.bbox.center();
        Self {
            label: det.label,
            class_id: det.class_id,
            x1: det.bbox.x1,
            y1: det.bbox.y1,
            x2: det.bbox.x2,
            y2: det.bbox.y2,
            confidence: det.confidence,
            width: det.bbox.x2 - det.bbox.x1,
            height: det.bbox.y2 - det.bbox.y1,
            center_x,
            center_y,
        }
    }
}

impl From<DetectionRecord> for Detection {
    fn from(rec: DetectionRecord) -> Self {
        Self {
            label: rec.label,
            class_id: rec.class_id,
            bbox: BoundingBox {
                x1: rec.x1,
                y1: rec.y1,
                x2: rec.x2,
                y2: rec.y2,
            },
            confidence: rec.confidence,
        }
    }
}

/// Per-frame object map. Ids are synthetic and positional
/// (`"{label}_{index}"`, index = detector output position); insertion order
/// is preserved through persistence.
pub type ObjectMap = IndexMap<String, Detection>;

// -------------------- Frame annotations --------------------

/// A persisted frame. Immutable once appended to the session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameAnnotation {
    /// Producer-loop counter, monotonic across skipped frames.
    pub frame_number: u64,
    /// Dense 1-based counter of persisted frames.
    pub saved_index: u64,
    pub timestamp: DateTime<Utc>,
    pub objects: ObjectMap,
}

/// The full annotation run: `"frame_{saved_index}"` -> annotation,
/// insertion-ordered, never reordered.
pub type Session = IndexMap<String, FrameAnnotation>;

/// A single detection surfaced by the recent-detections query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentDetection {
    pub label: String,
    /// Confidence as a percentage, rounded to one decimal.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

// -------------------- Session store --------------------

/// Append-only ordered collection of persisted frame annotations.
///
/// Single-writer (the producer loop calls `append`), multi-reader
/// (`snapshot` for persistence and export, point queries for the API).
/// Readers get point-in-time consistent copies; the lock is held only for
/// a bounded clone.
pub struct SessionStore {
    inner: Mutex<SessionInner>,
}

struct SessionInner {
    frames: Session,
    started_at: DateTime<Utc>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                frames: Session::new(),
                started_at: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SessionInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("session store lock poisoned"))
    }

    /// Append a frame annotation, assigning the next dense `saved_index`
    /// atomically with insertion.
    pub fn append(
        &self,
        frame_number: u64,
        timestamp: DateTime<Utc>,
        objects: ObjectMap,
    ) -> Result<u64> {
        let mut inner = self.lock()?;
        let saved_index = inner.frames.len() as u64 + 1;
        let annotation = FrameAnnotation {
            frame_number,
            saved_index,
            timestamp,
            objects,
        };
        inner
            .frames
            .insert(format!("frame_{saved_index}"), annotation);
        Ok(saved_index)
    }

    /// Point-in-time consistent copy of the session.
    pub fn snapshot(&self) -> Result<Session> {
        Ok(self.lock()?.frames.clone())
    }

    /// Empty the session. The next append gets `saved_index` 1 again.
    pub fn clear(&self) -> Result<()> {
        self.lock()?.frames.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.frames.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.frames.is_empty())
    }

    pub fn started_at(&self) -> Result<DateTime<Utc>> {
        Ok(self.lock()?.started_at)
    }

    /// Sum of object counts across all persisted frames. This is the source
    /// of truth for `Stats::total_objects`; it is computed at read time, not
    /// cached.
    pub fn total_objects(&self) -> Result<u64> {
        let inner = self.lock()?;
        Ok(inner
            .frames
            .values()
            .map(|frame| frame.objects.len() as u64)
            .sum())
    }

    /// Objects of the most recently persisted frame, if any.
    pub fn latest_objects(&self) -> Result<ObjectMap> {
        let inner = self.lock()?;
        Ok(inner
            .frames
            .values()
            .last()
            .map(|frame| frame.objects.clone())
            .unwrap_or_default())
    }

    /// Up to `count` individual detections from recent persisted frames,
    /// most-recent-first. Scans at most the last 10 frames.
    pub fn recent_detections(&self, count: usize) -> Result<Vec<RecentDetection>> {
        let inner = self.lock()?;
        let mut recent = Vec::new();
        for frame in inner.frames.values().rev().take(10) {
            for det in frame.objects.values() {
                recent.push(RecentDetection {
                    label: det.label.clone(),
                    confidence: (det.confidence as f64 * 1000.0).round() / 10.0,
                    timestamp: frame.timestamp,
                });
                if recent.len() >= count {
                    return Ok(recent);
                }
            }
        }
        Ok(recent)
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
