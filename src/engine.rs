//! The annotator engine: explicitly owned shared state plus every
//! externally exposed operation.
//!
//! One producer loop drives `process_frame`; control-surface callers
//! (HTTP handlers, export tools) only read snapshots or write settings.
//! All shared mutation goes through the engine's synchronized accessors.
//!
//! Lifecycle: `Starting -> Running <-> Paused -> Finalizing -> Stopped`.
//! Entering `Paused` preserves state but resets the previous-object
//! baseline, so the first frame after resume is always significant.
//! After `Finalizing` begins, no further mutation is accepted.

use anyhow::{anyhow, Result};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::broadcast::FrameBroadcast;
use crate::change;
use crate::detect::RawDetection;
use crate::ingest::{normalize_detections, Frame};
use crate::persist::{PersistenceEngine, SessionDocument};
use crate::settings::{PauseMode, Settings, SettingsUpdate, SharedSettings};
use crate::stats::{Stats, StatsAggregator, DEFAULT_HISTORY_CAPACITY, DEFAULT_HISTORY_SAMPLE_SECS};
use crate::{ObjectMap, RecentDetection, SessionStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Starting,
    Running,
    Paused,
    Finalizing,
    Stopped,
}

/// What `process_frame` did with one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameOutcome {
    pub significant: bool,
    /// Assigned index when the frame was persisted.
    pub saved_index: Option<u64>,
    pub object_count: usize,
}

/// Engine construction parameters, typically derived from the daemon
/// config.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub settings: Settings,
    pub stream_capacity: usize,
    pub history_capacity: usize,
    pub history_sample_secs: u64,
    pub output_path: PathBuf,
    pub autosave_path: PathBuf,
    pub screenshots_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            stream_capacity: crate::broadcast::DEFAULT_STREAM_CAPACITY,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            history_sample_secs: DEFAULT_HISTORY_SAMPLE_SECS,
            output_path: PathBuf::from("annotations.json"),
            autosave_path: PathBuf::from("autosave_annotations.json"),
            screenshots_dir: PathBuf::from("screenshots"),
        }
    }
}

pub struct AnnotatorEngine {
    session: SessionStore,
    stats: StatsAggregator,
    broadcast: FrameBroadcast,
    settings: SharedSettings,
    persist: PersistenceEngine,
    /// Baseline for the change detector: the last persisted object set.
    prev_objects: Mutex<Option<ObjectMap>>,
    lifecycle: Mutex<Lifecycle>,
    shutdown: AtomicBool,
    last_autosave: Mutex<Instant>,
    screenshots_dir: PathBuf,
}

impl AnnotatorEngine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            session: SessionStore::new(),
            stats: StatsAggregator::new(
                config.history_capacity,
                Duration::from_secs(config.history_sample_secs),
            ),
            broadcast: FrameBroadcast::new(config.stream_capacity)?,
            settings: SharedSettings::new(config.settings),
            persist: PersistenceEngine::new(config.output_path, config.autosave_path),
            prev_objects: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::Starting),
            shutdown: AtomicBool::new(false),
            last_autosave: Mutex::new(Instant::now()),
            screenshots_dir: config.screenshots_dir,
        })
    }

    // -------------------- Lifecycle --------------------

    pub fn lifecycle(&self) -> Result<Lifecycle> {
        Ok(*self.lock_lifecycle()?)
    }

    /// Transition out of `Starting` once the producer is ready.
    pub fn mark_running(&self) -> Result<()> {
        let mut state = self.lock_lifecycle()?;
        if *state != Lifecycle::Starting {
            return Err(anyhow!("cannot start from state {:?}", *state));
        }
        *state = Lifecycle::Running;
        Ok(())
    }

    /// Request prompt producer-loop exit. Safe to call from a signal
    /// handler context; the loop observes the flag at its next iteration.
    pub fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Finalize the session: one final save to the primary output path,
    /// then `Stopped`. Any append in flight completes first (it holds the
    /// session lock we snapshot under). A failed final save still stops
    /// the engine; the error is surfaced to the caller.
    pub fn finalize(&self) -> Result<()> {
        {
            let mut state = self.lock_lifecycle()?;
            if *state == Lifecycle::Stopped {
                return Ok(());
            }
            *state = Lifecycle::Finalizing;
        }

        let result = if self.session.is_empty()? {
            log::info!("no annotations to save at shutdown");
            Ok(0)
        } else {
            self.save(true)
        };

        *self.lock_lifecycle()? = Lifecycle::Stopped;
        result.map(|_| ())
    }

    fn lock_lifecycle(&self) -> Result<std::sync::MutexGuard<'_, Lifecycle>> {
        self.lifecycle
            .lock()
            .map_err(|_| anyhow!("lifecycle lock poisoned"))
    }

    /// Reject mutation once finalization has begun.
    fn ensure_mutable(&self) -> Result<()> {
        let state = *self.lock_lifecycle()?;
        match state {
            Lifecycle::Finalizing | Lifecycle::Stopped => {
                Err(anyhow!("engine is {:?}; mutation rejected", state))
            }
            _ => Ok(()),
        }
    }

    // -------------------- Producer step --------------------

    /// Process one frame: publish it, normalize detections, decide
    /// significance against the last persisted set, and append on "yes".
    ///
    /// The display frame is always published, paused or not. While paused
    /// the frame is never appended; under `PauseMode::SkipDetection` the
    /// caller is expected to skip detector invocation and pass no
    /// detections, under `AlwaysSignificantDiscarded` the significance
    /// check runs and the frame is then discarded.
    pub fn process_frame(&self, frame: &Frame, raw: &[RawDetection]) -> Result<FrameOutcome> {
        self.ensure_mutable()?;
        let settings = self.settings.get()?;

        self.broadcast.publish(frame.clone())?;

        if settings.paused && settings.pause_mode == PauseMode::SkipDetection {
            self.stats.record(&ObjectMap::new(), false)?;
            return Ok(FrameOutcome {
                significant: false,
                saved_index: None,
                object_count: 0,
            });
        }

        let objects = normalize_detections(raw, settings.confidence, frame.frame_number);

        let mut prev = self
            .prev_objects
            .lock()
            .map_err(|_| anyhow!("previous-object lock poisoned"))?;
        let significant = change::is_significant(&objects, prev.as_ref(), &settings);

        let saved_index = if significant && !settings.paused {
            let index = self
                .session
                .append(frame.frame_number, frame.captured_at, objects.clone())?;
            *prev = Some(objects.clone());
            Some(index)
        } else {
            None
        };
        drop(prev);

        self.stats.record(&objects, saved_index.is_some())?;

        Ok(FrameOutcome {
            significant,
            saved_index,
            object_count: objects.len(),
        })
    }

    /// Autosave when the configured interval has elapsed. Returns true if a
    /// save was attempted. Save failures are logged, not propagated; the
    /// session store is unaffected and the next attempt proceeds normally.
    pub fn maybe_autosave(&self) -> Result<bool> {
        let interval = Duration::from_secs(self.settings.get()?.save_interval_secs);
        let mut last = self
            .last_autosave
            .lock()
            .map_err(|_| anyhow!("autosave clock lock poisoned"))?;
        if last.elapsed() < interval {
            return Ok(false);
        }
        *last = Instant::now();
        drop(last);

        if self.session.is_empty()? {
            return Ok(false);
        }
        if let Err(err) = self.save(false) {
            log::error!("autosave failed: {err:#}");
        }
        Ok(true)
    }

    // -------------------- Control surface --------------------

    /// Stats snapshot. `total_objects` is recomputed from the session store
    /// at read time, never from a divergent cache.
    pub fn stats(&self) -> Result<Stats> {
        let total_objects = self.session.total_objects()?;
        let paused = self.settings.get()?.paused;
        self.stats.snapshot(total_objects, paused)
    }

    /// The most recently persisted detection set (empty before the first
    /// persisted frame).
    pub fn current_objects(&self) -> Result<ObjectMap> {
        self.session.latest_objects()
    }

    /// Last `count` individual detections across recent persisted frames,
    /// most-recent-first.
    pub fn recent_detections(&self, count: usize) -> Result<Vec<RecentDetection>> {
        self.session.recent_detections(count)
    }

    /// Flip the pause flag. Entering or leaving pause resets the
    /// previous-object baseline, so the first frame after resume is always
    /// treated as significant.
    pub fn toggle_pause(&self) -> Result<bool> {
        self.ensure_mutable()?;
        let paused = self.settings.toggle_pause()?;
        self.reset_prev_objects()?;
        let mut state = self.lock_lifecycle()?;
        *state = if paused {
            Lifecycle::Paused
        } else {
            Lifecycle::Running
        };
        Ok(paused)
    }

    pub fn update_settings(&self, update: &SettingsUpdate) -> Result<Settings> {
        self.ensure_mutable()?;
        let before = self.settings.get()?;
        let applied = self.settings.apply(update)?;
        if before.paused != applied.paused {
            self.reset_prev_objects()?;
        }
        Ok(applied)
    }

    pub fn settings(&self) -> Result<Settings> {
        self.settings.get()
    }

    /// Save the current session immediately (autosave location). Returns
    /// the persisted frame count.
    pub fn force_save(&self) -> Result<u64> {
        if self.session.is_empty()? {
            return Err(anyhow!("no annotations to save"));
        }
        self.save(false)
    }

    /// Full session document for download/export.
    pub fn export_session(&self) -> Result<SessionDocument> {
        Ok(SessionDocument::build(
            self.session.snapshot()?,
            self.stats()?,
            self.settings.get()?,
        ))
    }

    /// Write the latest broadcast frame under the screenshots directory.
    /// Returns the stored file name.
    pub fn take_snapshot(&self) -> Result<String> {
        let Some(frame) = self.broadcast.latest()? else {
            return Err(anyhow!("no frame available"));
        };
        std::fs::create_dir_all(&self.screenshots_dir)?;
        let filename = format!(
            "snapshot_{}.{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            frame.format.extension()
        );
        std::fs::write(self.screenshots_dir.join(&filename), &frame.data)?;
        log::info!("snapshot stored as {filename}");
        Ok(filename)
    }

    /// Empty the session store and reset the change-detection baseline.
    pub fn clear_annotations(&self) -> Result<()> {
        self.ensure_mutable()?;
        self.session.clear()?;
        self.reset_prev_objects()
    }

    pub fn reset_stats(&self) -> Result<()> {
        self.ensure_mutable()?;
        self.stats.reset()
    }

    /// Latest-frame / stream access for streaming consumers.
    pub fn broadcast(&self) -> &FrameBroadcast {
        &self.broadcast
    }

    // -------------------- Internals --------------------

    fn reset_prev_objects(&self) -> Result<()> {
        let mut prev = self
            .prev_objects
            .lock()
            .map_err(|_| anyhow!("previous-object lock poisoned"))?;
        *prev = None;
        Ok(())
    }

    fn save(&self, final_save: bool) -> Result<u64> {
        let session = self.session.snapshot()?;
        let stats = self.stats()?;
        let settings = self.settings.get()?;
        self.persist.save_snapshot(session, stats, settings, final_save)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FrameFormat;
    use crate::BoundingBox;

    fn test_engine(dir: &std::path::Path) -> AnnotatorEngine {
        let engine = AnnotatorEngine::new(EngineConfig {
            output_path: dir.join("annotations.json"),
            autosave_path: dir.join("autosave_annotations.json"),
            screenshots_dir: dir.join("screenshots"),
            ..EngineConfig::default()
        })
        .expect("engine");
        engine.mark_running().expect("running");
        engine
    }

    fn frame(n: u64) -> Frame {
        Frame {
            frame_number: n,
            width: 640,
            height: 480,
            format: FrameFormat::Rgb24,
            data: vec![0u8; 16],
            captured_at: Utc::now(),
        }
    }

    fn person_at(x: i32, y: i32) -> RawDetection {
        RawDetection {
            label: "person".to_string(),
            class_id: 0,
            bbox: BoundingBox {
                x1: x,
                y1: y,
                x2: x + 10,
                y2: y + 10,
            },
            confidence: 0.9,
        }
    }

    #[test]
    fn first_frame_saved_identical_skipped_moved_saved() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());

        let first = engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        assert_eq!(first.saved_index, Some(1));

        let second = engine.process_frame(&frame(2), &[person_at(0, 0)]).unwrap();
        assert!(!second.significant);
        assert_eq!(second.saved_index, None);

        // Center moves by more than the 50 px default threshold.
        let third = engine
            .process_frame(&frame(3), &[person_at(60, 60)])
            .unwrap();
        assert_eq!(third.saved_index, Some(2));

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total_frames, 3);
        assert_eq!(stats.saved_frames, 2);
        assert_eq!(stats.total_objects, 2);
    }

    #[test]
    fn pause_resume_resets_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());

        engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        assert!(engine.toggle_pause().unwrap());
        assert_eq!(engine.lifecycle().unwrap(), Lifecycle::Paused);

        // Paused with SkipDetection: frame counted, nothing appended.
        let paused = engine.process_frame(&frame(2), &[]).unwrap();
        assert_eq!(paused.saved_index, None);

        assert!(!engine.toggle_pause().unwrap());
        // Identical to the pre-pause frame, yet saved: baseline was reset.
        let resumed = engine.process_frame(&frame(3), &[person_at(0, 0)]).unwrap();
        assert_eq!(resumed.saved_index, Some(2));
    }

    #[test]
    fn paused_discard_mode_runs_detection_but_never_appends() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine
            .update_settings(&SettingsUpdate {
                pause_mode: Some(PauseMode::AlwaysSignificantDiscarded),
                paused: Some(true),
                ..SettingsUpdate::default()
            })
            .unwrap();

        let outcome = engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        assert!(outcome.significant);
        assert_eq!(outcome.saved_index, None);
        assert_eq!(outcome.object_count, 1);
        assert_eq!(engine.session.len().unwrap(), 0);
    }

    #[test]
    fn current_objects_tracks_last_persisted_set() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        assert!(engine.current_objects().unwrap().is_empty());

        engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        let objects = engine.current_objects().unwrap();
        assert_eq!(objects.len(), 1);
        assert!(objects.contains_key("person_0"));
    }

    #[test]
    fn clear_annotations_resets_session_and_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        engine.clear_annotations().unwrap();

        assert_eq!(engine.session.len().unwrap(), 0);
        // Identical frame is significant again after the reset.
        let outcome = engine.process_frame(&frame(2), &[person_at(0, 0)]).unwrap();
        assert_eq!(outcome.saved_index, Some(1));
    }

    #[test]
    fn force_save_requires_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        assert!(engine.force_save().is_err());

        engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        assert_eq!(engine.force_save().unwrap(), 1);
    }

    #[test]
    fn finalize_writes_final_document_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();

        engine.begin_shutdown();
        assert!(engine.should_stop());
        engine.finalize().unwrap();
        assert_eq!(engine.lifecycle().unwrap(), Lifecycle::Stopped);

        let doc = SessionDocument::read(&dir.path().join("annotations.json")).unwrap();
        assert_eq!(doc.metadata.total_frames, 1);

        // Mutation after Stopped is rejected.
        assert!(engine.process_frame(&frame(2), &[]).is_err());
        assert!(engine.toggle_pause().is_err());
    }

    #[test]
    fn export_matches_session_contents() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.process_frame(&frame(1), &[person_at(0, 0)]).unwrap();
        engine
            .process_frame(&frame(2), &[person_at(200, 200)])
            .unwrap();

        let doc = engine.export_session().unwrap();
        assert_eq!(doc.frames.len(), 2);
        assert_eq!(doc.metadata.total_objects, 2);
        assert_eq!(doc.statistics.saved_frames, 2);
        let indices: Vec<u64> = doc.frames.values().map(|f| f.saved_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[test]
    fn snapshot_writes_latest_frame() {
        let dir = tempfile::tempdir().unwrap();
        let engine = test_engine(dir.path());
        assert!(engine.take_snapshot().is_err());

        engine.process_frame(&frame(1), &[]).unwrap();
        let filename = engine.take_snapshot().unwrap();
        assert!(filename.starts_with("snapshot_"));
        assert!(dir.path().join("screenshots").join(&filename).exists());
    }
}
