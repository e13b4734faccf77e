//! Live statistics derived from the producer loop and the session store.
//!
//! The aggregator is a cache, not a source of truth: per-label counts and
//! frame totals accumulate here, but `total_objects` is recomputed from the
//! session store at snapshot time so the two can never diverge.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::ObjectMap;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_HISTORY_SAMPLE_SECS: u64 = 2;

/// One entry of the bounded detection-history ring.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub object_count: usize,
}

/// Point-in-time statistics snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub total_frames: u64,
    pub saved_frames: u64,
    /// Always equals the sum of object counts across persisted frames.
    pub total_objects: u64,
    pub fps: f64,
    pub object_counts: IndexMap<String, u64>,
    pub detection_history: Vec<HistorySample>,
    pub is_paused: bool,
    pub start_time: DateTime<Utc>,
}

struct StatsInner {
    total_frames: u64,
    saved_frames: u64,
    object_counts: IndexMap<String, u64>,
    history: VecDeque<HistorySample>,
    started: Instant,
    started_at: DateTime<Utc>,
    last_sample: Option<Instant>,
}

/// Running statistics with a bounded history ring.
pub struct StatsAggregator {
    inner: Mutex<StatsInner>,
    history_capacity: usize,
    sample_interval: Duration,
}

impl StatsAggregator {
    pub fn new(history_capacity: usize, sample_interval: Duration) -> Self {
        Self {
            inner: Mutex::new(StatsInner::fresh()),
            history_capacity: history_capacity.max(1),
            sample_interval,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, StatsInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("stats lock poisoned"))
    }

    /// Record one processed frame. Per-label counts accumulate only for
    /// persisted frames, so they stay reconstructible from the session.
    /// History samples are appended on the aggregator's own cadence,
    /// independent of the save cadence.
    pub fn record(&self, detections: &ObjectMap, saved: bool) -> Result<()> {
        let mut inner = self.lock()?;
        inner.total_frames += 1;
        if saved {
            inner.saved_frames += 1;
            for det in detections.values() {
                *inner.object_counts.entry(det.label.clone()).or_insert(0) += 1;
            }
        }

        let due = match inner.last_sample {
            None => true,
            Some(last) => last.elapsed() >= self.sample_interval,
        };
        if due {
            inner.history.push_back(HistorySample {
                timestamp: Utc::now(),
                object_count: detections.len(),
            });
            while inner.history.len() > self.history_capacity {
                inner.history.pop_front();
            }
            inner.last_sample = Some(Instant::now());
        }
        Ok(())
    }

    /// Build a snapshot. `total_objects` comes from the session store so the
    /// cross-component invariant holds at read time.
    pub fn snapshot(&self, total_objects: u64, is_paused: bool) -> Result<Stats> {
        let inner = self.lock()?;
        let elapsed = inner.started.elapsed().as_secs_f64();
        let fps = if elapsed > 0.0 {
            inner.total_frames as f64 / elapsed
        } else {
            0.0
        };
        Ok(Stats {
            total_frames: inner.total_frames,
            saved_frames: inner.saved_frames,
            total_objects,
            fps,
            object_counts: inner.object_counts.clone(),
            detection_history: inner.history.iter().cloned().collect(),
            is_paused,
            start_time: inner.started_at,
        })
    }

    /// Drop all accumulated counters and history; the FPS window restarts.
    pub fn reset(&self) -> Result<()> {
        *self.lock()? = StatsInner::fresh();
        Ok(())
    }
}

impl StatsInner {
    fn fresh() -> Self {
        Self {
            total_frames: 0,
            saved_frames: 0,
            object_counts: IndexMap::new(),
            history: VecDeque::new(),
            started: Instant::now(),
            started_at: Utc::now(),
            last_sample: None,
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new(
            DEFAULT_HISTORY_CAPACITY,
            Duration::from_secs(DEFAULT_HISTORY_SAMPLE_SECS),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BoundingBox, Detection};

    fn one_person() -> ObjectMap {
        let mut map = ObjectMap::new();
        map.insert(
            "person_0".to_string(),
            Detection {
                label: "person".to_string(),
                class_id: 0,
                bbox: BoundingBox {
                    x1: 0,
                    y1: 0,
                    x2: 10,
                    y2: 10,
                },
                confidence: 0.9,
            },
        );
        map
    }

    #[test]
    fn counts_frames_and_saved_frames() {
        let stats = StatsAggregator::new(10, Duration::ZERO);
        stats.record(&one_person(), true).unwrap();
        stats.record(&one_person(), false).unwrap();
        stats.record(&one_person(), true).unwrap();

        let snap = stats.snapshot(2, false).unwrap();
        assert_eq!(snap.total_frames, 3);
        assert_eq!(snap.saved_frames, 2);
        assert_eq!(snap.object_counts.get("person"), Some(&2));
        assert_eq!(snap.total_objects, 2);
    }

    #[test]
    fn history_ring_evicts_oldest() {
        let stats = StatsAggregator::new(3, Duration::ZERO);
        for _ in 0..8 {
            stats.record(&one_person(), false).unwrap();
        }
        let snap = stats.snapshot(0, false).unwrap();
        assert_eq!(snap.detection_history.len(), 3);
    }

    #[test]
    fn history_honors_sample_cadence() {
        let stats = StatsAggregator::new(10, Duration::from_secs(3600));
        for _ in 0..5 {
            stats.record(&one_person(), false).unwrap();
        }
        // Only the first record falls inside the cadence window.
        let snap = stats.snapshot(0, false).unwrap();
        assert_eq!(snap.detection_history.len(), 1);
    }

    #[test]
    fn reset_clears_counters() {
        let stats = StatsAggregator::new(10, Duration::ZERO);
        stats.record(&one_person(), true).unwrap();
        stats.reset().unwrap();
        let snap = stats.snapshot(0, false).unwrap();
        assert_eq!(snap.total_frames, 0);
        assert_eq!(snap.saved_frames, 0);
        assert!(snap.object_counts.is_empty());
        assert!(snap.detection_history.is_empty());
    }
}
