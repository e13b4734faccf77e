//! Frame broadcast: shares the single most recent frame and a bounded
//! stream of frames between the producer loop and concurrent consumers.
//!
//! The producer must never block on consumers. The latest-frame cell is
//! overwritten on every publish, and the stream queue drops its oldest
//! entry when full. Consumers pull with a timeout and re-poll on empty;
//! an empty pull is not end-of-stream.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::ingest::Frame;

pub const DEFAULT_STREAM_CAPACITY: usize = 10;
pub const MAX_STREAM_CAPACITY: usize = 64;

struct StreamShared {
    queue: Mutex<VecDeque<Frame>>,
    available: Condvar,
    capacity: usize,
}

/// Latest-frame cell plus the shared drop-oldest stream queue.
pub struct FrameBroadcast {
    latest: Mutex<Option<Frame>>,
    stream: Arc<StreamShared>,
}

impl FrameBroadcast {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || capacity > MAX_STREAM_CAPACITY {
            return Err(anyhow!(
                "stream capacity must be in 1..={}, got {}",
                MAX_STREAM_CAPACITY,
                capacity
            ));
        }
        Ok(Self {
            latest: Mutex::new(None),
            stream: Arc::new(StreamShared {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                available: Condvar::new(),
                capacity,
            }),
        })
    }

    /// Publish a frame: overwrite the latest cell and push to the stream
    /// queue, evicting the oldest queued frame when full. Never blocks the
    /// producer beyond the two short lock acquisitions.
    pub fn publish(&self, frame: Frame) -> Result<()> {
        {
            let mut latest = self
                .latest
                .lock()
                .map_err(|_| anyhow!("latest frame lock poisoned"))?;
            *latest = Some(frame.clone());
        }

        let mut queue = self
            .stream
            .queue
            .lock()
            .map_err(|_| anyhow!("frame stream lock poisoned"))?;
        while queue.len() >= self.stream.capacity {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);
        self.stream.available.notify_all();
        Ok(())
    }

    /// Copy of the most recently published frame, if any. Callers get an
    /// owned frame, never a shared reference into the cell.
    pub fn latest(&self) -> Result<Option<Frame>> {
        let latest = self
            .latest
            .lock()
            .map_err(|_| anyhow!("latest frame lock poisoned"))?;
        Ok(latest.clone())
    }

    /// Handle onto the shared stream queue.
    pub fn subscribe(&self) -> FrameStream {
        FrameStream {
            shared: Arc::clone(&self.stream),
        }
    }
}

/// Consumer handle for the bounded frame stream.
pub struct FrameStream {
    shared: Arc<StreamShared>,
}

impl FrameStream {
    /// Pop the oldest queued frame, waiting up to `timeout` for one to
    /// arrive. `Ok(None)` means the wait timed out; re-poll.
    pub fn pull(&self, timeout: Duration) -> Result<Option<Frame>> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| anyhow!("frame stream lock poisoned"))?;
        if let Some(frame) = queue.pop_front() {
            return Ok(Some(frame));
        }
        let (mut queue, wait) = self
            .shared
            .available
            .wait_timeout(queue, timeout)
            .map_err(|_| anyhow!("frame stream lock poisoned"))?;
        if wait.timed_out() && queue.is_empty() {
            return Ok(None);
        }
        Ok(queue.pop_front())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .shared
            .queue
            .lock()
            .map_err(|_| anyhow!("frame stream lock poisoned"))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FrameFormat;
    use chrono::Utc;

    fn frame(n: u64) -> Frame {
        Frame {
            frame_number: n,
            width: 4,
            height: 4,
            format: FrameFormat::Rgb24,
            data: vec![n as u8; 48],
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn latest_is_overwritten_on_publish() {
        let broadcast = FrameBroadcast::new(4).unwrap();
        assert!(broadcast.latest().unwrap().is_none());
        broadcast.publish(frame(1)).unwrap();
        broadcast.publish(frame(2)).unwrap();
        assert_eq!(broadcast.latest().unwrap().unwrap().frame_number, 2);
    }

    #[test]
    fn queue_never_exceeds_capacity_and_drops_oldest() {
        let broadcast = FrameBroadcast::new(3).unwrap();
        let stream = broadcast.subscribe();
        for n in 1..=10 {
            broadcast.publish(frame(n)).unwrap();
            assert!(stream.len().unwrap() <= 3);
        }
        // Oldest evicted first: 8, 9, 10 remain.
        let numbers: Vec<u64> = (0..3)
            .map(|_| {
                stream
                    .pull(Duration::from_millis(10))
                    .unwrap()
                    .unwrap()
                    .frame_number
            })
            .collect();
        assert_eq!(numbers, vec![8, 9, 10]);
    }

    #[test]
    fn pull_times_out_with_none() {
        let broadcast = FrameBroadcast::new(2).unwrap();
        let stream = broadcast.subscribe();
        assert!(stream.pull(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn pull_wakes_on_publish_from_another_thread() {
        let broadcast = Arc::new(FrameBroadcast::new(2).unwrap());
        let stream = broadcast.subscribe();
        let publisher = Arc::clone(&broadcast);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            publisher.publish(frame(7)).unwrap();
        });
        let pulled = stream.pull(Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
        assert_eq!(pulled.unwrap().frame_number, 7);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(FrameBroadcast::new(0).is_err());
        assert!(FrameBroadcast::new(MAX_STREAM_CAPACITY + 1).is_err());
    }
}
