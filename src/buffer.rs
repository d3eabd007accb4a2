//! Bounded, thread-safe store of arriving samples.
//!
//! The receive loop appends, the controller snapshots. Every operation takes the
//! same lock and holds it only for the copy or append, so no caller ever observes
//! a partially updated buffer.

use crate::stream::Sample;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of samples retained.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Counters describing buffer activity since the last `clear()`.
///
/// Taken under the buffer lock, so `total_appended - total_evicted == current_len`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferMetrics {
    pub total_appended: u64,
    pub total_evicted: u64,
    pub current_len: usize,
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct Contents {
    samples: VecDeque<Sample>,
    total_appended: u64,
    total_evicted: u64,
}

impl Contents {
    fn push(&mut self, sample: Sample, capacity: usize) {
        self.samples.push_back(sample);
        self.total_appended += 1;
        while self.samples.len() > capacity {
            self.samples.pop_front();
            self.total_evicted += 1;
        }
    }
}

/// Capacity-bounded sample store; the oldest samples are evicted first.
#[derive(Debug)]
pub struct SampleBuffer {
    contents: Mutex<Contents>,
    capacity: usize,
}

impl SampleBuffer {
    /// Create a buffer holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            contents: Mutex::new(Contents {
                samples: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                ..Contents::default()
            }),
            capacity,
        }
    }

    /// Append one sample, evicting the oldest if the buffer would exceed capacity.
    pub fn append(&self, sample: Sample) {
        self.contents.lock().push(sample, self.capacity);
    }

    /// Append every sample of one decoded message under a single lock acquisition.
    pub fn append_all(&self, batch: &[Sample]) {
        if batch.is_empty() {
            return;
        }

        let mut contents = self.contents.lock();
        for sample in batch {
            contents.push(*sample, self.capacity);
        }
    }

    /// Point-in-time copy of the contents, in arrival order.
    pub fn snapshot(&self) -> Vec<Sample> {
        let contents = self.contents.lock();
        contents.samples.iter().copied().collect()
    }

    /// Remove every sample and reset the counters.
    pub fn clear(&self) {
        let mut contents = self.contents.lock();
        contents.samples.clear();
        contents.total_appended = 0;
        contents.total_evicted = 0;
    }

    pub fn len(&self) -> usize {
        self.contents.lock().samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.lock().samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metrics(&self) -> BufferMetrics {
        let contents = self.contents.lock();
        BufferMetrics {
            total_appended: contents.total_appended,
            total_evicted: contents.total_evicted,
            current_len: contents.samples.len(),
            capacity: self.capacity,
        }
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(sensor_id: u32, roll: f64) -> Sample {
        Sample {
            sensor_id,
            arrival_time: Utc::now(),
            roll,
            pitch: 0.0,
            yaw: 0.0,
            gyro_x: 0.0,
            gyro_y: 0.0,
            gyro_z: 0.0,
        }
    }

    #[test]
    fn test_append_and_snapshot_preserve_order() {
        let buffer = SampleBuffer::new(10);
        for i in 0..5 {
            buffer.append(sample(0, i as f64));
        }

        let snapshot = buffer.snapshot();
        let rolls: Vec<f64> = snapshot.iter().map(|s| s.roll).collect();
        assert_eq!(rolls, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let buffer = SampleBuffer::new(3);
        for i in 0..7 {
            buffer.append(sample(0, i as f64));
        }

        let rolls: Vec<f64> = buffer.snapshot().iter().map(|s| s.roll).collect();
        assert_eq!(rolls, vec![4.0, 5.0, 6.0]);

        let metrics = buffer.metrics();
        assert_eq!(metrics.total_appended, 7);
        assert_eq!(metrics.total_evicted, 4);
        assert_eq!(metrics.current_len, 3);
    }

    #[test]
    fn test_append_all_respects_capacity() {
        let buffer = SampleBuffer::new(4);
        let batch: Vec<Sample> = (0..6).map(|i| sample(i, i as f64)).collect();
        buffer.append_all(&batch);

        let ids: Vec<u32> = buffer.snapshot().iter().map(|s| s.sensor_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let buffer = SampleBuffer::new(10);
        buffer.append(sample(1, 1.0));
        let snapshot = buffer.snapshot();

        buffer.append(sample(1, 2.0));
        buffer.clear();

        assert_eq!(snapshot.len(), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.metrics().total_appended, 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let buffer = SampleBuffer::new(0);
        buffer.append(sample(0, 1.0));
        buffer.append(sample(0, 2.0));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot()[0].roll, 2.0);
    }

    #[test]
    fn test_metrics_stay_consistent_under_concurrent_clear() {
        use std::sync::Arc;
        use std::thread;

        let buffer = Arc::new(SampleBuffer::new(64));
        let writers: Vec<_> = (0..4)
            .map(|sensor_id| {
                let buffer = Arc::clone(&buffer);
                thread::spawn(move || {
                    for i in 0..2_000 {
                        buffer.append(sample(sensor_id, i as f64));
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            buffer.clear();
            let metrics = buffer.metrics();
            assert_eq!(
                metrics.total_appended - metrics.total_evicted,
                metrics.current_len as u64
            );
            thread::yield_now();
        }

        for writer in writers {
            writer.join().unwrap();
        }
        let metrics = buffer.metrics();
        assert_eq!(
            metrics.total_appended - metrics.total_evicted,
            metrics.current_len as u64
        );
    }
}
