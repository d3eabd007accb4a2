//! Buffer bound property and concurrent append/snapshot stress.

use chrono::Utc;
use imu_drift_monitor::{Sample, SampleBuffer};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn sample(sensor_id: u32, seq: u64) -> Sample {
    Sample {
        sensor_id,
        arrival_time: Utc::now(),
        roll: seq as f64,
        pitch: 0.0,
        yaw: 0.0,
        gyro_x: 0.0,
        gyro_y: 0.0,
        gyro_z: 0.0,
    }
}

proptest! {
    #[test]
    fn prop_length_is_min_of_appends_and_capacity(
        capacity in 1usize..64,
        batches in proptest::collection::vec(0usize..20, 0..30),
    ) {
        let buffer = SampleBuffer::new(capacity);
        let mut seq = 0u64;

        for batch_len in batches {
            let batch: Vec<Sample> = (0..batch_len)
                .map(|_| {
                    seq += 1;
                    sample(0, seq)
                })
                .collect();
            // Alternate single appends and batched appends.
            if batch_len % 2 == 0 {
                buffer.append_all(&batch);
            } else {
                for s in batch {
                    buffer.append(s);
                }
            }

            let appended = seq as usize;
            prop_assert_eq!(buffer.len(), appended.min(capacity));

            // Contents are the most recent `capacity` samples, in arrival order.
            let rolls: Vec<u64> = buffer.snapshot().iter().map(|s| s.roll as u64).collect();
            let first = appended.saturating_sub(capacity) as u64 + 1;
            let expected: Vec<u64> = (first..=seq).collect();
            prop_assert_eq!(rolls, expected);
        }
    }
}

#[test]
fn test_concurrent_appends_and_snapshots() {
    const PRODUCERS: u32 = 8;
    const PER_PRODUCER: u64 = 1_250;
    const CAPACITY: usize = 1_000;

    let buffer = Arc::new(SampleBuffer::new(CAPACITY));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    buffer.append(sample(producer, seq));
                }
            })
        })
        .collect();

    let reader = {
        let buffer = Arc::clone(&buffer);
        thread::spawn(move || {
            for _ in 0..100 {
                let snapshot = buffer.snapshot();
                assert!(snapshot.len() <= CAPACITY);

                // Each producer's samples stay in the order it appended them.
                for producer in 0..PRODUCERS {
                    let seqs: Vec<f64> = snapshot
                        .iter()
                        .filter(|s| s.sensor_id == producer)
                        .map(|s| s.roll)
                        .collect();
                    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
                }
                thread::yield_now();
            }
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    reader.join().unwrap();

    let metrics = buffer.metrics();
    assert_eq!(metrics.total_appended, PRODUCERS as u64 * PER_PRODUCER);
    assert_eq!(
        metrics.total_evicted,
        PRODUCERS as u64 * PER_PRODUCER - CAPACITY as u64
    );
    assert_eq!(buffer.len(), CAPACITY);
}
