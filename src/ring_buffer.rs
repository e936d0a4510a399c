use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::frame::AudioFrame;

/// Fixed-capacity frame buffer between the capture callback and the
/// processing thread.
///
/// `push` holds the lock only long enough to append (and at capacity,
/// discard the oldest unread frame), so the capture callback is never
/// blocked for more than a bounded constant time. Overflow is an explicit
/// lossy-backpressure policy: oldest data drops first, an observable
/// counter increments, and ordering of the surviving frames is preserved.
#[derive(Clone)]
pub struct FrameRing {
    inner: Arc<Mutex<VecDeque<AudioFrame>>>,
    capacity: usize,
    overflow: Arc<AtomicU64>,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        FrameRing {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
            overflow: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append a frame, discarding the oldest unread frame when full.
    pub fn push(&self, frame: AudioFrame) {
        // Handle poisoned mutex gracefully in the audio callback path
        let Ok(mut queue) = self.inner.lock() else {
            eprintln!("⚠️  Frame ring mutex poisoned, dropping frame");
            return;
        };
        if queue.len() == self.capacity {
            queue.pop_front();
            self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(frame);
    }

    /// Remove and return up to `max_frames` of the oldest available frames.
    pub fn drain(&self, max_frames: usize) -> Vec<AudioFrame> {
        let Ok(mut queue) = self.inner.lock() else {
            return Vec::new();
        };
        let count = queue.len().min(max_frames);
        queue.drain(..count).collect()
    }

    /// Discard everything currently buffered.
    pub fn clear(&self) {
        if let Ok(mut queue) = self.inner.lock() {
            queue.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total frames discarded due to overflow since creation.
    /// Strictly non-decreasing.
    pub fn overflow_count(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn frame(tag: f32) -> AudioFrame {
        AudioFrame::new(vec![tag; 16], Instant::now())
    }

    #[test]
    fn drain_returns_oldest_first() {
        let ring = FrameRing::new(8);
        for i in 0..4 {
            ring.push(frame(i as f32 * 0.1));
        }
        let drained = ring.drain(2);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].samples[0], 0.0);
        assert_eq!(drained[1].samples[0], 0.1);
        assert_eq!(ring.len(), 2);
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let ring = FrameRing::new(3);
        for i in 0..10 {
            ring.push(frame(i as f32));
        }
        // Oldest 7 frames dropped, counter reflects every drop
        assert_eq!(ring.overflow_count(), 7);
        assert_eq!(ring.len(), 3);

        let drained = ring.drain(16);
        let tags: Vec<f32> = drained.iter().map(|f| f.samples[0]).collect();
        assert_eq!(tags, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn overflow_counter_strictly_increases_under_sustained_load() {
        let ring = FrameRing::new(2);
        let mut last = 0;
        for i in 0..50 {
            ring.push(frame(i as f32));
            let count = ring.overflow_count();
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 48);
    }

    #[test]
    fn no_frame_duplication_across_drains() {
        let ring = FrameRing::new(64);
        for i in 0..20 {
            ring.push(frame(i as f32));
        }
        let mut seen = Vec::new();
        loop {
            let batch = ring.drain(7);
            if batch.is_empty() {
                break;
            }
            seen.extend(batch.iter().map(|f| f.samples[0]));
        }
        let expected: Vec<f32> = (0..20).map(|i| i as f32).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn push_from_second_thread() {
        let ring = FrameRing::new(128);
        let writer = ring.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                writer.push(frame(i as f32));
            }
        });
        handle.join().unwrap();
        assert_eq!(ring.len(), 100);
        assert_eq!(ring.overflow_count(), 0);
    }
}
