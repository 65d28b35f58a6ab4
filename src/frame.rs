//! Frames and the capture → detection handoff.
//!
//! - `Frame`: one captured image with its sequence number and capture time.
//! - `FrameBatch`: consecutive frames captured while the motion gate was open.
//! - `FrameCache`: bounded FIFO of batches shared by the two pipeline stages.
//!   Pushing never blocks; when the cache is full the new batch is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDateTime;
use image::RgbImage;

/// Total seconds of footage the cache is sized for.
pub const CACHE_HORIZON_SECS: f64 = 300.0;

/// One captured frame. Immutable after capture.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Monotonic per-stream sequence number.
    pub seq: u64,
    pub captured_at: NaiveDateTime,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, captured_at: NaiveDateTime, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at,
            image,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Frames captured during one motion window, in capture order.
#[derive(Clone, Debug, Default)]
pub struct FrameBatch {
    pub frames: Vec<Frame>,
}

impl FrameBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn last(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Sequence range covered by the batch, for logs.
    pub fn seq_range(&self) -> Option<(u64, u64)> {
        Some((self.frames.first()?.seq, self.frames.last()?.seq))
    }
}

/// Bounded, ordered queue of pending batches.
pub struct FrameCache {
    queue: Mutex<VecDeque<FrameBatch>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Cache sized so that the pending batches cover about five minutes of
    /// gate windows of `linger_secs` each.
    pub fn with_linger(linger_secs: f64) -> Self {
        let capacity = if linger_secs > 0.0 {
            (CACHE_HORIZON_SECS / linger_secs) as usize
        } else {
            1
        };
        Self::new(capacity)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<FrameBatch>> {
        // A panic while holding the lock cannot leave the deque inconsistent.
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a batch. Returns `false` (and counts the drop) if the cache is full.
    pub fn push(&self, batch: FrameBatch) -> bool {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            drop(queue);
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            log::warn!(
                "frame cache full ({} batches), dropping batch of {} frames (total dropped: {})",
                self.capacity,
                batch.len(),
                total
            );
            return false;
        }
        queue.push_back(batch);
        true
    }

    /// Oldest pending batch.
    pub fn pop(&self) -> Option<FrameBatch> {
        self.lock().pop_front()
    }

    /// Number of pending batches.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
