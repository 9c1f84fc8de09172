//! Page replacement policy for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim frame for eviction.
    ///
    /// `can_evict` decides whether a frame is a legal victim (typically:
    /// occupied and unpinned). Returns None if no frame qualifies.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Removes a frame from consideration, clearing its access history.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// Keeps one reference bit per frame, set on access. The clock hand sweeps
/// the frames; a referenced candidate gets a second chance (bit cleared),
/// an unreferenced one is evicted.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits for each frame (atomic for lock-free access).
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let reference_bits = (0..num_frames).map(|_| AtomicBool::new(false)).collect();

        Self {
            num_frames,
            reference_bits,
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();

        // Two full rotations: one may only clear reference bits.
        for _ in 0..(2 * self.num_frames) {
            let idx = *hand;
            let frame_id = FrameId(idx as u32);
            *hand = (idx + 1) % self.num_frames;

            if !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[idx].load(Ordering::Relaxed) {
                // Second chance: clear and keep sweeping
                self.reference_bits[idx].store(false, Ordering::Relaxed);
            } else {
                return Some(frame_id);
            }
        }

        None
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}
