//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// Evictability is not tracked here; `evict` consults the caller through a
/// predicate so that the frame's pin count stays the single source of truth.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim among frames for which `can_evict` returns true.
    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets any access history for a frame.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// One reference bit per frame, set on access; the clock hand sweeps,
/// clearing bits, and evicts the first evictable frame whose bit is clear.
pub struct ClockReplacer {
    reference_bits: Vec<AtomicBool>,
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the number of frames tracked.
    pub fn capacity(&self) -> usize {
        self.reference_bits.len()
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, can_evict: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let num_frames = self.reference_bits.len();
        if num_frames == 0 {
            return None;
        }

        let mut hand = self.clock_hand.lock();
        // Two full rotations: the first may only clear reference bits.
        for _ in 0..(2 * num_frames) {
            let idx = *hand;
            *hand = (idx + 1) % num_frames;

            let frame_id = FrameId(idx as u32);
            if !can_evict(frame_id) {
                continue;
            }
            if self.reference_bits[idx].swap(false, Ordering::Relaxed) {
                continue;
            }
            return Some(frame_id);
        }
        None
    }

    fn remove(&self, frame_id: FrameId) {
        if let Some(bit) = self.reference_bits.get(frame_id.0 as usize) {
            bit.store(false, Ordering::Relaxed);
        }
    }
}
