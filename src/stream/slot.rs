//! Latest-frame handoff between producers and consumers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::stream::frame::{Frame, SharedFrame};

/// Single-writer, many-reader cell holding the newest complete frame.
///
/// Readers take an `Arc` snapshot and may keep it as long as they like;
/// publishing never waits on readers and a read never observes a torn
/// frame. Sequence numbers must advance strictly, so a stale or duplicate
/// publish is rejected and the cell only moves forward. This is what
/// decouples a producer at line rate from consumers repainting at a few
/// frames per second without a growing queue.
pub struct LatestSlot {
    cell: ArcSwapOption<Frame>,
    sealed: AtomicBool,
}

impl LatestSlot {
    pub fn new() -> Self {
        Self {
            cell: ArcSwapOption::empty(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Publish a newer frame. Returns false (frame dropped) when the slot
    /// is sealed or `frame.sequence` does not advance past the current one.
    ///
    /// One writer per slot is the contract; the monotonicity check is
    /// exact only under a single publisher. Sealing is checked first, so
    /// a publish racing `seal` may still land - that frame was in flight
    /// before the stop and keeping it is harmless.
    pub fn publish(&self, frame: Frame) -> bool {
        if self.sealed.load(Ordering::Acquire) {
            return false;
        }
        if let Some(current) = self.cell.load().as_deref() {
            if frame.sequence <= current.sequence {
                return false;
            }
        }
        self.cell.store(Some(Arc::new(frame)));
        true
    }

    /// Snapshot the newest frame, if any has arrived yet.
    pub fn read(&self) -> Option<SharedFrame> {
        self.cell.load_full()
    }

    pub fn latest_sequence(&self) -> Option<u64> {
        self.cell.load().as_deref().map(|frame| frame.sequence)
    }

    /// Refuse all further writes while keeping the last frame readable.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl Default for LatestSlot {
    fn default() -> Self {
        Self::new()
    }
}
