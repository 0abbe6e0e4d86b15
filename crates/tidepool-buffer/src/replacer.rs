//! Page replacement policies for the buffer pool.

use crate::frame::{FrameDescriptor, FrameId};

/// Outcome of a victim search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Victim {
    /// The frame holds no page and can be used as is.
    Free(FrameId),
    /// The frame holds an unpinned, unreferenced page that must be written
    /// back (if dirty) and unmapped before reuse.
    Evict(FrameId),
}

impl Victim {
    /// Returns the selected frame.
    pub fn frame_id(&self) -> FrameId {
        match *self {
            Victim::Free(frame_id) | Victim::Evict(frame_id) => frame_id,
        }
    }
}

/// Trait for page replacement algorithms.
///
/// A replacer only chooses; it may clear recency hints on the descriptors it
/// passes over but never unmaps a page or performs I/O.
pub trait Replacer: Send {
    /// Selects the next frame to hand out.
    ///
    /// Returns None when every frame is pinned.
    fn select_victim(&mut self, frames: &mut [FrameDescriptor]) -> Option<Victim>;

    /// Returns the number of frames the replacer scans over.
    fn capacity(&self) -> usize;
}

/// Clock (second chance) replacement.
///
/// The hand advances before every examination:
/// 1. An invalid frame is returned immediately as free.
/// 2. A referenced frame has its reference bit cleared and is skipped.
/// 3. A pinned frame is skipped and counted.
/// 4. Anything else is the victim.
///
/// Termination: the scan examines at most two full sweeps. The first visit
/// to an unpinned frame either evicts it or clears its reference bit, so
/// the second visit evicts it. A scan that finishes both sweeps without a
/// victim has therefore seen every frame pinned, and reports exhaustion.
/// Callers hold the pool lock, so nothing re-pins or re-references a frame
/// mid-scan.
pub struct ClockReplacer {
    /// Total number of frames.
    num_frames: usize,
    /// Current clock hand position.
    clock_hand: usize,
}

impl ClockReplacer {
    /// Creates a new clock replacer with the given number of frames.
    ///
    /// The hand starts on the last frame so the first examination is frame 0.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            clock_hand: num_frames.saturating_sub(1),
        }
    }

    /// Returns the current hand position.
    pub fn hand(&self) -> usize {
        self.clock_hand
    }

    #[inline]
    fn advance(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.num_frames;
    }
}

impl Replacer for ClockReplacer {
    fn select_victim(&mut self, frames: &mut [FrameDescriptor]) -> Option<Victim> {
        debug_assert_eq!(frames.len(), self.num_frames);
        if self.num_frames == 0 {
            return None;
        }

        for _ in 0..2 * self.num_frames {
            self.advance();
            let desc = &mut frames[self.clock_hand];

            if !desc.is_valid() {
                desc.clear();
                return Some(Victim::Free(desc.frame_id()));
            }
            if desc.referenced {
                desc.referenced = false;
                continue;
            }
            if desc.is_pinned() {
                continue;
            }
            return Some(Victim::Evict(desc.frame_id()));
        }
        None
    }

    fn capacity(&self) -> usize {
        self.num_frames
    }
}
