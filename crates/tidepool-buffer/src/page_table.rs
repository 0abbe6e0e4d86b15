//! Page table mapping (file, page number) to the frame holding it.

use crate::frame::FrameId;
use tidepool_common::page::PageId;
use tidepool_common::{Result, TidepoolError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    /// Deleted entry; probing continues past it.
    Tombstone,
    Occupied(PageId, FrameId),
}

/// Open-addressing hash table with linear probing.
///
/// The slot array is sized with at least 20% slack over the pool capacity and
/// rounded up to a power of two, so a full pool never exhausts the table.
/// Tombstones left by removals are compacted away once they outnumber half
/// the slots.
pub struct PageTable {
    slots: Box<[Slot]>,
    /// Bitmask for slot indexing (slots.len() - 1).
    mask: usize,
    len: usize,
    tombstones: usize,
}

impl PageTable {
    /// Creates a new page table with room for `capacity` live entries.
    pub fn new(capacity: usize) -> Self {
        let with_slack = capacity + capacity / 5 + 1;
        let size = with_slack.next_power_of_two();

        Self {
            slots: vec![Slot::Empty; size].into_boxed_slice(),
            mask: size - 1,
            len: 0,
            tombstones: 0,
        }
    }

    /// Computes the home slot for a key.
    #[inline(always)]
    fn home(&self, page_id: PageId) -> usize {
        // FxHash-style multiply for distribution
        let hash = page_id.as_u64().wrapping_mul(0x517cc1b727220a95);
        ((hash >> 32) as usize) & self.mask
    }

    /// Returns the slot index holding `page_id`, if present.
    fn find(&self, page_id: PageId) -> Option<usize> {
        let mut idx = self.home(page_id);
        for _ in 0..self.slots.len() {
            match self.slots[idx] {
                Slot::Empty => return None,
                Slot::Occupied(key, _) if key == page_id => return Some(idx),
                _ => {}
            }
            idx = (idx + 1) & self.mask;
        }
        None
    }

    /// Looks up the frame holding `page_id`.
    #[inline]
    pub fn lookup(&self, page_id: PageId) -> Result<FrameId> {
        match self.find(page_id) {
            Some(idx) => match self.slots[idx] {
                Slot::Occupied(_, frame_id) => Ok(frame_id),
                _ => Err(TidepoolError::HashNotFound),
            },
            None => Err(TidepoolError::HashNotFound),
        }
    }

    /// Inserts a mapping. Fails if the key is already present.
    pub fn insert(&mut self, page_id: PageId, frame_id: FrameId) -> Result<()> {
        let mut idx = self.home(page_id);
        let mut reusable = None;

        for _ in 0..self.slots.len() {
            match self.slots[idx] {
                Slot::Empty => {
                    let target = reusable.unwrap_or(idx);
                    self.occupy(target, page_id, frame_id);
                    return Ok(());
                }
                Slot::Tombstone => {
                    if reusable.is_none() {
                        reusable = Some(idx);
                    }
                }
                Slot::Occupied(key, _) if key == page_id => {
                    return Err(TidepoolError::HashAlreadyPresent);
                }
                Slot::Occupied(..) => {}
            }
            idx = (idx + 1) & self.mask;
        }

        // Probed every slot without meeting an empty one.
        match reusable {
            Some(target) => {
                self.occupy(target, page_id, frame_id);
                Ok(())
            }
            None => Err(TidepoolError::HashTableFull),
        }
    }

    fn occupy(&mut self, idx: usize, page_id: PageId, frame_id: FrameId) {
        if self.slots[idx] == Slot::Tombstone {
            self.tombstones -= 1;
        }
        self.slots[idx] = Slot::Occupied(page_id, frame_id);
        self.len += 1;
    }

    /// Removes a mapping and returns the frame it pointed to.
    pub fn remove(&mut self, page_id: PageId) -> Result<FrameId> {
        let idx = self.find(page_id).ok_or(TidepoolError::HashNotFound)?;
        let frame_id = match self.slots[idx] {
            Slot::Occupied(_, frame_id) => frame_id,
            _ => return Err(TidepoolError::HashNotFound),
        };

        self.slots[idx] = Slot::Tombstone;
        self.len -= 1;
        self.tombstones += 1;

        if self.tombstones > self.slots.len() / 2 {
            self.compact();
        }
        Ok(frame_id)
    }

    /// Rebuilds the slot array without tombstones.
    fn compact(&mut self) {
        let live: Vec<(PageId, FrameId)> = self
            .slots
            .iter()
            .filter_map(|slot| match *slot {
                Slot::Occupied(page_id, frame_id) => Some((page_id, frame_id)),
                _ => None,
            })
            .collect();

        self.slots.fill(Slot::Empty);
        self.len = 0;
        self.tombstones = 0;

        for (page_id, frame_id) in live {
            let mut idx = self.home(page_id);
            while self.slots[idx] != Slot::Empty {
                idx = (idx + 1) & self.mask;
            }
            self.occupy(idx, page_id, frame_id);
        }
    }

    /// Returns true if the page ID is in the table.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.find(page_id).is_some()
    }

    /// Returns the number of entries in the table.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the number of slots backing the table.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterates over all entries in slot order, calling the provided function
    /// for each. Returns early if the function returns false.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(PageId, FrameId) -> bool,
    {
        for slot in self.slots.iter() {
            if let Slot::Occupied(page_id, frame_id) = *slot {
                if !f(page_id, frame_id) {
                    return;
                }
            }
        }
    }
}
