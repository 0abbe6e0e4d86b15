//! In-memory page files.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tidepool_common::page::{FileId, PageBuf, PageId, PAGE_SIZE};
use tidepool_common::{PageFile, Result, TidepoolError};

/// Counts of the calls a [`MemoryFile`] has served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub reads: u64,
    pub writes: u64,
    pub allocs: u64,
    pub disposes: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    allocs: AtomicU64,
    disposes: AtomicU64,
}

struct MemoryState {
    /// Page slots; `None` for a disposed page.
    pages: Vec<Option<Box<PageBuf>>>,
    free: BTreeSet<u32>,
}

/// A page file held entirely in memory.
///
/// Allocation behaves like a disk file: disposed page numbers are reused
/// lowest first and new pages start zeroed. Only successful calls are
/// counted.
pub struct MemoryFile {
    file_id: FileId,
    state: Mutex<MemoryState>,
    counters: Counters,
}

impl MemoryFile {
    /// Creates an empty in-memory file.
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            state: Mutex::new(MemoryState {
                pages: Vec::new(),
                free: BTreeSet::new(),
            }),
            counters: Counters::default(),
        }
    }

    /// Returns the number of page slots, including disposed ones.
    pub fn num_pages(&self) -> u32 {
        self.state.lock().pages.len() as u32
    }

    /// Returns a snapshot of the I/O counters.
    pub fn stats(&self) -> IoStats {
        IoStats {
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            allocs: self.counters.allocs.load(Ordering::Relaxed),
            disposes: self.counters.disposes.load(Ordering::Relaxed),
        }
    }

    /// Zeroes the I/O counters.
    pub fn reset_stats(&self) {
        self.counters.reads.store(0, Ordering::Relaxed);
        self.counters.writes.store(0, Ordering::Relaxed);
        self.counters.allocs.store(0, Ordering::Relaxed);
        self.counters.disposes.store(0, Ordering::Relaxed);
    }

    fn not_found(&self, page_num: u32) -> TidepoolError {
        TidepoolError::PageNotFound {
            page_id: PageId::new(self.file_id, page_num),
        }
    }
}

impl PageFile for MemoryFile {
    fn file_id(&self) -> FileId {
        self.file_id
    }

    fn read_page(&self, page_num: u32, dst: &mut PageBuf) -> Result<()> {
        let state = self.state.lock();
        let page = state
            .pages
            .get(page_num as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| self.not_found(page_num))?;
        dst.copy_from_slice(&page[..]);
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn write_page(&self, page_num: u32, src: &PageBuf) -> Result<()> {
        let mut state = self.state.lock();
        let page = state
            .pages
            .get_mut(page_num as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| self.not_found(page_num))?;
        page.copy_from_slice(src);
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn allocate_page(&self) -> Result<u32> {
        let mut state = self.state.lock();
        let zeroed = Some(Box::new([0u8; PAGE_SIZE]));

        let page_num = match state.free.pop_first() {
            Some(page_num) => {
                state.pages[page_num as usize] = zeroed;
                page_num
            }
            None => {
                state.pages.push(zeroed);
                (state.pages.len() - 1) as u32
            }
        };
        self.counters.allocs.fetch_add(1, Ordering::Relaxed);
        Ok(page_num)
    }

    fn dispose_page(&self, page_num: u32) -> Result<()> {
        let mut state = self.state.lock();
        let slot = state
            .pages
            .get_mut(page_num as usize)
            .filter(|slot| slot.is_some())
            .ok_or_else(|| self.not_found(page_num))?;
        *slot = None;
        state.free.insert(page_num);
        self.counters.disposes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl std::fmt::Debug for MemoryFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryFile")
            .field("file_id", &self.file_id)
            .field("num_pages", &self.num_pages())
            .finish()
    }
}
