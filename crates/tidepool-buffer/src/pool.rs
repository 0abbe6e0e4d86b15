//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameDescriptor, FrameId, FrameInfo};
use crate::page_table::PageTable;
use crate::replacer::{ClockReplacer, Replacer, Victim};
use parking_lot::Mutex;
use std::cell::Cell;
use std::mem::ManuallyDrop;
use tidepool_common::page::{PageBuf, PageId};
use tidepool_common::{BufferPoolConfig, Result, SharedFile, TidepoolError};
use tracing::{debug, trace, warn};

/// Bookkeeping that must change together: descriptors, page table and the
/// clock hand. Guarded by one lock so a page table entry and the descriptor
/// it points at are never observed out of step.
pub(crate) struct PoolState {
    pub(crate) descriptors: Vec<FrameDescriptor>,
    pub(crate) page_table: PageTable,
    replacer: ClockReplacer,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping (page table)
/// - Clock replacement for eviction
/// - Pin counting for concurrent access
/// - Dirty page write-back through the owning [`PageFile`](tidepool_common::PageFile)
///
/// Every successful [`fetch_page`](Self::fetch_page) or
/// [`alloc_page`](Self::alloc_page) pins the page once and returns a
/// [`PinnedPage`]. The pin is released by [`unpin_page`](Self::unpin_page)
/// or when the handle is dropped, and the page bytes are only reachable
/// through the handle. A pinned page is never evicted. I/O triggered by a
/// call happens synchronously inside that call.
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Page storage, indexed by frame ID.
    frames: Vec<BufferFrame>,
    /// Descriptor table, page table and clock hand.
    state: Mutex<PoolState>,
}

impl BufferPool {
    /// Creates a new buffer pool.
    pub fn new(config: BufferPoolConfig) -> Result<Self> {
        config.validate()?;
        let num_frames = config.num_frames;

        let frames = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let descriptors = (0..num_frames)
            .map(|i| FrameDescriptor::new(FrameId(i as u32)))
            .collect();

        debug!(num_frames, "created buffer pool");

        Ok(Self {
            config,
            frames,
            state: Mutex::new(PoolState {
                descriptors,
                page_table: PageTable::new(num_frames),
                replacer: ClockReplacer::new(num_frames),
            }),
        })
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of frames holding no page.
    pub fn free_count(&self) -> usize {
        let state = self.state.lock();
        state.descriptors.iter().filter(|d| !d.is_valid()).count()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.contains(page_id)
    }

    /// Returns the pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let frame_id = state.page_table.lookup(page_id).ok()?;
        Some(state.descriptors[frame_id.index()].pin_count())
    }

    /// Returns the frame a resident page occupies.
    pub fn frame_of(&self, page_id: PageId) -> Option<FrameId> {
        self.state.lock().page_table.lookup(page_id).ok()
    }

    /// Obtains a free frame, evicting a page if necessary.
    ///
    /// A dirty victim is written back first; if that write fails the victim
    /// stays resident and the error is returned.
    fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId> {
        let victim = state
            .replacer
            .select_victim(&mut state.descriptors)
            .ok_or(TidepoolError::BufferExceeded)?;

        let frame_id = match victim {
            Victim::Free(frame_id) => return Ok(frame_id),
            Victim::Evict(frame_id) => frame_id,
        };

        let desc = &mut state.descriptors[frame_id.index()];
        let (file, page_id) = match (&desc.file, desc.page_id()) {
            (Some(file), Some(page_id)) => (file.clone(), page_id),
            _ => {
                return Err(TidepoolError::BadBuffer {
                    frame_id: frame_id.0,
                    reason: "eviction victim has no owning file".to_string(),
                })
            }
        };

        if desc.is_dirty() {
            let data = self.frames[frame_id.index()].read_data();
            file.write_page(page_id.page_num, &data)?;
            trace!(%page_id, %frame_id, "wrote back dirty page on eviction");
        }

        state
            .page_table
            .remove(page_id)
            .map_err(|_| TidepoolError::BadBuffer {
                frame_id: frame_id.0,
                reason: format!("resident page {} missing from page table", page_id),
            })?;
        desc.clear();

        trace!(%page_id, %frame_id, "evicted page");
        Ok(frame_id)
    }

    /// Fetches a page, reading it from `file` on a miss.
    ///
    /// The page stays pinned for as long as the returned handle lives.
    pub fn fetch_page(&self, file: &SharedFile, page_num: u32) -> Result<PinnedPage<'_>> {
        let frame = self.pin_frame(file, page_num)?;
        Ok(PinnedPage::new(self, PageId::new(file.file_id(), page_num), frame))
    }

    fn pin_frame(&self, file: &SharedFile, page_num: u32) -> Result<&BufferFrame> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.page_table.lookup(page_id) {
            Ok(frame_id) => {
                state.descriptors[frame_id.index()].pin();
                trace!(%page_id, %frame_id, "buffer pool hit");
                Ok(&self.frames[frame_id.index()])
            }
            Err(TidepoolError::HashNotFound) => {
                let frame_id = self.allocate_frame(state)?;
                let frame = &self.frames[frame_id.index()];

                // On failure the descriptor is still clear, so the frame stays free.
                {
                    let mut data = frame.write_data();
                    file.read_page(page_num, &mut data)?;
                }
                state.page_table.insert(page_id, frame_id)?;
                state.descriptors[frame_id.index()].set(file.clone(), page_num);

                debug!(%page_id, %frame_id, "buffer pool miss, page loaded");
                Ok(frame)
            }
            Err(e) => Err(e),
        }
    }

    /// Releases the pin held by `page`.
    ///
    /// The page is marked dirty if `dirty` is set or if it was written
    /// through the handle; a clean unpin never clears the flag.
    pub fn unpin_page(&self, page: PinnedPage<'_>, dirty: bool) -> Result<()> {
        debug_assert!(std::ptr::eq(page.pool, self));
        page.unpin(dirty)
    }

    /// Releases one pin on a page by ID.
    pub(crate) fn unpin(&self, page_id: PageId, dirty: bool) -> Result<()> {
        let mut state = self.state.lock();
        let frame_id = state
            .page_table
            .lookup(page_id)
            .map_err(|_| TidepoolError::PageNotResident { page_id })?;

        let desc = &mut state.descriptors[frame_id.index()];
        if desc.unpin().is_none() {
            return Err(TidepoolError::PageNotPinned { page_id });
        }
        if dirty {
            desc.dirty = true;
        }
        Ok(())
    }

    /// Allocates a new page in `file` and pins it in a zeroed frame.
    ///
    /// The handle carries the new page number. If no frame can be obtained,
    /// the page is handed back to the file before returning the error.
    pub fn alloc_page(&self, file: &SharedFile) -> Result<PinnedPage<'_>> {
        let (page_num, frame) = self.alloc_frame(file)?;
        Ok(PinnedPage::new(self, PageId::new(file.file_id(), page_num), frame))
    }

    fn alloc_frame(&self, file: &SharedFile) -> Result<(u32, &BufferFrame)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let page_num = file.allocate_page()?;
        let page_id = PageId::new(file.file_id(), page_num);

        let installed = self.allocate_frame(state).and_then(|frame_id| {
            state.page_table.insert(page_id, frame_id)?;
            Ok(frame_id)
        });
        let frame_id = match installed {
            Ok(frame_id) => frame_id,
            Err(e) => {
                if let Err(rollback) = file.dispose_page(page_num) {
                    warn!(%page_id, error = %rollback, "failed to release page after allocation failure");
                }
                return Err(e);
            }
        };

        let frame = &self.frames[frame_id.index()];
        frame.zero();
        state.descriptors[frame_id.index()].set(file.clone(), page_num);

        debug!(%page_id, %frame_id, "allocated page");
        Ok((page_num, frame))
    }

    /// Drops a page permanently.
    ///
    /// The file deallocates the page first; only then is a resident copy
    /// discarded, without write-back. If the file fails, the resident copy
    /// is left as it was. A pinned page is rejected with
    /// [`TidepoolError::PagePinned`] and nothing changes.
    pub fn dispose_page(&self, file: &SharedFile, page_num: u32) -> Result<()> {
        let page_id = PageId::new(file.file_id(), page_num);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let resident = state.page_table.lookup(page_id).ok();
        if let Some(frame_id) = resident {
            if state.descriptors[frame_id.index()].is_pinned() {
                return Err(TidepoolError::PagePinned { page_id });
            }
        }

        file.dispose_page(page_num)?;

        if let Some(frame_id) = resident {
            state
                .page_table
                .remove(page_id)
                .map_err(|_| TidepoolError::BadBuffer {
                    frame_id: frame_id.0,
                    reason: format!("resident page {} missing from page table", page_id),
                })?;
            state.descriptors[frame_id.index()].clear();
            trace!(%page_id, %frame_id, "discarded resident page");
        }
        debug!(%page_id, "disposed page");
        Ok(())
    }

    /// Writes back and evicts every page of `file`.
    ///
    /// Frames are visited in slot order. A pinned page aborts the flush with
    /// [`TidepoolError::PagePinned`]; pages visited before it stay flushed
    /// and evicted, so the caller should retry once pins are released. A
    /// frame that is invalid yet still names the file aborts with
    /// [`TidepoolError::BadBuffer`].
    pub fn flush_file(&self, file: &SharedFile) -> Result<()> {
        let file_id = file.file_id();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let mut flushed = 0usize;

        for (i, desc) in state.descriptors.iter_mut().enumerate() {
            if desc.file_id() != Some(file_id) {
                continue;
            }
            if !desc.is_valid() {
                return Err(TidepoolError::BadBuffer {
                    frame_id: i as u32,
                    reason: format!("invalid frame still owned by {}", file_id),
                });
            }

            let page_id = PageId::new(file_id, desc.page_num);
            if desc.is_pinned() {
                return Err(TidepoolError::PagePinned { page_id });
            }
            if desc.is_dirty() {
                let data = self.frames[i].read_data();
                file.write_page(desc.page_num, &data)?;
                desc.dirty = false;
                flushed += 1;
            }

            state
                .page_table
                .remove(page_id)
                .map_err(|_| TidepoolError::BadBuffer {
                    frame_id: i as u32,
                    reason: format!("resident page {} missing from page table", page_id),
                })?;
            desc.clear();
        }

        debug!(%file_id, flushed, "flushed file");
        Ok(())
    }

    /// Writes back all dirty pages without evicting them.
    ///
    /// Pages pinned by callers are written too. Dirty frames are pinned under
    /// the pool lock, then each is written with only its page data locked,
    /// so a caller holding page data while calling into the pool never waits
    /// on this flush. Returns the number of pages written; on a write error
    /// the remaining pages are left dirty.
    pub fn flush_all(&self) -> Result<usize> {
        let targets: Vec<(FrameId, SharedFile, u32)> = {
            let mut state = self.state.lock();
            state
                .descriptors
                .iter_mut()
                .filter(|desc| desc.is_valid() && desc.is_dirty())
                .filter_map(|desc| {
                    let file = desc.file.clone()?;
                    desc.pin_count += 1;
                    Some((desc.frame_id(), file, desc.page_num))
                })
                .collect()
        };

        let mut flushed = 0;
        let mut result = Ok(());
        for (frame_id, file, page_num) in targets {
            let page_id = PageId::new(file.file_id(), page_num);
            if result.is_ok() {
                let data = self.frames[frame_id.index()].read_data();
                match file.write_page(page_num, &data) {
                    Ok(()) => {
                        // Cleared before the data lock is released, so a later
                        // write through a handle re-dirties the page.
                        self.state.lock().descriptors[frame_id.index()].dirty = false;
                        flushed += 1;
                    }
                    Err(e) => result = Err(e),
                }
            }
            if let Err(e) = self.unpin(page_id, false) {
                warn!(%page_id, error = %e, "flush failed to release page");
            }
        }

        result?;
        debug!(flushed, "flushed all dirty pages");
        Ok(flushed)
    }

    /// Returns a read guard for a page, fetching it if needed.
    pub fn read_page(&self, file: &SharedFile, page_num: u32) -> Result<PageReadGuard<'_>> {
        Ok(PageReadGuard {
            page: self.fetch_page(file, page_num)?,
        })
    }

    /// Returns a write guard for a page, fetching it if needed.
    pub fn write_page(&self, file: &SharedFile, page_num: u32) -> Result<PageWriteGuard<'_>> {
        Ok(PageWriteGuard {
            page: self.fetch_page(file, page_num)?,
        })
    }

    /// Returns a snapshot of every frame, in slot order.
    pub fn dump(&self) -> Vec<FrameInfo> {
        let state = self.state.lock();
        state.descriptors.iter().map(FrameDescriptor::info).collect()
    }

    /// Emits the frame table at debug level.
    pub fn log_state(&self) {
        for info in self.dump() {
            debug!("{}", info);
        }
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut stats = BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: 0,
            used_frames: 0,
            pinned_frames: 0,
            dirty_frames: 0,
        };

        for desc in &state.descriptors {
            if !desc.is_valid() {
                stats.free_frames += 1;
                continue;
            }
            stats.used_frames += 1;
            if desc.is_pinned() {
                stats.pinned_frames += 1;
            }
            if desc.is_dirty() {
                stats.dirty_frames += 1;
            }
        }
        stats
    }

    /// Checks that the page table and the valid frames are in bijection and
    /// that empty frames are fully cleared.
    pub fn verify_integrity(&self) -> Result<()> {
        let state = self.state.lock();
        let bad = |frame_id: FrameId, reason: String| TidepoolError::BadBuffer {
            frame_id: frame_id.0,
            reason,
        };

        let mut valid = 0;
        for desc in &state.descriptors {
            let frame_id = desc.frame_id();
            if !desc.is_valid() {
                if desc.is_pinned() || desc.is_dirty() || desc.is_referenced() || desc.file.is_some() {
                    return Err(bad(frame_id, format!("empty frame not cleared: {:?}", desc)));
                }
                continue;
            }
            valid += 1;
            let page_id = desc
                .page_id()
                .ok_or_else(|| bad(frame_id, "valid frame without owning file".to_string()))?;
            match state.page_table.lookup(page_id) {
                Ok(mapped) if mapped == frame_id => {}
                Ok(mapped) => {
                    return Err(bad(frame_id, format!("page {} mapped to {}", page_id, mapped)))
                }
                Err(_) => return Err(bad(frame_id, format!("page {} not in page table", page_id))),
            }
        }

        if valid != state.page_table.len() {
            return Err(bad(
                FrameId::INVALID,
                format!(
                    "{} valid frames but {} page table entries",
                    valid,
                    state.page_table.len()
                ),
            ));
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut PoolState) -> R) -> R {
        f(&mut self.state.lock())
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (i, desc) in state.descriptors.iter().enumerate() {
            if !desc.is_valid() || !desc.is_dirty() {
                continue;
            }
            let Some(file) = &desc.file else { continue };
            let page_id = PageId::new(file.file_id(), desc.page_num);
            let data = self.frames[i].read_data();
            match file.write_page(desc.page_num, &data) {
                Ok(()) => trace!(%page_id, "flushed page on shutdown"),
                Err(e) => warn!(%page_id, error = %e, "failed to flush page on shutdown"),
            }
        }
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}

/// A pinned page.
///
/// The page cannot be evicted while the handle exists, and its bytes are
/// only reachable through it. Dropping the handle releases the pin, marking
/// the page dirty if it was written through [`data_mut`](Self::data_mut) or
/// [`copy_from`](Self::copy_from).
pub struct PinnedPage<'a> {
    pool: &'a BufferPool,
    page_id: PageId,
    frame: &'a BufferFrame,
    dirty: Cell<bool>,
}

impl<'a> PinnedPage<'a> {
    fn new(pool: &'a BufferPool, page_id: PageId, frame: &'a BufferFrame) -> Self {
        Self {
            pool,
            page_id,
            frame,
            dirty: Cell::new(false),
        }
    }

    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Returns the page number within its file.
    pub fn page_num(&self) -> u32 {
        self.page_id.page_num
    }

    /// Returns the frame holding the page.
    pub fn frame_id(&self) -> FrameId {
        self.frame.frame_id()
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<PageBuf>> {
        self.frame.read_data()
    }

    /// Returns mutable access to page data and marks the page dirty.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<PageBuf>> {
        self.dirty.set(true);
        self.frame.write_data()
    }

    /// Copies data into the page and marks it dirty.
    pub fn copy_from(&self, src: &[u8]) {
        self.dirty.set(true);
        self.frame.copy_from(src);
    }

    /// Copies data out of the page.
    pub fn copy_to(&self, dst: &mut [u8]) {
        self.frame.copy_to(dst);
    }

    /// Releases the pin, reporting any bookkeeping error.
    pub fn unpin(self, dirty: bool) -> Result<()> {
        let page = ManuallyDrop::new(self);
        page.pool.unpin(page.page_id, dirty || page.dirty.get())
    }
}

impl Drop for PinnedPage<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pool.unpin(self.page_id, self.dirty.get()) {
            warn!(page_id = %self.page_id, error = %e, "pinned page failed to unpin");
        }
    }
}

impl std::fmt::Debug for PinnedPage<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage")
            .field("page_id", &self.page_id)
            .field("frame_id", &self.frame.frame_id())
            .field("dirty", &self.dirty.get())
            .finish()
    }
}

/// RAII guard for reading a page. Unpins on drop.
pub struct PageReadGuard<'a> {
    page: PinnedPage<'a>,
}

impl<'a> PageReadGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<PageBuf>> {
        self.page.data()
    }
}

/// RAII guard for writing a page. Unpins on drop, marking the page dirty if
/// its data was borrowed mutably.
pub struct PageWriteGuard<'a> {
    page: PinnedPage<'a>,
}

impl<'a> PageWriteGuard<'a> {
    /// Returns the page ID.
    pub fn page_id(&self) -> PageId {
        self.page.page_id()
    }

    /// Returns the page data.
    pub fn data(&self) -> parking_lot::RwLockReadGuard<'_, Box<PageBuf>> {
        self.page.data()
    }

    /// Returns mutable access to page data and marks the page dirty.
    pub fn data_mut(&self) -> parking_lot::RwLockWriteGuard<'_, Box<PageBuf>> {
        self.page.data_mut()
    }
}
