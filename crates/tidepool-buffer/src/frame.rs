//! Buffer frame management.
//!
//! A frame is split in two: the [`FrameDescriptor`] holds bookkeeping that
//! only the pool mutates (under its lock), and the [`BufferFrame`] holds the
//! page bytes that pinned callers read and write.

use parking_lot::RwLock;
use tidepool_common::page::{FileId, PageBuf, PageId, PAGE_SIZE};
use tidepool_common::SharedFile;

/// Unique identifier for a frame in the buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Invalid frame ID.
    pub const INVALID: FrameId = FrameId(u32::MAX);

    /// Returns true if this is a valid frame ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// Bookkeeping for one pool slot.
///
/// When `valid` is false the descriptor is in the empty state: no file, no
/// pins, clean and unreferenced. [`FrameDescriptor::clear`] is the only way
/// back to that state.
pub struct FrameDescriptor {
    frame_id: FrameId,
    pub(crate) file: Option<SharedFile>,
    pub(crate) page_num: u32,
    pub(crate) pin_count: u32,
    pub(crate) dirty: bool,
    pub(crate) referenced: bool,
    pub(crate) valid: bool,
}

impl FrameDescriptor {
    /// Creates an empty descriptor for the given slot.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            file: None,
            page_num: 0,
            pin_count: 0,
            dirty: false,
            referenced: false,
            valid: false,
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the identity of the owning file, if any.
    #[inline]
    pub fn file_id(&self) -> Option<FileId> {
        self.file.as_ref().map(|f| f.file_id())
    }

    /// Returns the resident page, or None for an empty frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        match (&self.file, self.valid) {
            (Some(file), true) => Some(PageId::new(file.file_id(), self.page_num)),
            _ => None,
        }
    }

    /// Returns the current pin count.
    #[inline]
    pub fn pin_count(&self) -> u32 {
        self.pin_count
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns the reference bit value.
    #[inline]
    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    /// Returns true if the frame holds a live page mapping.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Installs a freshly loaded page: pinned once, referenced, clean.
    pub(crate) fn set(&mut self, file: SharedFile, page_num: u32) {
        self.file = Some(file);
        self.page_num = page_num;
        self.pin_count = 1;
        self.dirty = false;
        self.referenced = true;
        self.valid = true;
    }

    /// Pins the frame again for a cache hit.
    #[inline]
    pub(crate) fn pin(&mut self) {
        self.pin_count += 1;
        self.referenced = true;
    }

    /// Drops one pin. Returns the new pin count, or None if the frame was
    /// not pinned (the count is left at 0).
    #[inline]
    pub(crate) fn unpin(&mut self) -> Option<u32> {
        if self.pin_count == 0 {
            return None;
        }
        self.pin_count -= 1;
        Some(self.pin_count)
    }

    /// Resets the descriptor to the empty state.
    pub(crate) fn clear(&mut self) {
        self.file = None;
        self.page_num = 0;
        self.pin_count = 0;
        self.dirty = false;
        self.referenced = false;
        self.valid = false;
    }

    /// Returns a read-only snapshot for diagnostics.
    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            frame_id: self.frame_id,
            page_id: self.page_id(),
            pin_count: self.pin_count,
            dirty: self.dirty,
            referenced: self.referenced,
            valid: self.valid,
        }
    }
}

impl std::fmt::Debug for FrameDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("frame_id", &self.frame_id)
            .field("file_id", &self.file_id())
            .field("page_num", &self.page_num)
            .field("pin_count", &self.pin_count)
            .field("dirty", &self.dirty)
            .field("referenced", &self.referenced)
            .field("valid", &self.valid)
            .finish()
    }
}

/// Point-in-time view of one frame, as produced by `BufferPool::dump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub frame_id: FrameId,
    pub page_id: Option<PageId>,
    pub pin_count: u32,
    pub dirty: bool,
    pub referenced: bool,
    pub valid: bool,
}

impl std::fmt::Display for FrameInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.page_id {
            Some(page_id) => write!(f, "{}\tpage {}", self.frame_id, page_id)?,
            None => write!(f, "{}\t-", self.frame_id)?,
        }
        write!(f, "\tpin_count: {}", self.pin_count)?;
        if self.dirty {
            write!(f, "\tdirty")?;
        }
        if self.valid {
            write!(f, "\tvalid")?;
        }
        Ok(())
    }
}

/// Page storage for one pool slot.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// Page data buffer.
    data: RwLock<Box<PageBuf>>,
}

impl BufferFrame {
    /// Creates a new zeroed buffer frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Reads the page data.
    #[inline]
    pub fn read_data(&self) -> parking_lot::RwLockReadGuard<'_, Box<PageBuf>> {
        self.data.read()
    }

    /// Writes to the page data.
    #[inline]
    pub fn write_data(&self) -> parking_lot::RwLockWriteGuard<'_, Box<PageBuf>> {
        self.data.write()
    }

    /// Copies data into the frame.
    #[inline]
    pub fn copy_from(&self, src: &[u8]) {
        let mut data = self.data.write();
        let len = src.len().min(PAGE_SIZE);
        data[..len].copy_from_slice(&src[..len]);
    }

    /// Copies data out of the frame.
    #[inline]
    pub fn copy_to(&self, dst: &mut [u8]) {
        let data = self.data.read();
        let len = dst.len().min(PAGE_SIZE);
        dst[..len].copy_from_slice(&data[..len]);
    }

    /// Zeroes the page data.
    #[inline]
    pub(crate) fn zero(&self) {
        self.data.write().fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .finish()
    }
}
