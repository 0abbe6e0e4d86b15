//! Interface to the files that back buffered pages.

use crate::error::Result;
use crate::page::{FileId, PageBuf};
use std::sync::Arc;

/// A file of fixed-size pages that the buffer pool reads from and writes to.
///
/// The file owns on-disk allocation. The buffer pool never retries a failed
/// call; retry policy, if any, belongs to the implementation.
pub trait PageFile: Send + Sync {
    /// Returns the identity of this file.
    fn file_id(&self) -> FileId;

    /// Reads page `page_num` into `dst`.
    fn read_page(&self, page_num: u32, dst: &mut PageBuf) -> Result<()>;

    /// Writes `src` to page `page_num`.
    fn write_page(&self, page_num: u32, src: &PageBuf) -> Result<()>;

    /// Allocates a new page and returns its number.
    fn allocate_page(&self) -> Result<u32>;

    /// Releases page `page_num` back to the file.
    fn dispose_page(&self, page_num: u32) -> Result<()>;
}

/// Shared handle to a page file.
pub type SharedFile = Arc<dyn PageFile>;
