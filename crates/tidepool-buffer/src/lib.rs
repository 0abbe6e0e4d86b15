//! Buffer pool management for Tidepool.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Clock (second chance) eviction
//! - Pin counting for concurrent access
//! - Dirty page tracking with write-back through the owning file
//!
//! Pages are identified by the file that owns them and a page number within
//! that file. Any [`PageFile`](tidepool_common::PageFile) implementation can
//! back the pool.

mod frame;
mod page_table;
mod pool;
mod replacer;

#[cfg(test)]
mod test_util;

pub use frame::{BufferFrame, FrameDescriptor, FrameId, FrameInfo};
pub use page_table::PageTable;
pub use pool::{BufferPool, BufferPoolStats, PageReadGuard, PageWriteGuard, PinnedPage};
pub use replacer::{ClockReplacer, Replacer, Victim};
pub use tidepool_common::BufferPoolConfig;
