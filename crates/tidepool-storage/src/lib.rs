//! Page files for Tidepool.
//!
//! This crate provides the [`PageFile`](tidepool_common::PageFile)
//! implementations a buffer pool reads from and writes to:
//! - [`DiskFile`]: pages stored in one OS file
//! - [`DiskManager`]: opens, names and destroys disk files in a data directory
//! - [`MemoryFile`]: pages held in memory, with I/O counters

mod disk;
mod memory;

pub use disk::{DiskFile, DiskManager, DiskManagerConfig};
pub use memory::{IoStats, MemoryFile};
