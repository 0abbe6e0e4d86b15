//! Tidepool common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Tidepool components.

pub mod config;
pub mod error;
pub mod file;
pub mod page;

pub use config::{BufferPoolConfig, StorageConfig};
pub use error::{Result, TidepoolError};
pub use file::{PageFile, SharedFile};
pub use page::{FileId, PageBuf, PageId, PAGE_SIZE};
