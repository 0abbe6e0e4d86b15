//! Configuration structures for Tidepool.

use crate::error::{Result, TidepoolError};
use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the buffer pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self { num_frames: 1024 }
    }
}

impl BufferPoolConfig {
    /// Checks that the pool can hold at least one page.
    pub fn validate(&self) -> Result<()> {
        if self.num_frames == 0 {
            return Err(TidepoolError::InvalidParameter {
                name: "num_frames".to_string(),
                value: self.num_frames.to_string(),
            });
        }
        Ok(())
    }
}

/// Storage configuration for a Tidepool instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of pages.
    pub buffer_pool_pages: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_pool_pages: 1024, // 8 MB with 8 KB pages
            fsync_enabled: true,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_pages * PAGE_SIZE
    }

    /// Returns the buffer pool configuration derived from this config.
    pub fn pool_config(&self) -> BufferPoolConfig {
        BufferPoolConfig {
            num_frames: self.buffer_pool_pages,
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(TidepoolError::ConfigError("missing data_dir".to_string()));
        }
        self.pool_config().validate().map_err(|_| TidepoolError::InvalidParameter {
            name: "buffer_pool_pages".to_string(),
            value: self.buffer_pool_pages.to_string(),
        })
    }
}
