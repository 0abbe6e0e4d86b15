//! Error types for Tidepool.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using TidepoolError.
pub type Result<T> = std::result::Result<T, TidepoolError>;

/// Errors that can occur in Tidepool operations.
#[derive(Debug, Error)]
pub enum TidepoolError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Page not found: {page_id}")]
    PageNotFound { page_id: PageId },

    // Buffer pool errors
    #[error("Buffer pool exceeded, every frame is pinned")]
    BufferExceeded,

    #[error("Page not resident in buffer pool: {page_id}")]
    PageNotResident { page_id: PageId },

    #[error("Page not pinned: {page_id}")]
    PageNotPinned { page_id: PageId },

    #[error("Page is pinned: {page_id}")]
    PagePinned { page_id: PageId },

    #[error("Bad buffer in frame {frame_id}: {reason}")]
    BadBuffer { frame_id: u32, reason: String },

    // Page table errors
    #[error("Page table entry not found")]
    HashNotFound,

    #[error("Page table entry already present")]
    HashAlreadyPresent,

    #[error("Page table full")]
    HashTableFull,

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },
}

impl TidepoolError {
    /// Returns true for errors that indicate corrupted pool bookkeeping
    /// rather than a caller mistake or an I/O failure.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            TidepoolError::BadBuffer { .. }
                | TidepoolError::HashAlreadyPresent
                | TidepoolError::HashTableFull
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::FileId;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: TidepoolError = io_err.into();
        assert!(matches!(err, TidepoolError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = TidepoolError::PageNotFound {
            page_id: PageId::new(FileId(1), 42),
        };
        assert_eq!(err.to_string(), "Page not found: 1:42");
    }

    #[test]
    fn test_buffer_errors_display() {
        assert_eq!(
            TidepoolError::BufferExceeded.to_string(),
            "Buffer pool exceeded, every frame is pinned"
        );

        let page_id = PageId::new(FileId(2), 7);
        assert_eq!(
            TidepoolError::PageNotResident { page_id }.to_string(),
            "Page not resident in buffer pool: 2:7"
        );
        assert_eq!(
            TidepoolError::PageNotPinned { page_id }.to_string(),
            "Page not pinned: 2:7"
        );
        assert_eq!(
            TidepoolError::PagePinned { page_id }.to_string(),
            "Page is pinned: 2:7"
        );

        let err = TidepoolError::BadBuffer {
            frame_id: 3,
            reason: "invalid frame owned by file:2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Bad buffer in frame 3: invalid frame owned by file:2"
        );
    }

    #[test]
    fn test_page_table_errors_display() {
        assert_eq!(
            TidepoolError::HashNotFound.to_string(),
            "Page table entry not found"
        );
        assert_eq!(
            TidepoolError::HashAlreadyPresent.to_string(),
            "Page table entry already present"
        );
        assert_eq!(TidepoolError::HashTableFull.to_string(), "Page table full");
    }

    #[test]
    fn test_config_errors_display() {
        let err = TidepoolError::ConfigError("missing data_dir".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing data_dir");

        let err = TidepoolError::InvalidParameter {
            name: "num_frames".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: num_frames = 0");
    }

    #[test]
    fn test_is_internal() {
        assert!(TidepoolError::BadBuffer {
            frame_id: 0,
            reason: String::new()
        }
        .is_internal());
        assert!(TidepoolError::HashTableFull.is_internal());
        assert!(!TidepoolError::BufferExceeded.is_internal());
        assert!(!TidepoolError::IoError("disk".to_string()).is_internal());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(TidepoolError::BufferExceeded)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TidepoolError>();
    }
}
