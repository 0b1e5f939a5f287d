//! Error types for the ferrite storage engine.

use crate::page::PageId;
use thiserror::Error;

/// Result type alias using FerriteError.
pub type Result<T> = std::result::Result<T, FerriteError>;

/// Errors that can occur in ferrite operations.
#[derive(Debug, Error)]
pub enum FerriteError {
    // I/O and file lifecycle
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file already exists: {0}")]
    FileExists(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    // Buffer pool
    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Heap storage
    #[error("record of {size} bytes can never fit in a page (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("record of {len} bytes too short for key at offset {offset}")]
    RecordTooShort { len: usize, offset: usize },

    // Index metadata and build
    #[error("index metadata mismatch: {0}")]
    BadIndexInfo(String),

    #[error("unsupported key type: {0}")]
    UnsupportedType(String),

    // Scans
    #[error("scan operators must be GT/GTE for the low bound and LT/LTE for the high bound")]
    BadOperator,

    #[error("bad scan range: low {low} > high {high}")]
    BadRange { low: i32, high: i32 },

    #[error("no key in the index satisfies the scan predicate")]
    NoSuchKey,

    #[error("no scan is active")]
    ScanNotActive,

    #[error("index scan completed")]
    ScanDone,

    // Control-flow signal from the heap scan
    #[error("end of file reached")]
    EndOfFile,

    // Internal faults
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: FerriteError = io_err.into();
        assert!(matches!(err, FerriteError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_page_not_found_display() {
        let err = FerriteError::PageNotFound(PageId::new(1, 42));
        assert_eq!(err.to_string(), "page not found: 1:42");
    }

    #[test]
    fn test_bad_range_display() {
        let err = FerriteError::BadRange { low: 50, high: 10 };
        assert_eq!(err.to_string(), "bad scan range: low 50 > high 10");
    }

    #[test]
    fn test_scan_errors_display() {
        assert_eq!(
            FerriteError::ScanNotActive.to_string(),
            "no scan is active"
        );
        assert_eq!(FerriteError::ScanDone.to_string(), "index scan completed");
        assert_eq!(
            FerriteError::NoSuchKey.to_string(),
            "no key in the index satisfies the scan predicate"
        );
    }

    #[test]
    fn test_bad_index_info_display() {
        let err = FerriteError::BadIndexInfo("attrByteOffset 4 != 0".to_string());
        assert_eq!(
            err.to_string(),
            "index metadata mismatch: attrByteOffset 4 != 0"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_err() -> Result<i32> {
            Err(FerriteError::EndOfFile)
        }
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FerriteError>();
    }
}
