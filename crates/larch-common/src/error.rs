//! Error types for LarchDB.

use thiserror::Error;

/// Result type alias using LarchError.
pub type Result<T> = std::result::Result<T, LarchError>;

/// Errors that can occur in LarchDB operations.
#[derive(Debug, Error)]
pub enum LarchError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File errors
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("File already exists: {path}")]
    FileExists { path: String },

    #[error("Page {page_no} does not exist in file {path}")]
    PageNotFound { path: String, page_no: u32 },

    // Buffer manager errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    #[error("Page {page_no} is pinned and cannot be flushed")]
    PagePinned { page_no: u32 },

    // Heap errors
    #[error("Insufficient space on page for record of {size} bytes")]
    InsufficientSpace { size: usize },

    #[error("End of file reached")]
    EndOfFile,

    // Index errors
    #[error("Index header mismatch: {0}")]
    BadIndexInfo(String),

    #[error("Scan operators out of the allowed set")]
    BadOpcodes,

    #[error("Scan range low value exceeds high value")]
    BadScanrange,

    #[error("No key in the index satisfies the scan criteria")]
    NoSuchKeyFound,

    #[error("No scan has been initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: LarchError = io_err.into();
        assert!(matches!(err, LarchError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_file_errors_display() {
        let err = LarchError::FileNotFound {
            path: "relA.32".to_string(),
        };
        assert_eq!(err.to_string(), "File not found: relA.32");

        let err = LarchError::FileExists {
            path: "relA".to_string(),
        };
        assert_eq!(err.to_string(), "File already exists: relA");

        let err = LarchError::PageNotFound {
            path: "relA".to_string(),
            page_no: 99,
        };
        assert_eq!(err.to_string(), "Page 99 does not exist in file relA");
    }

    #[test]
    fn test_buffer_errors_display() {
        let err = LarchError::BufferPoolFull;
        assert_eq!(err.to_string(), "Buffer pool full, unable to allocate frame");

        let err = LarchError::PagePinned { page_no: 7 };
        assert_eq!(err.to_string(), "Page 7 is pinned and cannot be flushed");
    }

    #[test]
    fn test_heap_errors_display() {
        let err = LarchError::InsufficientSpace { size: 9000 };
        assert_eq!(
            err.to_string(),
            "Insufficient space on page for record of 9000 bytes"
        );

        let err = LarchError::EndOfFile;
        assert_eq!(err.to_string(), "End of file reached");
    }

    #[test]
    fn test_index_errors_display() {
        let err = LarchError::BadIndexInfo("relation name mismatch".to_string());
        assert_eq!(
            err.to_string(),
            "Index header mismatch: relation name mismatch"
        );

        assert_eq!(
            LarchError::BadOpcodes.to_string(),
            "Scan operators out of the allowed set"
        );
        assert_eq!(
            LarchError::BadScanrange.to_string(),
            "Scan range low value exceeds high value"
        );
        assert_eq!(
            LarchError::NoSuchKeyFound.to_string(),
            "No key in the index satisfies the scan criteria"
        );
        assert_eq!(
            LarchError::ScanNotInitialized.to_string(),
            "No scan has been initialized"
        );
        assert_eq!(
            LarchError::IndexScanCompleted.to_string(),
            "Index scan completed"
        );
    }

    #[test]
    fn test_internal_error_display() {
        let err = LarchError::Internal("frame owner not registered".to_string());
        assert_eq!(err.to_string(), "Internal error: frame owner not registered");
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(LarchError::BadOpcodes)
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LarchError>();
    }
}
