//! Storage layer error types.

use thiserror::Error;

use crate::storage::page::PageId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Page {0} does not exist")]
    PageNotFound(PageId),

    #[error("Buffer pool is full: every frame is pinned")]
    BufferPoolFull,

    #[error("Heap meta mismatch: file records are {on_disk} bytes, caller expects {expected}")]
    HeapMetaMismatch { on_disk: usize, expected: usize },

    #[error("Record of {record_len} bytes does not fit a data page")]
    RecordTooLarge { record_len: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
