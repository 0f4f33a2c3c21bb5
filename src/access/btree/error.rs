//! Error kinds the index surfaces to callers. These travel inside
//! `anyhow::Error` and are recovered with `downcast_ref::<IndexError>()`.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    #[error("Index file {0} exists but disagrees with the requested relation, offset, or type")]
    BadIndexInfo(String),

    #[error("Scan bounds must use > or >= below and < or <= above")]
    BadOpcodes,

    #[error("Scan range is empty: low bound exceeds high bound")]
    BadScanrange,

    #[error("No key in the scan range")]
    NoSuchKey,

    #[error("No scan in progress")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    ScanCompleted,
}
