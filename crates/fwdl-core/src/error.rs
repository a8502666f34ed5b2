//! Error taxonomy for a single download attempt.
//!
//! Every network or file failure inside a task is converted into one of these
//! kinds at the task boundary; callers only ever see them through listener
//! events and the persisted `error_message`.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    /// Transport-level failure to establish a connection.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request could not be issued at all (bad URL, unsupported scheme).
    #[error("invalid request: {0}")]
    Request(String),

    /// Server answered with something other than 200 or 206.
    #[error("unexpected HTTP status {code}")]
    Protocol { code: u32 },

    /// Read or write failure in the middle of a transfer.
    #[error("stream error: {0}")]
    Stream(String),

    /// Body ended before the advertised size was reached.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },

    /// Cooperative cancellation; never reported through `Error` events.
    #[error("download cancelled")]
    Cancelled,

    /// Progress store write failed. Logged and retried, never fatal.
    #[error("progress store write failed: {0}")]
    Persistence(String),

    /// Local file lifecycle failure (create, rename, remove).
    #[error("storage: {0}")]
    Storage(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("temporary file {} is in use by download {owner}", .path.display())]
    PathInUse { path: PathBuf, owner: String },
}

impl DownloadError {
    /// True for failures the retry policy (or the network wait) may recover from.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DownloadError::Connection(_)
                | DownloadError::Stream(_)
                | DownloadError::PartialTransfer { .. }
        )
    }

    pub(crate) fn stream(err: impl std::fmt::Display) -> Self {
        DownloadError::Stream(err.to_string())
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        DownloadError::Storage(err.to_string())
    }
}
