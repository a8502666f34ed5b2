//! Durable download records.
//!
//! `ProgressStore` is the persistence seam used by tasks and the coordinator.
//! `ProgressDb` keeps records in SQLite (sqlx); `MemoryStore` is a process-local
//! implementation for embedding and tests.

mod db;
mod memory;
mod records;
mod types;

pub use db::ProgressDb;
pub use memory::MemoryStore;
pub use types::{DownloadId, DownloadRecord, DownloadStatus};

#[cfg(test)]
pub(crate) use db::open_memory;

use anyhow::Result;
use async_trait::async_trait;

/// Durable store of download records keyed by id.
///
/// Writes are atomic per record; no operation depends on another record.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Insert or replace the whole record.
    async fn upsert(&self, record: &DownloadRecord) -> Result<()>;

    async fn update_progress(&self, id: &str, downloaded_bytes: u64, total_bytes: u64)
        -> Result<()>;

    /// Sets status and error message; `None` clears the message.
    async fn update_status(
        &self,
        id: &str,
        status: DownloadStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    async fn update_retry_count(&self, id: &str, retry_count: u32) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<DownloadRecord>>;

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<DownloadRecord>>;

    /// All records, newest first.
    async fn list_all(&self) -> Result<Vec<DownloadRecord>>;

    /// Removes the record. Missing ids are not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Deletes Completed/Failed/Cancelled records last updated before
    /// `cutoff_unix`. Returns how many were removed.
    async fn purge_finished_before(&self, cutoff_unix: i64) -> Result<u64>;
}
