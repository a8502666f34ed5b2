//! Relaunch: rebuild tasks for downloads an earlier process left unfinished.

use anyhow::{Context, Result};

use super::DownloadCoordinator;
use crate::error::DownloadError;
use crate::events::Listener;
use crate::storage;
use crate::store::{DownloadRecord, DownloadStatus};
use crate::task::DownloadTask;

/// Makes `record.downloaded_bytes` agree with its temporary file. The file
/// length wins; a file longer than the known total is truncated and the
/// download starts over. Returns true if the record changed.
pub(super) async fn reconcile_with_file(record: &mut DownloadRecord) -> Result<bool, DownloadError> {
    let on_disk = storage::file_len(&record.temporary_path).await?;
    if on_disk == record.downloaded_bytes {
        return Ok(false);
    }
    let corrected = if record.total_bytes > 0 && on_disk > record.total_bytes {
        storage::truncate_to(&record.temporary_path, 0).await?;
        0
    } else {
        on_disk
    };
    tracing::warn!(
        id = %record.id,
        stored = record.downloaded_bytes,
        on_disk,
        corrected,
        "stored progress disagrees with temporary file"
    );
    record.downloaded_bytes = corrected;
    if corrected == 0 {
        record.etag = None;
    }
    Ok(true)
}

impl DownloadCoordinator {
    /// Rebuilds a task for every stored record in Downloading, Paused or
    /// WaitingForNetwork. Each one is reconciled against its temporary file
    /// and registered Paused; nothing transfers until `resume` is called.
    /// Returns the ids registered.
    pub async fn resume_incomplete_on_startup(&self, listener: Listener) -> Result<Vec<String>> {
        let records = self
            .ctx
            .store
            .list_by_status(&DownloadStatus::INCOMPLETE)
            .await
            .context("list unfinished downloads")?;

        let mut tasks = self.tasks.lock().await;
        let mut restored = Vec::new();
        for mut record in records {
            if tasks.contains_key(&record.id) {
                continue;
            }
            if let Err(e) = reconcile_with_file(&mut record).await {
                tracing::warn!(id = %record.id, error = %e, "skipping unreadable download");
                continue;
            }
            record.status = DownloadStatus::Paused;
            record.retry_count = 0;
            if let Err(e) = self.ctx.store.upsert(&record).await {
                tracing::warn!(id = %record.id, error = %e, "could not persist reconciled record");
            }

            let id = record.id.clone();
            tracing::info!(id = %id, offset = record.downloaded_bytes, total = record.total_bytes, "restored paused download");
            let task = DownloadTask::restore_paused(record, &self.ctx, listener.clone());
            tasks.insert(id.clone(), task);
            restored.push(id);
        }
        restored.sort();
        Ok(restored)
    }
}
