//! Process-local `ProgressStore`.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;

use super::types::{unix_timestamp, DownloadRecord, DownloadStatus};
use super::ProgressStore;

/// Keeps records in a map; contents vanish with the process.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, DownloadRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut DownloadRecord)) {
        if let Some(record) = self.records.lock().get_mut(id) {
            f(record);
            record.updated_at = unix_timestamp();
        }
    }
}

#[async_trait]
impl ProgressStore for MemoryStore {
    async fn upsert(&self, record: &DownloadRecord) -> Result<()> {
        let mut record = record.clone();
        record.updated_at = unix_timestamp();
        self.records.lock().insert(record.id.clone(), record);
        Ok(())
    }

    async fn update_progress(&self, id: &str, downloaded_bytes: u64, total_bytes: u64) -> Result<()> {
        self.modify(id, |r| {
            r.downloaded_bytes = downloaded_bytes;
            r.total_bytes = total_bytes;
        });
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: DownloadStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.modify(id, |r| {
            r.status = status;
            r.error_message = error_message.map(str::to_string);
        });
        Ok(())
    }

    async fn update_retry_count(&self, id: &str, retry_count: u32) -> Result<()> {
        self.modify(id, |r| r.retry_count = retry_count);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DownloadRecord>> {
        Ok(self.records.lock().get(id).cloned())
    }

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<DownloadRecord>> {
        let mut out: Vec<DownloadRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(out)
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        let mut out: Vec<DownloadRecord> = self.records.lock().values().cloned().collect();
        out.sort_by(|a, b| (b.created_at, &b.id).cmp(&(a.created_at, &a.id)));
        Ok(out)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records.lock().remove(id);
        Ok(())
    }

    async fn purge_finished_before(&self, cutoff_unix: i64) -> Result<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, r| !(r.status.is_finished() && r.updated_at < cutoff_unix));
        Ok((before - records.len()) as u64)
    }
}
