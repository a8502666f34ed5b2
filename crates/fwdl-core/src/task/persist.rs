//! Background progress-store writer for one task.
//!
//! The stream loop never awaits the store: it enqueues operations that a
//! dedicated tokio task applies in FIFO order. Failed writes are logged and
//! retried after a delay; the transfer keeps going either way and the
//! in-memory counters stay authoritative until a write succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::store::{DownloadRecord, DownloadStatus, ProgressStore};

/// Attempts per operation before it is dropped.
const MAX_WRITE_ATTEMPTS: u32 = 5;

pub(crate) enum PersistOp {
    Progress { downloaded: u64, total: u64 },
    Status {
        status: DownloadStatus,
        error: Option<String>,
    },
    RetryCount(u32),
    Record(Box<DownloadRecord>),
    /// Answered once everything queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub(crate) struct Persister {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl Persister {
    /// Spawns the writer on the current runtime. It exits once every
    /// `Persister` clone is dropped and the queue is drained.
    pub(crate) fn spawn(id: String, store: Arc<dyn ProgressStore>, retry_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_loop(id, store, rx, retry_delay));
        Self { tx }
    }

    pub(crate) fn progress(&self, downloaded: u64, total: u64) {
        self.send(PersistOp::Progress { downloaded, total });
    }

    pub(crate) fn status(&self, status: DownloadStatus, error: Option<String>) {
        self.send(PersistOp::Status { status, error });
    }

    pub(crate) fn retry_count(&self, retry_count: u32) {
        self.send(PersistOp::RetryCount(retry_count));
    }

    pub(crate) fn record(&self, record: DownloadRecord) {
        self.send(PersistOp::Record(Box::new(record)));
    }

    /// Waits until every previously queued write has been applied (or given up on).
    pub(crate) async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(PersistOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    fn send(&self, op: PersistOp) {
        let _ = self.tx.send(op);
    }
}

async fn persist_loop(
    id: String,
    store: Arc<dyn ProgressStore>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
    retry_delay: Duration,
) {
    let mut carried: Option<PersistOp> = None;
    loop {
        let op = match carried.take() {
            Some(op) => op,
            None => match rx.recv().await {
                Some(op) => op,
                None => break,
            },
        };

        let op = match op {
            // Only the newest of a run of queued progress updates matters.
            PersistOp::Progress {
                mut downloaded,
                mut total,
            } => {
                while let Ok(next) = rx.try_recv() {
                    match next {
                        PersistOp::Progress {
                            downloaded: d,
                            total: t,
                        } => {
                            downloaded = d;
                            total = t;
                        }
                        other => {
                            carried = Some(other);
                            break;
                        }
                    }
                }
                PersistOp::Progress { downloaded, total }
            }
            PersistOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
            op => op,
        };

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match apply(store.as_ref(), &id, &op).await {
                Ok(()) => break,
                Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                    tracing::warn!(id = %id, attempt, error = %format!("{e:#}"), "progress store write failed; retrying");
                    tokio::time::sleep(retry_delay).await;
                }
                Err(e) => {
                    tracing::warn!(id = %id, attempt, error = %format!("{e:#}"), "progress store write dropped");
                }
            }
        }
    }
}

async fn apply(store: &dyn ProgressStore, id: &str, op: &PersistOp) -> anyhow::Result<()> {
    match op {
        PersistOp::Progress { downloaded, total } => {
            store.update_progress(id, *downloaded, *total).await
        }
        PersistOp::Status { status, error } => {
            store.update_status(id, *status, error.as_deref()).await
        }
        PersistOp::RetryCount(n) => store.update_retry_count(id, *n).await,
        PersistOp::Record(record) => store.upsert(record).await,
        PersistOp::Flush(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing::FlakyStore;

    #[tokio::test]
    async fn ops_apply_in_order() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert(&DownloadRecord::new("t", "https://x/t", "/tmp", "t"))
            .await
            .unwrap();
        let p = Persister::spawn("t".into(), store.clone(), Duration::from_millis(1));

        p.progress(10, 100);
        p.progress(20, 100);
        p.status(DownloadStatus::Paused, None);
        p.retry_count(2);
        p.progress(30, 100);
        p.flush().await;

        let r = store.get_by_id("t").await.unwrap().unwrap();
        assert_eq!(r.downloaded_bytes, 30);
        assert_eq!(r.status, DownloadStatus::Paused);
        assert_eq!(r.retry_count, 2);
    }

    #[tokio::test]
    async fn failed_writes_are_retried() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        store
            .upsert(&DownloadRecord::new("t", "https://x/t", "/tmp", "t"))
            .await
            .unwrap();
        store.fail_next(3);
        let p = Persister::spawn("t".into(), store.clone(), Duration::from_millis(1));

        p.progress(42, 100);
        p.flush().await;

        let r = store.get_by_id("t").await.unwrap().unwrap();
        assert_eq!(r.downloaded_bytes, 42);
        assert_eq!(store.failures(), 3);
    }

    #[tokio::test]
    async fn persistent_failure_does_not_block_flush() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        store.fail_next(u32::MAX);
        let p = Persister::spawn("t".into(), store.clone(), Duration::from_millis(1));
        p.status(DownloadStatus::Failed, Some("boom".into()));
        tokio::time::timeout(Duration::from_secs(5), p.flush())
            .await
            .unwrap();
        assert_eq!(store.failures(), MAX_WRITE_ATTEMPTS);
    }
}
