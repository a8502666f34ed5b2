//! Stream loop: read a chunk, append it, count it, report it.

use std::sync::atomic::Ordering;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use super::{TaskInner, TaskState};
use crate::error::DownloadError;
use crate::events::DownloadEvent;
use crate::http::BodyStream;
use crate::progress::percentage;

/// Decides when progress is worth a store write: after `threshold` new
/// bytes or when the whole percentage changes, whichever comes first.
#[derive(Debug)]
pub(super) struct PersistThrottle {
    threshold: u64,
    last_bytes: u64,
    last_percent: u8,
}

impl PersistThrottle {
    pub(super) fn new(threshold: u64, downloaded: u64, total: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            last_bytes: downloaded,
            last_percent: percentage(downloaded, total),
        }
    }

    pub(super) fn should_persist(&mut self, downloaded: u64, total: u64) -> bool {
        let percent = percentage(downloaded, total);
        let due = downloaded.saturating_sub(self.last_bytes) >= self.threshold
            || (total > 0 && percent != self.last_percent);
        if due {
            self.last_bytes = downloaded;
            self.last_percent = percent;
        }
        due
    }
}

impl TaskInner {
    /// Parks while Paused, polling at most `pause_poll` apart. Err(Cancelled)
    /// if the worker must stop instead.
    pub(super) async fn wait_while_paused(&self, epoch: u64) -> Result<(), DownloadError> {
        let mut rx = self.state.subscribe();
        let mut parked = false;
        loop {
            if self.interrupted(epoch) {
                return Err(DownloadError::Cancelled);
            }
            if *rx.borrow_and_update() != TaskState::Paused {
                if parked {
                    tracing::debug!(id = %self.id, "worker unparked");
                }
                return Ok(());
            }
            if !parked {
                parked = true;
                // Chunks are flushed before they are counted, so the counter
                // matches the file here.
                self.persister.progress(
                    self.downloaded.load(Ordering::SeqCst),
                    self.total.load(Ordering::SeqCst),
                );
                tracing::debug!(id = %self.id, "worker parked");
            }
            let _ = tokio::time::timeout(self.config.pause_poll, rx.changed()).await;
        }
    }

    pub(super) async fn stream_body(
        &self,
        epoch: u64,
        body: &mut BodyStream,
        file: &mut File,
    ) -> Result<(), DownloadError> {
        let mut buf = vec![0u8; self.config.chunk_size];
        let mut throttle = PersistThrottle::new(
            self.config.persist_threshold_bytes,
            self.downloaded.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        );

        loop {
            self.wait_while_paused(epoch).await?;

            let n = tokio::select! {
                read = body.read_chunk(&mut buf) => read.map_err(DownloadError::stream)?,
                _ = self.wait_for_interrupt(epoch) => return Err(DownloadError::Cancelled),
            };
            if n == 0 {
                break;
            }

            file.write_all(&buf[..n]).await.map_err(DownloadError::stream)?;
            file.flush().await.map_err(DownloadError::stream)?;

            let downloaded = self.downloaded.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
            let total = self.total.load(Ordering::SeqCst);
            self.reset_retries();

            self.listener.emit(DownloadEvent::Progress {
                id: self.id.clone(),
                downloaded_bytes: downloaded,
                total_bytes: total,
                percentage: percentage(downloaded, total),
            });
            if throttle.should_persist(downloaded, total) {
                self.persister.progress(downloaded, total);
            }
        }

        file.sync_all().await.map_err(DownloadError::stream)?;

        let downloaded = self.downloaded.load(Ordering::SeqCst);
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 || downloaded == total {
            tracing::debug!(id = %self.id, downloaded, "end of body");
            Ok(())
        } else {
            Err(DownloadError::PartialTransfer {
                expected: total,
                received: downloaded,
            })
        }
    }
}
