//! Worker: connect, stream, retry, finish.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use super::{Announce, TaskInner, TaskState};
use crate::checksum;
use crate::error::DownloadError;
use crate::events::DownloadEvent;
use crate::http::HttpResponse;
use crate::naming::sanitize_file_name;
use crate::retry::RetryDecision;
use crate::safe_resume::{check_resume, ResumeCheck};
use crate::storage;
use crate::store::DownloadStatus;

impl TaskInner {
    /// True once this worker must stop: the task left the active states or a
    /// newer worker took over.
    pub(super) fn interrupted(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
            || matches!(
                self.current(),
                TaskState::Idle
                    | TaskState::WaitingForNetwork
                    | TaskState::Completed
                    | TaskState::Failed
                    | TaskState::Cancelled
            )
    }

    /// Resolves when `interrupted(epoch)` becomes true.
    pub(super) async fn wait_for_interrupt(&self, epoch: u64) {
        let mut rx = self.state.subscribe();
        loop {
            if self.interrupted(epoch) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Sleeps for `delay` unless interrupted first. True if the full delay elapsed.
    async fn sleep_unless_interrupted(&self, delay: Duration, epoch: u64) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.interrupted(epoch),
            _ = self.wait_for_interrupt(epoch) => false,
        }
    }

    pub(super) async fn run(self: Arc<Self>, epoch: u64) {
        loop {
            if self.wait_while_paused(epoch).await.is_err() {
                return;
            }
            let err = match self.connect_and_stream(epoch).await {
                Ok(()) => {
                    self.complete(epoch).await;
                    return;
                }
                Err(DownloadError::Cancelled) => return,
                Err(e) => e,
            };

            if !err.is_transient() {
                self.fail(epoch, &err).await;
                return;
            }
            if self.interrupted(epoch) {
                return;
            }
            if !self.network.is_reachable() {
                tracing::info!(id = %self.id, error = %err, "transfer interrupted while offline");
                self.park_for_network(|s| {
                    matches!(
                        s,
                        TaskState::Connecting | TaskState::Downloading | TaskState::Paused
                    ) && self.epoch.load(Ordering::SeqCst) == epoch
                });
                return;
            }

            let attempt = self.retry_count.fetch_add(1, Ordering::SeqCst) + 1;
            self.persister.retry_count(attempt);
            match self.config.retry.decide(attempt, &err) {
                RetryDecision::NoRetry => {
                    self.fail(epoch, &err).await;
                    return;
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        id = %self.id,
                        attempt,
                        max = self.config.retry.max_retries,
                        error = %err,
                        "transfer failed; retrying in {:?}",
                        delay
                    );
                    if !self.sleep_unless_interrupted(delay, epoch).await {
                        return;
                    }
                }
            }
        }
    }

    fn temp_path(&self) -> PathBuf {
        self.record.lock().temporary_path.clone()
    }

    /// One attempt: connect from the current offset, validate the response
    /// and stream the body to the temporary file.
    async fn connect_and_stream(&self, epoch: u64) -> Result<(), DownloadError> {
        let temp = self.temp_path();
        let offset = self.reconcile_offset(&temp).await?;
        let known_total = self.total.load(Ordering::SeqCst);
        if known_total > 0 && offset == known_total {
            // Everything is already on disk (e.g. interrupted right at EOF).
            return Ok(());
        }

        let mut response = self.connect_checked(offset, epoch).await?;
        let mut offset = response.resume_from();

        let stored_etag = self.record.lock().etag.clone();
        let stored_total = self.total.load(Ordering::SeqCst);
        if let ResumeCheck::Restart(reason) =
            check_resume(offset, stored_etag.as_deref(), stored_total, &response)
        {
            tracing::warn!(id = %self.id, offset, %reason, "discarding partial data");
            self.reset_partial(&temp).await?;
            if response.is_partial() {
                // The range belongs to another version; fetch it whole.
                response.close();
                response = self.connect_checked(0, epoch).await?;
            }
            offset = 0;
        }

        self.adopt_response(&response, offset);

        let mut file = storage::open_destination(&temp, offset).await?;
        let mut body = response.open_stream()?;
        self.transition(
            |s| s == TaskState::Connecting && self.epoch.load(Ordering::SeqCst) == epoch,
            TaskState::Downloading,
            Announce::Notify,
        );

        let result = self.stream_body(epoch, &mut body, &mut file).await;
        response.close();
        self.persister.progress(
            self.downloaded.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        );
        result
    }

    /// Makes the counter agree with the temporary file before reconnecting.
    /// The file length wins; a file longer than the known total starts over.
    async fn reconcile_offset(&self, temp: &std::path::Path) -> Result<u64, DownloadError> {
        let counted = self.downloaded.load(Ordering::SeqCst);
        if counted == 0 {
            return Ok(0);
        }
        let on_disk = storage::file_len(temp).await?;
        if on_disk == counted {
            return Ok(counted);
        }
        let total = self.total.load(Ordering::SeqCst);
        let offset = if total > 0 && on_disk > total {
            storage::truncate_to(temp, 0).await?;
            0
        } else {
            on_disk
        };
        tracing::warn!(id = %self.id, counted, on_disk, offset, "temporary file length differs from record; reconciled");
        self.downloaded.store(offset, Ordering::SeqCst);
        self.persister.progress(offset, total);
        Ok(offset)
    }

    async fn connect(&self, offset: u64, epoch: u64) -> Result<HttpResponse, DownloadError> {
        let url = self.record.lock().url.clone();
        tracing::debug!(id = %self.id, offset, "connecting");
        tokio::select! {
            r = self.transport.connect(&url, offset) => r,
            _ = self.wait_for_interrupt(epoch) => Err(DownloadError::Cancelled),
        }
    }

    /// Connects and insists on 200/206. A resume request that is rejected
    /// outright (416 and friends) is retried once from byte 0 after the
    /// partial file is dropped.
    async fn connect_checked(&self, offset: u64, epoch: u64) -> Result<HttpResponse, DownloadError> {
        let mut response = self.connect(offset, epoch).await?;
        if response.is_valid_response() {
            return Ok(response);
        }
        let code = response.status();
        response.close();
        if offset == 0 {
            return Err(DownloadError::Protocol { code });
        }

        tracing::warn!(id = %self.id, offset, code, "range request rejected; restarting from byte 0");
        self.reset_partial(&self.temp_path()).await?;
        let mut response = self.connect(0, epoch).await?;
        if response.is_valid_response() {
            Ok(response)
        } else {
            let code = response.status();
            response.close();
            Err(DownloadError::Protocol { code })
        }
    }

    /// Drops everything received so far.
    async fn reset_partial(&self, temp: &std::path::Path) -> Result<(), DownloadError> {
        storage::remove_partial(temp).await?;
        self.downloaded.store(0, Ordering::SeqCst);
        self.total.store(0, Ordering::SeqCst);
        self.record.lock().etag = None;
        self.persister.progress(0, 0);
        Ok(())
    }

    /// Records size, validator and (on a fresh start) the server's file name.
    fn adopt_response(&self, response: &HttpResponse, offset: u64) {
        if let Some(total) = response.total_size().filter(|t| *t > 0) {
            self.total.store(total, Ordering::SeqCst);
        }
        {
            let mut record = self.record.lock();
            if let Some(etag) = response.etag() {
                record.etag = Some(etag.to_string());
            }
            if offset == 0 && self.adopt_server_name {
                if let Some(name) = response
                    .suggested_file_name()
                    .map(|n| sanitize_file_name(&n))
                    .filter(|n| !n.is_empty() && n != "." && n != "..")
                {
                    if name != record.file_name {
                        tracing::debug!(id = %self.id, from = %record.file_name, to = %name, "using server file name");
                        record.file_name = name;
                    }
                }
            }
        }
        self.persist_record();
    }

    /// Verifies, renames the temporary file into place exactly once, and
    /// reports success.
    async fn complete(&self, epoch: u64) {
        let temp = self.temp_path();
        let expected = self.record.lock().expected_sha256.clone();
        if let Some(expected) = expected {
            if let Err(e) = checksum::verify_sha256(&temp, &expected).await {
                if matches!(e, DownloadError::ChecksumMismatch { .. }) {
                    if let Err(rm) = storage::remove_partial(&temp).await {
                        tracing::warn!(id = %self.id, error = %rm, "could not remove corrupt file");
                    }
                    self.downloaded.store(0, Ordering::SeqCst);
                    self.total.store(0, Ordering::SeqCst);
                    self.persister.progress(0, 0);
                }
                self.fail(epoch, &e).await;
                return;
            }
        }

        // Claim completion before touching the file so a racing cancel
        // cannot delete it mid-rename.
        let claimed = self
            .transition(
                |s| {
                    matches!(
                        s,
                        TaskState::Connecting | TaskState::Downloading | TaskState::Paused
                    ) && self.epoch.load(Ordering::SeqCst) == epoch
                },
                TaskState::Completed,
                Announce::Quiet,
            )
            .is_some();
        if !claimed {
            return;
        }

        let wanted = self.record.lock().target_path();
        let target = match storage::finalize(&temp, &wanted).await {
            Ok(target) => target,
            Err(e) => {
                self.transition(|s| s == TaskState::Completed, TaskState::Failed, Announce::Quiet);
                self.report_failure(&e).await;
                return;
            }
        };
        if target != wanted {
            tracing::info!(id = %self.id, taken = %wanted.display(), "file name in use; saved under a new name");
        }

        // Unknown length: the body that arrived is the whole file.
        if self.total.load(Ordering::SeqCst) == 0 {
            self.total
                .store(self.downloaded.load(Ordering::SeqCst), Ordering::SeqCst);
        }
        {
            let mut record = self.record.lock();
            if let Some(name) = target.file_name() {
                record.file_name = name.to_string_lossy().into_owned();
            }
            record.final_path = Some(target.clone());
        }
        self.persist_record();
        self.persister.flush().await;

        tracing::info!(
            id = %self.id,
            bytes = self.downloaded.load(Ordering::SeqCst),
            path = %target.display(),
            "download complete"
        );
        self.emit_state(TaskState::Completed);
        self.listener.emit(DownloadEvent::Completed {
            id: self.id.clone(),
            success: true,
            final_path: Some(target),
        });
    }

    /// Any non-terminal state -> Failed, keeping the partial file.
    async fn fail(&self, epoch: u64, err: &DownloadError) {
        let failed = self
            .transition(
                |s| !s.is_terminal() && self.epoch.load(Ordering::SeqCst) == epoch,
                TaskState::Failed,
                Announce::Quiet,
            )
            .is_some();
        if failed {
            self.report_failure(err).await;
        }
    }

    async fn report_failure(&self, err: &DownloadError) {
        let message = err.to_string();
        tracing::warn!(
            id = %self.id,
            retries = self.retry_count.load(Ordering::SeqCst),
            error = %message,
            "download failed"
        );
        self.record.lock().error_message = Some(message.clone());
        self.persister.progress(
            self.downloaded.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        );
        self.persister
            .status(DownloadStatus::Failed, Some(message.clone()));
        self.persister.flush().await;

        self.listener.emit(DownloadEvent::Error {
            id: self.id.clone(),
            message,
        });
        self.emit_state(TaskState::Failed);
        self.listener.emit(DownloadEvent::Completed {
            id: self.id.clone(),
            success: false,
            final_path: None,
        });
    }
}
