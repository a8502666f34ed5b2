//! Active-download registry.
//!
//! `DownloadCoordinator` owns every live `DownloadTask`, keyed by download id,
//! and is the one place commands enter the engine: callers start, pause,
//! resume and cancel through it, connectivity edges fan out from it, and at
//! process start it rebuilds tasks from the progress store.
//!
//! At most one non-terminal task exists per id, and no two live tasks share a
//! temporary path, so each `.part` file has exactly one writer.

mod startup;


use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::connectivity::{ConnectivityEvent, ConnectivityWatcher};
use crate::error::DownloadError;
use crate::events::Listener;
use crate::naming::{derive_file_name, sanitize_file_name};
use crate::progress::Progress;
use crate::store::{DownloadRecord, DownloadStatus};
use crate::task::{DownloadTask, TaskContext, TaskState};

/// What to fetch. Everything but the URL is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Stable id; derived from URL and destination when absent.
    pub id: Option<String>,
    /// Final file name; derived from the URL (or the server) when absent.
    pub file_name: Option<String>,
    /// Hex SHA-256 the finished file must match.
    pub expected_sha256: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn with_sha256(mut self, hex: impl Into<String>) -> Self {
        self.expected_sha256 = Some(hex.into());
        self
    }
}

/// Id for `url` saved into `directory`: the first 16 hex digits of
/// SHA-256(`url` + "\n" + directory). The same pair always maps to the same
/// record, across restarts.
pub fn download_id(url: &str, directory: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(directory.to_string_lossy().as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(16);
    id
}

/// Totals over every stored record, with live tasks' counters folded in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statistics {
    pub total: usize,
    /// Non-zero counts only, in `DownloadStatus::ALL` order.
    pub by_status: Vec<(DownloadStatus, usize)>,
    pub downloaded_bytes: u64,
    pub active_tasks: usize,
}

impl Statistics {
    pub fn count(&self, status: DownloadStatus) -> usize {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

pub struct DownloadCoordinator {
    ctx: TaskContext,
    tasks: tokio::sync::Mutex<HashMap<String, DownloadTask>>,
    connectivity: Mutex<Option<JoinHandle<()>>>,
}

impl DownloadCoordinator {
    pub fn new(ctx: TaskContext) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            tasks: tokio::sync::Mutex::new(HashMap::new()),
            connectivity: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Starts (or continues) the download described by `request` into
    /// `destination` and returns its id.
    ///
    /// If a non-terminal task with that id is already live, nothing happens
    /// and its id is returned. A stored unfinished record for the id is
    /// picked up and resumed from the bytes already on disk.
    pub async fn start(
        &self,
        request: DownloadRequest,
        destination: &Path,
        listener: Listener,
    ) -> Result<String, DownloadError> {
        validate_url(&request.url)?;
        let id = request
            .id
            .clone()
            .unwrap_or_else(|| download_id(&request.url, destination));

        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get(&id) {
            if !task.state().is_terminal() {
                tracing::debug!(id = %id, state = %task.state(), "already active");
                return Ok(id);
            }
        }

        let record = self.prepare_record(&id, &request, destination).await?;
        if let Some((owner, _)) = tasks.iter().find(|(other, task)| {
            **other != id
                && !task.state().is_terminal()
                && task.temporary_path() == record.temporary_path
        }) {
            return Err(DownloadError::PathInUse {
                path: record.temporary_path.clone(),
                owner: owner.clone(),
            });
        }

        if let Err(e) = self.ctx.store.upsert(&record).await {
            tracing::warn!(id = %id, error = %e, "could not persist new record");
        }

        let adopt_server_name = request.file_name.is_none() && record.downloaded_bytes == 0;
        let task = if adopt_server_name {
            DownloadTask::with_server_name(record, &self.ctx, listener)
        } else {
            DownloadTask::new(record, &self.ctx, listener)
        };
        if let Some(previous) = tasks.insert(id.clone(), task.clone()) {
            previous.release().await;
        }
        task.start();
        tracing::info!(id = %id, url = %request.url, "download registered");
        Ok(id)
    }

    /// Stored record to continue, or a fresh one.
    async fn prepare_record(
        &self,
        id: &str,
        request: &DownloadRequest,
        destination: &Path,
    ) -> Result<DownloadRecord, DownloadError> {
        let stored = match self.ctx.store.get_by_id(id).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "could not read stored record");
                None
            }
        };

        let mut record = match stored {
            Some(mut rec)
                if rec.url == request.url
                    && !matches!(
                        rec.status,
                        DownloadStatus::Completed | DownloadStatus::Cancelled
                    ) =>
            {
                startup::reconcile_with_file(&mut rec).await?;
                tracing::info!(id = %id, offset = rec.downloaded_bytes, "continuing stored download");
                rec
            }
            _ => {
                let name = match &request.file_name {
                    Some(name) => sanitize_file_name(name),
                    None => derive_file_name(&request.url, None),
                };
                DownloadRecord::new(id, &request.url, destination, name)
            }
        };

        if request.expected_sha256.is_some() {
            record.expected_sha256 = request.expected_sha256.clone();
        }
        record.status = DownloadStatus::Pending;
        record.retry_count = 0;
        record.error_message = None;
        record.final_path = None;
        Ok(record)
    }

    async fn task(&self, id: &str) -> Option<DownloadTask> {
        self.tasks.lock().await.get(id).cloned()
    }

    async fn all_tasks(&self) -> Vec<DownloadTask> {
        self.tasks.lock().await.values().cloned().collect()
    }

    pub async fn pause(&self, id: &str) -> bool {
        match self.task(id).await {
            Some(task) => task.pause(),
            None => false,
        }
    }

    pub async fn resume(&self, id: &str) -> bool {
        match self.task(id).await {
            Some(task) => task.resume(),
            None => false,
        }
    }

    /// Cancels the task, deletes its temporary file and drops it from the
    /// registry.
    pub async fn cancel(&self, id: &str) -> bool {
        let Some(task) = self.task(id).await else {
            return false;
        };
        if !task.cancel().await {
            return false;
        }
        let mut tasks = self.tasks.lock().await;
        if tasks
            .get(id)
            .map(|t| t.state() == TaskState::Cancelled)
            .unwrap_or(false)
        {
            tasks.remove(id);
        }
        true
    }

    /// Returns how many tasks paused.
    pub async fn pause_all(&self) -> usize {
        self.all_tasks().await.iter().filter(|t| t.pause()).count()
    }

    pub async fn resume_all(&self) -> usize {
        self.all_tasks().await.iter().filter(|t| t.resume()).count()
    }

    pub async fn cancel_all(&self) -> usize {
        let tasks: Vec<DownloadTask> = self.tasks.lock().await.drain().map(|(_, t)| t).collect();
        let mut cancelled = 0;
        for task in tasks {
            if task.cancel().await {
                cancelled += 1;
            } else {
                task.release().await;
            }
        }
        cancelled
    }

    /// Drops Completed, Failed and Cancelled tasks after releasing them.
    pub async fn cleanup_finished(&self) -> usize {
        let finished: Vec<DownloadTask> = {
            let mut tasks = self.tasks.lock().await;
            let ids: Vec<String> = tasks
                .iter()
                .filter(|(_, t)| t.state().is_terminal())
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| tasks.remove(id)).collect()
        };
        for task in &finished {
            task.release().await;
        }
        if !finished.is_empty() {
            tracing::debug!(count = finished.len(), "released finished tasks");
        }
        finished.len()
    }

    /// Drains every task's pending store writes. Tasks stay registered.
    pub async fn release_all(&self) {
        for task in self.all_tasks().await {
            task.release().await;
        }
    }

    /// Forwards `Available` and `Lost` from `watcher` to the tasks. Only the
    /// first call subscribes.
    pub fn attach_connectivity(self: &Arc<Self>, watcher: &ConnectivityWatcher) {
        let mut slot = self.connectivity.lock();
        if slot.is_some() {
            return;
        }
        let rx = watcher.subscribe();
        *slot = Some(tokio::spawn(forward_connectivity(Arc::downgrade(self), rx)));
    }

    /// Reconnects every task waiting for the network. Returns how many.
    pub async fn network_available(&self) -> usize {
        self.all_tasks()
            .await
            .iter()
            .filter(|t| t.state() == TaskState::WaitingForNetwork)
            .filter(|t| t.on_network_available())
            .count()
    }

    /// Parks every downloading task. Returns how many.
    pub async fn network_lost(&self) -> usize {
        self.all_tasks()
            .await
            .iter()
            .filter(|t| t.state() == TaskState::Downloading)
            .filter(|t| t.on_network_lost())
            .count()
    }

    pub async fn progress(&self, id: &str) -> Option<Progress> {
        self.task(id).await.map(|t| t.progress())
    }

    pub async fn state(&self, id: &str) -> Option<TaskState> {
        self.task(id).await.map(|t| t.state())
    }

    /// Ids of every registered task, sorted.
    pub async fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn statistics(&self) -> anyhow::Result<Statistics> {
        let mut records = self.ctx.store.list_all().await?;
        let live: HashMap<String, DownloadTask> = self.tasks.lock().await.clone();
        for record in records.iter_mut() {
            if let Some(task) = live.get(&record.id) {
                *record = task.record();
            }
        }

        let by_status = DownloadStatus::ALL
            .iter()
            .map(|s| (*s, records.iter().filter(|r| r.status == *s).count()))
            .filter(|(_, n)| *n > 0)
            .collect();
        Ok(Statistics {
            total: records.len(),
            by_status,
            downloaded_bytes: records.iter().map(|r| r.downloaded_bytes).sum(),
            active_tasks: live.values().filter(|t| !t.state().is_terminal()).count(),
        })
    }
}

impl Drop for DownloadCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.connectivity.get_mut().take() {
            handle.abort();
        }
    }
}

async fn forward_connectivity(
    coordinator: Weak<DownloadCoordinator>,
    mut rx: tokio::sync::broadcast::Receiver<ConnectivityEvent>,
) {
    loop {
        let event = match rx.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "connectivity events lagged; resyncing");
                None
            }
            Err(RecvError::Closed) => return,
        };
        let Some(coordinator) = coordinator.upgrade() else {
            return;
        };
        let reachable = match event {
            Some(ConnectivityEvent::Available) => true,
            Some(ConnectivityEvent::Lost) => false,
            None => coordinator.ctx.network.is_reachable(),
        };
        if reachable {
            let n = coordinator.network_available().await;
            tracing::debug!(tasks = n, "forwarded network available");
        } else {
            let n = coordinator.network_lost().await;
            tracing::debug!(tasks = n, "forwarded network lost");
        }
    }
}

fn validate_url(raw: &str) -> Result<(), DownloadError> {
    let parsed = url::Url::parse(raw).map_err(|e| DownloadError::Request(format!("{raw}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DownloadError::Request(format!(
            "unsupported scheme {other:?}"
        ))),
    }
}
