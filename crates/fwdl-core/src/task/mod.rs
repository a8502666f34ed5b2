//! One download as a state machine.
//!
//! ```text
//! Idle -> Connecting -> Downloading <-> Paused
//! Downloading -> WaitingForNetwork -> Connecting -> Downloading
//! any active state -> Cancelled | Failed;  Downloading -> Completed
//! ```
//!
//! Commands (`pause`, `resume`, `cancel`, network signals) may arrive from any
//! thread. The state lives in a `watch` channel and every transition is a
//! guarded compare-and-set on it; the worker observes changes at chunk and
//! await boundaries. Byte counters are atomics owned by the worker, so
//! persisted progress is always read from the single monotonic counter.

mod persist;
mod run;
mod stream;


use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::connectivity::NetworkStatus;
use crate::events::{DownloadEvent, Listener};
use crate::http::RangeTransport;
use crate::progress::Progress;
use crate::retry::RetryPolicy;
use crate::store::{DownloadRecord, DownloadStatus, ProgressStore};
use crate::storage;

use persist::Persister;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Idle,
    Connecting,
    Downloading,
    Paused,
    WaitingForNetwork,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Idle => "idle",
            TaskState::Connecting => "connecting",
            TaskState::Downloading => "downloading",
            TaskState::Paused => "paused",
            TaskState::WaitingForNetwork => "waiting_for_network",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed or Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    /// Status written to the store for this state.
    pub fn as_status(self) -> DownloadStatus {
        match self {
            TaskState::Idle => DownloadStatus::Idle,
            TaskState::Connecting | TaskState::Downloading => DownloadStatus::Downloading,
            TaskState::Paused => DownloadStatus::Paused,
            TaskState::WaitingForNetwork => DownloadStatus::WaitingForNetwork,
            TaskState::Completed => DownloadStatus::Completed,
            TaskState::Failed => DownloadStatus::Failed,
            TaskState::Cancelled => DownloadStatus::Cancelled,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime tuning for a task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Bytes per read/write in the stream loop.
    pub chunk_size: usize,
    /// Persist progress after this many bytes, or on every new percentage point.
    pub persist_threshold_bytes: u64,
    /// Longest a paused worker sleeps between state checks.
    pub pause_poll: Duration,
    pub persist_retry_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            persist_threshold_bytes: 100_000,
            pause_poll: Duration::from_millis(200),
            persist_retry_delay: Duration::from_millis(500),
            retry: RetryPolicy::default(),
        }
    }
}

/// Services shared by every task of one engine.
#[derive(Clone)]
pub struct TaskContext {
    pub transport: Arc<dyn RangeTransport>,
    pub store: Arc<dyn ProgressStore>,
    pub network: NetworkStatus,
    pub config: TaskConfig,
}

/// Handle to one download. Cloning shares the same task.
#[derive(Clone)]
pub struct DownloadTask {
    inner: Arc<TaskInner>,
}

pub(crate) struct TaskInner {
    id: String,
    record: Mutex<DownloadRecord>,
    downloaded: AtomicU64,
    total: AtomicU64,
    retry_count: AtomicU32,
    state: watch::Sender<TaskState>,
    /// Bumped by every relaunch; a worker whose epoch is stale stops at its
    /// next check.
    epoch: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Take the server's Content-Disposition name on a fresh start.
    adopt_server_name: bool,
    transport: Arc<dyn RangeTransport>,
    persister: Persister,
    listener: Listener,
    network: NetworkStatus,
    config: TaskConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Announce {
    /// Caller persists and emits itself (terminal transitions).
    Quiet,
    /// Persist status and emit `StateChanged` with the transition.
    Notify,
    /// Like `Notify`, and start a new worker epoch.
    Relaunch,
}

impl DownloadTask {
    /// New idle task for `record`; call `start` to begin.
    pub fn new(record: DownloadRecord, ctx: &TaskContext, listener: Listener) -> Self {
        Self::build(record, ctx, listener, TaskState::Idle, false)
    }

    /// Like `new`, but a `Content-Disposition` file name from the server
    /// replaces `record.file_name` when the transfer starts from byte 0.
    pub fn with_server_name(record: DownloadRecord, ctx: &TaskContext, listener: Listener) -> Self {
        Self::build(record, ctx, listener, TaskState::Idle, true)
    }

    /// Task for a record found at startup, parked in Paused until `resume`.
    pub fn restore_paused(record: DownloadRecord, ctx: &TaskContext, listener: Listener) -> Self {
        Self::build(record, ctx, listener, TaskState::Paused, false)
    }

    fn build(
        record: DownloadRecord,
        ctx: &TaskContext,
        listener: Listener,
        initial: TaskState,
        adopt_server_name: bool,
    ) -> Self {
        let (state, _) = watch::channel(initial);
        let persister = Persister::spawn(
            record.id.clone(),
            ctx.store.clone(),
            ctx.config.persist_retry_delay,
        );
        let inner = TaskInner {
            id: record.id.clone(),
            downloaded: AtomicU64::new(record.downloaded_bytes),
            total: AtomicU64::new(record.total_bytes),
            retry_count: AtomicU32::new(record.retry_count),
            record: Mutex::new(record),
            state,
            epoch: AtomicU64::new(0),
            worker: Mutex::new(None),
            adopt_server_name,
            transport: ctx.transport.clone(),
            persister,
            listener,
            network: ctx.network.clone(),
            config: ctx.config.clone(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<TaskState> {
        self.inner.state.subscribe()
    }

    /// Waits until the state satisfies `pred` and returns it.
    pub async fn wait_for(&self, pred: impl Fn(TaskState) -> bool) -> TaskState {
        let mut rx = self.inner.state.subscribe();
        let result = rx.wait_for(|s| pred(*s)).await.map(|s| *s);
        result.unwrap_or_else(|_| self.state())
    }

    pub fn progress(&self) -> Progress {
        Progress {
            id: self.inner.id.clone(),
            state: self.state(),
            downloaded_bytes: self.inner.downloaded.load(Ordering::SeqCst),
            total_bytes: self.inner.total.load(Ordering::SeqCst),
            retry_count: self.inner.retry_count.load(Ordering::SeqCst),
        }
    }

    /// Current record with live counters and status folded in.
    pub fn record(&self) -> DownloadRecord {
        self.inner.snapshot(self.state())
    }

    pub fn temporary_path(&self) -> PathBuf {
        self.inner.record.lock().temporary_path.clone()
    }

    /// Begins the transfer from Idle. A no-op while Connecting or
    /// Downloading. Without connectivity the task parks in WaitingForNetwork
    /// instead of connecting.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        if !inner.network.is_reachable() {
            return inner.park_for_network(|s| s == TaskState::Idle);
        }
        let started = inner.relaunch(|s| s == TaskState::Idle);
        if started {
            tracing::info!(id = %inner.id, "download started");
        }
        started
    }

    /// Downloading -> Paused. Bytes already written stay on disk; the worker
    /// persists the exact count once it parks.
    pub fn pause(&self) -> bool {
        let inner = &self.inner;
        let paused = inner
            .transition(|s| s == TaskState::Downloading, TaskState::Paused, Announce::Notify)
            .is_some();
        if paused {
            tracing::info!(id = %inner.id, "download paused");
            inner.listener.emit(DownloadEvent::Paused {
                id: inner.id.clone(),
            });
        }
        paused
    }

    /// From Paused: continue (or wait for the network if it is down).
    /// From Failed: reset the retry counter and reconnect from the current
    /// offset. Anything else is a no-op returning false.
    pub fn resume(&self) -> bool {
        let inner = &self.inner;
        let resumed = match self.state() {
            TaskState::Paused if !inner.network.is_reachable() => {
                return inner.park_for_network(|s| s == TaskState::Paused);
            }
            TaskState::Paused => {
                inner.reset_retries();
                if inner.worker_alive() {
                    inner
                        .transition(
                            |s| s == TaskState::Paused,
                            TaskState::Downloading,
                            Announce::Notify,
                        )
                        .is_some()
                } else {
                    inner.relaunch(|s| s == TaskState::Paused)
                }
            }
            TaskState::Failed => {
                inner.reset_retries();
                inner.record.lock().error_message = None;
                inner.relaunch(|s| s == TaskState::Failed)
            }
            _ => false,
        };
        if resumed {
            tracing::info!(id = %inner.id, "download resumed");
            inner.listener.emit(DownloadEvent::Resumed {
                id: inner.id.clone(),
            });
        }
        resumed
    }

    /// Stops the transfer, deletes the temporary file and records the
    /// download as Cancelled. Valid from every state except Completed and
    /// Cancelled. Returns once the worker has exited.
    pub async fn cancel(&self) -> bool {
        let inner = &self.inner;
        let cancelled = inner
            .transition(
                |s| s != TaskState::Completed && s != TaskState::Cancelled,
                TaskState::Cancelled,
                Announce::Quiet,
            )
            .is_some();
        if !cancelled {
            return false;
        }

        let worker = inner.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }

        let temp = self.temporary_path();
        if let Err(e) = storage::remove_partial(&temp).await {
            tracing::warn!(id = %inner.id, error = %e, "could not remove temporary file");
        }
        inner.downloaded.store(0, Ordering::SeqCst);
        inner
            .persister
            .progress(0, inner.total.load(Ordering::SeqCst));
        inner.persister.status(DownloadStatus::Cancelled, None);
        inner.persister.flush().await;

        tracing::info!(id = %inner.id, "download cancelled");
        inner.listener.emit(DownloadEvent::Cancelled {
            id: inner.id.clone(),
        });
        inner.emit_state(TaskState::Cancelled);
        true
    }

    /// Connectivity came back: a task in WaitingForNetwork reconnects from
    /// its current offset with a fresh retry budget.
    pub fn on_network_available(&self) -> bool {
        self.inner.network_available()
    }

    /// Connectivity dropped: a Downloading task moves straight to
    /// WaitingForNetwork without consuming a retry.
    pub fn on_network_lost(&self) -> bool {
        let inner = &self.inner;
        let moved = inner
            .transition(
                |s| s == TaskState::Downloading,
                TaskState::WaitingForNetwork,
                Announce::Notify,
            )
            .is_some();
        if moved {
            tracing::info!(id = %inner.id, "network lost; waiting");
        }
        moved
    }

    /// Releases what the task still holds: waits for a finished worker and
    /// drains pending store writes.
    pub async fn release(&self) {
        let worker = {
            let mut slot = self.inner.worker.lock();
            match slot.as_ref() {
                Some(h) if h.is_finished() => slot.take(),
                _ => None,
            }
        };
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        self.inner.persister.flush().await;
    }
}

impl TaskInner {
    fn current(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Guarded transition to `to`. Returns the new epoch on success.
    fn transition(
        &self,
        allowed: impl FnOnce(TaskState) -> bool,
        to: TaskState,
        announce: Announce,
    ) -> Option<u64> {
        let mut epoch = None;
        self.state.send_if_modified(|current| {
            if !allowed(*current) {
                return false;
            }
            let e = if announce == Announce::Relaunch {
                self.epoch.fetch_add(1, Ordering::SeqCst) + 1
            } else {
                self.epoch.load(Ordering::SeqCst)
            };
            *current = to;
            if announce != Announce::Quiet {
                self.persister.status(to.as_status(), None);
                self.emit_state(to);
            }
            epoch = Some(e);
            true
        });
        epoch
    }

    /// Moves to Connecting under a new epoch and spawns a worker for it.
    fn relaunch(self: &Arc<Self>, allowed: impl FnOnce(TaskState) -> bool) -> bool {
        match self.transition(allowed, TaskState::Connecting, Announce::Relaunch) {
            Some(epoch) => {
                self.spawn_worker(epoch);
                true
            }
            None => false,
        }
    }

    /// The new worker first waits for the previous one, so at most one of
    /// them ever writes the temporary file.
    fn spawn_worker(self: &Arc<Self>, epoch: u64) {
        let mut slot = self.worker.lock();
        let previous = slot.take();
        let inner = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            inner.run(epoch).await;
        }));
    }

    fn worker_alive(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Enters WaitingForNetwork, then re-checks reachability so an Available
    /// signal that raced the transition is not lost.
    fn park_for_network(self: &Arc<Self>, allowed: impl FnOnce(TaskState) -> bool) -> bool {
        let parked = self
            .transition(allowed, TaskState::WaitingForNetwork, Announce::Notify)
            .is_some();
        if parked {
            tracing::info!(id = %self.id, "waiting for network");
            if self.network.is_reachable() {
                self.network_available();
            }
        }
        parked
    }

    fn network_available(self: &Arc<Self>) -> bool {
        if self.current() != TaskState::WaitingForNetwork {
            return false;
        }
        self.reset_retries();
        let relaunched = self.relaunch(|s| s == TaskState::WaitingForNetwork);
        if relaunched {
            tracing::info!(id = %self.id, "network back; reconnecting");
            self.listener.emit(DownloadEvent::NetworkReconnected {
                id: self.id.clone(),
            });
        }
        relaunched
    }

    fn reset_retries(&self) {
        if self.retry_count.swap(0, Ordering::SeqCst) != 0 {
            self.persister.retry_count(0);
        }
    }

    fn emit_state(&self, state: TaskState) {
        self.listener.emit(DownloadEvent::StateChanged {
            id: self.id.clone(),
            state,
        });
    }

    fn snapshot(&self, state: TaskState) -> DownloadRecord {
        let mut record = self.record.lock().clone();
        record.downloaded_bytes = self.downloaded.load(Ordering::SeqCst);
        record.total_bytes = self.total.load(Ordering::SeqCst);
        record.retry_count = self.retry_count.load(Ordering::SeqCst);
        record.status = state.as_status();
        record
    }

    /// Queues a full-record write. The state read lock is held while the
    /// snapshot is queued so it cannot overtake a concurrent status write.
    fn persist_record(&self) {
        let state = self.state.borrow();
        self.persister.record(self.snapshot(*state));
    }
}
