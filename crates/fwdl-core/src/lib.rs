//! Resumable, network-resilient HTTP download engine.
//!
//! A `DownloadCoordinator` owns one `DownloadTask` per download. Each task
//! streams a ranged GET (`http`) into a `.part` file (`storage`), records its
//! progress in a `ProgressStore` (`store`), and waits out connectivity loss
//! reported by a `ConnectivityWatcher` (`connectivity`) instead of burning
//! retries. Callers observe everything through `DownloadEvent`s.

pub mod config;
pub mod logging;

pub mod checksum;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod http;
pub mod naming;
pub mod progress;
pub mod retry;
pub mod safe_resume;
pub mod storage;
pub mod store;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use connectivity::{ConnectivityEvent, ConnectivityWatcher, NetworkStatus};
pub use coordinator::{download_id, DownloadCoordinator, DownloadRequest, Statistics};
pub use error::DownloadError;
pub use events::{DownloadEvent, Listener};
pub use http::{CurlOptions, CurlTransport, RangeTransport};
pub use progress::Progress;
pub use store::{DownloadRecord, DownloadStatus, MemoryStore, ProgressDb, ProgressStore};
pub use task::{DownloadTask, TaskConfig, TaskContext, TaskState};
