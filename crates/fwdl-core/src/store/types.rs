//! Records kept by the progress store.

use std::path::{Path, PathBuf};

use crate::progress::percentage;
use crate::storage;

/// Download identifier: caller-supplied, or derived from URL and directory.
pub type DownloadId = String;

/// Lifecycle status stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadStatus {
    Idle,
    Pending,
    Downloading,
    Paused,
    WaitingForNetwork,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub const ALL: [DownloadStatus; 8] = [
        DownloadStatus::Idle,
        DownloadStatus::Pending,
        DownloadStatus::Downloading,
        DownloadStatus::Paused,
        DownloadStatus::WaitingForNetwork,
        DownloadStatus::Completed,
        DownloadStatus::Failed,
        DownloadStatus::Cancelled,
    ];

    /// Records that a relaunch should pick back up.
    pub const INCOMPLETE: [DownloadStatus; 3] = [
        DownloadStatus::Downloading,
        DownloadStatus::Paused,
        DownloadStatus::WaitingForNetwork,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Idle => "idle",
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::WaitingForNetwork => "waiting_for_network",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Unknown strings map to `Failed` so a corrupt row never auto-resumes.
    pub fn from_str(s: &str) -> Self {
        match s {
            "idle" => DownloadStatus::Idle,
            "pending" => DownloadStatus::Pending,
            "downloading" => DownloadStatus::Downloading,
            "paused" => DownloadStatus::Paused,
            "waiting_for_network" => DownloadStatus::WaitingForNetwork,
            "completed" => DownloadStatus::Completed,
            "cancelled" => DownloadStatus::Cancelled,
            _ => DownloadStatus::Failed,
        }
    }

    /// Completed, Failed or Cancelled.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            DownloadStatus::Completed | DownloadStatus::Failed | DownloadStatus::Cancelled
        )
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable state of one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub id: DownloadId,
    pub url: String,
    /// Name the finished file gets inside `directory_path`.
    pub file_name: String,
    pub directory_path: PathBuf,
    /// Set once the temp file has been renamed into place.
    pub final_path: Option<PathBuf>,
    /// Fixed at creation; bytes are only ever written here.
    pub temporary_path: PathBuf,
    pub downloaded_bytes: u64,
    /// 0 until the server reports a length.
    pub total_bytes: u64,
    pub status: DownloadStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub etag: Option<String>,
    pub expected_sha256: Option<String>,
    /// Unix seconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl DownloadRecord {
    /// New `Pending` record writing to `<directory>/<file_name>.part`.
    pub fn new(
        id: impl Into<DownloadId>,
        url: impl Into<String>,
        directory: impl AsRef<Path>,
        file_name: impl Into<String>,
    ) -> Self {
        let directory_path = directory.as_ref().to_path_buf();
        let file_name = file_name.into();
        let temporary_path = storage::temp_path(&directory_path.join(&file_name));
        let now = unix_timestamp();
        Self {
            id: id.into(),
            url: url.into(),
            file_name,
            directory_path,
            final_path: None,
            temporary_path,
            downloaded_bytes: 0,
            total_bytes: 0,
            status: DownloadStatus::Pending,
            retry_count: 0,
            error_message: None,
            etag: None,
            expected_sha256: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Where the finished file goes.
    pub fn target_path(&self) -> PathBuf {
        self.directory_path.join(&self.file_name)
    }

    pub fn percentage(&self) -> u8 {
        percentage(self.downloaded_bytes, self.total_bytes)
    }
}

/// Current time as Unix seconds.
pub(crate) fn unix_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
