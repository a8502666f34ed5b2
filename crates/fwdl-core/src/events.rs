//! Listener events delivered from tasks to the caller.
//!
//! Events are fire-and-forget: they go into an unbounded channel and the
//! engine never waits for the receiver.

use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::task::TaskState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Progress {
        id: String,
        downloaded_bytes: u64,
        total_bytes: u64,
        percentage: u8,
    },
    StateChanged {
        id: String,
        state: TaskState,
    },
    /// Terminal outcome; `final_path` is set only on success.
    Completed {
        id: String,
        success: bool,
        final_path: Option<PathBuf>,
    },
    Error {
        id: String,
        message: String,
    },
    Paused {
        id: String,
    },
    Resumed {
        id: String,
    },
    Cancelled {
        id: String,
    },
    NetworkReconnected {
        id: String,
    },
}

impl DownloadEvent {
    pub fn id(&self) -> &str {
        match self {
            DownloadEvent::Progress { id, .. }
            | DownloadEvent::StateChanged { id, .. }
            | DownloadEvent::Completed { id, .. }
            | DownloadEvent::Error { id, .. }
            | DownloadEvent::Paused { id }
            | DownloadEvent::Resumed { id }
            | DownloadEvent::Cancelled { id }
            | DownloadEvent::NetworkReconnected { id } => id,
        }
    }
}

/// Where a task sends its events. Cloning shares the same receiver.
#[derive(Debug, Clone, Default)]
pub struct Listener {
    tx: Option<mpsc::UnboundedSender<DownloadEvent>>,
}

impl Listener {
    /// Discards every event.
    pub fn none() -> Self {
        Self { tx: None }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn from_sender(tx: mpsc::UnboundedSender<DownloadEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A dropped receiver is not an error.
    pub(crate) fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
