//! `fwdl resume [id]` – pick up downloads left unfinished by a previous run.

use anyhow::{bail, Result};
use fwdl_core::config::EngineConfig;
use fwdl_core::{DownloadRequest, DownloadStatus, Listener, ProgressStore};

use super::follow::follow;
use crate::engine::Engine;

/// Restores every unfinished download (paused), then resumes `id` or all of
/// them. A Failed download named by `id` is restarted from its partial file.
pub async fn run_resume(cfg: &EngineConfig, id: Option<&str>) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    engine.watch_network();

    let (listener, rx) = Listener::channel();
    let restored = engine
        .coordinator
        .resume_incomplete_on_startup(listener.clone())
        .await?;
    if !restored.is_empty() {
        tracing::info!("restored {} unfinished download(s)", restored.len());
    }

    let targets: Vec<String> = match id {
        Some(id) if restored.iter().any(|r| r == id) => vec![id.to_string()],
        Some(id) => {
            let Some(record) = engine.store.get_by_id(id).await? else {
                bail!("no download with id {id}");
            };
            if record.status != DownloadStatus::Failed {
                bail!("download {id} is {}; nothing to resume", record.status);
            }
            let request = DownloadRequest::new(record.url.clone())
                .with_id(id)
                .with_file_name(record.file_name.clone());
            engine
                .coordinator
                .start(request, &record.directory_path, listener)
                .await?;
            return follow(&engine, &[id.to_string()], rx).await;
        }
        None => restored,
    };

    if targets.is_empty() {
        println!("Nothing to resume.");
        return Ok(());
    }
    for id in &targets {
        if engine.coordinator.resume(id).await {
            println!("Resumed {id}");
        }
    }
    follow(&engine, &targets, rx).await
}
