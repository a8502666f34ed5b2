//! `fwdl remove <id>` – forget a download; optionally delete its files with --delete-files.

use anyhow::{bail, Result};
use fwdl_core::config::EngineConfig;
use fwdl_core::ProgressStore;

use crate::engine::Engine;

/// Removes the record. With `delete_files`, also deletes the `.part` file
/// and the finished file.
pub async fn run_remove(cfg: &EngineConfig, id: &str, delete_files: bool) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    let Some(record) = engine.store.get_by_id(id).await? else {
        bail!("no download with id {id}");
    };

    if delete_files {
        let finished = record
            .final_path
            .clone()
            .unwrap_or_else(|| record.target_path());
        for path in [&record.temporary_path, &finished] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "deleted file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
            }
        }
    }

    engine.store.delete(id).await?;
    println!("Removed {id}");
    Ok(())
}
