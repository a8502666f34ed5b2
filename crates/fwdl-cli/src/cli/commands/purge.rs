//! `fwdl purge` – drop finished records older than N days.

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use fwdl_core::config::EngineConfig;
use fwdl_core::ProgressStore;

use crate::engine::Engine;

pub async fn run_purge(cfg: &EngineConfig, older_than_days: u64) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
    let cutoff = now.saturating_sub(older_than_days * 86_400) as i64;
    let removed = engine.store.purge_finished_before(cutoff).await?;
    println!("Purged {removed} finished download(s)");
    Ok(())
}
