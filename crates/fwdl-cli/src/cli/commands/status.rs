//! `fwdl status` – list every known download.

use anyhow::Result;
use fwdl_core::config::EngineConfig;
use fwdl_core::ProgressStore;

use crate::engine::Engine;

pub async fn run_status(cfg: &EngineConfig) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    let records = engine.store.list_all().await?;
    if records.is_empty() {
        println!("No downloads.");
        return Ok(());
    }

    println!(
        "{:<18} {:<20} {:>5} {:>12}  {}",
        "ID", "STATUS", "PCT", "BYTES", "FILE"
    );
    for r in &records {
        let size = if r.total_bytes > 0 {
            format!("{}/{}", r.downloaded_bytes, r.total_bytes)
        } else {
            format!("{}", r.downloaded_bytes)
        };
        println!(
            "{:<18} {:<20} {:>4}% {:>12}  {}",
            r.id,
            r.status,
            r.percentage(),
            size,
            r.target_path().display()
        );
        if let Some(msg) = &r.error_message {
            println!("{:<18} error: {}", "", msg);
        }
    }

    let stats = engine.coordinator.statistics().await?;
    let counts: Vec<String> = stats
        .by_status
        .iter()
        .map(|(status, n)| format!("{n} {status}"))
        .collect();
    println!(
        "{} download(s): {}; {:.1} MiB on disk",
        stats.total,
        counts.join(", "),
        stats.downloaded_bytes as f64 / 1_048_576.0
    );
    Ok(())
}
