//! Foreground progress display shared by `get` and `resume`.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use fwdl_core::{DownloadEvent, TaskState};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::engine::Engine;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Prints events until every id in `ids` has finished. Ctrl-C pauses all
/// downloads, persists their progress and returns.
pub async fn follow(
    engine: &Engine,
    ids: &[String],
    mut rx: UnboundedReceiver<DownloadEvent>,
) -> Result<()> {
    let mut pending: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let mut failed = 0usize;
    let mut last_print: Option<Instant> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while !pending.is_empty() {
        let event = tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => ev,
                None => break,
            },
            _ = &mut ctrl_c => {
                let paused = engine.coordinator.pause_all().await;
                engine.shutdown().await;
                println!("Paused {paused} download(s); run `fwdl resume` to continue.");
                return Ok(());
            }
        };

        match &event {
            DownloadEvent::Progress {
                id,
                downloaded_bytes,
                total_bytes,
                percentage,
            } => {
                let due = last_print.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
                if due {
                    last_print = Some(Instant::now());
                    let done_mib = *downloaded_bytes as f64 / 1_048_576.0;
                    if *total_bytes > 0 {
                        let total_mib = *total_bytes as f64 / 1_048_576.0;
                        println!("{id}: {done_mib:.1}/{total_mib:.1} MiB ({percentage}%)");
                    } else {
                        println!("{id}: {done_mib:.1} MiB");
                    }
                }
            }
            DownloadEvent::StateChanged {
                id,
                state: TaskState::WaitingForNetwork,
            } => println!("{id}: waiting for network"),
            DownloadEvent::NetworkReconnected { id } => println!("{id}: network back, resuming"),
            DownloadEvent::Error { id, message } => eprintln!("{id}: {message}"),
            DownloadEvent::Completed {
                id,
                success,
                final_path,
            } => {
                if *success {
                    match final_path {
                        Some(path) => println!("{id}: saved {}", path.display()),
                        None => println!("{id}: done"),
                    }
                } else {
                    failed += 1;
                }
                pending.remove(id.as_str());
            }
            DownloadEvent::Cancelled { id } => {
                pending.remove(id.as_str());
            }
            _ => {}
        }
    }

    engine.shutdown().await;
    if failed > 0 {
        bail!("{failed} download(s) failed");
    }
    Ok(())
}
