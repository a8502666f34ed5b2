//! `fwdl get <url>` – start a download and follow it.

use std::path::PathBuf;

use anyhow::Result;
use fwdl_core::config::EngineConfig;
use fwdl_core::{DownloadRequest, Listener};

use super::follow::follow;
use crate::engine::Engine;

#[derive(Debug, Clone)]
pub struct GetArgs {
    pub url: String,
    pub dir: PathBuf,
    pub name: Option<String>,
    pub id: Option<String>,
    pub sha256: Option<String>,
}

pub async fn run_get(cfg: &EngineConfig, args: GetArgs) -> Result<()> {
    let engine = Engine::open(cfg).await?;
    engine.watch_network();

    let mut request = DownloadRequest::new(args.url);
    request.id = args.id;
    request.file_name = args.name;
    request.expected_sha256 = args.sha256;

    let (listener, rx) = Listener::channel();
    let id = engine
        .coordinator
        .start(request, &args.dir, listener)
        .await?;
    println!("Started {id}");
    follow(&engine, &[id], rx).await
}
