//! Composition root: builds the store, transport, connectivity watcher and
//! coordinator from the loaded configuration.

use std::sync::Arc;

use anyhow::Result;
use fwdl_core::config::EngineConfig;
use fwdl_core::{
    ConnectivityWatcher, CurlTransport, DownloadCoordinator, ProgressDb, TaskContext,
};

pub struct Engine {
    pub coordinator: Arc<DownloadCoordinator>,
    pub store: Arc<ProgressDb>,
    watcher: Arc<ConnectivityWatcher>,
}

impl Engine {
    /// Opens the default database. The watcher is created but not started.
    pub async fn open(cfg: &EngineConfig) -> Result<Self> {
        let store = Arc::new(ProgressDb::open_default().await?);
        // Assume online until the first probe says otherwise.
        let watcher =
            ConnectivityWatcher::with_probe(Arc::new(cfg.tcp_probe()), cfg.probe_interval(), true);
        let ctx = TaskContext {
            transport: Arc::new(CurlTransport::new(cfg.curl_options())),
            store: store.clone(),
            network: watcher.status(),
            config: cfg.task_config(),
        };
        let coordinator = DownloadCoordinator::new(ctx);
        Ok(Self {
            coordinator,
            store,
            watcher,
        })
    }

    /// Starts probing and routes connectivity edges to the tasks.
    pub fn watch_network(&self) {
        self.watcher.start();
        self.coordinator.attach_connectivity(&self.watcher);
    }

    /// Stops probing and drains pending store writes.
    pub async fn shutdown(&self) {
        self.watcher.stop();
        self.coordinator.release_all().await;
    }
}
