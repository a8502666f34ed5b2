//! Engine configuration loaded from `~/.config/fwdl/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::connectivity::TcpProbe;
use crate::http::CurlOptions;
use crate::retry::RetryPolicy;
use crate::task::TaskConfig;

/// Retry policy parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per failure episode after the first failed attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 2000,
        }
    }
}

/// HTTP connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Abort a connection that stays below 1 KiB/s for this long.
    pub low_speed_time_secs: u64,
    pub user_agent: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 20,
            low_speed_time_secs: 60,
            user_agent: None,
        }
    }
}

/// Reachability probing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// `host:port` endpoints; the network counts as reachable if any accepts a TCP connection.
    pub probe_addrs: Vec<String>,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_addrs: vec!["1.1.1.1:443".to_string(), "8.8.8.8:53".to_string()],
            probe_interval_ms: 1000,
            probe_timeout_ms: 3000,
        }
    }
}

/// Global configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Bytes per stream-loop read.
    pub chunk_size: usize,
    /// Persist progress after this many new bytes (or one percentage point).
    pub persist_threshold_bytes: u64,
    /// Upper bound on how long a paused transfer sleeps between state checks.
    pub pause_poll_ms: u64,
    /// Delay before retrying a failed progress-store write.
    pub persist_retry_delay_ms: u64,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub connectivity: ConnectivityConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            persist_threshold_bytes: 100_000,
            pause_poll_ms: 200,
            persist_retry_delay_ms: 500,
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            connectivity: ConnectivityConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            delay: Duration::from_millis(self.retry.delay_ms),
        }
    }

    /// Per-task runtime settings.
    pub fn task_config(&self) -> TaskConfig {
        TaskConfig {
            chunk_size: self.chunk_size.max(1),
            persist_threshold_bytes: self.persist_threshold_bytes,
            pause_poll: Duration::from_millis(self.pause_poll_ms.max(1)),
            persist_retry_delay: Duration::from_millis(self.persist_retry_delay_ms),
            retry: self.retry_policy(),
        }
    }

    pub fn curl_options(&self) -> CurlOptions {
        let mut options = CurlOptions {
            connect_timeout: Duration::from_secs(self.http.connect_timeout_secs),
            low_speed_time: Duration::from_secs(self.http.low_speed_time_secs),
            ..CurlOptions::default()
        };
        if let Some(agent) = &self.http.user_agent {
            options.user_agent = Some(agent.clone());
        }
        options
    }

    /// Probe over the configured endpoints. Unparseable entries are skipped with a warning.
    pub fn tcp_probe(&self) -> TcpProbe {
        let addrs = self
            .connectivity
            .probe_addrs
            .iter()
            .filter_map(|a| match a.parse() {
                Ok(addr) => Some(addr),
                Err(_) => {
                    tracing::warn!(addr = %a, "ignoring invalid probe address");
                    None
                }
            })
            .collect();
        TcpProbe::new(
            addrs,
            Duration::from_millis(self.connectivity.probe_timeout_ms),
        )
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.connectivity.probe_interval_ms.max(1))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("fwdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data =
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
