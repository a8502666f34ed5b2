//! CLI for the fwdl downloader.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use fwdl_core::config;

use commands::{run_checksum, run_get, run_purge, run_remove, run_resume, run_status, GetArgs};

/// Top-level CLI for fwdl.
#[derive(Debug, Parser)]
#[command(name = "fwdl")]
#[command(about = "fwdl: resumable downloads that survive flaky networks", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download a URL, following progress until it finishes. Ctrl-C pauses.
    Get {
        /// Direct HTTP/HTTPS URL to download.
        url: String,
        /// Directory to save into (default: current directory).
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
        /// File name to save as (default: from the URL or the server).
        #[arg(long)]
        name: Option<String>,
        /// Download id (default: derived from URL and directory).
        #[arg(long)]
        id: Option<String>,
        /// Expected SHA-256 of the finished file (hex).
        #[arg(long, value_name = "HEX")]
        sha256: Option<String>,
    },

    /// Show every known download.
    Status,

    /// Resume unfinished downloads from a previous run (one id, or all).
    Resume {
        /// Download id; all unfinished downloads if omitted.
        id: Option<String>,
    },

    /// Forget a download, optionally deleting its files.
    Remove {
        /// Download id.
        id: String,
        /// Also delete the partial and finished files.
        #[arg(long)]
        delete_files: bool,
    },

    /// Delete finished records older than the given age.
    Purge {
        #[arg(long, default_value = "30", value_name = "DAYS")]
        older_than_days: u64,
    },

    /// Compute SHA-256 of a file (e.g. after download).
    Checksum {
        /// Path to the file.
        path: PathBuf,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                url,
                dir,
                name,
                id,
                sha256,
            } => {
                let dir = match dir {
                    Some(dir) => dir,
                    None => std::env::current_dir()?,
                };
                let args = GetArgs {
                    url,
                    dir,
                    name,
                    id,
                    sha256,
                };
                run_get(&cfg, args).await?
            }
            CliCommand::Status => run_status(&cfg).await?,
            CliCommand::Resume { id } => run_resume(&cfg, id.as_deref()).await?,
            CliCommand::Remove { id, delete_files } => run_remove(&cfg, &id, delete_files).await?,
            CliCommand::Purge { older_than_days } => run_purge(&cfg, older_than_days).await?,
            CliCommand::Checksum { path } => run_checksum(&path).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
