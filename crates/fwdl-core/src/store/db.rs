//! SQLite-backed progress database: connection, schema, timestamps.
//! Record queries live in `records`.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}?mode=rwc", out)
}

/// Handle to the download record database.
///
/// The default file lives under the XDG state directory:
/// `~/.local/state/fwdl/downloads.db`.
#[derive(Clone)]
pub struct ProgressDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl ProgressDb {
    /// Default database location.
    pub fn default_path() -> Result<PathBuf> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("fwdl")?;
        Ok(xdg_dirs.get_state_home().join("fwdl").join("downloads.db"))
    }

    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        Self::open_at(Self::default_path()?).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&path_to_sqlite_uri(path))
            .await
            .with_context(|| format!("open database {}", path.display()))?;
        let db = ProgressDb { pool };
        db.migrate().await?;
        tracing::debug!(path = %path.display(), "progress database ready");
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // One row per download; byte counters are INTEGER (i64) and cast at
        // the boundary.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                file_name TEXT NOT NULL,
                directory_path TEXT NOT NULL,
                final_path TEXT,
                temporary_path TEXT NOT NULL,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                total_bytes INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                etag TEXT,
                expected_sha256 TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS downloads_status ON downloads (status);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<ProgressDb> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let db = ProgressDb { pool };
    db.migrate().await?;
    Ok(db)
}
