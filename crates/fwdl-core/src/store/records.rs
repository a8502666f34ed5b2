//! `ProgressStore` queries for `ProgressDb`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::db::ProgressDb;
use super::types::{unix_timestamp, DownloadRecord, DownloadStatus};
use super::ProgressStore;

const COLUMNS: &str = "id, url, file_name, directory_path, final_path, temporary_path, \
     downloaded_bytes, total_bytes, status, retry_count, error_message, etag, \
     expected_sha256, created_at, updated_at";

fn record_from_row(row: &SqliteRow) -> DownloadRecord {
    let final_path: Option<String> = row.get("final_path");
    let directory_path: String = row.get("directory_path");
    let temporary_path: String = row.get("temporary_path");
    let downloaded: i64 = row.get("downloaded_bytes");
    let total: i64 = row.get("total_bytes");
    let status: String = row.get("status");
    let retry_count: i64 = row.get("retry_count");

    DownloadRecord {
        id: row.get("id"),
        url: row.get("url"),
        file_name: row.get("file_name"),
        directory_path: PathBuf::from(directory_path),
        final_path: final_path.map(PathBuf::from),
        temporary_path: PathBuf::from(temporary_path),
        downloaded_bytes: downloaded.max(0) as u64,
        total_bytes: total.max(0) as u64,
        status: DownloadStatus::from_str(&status),
        retry_count: retry_count.clamp(0, u32::MAX as i64) as u32,
        error_message: row.get("error_message"),
        etag: row.get("etag"),
        expected_sha256: row.get("expected_sha256"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl ProgressStore for ProgressDb {
    async fn upsert(&self, record: &DownloadRecord) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO downloads (
                id, url, file_name, directory_path, final_path, temporary_path,
                downloaded_bytes, total_bytes, status, retry_count, error_message,
                etag, expected_sha256, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                file_name = excluded.file_name,
                directory_path = excluded.directory_path,
                final_path = excluded.final_path,
                temporary_path = excluded.temporary_path,
                downloaded_bytes = excluded.downloaded_bytes,
                total_bytes = excluded.total_bytes,
                status = excluded.status,
                retry_count = excluded.retry_count,
                error_message = excluded.error_message,
                etag = excluded.etag,
                expected_sha256 = excluded.expected_sha256,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.url)
        .bind(&record.file_name)
        .bind(record.directory_path.to_string_lossy().into_owned())
        .bind(
            record
                .final_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(record.temporary_path.to_string_lossy().into_owned())
        .bind(record.downloaded_bytes as i64)
        .bind(record.total_bytes as i64)
        .bind(record.status.as_str())
        .bind(record.retry_count as i64)
        .bind(record.error_message.as_deref())
        .bind(record.etag.as_deref())
        .bind(record.expected_sha256.as_deref())
        .bind(record.created_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .with_context(|| format!("upsert download {}", record.id))?;
        Ok(())
    }

    async fn update_progress(&self, id: &str, downloaded_bytes: u64, total_bytes: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET downloaded_bytes = ?1,
                total_bytes = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(downloaded_bytes as i64)
        .bind(total_bytes as i64)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update progress of {id}"))?;
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: DownloadStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE downloads
            SET status = ?1,
                error_message = ?2,
                updated_at = ?3
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(unix_timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update status of {id}"))?;
        Ok(())
    }

    async fn update_retry_count(&self, id: &str, retry_count: u32) -> Result<()> {
        sqlx::query("UPDATE downloads SET retry_count = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(retry_count as i64)
            .bind(unix_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("update retry count of {id}"))?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM downloads WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row))
    }

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<DownloadRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {COLUMNS} FROM downloads WHERE status IN ({placeholders}) \
             ORDER BY created_at ASC, id ASC"
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM downloads ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("delete download {id}"))?;
        Ok(())
    }

    async fn purge_finished_before(&self, cutoff_unix: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM downloads
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND updated_at < ?1
            "#,
        )
        .bind(cutoff_unix)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
