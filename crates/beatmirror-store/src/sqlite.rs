use async_trait::async_trait;
use beatmirror_types::{ArchiveId, ArchiveMeta};
use chrono::Utc;
use sqlx::SqlitePool;

use crate::types::ArchiveRow;
use crate::{CacheEntry, Error, Ledger, MetadataStore};

/// SQLite-based store implementation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Run database migrations for the tables this crate owns.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("./migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl MetadataStore for SqliteStore {
  async fn find_archive(&self, archive_id: ArchiveId) -> Result<Option<ArchiveMeta>, Error> {
    let row: Option<ArchiveRow> = sqlx::query_as(
      r#"
            SELECT set_id, artist, title, disabled
            FROM beatmap_sets
            WHERE set_id = ?
            "#,
    )
    .bind(archive_id.get())
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(|row| ArchiveMeta {
      archive_id: ArchiveId(row.set_id),
      artist: row.artist,
      title: row.title,
      disabled: row.disabled,
    }))
  }
}

#[async_trait]
impl Ledger for SqliteStore {
  async fn record_download(&self, archive_id: ArchiveId) -> Result<CacheEntry, Error> {
    let entry = sqlx::query_as(
      r#"
            INSERT INTO cache_ledger (archive_id, download_count, last_download_at)
            VALUES (?, 1, ?)
            ON CONFLICT (archive_id) DO UPDATE
            SET download_count = download_count + 1,
                last_download_at = MAX(last_download_at, excluded.last_download_at)
            RETURNING archive_id, download_count, last_download_at
            "#,
    )
    .bind(archive_id.get())
    .bind(Utc::now())
    .fetch_one(&self.pool)
    .await?;

    Ok(entry)
  }

  async fn ledger_entry(&self, archive_id: ArchiveId) -> Result<Option<CacheEntry>, Error> {
    let entry = sqlx::query_as(
      r#"
            SELECT archive_id, download_count, last_download_at
            FROM cache_ledger
            WHERE archive_id = ?
            "#,
    )
    .bind(archive_id.get())
    .fetch_optional(&self.pool)
    .await?;

    Ok(entry)
  }
}
