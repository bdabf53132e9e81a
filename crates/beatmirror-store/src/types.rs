use beatmirror_types::ArchiveId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A ledger row as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CacheEntry {
  #[sqlx(try_from = "i64")]
  pub archive_id: ArchiveId,
  pub download_count: i64,
  pub last_download_at: DateTime<Utc>,
}

/// Row shape of the crawler-maintained `beatmap_sets` table.
#[derive(Debug, Clone, FromRow)]
pub(crate) struct ArchiveRow {
  pub set_id: i64,
  pub artist: String,
  pub title: String,
  pub disabled: bool,
}
