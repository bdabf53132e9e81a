//! Beatmirror Store
//!
//! Relational access for the download subsystem:
//! - [`MetadataStore`]: read-only lookup of archive metadata maintained by
//!   the crawler
//! - [`Ledger`]: per-archive download counts, owned by this subsystem
//!
//! [`SqliteStore`] implements both over an `sqlx` connection pool.

mod sqlite;
mod types;

pub use sqlite::SqliteStore;
pub use types::CacheEntry;

use async_trait::async_trait;
use beatmirror_types::{ArchiveId, ArchiveMeta};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying the embedded migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Read access to archive metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
  /// Look up an archive. Returns `None` if it is unknown.
  async fn find_archive(&self, archive_id: ArchiveId) -> Result<Option<ArchiveMeta>, Error>;
}

/// Download bookkeeping. Never consulted for cache hit/miss decisions.
#[async_trait]
pub trait Ledger: Send + Sync {
  /// Count one download of `archive_id`, creating the row on first sight.
  ///
  /// Implementations must perform this as a single atomic upsert.
  async fn record_download(&self, archive_id: ArchiveId) -> Result<CacheEntry, Error>;

  /// Get the ledger row for an archive.
  async fn ledger_entry(&self, archive_id: ArchiveId) -> Result<Option<CacheEntry>, Error>;
}
