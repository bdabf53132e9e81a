//! Beatmirror Cache
//!
//! Local staging area for downloaded archives. Each `(archive id, variant)`
//! pair maps to one file under the cache directory; the file existing is the
//! only cache-hit signal. Files are written to a temporary name and renamed
//! into place on commit, so a crash mid-download never leaves a file that
//! looks complete.
//!
//! The store also forwards download bookkeeping to a [`Ledger`].

mod fs;

pub use fs::{CacheWriter, LocalCacheStore};

use std::path::PathBuf;
use std::pin::Pin;

use beatmirror_types::ArchiveId;
use bytes::Bytes;
use futures::Stream;

pub use beatmirror_store::{CacheEntry, Ledger};

/// A boxed stream of bytes for cached archive data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Error type for cache operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// No cached file for this archive and variant.
  #[error("archive {archive_id} (large variant: {include_large_variant}) is not cached")]
  NotFound {
    archive_id: ArchiveId,
    include_large_variant: bool,
  },

  /// A committed file is already in place and is never overwritten.
  #[error("cache file already exists: {}", .0.display())]
  AlreadyExists(PathBuf),

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The ledger could not be updated.
  #[error("ledger error: {0}")]
  Ledger(#[from] beatmirror_store::Error),
}
