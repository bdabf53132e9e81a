use std::path::{Path, PathBuf};
use std::sync::Arc;

use beatmirror_store::{CacheEntry, Ledger};
use beatmirror_types::ArchiveId;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{ByteStream, Error};

/// Filesystem-based archive cache.
///
/// Layout:
/// ```text
/// {root}/
/// ├── 0000007b            archive 123, full variant
/// ├── 0000007b_novid      archive 123, reduced variant
/// └── .0000007c.<uuid>.part   in-progress download
/// ```
pub struct LocalCacheStore {
  root: PathBuf,
  ledger: Arc<dyn Ledger>,
}

impl LocalCacheStore {
  /// Create a cache rooted at `root`, recording downloads in `ledger`.
  pub fn new(root: impl Into<PathBuf>, ledger: Arc<dyn Ledger>) -> Self {
    Self {
      root: root.into(),
      ledger,
    }
  }

  /// Get the root directory of the cache.
  pub fn root(&self) -> &Path {
    &self.root
  }

  /// File name for a cached archive: 8 hex digits, `_novid` for the reduced
  /// variant.
  pub fn file_name(archive_id: ArchiveId, include_large_variant: bool) -> String {
    let suffix = if include_large_variant { "" } else { "_novid" };
    format!("{:08x}{}", archive_id.get(), suffix)
  }

  /// Path the archive lives at once committed.
  pub fn path(&self, archive_id: ArchiveId, include_large_variant: bool) -> PathBuf {
    self
      .root
      .join(Self::file_name(archive_id, include_large_variant))
  }

  /// Whether a committed file exists for this archive and variant.
  pub async fn exists(&self, archive_id: ArchiveId, include_large_variant: bool) -> bool {
    fs::try_exists(self.path(archive_id, include_large_variant))
      .await
      .unwrap_or(false)
  }

  /// Open a cached archive as a byte stream.
  pub async fn open(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
  ) -> Result<ByteStream, Error> {
    let path = self.path(archive_id, include_large_variant);
    let file = File::open(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        Error::NotFound {
          archive_id,
          include_large_variant,
        }
      } else {
        Error::Io(e)
      }
    })?;
    Ok(Box::pin(ReaderStream::new(file)))
  }

  /// Start writing a cache file. Nothing is visible until
  /// [`CacheWriter::commit`].
  pub async fn write(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
  ) -> Result<CacheWriter, Error> {
    fs::create_dir_all(&self.root).await?;

    let name = Self::file_name(archive_id, include_large_variant);
    let temp_path = self
      .root
      .join(format!(".{}.{}.part", name, uuid::Uuid::new_v4()));
    let file = File::create(&temp_path).await?;

    Ok(CacheWriter {
      file: Some(file),
      temp_path,
      final_path: self.root.join(name),
      written: 0,
    })
  }

  /// Count a download of `archive_id` in the ledger.
  pub async fn record_download(&self, archive_id: ArchiveId) -> Result<CacheEntry, Error> {
    Ok(self.ledger.record_download(archive_id).await?)
  }

  /// Get the ledger row for `archive_id`.
  pub async fn ledger_entry(&self, archive_id: ArchiveId) -> Result<Option<CacheEntry>, Error> {
    Ok(self.ledger.ledger_entry(archive_id).await?)
  }
}

/// An in-progress cache file.
///
/// Dropping the writer without committing removes the temporary file.
pub struct CacheWriter {
  file: Option<File>,
  temp_path: PathBuf,
  final_path: PathBuf,
  written: u64,
}

impl CacheWriter {
  /// Append a chunk.
  pub async fn write_all(&mut self, chunk: &[u8]) -> Result<(), Error> {
    let file = self
      .file
      .as_mut()
      .ok_or_else(|| std::io::Error::other("cache writer already closed"))?;
    file.write_all(chunk).await?;
    self.written += chunk.len() as u64;
    Ok(())
  }

  /// Bytes written so far.
  pub fn written(&self) -> u64 {
    self.written
  }

  /// Flush to disk and move the file into place.
  ///
  /// Fails with [`Error::AlreadyExists`] if a committed file is already
  /// there; the existing file is left untouched.
  pub async fn commit(mut self) -> Result<PathBuf, Error> {
    if let Some(mut file) = self.file.take() {
      file.flush().await?;
      file.sync_all().await?;
    }

    // Linking fails instead of replacing an existing file.
    if let Err(e) = fs::hard_link(&self.temp_path, &self.final_path).await {
      if e.kind() == std::io::ErrorKind::AlreadyExists {
        return Err(Error::AlreadyExists(self.final_path.clone()));
      }
      return Err(Error::Io(e));
    }
    fs::remove_file(&self.temp_path).await?;
    debug!(path = %self.final_path.display(), bytes = self.written, "cache file committed");

    // Nothing left for Drop to clean up.
    self.temp_path = PathBuf::new();
    Ok(self.final_path.clone())
  }
}

impl Drop for CacheWriter {
  fn drop(&mut self) {
    if self.temp_path.as_os_str().is_empty() {
      return;
    }
    drop(self.file.take());
    if let Err(e) = std::fs::remove_file(&self.temp_path)
      && e.kind() != std::io::ErrorKind::NotFound
    {
      warn!(path = %self.temp_path.display(), error = %e, "failed to remove partial cache file");
    }
  }
}
