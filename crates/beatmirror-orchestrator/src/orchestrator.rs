//! The download orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use beatmirror_cache::{ByteStream, LocalCacheStore};
use beatmirror_kv::{KeyLock, LockConfig, SharedStore};
use beatmirror_limiter::RateLimiter;
use beatmirror_pinner::Pinner;
use beatmirror_store::MetadataStore;
use beatmirror_types::{ArchiveId, DownloadChannels, DownloadResult, PinOutcome};
use beatmirror_upstream::Upstream;
use futures::StreamExt;
use tracing::{debug, info, instrument, warn};

use crate::error::DownloadError;
use crate::flight::FlightMap;

/// A completed `download_map` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedArchive {
  pub archive_id: ArchiveId,
  pub include_large_variant: bool,
  /// `"{id} {artist} - {title}.osz"`.
  pub file_name: String,
  /// Where the archive was cached. After a successful pin the file is gone.
  pub cache_path: PathBuf,
  pub pin: PinOutcome,
}

impl DownloadedArchive {
  /// The reply for the job that asked for this archive.
  pub fn into_result(self, job_id: impl Into<String>) -> DownloadResult {
    DownloadResult::new(job_id, self.file_name, &self.pin)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FlightKey {
  archive_id: ArchiveId,
  include_large_variant: bool,
}

#[derive(Debug, Clone)]
struct FlightOutcome {
  cache_path: PathBuf,
  pin: PinOutcome,
}

struct DistributedLock {
  store: Arc<dyn SharedStore>,
  channels: DownloadChannels,
  config: LockConfig,
}

/// Coordinates metadata lookup, caching, rate limiting, upstream fetches,
/// pinning and ledger updates for archive downloads.
pub struct DownloadOrchestrator {
  upstream: Arc<dyn Upstream>,
  metadata: Arc<dyn MetadataStore>,
  cache: Arc<LocalCacheStore>,
  limiter: Arc<RateLimiter>,
  pinner: Arc<dyn Pinner>,
  flights: FlightMap<FlightKey, Result<FlightOutcome, DownloadError>>,
  lock: Option<DistributedLock>,
}

impl DownloadOrchestrator {
  pub fn new(
    upstream: Arc<dyn Upstream>,
    metadata: Arc<dyn MetadataStore>,
    cache: Arc<LocalCacheStore>,
    limiter: Arc<RateLimiter>,
    pinner: Arc<dyn Pinner>,
  ) -> Self {
    Self {
      upstream,
      metadata,
      cache,
      limiter,
      pinner,
      flights: FlightMap::new(),
      lock: None,
    }
  }

  /// Also serialize fetch-and-pin across processes through a lock key in
  /// the shared store. Use when several workers share one cache directory.
  pub fn with_distributed_lock(
    mut self,
    store: Arc<dyn SharedStore>,
    channels: DownloadChannels,
    config: LockConfig,
  ) -> Self {
    self.lock = Some(DistributedLock {
      store,
      channels,
      config,
    });
    self
  }

  /// Produce the archive for `(archive_id, include_large_variant)`, fetching
  /// it from upstream on a cache miss, then pin it and count the download.
  ///
  /// Pin failures do not fail the call: the outcome is
  /// [`PinOutcome::NotPinned`] and the cached file stays in place.
  #[instrument(
    skip_all,
    fields(archive_id = %archive_id, include_large_variant = include_large_variant)
  )]
  pub async fn download_map(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
  ) -> Result<DownloadedArchive, DownloadError> {
    if !self.upstream.is_authenticated() {
      warn!("upstream session is not authenticated");
      return Err(DownloadError::UpstreamUnavailable {
        message: "upstream session is not authenticated".to_string(),
      });
    }

    let meta = self
      .metadata
      .find_archive(archive_id)
      .await?
      .filter(|meta| !meta.disabled)
      .ok_or(DownloadError::NotFound { archive_id })?;
    let file_name = meta.file_name();

    let key = FlightKey {
      archive_id,
      include_large_variant,
    };
    let outcome = self
      .flights
      .run(key, || {
        self.fetch_and_pin(archive_id, include_large_variant, &file_name)
      })
      .await?;

    let entry = self.cache.record_download(archive_id).await?;
    debug!(download_count = entry.download_count, "download recorded");

    Ok(DownloadedArchive {
      archive_id,
      include_large_variant,
      file_name,
      cache_path: outcome.cache_path,
      pin: outcome.pin,
    })
  }

  /// Stream an archive straight from the local cache.
  pub async fn open_cached(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
  ) -> Result<ByteStream, DownloadError> {
    match self.cache.open(archive_id, include_large_variant).await {
      Ok(stream) => Ok(stream),
      Err(beatmirror_cache::Error::NotFound { .. }) => Err(DownloadError::NotFound { archive_id }),
      Err(e) => Err(e.into()),
    }
  }

  async fn fetch_and_pin(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
    file_name: &str,
  ) -> Result<FlightOutcome, DownloadError> {
    let held = match &self.lock {
      Some(lock) => {
        let key = lock.channels.lock_key(archive_id, include_large_variant);
        Some(KeyLock::acquire(Arc::clone(&lock.store), key, &lock.config).await?)
      }
      None => None,
    };

    let result = self
      .fetch_and_pin_locked(archive_id, include_large_variant, file_name)
      .await;

    if let Some(held) = held
      && let Err(e) = held.release().await
    {
      warn!(error = %e, "failed to release download lock");
    }

    result
  }

  async fn fetch_and_pin_locked(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
    file_name: &str,
  ) -> Result<FlightOutcome, DownloadError> {
    if self.cache.exists(archive_id, include_large_variant).await {
      debug!("cache hit");
    } else {
      self.fetch_into_cache(archive_id, include_large_variant).await?;
    }

    let cache_path = self.cache.path(archive_id, include_large_variant);
    let pin = self.pinner.pin(&cache_path, file_name).await;

    Ok(FlightOutcome { cache_path, pin })
  }

  async fn fetch_into_cache(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
  ) -> Result<(), DownloadError> {
    self.limiter.acquire().await;

    let mut stream = self
      .upstream
      .fetch(archive_id, !include_large_variant)
      .await
      .map_err(|e| DownloadError::from_upstream(archive_id, e))?;

    // Dropping the writer on any error below discards the partial file.
    let mut writer = self.cache.write(archive_id, include_large_variant).await?;
    while let Some(chunk) = stream.next().await {
      let chunk = chunk.map_err(|e| DownloadError::from_upstream(archive_id, e))?;
      writer.write_all(&chunk).await?;
    }

    let bytes = writer.written();
    match writer.commit().await {
      Ok(path) => {
        info!(bytes, path = %path.display(), "archive cached");
        Ok(())
      }
      Err(beatmirror_cache::Error::AlreadyExists(path)) => {
        debug!(path = %path.display(), "archive cached concurrently, keeping existing file");
        Ok(())
      }
      Err(e) => Err(e.into()),
    }
  }
}
