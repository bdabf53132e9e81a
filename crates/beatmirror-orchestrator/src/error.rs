//! Error types for download orchestration.

use beatmirror_types::ArchiveId;
use beatmirror_upstream::UpstreamError;
use thiserror::Error;

/// Errors returned by [`crate::DownloadOrchestrator::download_map`].
///
/// Errors are `Clone` because callers that joined the same in-flight
/// download all receive its outcome.
#[derive(Debug, Clone, Error)]
pub enum DownloadError {
  /// The archive is unknown, disabled, or missing upstream.
  #[error("archive {archive_id} not found")]
  NotFound { archive_id: ArchiveId },

  /// No authenticated upstream session, or the upstream call failed.
  #[error("upstream unavailable: {message}")]
  UpstreamUnavailable { message: String },

  /// The local cache or the database failed.
  #[error("storage error: {message}")]
  Storage { message: String },

  /// The cross-worker download lock could not be taken.
  #[error("download lock error: {message}")]
  Lock { message: String },
}

impl DownloadError {
  pub(crate) fn from_upstream(archive_id: ArchiveId, error: UpstreamError) -> Self {
    match error {
      UpstreamError::NotFound(_) => DownloadError::NotFound { archive_id },
      other => DownloadError::UpstreamUnavailable {
        message: other.to_string(),
      },
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, DownloadError::NotFound { .. })
  }
}

impl From<beatmirror_cache::Error> for DownloadError {
  fn from(error: beatmirror_cache::Error) -> Self {
    DownloadError::Storage {
      message: error.to_string(),
    }
  }
}

impl From<beatmirror_store::Error> for DownloadError {
  fn from(error: beatmirror_store::Error) -> Self {
    DownloadError::Storage {
      message: error.to_string(),
    }
  }
}

impl From<beatmirror_kv::Error> for DownloadError {
  fn from(error: beatmirror_kv::Error) -> Self {
    DownloadError::Lock {
      message: error.to_string(),
    }
  }
}
