//! Beatmirror Pinner
//!
//! Promotes a cached archive into the content-addressed storage cluster and
//! deletes the local copy once the cluster holds it. Pinning failures are
//! never errors: the caller gets [`PinOutcome::NotPinned`] and the file stays
//! in the cache so raw bytes can still be served.

mod cluster;

pub use cluster::{ClusterPinner, PinnerConfig};

use std::path::Path;

use async_trait::async_trait;
pub use beatmirror_types::PinOutcome;

/// Publishes a local file into content-addressed storage.
#[async_trait]
pub trait Pinner: Send + Sync {
  /// Pin the file at `path` under `name`.
  ///
  /// On [`PinOutcome::Pinned`] the local file has been deleted.
  async fn pin(&self, path: &Path, name: &str) -> PinOutcome;
}

/// Reasons a pin attempt fails. Logged, never returned to callers.
#[derive(Debug, thiserror::Error)]
pub(crate) enum PinError {
  #[error("{0} is not configured")]
  MissingCredential(&'static str),

  #[error("failed to run pinning agent: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("pinning agent exited with {status}: {stderr}")]
  AgentFailed { status: String, stderr: String },

  #[error("pinning agent printed no content hash")]
  EmptyHash,
}
