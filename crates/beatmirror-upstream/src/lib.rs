//! Beatmirror Upstream
//!
//! The credentialed source every archive ultimately comes from. Only the
//! worker process talks to it, and only through the rate limiter.

mod http;

pub use http::{HttpUpstream, HttpUpstreamConfig};

use std::pin::Pin;

use async_trait::async_trait;
use beatmirror_types::ArchiveId;
use bytes::Bytes;
use futures::Stream;

/// A boxed stream of archive bytes from the upstream provider.
pub type UpstreamStream = Pin<Box<dyn Stream<Item = Result<Bytes, UpstreamError>> + Send>>;

/// Errors reported by the upstream provider.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
  /// The provider does not have this archive.
  #[error("archive {0} not found upstream")]
  NotFound(ArchiveId),

  /// No authenticated session.
  #[error("upstream session is not authenticated")]
  NotAuthenticated,

  /// Any other failure talking to the provider.
  #[error("upstream unavailable: {0}")]
  Unavailable(String),
}

/// Source of archive downloads.
#[async_trait]
pub trait Upstream: Send + Sync {
  /// Whether a usable session exists. Checked before any side effect.
  fn is_authenticated(&self) -> bool;

  /// Start downloading an archive. `small_variant` asks for the reduced
  /// download (no video).
  async fn fetch(
    &self,
    archive_id: ArchiveId,
    small_variant: bool,
  ) -> Result<UpstreamStream, UpstreamError>;
}
