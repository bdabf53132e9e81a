//! Beatmirror Dispatch
//!
//! The worker side of the download protocol. A [`Dispatcher`] listens for
//! jobs written by the public process, hands each one to a
//! [`DownloadHandler`] and writes the reply back for the waiting
//! `RequestBridge`.

mod dispatcher;
mod handler;

pub use dispatcher::Dispatcher;
pub use handler::DownloadHandler;

/// Error type for the dispatch loop.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
  /// The shared store failed.
  #[error("store error: {0}")]
  Store(#[from] beatmirror_kv::Error),

  /// A result could not be encoded.
  #[error("encode error: {0}")]
  Encode(#[from] serde_json::Error),
}
