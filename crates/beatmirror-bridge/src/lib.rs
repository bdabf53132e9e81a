//! Beatmirror Bridge
//!
//! The public process talks to the download worker through the shared store.
//! [`RequestBridge::request`] writes a job under a fresh key, then waits for
//! the worker to answer by publishing on the results channel or by replacing
//! the value under that key. A worker that gives up deletes the key, which
//! ends the wait early. Every outcome other than a response is `Ok(None)`.

mod bridge;

pub use bridge::{BridgeConfig, RequestBridge};

/// Error type for bridge operations. Timeouts are not errors.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
  /// The shared store failed.
  #[error("store error: {0}")]
  Store(#[from] beatmirror_kv::Error),

  /// The request payload could not be encoded.
  #[error("encode error: {0}")]
  Encode(#[from] serde_json::Error),
}
