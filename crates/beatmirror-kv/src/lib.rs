//! Beatmirror KV
//!
//! The shared store is the only channel between the public process and the
//! download worker. [`SharedStore`] covers what both sides need from it:
//! plain string keys holding the latest value, a conditional set used for
//! cross-worker locks, and pub/sub including keyspace notifications.
//!
//! [`InMemoryStore`] serves tests and single-host setups. [`RedisStore`] is
//! used when the two processes run separately.

mod lock;
mod memory;
mod pattern;
mod redis_store;

pub use lock::{KeyLock, LockConfig};
pub use memory::InMemoryStore;
pub use pattern::glob_match;
pub use redis_store::RedisStore;

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

/// A message received from a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  /// The channel the message was published on. For keyspace notifications
  /// this is `__keyspace@{db}__:{key}`.
  pub channel: String,
  pub payload: String,
}

/// A live subscription. Ends when the store goes away.
pub type Subscription = Pin<Box<dyn Stream<Item = Message> + Send>>;

/// Error type for shared store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The Redis backend reported an error.
  #[error("redis error: {0}")]
  Redis(#[from] redis::RedisError),

  /// A lock could not be taken before the wait limit.
  #[error("timed out waiting for lock '{key}'")]
  LockTimeout { key: String },
}

/// Keyspace notification channel for `key` in database `db`.
pub fn keyspace_channel(db: i64, key: &str) -> String {
  format!("__keyspace@{}__:{}", db, key)
}

/// Strip the keyspace prefix from a notification channel, returning the key.
pub fn key_from_keyspace_channel(channel: &str) -> Option<&str> {
  let rest = channel.strip_prefix("__keyspace@")?;
  let (_, key) = rest.split_once("__:")?;
  Some(key)
}

/// Key-value and pub/sub store shared between processes.
///
/// Keys only ever hold their latest value.
#[async_trait]
pub trait SharedStore: Send + Sync {
  /// Logical database index, used to build keyspace channel names.
  fn database(&self) -> i64;

  /// Get a value by key.
  async fn get(&self, key: &str) -> Result<Option<String>, Error>;

  /// Set a value, replacing any previous one.
  async fn set(&self, key: &str, value: &str) -> Result<(), Error>;

  /// Set a value only if the key is absent. The key expires after `ttl`.
  ///
  /// Returns whether the value was set.
  async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error>;

  /// Replace the value of a key only if the key exists. Any expiry is
  /// cleared, as with a plain [`SharedStore::set`].
  ///
  /// Returns whether the value was written.
  async fn set_if_present(&self, key: &str, value: &str) -> Result<bool, Error>;

  /// Delete a key. Deleting a missing key is not an error.
  async fn delete(&self, key: &str) -> Result<(), Error>;

  /// Publish a message on a channel.
  async fn publish(&self, channel: &str, message: &str) -> Result<(), Error>;

  /// Subscribe to a single channel.
  async fn subscribe(&self, channel: &str) -> Result<Subscription, Error>;

  /// Subscribe to every channel matching a glob pattern.
  async fn psubscribe(&self, pattern: &str) -> Result<Subscription, Error>;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_keyspace_channel_round_trip() {
    let channel = keyspace_channel(3, "bm:downloads:abc");
    assert_eq!(channel, "__keyspace@3__:bm:downloads:abc");
    assert_eq!(key_from_keyspace_channel(&channel), Some("bm:downloads:abc"));
    assert_eq!(key_from_keyspace_channel("bm:downloads"), None);
  }
}
