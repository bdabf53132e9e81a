//! Cross-process mutual exclusion on top of [`SharedStore::set_if_absent`].

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{Error, SharedStore};

/// Timing for [`KeyLock::acquire`].
#[derive(Debug, Clone)]
pub struct LockConfig {
  /// How long the lock key lives if its holder never releases it.
  pub ttl: Duration,
  /// Delay between attempts while the lock is held elsewhere.
  pub poll_interval: Duration,
  /// Give up after waiting this long.
  pub wait_timeout: Duration,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(300),
      poll_interval: Duration::from_millis(100),
      wait_timeout: Duration::from_secs(300),
    }
  }
}

/// A held lock key. Release it explicitly; otherwise it expires after the TTL.
pub struct KeyLock {
  store: Arc<dyn SharedStore>,
  key: String,
  token: String,
}

impl KeyLock {
  /// Wait until `key` can be claimed.
  pub async fn acquire(
    store: Arc<dyn SharedStore>,
    key: impl Into<String>,
    config: &LockConfig,
  ) -> Result<Self, Error> {
    let key = key.into();
    let token = uuid::Uuid::new_v4().to_string();
    let deadline = Instant::now() + config.wait_timeout;

    loop {
      if store.set_if_absent(&key, &token, config.ttl).await? {
        debug!(key = %key, "lock acquired");
        return Ok(Self { store, key, token });
      }
      if Instant::now() >= deadline {
        return Err(Error::LockTimeout { key });
      }
      tokio::time::sleep(config.poll_interval).await;
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  /// Delete the lock key if this holder still owns it.
  pub async fn release(self) -> Result<(), Error> {
    match self.store.get(&self.key).await? {
      Some(current) if current == self.token => self.store.delete(&self.key).await,
      _ => {
        warn!(key = %self.key, "lock expired before release");
        Ok(())
      }
    }
  }
}
