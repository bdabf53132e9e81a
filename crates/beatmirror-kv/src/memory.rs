use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::warn;

use crate::{Error, Message, SharedStore, Subscription, glob_match, keyspace_channel};

const EVENT_BUFFER: usize = 1024;

#[derive(Debug)]
struct Entry {
  value: String,
  expires_at: Option<Instant>,
}

impl Entry {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.is_none_or(|at| at > now)
  }
}

/// In-memory shared store.
///
/// Emits keyspace notifications (`set` / `del`) for every write, the way a
/// Redis server with `notify-keyspace-events K$g` does. Clones of an
/// `Arc<InMemoryStore>` stand in for separate processes in tests.
#[derive(Debug)]
pub struct InMemoryStore {
  data: Mutex<HashMap<String, Entry>>,
  events: broadcast::Sender<Message>,
  db: i64,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::with_database(0)
  }

  pub fn with_database(db: i64) -> Self {
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    Self {
      data: Mutex::new(HashMap::new()),
      events,
      db,
    }
  }

  /// Number of live keys.
  pub fn len(&self) -> usize {
    let now = Instant::now();
    let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
    data.values().filter(|e| e.is_live(now)).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn notify_key(&self, key: &str, event: &str) {
    // No receivers is fine.
    let _ = self.events.send(Message {
      channel: keyspace_channel(self.db, key),
      payload: event.to_string(),
    });
  }

  fn filtered<F>(&self, matches: F) -> Subscription
  where
    F: Fn(&str) -> bool + Send + 'static,
  {
    let receiver = self.events.subscribe();
    Box::pin(stream::unfold(
      (receiver, matches),
      |(mut receiver, matches)| async move {
        loop {
          match receiver.recv().await {
            Ok(message) if matches(&message.channel) => {
              return Some((message, (receiver, matches)));
            }
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
              warn!(skipped, "subscription lagged, messages dropped");
            }
            Err(RecvError::Closed) => return None,
          }
        }
      },
    ))
  }
}

impl Default for InMemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl SharedStore for InMemoryStore {
  fn database(&self) -> i64 {
    self.db
  }

  async fn get(&self, key: &str) -> Result<Option<String>, Error> {
    let now = Instant::now();
    let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
    match data.get(key) {
      Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
      Some(_) => {
        data.remove(key);
        Ok(None)
      }
      None => Ok(None),
    }
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
    {
      let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
      data.insert(
        key.to_string(),
        Entry {
          value: value.to_string(),
          expires_at: None,
        },
      );
    }
    self.notify_key(key, "set");
    Ok(())
  }

  async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
    let now = Instant::now();
    {
      let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
      if data.get(key).is_some_and(|e| e.is_live(now)) {
        return Ok(false);
      }
      data.insert(
        key.to_string(),
        Entry {
          value: value.to_string(),
          expires_at: Some(now + ttl),
        },
      );
    }
    self.notify_key(key, "set");
    Ok(true)
  }

  async fn set_if_present(&self, key: &str, value: &str) -> Result<bool, Error> {
    let now = Instant::now();
    {
      let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
      match data.get_mut(key) {
        Some(entry) if entry.is_live(now) => {
          entry.value = value.to_string();
          entry.expires_at = None;
        }
        _ => return Ok(false),
      }
    }
    self.notify_key(key, "set");
    Ok(true)
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    let removed = {
      let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
      data.remove(key).is_some()
    };
    if removed {
      self.notify_key(key, "del");
    }
    Ok(())
  }

  async fn publish(&self, channel: &str, message: &str) -> Result<(), Error> {
    let _ = self.events.send(Message {
      channel: channel.to_string(),
      payload: message.to_string(),
    });
    Ok(())
  }

  async fn subscribe(&self, channel: &str) -> Result<Subscription, Error> {
    let channel = channel.to_string();
    Ok(self.filtered(move |c| c == channel))
  }

  async fn psubscribe(&self, pattern: &str) -> Result<Subscription, Error> {
    let pattern = pattern.to_string();
    Ok(self.filtered(move |c| glob_match(&pattern, c)))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;

  #[tokio::test]
  async fn test_in_memory_store() {
    let store = InMemoryStore::new();

    assert_eq!(store.get("key").await.unwrap(), None);

    store.set("key", "value").await.unwrap();
    assert_eq!(store.get("key").await.unwrap(), Some("value".to_string()));

    store.set("key", "updated").await.unwrap();
    assert_eq!(store.get("key").await.unwrap(), Some("updated".to_string()));

    store.delete("key").await.unwrap();
    assert_eq!(store.get("key").await.unwrap(), None);

    // Deleting again is fine
    store.delete("key").await.unwrap();
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_if_absent_expires() {
    let store = InMemoryStore::new();
    let ttl = Duration::from_secs(5);

    assert!(store.set_if_absent("lock", "a", ttl).await.unwrap());
    assert!(!store.set_if_absent("lock", "b", ttl).await.unwrap());
    assert_eq!(store.get("lock").await.unwrap(), Some("a".to_string()));

    tokio::time::advance(Duration::from_secs(6)).await;

    assert_eq!(store.get("lock").await.unwrap(), None);
    assert!(store.set_if_absent("lock", "b", ttl).await.unwrap());
  }

  #[tokio::test(start_paused = true)]
  async fn test_set_if_present_only_replaces_live_keys() {
    let store = InMemoryStore::new();

    assert!(!store.set_if_present("job", "reply").await.unwrap());
    assert_eq!(store.get("job").await.unwrap(), None);

    store.set("job", "request").await.unwrap();
    assert!(store.set_if_present("job", "reply").await.unwrap());
    assert_eq!(store.get("job").await.unwrap(), Some("reply".to_string()));

    assert!(store.set_if_absent("lock", "a", Duration::from_secs(1)).await.unwrap());
    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(!store.set_if_present("lock", "b").await.unwrap());
  }

  #[tokio::test]
  async fn test_publish_reaches_channel_subscribers_only() {
    let store = InMemoryStore::new();
    let mut jobs = store.subscribe("jobs").await.unwrap();

    store.publish("other", "ignored").await.unwrap();
    store.publish("jobs", "hello").await.unwrap();

    let message = jobs.next().await.unwrap();
    assert_eq!(message.channel, "jobs");
    assert_eq!(message.payload, "hello");
  }

  #[tokio::test]
  async fn test_keyspace_notifications() {
    let store = InMemoryStore::with_database(2);
    let mut events = store.psubscribe("__keyspace@2__:bm:*").await.unwrap();

    store.set("unrelated", "x").await.unwrap();
    store.set("bm:a", "1").await.unwrap();
    store.delete("bm:a").await.unwrap();

    let set = events.next().await.unwrap();
    assert_eq!(set.channel, "__keyspace@2__:bm:a");
    assert_eq!(set.payload, "set");

    let del = events.next().await.unwrap();
    assert_eq!(del.payload, "del");
  }
}
