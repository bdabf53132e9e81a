use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use crate::{Error, Message, SharedStore, Subscription};

/// Redis-backed shared store.
///
/// Commands share one multiplexed connection. Each subscription opens its
/// own pub/sub connection.
#[derive(Clone)]
pub struct RedisStore {
  client: redis::Client,
  conn: MultiplexedConnection,
  db: i64,
}

impl RedisStore {
  /// Connect to the server at `url` (e.g. `redis://127.0.0.1:6379/0`).
  pub async fn connect(url: &str) -> Result<Self, Error> {
    let client = redis::Client::open(url)?;
    let db = client.get_connection_info().redis.db;
    let conn = client.get_multiplexed_async_connection().await?;
    debug!(db, "connected to redis");
    Ok(Self { client, conn, db })
  }

  /// Ask the server to emit keyspace notifications for string commands and
  /// generic commands (`K$g`).
  ///
  /// Managed servers often forbid `CONFIG SET`; failure is logged and the
  /// server configuration is left as is.
  pub async fn enable_keyspace_events(&self) {
    let mut conn = self.conn.clone();
    let result: Result<(), redis::RedisError> = redis::cmd("CONFIG")
      .arg("SET")
      .arg("notify-keyspace-events")
      .arg("K$g")
      .query_async(&mut conn)
      .await;
    if let Err(e) = result {
      warn!(error = %e, "could not enable keyspace notifications");
    }
  }

  async fn pubsub(&self) -> Result<redis::aio::PubSub, Error> {
    Ok(self.client.get_async_pubsub().await?)
  }
}

fn to_message(msg: redis::Msg) -> Message {
  let payload = msg.get_payload::<String>().unwrap_or_default();
  Message {
    channel: msg.get_channel_name().to_string(),
    payload,
  }
}

#[async_trait]
impl SharedStore for RedisStore {
  fn database(&self) -> i64 {
    self.db
  }

  async fn get(&self, key: &str) -> Result<Option<String>, Error> {
    let mut conn = self.conn.clone();
    let value: Option<String> = conn.get(key).await?;
    Ok(value)
  }

  async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
    let mut conn = self.conn.clone();
    let _: () = conn.set(key, value).await?;
    Ok(())
  }

  async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, Error> {
    let mut conn = self.conn.clone();
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
    let reply: Option<String> = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .arg("NX")
      .arg("PX")
      .arg(millis)
      .query_async(&mut conn)
      .await?;
    Ok(reply.is_some())
  }

  async fn set_if_present(&self, key: &str, value: &str) -> Result<bool, Error> {
    let mut conn = self.conn.clone();
    let reply: Option<String> = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .arg("XX")
      .query_async(&mut conn)
      .await?;
    Ok(reply.is_some())
  }

  async fn delete(&self, key: &str) -> Result<(), Error> {
    let mut conn = self.conn.clone();
    let _: () = conn.del(key).await?;
    Ok(())
  }

  async fn publish(&self, channel: &str, message: &str) -> Result<(), Error> {
    let mut conn = self.conn.clone();
    let _: () = conn.publish(channel, message).await?;
    Ok(())
  }

  async fn subscribe(&self, channel: &str) -> Result<Subscription, Error> {
    let mut pubsub = self.pubsub().await?;
    pubsub.subscribe(channel).await?;
    Ok(Box::pin(pubsub.into_on_message().map(to_message)))
  }

  async fn psubscribe(&self, pattern: &str) -> Result<Subscription, Error> {
    let mut pubsub = self.pubsub().await?;
    pubsub.psubscribe(pattern).await?;
    Ok(Box::pin(pubsub.into_on_message().map(to_message)))
  }
}
