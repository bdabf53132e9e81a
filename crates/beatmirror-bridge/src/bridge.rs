use std::sync::Arc;
use std::time::Duration;

use beatmirror_kv::{SharedStore, Subscription};
use beatmirror_types::{
  ArchiveId, Correlated, DispatchMode, DownloadChannels, DownloadJob, DownloadResult,
  results_channel,
};
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::MissedTickBehavior;
use tracing::{debug, instrument, trace, warn};

use crate::BridgeError;

/// Configuration for a [`RequestBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
  pub channels: DownloadChannels,
  /// Whether jobs are also published on the jobs channel.
  pub mode: DispatchMode,
  /// How long to wait for a response before giving up.
  pub timeout: Duration,
  /// How often the job key is re-read while waiting.
  pub poll_interval: Duration,
}

impl Default for BridgeConfig {
  fn default() -> Self {
    Self {
      channels: DownloadChannels::default(),
      mode: DispatchMode::default(),
      timeout: Duration::from_secs(60),
      poll_interval: Duration::from_millis(50),
    }
  }
}

/// Sends requests to the worker and waits for their replies.
pub struct RequestBridge {
  store: Arc<dyn SharedStore>,
  config: BridgeConfig,
}

impl RequestBridge {
  pub fn new(store: Arc<dyn SharedStore>, config: BridgeConfig) -> Self {
    Self { store, config }
  }

  pub fn config(&self) -> &BridgeConfig {
    &self.config
  }

  /// Ask the worker for an archive. `None` means no result: timeout, worker
  /// failure, or an unreadable reply.
  pub async fn download_map(
    &self,
    archive_id: ArchiveId,
    include_large_variant: bool,
  ) -> Result<Option<DownloadResult>, BridgeError> {
    let channel = self.config.channels.jobs();
    self
      .request(&channel, |job_id| DownloadJob {
        job_id: job_id.to_string(),
        archive_id,
        include_large_variant,
      })
      .await
  }

  /// Send a request on `channel` and wait for the reply.
  ///
  /// `make_payload` receives the generated job id and must embed it in the
  /// payload; the reply is matched on it.
  #[instrument(skip(self, make_payload))]
  pub async fn request<P, R, F>(&self, channel: &str, make_payload: F) -> Result<Option<R>, BridgeError>
  where
    P: Serialize,
    R: DeserializeOwned + Correlated,
    F: FnOnce(&str) -> P,
  {
    let job_id = uuid::Uuid::new_v4().to_string();
    let key = format!("{}:{}", channel, job_id);
    let payload = serde_json::to_string(&make_payload(&job_id))?;

    // Subscribe before writing so a fast reply cannot be missed.
    let mut results = self.store.subscribe(&results_channel(channel)).await?;
    self.store.set(&key, &payload).await?;
    if self.config.mode == DispatchMode::Publish {
      self.store.publish(channel, &payload).await?;
    }
    debug!(job_id = %job_id, "request sent");

    let response = self.await_response(&key, &job_id, &payload, &mut results).await;

    if let Err(e) = self.store.delete(&key).await {
      warn!(key = %key, error = %e, "failed to delete request key");
    }
    response
  }

  async fn await_response<R>(
    &self,
    key: &str,
    job_id: &str,
    written: &str,
    results: &mut Subscription,
  ) -> Result<Option<R>, BridgeError>
  where
    R: DeserializeOwned + Correlated,
  {
    let deadline = tokio::time::sleep(self.config.timeout);
    tokio::pin!(deadline);

    let mut poll = tokio::time::interval(self.config.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut subscribed = true;

    loop {
      tokio::select! {
        _ = &mut deadline => {
          debug!(job_id, "request timed out");
          return Ok(None);
        }

        message = results.next(), if subscribed => match message {
          Some(message) => match serde_json::from_str::<R>(&message.payload) {
            Ok(response) if response.job_id() == job_id => {
              debug!(job_id, "response received on results channel");
              return Ok(Some(response));
            }
            Ok(_) => trace!(job_id, "ignoring result for another request"),
            Err(e) => trace!(error = %e, "ignoring unreadable result message"),
          },
          None => {
            warn!("results subscription ended, polling the request key only");
            subscribed = false;
          }
        },

        _ = poll.tick() => match self.store.get(key).await? {
          Some(value) if value == written => {}
          Some(value) if !value.trim().is_empty() => {
            return match serde_json::from_str::<R>(&value) {
              Ok(response) => {
                debug!(job_id, "response received on request key");
                Ok(Some(response))
              }
              Err(e) => {
                warn!(job_id, error = %e, "unreadable response under request key");
                Ok(None)
              }
            };
          }
          _ => {
            debug!(job_id, "request key removed by worker");
            return Ok(None);
          }
        },
      }
    }
  }
}
