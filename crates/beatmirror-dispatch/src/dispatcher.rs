//! Job loop with cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beatmirror_kv::{Message, SharedStore, Subscription, key_from_keyspace_channel, keyspace_channel};
use beatmirror_types::{DispatchMode, DownloadChannels, DownloadJob};
use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{DispatchError, DownloadHandler};

const RESUBSCRIBE_BACKOFF_MIN: Duration = Duration::from_secs(1);
const RESUBSCRIBE_BACKOFF_MAX: Duration = Duration::from_secs(30);

/// How long a reply's own keyspace notification is waited for.
const ANSWERED_TTL: Duration = Duration::from_secs(300);

/// Receives download jobs from the shared store and answers them.
///
/// # Usage
///
/// ```ignore
/// let dispatcher = Dispatcher::new(store, channels, DispatchMode::Publish, orchestrator);
///
/// let cancel = CancellationToken::new();
/// dispatcher.run(cancel).await?;
/// ```
pub struct Dispatcher {
  store: Arc<dyn SharedStore>,
  channels: DownloadChannels,
  mode: DispatchMode,
  handler: Arc<dyn DownloadHandler>,
  answered: AnsweredJobs,
}

impl Dispatcher {
  pub fn new(
    store: Arc<dyn SharedStore>,
    channels: DownloadChannels,
    mode: DispatchMode,
    handler: Arc<dyn DownloadHandler>,
  ) -> Self {
    Self {
      store,
      channels,
      mode,
      handler,
      answered: AnsweredJobs::new(ANSWERED_TTL),
    }
  }

  async fn subscribe(&self) -> Result<Subscription, DispatchError> {
    let subscription = match self.mode {
      DispatchMode::Publish => self.store.subscribe(&self.channels.jobs()).await?,
      DispatchMode::Keyspace => {
        let pattern = keyspace_channel(self.store.database(), &self.channels.job_key_pattern());
        self.store.psubscribe(&pattern).await?
      }
    };
    Ok(subscription)
  }

  /// Process jobs one at a time until `cancel` fires.
  ///
  /// Only the initial subscription failing is an error. A subscription that
  /// ends later (the store connection dropped) is re-established with
  /// exponential backoff; per-job failures are logged.
  pub async fn run(mut self, cancel: CancellationToken) -> Result<(), DispatchError> {
    let mut subscription = self.subscribe().await?;
    let mut backoff = RESUBSCRIBE_BACKOFF_MIN;

    info!(
      mode = %self.mode,
      channel = %self.channels.jobs(),
      "starting download dispatcher"
    );

    loop {
      tokio::select! {
        _ = cancel.cancelled() => {
          info!("download dispatcher cancelled");
          break;
        }
        message = subscription.next() => {
          match message {
            Some(message) => {
              backoff = RESUBSCRIBE_BACKOFF_MIN;
              self.dispatch(message).await;
            }
            None => {
              warn!("job subscription ended, resubscribing");
              match self.resubscribe(&cancel, &mut backoff).await {
                Some(restored) => subscription = restored,
                None => {
                  info!("download dispatcher cancelled");
                  break;
                }
              }
            }
          }
        }
      }
    }

    Ok(())
  }

  /// Retry subscribing until it works or `cancel` fires.
  async fn resubscribe(
    &self,
    cancel: &CancellationToken,
    backoff: &mut Duration,
  ) -> Option<Subscription> {
    loop {
      tokio::select! {
        _ = cancel.cancelled() => return None,
        _ = tokio::time::sleep(*backoff) => {}
      }

      let attempt = self.subscribe().await;
      *backoff = (*backoff * 2).min(RESUBSCRIBE_BACKOFF_MAX);
      match attempt {
        Ok(subscription) => {
          info!("job subscription restored");
          return Some(subscription);
        }
        Err(e) => warn!(error = %e, retry_in = ?*backoff, "failed to resubscribe"),
      }
    }
  }

  async fn dispatch(&mut self, message: Message) {
    let payload = match self.mode {
      DispatchMode::Publish => message.payload,
      DispatchMode::Keyspace => match self.read_notified_job(&message).await {
        Some(payload) => payload,
        None => return,
      },
    };

    let job = match serde_json::from_str::<DownloadJob>(&payload) {
      Ok(job) => job,
      Err(e) => {
        warn!(error = %e, "dropping malformed job");
        return;
      }
    };

    if let Err(e) = self.process(job).await {
      error!(error = %e, "failed to deliver job outcome");
    }
  }

  /// Read the job behind a keyspace notification, skipping events that are
  /// not new jobs.
  async fn read_notified_job(&mut self, message: &Message) -> Option<String> {
    if message.payload != "set" {
      return None;
    }
    let key = key_from_keyspace_channel(&message.channel)?;
    let job_id = self.channels.job_id_from_key(key)?;
    if self.answered.take(job_id) {
      trace!(job_id, "ignoring own reply");
      return None;
    }

    match self.store.get(key).await {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "failed to read job");
        None
      }
    }
  }

  async fn process(&mut self, job: DownloadJob) -> Result<(), DispatchError> {
    let key = self.channels.job_key(&job.job_id);

    // A published job whose key is gone has no one waiting for it.
    if self.mode == DispatchMode::Publish && self.store.get(&key).await?.is_none() {
      debug!(job_id = %job.job_id, "requester already gone, skipping job");
      return Ok(());
    }

    debug!(
      job_id = %job.job_id,
      archive_id = %job.archive_id,
      include_large_variant = job.include_large_variant,
      "handling download job"
    );

    match self.handler.handle(&job).await {
      Ok(result) => {
        let encoded = serde_json::to_string(&result)?;

        // The requester deletes the key when it stops waiting; never
        // re-create it.
        if !self.store.set_if_present(&key, &encoded).await? {
          info!(job_id = %job.job_id, "requester gave up before the job finished, dropping result");
          return Ok(());
        }
        // Jobs are handled one at a time, so our own notification cannot be
        // read before this.
        if self.mode == DispatchMode::Keyspace {
          self.answered.insert(job.job_id.clone());
        }

        self.store.publish(&self.channels.results(), &encoded).await?;
        info!(
          job_id = %job.job_id,
          file_name = %result.file_name,
          pinned = result.pin().is_pinned(),
          "download job completed"
        );
      }
      Err(e) => {
        error!(job_id = %job.job_id, error = %e, "download job failed");
        // A missing key tells the waiting caller there will be no result.
        self.store.delete(&key).await?;
      }
    }

    Ok(())
  }
}

/// Job ids whose reply this worker wrote, so the keyspace `set` it causes
/// can be skipped. Entries whose notification never arrives age out.
struct AnsweredJobs {
  entries: HashMap<String, Instant>,
  ttl: Duration,
}

impl AnsweredJobs {
  fn new(ttl: Duration) -> Self {
    Self {
      entries: HashMap::new(),
      ttl,
    }
  }

  fn insert(&mut self, job_id: String) {
    self.prune();
    self.entries.insert(job_id, Instant::now());
  }

  /// Remove `job_id`, returning whether it was present.
  fn take(&mut self, job_id: &str) -> bool {
    self.prune();
    self.entries.remove(job_id).is_some()
  }

  fn prune(&mut self) {
    let now = Instant::now();
    let ttl = self.ttl;
    self.entries.retain(|_, at| now.duration_since(*at) < ttl);
  }

  #[cfg(test)]
  fn len(&self) -> usize {
    self.entries.len()
  }
}
