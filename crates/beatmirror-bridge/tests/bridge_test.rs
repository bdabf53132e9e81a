//! RequestBridge against an in-memory store, with simulated workers.

use std::sync::Arc;
use std::time::Duration;

use beatmirror_bridge::{BridgeConfig, RequestBridge};
use beatmirror_kv::{InMemoryStore, SharedStore, keyspace_channel};
use beatmirror_types::{
  ArchiveId, DispatchMode, DownloadChannels, DownloadJob, DownloadResult, PinOutcome,
};
use futures::StreamExt;
use tokio::time::Instant;

fn bridge(store: &Arc<InMemoryStore>, mode: DispatchMode) -> RequestBridge {
  RequestBridge::new(
    Arc::clone(store) as Arc<dyn SharedStore>,
    BridgeConfig {
      mode,
      ..BridgeConfig::default()
    },
  )
}

fn pinned_result(job: &DownloadJob) -> DownloadResult {
  DownloadResult::new(
    job.job_id.clone(),
    format!("{} Artist - Title.osz", job.archive_id),
    &PinOutcome::Pinned("bafy123".to_string()),
  )
}

#[tokio::test(start_paused = true)]
async fn test_times_out_without_worker_and_removes_key() {
  let store = Arc::new(InMemoryStore::new());
  let bridge = bridge(&store, DispatchMode::Publish);

  let start = Instant::now();
  let result = bridge.download_map(ArchiveId(1), true).await.unwrap();

  assert_eq!(result, None);
  assert!(start.elapsed() >= Duration::from_secs(60));
  assert!(store.is_empty(), "request key should be removed after timeout");
}

#[tokio::test(start_paused = true)]
async fn test_publish_mode_round_trip() {
  let store = Arc::new(InMemoryStore::new());
  let channels = DownloadChannels::default();
  let mut jobs = store.subscribe(&channels.jobs()).await.unwrap();

  let worker_store = Arc::clone(&store);
  let worker_channels = channels.clone();
  let worker = tokio::spawn(async move {
    let message = jobs.next().await.unwrap();
    let job: DownloadJob = serde_json::from_str(&message.payload).unwrap();
    assert_eq!(job.archive_id, ArchiveId(123));
    assert!(job.include_large_variant);

    let reply = serde_json::to_string(&pinned_result(&job)).unwrap();
    let key = worker_channels.job_key(&job.job_id);
    worker_store.set(&key, &reply).await.unwrap();
    worker_store.publish(&worker_channels.results(), &reply).await.unwrap();
    job.job_id
  });

  let start = Instant::now();
  let result = bridge(&store, DispatchMode::Publish)
    .download_map(ArchiveId(123), true)
    .await
    .unwrap()
    .expect("expected a result");
  let job_id = worker.await.unwrap();

  assert_eq!(result.job_id, job_id);
  assert_eq!(result.file_name, "123 Artist - Title.osz");
  assert_eq!(result.pin(), PinOutcome::Pinned("bafy123".to_string()));
  assert!(start.elapsed() < Duration::from_secs(1));
  assert!(store.is_empty(), "request key should be removed after reply");
}

#[tokio::test(start_paused = true)]
async fn test_keyspace_mode_reply_under_key() {
  let store = Arc::new(InMemoryStore::new());
  let channels = DownloadChannels::default();
  let pattern = keyspace_channel(store.database(), &channels.job_key_pattern());
  let mut notifications = store.psubscribe(&pattern).await.unwrap();

  let worker_store = Arc::clone(&store);
  tokio::spawn(async move {
    while let Some(message) = notifications.next().await {
      if message.payload != "set" {
        continue;
      }
      let key = beatmirror_kv::key_from_keyspace_channel(&message.channel)
        .unwrap()
        .to_string();
      let Some(value) = worker_store.get(&key).await.unwrap() else {
        continue;
      };
      // Our own reply also triggers a notification; it is not a job.
      let Ok(job) = serde_json::from_str::<DownloadJob>(&value) else {
        continue;
      };
      let reply = serde_json::to_string(&pinned_result(&job)).unwrap();
      worker_store.set(&key, &reply).await.unwrap();
    }
  });

  let result = bridge(&store, DispatchMode::Keyspace)
    .download_map(ArchiveId(77), false)
    .await
    .unwrap()
    .expect("expected a result");

  assert_eq!(result.file_name, "77 Artist - Title.osz");
  assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deleted_key_is_negative_ack() {
  let store = Arc::new(InMemoryStore::new());
  let channels = DownloadChannels::default();
  let mut jobs = store.subscribe(&channels.jobs()).await.unwrap();

  let worker_store = Arc::clone(&store);
  let worker_channels = channels.clone();
  tokio::spawn(async move {
    let message = jobs.next().await.unwrap();
    let job: DownloadJob = serde_json::from_str(&message.payload).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    worker_store
      .delete(&worker_channels.job_key(&job.job_id))
      .await
      .unwrap();
  });

  let start = Instant::now();
  let result = bridge(&store, DispatchMode::Publish)
    .download_map(ArchiveId(5), true)
    .await
    .unwrap();

  assert_eq!(result, None);
  assert!(start.elapsed() >= Duration::from_secs(2));
  assert!(start.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_results_for_other_requests_are_ignored() {
  let store = Arc::new(InMemoryStore::new());
  let channels = DownloadChannels::default();
  let mut jobs = store.subscribe(&channels.jobs()).await.unwrap();

  let worker_store = Arc::clone(&store);
  let worker_channels = channels.clone();
  tokio::spawn(async move {
    let message = jobs.next().await.unwrap();
    let job: DownloadJob = serde_json::from_str(&message.payload).unwrap();

    let stranger = DownloadJob {
      job_id: "someone-else".to_string(),
      ..job.clone()
    };
    let results = worker_channels.results();
    let other = serde_json::to_string(&pinned_result(&stranger)).unwrap();
    worker_store.publish(&results, &other).await.unwrap();
    worker_store.publish(&results, "not json").await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let mine = DownloadResult::new(job.job_id.clone(), "mine.osz", &PinOutcome::NotPinned);
    let mine = serde_json::to_string(&mine).unwrap();
    worker_store.publish(&results, &mine).await.unwrap();
  });

  let result = bridge(&store, DispatchMode::Publish)
    .download_map(ArchiveId(9), true)
    .await
    .unwrap()
    .expect("expected a result");

  assert_eq!(result.file_name, "mine.osz");
  assert_eq!(result.pin(), PinOutcome::NotPinned);
}

#[tokio::test(start_paused = true)]
async fn test_generic_request_embeds_job_id() {
  #[derive(serde::Serialize, serde::Deserialize)]
  struct Ping {
    job_id: String,
  }

  impl beatmirror_types::Correlated for Ping {
    fn job_id(&self) -> &str {
      &self.job_id
    }
  }

  let store = Arc::new(InMemoryStore::new());
  let mut requests = store.subscribe("custom").await.unwrap();

  let worker_store = Arc::clone(&store);
  tokio::spawn(async move {
    let message = requests.next().await.unwrap();
    worker_store
      .publish("custom:results", &message.payload)
      .await
      .unwrap();
  });

  let bridge = bridge(&store, DispatchMode::Publish);
  let reply: Option<Ping> = bridge
    .request("custom", |job_id| Ping {
      job_id: job_id.to_string(),
    })
    .await
    .unwrap();

  assert!(reply.is_some());
}
