mod config;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beatmirror_bridge::{BridgeConfig, RequestBridge};
use beatmirror_cache::LocalCacheStore;
use beatmirror_dispatch::Dispatcher;
use beatmirror_kv::{LockConfig, RedisStore, SharedStore};
use beatmirror_limiter::RateLimiter;
use beatmirror_orchestrator::DownloadOrchestrator;
use beatmirror_pinner::{ClusterPinner, PinOutcome, PinnerConfig};
use beatmirror_store::{Ledger, MetadataStore, SqliteStore};
use beatmirror_types::{ArchiveId, DispatchMode};
use beatmirror_upstream::{HttpUpstream, HttpUpstreamConfig, Upstream};

use config::{BackendArgs, DownloadArgs, RequestArgs, SharedStoreArgs, WorkerArgs};

/// Beatmirror - download worker and request client for an archive mirror
#[derive(Parser)]
#[command(name = "beatmirror")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.beatmirror)
  #[arg(long, global = true, env = "BEATMIRROR_DATA_DIR")]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Serve download jobs from the shared store until interrupted
  Worker(WorkerArgs),

  /// Ask a running worker for an archive and print the result
  Request(RequestArgs),

  /// Download an archive in this process, without a worker
  Download(DownloadArgs),
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".beatmirror"),
  };

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Commands::Worker(args) => rt.block_on(run_worker(args, data_dir)),
    Commands::Request(args) => rt.block_on(run_request(args)),
    Commands::Download(args) => rt.block_on(run_download(args, data_dir)),
  }
}

async fn connect_shared_store(args: &SharedStoreArgs) -> Result<Arc<dyn SharedStore>> {
  let url = args.redis_url()?;
  let redis = RedisStore::connect(&url)
    .await
    .context("failed to connect to redis")?;

  if args.dispatch_mode == DispatchMode::Keyspace {
    redis.enable_keyspace_events().await;
  }

  Ok(Arc::new(redis))
}

async fn build_orchestrator(backend: &BackendArgs, data_dir: &Path) -> Result<DownloadOrchestrator> {
  tokio::fs::create_dir_all(data_dir)
    .await
    .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

  let database_url = backend.database_url(data_dir);
  let options = SqliteConnectOptions::from_str(&database_url)
    .with_context(|| format!("invalid database url: {}", database_url))?
    .create_if_missing(true);
  let pool = SqlitePoolOptions::new()
    .connect_with(options)
    .await
    .context("failed to open database")?;

  let store = Arc::new(SqliteStore::new(pool));
  store.migrate().await.context("failed to migrate database")?;

  let cache = Arc::new(LocalCacheStore::new(
    data_dir.join("cache"),
    Arc::clone(&store) as Arc<dyn Ledger>,
  ));

  let upstream = HttpUpstream::new(HttpUpstreamConfig {
    base_url: backend.upstream_url.clone(),
    access_token: backend.upstream_token.clone(),
    connect_timeout: Duration::from_secs(10),
  })
  .context("failed to create upstream client")?;
  if !upstream.is_authenticated() {
    warn!("no upstream token configured, every download will fail");
  }

  let pinner = ClusterPinner::new(PinnerConfig {
    host: backend.ipfs_cluster_host.clone(),
    secret: backend.ipfs_cluster_secret.clone(),
    agent: backend.pin_agent.clone(),
  });

  let limiter = RateLimiter::new(
    backend.rate_limit,
    Duration::from_secs(backend.rate_window_secs),
  );

  Ok(DownloadOrchestrator::new(
    Arc::new(upstream),
    store as Arc<dyn MetadataStore>,
    cache,
    Arc::new(limiter),
    Arc::new(pinner),
  ))
}

async fn run_worker(args: WorkerArgs, data_dir: PathBuf) -> Result<()> {
  let shared = connect_shared_store(&args.store).await?;
  let channels = args.store.channels();

  let mut orchestrator = build_orchestrator(&args.backend, &data_dir).await?;
  if args.distributed_lock {
    orchestrator = orchestrator.with_distributed_lock(
      Arc::clone(&shared),
      channels.clone(),
      LockConfig::default(),
    );
  }

  let dispatcher = Dispatcher::new(
    shared,
    channels,
    args.store.dispatch_mode,
    Arc::new(orchestrator),
  );

  let cancel = CancellationToken::new();
  let shutdown = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("interrupt received, shutting down");
      shutdown.cancel();
    }
  });

  dispatcher
    .run(cancel)
    .await
    .context("download dispatcher failed")
}

async fn run_request(args: RequestArgs) -> Result<()> {
  let shared = connect_shared_store(&args.store).await?;
  let bridge = RequestBridge::new(
    shared,
    BridgeConfig {
      channels: args.store.channels(),
      mode: args.store.dispatch_mode,
      timeout: Duration::from_secs(args.timeout_secs),
      ..BridgeConfig::default()
    },
  );

  let archive_id = ArchiveId(args.archive_id);
  let result = bridge
    .download_map(archive_id, !args.no_video)
    .await
    .context("request failed")?;

  match result {
    Some(result) => {
      println!("{}", serde_json::to_string_pretty(&result)?);
      Ok(())
    }
    None => bail!("no result for archive {}", archive_id),
  }
}

async fn run_download(args: DownloadArgs, data_dir: PathBuf) -> Result<()> {
  let orchestrator = build_orchestrator(&args.backend, &data_dir).await?;
  let archive_id = ArchiveId(args.archive_id);
  let include_large_variant = !args.no_video;

  let archive = orchestrator
    .download_map(archive_id, include_large_variant)
    .await
    .with_context(|| format!("failed to download archive {}", archive_id))?;

  eprintln!("Downloaded: {}", archive.file_name);

  if let Some(output) = &args.output {
    if let PinOutcome::Pinned(hash) = &archive.pin {
      bail!("archive was pinned as {} and the local copy removed", hash);
    }

    let mut stream = orchestrator
      .open_cached(archive_id, include_large_variant)
      .await
      .context("failed to open cached archive")?;
    let mut file = tokio::fs::File::create(output)
      .await
      .with_context(|| format!("failed to create {}", output.display()))?;
    while let Some(chunk) = stream.next().await {
      file.write_all(&chunk?).await?;
    }
    file.flush().await?;

    eprintln!("Written to {}", output.display());
  }

  let result = archive.into_result(local_job_id(archive_id));
  println!("{}", serde_json::to_string_pretty(&result)?);

  Ok(())
}

fn local_job_id(archive_id: ArchiveId) -> String {
  format!("local-{}", archive_id)
}
