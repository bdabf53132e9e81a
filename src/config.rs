//! Command line and environment configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use beatmirror_types::{DispatchMode, DownloadChannels};
use clap::Args;
use url::Url;

/// Where the shared store lives and how jobs travel through it.
#[derive(Args, Debug, Clone)]
pub struct SharedStoreArgs {
  /// Redis connection URL
  #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
  pub redis_url: String,

  /// Redis database index (overrides the one in the URL)
  #[arg(long, env = "REDIS_DATABASE")]
  pub redis_database: Option<i64>,

  /// Prefix for every key and channel
  #[arg(long, env = "BEATMIRROR_PREFIX", default_value = "beatmirror")]
  pub prefix: String,

  /// How jobs reach the worker: `publish` or `keyspace`
  #[arg(long, env = "DISPATCH_MODE", default_value_t = DispatchMode::Publish)]
  pub dispatch_mode: DispatchMode,
}

impl SharedStoreArgs {
  pub fn redis_url(&self) -> Result<String> {
    let Some(db) = self.redis_database else {
      return Ok(self.redis_url.clone());
    };
    let mut url = Url::parse(&self.redis_url)
      .with_context(|| format!("invalid redis url: {}", self.redis_url))?;
    url.set_path(&format!("/{}", db));
    Ok(url.to_string())
  }

  pub fn channels(&self) -> DownloadChannels {
    DownloadChannels::new(self.prefix.clone())
  }
}

/// Everything needed to download, cache and pin archives.
#[derive(Args, Debug, Clone)]
pub struct BackendArgs {
  /// SQLite database URL (default: sqlite://<data-dir>/beatmirror.db)
  #[arg(long, env = "DATABASE_URL")]
  pub database_url: Option<String>,

  /// Upstream API base URL
  #[arg(long, env = "UPSTREAM_URL", default_value = "https://osu.ppy.sh")]
  pub upstream_url: Url,

  /// Upstream OAuth access token
  #[arg(long, env = "UPSTREAM_TOKEN", hide_env_values = true)]
  pub upstream_token: Option<String>,

  /// Storage cluster API address
  #[arg(long, env = "IPFS_CLUSTER_HOST")]
  pub ipfs_cluster_host: Option<String>,

  /// Storage cluster secret
  #[arg(long, env = "IPFS_CLUSTER_SECRET", hide_env_values = true)]
  pub ipfs_cluster_secret: Option<String>,

  /// Pinning agent executable
  #[arg(long, env = "PIN_AGENT", default_value = "ipfs-cluster-ctl")]
  pub pin_agent: PathBuf,

  /// Upstream requests allowed per window
  #[arg(long, env = "RATE_LIMIT", default_value_t = 1200)]
  pub rate_limit: usize,

  /// Rate limit window in seconds
  #[arg(long, env = "RATE_WINDOW_SECS", default_value_t = 60)]
  pub rate_window_secs: u64,
}

impl BackendArgs {
  pub fn database_url(&self, data_dir: &std::path::Path) -> String {
    self
      .database_url
      .clone()
      .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("beatmirror.db").display()))
  }
}

#[derive(Args, Debug)]
pub struct WorkerArgs {
  #[command(flatten)]
  pub store: SharedStoreArgs,

  #[command(flatten)]
  pub backend: BackendArgs,

  /// Hold a lock in the shared store while fetching, for workers sharing a
  /// cache directory
  #[arg(long, env = "BEATMIRROR_DISTRIBUTED_LOCK")]
  pub distributed_lock: bool,
}

#[derive(Args, Debug)]
pub struct RequestArgs {
  #[command(flatten)]
  pub store: SharedStoreArgs,

  /// Archive to request
  pub archive_id: i64,

  /// Ask for the variant without video
  #[arg(long)]
  pub no_video: bool,

  /// Seconds to wait for the worker
  #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 60)]
  pub timeout_secs: u64,
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
  #[command(flatten)]
  pub backend: BackendArgs,

  /// Archive to download
  pub archive_id: i64,

  /// Download the variant without video
  #[arg(long)]
  pub no_video: bool,

  /// Copy the archive here when it stays in the local cache
  #[arg(long, short)]
  pub output: Option<PathBuf>,
}
