use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, warn};

use crate::{PinError, PinOutcome, Pinner};

/// Configuration for [`ClusterPinner`].
#[derive(Debug, Clone)]
pub struct PinnerConfig {
  /// Cluster API address passed as `--host`.
  pub host: Option<String>,
  /// Cluster secret passed as `--secret`.
  pub secret: Option<String>,
  /// Pinning agent executable.
  pub agent: PathBuf,
}

impl Default for PinnerConfig {
  fn default() -> Self {
    Self {
      host: None,
      secret: None,
      agent: PathBuf::from("ipfs-cluster-ctl"),
    }
  }
}

/// Pins files by running the cluster's command line agent:
///
/// ```text
/// ipfs-cluster-ctl --host <host> --secret <secret> add <path> -Q --name <name>
/// ```
///
/// The agent prints the content hash on stdout.
pub struct ClusterPinner {
  config: PinnerConfig,
}

impl ClusterPinner {
  pub fn new(config: PinnerConfig) -> Self {
    Self { config }
  }

  async fn run_agent(&self, path: &Path, name: &str) -> Result<String, PinError> {
    let host = non_empty(&self.config.host).ok_or(PinError::MissingCredential("cluster host"))?;
    let secret =
      non_empty(&self.config.secret).ok_or(PinError::MissingCredential("cluster secret"))?;

    let output = Command::new(&self.config.agent)
      .arg("--host")
      .arg(host)
      .arg("--secret")
      .arg(secret)
      .arg("add")
      .arg(path)
      .arg("-Q")
      .arg("--name")
      .arg(name)
      .kill_on_drop(true)
      .output()
      .await
      .map_err(PinError::Spawn)?;

    if !output.status.success() {
      return Err(PinError::AgentFailed {
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if hash.is_empty() {
      return Err(PinError::EmptyHash);
    }
    Ok(hash)
  }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
  value.as_deref().filter(|v| !v.is_empty())
}

#[async_trait]
impl Pinner for ClusterPinner {
  async fn pin(&self, path: &Path, name: &str) -> PinOutcome {
    match self.run_agent(path, name).await {
      Ok(hash) => {
        // The cluster holds the content now; the cache copy is no longer needed.
        if let Err(e) = tokio::fs::remove_file(path).await {
          warn!(path = %path.display(), error = %e, "pinned but failed to delete cache file");
        }
        info!(path = %path.display(), hash = %hash, "file pinned");
        PinOutcome::Pinned(hash)
      }
      Err(e) => {
        error!(path = %path.display(), error = %e, "failed to pin file to content-addressed storage");
        PinOutcome::NotPinned
      }
    }
  }
}
