//! Key and channel layout of the download protocol.
//!
//! ```text
//! {prefix}:downloads                  channel: jobs (publish mode)
//! {prefix}:downloads:results          channel: results
//! {prefix}:downloads:{job_id}         key: job payload, later the result
//! {prefix}:locks:downloads:{id}:{v}   key: cross-worker download lock
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ArchiveId;

/// How jobs reach the worker.
///
/// Both variants exist because deployed callers moved from keyspace
/// notifications to channel publishing without a hard cutover.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
  /// Jobs are published on the jobs channel.
  #[default]
  Publish,
  /// Jobs are written to a key; the worker reacts to keyspace notifications.
  Keyspace,
}

#[derive(Debug, thiserror::Error)]
#[error("unknown dispatch mode '{0}', expected 'publish' or 'keyspace'")]
pub struct ParseDispatchModeError(String);

impl FromStr for DispatchMode {
  type Err = ParseDispatchModeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "publish" => Ok(DispatchMode::Publish),
      "keyspace" => Ok(DispatchMode::Keyspace),
      _ => Err(ParseDispatchModeError(s.to_string())),
    }
  }
}

impl fmt::Display for DispatchMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      DispatchMode::Publish => f.write_str("publish"),
      DispatchMode::Keyspace => f.write_str("keyspace"),
    }
  }
}

/// Channel replies to requests sent on `channel` are published on.
pub fn results_channel(channel: &str) -> String {
  format!("{}:results", channel)
}

/// Names of the keys and channels used for downloads under a prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadChannels {
  prefix: String,
}

impl DownloadChannels {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: prefix.into(),
    }
  }

  /// Channel jobs are published on. Also the base of every job key.
  pub fn jobs(&self) -> String {
    format!("{}:downloads", self.prefix)
  }

  /// Channel results are published on.
  pub fn results(&self) -> String {
    results_channel(&self.jobs())
  }

  pub fn job_key(&self, job_id: &str) -> String {
    format!("{}:{}", self.jobs(), job_id)
  }

  /// Glob matching every job key.
  pub fn job_key_pattern(&self) -> String {
    format!("{}:*", self.jobs())
  }

  /// Extract the job id from a job key, if the key belongs to this layout.
  pub fn job_id_from_key<'a>(&self, key: &'a str) -> Option<&'a str> {
    let jobs = self.jobs();
    let id = key.strip_prefix(jobs.as_str())?.strip_prefix(':')?;
    if id.is_empty() || id == "results" {
      None
    } else {
      Some(id)
    }
  }

  pub fn lock_key(&self, archive_id: ArchiveId, include_large_variant: bool) -> String {
    let variant = if include_large_variant { "full" } else { "novid" };
    format!("{}:locks:downloads:{}:{}", self.prefix, archive_id, variant)
  }
}

impl Default for DownloadChannels {
  fn default() -> Self {
    Self::new("beatmirror")
  }
}
