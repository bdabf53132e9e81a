//! Download job and result payloads exchanged through the shared store.

use serde::{Deserialize, Serialize};

use crate::ArchiveId;

/// Payloads that carry a correlation token.
///
/// The request bridge uses this to match responses published on a shared
/// channel against the request it is waiting on.
pub trait Correlated {
  fn job_id(&self) -> &str;
}

/// A request for the worker to download an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
  pub job_id: String,
  pub archive_id: ArchiveId,
  pub include_large_variant: bool,
}

impl Correlated for DownloadJob {
  fn job_id(&self) -> &str {
    &self.job_id
  }
}

/// Outcome of publishing a cached file into content-addressed storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinOutcome {
  /// The file is pinned under this content hash.
  Pinned(String),
  /// Pinning failed; the file stays in the local cache.
  NotPinned,
}

impl PinOutcome {
  pub fn hash(&self) -> Option<&str> {
    match self {
      PinOutcome::Pinned(hash) => Some(hash),
      PinOutcome::NotPinned => None,
    }
  }

  pub fn is_pinned(&self) -> bool {
    matches!(self, PinOutcome::Pinned(_))
  }
}

/// The worker's answer to a [`DownloadJob`].
///
/// On the wire an empty `contentHash` means the archive was not pinned. Use
/// [`DownloadResult::pin`] rather than comparing strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadResult {
  pub job_id: String,
  pub file_name: String,
  #[serde(default)]
  pub content_hash: String,
}

impl DownloadResult {
  pub fn new(job_id: impl Into<String>, file_name: impl Into<String>, pin: &PinOutcome) -> Self {
    Self {
      job_id: job_id.into(),
      file_name: file_name.into(),
      content_hash: pin.hash().unwrap_or_default().to_string(),
    }
  }

  pub fn pin(&self) -> PinOutcome {
    let hash = self.content_hash.trim();
    if hash.is_empty() {
      PinOutcome::NotPinned
    } else {
      PinOutcome::Pinned(hash.to_string())
    }
  }
}

impl Correlated for DownloadResult {
  fn job_id(&self) -> &str {
    &self.job_id
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_job_uses_camel_case_fields() {
    let job = DownloadJob {
      job_id: "abc".to_string(),
      archive_id: ArchiveId(123),
      include_large_variant: true,
    };

    let value = serde_json::to_value(&job).unwrap();
    assert_eq!(
      value,
      json!({ "jobId": "abc", "archiveId": 123, "includeLargeVariant": true })
    );
  }

  #[test]
  fn test_empty_hash_is_not_pinned() {
    let result: DownloadResult =
      serde_json::from_value(json!({ "jobId": "abc", "fileName": "f.osz", "contentHash": "" }))
        .unwrap();
    assert_eq!(result.pin(), PinOutcome::NotPinned);

    let result: DownloadResult =
      serde_json::from_value(json!({ "jobId": "abc", "fileName": "f.osz" })).unwrap();
    assert_eq!(result.pin(), PinOutcome::NotPinned);
  }

  #[test]
  fn test_result_from_pin_outcome() {
    let pinned = DownloadResult::new("abc", "f.osz", &PinOutcome::Pinned("bafy123".to_string()));
    assert_eq!(pinned.content_hash, "bafy123");
    assert_eq!(pinned.pin(), PinOutcome::Pinned("bafy123".to_string()));

    let unpinned = DownloadResult::new("abc", "f.osz", &PinOutcome::NotPinned);
    assert_eq!(unpinned.content_hash, "");
  }
}
