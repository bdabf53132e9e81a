use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a mirrored archive, assigned by the upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveId(pub i64);

impl ArchiveId {
  pub fn get(self) -> i64 {
    self.0
  }
}

impl From<i64> for ArchiveId {
  fn from(id: i64) -> Self {
    Self(id)
  }
}

impl fmt::Display for ArchiveId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Canonical metadata for an archive as held by the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
  pub archive_id: ArchiveId,
  pub artist: String,
  pub title: String,
  pub disabled: bool,
}

impl ArchiveMeta {
  /// File name handed to downloaders, e.g. `123 Artist - Title.osz`.
  pub fn file_name(&self) -> String {
    format!("{} {} - {}.osz", self.archive_id, self.artist, self.title)
  }
}
