//! Beatmirror Orchestrator
//!
//! [`DownloadOrchestrator::download_map`] is the single entry point the
//! worker needs. For one archive and variant it:
//!
//! 1. refuses immediately if the upstream session is not authenticated
//! 2. resolves archive metadata (unknown or disabled archives are not found)
//! 3. on a cache miss, takes a rate limiter permit and streams the archive
//!    from upstream into the local cache
//! 4. pins the cached file into content-addressed storage
//! 5. counts the download in the ledger
//!
//! Steps 3 and 4 run at most once at a time per `(archive, variant)`:
//! concurrent callers join the running operation and share its outcome.
//! With [`DownloadOrchestrator::with_distributed_lock`] the same holds across
//! workers sharing one cache directory.

mod error;
mod flight;
mod orchestrator;

pub use error::DownloadError;
pub use orchestrator::{DownloadOrchestrator, DownloadedArchive};
