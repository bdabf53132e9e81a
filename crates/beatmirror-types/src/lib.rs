//! Beatmirror Types
//!
//! Data model shared by the public process and the download worker. Nothing
//! in here performs I/O; it only describes archives, download jobs and the
//! key/channel layout both processes agree on in the shared store.

mod archive;
mod job;
mod protocol;

pub use archive::{ArchiveId, ArchiveMeta};
pub use job::{Correlated, DownloadJob, DownloadResult, PinOutcome};
pub use protocol::{DispatchMode, DownloadChannels, ParseDispatchModeError, results_channel};
