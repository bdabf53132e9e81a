use async_trait::async_trait;
use beatmirror_orchestrator::{DownloadError, DownloadOrchestrator};
use beatmirror_types::{DownloadJob, DownloadResult};

/// Turns a download job into its result.
#[async_trait]
pub trait DownloadHandler: Send + Sync {
  async fn handle(&self, job: &DownloadJob) -> Result<DownloadResult, DownloadError>;
}

#[async_trait]
impl DownloadHandler for DownloadOrchestrator {
  async fn handle(&self, job: &DownloadJob) -> Result<DownloadResult, DownloadError> {
    let archive = self
      .download_map(job.archive_id, job.include_large_variant)
      .await?;
    Ok(archive.into_result(job.job_id.clone()))
  }
}
