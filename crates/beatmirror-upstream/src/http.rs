use std::time::Duration;

use async_trait::async_trait;
use beatmirror_types::ArchiveId;
use futures::StreamExt;
use reqwest::StatusCode;
use tracing::debug;
use url::Url;

use crate::{Upstream, UpstreamError, UpstreamStream};

/// Configuration for [`HttpUpstream`].
#[derive(Debug, Clone)]
pub struct HttpUpstreamConfig {
  /// API base, e.g. `https://osu.ppy.sh`.
  pub base_url: Url,
  /// OAuth bearer token for the mirror account. `None` means no session.
  pub access_token: Option<String>,
  /// Timeout for establishing the connection.
  pub connect_timeout: Duration,
}

/// Downloads archives over the provider's HTTP API:
/// `GET {base}/api/v2/beatmapsets/{id}/download[?noVideo=1]`.
pub struct HttpUpstream {
  client: reqwest::Client,
  config: HttpUpstreamConfig,
}

impl HttpUpstream {
  pub fn new(config: HttpUpstreamConfig) -> Result<Self, UpstreamError> {
    let client = reqwest::Client::builder()
      .connect_timeout(config.connect_timeout)
      .user_agent(concat!("beatmirror/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;
    Ok(Self { client, config })
  }

  /// Download URL for an archive.
  pub fn download_url(&self, archive_id: ArchiveId, small_variant: bool) -> Result<Url, UpstreamError> {
    let mut url = self
      .config
      .base_url
      .join(&format!("api/v2/beatmapsets/{}/download", archive_id))
      .map_err(|e| UpstreamError::Unavailable(format!("invalid upstream url: {}", e)))?;
    if small_variant {
      url.query_pairs_mut().append_pair("noVideo", "1");
    }
    Ok(url)
  }

  fn token(&self) -> Option<&str> {
    self
      .config
      .access_token
      .as_deref()
      .filter(|t| !t.is_empty())
  }
}

#[async_trait]
impl Upstream for HttpUpstream {
  fn is_authenticated(&self) -> bool {
    self.token().is_some()
  }

  async fn fetch(
    &self,
    archive_id: ArchiveId,
    small_variant: bool,
  ) -> Result<UpstreamStream, UpstreamError> {
    let token = self.token().ok_or(UpstreamError::NotAuthenticated)?;
    let url = self.download_url(archive_id, small_variant)?;
    debug!(archive_id = %archive_id, url = %url, "fetching archive from upstream");

    let response = self
      .client
      .get(url)
      .bearer_auth(token)
      .send()
      .await
      .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

    match response.status() {
      StatusCode::NOT_FOUND => return Err(UpstreamError::NotFound(archive_id)),
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
        return Err(UpstreamError::NotAuthenticated);
      }
      status if !status.is_success() => {
        return Err(UpstreamError::Unavailable(format!(
          "upstream returned {}",
          status
        )));
      }
      _ => {}
    }

    let stream = response
      .bytes_stream()
      .map(|chunk| chunk.map_err(|e| UpstreamError::Unavailable(e.to_string())));
    Ok(Box::pin(stream))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn upstream(token: Option<&str>) -> HttpUpstream {
    HttpUpstream::new(HttpUpstreamConfig {
      base_url: Url::parse("https://osu.example/").unwrap(),
      access_token: token.map(str::to_string),
      connect_timeout: Duration::from_secs(5),
    })
    .unwrap()
  }

  #[test]
  fn test_download_url() {
    let upstream = upstream(Some("t"));

    assert_eq!(
      upstream.download_url(ArchiveId(123), false).unwrap().as_str(),
      "https://osu.example/api/v2/beatmapsets/123/download"
    );
    assert_eq!(
      upstream.download_url(ArchiveId(123), true).unwrap().as_str(),
      "https://osu.example/api/v2/beatmapsets/123/download?noVideo=1"
    );
  }

  #[test]
  fn test_authentication_requires_token() {
    assert!(upstream(Some("token")).is_authenticated());
    assert!(!upstream(Some("")).is_authenticated());
    assert!(!upstream(None).is_authenticated());
  }

  #[tokio::test]
  async fn test_fetch_without_token_fails_fast() {
    let result = upstream(None).fetch(ArchiveId(1), false).await;
    assert!(matches!(result, Err(UpstreamError::NotAuthenticated)));
  }
}
