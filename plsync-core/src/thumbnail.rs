use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("thumbnail host returned {status} for {url}")]
    Status { status: StatusCode, url: String },
}

#[derive(Clone)]
pub struct ThumbnailClient {
    http: Client,
}

impl ThumbnailClient {
    pub fn new() -> Result<Self, ThumbnailError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, ThumbnailError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_http(http: Client) -> Self {
        Self { http }
    }

    /// Downloads the raw image bytes behind `href`.
    pub async fn fetch(&self, href: &str) -> Result<Vec<u8>, ThumbnailError> {
        let url = Url::parse(href)?;
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ThumbnailError::Status {
                status,
                url: href.to_string(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}
