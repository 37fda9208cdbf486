//! Image resolution: turns an image reference into raw bytes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use super::USER_AGENT;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FetchError {
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} while fetching {url}")]
    Status { status: u16, url: String },

    #[error("Image exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Image download timed out after {0:?}")]
    Timeout(Duration),
}

/// Trait for image transports
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, image_reference: &str) -> Result<Vec<u8>, FetchError>;
}

/// Downloads images over HTTP(S)
pub struct HttpImageFetcher {
    client: Client,
    max_bytes: usize,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client, max_bytes })
    }

    fn parse_reference(image_reference: &str) -> Result<Url, FetchError> {
        let url = Url::parse(image_reference.trim())
            .map_err(|e| FetchError::InvalidReference(format!("{}: {}", image_reference, e)))?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(FetchError::InvalidReference(format!(
                "unsupported scheme '{}'",
                other
            ))),
        }
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, image_reference: &str) -> Result<Vec<u8>, FetchError> {
        let url = Self::parse_reference(image_reference)?;

        tracing::debug!(url = %url, "Downloading image");

        let response = self.client.get(url.as_str()).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_bytes
        {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        let bytes = response.bytes().await?;
        if bytes.len() > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }

        tracing::debug!(url = %url, bytes = bytes.len(), "Image downloaded");
        Ok(bytes.to_vec())
    }
}
