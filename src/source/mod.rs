//! Evidence sources for discovering where else an image has appeared

mod bing_news;
mod fetcher;
mod serpapi_lens;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

use crate::model::{EvidenceQuery, EvidenceSnippet, RawResult, SourceType};

pub use bing_news::BingNewsSource;
pub use fetcher::{FetchError, HttpImageFetcher, ImageFetcher};
pub use serpapi_lens::SerpApiLensSource;

const USER_AGENT: &str = "visual-verify/0.1";

/// Any variant means the source is unavailable for this job
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Credentials rejected by {0}")]
    Unauthorized(&'static str),

    #[error("Query not supported: {0}")]
    Unsupported(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Abandoned at the gathering deadline")]
    Abandoned,
}

/// Trait for pluggable evidence providers
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Stable identifier, recorded on every snippet
    fn name(&self) -> &str;

    fn source_type(&self) -> SourceType;

    async fn query(&self, query: &EvidenceQuery) -> Result<Vec<RawResult>, SourceError>;
}

/// Domains with a known editorial track record
const CREDIBLE_DOMAINS: &[(&str, f64)] = &[
    ("reuters.com", 0.95),
    ("apnews.com", 0.95),
    ("bbc.com", 0.93),
    ("bbc.co.uk", 0.93),
    ("nytimes.com", 0.90),
    ("theguardian.com", 0.90),
    ("snopes.com", 0.90),
    ("aljazeera.com", 0.85),
    ("cnn.com", 0.82),
    ("nbcnews.com", 0.82),
];

const UNKNOWN_CREDIBILITY: f64 = 0.5;

/// Credibility score for the domain a result was published on
pub fn credibility_for(url: Option<&Url>) -> f64 {
    let Some(host) = url.and_then(|u| u.host_str()) else {
        return UNKNOWN_CREDIBILITY;
    };
    let host = host.to_lowercase();

    CREDIBLE_DOMAINS
        .iter()
        .find(|(domain, _)| host == *domain || host.ends_with(&format!(".{}", domain)))
        .map(|(_, score)| *score)
        .unwrap_or(UNKNOWN_CREDIBILITY)
}

/// Normalize a provider result into a snippet; results without text are dropped
pub fn normalize_result(
    source: &str,
    source_type: SourceType,
    raw: RawResult,
) -> Option<EvidenceSnippet> {
    let text = match raw.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        Some(title) if !raw.text.trim().is_empty() => format!("{}. {}", title, raw.text.trim()),
        Some(title) => title.to_string(),
        None => raw.text.trim().to_string(),
    };

    if text.is_empty() {
        return None;
    }

    Some(EvidenceSnippet {
        source: source.to_string(),
        source_type,
        credibility: credibility_for(raw.url.as_ref()),
        text,
        published: raw.date,
        url: raw.url,
    })
}

/// Parse an optional link, ignoring anything that is not an absolute URL
fn parse_link(link: Option<&str>) -> Option<Url> {
    link.and_then(|l| Url::parse(l.trim()).ok())
}

/// Parse provider timestamps (RFC 3339, any fractional precision)
fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Map common HTTP failure statuses to source errors
fn check_status(provider: &'static str, status: reqwest::StatusCode) -> Result<(), SourceError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(provider = provider, "Evidence source rate limited");
        return Err(SourceError::RateLimited);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(SourceError::Unauthorized(provider));
    }

    if !status.is_success() {
        return Err(SourceError::ParseError(format!("HTTP {} from {}", status, provider)));
    }

    Ok(())
}
