//! Google Lens reverse image search via SerpAPI

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use super::{EvidenceSource, SourceError, USER_AGENT, check_status, parse_link};
use crate::model::{EvidenceQuery, RawResult, SourceType};

const SERPAPI_ENDPOINT: &str = "https://serpapi.com/search";
const PROVIDER: &str = "serpapi_lens";

#[derive(Debug, Deserialize)]
struct LensResponse {
    #[serde(default)]
    visual_matches: Vec<VisualMatch>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VisualMatch {
    link: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
    source: Option<String>,
}

/// Finds pages showing the same picture, keyed by the image URL
pub struct SerpApiLensSource {
    client: Client,
    api_key: String,
    max_results: usize,
}

impl SerpApiLensSource {
    pub fn new(api_key: String, max_results: usize) -> Self {
        Self {
            client: Client::new(),
            api_key,
            max_results,
        }
    }

    fn parse_response(&self, body: &str) -> Result<Vec<RawResult>, SourceError> {
        let response: LensResponse =
            serde_json::from_str(body).map_err(|e| SourceError::ParseError(e.to_string()))?;

        if let Some(error) = response.error {
            // SerpAPI reports "no results" as an error string
            if error.to_lowercase().contains("hasn't returned any results") {
                return Ok(vec![]);
            }
            return Err(SourceError::ParseError(error));
        }

        Ok(response
            .visual_matches
            .into_iter()
            .take(self.max_results)
            .map(|m| {
                let text = match m.source {
                    Some(source) if !m.snippet.is_empty() => format!("{} ({})", m.snippet, source),
                    _ => m.snippet,
                };
                RawResult {
                    title: Some(m.title),
                    text,
                    date: None,
                    url: parse_link(m.link.as_deref()),
                }
            })
            .collect())
    }
}

#[async_trait]
impl EvidenceSource for SerpApiLensSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn source_type(&self) -> SourceType {
        SourceType::ReverseImage
    }

    async fn query(&self, query: &EvidenceQuery) -> Result<Vec<RawResult>, SourceError> {
        let image_url = Url::parse(&query.image_reference)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| {
                SourceError::Unsupported("reverse image search needs a public image URL".into())
            })?;

        tracing::debug!(digest = %query.fingerprint.digest.short(), "Querying Google Lens");

        let response = self
            .client
            .get(SERPAPI_ENDPOINT)
            .header("User-Agent", USER_AGENT)
            .query(&[
                ("engine", "google_lens"),
                ("url", image_url.as_str()),
                ("api_key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        check_status(PROVIDER, response.status())?;

        let body = response.text().await?;
        self.parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_visual_matches() {
        let source = SerpApiLensSource::new("key".to_string(), 1);
        let body = r#"{
            "visual_matches": [
                {"title": "Cyclone Mora hits Bangladesh", "link": "https://www.bbc.com/news/1",
                 "snippet": "Chittagong, May 2017", "source": "BBC"},
                {"title": "second", "link": "https://example.com"}
            ]
        }"#;

        let results = source.parse_response(body).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title.as_deref(), Some("Cyclone Mora hits Bangladesh"));
        assert_eq!(results[0].text, "Chittagong, May 2017 (BBC)");
        assert_eq!(results[0].url.as_ref().unwrap().host_str(), Some("www.bbc.com"));
    }

    #[test]
    fn test_no_results_is_not_a_failure() {
        let source = SerpApiLensSource::new("key".to_string(), 10);
        let body = r#"{"error": "Google Lens hasn't returned any results for this query."}"#;
        assert!(source.parse_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_provider_error_is_a_failure() {
        let source = SerpApiLensSource::new("key".to_string(), 10);
        let body = r#"{"error": "Invalid API key."}"#;
        assert!(matches!(source.parse_response(body), Err(SourceError::ParseError(_))));
    }
}
