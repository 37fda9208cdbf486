//! Bing News search, keyed by the claim text

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{EvidenceSource, SourceError, USER_AGENT, check_status, parse_link, parse_timestamp};
use crate::model::{EvidenceQuery, RawResult, SourceType};

const BING_NEWS_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/news/search";
const PROVIDER: &str = "bing_news";
const MAX_QUERY_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
struct NewsResponse {
    #[serde(default)]
    value: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsArticle {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    url: Option<String>,
    date_published: Option<String>,
}

pub struct BingNewsSource {
    client: Client,
    api_key: String,
    max_results: usize,
}

impl BingNewsSource {
    pub fn new(api_key: String, max_results: usize) -> Self {
        Self {
            client: Client::new(),
            api_key,
            max_results,
        }
    }

    fn parse_response(&self, body: &str) -> Result<Vec<RawResult>, SourceError> {
        let response: NewsResponse =
            serde_json::from_str(body).map_err(|e| SourceError::ParseError(e.to_string()))?;

        Ok(response
            .value
            .into_iter()
            .take(self.max_results)
            .map(|article| RawResult {
                title: Some(article.name),
                text: article.description,
                date: parse_timestamp(article.date_published.as_deref()),
                url: parse_link(article.url.as_deref()),
            })
            .collect())
    }
}

/// Truncate on a char boundary
fn truncate_query(claim: &str) -> String {
    claim.trim().chars().take(MAX_QUERY_CHARS).collect()
}

#[async_trait]
impl EvidenceSource for BingNewsSource {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn source_type(&self) -> SourceType {
        SourceType::News
    }

    async fn query(&self, query: &EvidenceQuery) -> Result<Vec<RawResult>, SourceError> {
        // Nothing to search for without a claim
        let Some(claim) = query.claim.as_deref().filter(|c| !c.trim().is_empty()) else {
            return Ok(vec![]);
        };

        let q = truncate_query(claim);
        tracing::debug!(query = %q, "Querying Bing News");

        let count = self.max_results.to_string();
        let response = self
            .client
            .get(BING_NEWS_ENDPOINT)
            .header("User-Agent", USER_AGENT)
            .header("Ocp-Apim-Subscription-Key", self.api_key.as_str())
            .query(&[("q", q.as_str()), ("count", count.as_str())])
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
    fn test_parse_articles() {
        let source = BingNewsSource::new("key".to_string(), 10);
        let body = r#"{
            "value": [{
                "name": "Monsoon floods submerge Sindh",
                "description": "Pakistan declared an emergency in August 2022.",
                "url": "https://www.aljazeera.com/news/2022/8/30/floods",
                "datePublished": "2022-08-30T11:02:00.0000000Z"
            }]
        }"#;

        let results = source.parse_response(body).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title.as_deref(), Some("Monsoon floods submerge Sindh"));
        assert_eq!(results[0].date.unwrap().format("%Y").to_string(), "2022");
    }

    #[test]
    fn test_truncate_query_respects_char_boundaries() {
        let claim = "é".repeat(150);
        assert_eq!(truncate_query(&claim).chars().count(), MAX_QUERY_CHARS);
    }

    #[tokio::test]
    async fn test_missing_claim_yields_no_results() {
        use crate::model::{ContentDigest, Fingerprint, PerceptualHash};

        let source = BingNewsSource::new("key".to_string(), 10);
        let query = EvidenceQuery {
            fingerprint: Fingerprint {
                digest: ContentDigest::from_bytes([0; 32]),
                phash: PerceptualHash::new(0),
                byte_size: 0,
                width: 1,
                height: 1,
            },
            image_reference: "https://example.com/a.jpg".to_string(),
            claim: None,
        };

        assert!(source.query(&query).await.unwrap().is_empty());
    }
}
