use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::ToSchema;

use crate::model::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    ReverseImage,
    News,
}

/// What an evidence source is asked about
#[derive(Debug, Clone)]
pub struct EvidenceQuery {
    pub fingerprint: Fingerprint,
    /// The reference the image was resolved from (usually its URL)
    pub image_reference: String,
    pub claim: Option<String>,
}

/// A single unnormalized result as returned by a provider
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    pub title: Option<String>,
    pub text: String,
    pub date: Option<DateTime<Utc>>,
    pub url: Option<Url>,
}

/// One unit of evidence about an image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EvidenceSnippet {
    /// Name of the source that produced this snippet
    pub source: String,
    pub source_type: SourceType,
    /// Title and body text, joined
    pub text: String,
    pub published: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub url: Option<Url>,
    /// Domain credibility in [0, 1]
    pub credibility: f64,
}
