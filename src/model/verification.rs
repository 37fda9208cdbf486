use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::{ContentDigest, Context, EvidenceSnippet, Fingerprint};

/// Final classification of a verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    True,
    Recycled,
    FalseLocation,
    Misleading,
    Unverified,
    Error,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::True => "TRUE",
            Verdict::Recycled => "RECYCLED",
            Verdict::FalseLocation => "FALSE_LOCATION",
            Verdict::Misleading => "MISLEADING",
            Verdict::Unverified => "UNVERIFIED",
            Verdict::Error => "ERROR",
        }
    }

    /// Fixed confidence attached to each verdict
    pub fn confidence(&self) -> f64 {
        match self {
            Verdict::Recycled => 0.9,
            Verdict::True => 0.85,
            Verdict::FalseLocation => 0.75,
            Verdict::Misleading => 0.65,
            Verdict::Unverified => 0.4,
            Verdict::Error => 0.0,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of comparing a claimed context against discovered evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub verdict: Verdict,
    pub confidence: f64,
    pub explanation: String,
}

impl Synthesis {
    pub fn new(verdict: Verdict, explanation: impl Into<String>) -> Self {
        Self {
            verdict,
            confidence: verdict.confidence(),
            explanation: explanation.into(),
        }
    }
}

/// Evidence reused from a visually equivalent, previously verified image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecycledSource {
    pub digest: ContentDigest,
    /// Hamming distance between the two perceptual hashes
    pub distance: u32,
}

/// The cached outcome of verifying one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub fingerprint: Fingerprint,
    pub claim: Option<String>,
    pub claimed_context: Context,
    pub discovered_context: Context,
    pub verdict: Verdict,
    pub confidence: f64,
    pub explanation: String,
    pub evidence: Vec<EvidenceSnippet>,
    /// Sources that failed or timed out while gathering
    pub unavailable_sources: Vec<String>,
    pub recycled_from: Option<RecycledSource>,
    pub created_at: DateTime<Utc>,
}

impl VerificationRecord {
    pub fn evidence_count(&self) -> usize {
        self.evidence.len()
    }

    /// Mean credibility over all snippets (0.0 with no evidence)
    pub fn average_credibility(&self) -> f64 {
        if self.evidence.is_empty() {
            return 0.0;
        }
        self.evidence.iter().map(|e| e.credibility).sum::<f64>() / self.evidence.len() as f64
    }

    pub fn top_evidence(&self, limit: usize) -> &[EvidenceSnippet] {
        &self.evidence[..self.evidence.len().min(limit)]
    }

    /// Build a new record for `fingerprint` judged against another claim,
    /// reusing this record's discovered evidence
    pub fn reassess(
        &self,
        fingerprint: Fingerprint,
        claim: Option<String>,
        claimed_context: Context,
        synthesis: Synthesis,
        recycled_from: Option<RecycledSource>,
    ) -> VerificationRecord {
        VerificationRecord {
            fingerprint,
            claim,
            claimed_context,
            discovered_context: self.discovered_context.clone(),
            verdict: synthesis.verdict,
            confidence: synthesis.confidence,
            explanation: synthesis.explanation,
            evidence: self.evidence.clone(),
            unavailable_sources: self.unavailable_sources.clone(),
            recycled_from,
            created_at: Utc::now(),
        }
    }
}
