use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::{Fingerprint, Verdict, VerificationRecord};

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Processing,
    Done,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// How the result cache answered for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CacheOutcome {
    Miss,
    Hit,
    NearDuplicate,
}

/// A single verification request and its lifecycle
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub image_reference: String,
    pub claim: Option<String>,
    pub status: JobStatus,
    pub fingerprint: Option<Fingerprint>,
    pub result: Option<Arc<VerificationRecord>>,
    pub cache: Option<CacheOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, image_reference: String, claim: Option<String>) -> Self {
        Self {
            id,
            image_reference,
            claim,
            status: JobStatus::Processing,
            fingerprint: None,
            result: None,
            cache: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Verdict of a finished job; failed jobs report `ERROR`
    pub fn verdict(&self) -> Option<Verdict> {
        match self.status {
            JobStatus::Processing => None,
            JobStatus::Error => Some(Verdict::Error),
            JobStatus::Done => self.result.as_ref().map(|r| r.verdict),
        }
    }
}
