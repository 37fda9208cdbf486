//! Verification orchestration
//!
//! Drives one job through fetch, fingerprint, cache lookup and (on a miss)
//! evidence gathering, context extraction and verdict synthesis.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::time::timeout;

use crate::model::{
    CacheOutcome, Context, EvidenceQuery, Fingerprint, Job, JobId, RecycledSource,
    VerificationRecord,
};
use crate::service::cache::{CacheLookup, ResultCache};
use crate::service::context::ContextExtractor;
use crate::service::evidence::EvidenceGatherer;
use crate::service::fingerprint::{FingerprintError, compute_fingerprint};
use crate::service::jobs::JobRegistry;
use crate::service::verdict::synthesize;
use crate::source::{FetchError, ImageFetcher};

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum VerificationError {
    #[error("Image fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    InvalidImage(#[from] FingerprintError),

    #[error("No usable evidence: {0}")]
    NoUsableEvidence(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Internal error: {0}")]
    Internal(String),
}

struct Pipeline {
    fetcher: Arc<dyn ImageFetcher>,
    gatherer: EvidenceGatherer,
    extractor: ContextExtractor,
    cache: Arc<ResultCache>,
    jobs: JobRegistry,
    fetch_timeout: Duration,
}

/// Entry point for the request layer
///
/// Cloning is cheap; all clones share the same jobs and cache.
#[derive(Clone)]
pub struct VerificationService {
    inner: Arc<Pipeline>,
}

impl VerificationService {
    pub fn new(
        fetcher: Arc<dyn ImageFetcher>,
        gatherer: EvidenceGatherer,
        extractor: ContextExtractor,
        cache: Arc<ResultCache>,
        jobs: JobRegistry,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Pipeline {
                fetcher,
                gatherer,
                extractor,
                cache,
                jobs,
                fetch_timeout,
            }),
        }
    }

    /// Start verifying an image in the background and return its job id
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, image_reference: String, claim: Option<String>) -> JobId {
        let claim = claim
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let id = self.inner.jobs.create(image_reference.clone(), claim.clone());

        tracing::info!(job_id = id, image = %image_reference, has_claim = claim.is_some(), "Verification job submitted");

        let pipeline = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let run = AssertUnwindSafe(pipeline.run(id, image_reference, claim)).catch_unwind();
            if run.await.is_err() {
                tracing::error!(job_id = id, "Verification task panicked");
                pipeline
                    .jobs
                    .fail(id, "Internal error: verification task panicked".to_string());
            }
        });

        id
    }

    /// Current state of a job; never blocks
    pub fn get_result(&self, id: JobId) -> Result<Job, VerificationError> {
        self.inner.jobs.get(id).ok_or(VerificationError::NotFound(id))
    }

    /// Wait for a job to reach a terminal state
    pub async fn wait(&self, id: JobId) -> Result<Job, VerificationError> {
        self.inner
            .jobs
            .wait(id)
            .await
            .ok_or(VerificationError::NotFound(id))
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.inner.cache
    }

    pub fn source_names(&self) -> Vec<String> {
        self.inner.gatherer.source_names()
    }

    pub fn vocabulary_version(&self) -> u32 {
        self.inner.extractor.version()
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.len()
    }
}

impl Pipeline {
    async fn run(&self, id: JobId, image_reference: String, claim: Option<String>) {
        let started = Instant::now();

        match self.execute(id, &image_reference, claim).await {
            Ok((record, outcome)) => {
                tracing::info!(
                    job_id = id,
                    digest = %record.fingerprint.digest.short(),
                    verdict = %record.verdict,
                    cache = ?outcome,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Verification completed"
                );
                self.jobs.complete(id, record, outcome);
            }
            Err(e) => {
                tracing::warn!(
                    job_id = id,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Verification failed"
                );
                self.jobs.fail(id, e.to_string());
            }
        }
    }

    async fn execute(
        &self,
        id: JobId,
        image_reference: &str,
        claim: Option<String>,
    ) -> Result<(Arc<VerificationRecord>, CacheOutcome), VerificationError> {
        let bytes = timeout(self.fetch_timeout, self.fetcher.fetch(image_reference))
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))??;

        // Decoding and hashing are CPU bound
        let fingerprint = tokio::task::spawn_blocking(move || compute_fingerprint(&bytes))
            .await
            .map_err(|e| VerificationError::Internal(format!("Fingerprint task failed: {}", e)))??;

        tracing::debug!(
            job_id = id,
            digest = %fingerprint.digest.short(),
            phash = %fingerprint.phash,
            "Image fingerprinted"
        );
        self.jobs.set_fingerprint(id, fingerprint.clone());

        let claimed_context = claim
            .as_deref()
            .map(|c| self.extractor.extract(c))
            .unwrap_or_default();

        let query = EvidenceQuery {
            fingerprint: fingerprint.clone(),
            image_reference: image_reference.to_string(),
            claim: claim.clone(),
        };

        let lookup = self
            .cache
            .get_or_compute(&fingerprint, || self.compute(query, claimed_context.clone()))
            .await?;
        let outcome = lookup.outcome();

        let record = match lookup {
            CacheLookup::NearDuplicate { record, distance } => {
                let source = RecycledSource {
                    digest: record.fingerprint.digest,
                    distance,
                };
                Arc::new(self.reassess(&record, fingerprint, claim, claimed_context, Some(source)))
            }
            CacheLookup::Hit(record) | CacheLookup::Computed(record) if record.claim == claim => {
                record
            }
            // Same image, different claim: judge the new claim against the cached evidence
            CacheLookup::Hit(record) | CacheLookup::Computed(record) => {
                Arc::new(self.reassess(&record, fingerprint, claim, claimed_context, None))
            }
        };

        Ok((record, outcome))
    }

    /// Gather evidence and build a fresh record; runs at most once per digest
    async fn compute(
        &self,
        query: EvidenceQuery,
        claimed_context: Context,
    ) -> Result<VerificationRecord, VerificationError> {
        let gathered = self.gatherer.gather(&query).await;

        if gathered.all_failed() {
            return Err(VerificationError::NoUsableEvidence(format!(
                "all evidence sources failed ({})",
                gathered.unavailable.join(", ")
            )));
        }

        let discovered_context = Context::union(
            gathered
                .snippets
                .iter()
                .map(|snippet| self.extractor.extract(&snippet.text)),
        );
        let synthesis = synthesize(&claimed_context, &discovered_context, gathered.snippets.len());

        Ok(VerificationRecord {
            fingerprint: query.fingerprint,
            claim: query.claim,
            claimed_context,
            discovered_context,
            verdict: synthesis.verdict,
            confidence: synthesis.confidence,
            explanation: synthesis.explanation,
            evidence: gathered.snippets,
            unavailable_sources: gathered.unavailable,
            recycled_from: None,
            created_at: Utc::now(),
        })
    }

    fn reassess(
        &self,
        cached: &VerificationRecord,
        fingerprint: Fingerprint,
        claim: Option<String>,
        claimed_context: Context,
        recycled_from: Option<RecycledSource>,
    ) -> VerificationRecord {
        let mut synthesis = synthesize(
            &claimed_context,
            &cached.discovered_context,
            cached.evidence_count(),
        );

        if let Some(source) = &recycled_from {
            synthesis.explanation = format!(
                "Visually matches previously verified image {} ({} bits apart). {}",
                source.digest.short(),
                source.distance,
                synthesis.explanation
            );
        }

        cached.reassess(fingerprint, claim, claimed_context, synthesis, recycled_from)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use image::ImageFormat;

    use super::*;
    use crate::model::{JobStatus, Verdict};
    use crate::service::evidence::tests::{FailingSource, StaticSource};
    use crate::service::fingerprint::tests::{encode, ramp_image};
    use crate::source::EvidenceSource;

    const IMAGE_A: &str = "https://img.test/a.png";
    const PANIC_IMAGE: &str = "https://img.test/panic.png";

    /// Serves images from memory
    struct MemoryFetcher(HashMap<String, Vec<u8>>);

    #[async_trait]
    impl ImageFetcher for MemoryFetcher {
        async fn fetch(&self, image_reference: &str) -> Result<Vec<u8>, FetchError> {
            if image_reference == PANIC_IMAGE {
                panic!("fetcher bug");
            }
            self.0
                .get(image_reference)
                .cloned()
                .ok_or_else(|| FetchError::Status {
                    status: 404,
                    url: image_reference.to_string(),
                })
        }
    }

    fn images() -> HashMap<String, Vec<u8>> {
        let ramp = ramp_image(false);
        HashMap::from([
            (IMAGE_A.to_string(), encode(&ramp, ImageFormat::Png)),
            ("https://img.test/a.bmp".to_string(), encode(&ramp, ImageFormat::Bmp)),
            ("https://img.test/broken.png".to_string(), b"not an image".to_vec()),
        ])
    }

    fn service(sources: Vec<Arc<dyn EvidenceSource>>) -> VerificationService {
        VerificationService::new(
            Arc::new(MemoryFetcher(images())),
            EvidenceGatherer::new(sources),
            ContextExtractor::default(),
            Arc::new(ResultCache::default()),
            JobRegistry::default(),
            Duration::from_secs(5),
        )
    }

    impl VerificationService {
        async fn verify(
            &self,
            image_reference: &str,
            claim: Option<&str>,
        ) -> Result<Job, VerificationError> {
            let id = self.submit(image_reference.to_string(), claim.map(str::to_string));
            self.wait(id).await
        }
    }

    fn pakistan_news() -> Arc<StaticSource> {
        Arc::new(StaticSource::new(
            "news",
            vec!["Monsoon floods submerge Sindh, Pakistan in August 2022"],
        ))
    }

    #[tokio::test]
    async fn test_no_sources_yields_unverified() {
        let service = service(vec![]);

        let job = service
            .verify(IMAGE_A, Some("flood in Pakistan 2022"))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.verdict(), Some(Verdict::Unverified));
        assert_eq!(job.cache, Some(CacheOutcome::Miss));
        let record = job.result.unwrap();
        assert_eq!(record.evidence_count(), 0);
        assert!(record.claimed_context.events.contains("flood"));
    }

    #[tokio::test]
    async fn test_resubmission_is_served_from_cache() {
        let news = pakistan_news();
        let service = service(vec![news.clone()]);
        let claim = Some("flood in Pakistan 2022");

        let first = service.verify(IMAGE_A, claim).await.unwrap();
        let second = service.verify(IMAGE_A, claim).await.unwrap();

        assert_eq!(first.verdict(), Some(Verdict::True));
        assert_eq!(second.cache, Some(CacheOutcome::Hit));
        assert_eq!(first.fingerprint, second.fingerprint);
        assert!(Arc::ptr_eq(first.result.as_ref().unwrap(), second.result.as_ref().unwrap()));
        assert_eq!(news.calls(), 1);
        assert!(first.id < second.id);
    }

    #[tokio::test]
    async fn test_different_claim_is_reassessed_without_touching_cache() {
        let news = pakistan_news();
        let service = service(vec![news.clone()]);

        let first = service
            .verify(IMAGE_A, Some("flood in Pakistan 2022"))
            .await
            .unwrap();
        let second = service
            .verify(IMAGE_A, Some("Earthquake in Turkey, 2024"))
            .await
            .unwrap();

        assert_eq!(second.cache, Some(CacheOutcome::Hit));
        assert_eq!(second.verdict(), Some(Verdict::Recycled));
        assert_eq!(news.calls(), 1);

        let fingerprint = first.fingerprint.unwrap();
        let cached = service.cache().lookup(&fingerprint.digest).unwrap();
        assert_eq!(cached.claim.as_deref(), Some("flood in Pakistan 2022"));
        assert_eq!(cached.verdict, Verdict::True);
        assert_eq!(cached.discovered_context, second.result.unwrap().discovered_context);
    }

    #[tokio::test]
    async fn test_near_duplicate_reuses_evidence() {
        let news = pakistan_news();
        let service = service(vec![news.clone()]);
        let claim = Some("flood in Pakistan 2022");

        let original = service.verify(IMAGE_A, claim).await.unwrap();
        let copy = service
            .verify("https://img.test/a.bmp", claim)
            .await
            .unwrap();

        assert_eq!(copy.cache, Some(CacheOutcome::NearDuplicate));
        let record = copy.result.unwrap();
        let recycled = record.recycled_from.unwrap();
        assert_eq!(recycled.digest, original.fingerprint.unwrap().digest);
        assert_eq!(recycled.distance, 0);
        assert_ne!(record.fingerprint.digest, recycled.digest);
        assert!(record.explanation.starts_with("Visually matches previously verified image"));
        assert_eq!(news.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_jobs_query_sources_once() {
        let news = Arc::new(
            StaticSource::new("news", vec!["Floods in Pakistan, 2022"])
                .delayed(Duration::from_millis(50)),
        );
        let service = service(vec![news.clone()]);

        let ids: Vec<JobId> = (0..8)
            .map(|_| service.submit(IMAGE_A.to_string(), Some("flood in Pakistan 2022".to_string())))
            .collect();

        for id in ids {
            let job = service.wait(id).await.unwrap();
            assert_eq!(job.status, JobStatus::Done);
        }
        assert_eq!(news.calls(), 1);
        assert_eq!(service.cache().stats().computations, 1);
    }

    #[tokio::test]
    async fn test_invalid_image_is_an_error() {
        let service = service(vec![]);

        let job = service
            .verify("https://img.test/broken.png", None)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.verdict(), Some(Verdict::Error));
        assert!(job.error.unwrap().starts_with("Invalid image"));
        assert!(job.fingerprint.is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_is_an_error() {
        let service = service(vec![]);

        let job = service
            .verify("https://img.test/missing.png", None)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_an_error_and_not_cached() {
        let service = service(vec![
            Arc::new(FailingSource("lens")),
            Arc::new(FailingSource("news")),
        ]);

        let job = service
            .verify(IMAGE_A, Some("flood"))
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("lens, news"));
        assert!(job.fingerprint.is_some());
        assert_eq!(service.cache().len(), 0);
    }

    #[tokio::test]
    async fn test_partial_source_failure_still_completes() {
        let service = service(vec![Arc::new(FailingSource("lens")), pakistan_news()]);

        let job = service
            .verify(IMAGE_A, Some("flood in Pakistan 2022"))
            .await
            .unwrap();

        let record = job.result.unwrap();
        assert_eq!(record.verdict, Verdict::True);
        assert_eq!(record.unavailable_sources, vec!["lens".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let service = service(vec![]);

        assert!(matches!(
            service.get_result(42),
            Err(VerificationError::NotFound(42))
        ));
        assert!(matches!(
            service.wait(42).await,
            Err(VerificationError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_submit_returns_processing_job() {
        let news = Arc::new(StaticSource::new("news", vec!["x"]).delayed(Duration::from_millis(200)));
        let service = service(vec![news]);

        let id = service.submit(IMAGE_A.to_string(), Some("   ".to_string()));
        let job = service.get_result(id).unwrap();

        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.claim.is_none());
        assert!(job.verdict().is_none());
        assert_eq!(service.wait(id).await.unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn test_panicking_job_fails_instead_of_hanging() {
        let service = service(vec![]);

        let job = tokio::time::timeout(Duration::from_secs(5), service.verify(PANIC_IMAGE, None))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(job.status, JobStatus::Error);
        assert!(job.error.unwrap().contains("panicked"));
    }
}
