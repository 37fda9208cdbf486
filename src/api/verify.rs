//! REST API endpoints for submitting images and polling verification jobs

use std::time::Duration;

use actix_web::{HttpResponse, get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use utoipa::{IntoParams, OpenApi, ToSchema};

use crate::api::error::{ApiError, ErrorResponse};
use crate::api::health::{DependencyHealth, HealthStatus, ReadinessStatus};
use crate::model::{
    CacheOutcome, ContentDigest, Context, EvidenceSnippet, Job, JobId, JobStatus, SourceType,
    Verdict, VerificationRecord, YearMonth,
};
use crate::service::{CacheStats, VerificationService};

/// Evidence snippets included in a job response
const TOP_EVIDENCE: usize = 5;

/// Upper bound on a long poll
const MAX_WAIT_SECS: u64 = 30;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Visual Verify API",
        description = "Checks claims about where and when an image was taken against evidence found elsewhere"
    ),
    paths(
        submit_verification,
        get_result,
        get_cache_entry,
        invalidate_cache_entry,
        crate::api::health::liveness,
        crate::api::health::readiness
    ),
    components(schemas(
        VerifyRequest,
        VerifyResponse,
        JobResponse,
        FingerprintView,
        RecycledView,
        CachedRecordResponse,
        InvalidateResponse,
        ErrorResponse,
        HealthStatus,
        ReadinessStatus,
        DependencyHealth,
        CacheStats,
        Context,
        YearMonth,
        EvidenceSnippet,
        SourceType,
        Verdict,
        JobStatus,
        CacheOutcome
    )),
    tags(
        (name = "verification", description = "Image claim verification"),
        (name = "health", description = "Liveness and readiness probes")
    )
)]
pub struct ApiDoc;

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyRequest {
    /// Publicly reachable http(s) URL of the image
    #[schema(value_type = String, example = "https://example.com/photo.jpg")]
    pub image_url: Url,
    /// What the image is claimed to show, e.g. "flood in Pakistan 2022"
    pub user_claim: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FingerprintView {
    /// SHA-256 of the image bytes, hex encoded
    pub digest: String,
    /// 64-bit perceptual hash, hex encoded
    pub phash: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecycledView {
    /// Digest of the earlier image whose evidence was reused
    pub digest: String,
    /// Perceptual hash distance in bits
    pub distance: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub image_url: String,
    pub claim: Option<String>,
    /// Present once the job is terminal
    pub verdict: Option<Verdict>,
    pub confidence: Option<f64>,
    pub explanation: Option<String>,
    /// Highest-ranked evidence snippets
    pub evidence: Vec<EvidenceSnippet>,
    pub evidence_count: usize,
    pub average_credibility: Option<f64>,
    /// Context discovered in the evidence
    pub real_context: Option<Context>,
    /// Context extracted from the claim
    pub claim_context: Option<Context>,
    pub fingerprint: Option<FingerprintView>,
    pub recycled_from: Option<RecycledView>,
    pub unavailable_sources: Vec<String>,
    pub cache: Option<CacheOutcome>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        let verdict = job.verdict();
        let fingerprint = job.fingerprint.as_ref().map(|fp| FingerprintView {
            digest: fp.digest.to_hex(),
            phash: fp.phash.to_string(),
            width: fp.width,
            height: fp.height,
        });

        let mut response = JobResponse {
            job_id: job.id,
            status: job.status,
            image_url: job.image_reference,
            claim: job.claim,
            verdict,
            confidence: verdict.map(|v| v.confidence()),
            explanation: job.error.clone(),
            evidence: vec![],
            evidence_count: 0,
            average_credibility: None,
            real_context: None,
            claim_context: None,
            fingerprint,
            recycled_from: None,
            unavailable_sources: vec![],
            cache: job.cache,
            error: job.error,
            created_at: job.created_at,
            completed_at: job.completed_at,
        };

        if let Some(record) = job.result {
            response.confidence = Some(record.confidence);
            response.explanation = Some(record.explanation.clone());
            response.evidence = record.top_evidence(TOP_EVIDENCE).to_vec();
            response.evidence_count = record.evidence_count();
            response.average_credibility = Some(record.average_credibility());
            response.real_context = Some(record.discovered_context.clone());
            response.claim_context = Some(record.claimed_context.clone());
            response.recycled_from = record.recycled_from.map(|r| RecycledView {
                digest: r.digest.to_hex(),
                distance: r.distance,
            });
            response.unavailable_sources = record.unavailable_sources.clone();
        }

        response
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ResultParams {
    /// Wait up to this many seconds (max 30) for the job to finish
    pub wait_secs: Option<u64>,
}

/// Cached verification for one image digest
#[derive(Debug, Serialize, ToSchema)]
pub struct CachedRecordResponse {
    pub digest: String,
    /// Claim the record was computed for
    pub claim: Option<String>,
    pub verdict: Verdict,
    pub confidence: f64,
    pub explanation: String,
    pub evidence_count: usize,
    pub discovered_context: Context,
    pub created_at: DateTime<Utc>,
}

impl From<&VerificationRecord> for CachedRecordResponse {
    fn from(record: &VerificationRecord) -> Self {
        Self {
            digest: record.fingerprint.digest.to_hex(),
            claim: record.claim.clone(),
            verdict: record.verdict,
            confidence: record.confidence,
            explanation: record.explanation.clone(),
            evidence_count: record.evidence_count(),
            discovered_context: record.discovered_context.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvalidateResponse {
    pub digest: String,
    /// Whether a completed entry was removed from memory
    pub removed: bool,
}

/// Submit an image for verification
#[utoipa::path(
    post,
    path = "/v1/verify",
    request_body = VerifyRequest,
    responses(
        (status = 202, description = "Verification job accepted", body = VerifyResponse),
        (status = 400, description = "Invalid image URL", body = ErrorResponse)
    ),
    tag = "verification"
)]
#[post("/v1/verify")]
pub async fn submit_verification(
    service: web::Data<VerificationService>,
    request: web::Json<VerifyRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();

    if !matches!(request.image_url.scheme(), "http" | "https") {
        return Err(ApiError::BadRequest(format!(
            "image_url must be http or https, got '{}'",
            request.image_url.scheme()
        )));
    }

    let job_id = service.submit(request.image_url.to_string(), request.user_claim);

    Ok(HttpResponse::Accepted().json(VerifyResponse {
        job_id,
        status: JobStatus::Processing,
        message: "Verification started".to_string(),
    }))
}

/// Poll a verification job
#[utoipa::path(
    get,
    path = "/v1/result/{job_id}",
    params(
        ("job_id" = u64, Path, description = "Job ID returned by /v1/verify"),
        ResultParams
    ),
    responses(
        (status = 200, description = "Job state, with the verdict once finished", body = JobResponse),
        (status = 404, description = "Job not found", body = ErrorResponse)
    ),
    tag = "verification"
)]
#[get("/v1/result/{job_id}")]
pub async fn get_result(
    service: web::Data<VerificationService>,
    path: web::Path<JobId>,
    query: web::Query<ResultParams>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();

    let job = match query.wait_secs {
        Some(secs) if secs > 0 => {
            let limit = Duration::from_secs(secs.min(MAX_WAIT_SECS));
            match tokio::time::timeout(limit, service.wait(id)).await {
                Ok(job) => job?,
                // Still running; report it as is
                Err(_) => service.get_result(id)?,
            }
        }
        _ => service.get_result(id)?,
    };

    Ok(HttpResponse::Ok().json(JobResponse::from(job)))
}

fn parse_digest(hex: &str) -> Result<ContentDigest, ApiError> {
    ContentDigest::from_hex(hex)
        .ok_or_else(|| ApiError::BadRequest(format!("'{}' is not a SHA-256 hex digest", hex)))
}

/// Look up the cached verification for an image digest
#[utoipa::path(
    get,
    path = "/v1/cache/{digest}",
    params(
        ("digest" = String, Path, description = "Hex SHA-256 of the image bytes")
    ),
    responses(
        (status = 200, description = "Cached verification", body = CachedRecordResponse),
        (status = 400, description = "Malformed digest", body = ErrorResponse),
        (status = 404, description = "Nothing cached for this digest", body = ErrorResponse)
    ),
    tag = "verification"
)]
#[get("/v1/cache/{digest}")]
pub async fn get_cache_entry(
    service: web::Data<VerificationService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let digest = parse_digest(&path.into_inner())?;

    let record = service
        .cache()
        .lookup(&digest)
        .ok_or_else(|| ApiError::CacheEntryNotFound(digest.to_hex()))?;

    Ok(HttpResponse::Ok().json(CachedRecordResponse::from(record.as_ref())))
}

/// Drop a cached verification so the next submission gathers evidence again
#[utoipa::path(
    delete,
    path = "/v1/cache/{digest}",
    params(
        ("digest" = String, Path, description = "Hex SHA-256 of the image bytes")
    ),
    responses(
        (status = 200, description = "Entry invalidated", body = InvalidateResponse),
        (status = 400, description = "Malformed digest", body = ErrorResponse)
    ),
    tag = "verification"
)]
#[actix_web::delete("/v1/cache/{digest}")]
pub async fn invalidate_cache_entry(
    service: web::Data<VerificationService>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let digest = parse_digest(&path.into_inner())?;

    let removed = service.cache().invalidate(&digest).await;

    Ok(HttpResponse::Ok().json(InvalidateResponse {
        digest: digest.to_hex(),
        removed,
    }))
}

/// Configure verification routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(submit_verification)
        .service(get_result)
        .service(get_cache_entry)
        .service(invalidate_cache_entry);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::App;
    use actix_web::test as actix_test;
    use async_trait::async_trait;

    use super::*;
    use crate::service::{ContextExtractor, EvidenceGatherer, JobRegistry, ResultCache};
    use crate::source::{FetchError, ImageFetcher};

    struct NoImages;

    #[async_trait]
    impl ImageFetcher for NoImages {
        async fn fetch(&self, image_reference: &str) -> Result<Vec<u8>, FetchError> {
            Err(FetchError::Status {
                status: 404,
                url: image_reference.to_string(),
            })
        }
    }

    fn service() -> VerificationService {
        VerificationService::new(
            Arc::new(NoImages),
            EvidenceGatherer::new(vec![]),
            ContextExtractor::default(),
            Arc::new(ResultCache::default()),
            JobRegistry::default(),
            Duration::from_secs(1),
        )
    }

    #[actix_web::test]
    async fn test_submit_then_poll() {
        let service = service();
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(service.clone()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/v1/verify")
            .set_json(serde_json::json!({
                "image_url": "https://example.com/a.jpg",
                "user_claim": "flood in Pakistan 2022"
            }))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::ACCEPTED);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["status"], "PROCESSING");
        let job_id = body["job_id"].as_u64().unwrap();

        let req = actix_test::TestRequest::get()
            .uri(&format!("/v1/result/{}?wait_secs=5", job_id))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ERROR");
        assert_eq!(body["verdict"], "ERROR");
        assert_eq!(body["confidence"], 0.0);
        assert!(body["error"].as_str().unwrap().contains("404"));
    }

    #[actix_web::test]
    async fn test_rejects_non_http_urls() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::post()
            .uri("/v1/verify")
            .set_json(serde_json::json!({"image_url": "ftp://example.com/a.jpg"}))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_unknown_job_is_404() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/v1/result/999").to_request();
        let resp = actix_test::call_service(&app, req).await;

        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_invalidate_validates_digest() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::delete().uri("/v1/cache/not-hex").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::delete()
            .uri(&format!("/v1/cache/{}", "ab".repeat(32)))
            .to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["removed"], false);
    }

    #[actix_web::test]
    async fn test_cache_entry_lookup() {
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(service()))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/v1/cache/xyz").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);

        let req = actix_test::TestRequest::get()
            .uri(&format!("/v1/cache/{}", "AB".repeat(32)))
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);

        let body: serde_json::Value = actix_test::read_body_json(resp).await;
        assert_eq!(body["error"], "cache_entry_not_found");
    }

    #[test]
    fn test_job_response_for_processing_job() {
        let job = Job::new(1, "https://example.com/a.jpg".to_string(), None);
        let response = JobResponse::from(job);

        assert_eq!(response.status, JobStatus::Processing);
        assert!(response.verdict.is_none());
        assert!(response.confidence.is_none());
        assert!(response.evidence.is_empty());
    }

    #[test]
    fn test_openapi_lists_routes() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/v1/verify"));
        assert!(doc.paths.paths.contains_key("/v1/result/{job_id}"));
        assert!(doc.paths.paths.contains_key("/v1/cache/{digest}"));
    }
}
