//! Health check endpoints for Kubernetes liveness and readiness probes

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::service::{CacheStats, VerificationService};

#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessStatus {
    pub status: String,
    pub version: String,
    pub dependencies: DependencyHealth,
}

#[derive(Serialize, ToSchema)]
pub struct DependencyHealth {
    /// Configured evidence sources; empty means heuristic-only verification
    pub evidence_sources: Vec<String>,
    /// Cache backing, e.g. "memory" or "memory+redis"
    pub cache: String,
    pub cache_stats: CacheStats,
    pub vocabulary_version: u32,
    pub jobs: usize,
}

/// Liveness probe endpoint
///
/// Always returns 200 OK if the service is running.
/// Used by Kubernetes to determine if the pod should be restarted.
#[utoipa::path(
    get,
    path = "/health/live",
    responses(
        (status = 200, description = "Service is alive", body = HealthStatus)
    ),
    tag = "health"
)]
#[get("/health/live")]
pub async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe endpoint
///
/// Evidence sources and the durable store are optional, so the service is
/// ready as soon as it is up. The body reports what is configured.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessStatus)
    ),
    tag = "health"
)]
#[get("/health/ready")]
pub async fn readiness(service: web::Data<VerificationService>) -> impl Responder {
    let sources = service.source_names();
    if sources.is_empty() {
        tracing::debug!("No evidence sources configured");
    }

    HttpResponse::Ok().json(ReadinessStatus {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies: DependencyHealth {
            evidence_sources: sources,
            cache: service.cache().backend(),
            cache_stats: service.cache().stats(),
            vocabulary_version: service.vocabulary_version(),
            jobs: service.job_count(),
        },
    })
}

/// Configure health check routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(liveness).service(readiness);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::App;
    use actix_web::test as actix_test;

    use super::*;
    use crate::service::{ContextExtractor, EvidenceGatherer, JobRegistry, ResultCache};
    use crate::source::HttpImageFetcher;

    #[actix_web::test]
    async fn test_readiness_reports_configuration() {
        let fetcher = HttpImageFetcher::new(std::time::Duration::from_secs(1), 1024).unwrap();
        let service = VerificationService::new(
            Arc::new(fetcher),
            EvidenceGatherer::new(vec![]),
            ContextExtractor::default(),
            Arc::new(ResultCache::default()),
            JobRegistry::default(),
            std::time::Duration::from_secs(1),
        );
        let app = actix_test::init_service(
            App::new()
                .app_data(web::Data::new(service))
                .configure(configure),
        )
        .await;

        let req = actix_test::TestRequest::get().uri("/health/ready").to_request();
        let body: serde_json::Value = actix_test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "ready");
        assert_eq!(body["dependencies"]["cache"], "memory");
        assert_eq!(body["dependencies"]["evidence_sources"], serde_json::json!([]));
        assert_eq!(body["dependencies"]["cache_stats"]["entries"], 0);
    }

    #[actix_web::test]
    async fn test_liveness() {
        let app = actix_test::init_service(App::new().configure(configure)).await;
        let req = actix_test::TestRequest::get().uri("/health/live").to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }
}
