//! Application state and service initialization
//!
//! This module centralizes all service initialization and dependency injection,
//! making it easier to manage the application lifecycle and test services.

use std::sync::Arc;

use crate::model::{Config, PipelineConfig, ProviderKeys};
use crate::service::{
    ContextExtractor, EvidenceGatherer, JobRegistry, RecordStore, RedisRecordStore, ResultCache,
    VerificationService,
};
use crate::source::{BingNewsSource, EvidenceSource, HttpImageFetcher, SerpApiLensSource};

/// Application state containing all services and shared resources
pub struct AppState {
    /// Verification pipeline shared by all workers
    pub verification_service: VerificationService,
}

impl AppState {
    /// Initialize all services and build application state
    ///
    /// This performs:
    /// 1. Redis record store initialization (optional)
    /// 2. Evidence source selection from the configured API keys
    /// 3. Pipeline construction
    pub async fn new(config: Config) -> Result<Self, AppError> {
        // Redis is optional - verification results stay in memory without it
        let store: Option<Arc<dyn RecordStore>> = match RedisRecordStore::new().await {
            Ok(store) => {
                tracing::info!("Redis record store enabled");
                Some(Arc::new(store))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, keeping results in memory only");
                None
            }
        };

        let verification_service = Self::build_verification_service(&config, store)?;

        Ok(Self {
            verification_service,
        })
    }

    /// Build the verification pipeline with all dependencies
    fn build_verification_service(
        config: &Config,
        store: Option<Arc<dyn RecordStore>>,
    ) -> Result<VerificationService, AppError> {
        let pipeline = &config.pipeline;

        let fetcher = HttpImageFetcher::new(pipeline.fetch_timeout(), pipeline.max_image_bytes)
            .map_err(|e| AppError::InvalidConfig(format!("HTTP client: {}", e)))?;

        let gatherer = EvidenceGatherer::new(Self::build_sources(&config.providers, pipeline))
            .with_timeouts(pipeline.source_timeout(), pipeline.gather_timeout())
            .with_max_results(pipeline.max_results_per_source);

        let mut cache =
            ResultCache::new(pipeline.near_duplicate_threshold, pipeline.cache_capacity);
        if let Some(store) = store {
            cache = cache.with_store(store);
        }

        Ok(VerificationService::new(
            Arc::new(fetcher),
            gatherer,
            ContextExtractor::new(&pipeline.vocabulary),
            Arc::new(cache),
            JobRegistry::new(pipeline.job_retention(), pipeline.max_jobs),
            pipeline.fetch_timeout(),
        ))
    }

    /// Evidence sources for which credentials are present
    fn build_sources(
        providers: &ProviderKeys,
        pipeline: &PipelineConfig,
    ) -> Vec<Arc<dyn EvidenceSource>> {
        let mut sources: Vec<Arc<dyn EvidenceSource>> = Vec::new();

        if let Some(key) = &providers.serpapi_key {
            sources.push(Arc::new(SerpApiLensSource::new(
                key.clone(),
                pipeline.max_results_per_source,
            )));
        }

        if let Some(key) = &providers.bing_api_key {
            sources.push(Arc::new(BingNewsSource::new(
                key.clone(),
                pipeline.max_results_per_source,
            )));
        }

        if sources.is_empty() {
            tracing::warn!("No evidence source API keys set, verdicts will be UNVERIFIED");
        } else {
            let names: Vec<&str> = sources.iter().map(|s| s.name()).collect();
            tracing::info!(sources = ?names, "Evidence sources configured");
        }

        sources
    }
}

/// Application-level errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AppError {
    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_follow_configured_keys() {
        let pipeline = PipelineConfig::default();

        let none = AppState::build_sources(&ProviderKeys::default(), &pipeline);
        assert!(none.is_empty());

        let both = AppState::build_sources(
            &ProviderKeys {
                serpapi_key: Some("a".to_string()),
                bing_api_key: Some("b".to_string()),
            },
            &pipeline,
        );
        let names: Vec<&str> = both.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["serpapi_lens", "bing_news"]);
    }

    #[tokio::test]
    async fn test_pipeline_builds_without_store() {
        let config = Config::default();
        let service = AppState::build_verification_service(&config, None).unwrap();

        assert_eq!(service.cache().backend(), "memory");
        assert!(service.source_names().is_empty());
        assert_eq!(service.job_count(), 0);
    }
}
