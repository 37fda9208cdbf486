use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::model::Vocabulary;

const ENV_CONFIG_PATH: &str = "VISUAL_VERIFY_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

const ENV_SERPAPI_KEY: &str = "SERPAPI_KEY";
const ENV_BING_API_KEY: &str = "BING_API_KEY";

/// Pipeline tuning knobs
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Image download timeout
    pub fetch_timeout_secs: u64,
    /// Per evidence source timeout
    pub source_timeout_secs: u64,
    /// Overall evidence gathering deadline
    pub gather_timeout_secs: u64,
    /// Max Hamming distance (of 64 bits) for two images to count as the same picture
    pub near_duplicate_threshold: u32,
    /// Max number of records kept in memory
    pub cache_capacity: usize,
    pub max_results_per_source: usize,
    pub max_image_bytes: usize,
    /// How long finished jobs stay queryable
    pub job_retention_secs: u64,
    /// Max number of jobs kept in memory
    pub max_jobs: usize,
    pub vocabulary: Vocabulary,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 15,
            source_timeout_secs: 15,
            gather_timeout_secs: 20,
            near_duplicate_threshold: 10,
            cache_capacity: 1024,
            max_results_per_source: 10,
            max_image_bytes: 20 * 1024 * 1024,
            job_retention_secs: 60 * 60,
            max_jobs: 10_000,
            vocabulary: Vocabulary::default(),
        }
    }
}

impl PipelineConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.source_timeout_secs)
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_secs(self.gather_timeout_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }
}

/// Credentials for the optional search providers
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub serpapi_key: Option<String>,
    pub bing_api_key: Option<String>,
}

impl ProviderKeys {
    fn from_env() -> Self {
        Self {
            serpapi_key: non_empty_env(ENV_SERPAPI_KEY),
            bing_api_key: non_empty_env(ENV_BING_API_KEY),
        }
    }
}

/// YAML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub providers: ProviderKeys,
    pub port: u16,
    pub host: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            providers: ProviderKeys::default(),
            port: 8000,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and config file
    pub fn from_env() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8000);

        let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());

        let config_path =
            std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let pipeline = Self::load_config_file(&config_path)
            .map(|cf| cf.pipeline)
            .unwrap_or_default();

        Self {
            pipeline,
            providers: ProviderKeys::from_env(),
            port,
            host,
        }
    }

    /// Load configuration from YAML file
    fn load_config_file(path: &str) -> Option<ConfigFile> {
        let path = Path::new(path);

        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file not found, using defaults");
            return None;
        }

        match fs::read_to_string(path) {
            Ok(contents) => parse_config(&contents).map_or_else(
                |e| {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config file, using defaults");
                    None
                },
                |config| {
                    tracing::info!(path = %path.display(), "Loaded configuration from file");
                    Some(config)
                },
            ),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read config file, using defaults");
                None
            }
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Parse YAML config contents; an empty document yields defaults
fn parse_config(contents: &str) -> Result<ConfigFile, serde_yaml::Error> {
    let contents = contents.trim();
    if contents.is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(contents)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
