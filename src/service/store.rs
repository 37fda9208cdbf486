//! Durable backing for verification records

use std::env;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client};
use tokio::time::timeout;

use crate::model::{ContentDigest, VerificationRecord};

// Environment variable names
const ENV_REDIS_HOST: &str = "VISUAL_VERIFY_REDIS_HOST";
const ENV_REDIS_PORT: &str = "VISUAL_VERIFY_REDIS_PORT";
const ENV_REDIS_PASSWORD: &str = "VISUAL_VERIFY_REDIS_PASSWORD";
const ENV_REDIS_DB: &str = "VISUAL_VERIFY_REDIS_DB";
const ENV_RECORD_TTL: &str = "VISUAL_VERIFY_RECORD_TTL";
const ENV_COMMAND_TIMEOUT_MS: &str = "VISUAL_VERIFY_REDIS_TIMEOUT_MS";

// Default values
const DEFAULT_REDIS_HOST: &str = "127.0.0.1";
const DEFAULT_REDIS_PORT: &str = "6379";
const DEFAULT_REDIS_DB: &str = "0";
const DEFAULT_TTL_SECONDS: u64 = 30 * 24 * 60 * 60; // 30 days
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 2000;

const PREFIX_RECORD: &str = "record:";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("Redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Redis did not answer within {0:?}")]
    Timeout(Duration),
}

/// Bound a store operation so a stalled backend cannot hold up callers
async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    timeout(limit, operation)
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

/// Key-value persistence for records, keyed by content digest
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, digest: &ContentDigest) -> Result<Option<VerificationRecord>, StoreError>;

    /// Atomically insert unless a record already exists.
    /// Returns the existing record when another writer got there first.
    async fn insert_if_absent(
        &self,
        record: &VerificationRecord,
    ) -> Result<Option<VerificationRecord>, StoreError>;

    async fn remove(&self, digest: &ContentDigest) -> Result<(), StoreError>;

    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;
}

/// Redis-backed record store
#[derive(Clone)]
pub struct RedisRecordStore {
    client: Client,
    ttl_seconds: u64,
    command_timeout: Duration,
}

impl RedisRecordStore {
    /// Create a new store and verify the connection
    ///
    /// Configuration via environment variables:
    /// - `VISUAL_VERIFY_REDIS_HOST` - Redis host (default: 127.0.0.1)
    /// - `VISUAL_VERIFY_REDIS_PORT` - Redis port (default: 6379)
    /// - `VISUAL_VERIFY_REDIS_PASSWORD` - Redis password (default: none)
    /// - `VISUAL_VERIFY_REDIS_DB` - Redis database number (default: 0)
    /// - `VISUAL_VERIFY_RECORD_TTL` - Record TTL in seconds (default: 30 days)
    /// - `VISUAL_VERIFY_REDIS_TIMEOUT_MS` - Per-operation timeout (default: 2000)
    pub async fn new() -> Result<Self, StoreError> {
        let host = env::var(ENV_REDIS_HOST).unwrap_or_else(|_| DEFAULT_REDIS_HOST.to_string());
        let port = env::var(ENV_REDIS_PORT).unwrap_or_else(|_| DEFAULT_REDIS_PORT.to_string());
        let password = env::var(ENV_REDIS_PASSWORD).ok();
        let db = env::var(ENV_REDIS_DB).unwrap_or_else(|_| DEFAULT_REDIS_DB.to_string());

        let ttl_seconds = env::var(ENV_RECORD_TTL)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECONDS);

        let command_timeout = Duration::from_millis(
            env::var(ENV_COMMAND_TIMEOUT_MS)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
        );

        // redis://[password@]host:port/db
        let redis_url = match password {
            Some(pwd) if !pwd.is_empty() => format!("redis://:{}@{}:{}/{}", pwd, host, port, db),
            _ => format!("redis://{}:{}/{}", host, port, db),
        };

        tracing::debug!(host = %host, port = %port, db = %db, "Connecting to Redis");

        let client = Client::open(redis_url)?;

        bounded(command_timeout, async {
            let mut conn = client.get_multiplexed_async_connection().await?;
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await?;

        tracing::info!(host = %host, port = %port, "Redis connection established");

        Ok(Self {
            client,
            ttl_seconds,
            command_timeout,
        })
    }

    fn key(digest: &ContentDigest) -> String {
        format!("{}{}", PREFIX_RECORD, digest.to_hex())
    }
}

fn decode(json: &str) -> Result<VerificationRecord, StoreError> {
    serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
}

#[async_trait]
impl RecordStore for RedisRecordStore {
    async fn load(&self, digest: &ContentDigest) -> Result<Option<VerificationRecord>, StoreError> {
        let data: Option<String> = bounded(self.command_timeout, async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            Ok(conn.get(Self::key(digest)).await?)
        })
        .await?;

        data.as_deref().map(decode).transpose()
    }

    async fn insert_if_absent(
        &self,
        record: &VerificationRecord,
    ) -> Result<Option<VerificationRecord>, StoreError> {
        let key = Self::key(&record.fingerprint.digest);
        let json =
            serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        let existing: Option<Option<String>> = bounded(self.command_timeout, async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let inserted: Option<String> = redis::cmd("SET")
                .arg(&key)
                .arg(json)
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_seconds)
                .query_async(&mut conn)
                .await?;

            if inserted.is_some() {
                return Ok(None);
            }
            Ok(Some(conn.get(&key).await?))
        })
        .await?;

        match existing {
            None => {
                tracing::debug!(key = %key, ttl = self.ttl_seconds, "Stored verification record");
                Ok(None)
            }
            Some(data) => data.as_deref().map(decode).transpose(),
        }
    }

    async fn remove(&self, digest: &ContentDigest) -> Result<(), StoreError> {
        bounded(self.command_timeout, async {
            let mut conn = self.client.get_multiplexed_async_connection().await?;
            let _: () = conn.del(Self::key(digest)).await?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
