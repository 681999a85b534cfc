//! Optional memoization of parsed JDs and mapping matrices.
//!
//! Purely an optimization: any read failure is logged and handled as a miss, any write
//! failure is logged and ignored, so a run behaves identically with or without a cache.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cached entries expire after a week; the mapping key also changes with the KB version.
pub const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

#[async_trait]
pub trait PipelineCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &str, value: String) -> Result<(), CacheError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Keys
// ────────────────────────────────────────────────────────────────────────────

/// First 16 hex chars of sha256 over the trimmed JD text.
pub fn jd_hash(jd_text: &str) -> String {
    let digest = Sha256::digest(jd_text.trim().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

pub fn parsed_jd_key(jd_text: &str) -> String {
    format!("parsed_jd:{}", jd_hash(jd_text))
}

pub fn mapping_key(jd_text: &str, kb_version: &str) -> String {
    format!("mapping:{}:{}", jd_hash(jd_text), kb_version)
}

// ────────────────────────────────────────────────────────────────────────────
// Typed helpers (failures degrade to misses)
// ────────────────────────────────────────────────────────────────────────────

pub async fn get_json<T: DeserializeOwned>(cache: &dyn PipelineCache, key: &str) -> Option<T> {
    let raw = match cache.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            debug!(key, "cache miss");
            return None;
        }
        Err(e) => {
            warn!(key, "cache read failed, treating as miss: {e}");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(value) => {
            debug!(key, "cache hit");
            Some(value)
        }
        Err(e) => {
            warn!(key, "cached value is unreadable, treating as miss: {e}");
            None
        }
    }
}

pub async fn put_json<T: Serialize + Sync>(cache: &dyn PipelineCache, key: &str, value: &T) {
    let raw = match serde_json::to_string(value) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(key, "failed to encode value for cache: {e}");
            return;
        }
    };
    if let Err(e) = cache.put(key, raw).await {
        warn!(key, "cache write failed: {e}");
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Backends
// ────────────────────────────────────────────────────────────────────────────

/// Process-local cache. Entries live as long as the process.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: String) -> Result<(), CacheError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }
}

pub struct RedisCache {
    conn: MultiplexedConnection,
    ttl_secs: u64,
}

impl RedisCache {
    pub async fn connect(redis_url: &str, ttl_secs: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn, ttl_secs })
    }
}

#[async_trait]
impl PipelineCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: String) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, self.ttl_secs).await?;
        Ok(())
    }
}
