//! Tenant-scoped caching for case and evidence views.
//!
//! This module provides:
//!
//! - **Query signatures**: canonical encoding of list-query parameters
//! - **Typed keys**: key derivation in the formats shared with other services
//! - **Backends**: in-memory and Redis stores behind one trait
//! - **Invalidation**: exact deletes and prefix sweeps after mutations
//! - **Facade**: JSON get/set and read-through population
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                          Cache Layer                           │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────────┐  │
//! │  │  ListQuery   │──▶│   CacheKey   │◀──│  CacheInvalidator  │  │
//! │  │  signature   │   │  KeyPrefix   │   │  (events, sweeps)  │  │
//! │  └──────────────┘   └──────┬───────┘   └─────────┬──────────┘  │
//! │                            ▼                     ▼             │
//! │  ┌──────────────────────────────────────────────────────────┐  │
//! │  │                   CacheBackend Trait                     │  │
//! │  └───────────────┬──────────────────────────┬───────────────┘  │
//! │                  ▼                          ▼                  │
//! │         ┌────────────────┐         ┌────────────────┐          │
//! │         │   In-Memory    │         │     Redis      │          │
//! │         └────────────────┘         └────────────────┘          │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use aegis_core::cache::{Cache, CacheKey, ListQuery, ListScope, TenantId};
//!
//! let cache = Cache::in_memory(10_000);
//! let tenant = TenantId::new("t1")?;
//! let sig = ListQuery::new().filter("status", ["open"]).signature();
//! let key = CacheKey::list(&tenant, ListScope::Active, &sig);
//!
//! let cases: Vec<CaseSummary> = cache
//!     .get_or_load(&key, || async { repo.list_cases(&tenant).await })
//!     .await?;
//! ```

pub mod backend;
pub mod invalidation;
pub mod key;
pub mod signature;

pub use backend::{
    CacheBackend, CacheStats, InMemoryBackend, InMemoryConfig, RedisBackend, RedisConfig,
};
pub use invalidation::{
    CacheInvalidator, InvalidationEvent, InvalidationLogEntry, InvalidationReport,
    DEFAULT_SWEEP_TIMEOUT,
};
pub use key::{CacheKey, KeyPrefix, KeyType, ListScope, TenantId};
pub use signature::{ListQuery, QuerySignature, SortOrder};

use crate::config::{CacheBackendKind, CacheSettings};
use crate::error::{AegisError, ErrorCode, Result};
use metrics::counter;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Configuration
// ═══════════════════════════════════════════════════════════════════════════════

/// Runtime settings of the cache facade.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on each single-key store call
    pub command_timeout: Duration,

    /// Upper bound on one prefix sweep during invalidation
    pub sweep_timeout: Duration,

    /// Maximum entry size in bytes
    pub max_entry_size: usize,

    /// TTLs replacing a key type's default
    pub ttl_overrides: HashMap<KeyType, Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(2),
            sweep_timeout: DEFAULT_SWEEP_TIMEOUT,
            max_entry_size: 1024 * 1024, // 1 MB
            ttl_overrides: HashMap::new(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// TTL applied to a key of the given type.
    pub fn ttl_for(&self, key_type: KeyType) -> Duration {
        self.ttl_overrides
            .get(&key_type)
            .copied()
            .unwrap_or_else(|| key_type.default_ttl())
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        Self {
            command_timeout: settings.command_timeout,
            sweep_timeout: settings.sweep_timeout,
            max_entry_size: settings.max_entry_size,
            ttl_overrides: settings.ttl_overrides(),
        }
    }
}

/// Builder for cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn sweep_timeout(mut self, timeout: Duration) -> Self {
        self.config.sweep_timeout = timeout;
        self
    }

    pub fn max_entry_size(mut self, size: usize) -> Self {
        self.config.max_entry_size = size;
        self
    }

    pub fn ttl(mut self, key_type: KeyType, ttl: Duration) -> Self {
        self.config.ttl_overrides.insert(key_type, ttl);
        self
    }

    pub fn build(self) -> CacheConfig {
        self.config
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Cache Interface
// ═══════════════════════════════════════════════════════════════════════════════

/// JSON cache over a [`CacheBackend`], sharing the store with its invalidator.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    config: Arc<CacheConfig>,
    invalidator: Arc<CacheInvalidator>,
}

impl Cache {
    /// Create a new cache with the given backend.
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        let invalidator = CacheInvalidator::new(backend.clone(), config.command_timeout)
            .with_sweep_timeout(config.sweep_timeout)
            .with_evidence_count_ttl(config.ttl_for(KeyType::EvidenceCount));
        Self {
            backend,
            config: Arc::new(config),
            invalidator: Arc::new(invalidator),
        }
    }

    /// Create an in-memory cache.
    pub fn in_memory(max_capacity: u64) -> Self {
        let backend = Arc::new(InMemoryBackend::new(InMemoryConfig {
            max_capacity,
            ..Default::default()
        }));
        Self::new(backend, CacheConfig::default())
    }

    /// Create a Redis-backed cache.
    pub async fn redis(url: &str) -> Result<Self> {
        let backend = Arc::new(
            RedisBackend::new(RedisConfig {
                url: url.to_string(),
                ..Default::default()
            })
            .await?,
        );
        Ok(Self::new(backend, CacheConfig::default()))
    }

    /// Build the cache described by configuration, connecting to Redis if selected.
    pub async fn from_settings(settings: &CacheSettings) -> Result<Self> {
        let backend: Arc<dyn CacheBackend> = match settings.backend {
            CacheBackendKind::InMemory => Arc::new(InMemoryBackend::new(settings.in_memory_config())),
            CacheBackendKind::Redis => Arc::new(RedisBackend::new(settings.redis.clone()).await?),
        };

        info!(backend = backend.name(), "Cache initialized");
        Ok(Self::new(backend, CacheConfig::from(settings)))
    }

    /// Get a value from the cache.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        match self.bounded(self.backend.get(key.as_str())).await? {
            Some(data) => {
                let value: T = serde_json::from_slice(&data).map_err(|e| {
                    AegisError::with_internal(
                        ErrorCode::DeserializationError,
                        "Failed to deserialize cached value",
                        e.to_string(),
                    )
                })?;
                debug!("Cache hit for key: {}", key);
                Ok(Some(value))
            }
            None => {
                debug!("Cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    /// Set a value in the cache with the key type's TTL.
    pub async fn set_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let ttl = self.config.ttl_for(key.key_type());
        self.set_json_with_ttl(key, value, ttl).await
    }

    /// Set a value in the cache with a specific TTL.
    #[instrument(skip(self, value), fields(key = %key, ttl_secs = ttl.as_secs()))]
    pub async fn set_json_with_ttl<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let data = serde_json::to_vec(value).map_err(|e| {
            AegisError::with_internal(
                ErrorCode::SerializationError,
                "Failed to serialize value for cache",
                e.to_string(),
            )
        })?;

        if data.len() > self.config.max_entry_size {
            return Err(AegisError::invalid_input(format!(
                "Cache entry size {} exceeds maximum {}",
                data.len(),
                self.config.max_entry_size
            )));
        }

        self.bounded(self.backend.set(key.as_str(), &data, ttl)).await?;
        debug!("Cache set for key: {} with TTL: {:?}", key, ttl);
        Ok(())
    }

    /// Delete a value from the cache.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let deleted = self.bounded(self.backend.delete(key.as_str())).await?;
        debug!("Cache delete for key: {} - deleted: {}", key, deleted);
        Ok(deleted)
    }

    /// Check if a key exists in the cache.
    pub async fn exists(&self, key: &CacheKey) -> Result<bool> {
        self.bounded(self.backend.exists(key.as_str())).await
    }

    /// Read-through: return the cached value or load, populate and return it.
    ///
    /// Store failures on the probe or the populate are logged and treated as a
    /// miss; only the loader's error is returned. An undecodable cached value
    /// is dropped and reloaded.
    #[instrument(skip(self, loader), fields(key = %key))]
    pub async fn get_or_load<T, F, Fut>(&self, key: &CacheKey, loader: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.get_json::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.code() == ErrorCode::DeserializationError => {
                warn!(error = %e, "Dropping undecodable cache entry");
                if let Err(e) = self.delete(key).await {
                    warn!(error = %e, "Failed to drop undecodable cache entry");
                }
            }
            Err(e) => warn!(error = %e, "Cache probe failed, loading from source"),
        }

        let value = loader().await?;

        if let Err(e) = self.set_json(key, &value).await {
            counter!("cache_populate_failures_total", "key_type" => key.key_type().as_str())
                .increment(1);
            warn!(error = %e, "Failed to populate cache");
        }
        Ok(value)
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.bounded(self.backend.stats()).await
    }

    /// The invalidator sharing this cache's store.
    pub fn invalidator(&self) -> Arc<CacheInvalidator> {
        self.invalidator.clone()
    }

    /// The underlying store.
    pub fn backend(&self) -> Arc<dyn CacheBackend> {
        self.backend.clone()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => result,
            Err(elapsed) => Err(AegisError::from(elapsed)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CaseHeader {
        id: String,
        stage: String,
    }

    fn header_key() -> CacheKey {
        CacheKey::case_header(&TenantId::new("t1").unwrap(), "c1")
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let cache = Cache::in_memory(100);
        let value = CaseHeader {
            id: "c1".into(),
            stage: "analysis".into(),
        };

        cache.set_json(&header_key(), &value).await.unwrap();
        let cached: Option<CaseHeader> = cache.get_json(&header_key()).await.unwrap();
        assert_eq!(cached, Some(value));

        assert!(cache.delete(&header_key()).await.unwrap());
        assert!(!cache.exists(&header_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_load_populates_once() {
        let cache = Cache::in_memory(100);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Vec<String> = cache
                .get_or_load(&header_key(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["c1".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(value, vec!["c1"]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_or_load_propagates_loader_error() {
        let cache = Cache::in_memory(100);
        let result: Result<Vec<String>> = cache
            .get_or_load(&header_key(), || async { Err(AegisError::internal("boom")) })
            .await;

        assert_eq!(result.unwrap_err().code(), ErrorCode::InternalError);
        assert!(!cache.exists(&header_key()).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_or_load_replaces_undecodable_entry() {
        let cache = Cache::in_memory(100);
        cache
            .backend()
            .set(header_key().as_str(), b"not json", Duration::from_secs(60))
            .await
            .unwrap();

        let value: u32 = cache.get_or_load(&header_key(), || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(cache.get_json::<u32>(&header_key()).await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn test_entry_size_limit() {
        let backend = Arc::new(InMemoryBackend::default());
        let cache = Cache::new(backend, CacheConfig::builder().max_entry_size(8).build());

        let err = cache.set_json(&header_key(), &"a long string value").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_ttl_overrides() {
        let config = CacheConfig::builder()
            .ttl(KeyType::CaseList, Duration::from_secs(10))
            .build();
        assert_eq!(config.ttl_for(KeyType::CaseList), Duration::from_secs(10));
        assert_eq!(config.ttl_for(KeyType::DashboardTotals), Duration::from_secs(60));
    }
}
