//! Cache store backends.
//!
//! This module provides the store contract and two implementations:
//! - **InMemoryBackend**: process-local store on a sharded map, for tests and
//!   single-replica deployments
//! - **RedisBackend**: the shared store used across replicas
//!
//! Values are opaque bytes. Both backends support deleting every key under a
//! prefix, which is what list invalidation relies on.

use crate::cache::key::KEY_FAMILIES;
use crate::error::{AegisError, ErrorCode, Result};
use crate::telemetry::redact_url;
use async_trait::async_trait;
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Statistics
// ═══════════════════════════════════════════════════════════════════════════════

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Total number of entries
    pub entries: u64,

    /// Eviction count
    pub evictions: u64,

    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,

    /// Backend-specific stats
    pub backend_stats: HashMap<String, String>,
}

impl CacheStats {
    /// Calculate the hit rate.
    pub fn calculate_hit_rate(&mut self) {
        let total = self.hits + self.misses;
        self.hit_rate = if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        };
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache Backend Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Key/value store with TTLs and prefix deletion.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value. `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value for `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete several keys, returning how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete every key starting with `prefix`.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64>;

    /// Check if a live key exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats>;

    /// Remove every entry this crate's key families own.
    async fn clear(&self) -> Result<()>;

    /// Get the backend name.
    fn name(&self) -> &'static str;
}

// ═══════════════════════════════════════════════════════════════════════════════
// In-Memory Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the in-memory store.
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    /// Maximum number of entries
    pub max_capacity: u64,

    /// Shard count for concurrent access (power of 2)
    pub shard_count: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            shard_count: 16,
        }
    }
}

struct InMemoryEntry {
    data: Vec<u8>,
    inserted_at: Instant,
    expires_at: Instant,
}

impl InMemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local cache store.
pub struct InMemoryBackend {
    entries: DashMap<String, InMemoryEntry>,
    config: InMemoryConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryBackend {
    /// Create a new in-memory backend.
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            entries: DashMap::with_shard_amount(config.shard_count),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn cleanup_expired(&self) -> u64 {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len()) as u64;

        if removed > 0 {
            debug!("Cleaned up {} expired cache entries", removed);
        }
        removed
    }

    /// Make room when at capacity: expired entries go first, then the oldest tenth.
    fn maybe_evict(&self) {
        if (self.entries.len() as u64) < self.config.max_capacity {
            return;
        }

        self.cleanup_expired();
        if (self.entries.len() as u64) < self.config.max_capacity {
            return;
        }

        let to_evict = (self.config.max_capacity / 10).max(1) as usize;
        let mut by_age: Vec<(Instant, String)> = self
            .entries
            .iter()
            .map(|e| (e.value().inserted_at, e.key().clone()))
            .collect();
        by_age.sort();

        let mut evicted = 0u64;
        for (_, key) in by_age.into_iter().take(to_evict) {
            if self.entries.remove(&key).is_some() {
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        counter!("cache_evictions_total", "backend" => "in_memory").increment(evicted);
        debug!("Evicted {} entries from cache", evicted);
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl CacheBackend for InMemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        let found = match self.entries.get(key) {
            Some(entry) if entry.is_expired(now) => None,
            Some(entry) => Some(entry.data.clone()),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total", "backend" => "in_memory", "reason" => "not_found").increment(1);
                return Ok(None);
            }
        };

        match found {
            Some(data) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cache_hits_total", "backend" => "in_memory").increment(1);
                Ok(Some(data))
            }
            None => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cache_misses_total", "backend" => "in_memory", "reason" => "expired").increment(1);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        if !self.entries.contains_key(key) {
            self.maybe_evict();
        }

        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            InMemoryEntry {
                data: value.to_vec(),
                inserted_at: now,
                expires_at: now + ttl,
            },
        );

        counter!("cache_sets_total", "backend" => "in_memory").increment(1);
        histogram!("cache_entry_size_bytes", "backend" => "in_memory").record(value.len() as f64);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        match self.entries.remove(key) {
            Some((_, entry)) => {
                counter!("cache_deletes_total", "backend" => "in_memory").increment(1);
                Ok(!entry.is_expired(now))
            }
            None => Ok(false),
        }
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let now = Instant::now();
        let mut deleted = 0u64;
        self.entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
                false
            } else {
                true
            }
        });

        counter!("cache_deletes_total", "backend" => "in_memory").increment(deleted);
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .map(|entry| !entry.is_expired(now))
            .unwrap_or(false))
    }

    async fn stats(&self) -> Result<CacheStats> {
        let entries = self.entries.len() as u64;
        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: 0.0,
            backend_stats: HashMap::new(),
        };
        stats.calculate_hit_rate();
        stats
            .backend_stats
            .insert("max_capacity".to_string(), self.config.max_capacity.to_string());

        gauge!("cache_entries", "backend" => "in_memory").set(entries as f64);
        gauge!("cache_hit_rate", "backend" => "in_memory").set(stats.hit_rate);

        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        self.entries.clear();
        counter!("cache_clears_total", "backend" => "in_memory").increment(1);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Redis Backend
// ═══════════════════════════════════════════════════════════════════════════════

/// Configuration for the Redis store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix added in front of every key. Empty keeps keys readable by other
    /// services sharing the store.
    #[serde(default)]
    pub key_prefix: String,

    /// Connection timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Per-command timeout
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    /// COUNT hint for SCAN during prefix sweeps
    #[serde(default = "default_scan_count")]
    pub scan_count: usize,
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_scan_count() -> usize {
    1000
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
            connect_timeout: default_connect_timeout(),
            command_timeout: default_command_timeout(),
            scan_count: default_scan_count(),
        }
    }
}

/// Redis cache backend.
pub struct RedisBackend {
    conn: redis::aio::ConnectionManager,
    config: RedisConfig,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RedisBackend {
    /// Connect and verify the server answers PING.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| {
            AegisError::with_internal(
                ErrorCode::CacheConnectionFailed,
                "Failed to create Redis client",
                e.to_string(),
            )
        })?;

        let mut conn = tokio::time::timeout(config.connect_timeout, redis::aio::ConnectionManager::new(client))
            .await
            .map_err(|_| {
                AegisError::new(ErrorCode::CacheConnectionFailed, "Timed out connecting to Redis")
            })?
            .map_err(|e| {
                AegisError::with_internal(
                    ErrorCode::CacheConnectionFailed,
                    "Failed to connect to Redis",
                    e.to_string(),
                )
            })?;

        let _: String = redis::cmd("PING").query_async(&mut conn).await.map_err(|e| {
            AegisError::with_internal(ErrorCode::CacheConnectionFailed, "Redis ping failed", e.to_string())
        })?;

        info!(url = %redact_url(&config.url), "Redis cache backend connected");

        Ok(Self {
            conn,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Run a command under the configured command timeout.
    async fn timed<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.command_timeout, fut).await {
            Ok(result) => result.map_err(AegisError::from),
            Err(elapsed) => Err(AegisError::from(elapsed)),
        }
    }

    /// SCAN for keys under `prefix` and delete them batch by batch.
    async fn sweep(&self, prefix: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", escape_glob(&self.full_key(prefix)));
        let mut cursor: u64 = 0;
        let mut total_deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .timed(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(self.config.scan_count)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let deleted: u64 = self.timed(conn.del(&keys)).await?;
                total_deleted += deleted;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        Ok(total_deleted)
    }
}

/// Escape Redis glob metacharacters so a literal prefix can be used in MATCH.
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let data: Option<Vec<u8>> = self.timed(conn.get(self.full_key(key))).await?;

        if data.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!("cache_hits_total", "backend" => "redis").increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("cache_misses_total", "backend" => "redis", "reason" => "not_found").increment(1);
        }
        Ok(data)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let ttl_secs = ttl.as_secs().max(1);

        self.timed(conn.set_ex::<_, _, ()>(self.full_key(key), value, ttl_secs))
            .await?;

        counter!("cache_sets_total", "backend" => "redis").increment(1);
        histogram!("cache_entry_size_bytes", "backend" => "redis").record(value.len() as f64);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self.timed(conn.del(self.full_key(key))).await?;

        if deleted > 0 {
            counter!("cache_deletes_total", "backend" => "redis").increment(1);
        }
        Ok(deleted > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let full_keys: Vec<String> = keys.iter().map(|k| self.full_key(k)).collect();
        let deleted: u64 = self.timed(conn.del(&full_keys)).await?;

        counter!("cache_deletes_total", "backend" => "redis").increment(deleted);
        Ok(deleted)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64> {
        let deleted = self.sweep(prefix).await?;
        counter!("cache_deletes_total", "backend" => "redis").increment(deleted);
        debug!(prefix = %prefix, deleted, "Swept Redis keys by prefix");
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        self.timed(conn.exists(self.full_key(key))).await
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut conn = self.conn.clone();

        let info: String = self
            .timed(redis::cmd("INFO").arg("memory").query_async(&mut conn))
            .await?;

        let mut backend_stats = HashMap::new();
        for line in info.lines() {
            if let Some(value) = line.strip_prefix("used_memory_human:") {
                backend_stats.insert("used_memory_human".to_string(), value.trim().to_string());
            }
        }

        let dbsize: u64 = self.timed(redis::cmd("DBSIZE").query_async(&mut conn)).await?;

        let mut stats = CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: dbsize,
            evictions: 0,
            hit_rate: 0.0,
            backend_stats,
        };
        stats.calculate_hit_rate();

        gauge!("cache_entries", "backend" => "redis").set(dbsize as f64);
        gauge!("cache_hit_rate", "backend" => "redis").set(stats.hit_rate);

        Ok(stats)
    }

    async fn clear(&self) -> Result<()> {
        let mut total_deleted = 0;
        for family in KEY_FAMILIES {
            total_deleted += self.sweep(family).await?;
        }

        info!("Cleared {} Redis cache entries", total_deleted);
        counter!("cache_clears_total", "backend" => "redis").increment(1);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_in_memory_backend() {
        let backend = InMemoryBackend::default();

        backend.set("case:t1:c1:header", b"value", MINUTE).await.unwrap();
        assert_eq!(
            backend.get("case:t1:c1:header").await.unwrap(),
            Some(b"value".to_vec())
        );
        assert!(backend.exists("case:t1:c1:header").await.unwrap());

        assert!(backend.delete("case:t1:c1:header").await.unwrap());
        assert!(!backend.delete("case:t1:c1:header").await.unwrap());
        assert_eq!(backend.get("case:t1:c1:header").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_memory_expiry() {
        let backend = InMemoryBackend::default();
        backend.set("k", b"v", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(backend.get("k").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backend.get("k").await.unwrap().is_none());
        assert!(!backend.exists("k").await.unwrap());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_delete_by_prefix() {
        let backend = InMemoryBackend::default();
        backend.set("cases:t1:active:q=aa", b"1", MINUTE).await.unwrap();
        backend.set("cases:t1:active:q=bb", b"2", MINUTE).await.unwrap();
        backend.set("cases:t1:closed:q=cc", b"3", MINUTE).await.unwrap();

        let deleted = backend.delete_by_prefix("cases:t1:active:q=").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(backend.keys(), vec!["cases:t1:closed:q=cc".to_string()]);
    }

    #[tokio::test]
    async fn test_in_memory_delete_many() {
        let backend = InMemoryBackend::default();
        backend.set("a", b"1", MINUTE).await.unwrap();
        backend.set("b", b"2", MINUTE).await.unwrap();

        let deleted = backend
            .delete_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 2);
    }

    #[tokio::test]
    async fn test_in_memory_eviction() {
        let backend = InMemoryBackend::new(InMemoryConfig {
            max_capacity: 10,
            ..Default::default()
        });

        for i in 0..15 {
            backend.set(&format!("key-{i}"), b"v", MINUTE).await.unwrap();
        }

        assert!(backend.len() <= 10);
        let stats = backend.stats().await.unwrap();
        assert!(stats.evictions > 0);
        // the newest entry always survives
        assert!(backend.exists("key-14").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_stats() {
        let backend = InMemoryBackend::default();
        backend.set("k", b"v", MINUTE).await.unwrap();
        backend.get("k").await.unwrap();
        backend.get("missing").await.unwrap();

        let stats = backend.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_escape_glob() {
        assert_eq!(escape_glob("cases:t1:active:q="), "cases:t1:active:q=");
        assert_eq!(escape_glob("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn test_redis_config_defaults() {
        let config = RedisConfig::default();
        assert!(config.key_prefix.is_empty());
        assert_eq!(config.scan_count, 1000);
        assert_eq!(config.command_timeout, Duration::from_secs(2));
    }
}
