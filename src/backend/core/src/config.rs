//! Configuration management.
//!
//! Settings are read from an optional file and from `AEGIS__`-prefixed
//! environment variables, e.g. `AEGIS__CACHE__BACKEND=redis` or
//! `AEGIS__LIFECYCLE__STATUS_UPDATE_ROLES=Admin,Tenant Admin`.

use crate::cache::backend::{InMemoryConfig, RedisConfig};
use crate::cache::key::KeyType;
use crate::case::transition::TransitionPolicy;
use crate::error::{AegisError, Result};
use crate::telemetry::LoggingConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "AEGIS";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deployment environment name (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Cache configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Database configuration
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Case lifecycle configuration
    #[serde(default)]
    pub lifecycle: LifecycleSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            cache: CacheSettings::default(),
            database: None,
            lifecycle: LifecycleSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Cache
// ═══════════════════════════════════════════════════════════════════════════════

/// Which store backs the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    InMemory,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Store backing the cache
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Redis settings, used when `backend = "redis"`
    #[serde(default)]
    pub redis: RedisConfig,

    /// Entry bound for the in-memory store
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,

    /// Upper bound on every single-key store call made by the core
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,

    /// Upper bound on a whole prefix sweep (SCAN plus DEL batches)
    #[serde(default = "default_sweep_timeout", with = "humantime_serde")]
    pub sweep_timeout: Duration,

    /// Largest serialized value the facade will store
    #[serde(default = "default_max_entry_size")]
    pub max_entry_size: usize,

    /// TTL overrides per key type, e.g. `case_list = "30s"`
    #[serde(default)]
    pub ttl: HashMap<KeyType, HumanDuration>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            redis: RedisConfig::default(),
            max_capacity: default_max_capacity(),
            command_timeout: default_command_timeout(),
            sweep_timeout: default_sweep_timeout(),
            max_entry_size: default_max_entry_size(),
            ttl: HashMap::new(),
        }
    }
}

impl CacheSettings {
    pub fn in_memory_config(&self) -> InMemoryConfig {
        InMemoryConfig {
            max_capacity: self.max_capacity,
            ..Default::default()
        }
    }

    /// TTL for a key type, honouring overrides.
    pub fn ttl_for(&self, key_type: KeyType) -> Duration {
        self.ttl
            .get(&key_type)
            .map(|d| d.0)
            .unwrap_or_else(|| key_type.default_ttl())
    }

    /// Resolved TTL table.
    pub fn ttl_overrides(&self) -> HashMap<KeyType, Duration> {
        self.ttl.iter().map(|(k, v)| (*k, v.0)).collect()
    }
}

/// Duration parsed from a humantime string such as `"90s"` or `"2m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct HumanDuration(#[serde(with = "humantime_serde")] pub Duration);

// ═══════════════════════════════════════════════════════════════════════════════
// Database
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Time to wait for a pooled connection
    #[serde(default = "default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct LifecycleSettings {
    /// Roles allowed to change case status
    #[serde(default = "default_status_update_roles")]
    pub status_update_roles: Vec<String>,

    /// When non-empty, the only status values accepted
    #[serde(default)]
    pub allowed_statuses: Vec<String>,

    /// Stage transition policy
    #[serde(default)]
    pub transition_policy: TransitionPolicy,

    /// Upper bound on each repository call
    #[serde(default = "default_repository_timeout", with = "humantime_serde")]
    pub repository_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            status_update_roles: default_status_update_roles(),
            allowed_statuses: Vec::new(),
            transition_policy: TransitionPolicy::default(),
            repository_timeout: default_repository_timeout(),
        }
    }
}

fn default_environment() -> String { "development".to_string() }
fn default_max_capacity() -> u64 { 10_000 }
fn default_command_timeout() -> Duration { Duration::from_secs(2) }
fn default_sweep_timeout() -> Duration { Duration::from_secs(30) }
fn default_max_entry_size() -> usize { 1024 * 1024 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_acquire_timeout() -> Duration { Duration::from_secs(5) }
fn default_status_update_roles() -> Vec<String> { vec!["Admin".to_string()] }
fn default_repository_timeout() -> Duration { Duration::from_secs(5) }

// ═══════════════════════════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════════════════════════

impl Config {
    /// Load configuration from the environment.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with the environment layered on top.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment())
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.cache.command_timeout.is_zero() {
            return Err(AegisError::configuration("cache.command_timeout must be non-zero"));
        }
        if self.cache.sweep_timeout < self.cache.command_timeout {
            return Err(AegisError::configuration(
                "cache.sweep_timeout must not be shorter than cache.command_timeout",
            ));
        }
        if self.cache.backend == CacheBackendKind::InMemory && self.cache.max_capacity == 0 {
            return Err(AegisError::configuration("cache.max_capacity must be non-zero"));
        }
        if self.cache.backend == CacheBackendKind::Redis && self.cache.redis.url.trim().is_empty() {
            return Err(AegisError::configuration("cache.redis.url is required for the redis backend"));
        }
        if let Some((key_type, _)) = self.cache.ttl.iter().find(|(_, ttl)| ttl.0.is_zero()) {
            return Err(AegisError::configuration(format!(
                "cache.ttl.{} must be non-zero",
                key_type
            )));
        }
        if self.lifecycle.status_update_roles.iter().all(|r| r.trim().is_empty()) {
            return Err(AegisError::configuration(
                "lifecycle.status_update_roles must name at least one role",
            ));
        }
        if self.lifecycle.repository_timeout.is_zero() {
            return Err(AegisError::configuration("lifecycle.repository_timeout must be non-zero"));
        }
        if let Some(db) = &self.database {
            if db.min_connections > db.max_connections {
                return Err(AegisError::configuration(
                    "database.min_connections exceeds database.max_connections",
                ));
            }
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("lifecycle.status_update_roles")
        .with_list_parse_key("lifecycle.allowed_statuses")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.cache.backend, CacheBackendKind::InMemory);
        assert_eq!(config.lifecycle.status_update_roles, vec!["Admin"]);
        assert!(config.lifecycle.allowed_statuses.is_empty());
        assert_eq!(config.lifecycle.transition_policy, TransitionPolicy::Permissive);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let file = write_config(
            r#"
environment = "staging"

[cache]
backend = "redis"
command_timeout = "500ms"
sweep_timeout = "10s"

[cache.redis]
url = "redis://cache:6379/2"

[cache.ttl]
case_list = "30s"

[lifecycle]
status_update_roles = ["Admin", "Tenant Admin"]
allowed_statuses = ["open", "closed"]
transition_policy = "forward"
repository_timeout = "3s"
"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.environment, "staging");
        assert_eq!(config.cache.backend, CacheBackendKind::Redis);
        assert_eq!(config.cache.redis.url, "redis://cache:6379/2");
        assert_eq!(config.cache.command_timeout, Duration::from_millis(500));
        assert_eq!(config.cache.sweep_timeout, Duration::from_secs(10));
        assert_eq!(config.cache.ttl_for(KeyType::CaseList), Duration::from_secs(30));
        assert_eq!(config.cache.ttl_for(KeyType::CaseHeader), Duration::from_secs(300));
        assert_eq!(config.lifecycle.status_update_roles, vec!["Admin", "Tenant Admin"]);
        assert_eq!(config.lifecycle.transition_policy, TransitionPolicy::Forward);
        assert_eq!(config.lifecycle.repository_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_validation_rejects_zero_ttl() {
        let file = write_config(
            r#"
[cache.ttl]
case_header = "0s"
"#,
        );
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("case_header"));
    }

    #[test]
    fn test_sweep_timeout_defaults_and_bounds() {
        let config = Config::default();
        assert_eq!(config.cache.sweep_timeout, Duration::from_secs(30));
        assert_eq!(
            crate::cache::CacheConfig::from(&config.cache).sweep_timeout,
            Duration::from_secs(30)
        );

        let mut config = Config::default();
        config.cache.sweep_timeout = Duration::from_secs(1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("sweep_timeout"));
    }

    #[test]
    fn test_validation_rejects_empty_roles() {
        let mut config = Config::default();
        config.lifecycle.status_update_roles = vec![" ".to_string()];
        assert!(config.validate().is_err());
    }
}
