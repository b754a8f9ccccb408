//! Persistence configuration.
//!
//! Deserialized by the `config` crate as the `persistence` section of the
//! application configuration. Every field has a default, so an empty section
//! yields a working file-backed setup under `data/`.

use parley_conversation::{DEFAULT_CONTEXT_WINDOW_SIZE, DEFAULT_MAX_CONVERSATIONS_PER_USER, StoreLimits};
use parley_storage::PoolSettings;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which storage backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JSON files under `storage_dir`.
    #[serde(alias = "json")]
    File,
    /// SQL tables at `database_url`.
    #[serde(alias = "database")]
    Relational,
}

/// Persistence settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Whether conversations are stored at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Root directory of the file backend.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Connection URL of the relational backend.
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Conversations kept per user before archived ones are evicted.
    /// Zero disables the cap.
    #[serde(default = "default_max_conversations_per_user")]
    pub max_conversations_per_user: usize,

    #[serde(default = "default_context_window_size")]
    pub context_window_size: usize,

    /// Message count at which summarization starts.
    #[serde(default = "default_auto_summarize_threshold")]
    pub auto_summarize_threshold: usize,

    /// Age in days after which archived conversations are deleted.
    #[serde(default = "default_cleanup_old_data_days")]
    pub cleanup_old_data_days: u32,

    /// Lifetime of file-backend cache entries, in seconds. Zero disables the
    /// cache.
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,

    #[serde(default)]
    pub pool: PoolConfig,
}

/// Relational connection pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,

    #[serde(default = "default_idle_timeout_seconds")]
    pub idle_timeout_seconds: u64,

    /// Connections are recycled after this many seconds.
    #[serde(default = "default_max_lifetime_seconds")]
    pub max_lifetime_seconds: u64,
}

fn default_enabled() -> bool {
    true
}

fn default_backend() -> BackendKind {
    BackendKind::File
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from("data/conversations")
}

fn default_database_url() -> String {
    "sqlite://data/conversations.db".to_string()
}

fn default_max_conversations_per_user() -> usize {
    DEFAULT_MAX_CONVERSATIONS_PER_USER
}

fn default_context_window_size() -> usize {
    DEFAULT_CONTEXT_WINDOW_SIZE
}

fn default_auto_summarize_threshold() -> usize {
    50
}

fn default_cleanup_old_data_days() -> u32 {
    30
}

fn default_cache_ttl_seconds() -> u64 {
    30 * 60
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_seconds() -> u64 {
    5
}

fn default_idle_timeout_seconds() -> u64 {
    600
}

fn default_max_lifetime_seconds() -> u64 {
    3600
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            backend: default_backend(),
            storage_dir: default_storage_dir(),
            database_url: default_database_url(),
            max_conversations_per_user: default_max_conversations_per_user(),
            context_window_size: default_context_window_size(),
            auto_summarize_threshold: default_auto_summarize_threshold(),
            cleanup_old_data_days: default_cleanup_old_data_days(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
            idle_timeout_seconds: default_idle_timeout_seconds(),
            max_lifetime_seconds: default_max_lifetime_seconds(),
        }
    }
}

impl PersistenceConfig {
    /// Limits applied by the storage backend.
    #[must_use]
    pub fn limits(&self) -> StoreLimits {
        StoreLimits {
            context_window_size: self.context_window_size,
            max_conversations_per_user: self.max_conversations_per_user,
        }
    }

    /// File-backend cache lifetime, or `None` when caching is off.
    #[must_use]
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_seconds > 0).then(|| Duration::from_secs(self.cache_ttl_seconds))
    }
}

impl PoolConfig {
    /// Converts to the storage crate's pool settings.
    #[must_use]
    pub fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_seconds),
            idle_timeout: Duration::from_secs(self.idle_timeout_seconds),
            max_lifetime: Duration::from_secs(self.max_lifetime_seconds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(overrides: &[(&str, &str)]) -> PersistenceConfig {
        let mut builder = config::Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).expect("override");
        }
        builder
            .build()
            .expect("build")
            .try_deserialize()
            .expect("deserialize")
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PersistenceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.storage_dir, PathBuf::from("data/conversations"));
        assert_eq!(config.database_url, "sqlite://data/conversations.db");
        assert_eq!(config.max_conversations_per_user, 100);
        assert_eq!(config.context_window_size, 10);
        assert_eq!(config.auto_summarize_threshold, 50);
        assert_eq!(config.cleanup_old_data_days, 30);
        assert_eq!(config.cache_ttl(), Some(Duration::from_secs(1800)));
        assert_eq!(config.pool.settings(), PoolSettings::default());
    }

    #[test]
    fn empty_source_uses_defaults() {
        let config = load(&[]);
        assert!(config.enabled);
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.pool.max_lifetime_seconds, 3600);
    }

    #[test]
    fn backend_aliases() {
        for (raw, expected) in [
            ("file", BackendKind::File),
            ("json", BackendKind::File),
            ("relational", BackendKind::Relational),
            ("database", BackendKind::Relational),
        ] {
            assert_eq!(load(&[("backend", raw)]).backend, expected, "{raw}");
        }
    }

    #[test]
    fn zero_ttl_disables_cache() {
        let config = load(&[("cache_ttl_seconds", "0")]);
        assert_eq!(config.cache_ttl(), None);
    }
}
