//! Centralized application configuration.
//!
//! Loaded via the `config` crate from an optional `parley.toml` (or any
//! format `config` understands under the base name `parley`) and from
//! `PARLEY_`-prefixed environment variables, with `__` separating nested
//! keys: `PARLEY_PERSISTENCE__BACKEND=relational`.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError};
use parley_ai::{AssistantConfig, LlmBackendConfig};
use parley_persistence::PersistenceConfig;
use serde::Deserialize;

/// Application configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub llm: LlmBackendConfig,

    #[serde(default)]
    pub assistant: AssistantConfig,

    #[serde(default)]
    pub console: ConsoleConfig,

    /// Interval between retention sweeps, in seconds. Zero disables the
    /// periodic sweep; the startup sweep still runs.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

/// Console transport configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// User the console session is recorded under.
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_cleanup_interval_seconds() -> u64 {
    3600
}

fn default_user_id() -> String {
    "console".to_string()
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            user_id: default_user_id(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `parley.*` and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be read or a value is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::File::with_name("parley").required(false))
                .add_source(
                    config::Environment::with_prefix("PARLEY")
                        .prefix_separator("_")
                        .separator("__")
                        .try_parsing(true),
                ),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}
