//! Environment-sourced worker configuration.
//!
//! Every key is read from `ORDERPUSH_<KEY>` (e.g. `ORDERPUSH_DB_HOST`).

use std::path::PathBuf;
use std::time::Duration;

use ::config::{Config, Environment, Map};
use serde::Deserialize;

use orderpush_core::TenantName;
use orderpush_observability::LogSettings;

pub const ENV_PREFIX: &str = "ORDERPUSH";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Row-locking flavour of the claim query. `Blocking` unless configured.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// `FOR UPDATE OF <orders> SKIP LOCKED`: concurrent workers take disjoint rows.
    SkipLocked,
    /// Plain `FOR UPDATE`: concurrent workers queue behind each other.
    Blocking,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    // Storage
    #[serde(default = "default_db_host")]
    pub db_host: String,
    #[serde(default = "default_db_port")]
    pub db_port: u16,
    #[serde(default = "default_db_user")]
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default)]
    pub db_ssl_ca: Option<PathBuf>,
    #[serde(default = "default_db_max_connections_per_tenant")]
    pub db_max_connections_per_tenant: u32,
    #[serde(default = "default_timeout_ms")]
    pub db_connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub db_query_timeout_ms: u64,
    #[serde(default = "default_tenant_pattern")]
    pub tenant_pattern: String,
    #[serde(default = "default_users_database")]
    pub users_database: String,
    #[serde(default = "default_claim_lock_mode")]
    pub claim_lock_mode: LockMode,

    // Credentials and gateway
    #[serde(default = "default_credentials_path")]
    pub credentials_path: PathBuf,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default = "default_gateway_base_url")]
    pub gateway_base_url: String,
    #[serde(default = "default_token_cache_margin_secs")]
    pub token_cache_margin_secs: u64,
    #[serde(default = "default_http_connect_timeout_ms")]
    pub http_connect_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub badge_url: Option<String>,
    #[serde(default)]
    pub link_base_url: Option<String>,

    // Loop and governor
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_empty_directory_multiplier")]
    pub empty_directory_multiplier: u32,
    #[serde(default = "default_token_backoff_max_ms")]
    pub token_backoff_max_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_memory_ceiling_mb")]
    pub memory_ceiling_mb: u64,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
    #[serde(default = "default_invalid_order_max_attempts")]
    pub invalid_order_max_attempts: u32,

    // Logging
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default = "default_log_max_bytes")]
    pub log_max_bytes: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_db_max_connections_per_tenant() -> u32 {
    2
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_tenant_pattern() -> String {
    "delivery_%".to_string()
}

fn default_users_database() -> String {
    "usuarios".to_string()
}

fn default_claim_lock_mode() -> LockMode {
    LockMode::Blocking
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("firebase-credentials.json")
}

fn default_gateway_base_url() -> String {
    "https://fcm.googleapis.com".to_string()
}

fn default_token_cache_margin_secs() -> u64 {
    50 * 60
}

fn default_http_connect_timeout_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_empty_directory_multiplier() -> u32 {
    5
}

fn default_token_backoff_max_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_batch_size() -> u32 {
    5
}

fn default_memory_ceiling_mb() -> u64 {
    128
}

fn default_max_cycles() -> u64 {
    1_000
}

fn default_invalid_order_max_attempts() -> u32 {
    3
}

fn default_log_max_bytes() -> u64 {
    orderpush_observability::rotating::DEFAULT_MAX_BYTES
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WorkerConfig {
    /// Load from `ORDERPUSH_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load from an explicit variable map (same names as the environment).
    pub fn from_source(vars: Map<String, String>) -> Result<Self, ConfigError> {
        Self::from_environment(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn from_environment(env: Environment) -> Result<Self, ConfigError> {
        let config: WorkerConfig = Config::builder()
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.max_cycles == 0 {
            return Err(ConfigError::Invalid("max_cycles must be at least 1".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be positive".into()));
        }
        if self.empty_directory_multiplier == 0 {
            return Err(ConfigError::Invalid(
                "empty_directory_multiplier must be at least 1".into(),
            ));
        }
        for (name, value) in [
            ("db_connect_timeout_ms", self.db_connect_timeout_ms),
            ("db_query_timeout_ms", self.db_query_timeout_ms),
            ("http_connect_timeout_ms", self.http_connect_timeout_ms),
            ("http_timeout_ms", self.http_timeout_ms),
            ("token_cache_margin_secs", self.token_cache_margin_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.db_max_connections_per_tenant == 0 {
            return Err(ConfigError::Invalid(
                "db_max_connections_per_tenant must be at least 1".into(),
            ));
        }
        if self.tenant_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid("tenant_pattern must not be empty".into()));
        }
        TenantName::parse(self.users_database.clone())
            .map_err(|e| ConfigError::Invalid(format!("users_database: {e}")))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn db_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connect_timeout_ms)
    }

    pub fn db_query_timeout(&self) -> Duration {
        Duration::from_millis(self.db_query_timeout_ms)
    }

    pub fn http_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.http_connect_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn token_cache_margin(&self) -> Duration {
        Duration::from_secs(self.token_cache_margin_secs)
    }

    pub fn token_backoff_max(&self) -> Duration {
        Duration::from_millis(self.token_backoff_max_ms)
    }

    pub fn memory_ceiling_bytes(&self) -> u64 {
        self.memory_ceiling_mb.saturating_mul(1024 * 1024)
    }

    pub fn log_settings(&self) -> LogSettings {
        LogSettings {
            level: self.log_level.clone(),
            file: self.log_file.clone(),
            max_file_bytes: self.log_max_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = WorkerConfig::from_source(Map::new()).unwrap();

        assert_eq!(config.db_host, "127.0.0.1");
        assert_eq!(config.db_port, 3306);
        assert_eq!(config.tenant_pattern, "delivery_%");
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.max_cycles, 1_000);
        assert_eq!(config.memory_ceiling_bytes(), 128 * 1024 * 1024);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.token_cache_margin(), Duration::from_secs(3_000));
        assert_eq!(config.claim_lock_mode, LockMode::Blocking);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = WorkerConfig::from_source(vars(&[
            ("ORDERPUSH_DB_HOST", "db.internal"),
            ("ORDERPUSH_BATCH_SIZE", "20"),
            ("ORDERPUSH_MAX_CYCLES", "50"),
            ("ORDERPUSH_CLAIM_LOCK_MODE", "skip_locked"),
            ("ORDERPUSH_LOG_FILE", "/var/log/orderpush.log"),
        ]))
        .unwrap();

        assert_eq!(config.db_host, "db.internal");
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.max_cycles, 50);
        assert_eq!(config.claim_lock_mode, LockMode::SkipLocked);
        assert_eq!(
            config.log_settings().file,
            Some(PathBuf::from("/var/log/orderpush.log"))
        );
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = WorkerConfig::from_source(vars(&[("ORDERPUSH_BATCH_SIZE", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn users_database_must_be_an_identifier() {
        let err = WorkerConfig::from_source(vars(&[(
            "ORDERPUSH_USERS_DATABASE",
            "users; DROP TABLE x",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unprefixed_variables_are_ignored() {
        let config = WorkerConfig::from_source(vars(&[("DB_HOST", "elsewhere")])).unwrap();
        assert_eq!(config.db_host, "127.0.0.1");
    }
}
