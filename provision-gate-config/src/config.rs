// provision-gate-config/src/config.rs
// ============================================================================
// Module: Provision Gate Configuration
// Description: Configuration loading and validation for Provision Gate.
// Purpose: Provide strict, fail-closed config parsing with env overrides.
// Dependencies: provision-gate-opa, provision-gate-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration resolves from an explicit path, the `PROVISION_GATE_CONFIG`
//! environment variable, or `provision-gate.toml` in the working directory;
//! a missing file falls back to defaults. Environment overrides cover the
//! bind addresses, the store path, and the rule-runtime endpoint so that
//! container deployments need no config file at all. Validation is
//! fail-closed: unparsable binds, unsupported schemes, and out-of-range
//! timeouts are errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use provision_gate_opa::OpaConfig;
use provision_gate_store_sqlite::SqliteStoreConfig;
use provision_gate_store_sqlite::SqliteStoreMode;
use provision_gate_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "provision-gate.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "PROVISION_GATE_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

/// Default public API bind address.
const DEFAULT_BIND: &str = "0.0.0.0:8080";
/// Default engine API bind address (loopback; the engine surface is private).
const DEFAULT_ENGINE_BIND: &str = "127.0.0.1:8081";
/// Default log level filter.
const DEFAULT_LOG_LEVEL: &str = "info";
/// Default store database path.
const DEFAULT_STORE_PATH: &str = "provision-gate.db";
/// Minimum allowed rule-runtime timeout in milliseconds.
const MIN_RULE_RUNTIME_TIMEOUT_MS: u64 = 500;
/// Maximum allowed rule-runtime timeout in milliseconds.
const MAX_RULE_RUNTIME_TIMEOUT_MS: u64 = 60_000;

/// Environment override for the public bind address.
const ENV_BIND: &str = "PROVISION_GATE_BIND";
/// Environment override for the engine bind address.
const ENV_ENGINE_BIND: &str = "PROVISION_GATE_ENGINE_BIND";
/// Environment override for the store database path.
const ENV_DB_PATH: &str = "PROVISION_GATE_DB_PATH";
/// Environment override for the rule-runtime URL.
const ENV_OPA_URL: &str = "PROVISION_GATE_OPA_URL";
/// Environment override for the rule-runtime timeout.
const ENV_OPA_TIMEOUT_MS: &str = "PROVISION_GATE_OPA_TIMEOUT_MS";
/// Environment override for the log level.
const ENV_LOG_LEVEL: &str = "PROVISION_GATE_LOG_LEVEL";

/// Recognized log level filters.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Service-level configuration for the two HTTP listeners.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Public API bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Engine API bind address.
    #[serde(default = "default_engine_bind")]
    pub engine_bind: String,
    /// Log level filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            engine_bind: DEFAULT_ENGINE_BIND.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_engine_bind() -> String {
    DEFAULT_ENGINE_BIND.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Root Provision Gate configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionGateConfig {
    /// Service configuration.
    #[serde(default)]
    pub service: ServiceConfig,
    /// Policy store configuration.
    #[serde(default = "default_store_config")]
    pub store: SqliteStoreConfig,
    /// Rule runtime configuration.
    #[serde(default)]
    pub rule_runtime: OpaConfig,
}

impl Default for ProvisionGateConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            store: default_store_config(),
            rule_runtime: OpaConfig::default(),
        }
    }
}

/// Returns the default store configuration.
fn default_store_config() -> SqliteStoreConfig {
    SqliteStoreConfig {
        path: PathBuf::from(DEFAULT_STORE_PATH),
        busy_timeout_ms: 5_000,
        journal_mode: SqliteStoreMode::default(),
        sync_mode: SqliteSyncMode::default(),
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file I/O error.
    #[error("config io error: {0}")]
    Io(String),
    /// Config file parse error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Config failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Loading
// ============================================================================

impl ProvisionGateConfig {
    /// Loads configuration using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when reading, parsing, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match resolve_path(path) {
            Some(resolved) => read_config_file(&resolved)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides for the deployment knobs.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(bind) = env::var(ENV_BIND) {
            self.service.bind = bind;
        }
        if let Ok(engine_bind) = env::var(ENV_ENGINE_BIND) {
            self.service.engine_bind = engine_bind;
        }
        if let Ok(log_level) = env::var(ENV_LOG_LEVEL) {
            self.service.log_level = log_level;
        }
        if let Ok(path) = env::var(ENV_DB_PATH) {
            self.store.path = PathBuf::from(path);
        }
        if let Ok(url) = env::var(ENV_OPA_URL) {
            self.rule_runtime.url = url;
        }
        if let Ok(timeout) = env::var(ENV_OPA_TIMEOUT_MS) {
            self.rule_runtime.timeout_ms = timeout.parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_OPA_TIMEOUT_MS} must be an integer"))
            })?;
        }
        Ok(())
    }

    /// Validates the configuration, failing closed on any invalid field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.service
            .bind
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid(format!("invalid bind address '{}'", self.service.bind)))?;
        self.service.engine_bind.parse::<SocketAddr>().map_err(|_| {
            ConfigError::Invalid(format!(
                "invalid engine bind address '{}'",
                self.service.engine_bind
            ))
        })?;
        if !LOG_LEVELS.contains(&self.service.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level '{}', expected one of {LOG_LEVELS:?}",
                self.service.log_level
            )));
        }
        if self.store.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store path must not be empty".to_string()));
        }

        let url = Url::parse(&self.rule_runtime.url).map_err(|_| {
            ConfigError::Invalid(format!("invalid rule runtime url '{}'", self.rule_runtime.url))
        })?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unsupported rule runtime scheme '{other}'"
                )));
            }
        }
        if !(MIN_RULE_RUNTIME_TIMEOUT_MS..=MAX_RULE_RUNTIME_TIMEOUT_MS)
            .contains(&self.rule_runtime.timeout_ms)
        {
            return Err(ConfigError::Invalid(format!(
                "rule runtime timeout {}ms outside [{MIN_RULE_RUNTIME_TIMEOUT_MS}, \
                 {MAX_RULE_RUNTIME_TIMEOUT_MS}]",
                self.rule_runtime.timeout_ms
            )));
        }
        Ok(())
    }
}

/// Resolves the configuration file path, if any file should be read.
fn resolve_path(path: Option<&Path>) -> Option<PathBuf> {
    if let Some(explicit) = path {
        return Some(explicit.to_path_buf());
    }
    if let Ok(from_env) = env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(from_env));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_NAME);
    default.exists().then_some(default)
}

/// Reads and parses a configuration file with a strict size limit.
fn read_config_file(path: &Path) -> Result<ProvisionGateConfig, ConfigError> {
    let bytes = fs::read(path).map_err(|error| ConfigError::Io(error.to_string()))?;
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    let content =
        std::str::from_utf8(&bytes).map_err(|_| ConfigError::Parse("config is not valid utf-8".to_string()))?;
    toml::from_str(content).map_err(|error| ConfigError::Parse(error.to_string()))
}
