use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
/// Largest page the storefront API will serve.
pub const STOREFRONT_MAX_PAGE_SIZE: u32 = 100;

/// Storefront REST API access
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct StorefrontConfig {
    #[validate(length(min = 1))]
    pub base_url: String,

    #[serde(default)]
    pub consumer_key: String,

    #[serde(default)]
    pub consumer_secret: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,

    /// Upstream request budget shared by all workers of one run
    #[validate(range(min = 1))]
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

/// Knobs for live and backfill synchronization
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct SyncConfig {
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Orders per batched commit during backfill
    #[validate(range(min = 1))]
    #[serde(default = "default_commit_every")]
    pub commit_every: usize,

    /// Parallel backfill workers (disjoint page ranges)
    #[validate(range(min = 1, max = 64))]
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on pages fetched by one backfill run
    #[serde(default)]
    pub max_pages: Option<u32>,

    /// Pages pulled by one live poll
    #[validate(range(min = 1))]
    #[serde(default = "default_poll_pages")]
    pub poll_pages: u32,

    /// Bound on a single order's sync attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    #[validate(range(min = 1, max = 10))]
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            commit_every: default_commit_every(),
            workers: default_workers(),
            max_pages: None,
            poll_pages: default_poll_pages(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl SyncConfig {
    /// Page size clamped to what the storefront accepts.
    pub fn effective_page_size(&self) -> u32 {
        self.page_size.clamp(1, STOREFRONT_MAX_PAGE_SIZE)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// System-wide fallbacks for the pricing context
#[derive(Clone, Debug, Default, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub warehouse: Option<String>,
    #[serde(default)]
    pub price_list: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PaymentsConfig {
    /// Ledger account credited by gateway-settled payments
    #[serde(default)]
    pub settlement_account: Option<String>,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL
    #[validate(length(min = 1))]
    pub database_url: String,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Server host address
    pub host: String,

    pub port: u16,

    /// Application environment
    pub environment: String,

    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    #[validate]
    pub storefront: StorefrontConfig,

    /// Shared secret for storefront webhook signatures
    #[serde(default)]
    pub webhook_secret: Option<String>,

    #[validate]
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub payments: PaymentsConfig,

    /// Extra zone code -> display label entries for territory lookups
    #[serde(default)]
    pub territory_labels: HashMap<String, String>,
}

impl AppConfig {
    /// Minimal configuration for local runs and tests.
    pub fn new(database_url: String, storefront_base_url: String) -> Self {
        Self {
            database_url,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            auto_migrate: false,
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: DEFAULT_ENV.to_string(),
            log_level: default_log_level(),
            log_json: false,
            storefront: StorefrontConfig {
                base_url: storefront_base_url,
                consumer_key: String::new(),
                consumer_secret: String::new(),
                api_version: default_api_version(),
                timeout_secs: default_request_timeout_secs(),
                requests_per_minute: default_requests_per_minute(),
            },
            webhook_secret: None,
            sync: SyncConfig::default(),
            defaults: DefaultsConfig {
                currency: default_currency(),
                ..Default::default()
            },
            payments: PaymentsConfig::default(),
            territory_labels: HashMap::new(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_api_version() -> String {
    "v3".to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_requests_per_minute() -> u32 {
    120
}

fn default_page_size() -> u32 {
    STOREFRONT_MAX_PAGE_SIZE
}
fn default_commit_every() -> usize {
    10
}
fn default_workers() -> usize {
    1
}
fn default_poll_pages() -> u32 {
    1
}
fn default_attempt_timeout_secs() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_currency() -> String {
    "EGP".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_sync={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(CONFIG_DIR)
}

pub fn load_config_from(config_dir: &str) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(config_dir).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront_sync.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("storefront.base_url", "http://localhost")?
        .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
        .add_source(File::with_name(&format!("{}/{}", config_dir, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_config(content: &str) -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("default.toml"), content).unwrap();
        temp_dir
    }

    #[test]
    fn loads_nested_sections_from_file() {
        let dir = write_config(
            r#"
            database_url = "sqlite::memory:"
            webhook_secret = "s3cret"

            [storefront]
            base_url = "https://shop.example.com"
            consumer_key = "ck_1"
            consumer_secret = "cs_1"

            [sync]
            page_size = 50
            workers = 4

            [defaults]
            warehouse = "Stores - J"
            price_list = "Standard Selling"

            [territory_labels]
            EGNEW = "New Zone - منطقة جديدة"
            "#,
        );

        let cfg = load_config_from(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.storefront.base_url, "https://shop.example.com");
        assert_eq!(cfg.sync.page_size, 50);
        assert_eq!(cfg.sync.workers, 4);
        assert_eq!(cfg.sync.commit_every, 10);
        assert_eq!(cfg.defaults.warehouse.as_deref(), Some("Stores - J"));
        assert_eq!(cfg.defaults.currency, "EGP");
        assert_eq!(cfg.webhook_secret.as_deref(), Some("s3cret"));
        assert!(cfg.territory_labels.contains_key("EGNEW"));
    }

    #[test]
    fn rejects_page_size_above_storefront_maximum() {
        let dir = write_config(
            r#"
            database_url = "sqlite::memory:"

            [storefront]
            base_url = "https://shop.example.com"

            [sync]
            page_size = 250
            "#,
        );

        let result = load_config_from(dir.path().to_str().unwrap());
        assert!(matches!(result, Err(AppConfigError::Validation(_))));
    }

    #[test]
    fn effective_page_size_is_capped() {
        let mut sync = SyncConfig::default();
        sync.page_size = 500;
        assert_eq!(sync.effective_page_size(), STOREFRONT_MAX_PAGE_SIZE);
    }

    #[test]
    fn log_level_validation() {
        assert!(validate_log_level("debug").is_ok());
        assert!(validate_log_level("verbose").is_err());
    }
}
