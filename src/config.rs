use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";
const DEFAULT_DUPLICATE_WINDOW_SECS: u64 = 60;
const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;

/// Application settings, loadable from `config/*.toml` files and `APP__*`
/// environment variables.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Connection string for the backing store.
    pub database_url: String,

    /// Deployment environment name (development, production, ...).
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    #[serde(default)]
    pub log_json: bool,

    /// Apply the embedded migrations when the pool opens.
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// How far back identical submissions count as duplicates.
    #[serde(default = "default_duplicate_window_secs")]
    #[validate(custom = "validate_duplicate_window_secs")]
    pub duplicate_window_secs: u64,

    /// Upper bound on waiting for a per-product lock.
    #[serde(default = "default_lock_wait_ms")]
    #[validate(custom = "validate_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Buffer size of the event channel.
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Settings with defaults everywhere except the store location and the
    /// environment name.
    pub fn new(database_url: String, environment: String) -> Self {
        Self {
            database_url,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            duplicate_window_secs: default_duplicate_window_secs(),
            lock_wait_ms: default_lock_wait_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Duplicate lookback as the chrono duration the guard consumes.
    pub fn duplicate_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.duplicate_window_secs as i64)
    }

    /// Lock wait bound as the std duration the lock map consumes.
    pub fn lock_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.lock_wait_ms)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    // Constraints that span fields, which the derive cannot express.
    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production() && self.database_url.starts_with("sqlite::memory:") {
            errors.add(
                "database_url",
                invalid(
                    "database_url_in_memory",
                    "An in-memory store discards the movement ledger on restart and must not \
                     be used in production. Set APP__DATABASE_URL to a durable database.",
                ),
            );
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Why configuration loading failed.
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("could not read configuration sources: {0}")]
    Load(#[from] ConfigError),

    #[error("configuration rejected: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_duplicate_window_secs() -> u64 {
    DEFAULT_DUPLICATE_WINDOW_SECS
}
fn default_lock_wait_ms() -> u64 {
    DEFAULT_LOCK_WAIT_MS
}
fn default_event_channel_capacity() -> usize {
    1024
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(invalid(
            "log_level",
            "Must be one of: trace, debug, info, warn, error",
        )),
    }
}

fn validate_duplicate_window_secs(secs: u64) -> Result<(), ValidationError> {
    // A zero window would disable duplicate detection entirely.
    if secs == 0 {
        return Err(invalid(
            "duplicate_window_secs",
            "duplicate_window_secs must be greater than 0",
        ));
    }
    if secs > 86_400 {
        return Err(invalid(
            "duplicate_window_secs",
            "duplicate_window_secs must not exceed one day",
        ));
    }
    Ok(())
}

fn validate_lock_wait_ms(ms: u64) -> Result<(), ValidationError> {
    if ms == 0 {
        return Err(invalid("lock_wait_ms", "lock_wait_ms must be greater than 0"));
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        return Err(invalid(
            "event_channel_capacity",
            "event_channel_capacity must be greater than 0",
        ));
    }
    Ok(())
}

/// Installs the tracing subscriber. `RUST_LOG` wins over the configured
/// level when set; a second call is a no-op.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let directive = env::var("RUST_LOG")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| format!("stockbook={}", level));

    if json {
        let _ = fmt().with_env_filter(directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(directive).try_init();
    }
}

/// Loads settings by layering, in order of increasing precedence: built-in
/// defaults, `config/default.toml`, `config/{run_env}.toml`, then `APP__*`
/// environment variables. The profile comes from `RUN_ENV` (or `APP_ENV`),
/// defaulting to development. Both file sources are optional.
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!(environment = %run_env, "Loading configuration");

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "No {}/ directory; using built-in defaults plus APP__* overrides",
            CONFIG_DIR
        );
    }

    let settings = Config::builder()
        .set_default("database_url", "sqlite://stockbook.db?mode=rwc")?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = settings.try_deserialize()?;

    app_config
        .validate()
        .and_then(|_| app_config.validate_additional_constraints())
        .map_err(|e| {
            error!("Rejecting configuration: {:?}", e);
            AppConfigError::Validation(e)
        })?;

    info!("Configuration loaded");
    Ok(app_config)
}
