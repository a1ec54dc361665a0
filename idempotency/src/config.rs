use crate::error::IdempotencyError;
use clap::Parser;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{FailMode, DEFAULT_STORE_TIMEOUT};
use crate::eviction::DEFAULT_RETENTION;
use crate::store::{DEFAULT_CACHE_TTL, DEFAULT_KEY_PREFIX};

/// Which attempt store backs the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Per-process map, swept on every admission
    Memory,
    /// Redis, shared by every instance
    Redis,
}

impl FromStr for StoreBackend {
    type Err = IdempotencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(IdempotencyError::ConfigError(format!(
                "store_backend must be \"memory\" or \"redis\", got \"{}\"",
                other
            ))),
        }
    }
}

/// Configuration loaded from CLI args, environment variables, and/or config files
///
/// Config precedence: CLI args > env vars > config file > defaults
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub retention: Duration,
    pub cache_ttl: Duration,
    pub cache_key_prefix: String,
    pub store_timeout: Duration,
    pub fail_mode: FailMode,
    pub log_level: String,
}

/// CLI arguments structure for clap
#[derive(Debug, Default, Parser)]
#[command(name = "users-api")]
#[command(about = "Users CRUD API with Idempotency-Key enforcement on POST and PATCH")]
pub struct CliArgs {
    /// Path to configuration file (TOML or YAML)
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080 (overrides env/config)
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// Attempt store backend: memory or redis (overrides env/config)
    #[arg(long)]
    pub store_backend: Option<String>,

    /// Redis connection URL (overrides env/config)
    #[arg(long)]
    pub redis_url: Option<String>,

    /// In-process store: seconds a key is remembered (overrides env/config)
    #[arg(long)]
    pub retention_secs: Option<u64>,

    /// Redis store: entry TTL in seconds (overrides env/config)
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,

    /// Redis store: key namespace (overrides env/config)
    #[arg(long)]
    pub cache_key_prefix: Option<String>,

    /// Attempt store call timeout in milliseconds (overrides env/config)
    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Let requests through when the store is unreachable (overrides env/config)
    #[arg(long)]
    pub fail_open: Option<bool>,

    /// Logging level: trace, debug, info, warn, error (overrides env/config)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Config file structure (deserialized from TOML/YAML)
#[derive(Debug, Deserialize, Clone, Default)]
struct ConfigFile {
    server: Option<ServerConfig>,
    idempotency: Option<IdempotencyConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct ServerConfig {
    listen_addr: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct IdempotencyConfig {
    store_backend: Option<String>,
    redis_url: Option<String>,
    retention_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    cache_key_prefix: Option<String>,
    store_timeout_ms: Option<u64>,
    fail_open: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, Default)]
struct LoggingConfig {
    level: Option<String>,
}

/// Intermediate structure for env var config (all optional for precedence)
#[derive(Debug, Default)]
struct EnvConfig {
    listen_addr: Option<String>,
    store_backend: Option<String>,
    redis_url: Option<String>,
    retention_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    cache_key_prefix: Option<String>,
    store_timeout_ms: Option<u64>,
    fail_open: Option<bool>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration with precedence: CLI args > env vars > config file > defaults
    ///
    /// Env vars use the `IDEMPOTENCY_` prefix (`IDEMPOTENCY_STORE_BACKEND`,
    /// `IDEMPOTENCY_REDIS_URL`, ...). A `.env` file is read first but never
    /// overrides variables already set.
    pub fn load(cli_args: &CliArgs) -> Result<Config, IdempotencyError> {
        dotenv::dotenv().ok();

        let file = match &cli_args.config_file {
            Some(path) => Self::load_from_file(path)?,
            None => ConfigFile::default(),
        };
        let server = file.server.unwrap_or_default();
        let idem = file.idempotency.unwrap_or_default();
        let logging = file.logging.unwrap_or_default();

        let env_config = Self::load_from_env()?;

        let listen_addr = cli_args
            .listen_addr
            .clone()
            .or(env_config.listen_addr)
            .or(server.listen_addr)
            .unwrap_or_else(|| "0.0.0.0:8080".to_string());

        let store_backend = cli_args
            .store_backend
            .clone()
            .or(env_config.store_backend)
            .or(idem.store_backend)
            .map(|s| s.parse::<StoreBackend>())
            .transpose()?
            .unwrap_or(StoreBackend::Memory);

        let redis_url = cli_args
            .redis_url
            .clone()
            .or(env_config.redis_url)
            .or(idem.redis_url)
            .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let retention_secs = cli_args
            .retention_secs
            .or(env_config.retention_secs)
            .or(idem.retention_secs)
            .unwrap_or(DEFAULT_RETENTION.as_secs());

        let cache_ttl_secs = cli_args
            .cache_ttl_secs
            .or(env_config.cache_ttl_secs)
            .or(idem.cache_ttl_secs)
            .unwrap_or(DEFAULT_CACHE_TTL.as_secs());

        let cache_key_prefix = cli_args
            .cache_key_prefix
            .clone()
            .or(env_config.cache_key_prefix)
            .or(idem.cache_key_prefix)
            .unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string());

        let store_timeout_ms = cli_args
            .store_timeout_ms
            .or(env_config.store_timeout_ms)
            .or(idem.store_timeout_ms)
            .unwrap_or(DEFAULT_STORE_TIMEOUT.as_millis() as u64);

        let fail_open = cli_args
            .fail_open
            .or(env_config.fail_open)
            .or(idem.fail_open)
            .unwrap_or(false);

        let log_level = cli_args
            .log_level
            .clone()
            .or(env_config.log_level)
            .or(logging.level)
            .unwrap_or_else(|| "info".to_string());

        if retention_secs == 0 || cache_ttl_secs == 0 {
            return Err(IdempotencyError::ConfigError(
                "retention_secs and cache_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if store_timeout_ms == 0 {
            return Err(IdempotencyError::ConfigError(
                "store_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if cache_key_prefix.is_empty() || cache_key_prefix.contains(char::is_whitespace) {
            return Err(IdempotencyError::ConfigError(
                "cache_key_prefix must be non-empty and contain no whitespace".to_string(),
            ));
        }

        Ok(Config {
            listen_addr,
            store_backend,
            redis_url,
            retention: Duration::from_secs(retention_secs),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            cache_key_prefix,
            store_timeout: Duration::from_millis(store_timeout_ms),
            fail_mode: if fail_open { FailMode::Open } else { FailMode::Closed },
            log_level,
        })
    }

    /// Load configuration from file (TOML or YAML)
    fn load_from_file(path: &PathBuf) -> Result<ConfigFile, IdempotencyError> {
        use config::Config as ConfigBuilder;

        if !path.exists() {
            return Err(IdempotencyError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => config::FileFormat::Yaml,
            // Unknown extensions are read as TOML
            _ => config::FileFormat::Toml,
        };

        ConfigBuilder::builder()
            .add_source(config::File::from(path.as_path()).format(format))
            .build()
            .map_err(|e| IdempotencyError::ConfigError(format!("Failed to load config file: {}", e)))?
            .try_deserialize()
            .map_err(|e| IdempotencyError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Load configuration from environment variables only
    fn load_from_env() -> Result<EnvConfig, IdempotencyError> {
        Ok(EnvConfig {
            listen_addr: env::var("IDEMPOTENCY_LISTEN_ADDR").ok(),
            store_backend: env::var("IDEMPOTENCY_STORE_BACKEND").ok(),
            redis_url: env::var("IDEMPOTENCY_REDIS_URL").ok(),
            retention_secs: parse_env("IDEMPOTENCY_RETENTION_SECS")?,
            cache_ttl_secs: parse_env("IDEMPOTENCY_CACHE_TTL_SECS")?,
            cache_key_prefix: env::var("IDEMPOTENCY_CACHE_KEY_PREFIX").ok(),
            store_timeout_ms: parse_env("IDEMPOTENCY_STORE_TIMEOUT_MS")?,
            fail_open: parse_env("IDEMPOTENCY_FAIL_OPEN")?,
            log_level: env::var("IDEMPOTENCY_LOG_LEVEL").ok(),
        })
    }
}

/// A set-but-unparseable variable is an error, not a silent default.
fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>, IdempotencyError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| IdempotencyError::ConfigError(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(None),
    }
}
