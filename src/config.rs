use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE_SIZE: i64 = 1000;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} has an invalid value: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub run_migrations: bool,
}

impl DatabaseConfig {
    /// Only commands that open a pool need the URL; a dry run does not.
    pub fn url(&self) -> Result<&str, ConfigError> {
        self.url.as_deref().ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub version: String,
    pub default_page_size: i64,
    pub max_page_size: i64,
}

#[derive(Debug, Clone)]
pub struct ProwessConfig {
    pub api_key: String,
    pub base_url: String,
    pub batch_file: PathBuf,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExpansionConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub cache_file: Option<PathBuf>,
}

impl ExpansionConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
}

/// Process configuration, read once at startup and handed to each component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub prowess: Option<ProwessConfig>,
    pub object_store: Option<ObjectStoreConfig>,
    pub expansion: ExpansionConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let database = DatabaseConfig {
            url: get("DATABASE_URL"),
            max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", 10)?,
            run_migrations: parse_or(&get, "RUN_MIGRATIONS", false)?,
        };

        let server = ServerConfig {
            host: get("API_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "API_PORT", 8000)?,
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_page_size: parse_or(&get, "DEFAULT_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            max_page_size: parse_or(&get, "MAX_PAGE_SIZE", MAX_PAGE_SIZE)?,
        };

        let prowess = match get("PROWESS_API_KEY") {
            Some(api_key) => Some(ProwessConfig {
                api_key,
                base_url: get("PROWESS_BASE_URL")
                    .unwrap_or_else(|| "https://prowess.cmie.com/api".to_string()),
                batch_file: get("PROWESS_BATCH_FILE")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("Security_Master_Test.bt")),
                poll_interval: Duration::from_secs(parse_or(&get, "PROWESS_POLL_INTERVAL_SECS", 30)?),
                max_wait: Duration::from_secs(60 * parse_or::<u64, _>(&get, "PROWESS_MAX_WAIT_MINUTES", 30)?),
                request_timeout: Duration::from_secs(parse_or(&get, "PROWESS_TIMEOUT_SECS", 60)?),
            }),
            None => None,
        };

        let object_store = match get("AWS_S3_BUCKET") {
            Some(bucket) => Some(ObjectStoreConfig {
                bucket,
                region: get("AWS_REGION").unwrap_or_else(|| "ap-south-1".to_string()),
                access_key_id: get("AWS_ACCESS_KEY_ID")
                    .ok_or(ConfigError::Missing("AWS_ACCESS_KEY_ID"))?,
                secret_access_key: get("AWS_SECRET_ACCESS_KEY")
                    .ok_or(ConfigError::Missing("AWS_SECRET_ACCESS_KEY"))?,
                endpoint: get("AWS_S3_ENDPOINT"),
            }),
            None => None,
        };

        let expansion = ExpansionConfig {
            api_key: get("GEMINI_API_KEY"),
            model: get("GEMINI_MODEL").unwrap_or_else(|| "gemini-2.0-flash-lite".to_string()),
            timeout: Duration::from_secs(parse_or(&get, "GEMINI_TIMEOUT_SECS", 20)?),
            cache_file: get("ABBREVIATIONS_FILE").map(PathBuf::from),
        };

        let pipeline = PipelineConfig {
            batch_size: parse_or(&get, "UPSERT_BATCH_SIZE", 500)?,
        };

        let config = Self { database, server, prowess, object_store, expansion, pipeline };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_page_size < 1 {
            return Err(ConfigError::Invalid {
                var: "MAX_PAGE_SIZE",
                value: self.server.max_page_size.to_string(),
            });
        }
        if self.server.default_page_size < 1 || self.server.default_page_size > self.server.max_page_size {
            return Err(ConfigError::Invalid {
                var: "DEFAULT_PAGE_SIZE",
                value: self.server.default_page_size.to_string(),
            });
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Invalid { var: "UPSERT_BATCH_SIZE", value: "0".to_string() });
        }
        Ok(())
    }
}

fn parse_or<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        None => Ok(default),
    }
}
