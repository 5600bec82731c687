use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound for day-count settings so link and cooldown arithmetic stays in range.
pub const MAX_DAY_SETTING: u32 = 3650;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub directory: DirectoryConfig,
    pub evaluations: EvaluationLinkConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let roster_csv = env::var("APP_ROSTER_CSV")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            directory: DirectoryConfig { roster_csv },
            evaluations: EvaluationLinkConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the employee roster backing the subject picker comes from.
#[derive(Debug, Clone, Default)]
pub struct DirectoryConfig {
    pub roster_csv: Option<PathBuf>,
}

/// Tunables for link issuance, access throttling, anomaly detection, and persistence retries.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationLinkConfig {
    /// Origin prefixed to `/external-evaluation/{token}` when building shareable URLs.
    pub public_origin: String,
    pub link_ttl_days: u32,
    pub cooldown_days: u32,
    pub rate_limit_max_attempts: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_sweep_interval: Duration,
    pub min_completion: Duration,
    pub store_timeout: Duration,
    pub persist_max_attempts: u32,
    pub persist_backoff: Duration,
}

impl Default for EvaluationLinkConfig {
    fn default() -> Self {
        Self {
            public_origin: "http://127.0.0.1:3000".to_string(),
            link_ttl_days: 7,
            cooldown_days: 90,
            rate_limit_max_attempts: 10,
            rate_limit_window: Duration::from_secs(3600),
            rate_limit_sweep_interval: Duration::from_secs(300),
            min_completion: Duration::from_secs(30),
            store_timeout: Duration::from_millis(2000),
            persist_max_attempts: 3,
            persist_backoff: Duration::from_millis(100),
        }
    }
}

impl EvaluationLinkConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let public_origin = env::var("EVAL_PUBLIC_ORIGIN")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .ok()
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.public_origin);

        Ok(Self {
            public_origin,
            link_ttl_days: day_count_var("EVAL_LINK_TTL_DAYS", defaults.link_ttl_days, 1)?,
            cooldown_days: day_count_var("EVAL_COOLDOWN_DAYS", defaults.cooldown_days, 0)?,
            rate_limit_max_attempts: positive_var(
                "EVAL_RATE_LIMIT_MAX_ATTEMPTS",
                defaults.rate_limit_max_attempts,
            )?,
            rate_limit_window: Duration::from_secs(positive_var(
                "EVAL_RATE_LIMIT_WINDOW_SECS",
                defaults.rate_limit_window.as_secs(),
            )?),
            rate_limit_sweep_interval: Duration::from_secs(positive_var(
                "EVAL_RATE_LIMIT_SWEEP_SECS",
                defaults.rate_limit_sweep_interval.as_secs(),
            )?),
            min_completion: Duration::from_secs(var_or(
                "EVAL_MIN_COMPLETION_SECS",
                defaults.min_completion.as_secs(),
            )?),
            store_timeout: Duration::from_millis(positive_var(
                "EVAL_STORE_TIMEOUT_MS",
                defaults.store_timeout.as_millis() as u64,
            )?),
            persist_max_attempts: positive_var(
                "EVAL_PERSIST_MAX_ATTEMPTS",
                defaults.persist_max_attempts,
            )?,
            persist_backoff: Duration::from_millis(var_or(
                "EVAL_PERSIST_BACKOFF_MS",
                defaults.persist_backoff.as_millis() as u64,
            )?),
        })
    }
}

fn var_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidSetting { key }),
        _ => Ok(default),
    }
}

fn positive_var<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let value = var_or(key, default)?;
    if value == T::default() {
        return Err(ConfigError::InvalidSetting { key });
    }
    Ok(value)
}

fn day_count_var(key: &'static str, default: u32, min: u32) -> Result<u32, ConfigError> {
    let value = var_or(key, default)?;
    if !(min..=MAX_DAY_SETTING).contains(&value) {
        return Err(ConfigError::OutOfRange {
            key,
            min,
            max: MAX_DAY_SETTING,
        });
    }
    Ok(value)
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidSetting { key: &'static str },
    OutOfRange {
        key: &'static str,
        min: u32,
        max: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidSetting { key } => {
                write!(f, "{key} must be a positive integer")
            }
            ConfigError::OutOfRange { key, min, max } => {
                write!(f, "{key} must be between {min} and {max}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidPort
            | ConfigError::InvalidSetting { .. }
            | ConfigError::OutOfRange { .. } => None,
            ConfigError::InvalidHost { source } => Some(source),
        }
    }
}
