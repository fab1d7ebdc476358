//! Service configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use common::ServiceId;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use pipeline::RetryPolicy;

use crate::ConfigError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(format!("expected 'json' or 'pretty', got '{other}'")),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SERVICE_NAME` (required) and `SERVICE_VERSION` (default: `"1"`)
/// - `RABBITMQ_URL` (default: `"amqp://127.0.0.1:5672/%2f"`)
/// - `REDIS_URL`, or `REDIS_HOST` (default: `"127.0.0.1"`), `REDIS_PORT`
///   (default: `6379`) and optional `REDIS_PASSWORD`
/// - `CONNECT_MAX_RETRIES` (default: `5`) and `CONNECT_INITIAL_DELAY_MS`
///   (default: `1000`)
/// - `RUST_LOG` (default: `"info"`) and `LOG_FORMAT` (default: `"json"`)
/// - `METRICS_ADDR`, the Prometheus listener address (default: disabled)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub service_name: String,
    pub service_version: String,
    pub rabbitmq_url: String,
    pub redis_url: String,
    pub connect_max_retries: u32,
    pub connect_initial_delay: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_addr: Option<SocketAddr>,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from `lookup`, which returns a variable's value if
    /// it is set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let service_name = var("SERVICE_NAME").ok_or(ConfigError::Missing("SERVICE_NAME"))?;
        let redis_url = match var("REDIS_URL") {
            Some(url) => url,
            None => redis_url(
                &var("REDIS_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                parse("REDIS_PORT", var("REDIS_PORT"))?.unwrap_or(6379),
                var("REDIS_PASSWORD").as_deref(),
            ),
        };

        Ok(Self {
            service_name,
            service_version: var("SERVICE_VERSION").unwrap_or(defaults.service_version),
            rabbitmq_url: var("RABBITMQ_URL").unwrap_or(defaults.rabbitmq_url),
            redis_url,
            connect_max_retries: parse("CONNECT_MAX_RETRIES", var("CONNECT_MAX_RETRIES"))?
                .unwrap_or(defaults.connect_max_retries),
            connect_initial_delay: parse::<u64>(
                "CONNECT_INITIAL_DELAY_MS",
                var("CONNECT_INITIAL_DELAY_MS"),
            )?
            .map(Duration::from_millis)
            .unwrap_or(defaults.connect_initial_delay),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse("LOG_FORMAT", var("LOG_FORMAT"))?.unwrap_or_default(),
            metrics_addr: parse("METRICS_ADDR", var("METRICS_ADDR"))?,
        })
    }

    /// Returns the `"<name>-<version>"` identity of this service.
    pub fn service_id(&self) -> ServiceId {
        ServiceId::new(&self.service_name, &self.service_version)
    }

    /// Returns the bounds for connecting to the broker at startup.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.connect_max_retries,
            initial_delay: self.connect_initial_delay,
        }
    }

    pub fn with_service(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.service_name = name.into();
        self.service_version = version.into();
        self
    }

    pub fn with_rabbitmq_url(mut self, url: impl Into<String>) -> Self {
        self.rabbitmq_url = url.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_connect_retry(mut self, max_retries: u32, initial_delay: Duration) -> Self {
        self.connect_max_retries = max_retries;
        self.connect_initial_delay = initial_delay;
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    pub fn with_metrics_addr(mut self, addr: SocketAddr) -> Self {
        self.metrics_addr = Some(addr);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "service".to_string(),
            service_version: "1".to_string(),
            rabbitmq_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            connect_max_retries: 5,
            connect_initial_delay: Duration::from_millis(1000),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_addr: None,
        }
    }
}

fn parse<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|value| {
            value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}

fn redis_url(host: &str, port: u16, password: Option<&str>) -> String {
    match password {
        Some(password) => format!(
            "redis://:{}@{host}:{port}",
            utf8_percent_encode(password, NON_ALPHANUMERIC)
        ),
        None => format!("redis://{host}:{port}"),
    }
}
