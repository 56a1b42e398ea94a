use std::{
    env,
    net::{AddrParseError, IpAddr, SocketAddr},
    time::Duration,
};

use thiserror::Error;

pub const DEFAULT_CORS_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "https://api.todo-list.app",
    "https://todo-list.app",
    "https://beta.todo-list.app",
];

/// Connection parameters for the presence document store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// `None` selects the in-memory store.
    pub url: Option<String>,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: "todo_list".to_string(),
            collection: "ping".to_string(),
            connect_timeout: Duration::from_millis(5_000),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub build_sha: String,
    pub bind_host: IpAddr,
    pub http_port: u16,
    pub rpc_port: u16,
    pub development: bool,
    pub identity_service: String,
    pub identity_timeout: Duration,
    pub http_request_timeout: Duration,
    pub cors_allowed_origins: Vec<String>,
    pub store: StoreConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid BIND_HOST: {0}")]
    BindHostParse(#[from] AddrParseError),
    #[error("invalid HTTP_PORT: {0}")]
    InvalidHttpPort(String),
    #[error("invalid GRPC_PORT: {0}")]
    InvalidRpcPort(String),
    #[error("invalid DEVELOPMENT: {0}")]
    InvalidDevelopment(String),
    #[error("invalid IDENTITY_SERVICE: {0}")]
    InvalidIdentityService(String),
    #[error("invalid timeout setting: {0}")]
    InvalidTimeout(String),
    #[error("invalid store setting: {0}")]
    InvalidStore(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let service_name = lookup("SERVICE_NAME").unwrap_or_else(|| "ping-service".to_string());
        let build_sha = lookup("BUILD_SHA").unwrap_or_else(|| "dev".to_string());
        let bind_host = lookup("BIND_HOST")
            .unwrap_or_else(|| "0.0.0.0".to_string())
            .trim()
            .parse()?;
        let http_port = parse_with_lookup(&lookup, "HTTP_PORT", 80, |raw| {
            raw.trim()
                .parse::<u16>()
                .map_err(|error| ConfigError::InvalidHttpPort(error.to_string()))
        })?;
        let rpc_port = parse_with_lookup(&lookup, "GRPC_PORT", 8001, |raw| {
            raw.trim()
                .parse::<u16>()
                .map_err(|error| ConfigError::InvalidRpcPort(error.to_string()))
        })?;
        let development = parse_with_lookup(&lookup, "DEVELOPMENT", false, |raw| {
            parse_bool(&raw).map_err(ConfigError::InvalidDevelopment)
        })?;
        let identity_service = lookup("IDENTITY_SERVICE")
            .map(|value| value.trim().to_string())
            .unwrap_or_else(|| "id-checker.todo-list:3000".to_string());
        if identity_service.is_empty() {
            return Err(ConfigError::InvalidIdentityService(
                "address must not be empty".to_string(),
            ));
        }
        let identity_timeout = parse_millis_lookup(&lookup, "IDENTITY_TIMEOUT_MS", 5_000)?;
        let http_request_timeout = parse_millis_lookup(&lookup, "HTTP_REQUEST_TIMEOUT_MS", 10_000)?;
        // The identity call runs inside the request deadline and must be able to fail first.
        if identity_timeout >= http_request_timeout {
            return Err(ConfigError::InvalidTimeout(format!(
                "IDENTITY_TIMEOUT_MS ({}) must be below HTTP_REQUEST_TIMEOUT_MS ({})",
                identity_timeout.as_millis(),
                http_request_timeout.as_millis()
            )));
        }
        let cors_allowed_origins = match lookup("CORS_ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(normalize_origin_value)
                .collect(),
            None => DEFAULT_CORS_ALLOWED_ORIGINS
                .iter()
                .map(|value| (*value).to_string())
                .collect(),
        };

        let store_url = lookup("STORE_URL")
            .or_else(|| lookup("DATABASE_URL"))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let store_database = parse_identifier(
            "STORE_DATABASE",
            lookup("STORE_DATABASE").unwrap_or_else(|| "todo_list".to_string()),
        )?;
        let store_collection = parse_identifier(
            "STORE_COLLECTION",
            lookup("STORE_COLLECTION").unwrap_or_else(|| "ping".to_string()),
        )?;
        let store_connect_timeout = parse_millis_lookup(&lookup, "STORE_CONNECT_TIMEOUT_MS", 5_000)?;

        Ok(Self {
            service_name,
            build_sha,
            bind_host,
            http_port,
            rpc_port,
            development,
            identity_service,
            identity_timeout,
            http_request_timeout,
            cors_allowed_origins,
            store: StoreConfig {
                url: store_url,
                database: store_database,
                collection: store_collection,
                connect_timeout: store_connect_timeout,
            },
        })
    }

    #[must_use]
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.http_port)
    }

    #[must_use]
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_host, self.rpc_port)
    }
}

fn parse_with_lookup<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    parser: impl FnOnce(String) -> Result<T, ConfigError>,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => parser(raw),
        None => Ok(default),
    }
}

fn parse_millis_lookup(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    parse_with_lookup(lookup, key, Duration::from_millis(default_ms), |raw| {
        raw.trim()
            .parse::<u64>()
            .map(|value| Duration::from_millis(value.max(1)))
            .map_err(|error| ConfigError::InvalidTimeout(format!("{key}: {error}")))
    })
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(other.to_string()),
    }
}

// Database and collection names are spliced into SQL as quoted identifiers.
fn parse_identifier(key: &str, raw: String) -> Result<String, ConfigError> {
    let value = raw.trim().to_string();
    let mut chars = value.chars();
    let valid_head = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if valid_head && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
        Ok(value)
    } else {
        Err(ConfigError::InvalidStore(format!(
            "{key}: {value:?} is not an identifier"
        )))
    }
}

fn normalize_origin_value(value: &str) -> String {
    value.trim().trim_end_matches('/').to_ascii_lowercase()
}
