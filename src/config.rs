//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Prefix for every API route
    pub base_path: String,

    /// Store the campaigns run against
    pub store_backend: StoreBackend,

    /// Log line format
    pub log_format: LogFormat,
}

/// Backing store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            _ => Err(()),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let host = var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = var("SERVER_PORT")
            .unwrap_or_else(|| "8090".to_string())
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SERVER_PORT"))?;

        let base_path = var("SERVER_BASE_PATH").unwrap_or_else(|| "/api/v1".to_string());
        if !base_path.starts_with('/') {
            return Err(ConfigError::InvalidValue("SERVER_BASE_PATH"));
        }
        let base_path = base_path.trim_end_matches('/').to_string();

        let store_backend = var("STORE_BACKEND")
            .unwrap_or_else(|| "postgres".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("STORE_BACKEND"))?;

        let log_format = var("LOG_FORMAT")
            .unwrap_or_else(|| "json".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("LOG_FORMAT"))?;

        Ok(Self {
            host,
            port,
            base_path,
            store_backend,
            log_format,
        })
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
