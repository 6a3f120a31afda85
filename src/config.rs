//! Application configuration module
//!
//! Handles loading and validating configuration from environment variables.

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid configuration value for {name}: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Invalid DATABASE_URL: {0}")]
    InvalidDatabaseUrl(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
            request_timeout_secs: 30,
        }
    }
}

/// Database configuration; absent means snapshots live in memory only
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_pool_size: usize,
    pub require_tls: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: String::new(),
            database: "postgres".to_string(),
            max_pool_size: 10,
            require_tls: false,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Tunables for the comparison, lifecycle and trend computations
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AnalysisConfig {
    /// Consecutive snapshots a finding must exceed to count as chronic
    pub chronic_after: usize,
    /// Minimum similarity for a probable file rename
    pub rename_threshold: f64,
    /// Minimum absolute risk change for a file to be listed as a mover
    pub mover_threshold: f64,
    /// Files plus findings across both sides of one comparison
    pub max_comparison_elements: usize,
    /// Trailing points used for velocity when the caller gives no window
    pub velocity_window: usize,
    /// Cached deltas and series; 0 disables the cache
    pub cache_capacity: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            chronic_after: 2,
            rename_threshold: 0.85,
            mover_threshold: 0.1,
            max_comparison_elements: 200_000,
            velocity_window: 5,
            cache_capacity: 256,
        }
    }
}

/// Complete application settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    pub cors: CorsConfig,
    pub analysis: AnalysisConfig,
}

impl Settings {
    /// Load settings from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from any variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let server_defaults = ServerConfig::default();
        let server = ServerConfig {
            host: parse_var(&lookup, "HOST", server_defaults.host)?,
            port: parse_var(&lookup, "PORT", server_defaults.port)?,
            request_timeout_secs: parse_var(&lookup, "REQUEST_TIMEOUT_SECS", server_defaults.request_timeout_secs)?,
        };

        let max_pool_size = parse_var(&lookup, "DB_MAX_CONNECTIONS", DatabaseConfig::default().max_pool_size)?;
        let database = match lookup("DATABASE_URL") {
            Some(url) if !url.trim().is_empty() => {
                let mut config = Self::parse_database_url(url.trim())?;
                config.max_pool_size = max_pool_size;
                Some(config)
            }
            _ => None,
        };

        let cors = CorsConfig {
            allowed_origins: lookup("ALLOWED_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| CorsConfig::default().allowed_origins),
        };

        let defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            chronic_after: parse_var(&lookup, "CHRONIC_AFTER", defaults.chronic_after)?,
            rename_threshold: parse_unit(&lookup, "RENAME_THRESHOLD", defaults.rename_threshold)?,
            mover_threshold: parse_unit(&lookup, "MOVER_THRESHOLD", defaults.mover_threshold)?,
            max_comparison_elements: parse_var(&lookup, "MAX_COMPARISON_ELEMENTS", defaults.max_comparison_elements)?,
            velocity_window: parse_var(&lookup, "VELOCITY_WINDOW", defaults.velocity_window)?,
            cache_capacity: parse_var(&lookup, "CACHE_CAPACITY", defaults.cache_capacity)?,
        };
        if analysis.velocity_window < 2 {
            return Err(ConfigError::InvalidValue {
                name: "VELOCITY_WINDOW".to_string(),
                value: analysis.velocity_window.to_string(),
            });
        }

        Ok(Self {
            server,
            database,
            cors,
            analysis,
        })
    }

    /// Parse a DATABASE_URL connection string (postgresql://...)
    fn parse_database_url(url: &str) -> Result<DatabaseConfig, ConfigError> {
        let parsed = url::Url::parse(url).map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;

        if !matches!(parsed.scheme(), "postgres" | "postgresql") {
            return Err(ConfigError::InvalidDatabaseUrl(format!(
                "unsupported scheme '{}' (expected postgresql://...)",
                parsed.scheme()
            )));
        }

        let host = parsed
            .host_str()
            .ok_or_else(|| ConfigError::InvalidDatabaseUrl("missing host".to_string()))?
            .to_string();

        let require_tls = parsed
            .query_pairs()
            .any(|(key, value)| key == "sslmode" && matches!(value.as_ref(), "require" | "verify-ca" | "verify-full"));

        let defaults = DatabaseConfig::default();
        let database = parsed.path().trim_start_matches('/');

        Ok(DatabaseConfig {
            host,
            port: parsed.port().unwrap_or(defaults.port),
            user: if parsed.username().is_empty() {
                defaults.user
            } else {
                parsed.username().to_string()
            },
            password: parsed.password().map(|p| p.to_string()).unwrap_or_default(),
            database: if database.is_empty() {
                defaults.database
            } else {
                database.to_string()
            },
            max_pool_size: defaults.max_pool_size,
            require_tls,
        })
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
        }),
        _ => Ok(default),
    }
}

/// A fraction in `[0, 1]`
fn parse_unit(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: f64) -> Result<f64, ConfigError> {
    let value: f64 = parse_var(lookup, name, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(value)
}
