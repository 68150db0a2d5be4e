use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub accrual: AccrualConfig,
    pub poller: PollerSettings,
    pub log_level: String,
    pub log_format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// `host:port` to listen on
    pub address: String,
    pub workers: usize,
    pub request_timeout_ms: u64,
    /// Header the upstream identity provider puts the user login in
    pub identity_header: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    /// Postgres URI; empty selects the in-memory store
    pub uri: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub auto_migrate: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccrualConfig {
    pub address: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PollerSettings {
    pub interval_secs: u64,
    pub enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("server.address", "localhost:8080")?
            .set_default("server.workers", 4)?
            .set_default("server.request_timeout_ms", 1000)?
            .set_default("server.identity_header", "X-User-Login")?
            .set_default("database.uri", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.auto_migrate", true)?
            .set_default("accrual.address", "localhost:8081")?
            .set_default("accrual.timeout_ms", 1000)?
            .set_default("poller.interval_secs", 1)?
            .set_default("poller.enabled", true)?
            .set_default("log_level", "INFO")?
            .set_default("log_format", "text")?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(Environment::with_prefix("LOYALTY").separator("__"));

        // Variables understood by the rest of the deployment
        if let Ok(address) = env::var("RUN_ADDRESS") {
            builder = builder.set_override("server.address", address)?;
        }

        if let Ok(uri) = env::var("DATABASE_URI") {
            builder = builder.set_override("database.uri", uri)?;
        }

        if let Ok(address) = env::var("ACCRUAL_SYSTEM_ADDRESS") {
            builder = builder.set_override("accrual.address", address)?;
        }

        if let Ok(interval) = env::var("POLL_INTERVAL") {
            let secs = parse_interval_secs(&interval).map_err(ConfigError::Message)?;
            builder = builder.set_override("poller.interval_secs", secs as i64)?;
        }

        if let Ok(level) = env::var("LOG_LEVEL") {
            builder = builder.set_override("log_level", level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.address.trim().is_empty() {
            return Err("Server address is required".to_string());
        }

        if self.server.workers == 0 {
            return Err("Server workers cannot be 0".to_string());
        }

        if self.server.request_timeout_ms == 0 {
            return Err("Request timeout cannot be 0".to_string());
        }

        if self.server.identity_header.trim().is_empty() {
            return Err("Identity header name is required".to_string());
        }

        if self.accrual.address.trim().is_empty() {
            return Err("Accrual system address is required".to_string());
        }

        if self.poller.interval_secs == 0 {
            return Err("Poll interval cannot be 0".to_string());
        }

        if self.uses_database() && self.database.max_connections == 0 {
            return Err("Database max connections cannot be 0".to_string());
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err(format!("Unknown log format: {}", self.log_format));
        }

        log_directive(&self.log_level)?;

        Ok(())
    }

    /// Postgres is used only when a URI is configured
    pub fn uses_database(&self) -> bool {
        !self.database.uri.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.server.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poller.interval_secs)
    }

    pub fn accrual_timeout(&self) -> Duration {
        Duration::from_millis(self.accrual.timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.database.acquire_timeout_secs)
    }
}

/// Accepts `5` or `5s`
pub fn parse_interval_secs(raw: &str) -> Result<u64, String> {
    let raw = raw.trim();
    let digits = raw.strip_suffix('s').unwrap_or(raw);
    digits
        .parse::<u64>()
        .map_err(|_| format!("Invalid POLL_INTERVAL: {}", raw))
}

/// Map a configured log level to a `tracing` filter directive
pub fn log_directive(level: &str) -> Result<&'static str, String> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Ok("trace"),
        "DEBUG" => Ok("debug"),
        "INFO" => Ok("info"),
        "WARNING" | "WARN" => Ok("warn"),
        "ERROR" => Ok("error"),
        other => Err(format!("Unknown log level: {}", other)),
    }
}
