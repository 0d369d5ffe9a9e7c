use std::path::Path;
use thiserror::Error;

use super::types::GatewayConfigFile;
use crate::pacing::RateLimiter;

/// Most extra client ids a handshake may burn on one port
pub const MAX_WARMUP_RETRIES: u32 = 2;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Load gateway configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<GatewayConfigFile, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: GatewayConfigFile = serde_json::from_str(&content)?;
    Ok(config)
}

/// Load configuration from a JSON string
pub fn load_config_from_str(json: &str) -> Result<GatewayConfigFile, ConfigError> {
    let config: GatewayConfigFile = serde_json::from_str(json)?;
    Ok(config)
}

/// Load the default embedded configuration
pub fn load_default_config() -> Result<GatewayConfigFile, ConfigError> {
    let default_config = include_str!("gateway_config.json");
    load_config_from_str(default_config)
}

impl GatewayConfigFile {
    /// Apply `IB_*` overrides read through `lookup`.
    ///
    /// Recognised keys: `IB_HOST`, `IB_PORT`, `IB_CLIENT_ID`,
    /// `IB_CONNECT_TIMEOUT` (seconds) and `IB_GATEWAY_START_CMD`.
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = get("IB_HOST") {
            self.connection.host = host;
        }
        if let Some(port) = get("IB_PORT") {
            let parsed = port.parse::<u16>().ok().filter(|p| *p != 0);
            self.connection.port = Some(parsed.ok_or(ConfigError::InvalidEnv {
                key: "IB_PORT",
                value: port,
            })?);
        }
        if let Some(client_id) = get("IB_CLIENT_ID") {
            self.connection.client_id = client_id.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "IB_CLIENT_ID",
                value: client_id,
            })?;
        }
        if let Some(timeout) = get("IB_CONNECT_TIMEOUT") {
            let secs = timeout.parse::<f64>().ok().filter(|s| s.is_finite() && *s > 0.0);
            let secs = secs.ok_or(ConfigError::InvalidEnv {
                key: "IB_CONNECT_TIMEOUT",
                value: timeout,
            })?;
            self.handshake.set_connect_timeout_secs(secs.ceil() as u64);
        }
        if let Some(cmd) = get("IB_GATEWAY_START_CMD") {
            self.connection.autostart_command = Some(cmd);
        }
        Ok(())
    }

    /// Apply overrides from the process environment
    pub fn apply_process_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides(|key| std::env::var(key).ok())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.handshake.socket_open_timeout_ms == 0 || self.handshake.api_ready_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake timeouts must be greater than zero".into(),
            ));
        }
        if self.handshake.warmup_retries > MAX_WARMUP_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "warmup_retries must be at most {MAX_WARMUP_RETRIES}"
            )));
        }
        let md = &self.market_data;
        if !(md.requests_per_second.is_finite() && md.requests_per_second > 0.0) {
            return Err(ConfigError::Invalid(
                "requests_per_second must be positive".into(),
            ));
        }
        if RateLimiter::interval_for(md.requests_per_second).is_none() {
            return Err(ConfigError::Invalid(
                "requests_per_second must allow at least one request per day".into(),
            ));
        }
        if md.request_burst == 0 {
            return Err(ConfigError::Invalid("request_burst must be at least 1".into()));
        }
        if md.depth_rows == 0 {
            return Err(ConfigError::Invalid("depth_rows must be at least 1".into()));
        }
        if md.event_buffer == 0 {
            return Err(ConfigError::Invalid("event_buffer must be at least 1".into()));
        }
        Ok(())
    }
}
