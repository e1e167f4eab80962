use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use relay_sfu::SfuConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub sfu: SfuConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Route the signaling WebSocket is served on
    pub ws_path: String,
    /// Largest inbound frame accepted, in bytes
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            ws_path: "/ws".to_string(),
            // Signaling frames are small; SDP rarely exceeds a few KiB
            max_message_size: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        Self::load_with(config_file, environment())
    }

    fn load_with(config_file: Option<&str>, environment: Environment) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        // A file that was asked for must exist
        if let Some(path) = config_file {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // RELAY_SERVER__PORT, RELAY_SFU__NEGOTIATION_TIMEOUT_SECS, ...
        builder = builder.add_source(environment);

        builder.build()?.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Collect every configuration problem
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be greater than 0".to_string());
        }
        if !self.server.ws_path.starts_with('/') {
            errors.push(format!("server.ws_path '{}' must start with '/'", self.server.ws_path));
        }
        if self.server.ws_path == "/health" {
            errors.push("server.ws_path must not shadow /health".to_string());
        }
        if self.server.max_message_size == 0 {
            errors.push("server.max_message_size must be greater than 0".to_string());
        }

        if let Err(e) = logging::parse_log_level(&self.logging.level) {
            errors.push(format!("logging.level: {e}"));
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!(
                "logging.format '{}' must be 'json' or 'pretty'",
                self.logging.format
            ));
        }

        if let Err(sfu_errors) = self.sfu.validate() {
            errors.extend(sfu_errors);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn environment() -> Environment {
    Environment::with_prefix("RELAY")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

/// Resolve and load the configuration
///
/// Config file search order:
/// 1. `--config` / `RELAY_CONFIG_PATH`
/// 2. ./config.yaml (current working directory)
/// 3. Fall back to environment variables only
pub fn load_config(explicit: Option<&str>) -> anyhow::Result<Config> {
    let config_path = explicit
        .map(str::to_string)
        .or_else(|| Path::new("config.yaml").exists().then(|| "config.yaml".to_string()));

    let config = if let Some(path) = config_path {
        if !Path::new(&path).exists() {
            return Err(anyhow::anyhow!("Config file {path} does not exist"));
        }
        eprintln!("Loading config from {path}");
        Config::load(Some(&path)).map_err(|e| anyhow::anyhow!("Failed to load {path}: {e}"))?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s): {}",
            errors.len(),
            errors.join("; ")
        ));
    }

    Ok(config)
}
