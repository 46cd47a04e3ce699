//! Configuration module for the linefreq meter.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the frequency meter
#[derive(Parser, Debug)]
#[command(name = "linefreq")]
#[command(author = "linefreq authors")]
#[command(version = "0.1.0")]
#[command(about = "A powerline frequency meter with a plain-text status protocol", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:80)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// GPIO line carrying the squared-off AC signal
    #[arg(short = 'p', long)]
    pub gpio_pin: Option<u32>,

    /// Number of pulse samples per measurement batch
    #[arg(short = 's', long)]
    pub samples: Option<usize>,

    /// Timeout for a single pulse-phase read in milliseconds
    #[arg(long)]
    pub pulse_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub meter: MeterConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Timeout for reading a request line after accept, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// How long each main-loop iteration polls for connections, in milliseconds
    #[serde(default = "default_poll_window_ms")]
    pub poll_window_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            request_timeout_ms: default_request_timeout_ms(),
            poll_window_ms: default_poll_window_ms(),
        }
    }
}

/// Measurement-related configuration
#[derive(Debug, Deserialize)]
pub struct MeterConfig {
    /// GPIO line carrying the squared-off AC signal
    #[serde(default)]
    pub gpio_pin: u32,
    /// Override for the GPIO value-file path (defaults to the sysfs path
    /// derived from `gpio_pin`)
    pub gpio_path: Option<PathBuf>,
    /// Number of pulse samples per measurement batch
    #[serde(default = "default_samples")]
    pub samples: usize,
    /// Timeout for a single pulse-phase read in milliseconds
    #[serde(default = "default_pulse_timeout_ms")]
    pub pulse_timeout_ms: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 0,
            gpio_path: None,
            samples: default_samples(),
            pulse_timeout_ms: default_pulse_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:80".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_poll_window_ms() -> u64 {
    1000
}

fn default_samples() -> usize {
    50
}

fn default_pulse_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub request_timeout_ms: u64,
    pub poll_window_ms: u64,
    pub gpio_pin: u32,
    pub gpio_path: PathBuf,
    pub samples: usize,
    pub pulse_timeout_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::resolve(CliArgs::parse())
    }

    fn resolve(cli: CliArgs) -> Result<Self, ConfigError> {
        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let gpio_pin = cli.gpio_pin.unwrap_or(toml_config.meter.gpio_pin);
        let gpio_path = toml_config
            .meter
            .gpio_path
            .unwrap_or_else(|| sysfs_value_path(gpio_pin));

        // Merge CLI args with TOML config (CLI takes precedence)
        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            request_timeout_ms: toml_config.server.request_timeout_ms,
            poll_window_ms: toml_config.server.poll_window_ms,
            gpio_pin,
            gpio_path,
            samples: cli.samples.unwrap_or(toml_config.meter.samples),
            pulse_timeout_ms: cli
                .pulse_timeout_ms
                .unwrap_or(toml_config.meter.pulse_timeout_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Sysfs value-file path for a GPIO line
fn sysfs_value_path(pin: u32) -> PathBuf {
    PathBuf::from(format!("/sys/class/gpio/gpio{}/value", pin))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:80");
        assert_eq!(config.meter.gpio_pin, 0);
        assert_eq!(config.meter.samples, 50);
        assert_eq!(config.meter.pulse_timeout_ms, 1000);
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:8080"
            request_timeout_ms = 2000

            [meter]
            gpio_pin = 3
            samples = 100
            pulse_timeout_ms = 500

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.request_timeout_ms, 2000);
        assert_eq!(config.meter.gpio_pin, 3);
        assert_eq!(config.meter.samples, 100);
        assert_eq!(config.meter.pulse_timeout_ms, 500);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_sysfs_path_from_pin() {
        assert_eq!(
            sysfs_value_path(17),
            PathBuf::from("/sys/class/gpio/gpio17/value")
        );
    }
}
