//! Instrument configuration using Figment
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `INSTRUMENTRS_`
//! 2. TOML configuration file (default: `config/instruments.toml`)
//!
//! Nested keys are separated by a double underscore in environment variables:
//!
//! ```text
//! INSTRUMENTRS_APPLICATION__LOG_LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```toml
//! [application]
//! name = "bench-1"
//! log_level = "info"
//!
//! [[instruments]]
//! id = "psu"
//! type = "MX100TP"
//!
//! [instruments.connection]
//! method = "serial"
//!
//! [instruments.connection.serial]
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::common::ConnectionMethod;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/instruments.toml";

/// Instrument types this crate has drivers for.
pub const SUPPORTED_INSTRUMENT_TYPES: [&str; 2] = ["MX100TP", "TS3"];

/// TS3 replies end in `\r`; the serial transport reads up to `\n`.
const TCP_ONLY_TYPES: [&str; 1] = ["TS3"];

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be read or deserialized
    #[error("Configuration load error: {0}")]
    LoadError(#[from] Box<figment::Error>),
    /// Loaded, but the values are inconsistent
    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstrumentsConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Instrument definitions
    #[serde(default)]
    pub instruments: Vec<InstrumentDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Instrument definition in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentDefinition {
    /// Unique instrument identifier
    pub id: String,
    /// Instrument type (MX100TP, TS3)
    pub r#type: String,
    /// Whether this instrument is enabled
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How to reach the instrument
    pub connection: ConnectionConfig,
}

/// Transport selection plus the settings for that transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionConfig {
    /// Transport to use
    pub method: ConnectionMethod,
    /// Required when `method` is serial
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<SerialConfig>,
    /// Required when `method` is tcpip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp: Option<TcpConfig>,
}

impl ConnectionConfig {
    /// Serial connection with default line settings.
    pub fn serial(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            method: ConnectionMethod::Serial,
            serial: Some(SerialConfig::new(port, baud_rate)),
            tcp: None,
        }
    }

    /// TCP/IP connection with the default timeout.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            method: ConnectionMethod::TcpIp,
            serial: None,
            tcp: Some(TcpConfig::new(host, port)),
        }
    }
}

/// Serial line settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SerialConfig {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Line speed in baud
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Data bits (5-8)
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// Parity bit
    #[serde(default)]
    pub parity: SerialParity,
    /// Stop bits (1 or 2)
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    /// Handshake
    #[serde(default)]
    pub flow_control: FlowControl,
}

impl SerialConfig {
    /// 8N1, no flow control, default timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout_ms: default_timeout_ms(),
            data_bits: default_data_bits(),
            parity: SerialParity::None,
            stop_bits: default_stop_bits(),
            flow_control: FlowControl::None,
        }
    }

    /// Override the read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Read timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Serial parity setting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SerialParity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Serial handshake setting
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    /// No handshake
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// TCP/IP socket settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TcpConfig {
    /// Host name or IP address
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Connect and read timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl TcpConfig {
    /// Socket settings with the default timeout
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Connect and read timeout as a `Duration`
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl fmt::Display for TcpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "instrumentrs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl InstrumentsConfig {
    /// Load configuration from the default path and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; the environment alone may describe
    /// the setup. The merged result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("INSTRUMENTRS_").split("__"))
            .extract()
            .map_err(|e| ConfigError::LoadError(Box::new(e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Instrument IDs are unique
    /// - Instrument types have a driver
    /// - Each connection carries the block its method needs
    /// - TS3 fixtures are reached over TCP/IP
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let mut ids = std::collections::HashSet::new();
        for instrument in &self.instruments {
            if !ids.insert(&instrument.id) {
                return Err(ConfigError::ValidationError(format!(
                    "Duplicate instrument ID: '{}'",
                    instrument.id
                )));
            }

            if !SUPPORTED_INSTRUMENT_TYPES.contains(&instrument.r#type.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid instrument type '{}' for instrument '{}'. Must be one of: {}",
                    instrument.r#type,
                    instrument.id,
                    SUPPORTED_INSTRUMENT_TYPES.join(", ")
                )));
            }

            if TCP_ONLY_TYPES.contains(&instrument.r#type.as_str())
                && instrument.connection.method == ConnectionMethod::Serial
            {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': {} is only supported over tcpip, not serial",
                    instrument.id, instrument.r#type
                )));
            }

            validate_connection(&instrument.id, &instrument.connection)?;
        }

        Ok(())
    }

    /// Get all enabled instruments
    pub fn enabled_instruments(&self) -> Vec<&InstrumentDefinition> {
        self.instruments.iter().filter(|inst| inst.enabled).collect()
    }

    /// Look up an instrument by id
    pub fn instrument(&self, id: &str) -> Option<&InstrumentDefinition> {
        self.instruments.iter().find(|inst| inst.id == id)
    }

    /// Render the effective configuration (file plus environment) as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| {
            ConfigError::ValidationError(format!("Cannot serialize configuration: {}", e))
        })
    }
}

fn validate_connection(id: &str, connection: &ConnectionConfig) -> Result<(), ConfigError> {
    match connection.method {
        ConnectionMethod::Serial => {
            let serial = connection.serial.as_ref().ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Instrument '{}' uses serial but has no 'serial' block",
                    id
                ))
            })?;
            if serial.port.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': serial 'port' cannot be empty",
                    id
                )));
            }
            if serial.baud_rate == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'baud_rate' must be > 0",
                    id
                )));
            }
            if !(5..=8).contains(&serial.data_bits) {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'data_bits' must be 5-8",
                    id
                )));
            }
            if !(1..=2).contains(&serial.stop_bits) {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': 'stop_bits' must be 1 or 2",
                    id
                )));
            }
        }
        ConnectionMethod::TcpIp => {
            let tcp = connection.tcp.as_ref().ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "Instrument '{}' uses tcpip but has no 'tcp' block",
                    id
                ))
            })?;
            if tcp.host.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "Instrument '{}': tcp 'host' cannot be empty",
                    id
                )));
            }
        }
        // Accepted here so a config can describe the bench; opening it fails.
        ConnectionMethod::Visa => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psu(id: &str) -> InstrumentDefinition {
        InstrumentDefinition {
            id: id.to_string(),
            r#type: "MX100TP".to_string(),
            enabled: true,
            connection: ConnectionConfig::serial("/dev/ttyUSB0", 9600),
        }
    }

    fn config(instruments: Vec<InstrumentDefinition>) -> InstrumentsConfig {
        InstrumentsConfig {
            application: ApplicationConfig::default(),
            instruments,
        }
    }

    #[test]
    fn test_config_validation_valid() {
        let mut fixture = psu("ts3");
        fixture.r#type = "TS3".to_string();
        fixture.connection = ConnectionConfig::tcp("192.168.1.50", 2101);
        assert!(config(vec![psu("psu"), fixture]).validate().is_ok());
    }

    #[test]
    fn test_ts3_over_serial_rejected() {
        let mut fixture = psu("fixture");
        fixture.r#type = "TS3".to_string();
        let result = config(vec![fixture]).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("TS3 is only supported over tcpip"));
    }

    #[test]
    fn test_to_toml_reloads() {
        let cfg = config(vec![psu("psu")]);
        let rendered = cfg.to_toml().unwrap();
        assert!(rendered.contains("MX100TP"));
        let parsed: InstrumentsConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.instruments[0].connection, cfg.instruments[0].connection);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut cfg = config(vec![]);
        cfg.application.log_level = "loud".to_string();
        let result = cfg.validate();
        assert!(result.unwrap_err().to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_duplicate_instrument_ids() {
        let result = config(vec![psu("psu"), psu("psu")]).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Duplicate instrument ID"));
    }

    #[test]
    fn test_invalid_instrument_type() {
        let mut inst = psu("scope");
        inst.r#type = "DSO1000".to_string();
        let result = config(vec![inst]).validate();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Invalid instrument type 'DSO1000'"));
    }

    #[test]
    fn test_serial_block_required() {
        let mut inst = psu("psu");
        inst.connection.serial = None;
        let result = config(vec![inst]).validate();
        assert!(result.unwrap_err().to_string().contains("no 'serial' block"));
    }

    #[test]
    fn test_empty_port_rejected() {
        let mut inst = psu("psu");
        inst.connection = ConnectionConfig::serial("", 9600);
        let result = config(vec![inst]).validate();
        assert!(result.unwrap_err().to_string().contains("cannot be empty"));
    }

    #[test]
    fn test_tcp_block_required() {
        let mut inst = psu("psu");
        inst.connection.method = ConnectionMethod::TcpIp;
        let result = config(vec![inst]).validate();
        assert!(result.unwrap_err().to_string().contains("no 'tcp' block"));
    }

    #[test]
    fn test_visa_passes_validation() {
        let mut inst = psu("psu");
        inst.connection = ConnectionConfig {
            method: ConnectionMethod::Visa,
            serial: None,
            tcp: None,
        };
        assert!(config(vec![inst]).validate().is_ok());
    }

    #[test]
    fn test_enabled_instruments_filter() {
        let mut disabled = psu("spare");
        disabled.enabled = false;
        let cfg = config(vec![psu("psu"), disabled]);

        let enabled = cfg.enabled_instruments();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, "psu");
        assert!(cfg.instrument("spare").is_some());
        assert!(cfg.instrument("missing").is_none());
    }

    #[test]
    fn test_serial_config_defaults_from_toml() {
        let parsed: SerialConfig = toml::from_str(r#"port = "COM3""#).unwrap();
        assert_eq!(parsed, SerialConfig::new("COM3", 9600));
        assert_eq!(parsed.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_tcp_config_display() {
        assert_eq!(TcpConfig::new("10.0.0.2", 2101).to_string(), "10.0.0.2:2101");
    }
}
