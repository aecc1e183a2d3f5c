// Configuration error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Configuration error code constants
///
/// Single source of truth for the codes reported when a probe section
/// fails to load. The module never becomes active after any of these.
///
/// Error code range: 1001-1005
pub struct ConfigErrorCodes {}

impl ConfigErrorCodes {
    /// Enumerated option holds an unrecognized token
    pub const INVALID_OPTION: i32 = 1001;

    /// Numeric field outside its allowed range
    pub const OUT_OF_RANGE: i32 = 1002;

    /// Required field absent from the section
    pub const MISSING_FIELD: i32 = 1003;

    /// Field text could not be parsed into its type
    pub const PARSE: i32 = 1004;

    /// Configuration source could not be read
    pub const IO: i32 = 1005;
}

/// Log a configuration error with structured context
///
/// Emits error_code, component and message fields so a host log can be
/// grepped for the failing option without reading the config file.
pub fn log_config_error(err: &ConfigError, context: &str) {
    error!(
        "Config error in {}: code={}, component=ProbeConfig, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Configuration-related errors
///
/// Raised while turning raw key/value text into a validated
/// [`crate::config::ProbeConfig`]. All of them are fatal at load.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Enumerated option is not one of the recognized tokens
    InvalidOption {
        key: String,
        value: String,
        expected: &'static [&'static str],
    },

    /// Numeric value violates its bound
    OutOfRange {
        key: String,
        value: f64,
        constraint: String,
    },

    /// Required field absent
    MissingField { key: String },

    /// Field text could not be parsed
    Parse { key: String, value: String },

    /// Config file could not be read or decoded
    Io { details: String },
}

impl ConfigError {
    pub(crate) fn out_of_range(key: &str, value: f64, constraint: impl Into<String>) -> Self {
        ConfigError::OutOfRange {
            key: key.to_string(),
            value,
            constraint: constraint.into(),
        }
    }
}

impl ErrorCode for ConfigError {
    fn code(&self) -> i32 {
        match self {
            ConfigError::InvalidOption { .. } => ConfigErrorCodes::INVALID_OPTION,
            ConfigError::OutOfRange { .. } => ConfigErrorCodes::OUT_OF_RANGE,
            ConfigError::MissingField { .. } => ConfigErrorCodes::MISSING_FIELD,
            ConfigError::Parse { .. } => ConfigErrorCodes::PARSE,
            ConfigError::Io { .. } => ConfigErrorCodes::IO,
        }
    }

    fn message(&self) -> String {
        match self {
            ConfigError::InvalidOption {
                key,
                value,
                expected,
            } => {
                format!(
                    "Option '{}' has invalid value '{}' (expected one of: {})",
                    key,
                    value,
                    expected.join(", ")
                )
            }
            ConfigError::OutOfRange {
                key,
                value,
                constraint,
            } => {
                format!("Option '{}' = {} is out of range (must be {})", key, value, constraint)
            }
            ConfigError::MissingField { key } => {
                format!("Option '{}' must be specified", key)
            }
            ConfigError::Parse { key, value } => {
                format!("Unable to parse option '{}' value '{}'", key, value)
            }
            ConfigError::Io { details } => format!("Unable to load configuration: {}", details),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ConfigError::{} (code {}): {}",
            self.variant_name(),
            self.code(),
            self.message()
        )
    }
}

impl ConfigError {
    fn variant_name(&self) -> &'static str {
        match self {
            ConfigError::InvalidOption { .. } => "InvalidOption",
            ConfigError::OutOfRange { .. } => "OutOfRange",
            ConfigError::MissingField { .. } => "MissingField",
            ConfigError::Parse { .. } => "Parse",
            ConfigError::Io { .. } => "Io",
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io {
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Io {
            details: err.to_string(),
        }
    }
}
