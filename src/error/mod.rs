// Error types for the auto Z-offset engine
//
// This module defines custom error types for configuration loading and probing
// operations, providing structured error handling with stable error codes that
// a host runtime can surface next to the human-readable message.

mod config;
mod probe;

pub use config::{log_config_error, ConfigError, ConfigErrorCodes};
pub use probe::{log_probe_error, ProbeError, ProbeErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error reporting across
/// the command boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
