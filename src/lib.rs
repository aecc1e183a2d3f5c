// Auto Z-Offset - inductive probe calibration against bed-mounted sensors
// Measures the bed sensor and inductive probe trigger heights, reduces
// repeated runs to one correction and applies it as a live Z offset

// Module declarations
pub mod calibration;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod hardware;
pub mod probing;
pub mod telemetry;

// Re-exports for convenience
pub use calibration::{CalibrationPhase, CalibrationResult, MeasurementResult};
pub use commands::{AutoZCommand, CommandResponse};
pub use config::{AppConfig, ProbeConfig, RawProbeConfig, SamplesResult};
pub use context::{AutoZContext, AutoZStatus};
pub use error::{ConfigError, ErrorCode, ProbeError};
pub use hardware::Collaborators;
