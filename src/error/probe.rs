// Probe error types and constants

use crate::calibration::CalibrationPhase;
use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Probe error code constants
///
/// Codes reported to the host when a probing command aborts.
///
/// Error code range: 2001-2008
pub struct ProbeErrorCodes {}

impl ProbeErrorCodes {
    /// Sensor reported triggered before a descent began
    pub const ALREADY_TRIGGERED: i32 = 2001;

    /// Floor or travel bound reached without a sensor transition
    pub const NO_TRIGGER: i32 = 2002;

    /// Sample spread exceeded tolerance after all retries
    pub const TOLERANCE_EXCEEDED: i32 = 2003;

    /// Sensor was already released before a release-detection ascent
    pub const ALREADY_RELEASED: i32 = 2004;

    /// A collaborator (motion, driver, persistence) failed
    pub const HARDWARE: i32 = 2005;

    /// Calibration state machine rejected a phase change
    pub const INVALID_TRANSITION: i32 = 2006;

    /// Calibration run aborted; wraps the failure that caused it
    pub const ABORTED: i32 = 2007;

    /// Reduction requested over an empty sample set
    pub const NO_SAMPLES: i32 = 2008;
}

/// Log a probe error with structured context
///
/// Emits error_code, component and message fields. The logging is
/// non-blocking and will not panic on failure.
pub fn log_probe_error(err: &ProbeError, context: &str) {
    error!(
        "Probe error in {}: code={}, component=AutoZOffset, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Probing and calibration errors
///
/// Every variant aborts the in-flight command. Variants carry the sensor,
/// phase and observed numbers so a single reported message is enough to
/// diagnose wiring or configuration mistakes.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeError {
    /// Sensor already reads triggered before the descent (stuck or inverted)
    AlreadyTriggered { sensor: String },

    /// Sensor already reads released before a release-detection ascent
    AlreadyReleased { sensor: String },

    /// Travel limit reached with no transition
    NoTrigger { sensor: String, limit_z: f64 },

    /// Spread across a sample set stayed above tolerance
    ToleranceExceeded {
        sensor: String,
        spread: f64,
        tolerance: f64,
        attempts: usize,
    },

    /// Collaborator failure
    Hardware { component: String, details: String },

    /// Illegal calibration phase change
    InvalidTransition {
        from: CalibrationPhase,
        to: CalibrationPhase,
    },

    /// Calibration aborted in `phase` because of `cause`
    Aborted {
        phase: CalibrationPhase,
        cause: Box<ProbeError>,
    },

    /// Nothing to reduce
    NoSamples,
}

impl ProbeError {
    pub fn hardware(component: impl Into<String>, details: impl Into<String>) -> Self {
        ProbeError::Hardware {
            component: component.into(),
            details: details.into(),
        }
    }

    /// Innermost error, looking through any `Aborted` wrappers
    pub fn root_cause(&self) -> &ProbeError {
        match self {
            ProbeError::Aborted { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    fn variant_name(&self) -> &'static str {
        match self {
            ProbeError::AlreadyTriggered { .. } => "AlreadyTriggered",
            ProbeError::AlreadyReleased { .. } => "AlreadyReleased",
            ProbeError::NoTrigger { .. } => "NoTrigger",
            ProbeError::ToleranceExceeded { .. } => "ToleranceExceeded",
            ProbeError::Hardware { .. } => "Hardware",
            ProbeError::InvalidTransition { .. } => "InvalidTransition",
            ProbeError::Aborted { .. } => "Aborted",
            ProbeError::NoSamples => "NoSamples",
        }
    }
}

impl ErrorCode for ProbeError {
    fn code(&self) -> i32 {
        match self {
            ProbeError::AlreadyTriggered { .. } => ProbeErrorCodes::ALREADY_TRIGGERED,
            ProbeError::NoTrigger { .. } => ProbeErrorCodes::NO_TRIGGER,
            ProbeError::ToleranceExceeded { .. } => ProbeErrorCodes::TOLERANCE_EXCEEDED,
            ProbeError::AlreadyReleased { .. } => ProbeErrorCodes::ALREADY_RELEASED,
            ProbeError::Hardware { .. } => ProbeErrorCodes::HARDWARE,
            ProbeError::InvalidTransition { .. } => ProbeErrorCodes::INVALID_TRANSITION,
            ProbeError::Aborted { .. } => ProbeErrorCodes::ABORTED,
            ProbeError::NoSamples => ProbeErrorCodes::NO_SAMPLES,
        }
    }

    fn message(&self) -> String {
        match self {
            ProbeError::AlreadyTriggered { sensor } => {
                format!(
                    "Sensor '{}' triggered prior to movement (check for a stuck sensor or inverted pin)",
                    sensor
                )
            }
            ProbeError::AlreadyReleased { sensor } => {
                format!("Sensor '{}' not triggered before release move", sensor)
            }
            ProbeError::NoTrigger { sensor, limit_z } => {
                format!(
                    "No trigger on '{}' after full movement (travel limit z={:.3})",
                    sensor, limit_z
                )
            }
            ProbeError::ToleranceExceeded {
                sensor,
                spread,
                tolerance,
                attempts,
            } => {
                format!(
                    "Probe samples on '{}' exceed samples_tolerance: spread {:.6} > {:.6} after {} attempt(s)",
                    sensor, spread, tolerance, attempts
                )
            }
            ProbeError::Hardware { component, details } => {
                format!("{} failed: {}", component, details)
            }
            ProbeError::InvalidTransition { from, to } => {
                format!("Invalid calibration transition {} -> {}", from, to)
            }
            ProbeError::Aborted { phase, cause } => {
                format!("Calibration aborted during {}: {}", phase, cause.message())
            }
            ProbeError::NoSamples => "No samples to reduce".to_string(),
        }
    }
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProbeError::{} (code {}): {}",
            self.variant_name(),
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProbeError::Aborted { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}
