//! Probe event types exposed to the CLI and any host-side listener.

use serde::{Deserialize, Serialize};

use crate::calibration::CalibrationPhase;
use crate::probing::DriverCurrent;

/// Events emitted while probing and calibrating
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ProbeEvent {
    PhaseChanged {
        from: CalibrationPhase,
        to: CalibrationPhase,
        cycle: usize,
    },
    SampleTaken {
        sensor: String,
        attempt: usize,
        index: usize,
        z: f64,
    },
    ToleranceRetry {
        sensor: String,
        attempt: usize,
        spread: f64,
        tolerance: f64,
    },
    CurrentScaled {
        factor: f64,
        drivers: Vec<DriverCurrent>,
    },
    CurrentRestored {
        drivers: Vec<DriverCurrent>,
    },
    OffsetApplied {
        z: f64,
    },
    OffsetCommitted {
        section: String,
        key: String,
        value: f64,
    },
    Error {
        code: i32,
        context: String,
        message: String,
    },
}
