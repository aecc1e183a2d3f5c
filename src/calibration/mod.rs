// Calibration module - two-sensor offset measurement and correction storage
//
// This module provides four main components:
// 1. PhaseTracker: the calibration state machine
// 2. OffsetMeasurer: one bed-sensor vs inductive-probe measurement cycle
// 3. CalibrationController: repeated cycles reduced to one correction
// 4. OffsetStore: applies and persists the correction

pub mod measure;
pub mod offset_store;
pub mod procedure;
pub mod state;

pub use measure::{BedProbe, MeasurementResult, OffsetMeasurer};
pub use offset_store::{OffsetStore, CORRECTION_KEY};
pub use procedure::{CalibrationController, CalibrationResult};
pub use state::{CalibrationPhase, PhaseTracker};
