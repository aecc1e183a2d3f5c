//! Collaborator abstractions consumed by the probing core.
//!
//! The host motion runtime is reached only through these narrow traits,
//! bundled into [`Collaborators`] and handed to the core at construction.
//! Implementations are blocking: a call returns once the host reports the
//! motion finished, the sensor changed state, or the travel bound was hit.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

pub mod sim;
pub mod store;

pub use sim::{SimEvent, SimPrinter, SimPrinterConfig};
pub use store::JsonFileStore;

/// Opaque handle for a sensor signal, owned by the electrical driver layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(String);

impl SensorId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Toolhead coordinate (mm)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub e: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self { x, y, z, e }
    }

    pub fn with_z(self, z: f64) -> Self {
        Self { z, ..self }
    }

    pub fn with_xy(self, x: f64, y: f64) -> Self {
        Self { x, y, ..self }
    }
}

/// Travel bounds reported by the motion system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachineLimits {
    pub x_max: f64,
    pub y_max: f64,
    pub z_min: f64,
}

/// Which sensor transition a probing move waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeDirection {
    /// Move down until the sensor triggers
    Descend,
    /// Move up until the sensor releases
    Ascend,
}

/// Motion provider: position queries, blocking moves and the queue barrier
pub trait MotionProvider: Send + Sync {
    fn current_position(&self) -> Result<Position, ProbeError>;

    /// Blocking move; `accel` overrides the host acceleration for this move only
    fn move_to(&self, target: Position, speed: f64, accel: Option<f64>) -> Result<(), ProbeError>;

    /// Wait for all queued motion to finish
    fn flush(&self) -> Result<(), ProbeError>;

    /// Redefine the current Z coordinate and mark the axes homed
    fn set_z_position(&self, z: f64) -> Result<(), ProbeError>;

    fn max_accel(&self) -> Result<f64, ProbeError>;

    fn set_max_accel(&self, accel: f64) -> Result<(), ProbeError>;

    fn limits(&self) -> MachineLimits;
}

/// Endstop/sensor provider
pub trait EndstopProvider: Send + Sync {
    fn is_triggered(&self, sensor: &SensorId) -> Result<bool, ProbeError>;

    /// Move toward `target` until `sensor` changes state
    ///
    /// Returns `Some(z)` with the toolhead Z at the transition, or `None` when
    /// the target was reached without one. The toolhead is left where it
    /// stopped in both cases.
    fn probe_until_trigger(
        &self,
        sensor: &SensorId,
        target: Position,
        speed: f64,
        direction: ProbeDirection,
    ) -> Result<Option<f64>, ProbeError>;
}

/// One Z motor driver exposing run-current control
pub trait CurrentControl: Send + Sync {
    fn id(&self) -> &str;

    fn current(&self) -> Result<f64, ProbeError>;

    fn set_current(&self, amps: f64) -> Result<(), ProbeError>;
}

/// Driver registry
pub trait DriverRegistry: Send + Sync {
    fn current_controllable_z_drivers(&self) -> Result<Vec<Arc<dyn CurrentControl>>, ProbeError>;
}

/// Pre-existing inductive probe primitive
///
/// Honors its own sample and tolerance configuration internally.
pub trait StandardProbe: Send + Sync {
    fn sensor_name(&self) -> &str;

    /// Probe at the current XY and return the toolhead Z at trigger
    fn probe_z(&self) -> Result<f64, ProbeError>;

    /// Probe XY position relative to the nozzle
    fn xy_offsets(&self) -> Result<(f64, f64), ProbeError>;
}

/// Live coordinate Z offset read by the motion system on every move
pub trait LiveOffset: Send + Sync {
    fn z_offset(&self) -> Result<f64, ProbeError>;

    fn set_z_offset(&self, z: f64) -> Result<(), ProbeError>;
}

/// Durable configuration storage; writes are flushed by a separate save
pub trait Persistence: Send + Sync {
    fn write(&self, section: &str, key: &str, value: &str) -> Result<(), ProbeError>;
}

/// Runs opaque host scripts such as the probe preparation routine
pub trait ScriptRunner: Send + Sync {
    fn run_script(&self, script: &str) -> Result<(), ProbeError>;
}

/// Every collaborator the core needs, passed in once at construction
#[derive(Clone)]
pub struct Collaborators {
    pub motion: Arc<dyn MotionProvider>,
    pub endstops: Arc<dyn EndstopProvider>,
    pub drivers: Arc<dyn DriverRegistry>,
    pub probe: Arc<dyn StandardProbe>,
    pub live_offset: Arc<dyn LiveOffset>,
    pub persistence: Arc<dyn Persistence>,
    pub scripts: Arc<dyn ScriptRunner>,
}

impl Collaborators {
    /// Wire every collaborator to one object implementing all of them
    pub fn from_printer<P>(printer: Arc<P>) -> Self
    where
        P: MotionProvider
            + EndstopProvider
            + DriverRegistry
            + StandardProbe
            + LiveOffset
            + Persistence
            + ScriptRunner
            + 'static,
    {
        Self {
            motion: printer.clone(),
            endstops: printer.clone(),
            drivers: printer.clone(),
            probe: printer.clone(),
            live_offset: printer.clone(),
            persistence: printer.clone(),
            scripts: printer,
        }
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = persistence;
        self
    }
}
