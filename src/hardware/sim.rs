use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

use super::{
    CurrentControl, DriverRegistry, EndstopProvider, LiveOffset, MachineLimits, MotionProvider,
    Persistence, Position, ProbeDirection, ScriptRunner, SensorId, StandardProbe,
};

/// Height above the contact point at which the simulated bed sensor releases
const RELEASE_HYSTERESIS: f64 = 0.02;

/// Parameters of the simulated printer used by the CLI and tests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimPrinterConfig {
    pub x_max: f64,
    pub y_max: f64,
    pub z_min: f64,
    /// Toolhead Z at which the bed sensor triggers
    pub bed_trigger_z: f64,
    /// Toolhead Z at which the inductive probe triggers
    pub inductive_trigger_z: f64,
    /// Uniform noise amplitude added to every reading (mm)
    pub noise: f64,
    pub seed: u64,
    /// Inductive probe XY offset relative to the nozzle
    pub probe_xy_offset: (f64, f64),
    /// Z driver names and their run currents (A)
    pub z_drivers: Vec<(String, f64)>,
    pub max_accel: f64,
    pub start_position: Position,
}

impl Default for SimPrinterConfig {
    fn default() -> Self {
        Self {
            x_max: 325.0,
            y_max: 325.0,
            z_min: -2.0,
            bed_trigger_z: 1.8,
            inductive_trigger_z: 2.5,
            noise: 0.0,
            seed: 7,
            probe_xy_offset: (-17.0, 10.0),
            z_drivers: vec![
                ("stepper_z".to_string(), 0.8),
                ("stepper_z1".to_string(), 0.8),
            ],
            max_accel: 5000.0,
            start_position: Position::new(0.0, 0.0, 10.0, 0.0),
        }
    }
}

/// One journaled collaborator call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    Move {
        target: Position,
        speed: f64,
        accel: Option<f64>,
    },
    SensorQuery {
        sensor: String,
        triggered: bool,
    },
    ProbeMove {
        sensor: String,
        direction: ProbeDirection,
        target: Position,
        speed: f64,
        result: Option<f64>,
    },
    InductiveProbe {
        z: Option<f64>,
    },
    SetCurrent {
        driver: String,
        current: f64,
    },
    SetMaxAccel {
        accel: f64,
    },
    SetZPosition {
        z: f64,
    },
    SetLiveOffset {
        z: f64,
    },
    Persist {
        section: String,
        key: String,
        value: String,
    },
    Script {
        script: String,
    },
}

struct SimState {
    config: SimPrinterConfig,
    position: Position,
    max_accel: f64,
    homed: bool,
    /// Z of the last bed contact while the nozzle still rests on it
    contact_z: Option<f64>,
    rng: StdRng,
    bed_readings: VecDeque<f64>,
    inductive_readings: VecDeque<f64>,
    bed_stuck: bool,
    bed_missing: bool,
    inductive_missing: bool,
    failing_driver: Option<String>,
    persistence_failing: bool,
    currents: BTreeMap<String, f64>,
    live_offset: f64,
    persisted: BTreeMap<String, String>,
    journal: Vec<SimEvent>,
}

impl SimState {
    fn noise(&mut self) -> f64 {
        let amplitude = self.config.noise;
        if amplitude > 0.0 {
            self.rng.gen_range(-amplitude..=amplitude)
        } else {
            0.0
        }
    }

    fn bed_triggered(&self) -> bool {
        self.bed_stuck
            || self
                .contact_z
                .map(|contact| self.position.z <= contact + 1e-9)
                .unwrap_or(false)
    }

    fn move_to(&mut self, target: Position) {
        if let Some(contact) = self.contact_z {
            if target.z > contact + RELEASE_HYSTERESIS {
                self.contact_z = None;
            }
        }
        self.position = target;
    }
}

/// Deterministic printer model implementing every collaborator trait
///
/// Readings come from scripted queues first, then from the configured
/// trigger heights plus seeded noise. Every call is journaled so tests can
/// assert on ordering (e.g. current restored before the lift).
#[derive(Clone)]
pub struct SimPrinter {
    state: Arc<Mutex<SimState>>,
}

impl SimPrinter {
    pub fn new(config: SimPrinterConfig) -> Self {
        let currents = config.z_drivers.iter().cloned().collect();
        let state = SimState {
            position: config.start_position,
            max_accel: config.max_accel,
            homed: false,
            contact_z: None,
            rng: StdRng::seed_from_u64(config.seed),
            bed_readings: VecDeque::new(),
            inductive_readings: VecDeque::new(),
            bed_stuck: false,
            bed_missing: false,
            inductive_missing: false,
            failing_driver: None,
            persistence_failing: false,
            currents,
            live_offset: 0.0,
            persisted: BTreeMap::new(),
            journal: Vec::new(),
            config,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>, ProbeError> {
        self.state
            .lock()
            .map_err(|_| ProbeError::hardware("sim_printer", "state lock poisoned"))
    }

    fn inspect<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// Queue exact bed-sensor trigger heights, consumed one per descent
    pub fn queue_bed_readings(&self, readings: impl IntoIterator<Item = f64>) {
        self.inspect(|s| s.bed_readings.extend(readings));
    }

    /// Queue exact inductive-probe readings, consumed one per probe
    pub fn queue_inductive_readings(&self, readings: impl IntoIterator<Item = f64>) {
        self.inspect(|s| s.inductive_readings.extend(readings));
    }

    /// Make the bed sensor report triggered regardless of position
    pub fn set_bed_stuck(&self, stuck: bool) {
        self.inspect(|s| s.bed_stuck = stuck);
    }

    /// Make the bed sensor never trigger
    pub fn set_bed_missing(&self, missing: bool) {
        self.inspect(|s| s.bed_missing = missing);
    }

    /// Make the inductive probe never trigger
    pub fn set_inductive_missing(&self, missing: bool) {
        self.inspect(|s| s.inductive_missing = missing);
    }

    /// Make every persistence write fail
    pub fn set_persistence_failing(&self, failing: bool) {
        self.inspect(|s| s.persistence_failing = failing);
    }

    /// Make `set_current` fail for one driver
    pub fn set_failing_driver(&self, driver: Option<&str>) {
        self.inspect(|s| s.failing_driver = driver.map(str::to_string));
    }

    /// Change the reported Z axis minimum, as a host config reload would
    pub fn set_z_min(&self, z_min: f64) {
        self.inspect(|s| s.config.z_min = z_min);
    }

    /// Simulate an operator adjusting the live offset by hand
    pub fn adjust_live_offset(&self, z: f64) {
        self.inspect(|s| s.live_offset = z);
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        self.inspect(|s| s.journal.clone())
    }

    pub fn position(&self) -> Position {
        self.inspect(|s| s.position)
    }

    pub fn is_homed(&self) -> bool {
        self.inspect(|s| s.homed)
    }

    pub fn driver_current(&self, driver: &str) -> Option<f64> {
        self.inspect(|s| s.currents.get(driver).copied())
    }

    pub fn live_offset(&self) -> f64 {
        self.inspect(|s| s.live_offset)
    }

    pub fn max_accel_setting(&self) -> f64 {
        self.inspect(|s| s.max_accel)
    }

    pub fn persisted(&self, section: &str, key: &str) -> Option<String> {
        self.inspect(|s| s.persisted.get(&format!("{}.{}", section, key)).cloned())
    }
}

impl MotionProvider for SimPrinter {
    fn current_position(&self) -> Result<Position, ProbeError> {
        Ok(self.lock()?.position)
    }

    fn move_to(&self, target: Position, speed: f64, accel: Option<f64>) -> Result<(), ProbeError> {
        if speed.is_nan() || speed <= 0.0 {
            return Err(ProbeError::hardware(
                "motion",
                format!("invalid move speed {}", speed),
            ));
        }
        let mut state = self.lock()?;
        state.journal.push(SimEvent::Move {
            target,
            speed,
            accel,
        });
        state.move_to(target);
        Ok(())
    }

    fn flush(&self) -> Result<(), ProbeError> {
        Ok(())
    }

    fn set_z_position(&self, z: f64) -> Result<(), ProbeError> {
        let mut state = self.lock()?;
        state.journal.push(SimEvent::SetZPosition { z });
        if let Some(contact) = state.contact_z {
            state.contact_z = Some(contact - state.position.z + z);
        }
        state.position.z = z;
        state.homed = true;
        Ok(())
    }

    fn max_accel(&self) -> Result<f64, ProbeError> {
        Ok(self.lock()?.max_accel)
    }

    fn set_max_accel(&self, accel: f64) -> Result<(), ProbeError> {
        let mut state = self.lock()?;
        state.journal.push(SimEvent::SetMaxAccel { accel });
        state.max_accel = accel;
        Ok(())
    }

    fn limits(&self) -> MachineLimits {
        self.inspect(|s| MachineLimits {
            x_max: s.config.x_max,
            y_max: s.config.y_max,
            z_min: s.config.z_min,
        })
    }
}

impl EndstopProvider for SimPrinter {
    fn is_triggered(&self, sensor: &SensorId) -> Result<bool, ProbeError> {
        let mut state = self.lock()?;
        let triggered = state.bed_triggered();
        state.journal.push(SimEvent::SensorQuery {
            sensor: sensor.to_string(),
            triggered,
        });
        Ok(triggered)
    }

    fn probe_until_trigger(
        &self,
        sensor: &SensorId,
        target: Position,
        speed: f64,
        direction: ProbeDirection,
    ) -> Result<Option<f64>, ProbeError> {
        let mut state = self.lock()?;
        let contact_z = state.contact_z;
        let result = match direction {
            ProbeDirection::Descend => {
                let queued = state.bed_readings.pop_front();
                let reading = match queued {
                    Some(z) => Some(z),
                    None if state.bed_missing => None,
                    None => {
                        let noise = state.noise();
                        Some(state.config.bed_trigger_z + noise)
                    }
                };
                match reading {
                    // A glitching sensor reports garbage without moving the toolhead.
                    Some(z) if z.is_nan() => Some(z),
                    Some(z) if z >= target.z && !state.bed_missing => {
                        state.move_to(target.with_z(z));
                        state.contact_z = Some(z);
                        Some(z)
                    }
                    _ => {
                        state.move_to(target);
                        None
                    }
                }
            }
            ProbeDirection::Ascend => match contact_z {
                Some(contact) if contact + RELEASE_HYSTERESIS <= target.z => {
                    let z = contact + RELEASE_HYSTERESIS;
                    state.move_to(target.with_z(z));
                    state.contact_z = None;
                    Some(z)
                }
                _ => {
                    state.move_to(target);
                    None
                }
            },
        };
        state.journal.push(SimEvent::ProbeMove {
            sensor: sensor.to_string(),
            direction,
            target,
            speed,
            result,
        });
        Ok(result)
    }
}

struct SimDriver {
    id: String,
    state: Arc<Mutex<SimState>>,
}

impl SimDriver {
    fn lock(&self) -> Result<MutexGuard<'_, SimState>, ProbeError> {
        self.state
            .lock()
            .map_err(|_| ProbeError::hardware(self.id.clone(), "driver state lock poisoned"))
    }
}

impl CurrentControl for SimDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn current(&self) -> Result<f64, ProbeError> {
        self.lock()?
            .currents
            .get(&self.id)
            .copied()
            .ok_or_else(|| ProbeError::hardware(self.id.clone(), "driver not present"))
    }

    fn set_current(&self, amps: f64) -> Result<(), ProbeError> {
        let mut state = self.lock()?;
        if state.failing_driver.as_deref() == Some(self.id.as_str()) {
            return Err(ProbeError::hardware(
                self.id.clone(),
                "driver rejected current update",
            ));
        }
        state.journal.push(SimEvent::SetCurrent {
            driver: self.id.clone(),
            current: amps,
        });
        state.currents.insert(self.id.clone(), amps);
        Ok(())
    }
}

impl DriverRegistry for SimPrinter {
    fn current_controllable_z_drivers(&self) -> Result<Vec<Arc<dyn CurrentControl>>, ProbeError> {
        let ids: Vec<String> = self.lock()?.currents.keys().cloned().collect();
        Ok(ids
            .into_iter()
            .map(|id| {
                Arc::new(SimDriver {
                    id,
                    state: Arc::clone(&self.state),
                }) as Arc<dyn CurrentControl>
            })
            .collect())
    }
}

impl StandardProbe for SimPrinter {
    fn sensor_name(&self) -> &str {
        "probe"
    }

    fn probe_z(&self) -> Result<f64, ProbeError> {
        let mut state = self.lock()?;
        let queued = state.inductive_readings.pop_front();
        let reading = match queued {
            Some(z) => Some(z),
            None if state.inductive_missing => None,
            None => {
                let noise = state.noise();
                Some(state.config.inductive_trigger_z + noise)
            }
        };
        state.journal.push(SimEvent::InductiveProbe { z: reading });
        match reading {
            Some(z) => {
                let target = state.position.with_z(z);
                state.move_to(target);
                Ok(z)
            }
            None => {
                let floor = state.config.z_min;
                let target = state.position.with_z(floor);
                state.move_to(target);
                Err(ProbeError::NoTrigger {
                    sensor: "probe".to_string(),
                    limit_z: floor,
                })
            }
        }
    }

    fn xy_offsets(&self) -> Result<(f64, f64), ProbeError> {
        Ok(self.lock()?.config.probe_xy_offset)
    }
}

impl LiveOffset for SimPrinter {
    fn z_offset(&self) -> Result<f64, ProbeError> {
        Ok(self.lock()?.live_offset)
    }

    fn set_z_offset(&self, z: f64) -> Result<(), ProbeError> {
        let mut state = self.lock()?;
        state.journal.push(SimEvent::SetLiveOffset { z });
        state.live_offset = z;
        Ok(())
    }
}

impl Persistence for SimPrinter {
    fn write(&self, section: &str, key: &str, value: &str) -> Result<(), ProbeError> {
        let mut state = self.lock()?;
        if state.persistence_failing {
            return Err(ProbeError::hardware("persistence", "config write rejected"));
        }
        state.journal.push(SimEvent::Persist {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
        });
        state
            .persisted
            .insert(format!("{}.{}", section, key), value.to_string());
        Ok(())
    }
}

impl ScriptRunner for SimPrinter {
    fn run_script(&self, script: &str) -> Result<(), ProbeError> {
        let mut state = self.lock()?;
        state.journal.push(SimEvent::Script {
            script: script.to_string(),
        });
        Ok(())
    }
}
