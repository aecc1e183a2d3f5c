// OffsetMeasurer - one two-sensor measurement cycle
//
// Bed-sensor sampling runs at reduced Z current at the bed center, the
// toolhead lifts, shifts so the inductive probe sits over the same spot,
// and the inductive probe reads its own trigger height. The difference plus
// the configured air gap is the candidate correction.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::calibration::state::{CalibrationPhase, PhaseTracker};
use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::hardware::{Collaborators, Position, ProbeDirection};
use crate::probing::{CurrentScaler, ProbeMotion, SampleReducer, SampleSet, SingleProbe};
use crate::telemetry::TelemetryCollector;

/// Outcome of one measurement cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub bed_sensor_z: f64,
    pub inductive_probe_z: f64,
    pub candidate_offset: f64,
}

impl MeasurementResult {
    pub fn new(bed_sensor_z: f64, inductive_probe_z: f64, z_offset: f64) -> Self {
        Self {
            bed_sensor_z,
            inductive_probe_z,
            candidate_offset: bed_sensor_z - inductive_probe_z + z_offset,
        }
    }
}

/// Reduced bed-sensor reading at one point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BedProbe {
    pub z: f64,
    /// Toolhead position at the last trigger
    pub position: Position,
    pub samples: SampleSet,
    pub attempts: usize,
    /// Z at which the sensor released on a follow-up ascent, if requested
    pub release_z: Option<f64>,
}

pub struct OffsetMeasurer<'a> {
    hw: &'a Collaborators,
    config: &'a ProbeConfig,
    telemetry: &'a Arc<TelemetryCollector>,
}

impl<'a> OffsetMeasurer<'a> {
    pub fn new(
        hw: &'a Collaborators,
        config: &'a ProbeConfig,
        telemetry: &'a Arc<TelemetryCollector>,
    ) -> Self {
        Self {
            hw,
            config,
            telemetry,
        }
    }

    /// Enter `Preparing`: go to bed center and optionally run the prepare script
    pub fn prepare(&self, tracker: &mut PhaseTracker, run_script: bool) -> Result<(), ProbeError> {
        tracker.advance(CalibrationPhase::Preparing)?;
        self.move_to_center()?;
        if run_script {
            self.run_prepare_script()?;
        }
        Ok(())
    }

    /// Run one full measurement cycle, from `BedProbing` to `Computed`
    pub fn measure(&self, tracker: &mut PhaseTracker) -> Result<MeasurementResult, ProbeError> {
        tracker.advance(CalibrationPhase::BedProbing)?;
        self.move_to_center()?;
        let bed = self.probe_bed(false)?;
        self.lift()?;
        tracker.advance(CalibrationPhase::Lifted)?;

        self.move_to_inductive_position()?;
        tracker.advance(CalibrationPhase::InductiveProbing)?;
        let probe_z = self.hw.probe.probe_z()?;
        if !probe_z.is_finite() {
            return Err(ProbeError::hardware(
                self.hw.probe.sensor_name(),
                format!("non-finite trigger height {}", probe_z),
            ));
        }

        tracker.advance(CalibrationPhase::Computed)?;
        let result = MeasurementResult::new(bed.z, probe_z, self.config.z_offset);
        info!(
            "[OffsetMeasurer] Cycle {}: bed={:.6} {}={:.6} candidate={:.6}",
            tracker.cycle(),
            result.bed_sensor_z,
            self.hw.probe.sensor_name(),
            result.inductive_probe_z,
            result.candidate_offset
        );
        self.lift()?;
        Ok(result)
    }

    /// Bed-sensor reading at the current XY, then lift away
    ///
    /// Runs the preparation script first; only a calibration run skips it
    /// per cycle.
    pub fn probe_point(
        &self,
        tracker: &mut PhaseTracker,
        detect_release: bool,
    ) -> Result<BedProbe, ProbeError> {
        tracker.advance(CalibrationPhase::BedProbing)?;
        self.run_prepare_script()?;
        let bed = self.probe_bed(detect_release)?;
        self.lift()?;
        tracker.advance(CalibrationPhase::Lifted)?;
        Ok(bed)
    }

    /// Home Z on the bed sensor at bed center
    ///
    /// The Z frame is redefined so the trigger height reads as `z_offset`.
    pub fn home(&self, tracker: &mut PhaseTracker) -> Result<BedProbe, ProbeError> {
        tracker.advance(CalibrationPhase::BedProbing)?;
        self.move_to_center()?;
        self.run_prepare_script()?;
        let bed = self.probe_bed(false)?;
        self.hw.motion.set_z_position(self.config.z_offset)?;
        info!(
            "[OffsetMeasurer] Z homed: trigger at {:.6} is now z={:.3}",
            bed.z, self.config.z_offset
        );
        self.lift()?;
        tracker.advance(CalibrationPhase::Lifted)?;
        Ok(bed)
    }

    /// Sample the bed sensor at the current XY under reduced Z current
    ///
    /// Current is restored before returning on every path. The toolhead is
    /// left at the last trigger (or release) height.
    pub fn probe_bed(&self, detect_release: bool) -> Result<BedProbe, ProbeError> {
        let scaler = CurrentScaler::new(Arc::clone(&self.hw.drivers), Arc::clone(self.telemetry));
        let scaled = scaler.scoped_scale(self.config.z_current_factor)?;

        let single = SingleProbe::new(
            Arc::clone(&self.hw.motion),
            Arc::clone(&self.hw.endstops),
            self.config.pin.clone(),
            ProbeMotion {
                speed: self.config.speed,
                accel: self.config.probe_accel,
                floor: self.config.probe_z_min,
                release_travel: self.config.probe_hop,
            },
        );
        let reducer = SampleReducer::new(self.config.sampling(), Arc::clone(self.telemetry));
        let outcome = reducer.collect(
            self.config.pin.as_str(),
            || single.probe(ProbeDirection::Descend),
            |dist| self.lift_by(dist),
        )?;
        let position = self.hw.motion.current_position()?;

        let release_z = if detect_release {
            Some(single.probe(ProbeDirection::Ascend)?)
        } else {
            None
        };

        scaled.release()?;
        Ok(BedProbe {
            z: outcome.value,
            position,
            samples: outcome.samples,
            attempts: outcome.attempts,
            release_z,
        })
    }

    /// Raise the toolhead by `probe_hop`
    pub fn lift(&self) -> Result<(), ProbeError> {
        self.lift_by(self.config.probe_hop)
    }

    fn lift_by(&self, distance: f64) -> Result<(), ProbeError> {
        let position = self.hw.motion.current_position()?;
        self.hw
            .motion
            .move_to(position.with_z(position.z + distance), self.config.lift_speed, None)?;
        self.hw.motion.flush()
    }

    /// Travel to the bed center without descending below `probe_hop`
    pub fn move_to_center(&self) -> Result<(), ProbeError> {
        let position = self.hw.motion.current_position()?;
        let (x, y) = self.config.bed_center;
        let target = position
            .with_xy(x, y)
            .with_z(position.z.max(self.config.probe_hop));
        self.hw
            .motion
            .move_to(target, self.config.travel_speed, None)?;
        self.hw.motion.flush()
    }

    fn move_to_inductive_position(&self) -> Result<(), ProbeError> {
        let (offset_x, offset_y) = self.hw.probe.xy_offsets()?;
        let (x, y) = self.config.bed_center;
        let position = self.hw.motion.current_position()?;
        self.hw.motion.move_to(
            position.with_xy(x - offset_x, y - offset_y),
            self.config.travel_speed,
            None,
        )?;
        self.hw.motion.flush()
    }

    fn run_prepare_script(&self) -> Result<(), ProbeError> {
        if let Some(script) = self.config.prepare_gcode.as_deref() {
            info!("[OffsetMeasurer] Running probe preparation script");
            self.hw.scripts.run_script(script)?;
        }
        Ok(())
    }
}
