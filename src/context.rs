// AutoZContext: Dependency Injection Container
// Owns the validated configuration, the collaborators, the event collector
// and the calibration state. No module-level state exists anywhere else.

use std::sync::Arc;

use log::info;
use serde::{Deserialize, Serialize};

use crate::calibration::{
    BedProbe, CalibrationController, CalibrationPhase, CalibrationResult, MeasurementResult,
    OffsetMeasurer, OffsetStore, PhaseTracker,
};
use crate::config::{ProbeConfig, RawProbeConfig};
use crate::error::{log_probe_error, ConfigError, ProbeError};
use crate::hardware::{Collaborators, Position};
use crate::telemetry::TelemetryCollector;

/// Status report for the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoZStatus {
    pub name: String,
    pub last_bed_z: Option<f64>,
    pub last_probe_position: Option<Position>,
    pub last_measurement: Option<MeasurementResult>,
    pub probe_z_correction: f64,
    /// `None` when the motion system could not report it
    pub live_offset: Option<f64>,
    pub phase: CalibrationPhase,
}

/// AutoZContext: single owner of all engine state
///
/// Every command runs to completion on the caller's thread. Failures leave
/// the tracker in `Aborted` (cleared by the next command), log through the
/// error helpers, and publish an error event.
pub struct AutoZContext {
    config: ProbeConfig,
    hw: Collaborators,
    telemetry: Arc<TelemetryCollector>,
    store: OffsetStore,
    tracker: PhaseTracker,
    last_bed: Option<BedProbe>,
    last_measurement: Option<MeasurementResult>,
}

impl AutoZContext {
    pub fn new(config: ProbeConfig, hw: Collaborators) -> Self {
        Self::with_telemetry(config, hw, Arc::new(TelemetryCollector::default()))
    }

    pub fn with_telemetry(
        config: ProbeConfig,
        hw: Collaborators,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        let store = OffsetStore::new(
            Arc::clone(&hw.live_offset),
            Arc::clone(&hw.persistence),
            Arc::clone(&telemetry),
        );
        Self {
            tracker: PhaseTracker::new(Arc::clone(&telemetry)),
            config,
            hw,
            telemetry,
            store,
            last_bed: None,
            last_measurement: None,
        }
    }

    /// Validate `raw` against the motion system's limits and build a context
    pub fn from_raw(raw: RawProbeConfig, hw: Collaborators) -> Result<Self, ConfigError> {
        let config = ProbeConfig::from_raw(raw, &hw.motion.limits())?;
        Ok(Self::new(config, hw))
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetryCollector> {
        &self.telemetry
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.tracker.phase()
    }

    /// Re-resolve the descent floor after the Z axis bounds changed
    pub fn refresh_limits(&mut self) {
        self.config.refresh_floor(&self.hw.motion.limits());
    }

    /// Bed-sensor sampling at the current XY, optionally followed by a
    /// release-detection ascent
    pub fn probe(&mut self, detect_release: bool) -> Result<BedProbe, ProbeError> {
        let bed = self.tracked("probe", |measurer, tracker| {
            measurer.probe_point(tracker, detect_release)
        })?;
        info!("[AutoZContext] Bed sensor triggered at z={:.6}", bed.z);
        self.last_bed = Some(bed.clone());
        Ok(bed)
    }

    pub fn home_z(&mut self) -> Result<BedProbe, ProbeError> {
        let bed = self.tracked("home_z", |measurer, tracker| measurer.home(tracker))?;
        self.last_bed = Some(bed.clone());
        Ok(bed)
    }

    pub fn measure_offset(&mut self) -> Result<MeasurementResult, ProbeError> {
        let result = self.tracked("measure_offset", |measurer, tracker| {
            measurer.prepare(tracker, true)?;
            measurer.measure(tracker)
        })?;
        self.last_measurement = Some(result);
        Ok(result)
    }

    pub fn calibrate(&mut self) -> Result<CalibrationResult, ProbeError> {
        let result = CalibrationController::new(&self.hw, &self.store, &self.telemetry)
            .calibrate(&mut self.config, &mut self.tracker)?;
        self.last_measurement = result.measurements.last().copied();
        Ok(result)
    }

    /// Apply the persisted correction as the live offset
    pub fn load_offset(&mut self) -> Result<f64, ProbeError> {
        let result = self.store.load(&self.config);
        self.report("load_offset", result)
    }

    /// Persist the current live offset as the new correction
    pub fn save_live_offset(&mut self) -> Result<f64, ProbeError> {
        let result = self.store.save_live_offset(&mut self.config);
        self.report("save_live_offset", result)
    }

    pub fn status(&self) -> AutoZStatus {
        AutoZStatus {
            name: self.config.name.clone(),
            last_bed_z: self.last_bed.as_ref().map(|bed| bed.z),
            last_probe_position: self.last_bed.as_ref().map(|bed| bed.position),
            last_measurement: self.last_measurement,
            probe_z_correction: self.config.probe_z_correction,
            live_offset: self.store.live_offset().ok(),
            phase: self.tracker.phase(),
        }
    }

    fn tracked<T>(
        &mut self,
        context: &str,
        op: impl FnOnce(&OffsetMeasurer<'_>, &mut PhaseTracker) -> Result<T, ProbeError>,
    ) -> Result<T, ProbeError> {
        if let Err(err) = self.tracker.begin() {
            log_probe_error(&err, context);
            return Err(err);
        }
        let measurer = OffsetMeasurer::new(&self.hw, &self.config, &self.telemetry);
        let outcome = op(&measurer, &mut self.tracker).and_then(|value| {
            self.tracker.finish()?;
            Ok(value)
        });
        outcome.map_err(|err| self.tracker.abort(err, context))
    }

    fn report<T>(&self, context: &str, result: Result<T, ProbeError>) -> Result<T, ProbeError> {
        if let Err(err) = &result {
            log_probe_error(err, context);
            self.telemetry.record_error(err, context);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{SimEvent, SimPrinter, SimPrinterConfig};

    fn context() -> (SimPrinter, AutoZContext) {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let raw = RawProbeConfig {
            pin: Some("bed_sensor".to_string()),
            ..RawProbeConfig::default()
        };
        let ctx = AutoZContext::from_raw(raw, Collaborators::from_printer(Arc::new(printer.clone())))
            .unwrap();
        (printer, ctx)
    }

    #[test]
    fn missing_pin_fails_initialization() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let result = AutoZContext::from_raw(
            RawProbeConfig::default(),
            Collaborators::from_printer(Arc::new(printer)),
        );
        assert!(matches!(result, Err(ConfigError::MissingField { .. })));
    }

    #[test]
    fn probe_records_status() {
        let (_printer, mut ctx) = context();
        let bed = ctx.probe(false).unwrap();

        let status = ctx.status();
        assert_eq!(status.last_bed_z, Some(bed.z));
        assert_eq!(status.last_probe_position, Some(bed.position));
        assert_eq!(status.phase, CalibrationPhase::Idle);
        assert_eq!(status.live_offset, Some(0.0));
    }

    #[test]
    fn probe_and_home_each_run_prepare_script_once() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let raw = RawProbeConfig {
            pin: Some("bed_sensor".to_string()),
            prepare_gcode: Some("DEPLOY_PROBE".to_string()),
            ..RawProbeConfig::default()
        };
        let mut ctx = AutoZContext::from_raw(raw, Collaborators::from_printer(Arc::new(printer.clone())))
            .unwrap();
        let scripts = || {
            printer
                .journal()
                .iter()
                .filter(|event| matches!(event, SimEvent::Script { .. }))
                .count()
        };

        ctx.probe(false).unwrap();
        assert_eq!(scripts(), 1);
        ctx.home_z().unwrap();
        assert_eq!(scripts(), 2);
    }

    #[test]
    fn failed_command_leaves_aborted_phase() {
        let (printer, mut ctx) = context();
        printer.set_bed_stuck(true);

        let err = ctx.probe(false).unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Aborted {
                phase: CalibrationPhase::BedProbing,
                ..
            }
        ));
        assert_eq!(ctx.status().phase, CalibrationPhase::Aborted);

        printer.set_bed_stuck(false);
        ctx.probe(false).unwrap();
        assert_eq!(ctx.phase(), CalibrationPhase::Idle);
    }

    #[test]
    fn measure_offset_does_not_touch_live_offset() {
        let (printer, mut ctx) = context();
        printer.adjust_live_offset(0.1);

        let result = ctx.measure_offset().unwrap();
        assert!((result.candidate_offset - (-0.5)).abs() < 1e-9);
        assert_eq!(printer.live_offset(), 0.1);
        assert_eq!(ctx.status().last_measurement, Some(result));
    }

    #[test]
    fn calibrate_then_load_round_trip() {
        let (printer, mut ctx) = context();
        let result = ctx.calibrate().unwrap();

        printer.adjust_live_offset(0.0);
        assert_eq!(ctx.load_offset().unwrap(), result.correction);
        assert_eq!(printer.live_offset(), result.correction);
        assert_eq!(ctx.status().probe_z_correction, result.correction);
    }

    #[test]
    fn save_live_offset_updates_status() {
        let (printer, mut ctx) = context();
        printer.adjust_live_offset(-0.05);
        assert_eq!(ctx.save_live_offset().unwrap(), -0.05);
        assert_eq!(ctx.status().probe_z_correction, -0.05);
    }

    #[test]
    fn refresh_limits_follows_axis_minimum() {
        let (printer, mut ctx) = context();
        assert_eq!(ctx.config().probe_z_min, -2.0);

        printer.set_z_min(-4.0);
        ctx.refresh_limits();
        assert_eq!(ctx.config().probe_z_min, -4.0);

        printer.set_z_min(-30.0);
        ctx.refresh_limits();
        assert_eq!(ctx.config().probe_z_min, -10.0);
    }
}
