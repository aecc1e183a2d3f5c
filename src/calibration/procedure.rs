// CalibrationController - full multi-cycle calibration
//
// The workflow:
// 1. Clear the live offset so every cycle measures in an un-offset frame
//    (restored if the run aborts)
// 2. Move to bed center and run the preparation script once
// 3. Run `offset_samples` measurement cycles; any failure aborts the run
// 4. Return to bed center and reduce the candidate offsets
// 5. Apply the result as the live offset and stage it for persistence

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::calibration::measure::{MeasurementResult, OffsetMeasurer};
use crate::calibration::offset_store::OffsetStore;
use crate::calibration::state::{CalibrationPhase, PhaseTracker};
use crate::config::{ProbeConfig, SamplesResult};
use crate::error::{log_probe_error, ProbeError};
use crate::hardware::Collaborators;
use crate::probing::reduce;
use crate::telemetry::TelemetryCollector;

/// Outcome of a completed calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// One measurement per cycle, in order
    pub measurements: Vec<MeasurementResult>,
    pub reduction: SamplesResult,
    /// Reduced correction, applied and persisted
    pub correction: f64,
}

impl CalibrationResult {
    pub fn candidate_offsets(&self) -> Vec<f64> {
        self.measurements
            .iter()
            .map(|measurement| measurement.candidate_offset)
            .collect()
    }
}

pub struct CalibrationController<'a> {
    hw: &'a Collaborators,
    store: &'a OffsetStore,
    telemetry: &'a Arc<TelemetryCollector>,
}

impl<'a> CalibrationController<'a> {
    pub fn new(
        hw: &'a Collaborators,
        store: &'a OffsetStore,
        telemetry: &'a Arc<TelemetryCollector>,
    ) -> Self {
        Self {
            hw,
            store,
            telemetry,
        }
    }

    /// Run a full calibration and commit the reduced correction
    ///
    /// On failure the tracker ends in `Aborted`, the returned error is
    /// [`ProbeError::Aborted`] naming the interrupted phase, the live offset
    /// is put back to its value before the run, and the persisted correction
    /// is left untouched.
    pub fn calibrate(
        &self,
        config: &mut ProbeConfig,
        tracker: &mut PhaseTracker,
    ) -> Result<CalibrationResult, ProbeError> {
        tracker.begin()?;
        let previous = match self.store.live_offset() {
            Ok(previous) => previous,
            Err(err) => return Err(tracker.abort(err, "calibrate")),
        };
        match self.run(config, tracker) {
            Ok(result) => Ok(result),
            Err(err) => {
                let err = tracker.abort(err, "calibrate");
                self.restore_live_offset(previous);
                Err(err)
            }
        }
    }

    fn restore_live_offset(&self, previous: f64) {
        warn!(
            "[CalibrationController] Calibration aborted, restoring live Z offset {:.6}",
            previous
        );
        if let Err(err) = self.store.apply(previous) {
            log_probe_error(&err, "restore_live_offset");
        }
    }

    fn run(
        &self,
        config: &mut ProbeConfig,
        tracker: &mut PhaseTracker,
    ) -> Result<CalibrationResult, ProbeError> {
        self.store.apply(0.0)?;
        let measurements = {
            let measurer = OffsetMeasurer::new(self.hw, config, self.telemetry);
            measurer.prepare(tracker, true)?;

            let mut measurements = Vec::with_capacity(config.offset_samples);
            for _ in 0..config.offset_samples {
                measurements.push(measurer.measure(tracker)?);
            }
            measurer.move_to_center()?;
            measurements
        };

        tracker.advance(CalibrationPhase::Reducing)?;
        let offsets: Vec<f64> = measurements
            .iter()
            .map(|measurement| measurement.candidate_offset)
            .collect();
        let correction = reduce(&offsets, config.samples_result)?;
        info!(
            "[CalibrationController] {} of {:?} = {:.6}",
            config.samples_result, offsets, correction
        );

        tracker.advance(CalibrationPhase::Applying)?;
        self.store.apply(correction)?;
        self.store.commit(config, correction)?;
        tracker.advance(CalibrationPhase::Persisted)?;
        tracker.finish()?;

        Ok(CalibrationResult {
            measurements,
            reduction: config.samples_result,
            correction,
        })
    }
}
