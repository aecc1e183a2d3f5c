// Calibration phase state machine
//
// A measurement cycle walks BedProbing -> Lifted -> InductiveProbing ->
// Computed. A full calibration wraps the cycles with Preparing at the front
// and Reducing -> Applying -> Persisted at the back. Any failure moves the
// tracker to Aborted; the next command starts again from Idle.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::{log_probe_error, ProbeError};
use crate::telemetry::{ProbeEvent, TelemetryCollector};

/// Phase of the probing/calibration workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPhase {
    Idle,
    Preparing,
    BedProbing,
    Lifted,
    InductiveProbing,
    Computed,
    Reducing,
    Applying,
    Persisted,
    Aborted,
}

impl CalibrationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalibrationPhase::Idle => "idle",
            CalibrationPhase::Preparing => "preparing",
            CalibrationPhase::BedProbing => "bed_probing",
            CalibrationPhase::Lifted => "lifted",
            CalibrationPhase::InductiveProbing => "inductive_probing",
            CalibrationPhase::Computed => "computed",
            CalibrationPhase::Reducing => "reducing",
            CalibrationPhase::Applying => "applying",
            CalibrationPhase::Persisted => "persisted",
            CalibrationPhase::Aborted => "aborted",
        }
    }

    /// Whether `next` may follow this phase
    ///
    /// Standalone probe and home commands stop after `Lifted`, a standalone
    /// measurement stops after `Computed`.
    pub fn can_transition_to(&self, next: CalibrationPhase) -> bool {
        use CalibrationPhase::*;

        matches!(
            (self, next),
            (Idle, Preparing)
                | (Idle, BedProbing)
                | (Preparing, BedProbing)
                | (BedProbing, Lifted)
                | (Lifted, InductiveProbing)
                | (Lifted, Idle)
                | (InductiveProbing, Computed)
                | (Computed, BedProbing)
                | (Computed, Reducing)
                | (Computed, Idle)
                | (Reducing, Applying)
                | (Applying, Persisted)
                | (Persisted, Idle)
                | (Aborted, Idle)
        )
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the current phase and reports every change as a telemetry event
pub struct PhaseTracker {
    phase: CalibrationPhase,
    cycle: usize,
    telemetry: Arc<TelemetryCollector>,
}

impl PhaseTracker {
    pub fn new(telemetry: Arc<TelemetryCollector>) -> Self {
        Self {
            phase: CalibrationPhase::Idle,
            cycle: 0,
            telemetry,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// Measurement cycle currently running, 1-based
    pub fn cycle(&self) -> usize {
        self.cycle
    }

    /// Start a new command, clearing a previous abort
    pub fn begin(&mut self) -> Result<(), ProbeError> {
        self.cycle = 0;
        match self.phase {
            CalibrationPhase::Idle => Ok(()),
            CalibrationPhase::Aborted => self.advance(CalibrationPhase::Idle),
            other => Err(ProbeError::InvalidTransition {
                from: other,
                to: CalibrationPhase::Idle,
            }),
        }
    }

    pub fn advance(&mut self, next: CalibrationPhase) -> Result<(), ProbeError> {
        if !self.phase.can_transition_to(next) {
            return Err(ProbeError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        if next == CalibrationPhase::BedProbing {
            self.cycle += 1;
        }
        debug!("[PhaseTracker] {} -> {} (cycle {})", self.phase, next, self.cycle);
        self.telemetry.publish(ProbeEvent::PhaseChanged {
            from: self.phase,
            to: next,
            cycle: self.cycle,
        });
        self.phase = next;
        Ok(())
    }

    /// Return to Idle after a completed command
    pub fn finish(&mut self) -> Result<(), ProbeError> {
        self.advance(CalibrationPhase::Idle)
    }

    /// Move to Aborted and wrap `cause` with the phase it interrupted
    pub fn abort(&mut self, cause: ProbeError, context: &str) -> ProbeError {
        let err = match cause {
            already @ ProbeError::Aborted { .. } => already,
            cause => ProbeError::Aborted {
                phase: self.phase,
                cause: Box::new(cause),
            },
        };
        warn!("[PhaseTracker] Aborting {} during {}", context, self.phase);
        log_probe_error(&err, context);
        self.telemetry.record_error(&err, context);
        self.telemetry.publish(ProbeEvent::PhaseChanged {
            from: self.phase,
            to: CalibrationPhase::Aborted,
            cycle: self.cycle,
        });
        self.phase = CalibrationPhase::Aborted;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CalibrationPhase::*;

    fn tracker() -> PhaseTracker {
        PhaseTracker::new(Arc::new(TelemetryCollector::default()))
    }

    #[test]
    fn full_calibration_path_is_valid() {
        let mut tracker = tracker();
        tracker.begin().unwrap();
        let mut path = vec![Preparing];
        for _ in 0..3 {
            path.extend([BedProbing, Lifted, InductiveProbing, Computed]);
        }
        path.extend([Reducing, Applying, Persisted, Idle]);

        for phase in path {
            tracker.advance(phase).unwrap();
        }
        assert_eq!(tracker.phase(), Idle);
        assert_eq!(tracker.cycle(), 3);
    }

    #[test]
    fn skipping_a_phase_is_rejected() {
        let mut tracker = tracker();
        tracker.advance(BedProbing).unwrap();
        assert_eq!(
            tracker.advance(InductiveProbing),
            Err(ProbeError::InvalidTransition {
                from: BedProbing,
                to: InductiveProbing
            })
        );
        assert_eq!(tracker.phase(), BedProbing);
    }

    #[test]
    fn abort_wraps_cause_with_phase() {
        let mut tracker = tracker();
        tracker.advance(BedProbing).unwrap();
        tracker.advance(Lifted).unwrap();
        tracker.advance(InductiveProbing).unwrap();

        let err = tracker.abort(
            ProbeError::NoTrigger {
                sensor: "probe".to_string(),
                limit_z: -2.0,
            },
            "measure_offset",
        );
        match &err {
            ProbeError::Aborted { phase, cause } => {
                assert_eq!(*phase, InductiveProbing);
                assert!(matches!(**cause, ProbeError::NoTrigger { .. }));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(tracker.phase(), Aborted);

        tracker.begin().unwrap();
        assert_eq!(tracker.phase(), Idle);
    }

    #[test]
    fn abort_does_not_double_wrap() {
        let mut tracker = tracker();
        tracker.advance(Preparing).unwrap();
        let inner = tracker.abort(ProbeError::NoSamples, "calibrate");
        let outer = tracker.abort(inner.clone(), "calibrate");
        assert_eq!(inner, outer);
    }

    #[test]
    fn begin_rejects_command_in_flight() {
        let mut tracker = tracker();
        tracker.advance(Preparing).unwrap();
        assert!(tracker.begin().is_err());
    }

    #[test]
    fn phase_names_are_snake_case() {
        assert_eq!(InductiveProbing.to_string(), "inductive_probing");
        assert_eq!(
            serde_json::to_value(BedProbing).unwrap(),
            serde_json::json!("bed_probing")
        );
    }
}
