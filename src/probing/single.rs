//! One descent-until-trigger (or ascent-until-release) against a sensor.

use std::sync::Arc;

use log::{debug, warn};

use crate::error::{log_probe_error, ProbeError};
use crate::hardware::{EndstopProvider, MotionProvider, ProbeDirection, SensorId};

/// Motion parameters for a single probing move
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeMotion {
    pub speed: f64,
    /// Acceleration override in mm/s², 0 keeps the host default
    pub accel: f64,
    /// Lowest Z a descent may reach
    pub floor: f64,
    /// Maximum upward travel while waiting for a release
    pub release_travel: f64,
}

pub struct SingleProbe {
    motion: Arc<dyn MotionProvider>,
    endstops: Arc<dyn EndstopProvider>,
    sensor: SensorId,
    params: ProbeMotion,
}

impl SingleProbe {
    pub fn new(
        motion: Arc<dyn MotionProvider>,
        endstops: Arc<dyn EndstopProvider>,
        sensor: SensorId,
        params: ProbeMotion,
    ) -> Self {
        Self {
            motion,
            endstops,
            sensor,
            params,
        }
    }

    /// Run one probing move and return the toolhead Z at the transition
    ///
    /// The sensor state is checked before any motion is issued. The toolhead
    /// is left where the move stopped; lifting away is up to the caller.
    pub fn probe(&self, direction: ProbeDirection) -> Result<f64, ProbeError> {
        self.motion.flush()?;
        let triggered = self.endstops.is_triggered(&self.sensor)?;
        match direction {
            ProbeDirection::Descend if triggered => {
                return Err(ProbeError::AlreadyTriggered {
                    sensor: self.sensor.to_string(),
                })
            }
            ProbeDirection::Ascend if !triggered => {
                return Err(ProbeError::AlreadyReleased {
                    sensor: self.sensor.to_string(),
                })
            }
            _ => {}
        }

        let position = self.motion.current_position()?;
        let target = match direction {
            ProbeDirection::Descend => position.with_z(self.params.floor),
            ProbeDirection::Ascend => position.with_z(position.z + self.params.release_travel),
        };
        debug!(
            "[SingleProbe] {:?} on '{}' from z={:.3} toward z={:.3} at {:.1} mm/s",
            direction, self.sensor, position.z, target.z, self.params.speed
        );

        let mut accel = AccelGuard::engage(self.motion.as_ref(), self.params.accel)?;
        let outcome =
            self.endstops
                .probe_until_trigger(&self.sensor, target, self.params.speed, direction);
        let outcome = match (outcome, accel.restore()) {
            (Ok(outcome), restored) => {
                restored?;
                outcome
            }
            (Err(err), restored) => {
                // Report the probing failure; a restore failure is only logged.
                if let Err(restore_err) = restored {
                    log_probe_error(&restore_err, "restore_max_accel");
                }
                return Err(err);
            }
        };

        match outcome {
            Some(z) if !z.is_finite() => Err(ProbeError::hardware(
                self.sensor.to_string(),
                format!("non-finite trigger height {}", z),
            )),
            Some(z) => {
                debug!("[SingleProbe] '{}' changed state at z={:.6}", self.sensor, z);
                Ok(z)
            }
            None => {
                warn!(
                    "[SingleProbe] '{}' reached z={:.3} without a transition",
                    self.sensor, target.z
                );
                Err(ProbeError::NoTrigger {
                    sensor: self.sensor.to_string(),
                    limit_z: target.z,
                })
            }
        }
    }
}

/// Temporarily overrides the host max acceleration for a probing move
struct AccelGuard<'a> {
    motion: &'a dyn MotionProvider,
    saved: Option<f64>,
}

impl<'a> AccelGuard<'a> {
    fn engage(motion: &'a dyn MotionProvider, accel: f64) -> Result<Self, ProbeError> {
        let mut guard = Self {
            motion,
            saved: None,
        };
        if accel > 0.0 {
            let saved = motion.max_accel()?;
            guard.saved = Some(saved);
            motion.set_max_accel(accel)?;
        }
        Ok(guard)
    }

    fn restore(&mut self) -> Result<(), ProbeError> {
        match self.saved.take() {
            Some(saved) => self.motion.set_max_accel(saved),
            None => Ok(()),
        }
    }
}

impl Drop for AccelGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            log_probe_error(&err, "restore_max_accel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MachineLimits, Position, SimEvent, SimPrinter, SimPrinterConfig};

    fn params() -> ProbeMotion {
        ProbeMotion {
            speed: 5.0,
            accel: 0.0,
            floor: -2.0,
            release_travel: 5.0,
        }
    }

    fn probe_for(printer: &SimPrinter, params: ProbeMotion) -> SingleProbe {
        let shared = Arc::new(printer.clone());
        SingleProbe::new(
            shared.clone(),
            shared,
            SensorId::new("bed_sensor"),
            params,
        )
    }

    /// Motion that refuses to put the host acceleration back
    struct StubbornAccel(SimPrinter);

    impl MotionProvider for StubbornAccel {
        fn current_position(&self) -> Result<Position, ProbeError> {
            self.0.current_position()
        }

        fn move_to(&self, target: Position, speed: f64, accel: Option<f64>) -> Result<(), ProbeError> {
            self.0.move_to(target, speed, accel)
        }

        fn flush(&self) -> Result<(), ProbeError> {
            self.0.flush()
        }

        fn set_z_position(&self, z: f64) -> Result<(), ProbeError> {
            self.0.set_z_position(z)
        }

        fn max_accel(&self) -> Result<f64, ProbeError> {
            self.0.max_accel()
        }

        fn set_max_accel(&self, accel: f64) -> Result<(), ProbeError> {
            if accel == 5000.0 {
                return Err(ProbeError::hardware("motion", "max_accel locked"));
            }
            self.0.set_max_accel(accel)
        }

        fn limits(&self) -> MachineLimits {
            self.0.limits()
        }
    }

    /// Endstop whose probing move always fails
    struct BrokenEndstop;

    impl EndstopProvider for BrokenEndstop {
        fn is_triggered(&self, _sensor: &SensorId) -> Result<bool, ProbeError> {
            Ok(false)
        }

        fn probe_until_trigger(
            &self,
            _sensor: &SensorId,
            _target: Position,
            _speed: f64,
            _direction: ProbeDirection,
        ) -> Result<Option<f64>, ProbeError> {
            Err(ProbeError::hardware("bed_sensor", "endstop query timed out"))
        }
    }

    fn has_motion(journal: &[SimEvent]) -> bool {
        journal
            .iter()
            .any(|event| matches!(event, SimEvent::Move { .. } | SimEvent::ProbeMove { .. }))
    }

    #[test]
    fn descent_returns_trigger_height() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let probe = probe_for(&printer, params());

        assert_eq!(probe.probe(ProbeDirection::Descend).unwrap(), 1.8);
        let journal = printer.journal();
        assert!(journal.iter().any(|event| matches!(
            event,
            SimEvent::ProbeMove { target, .. } if target.z == -2.0
        )));
    }

    #[test]
    fn already_triggered_issues_no_motion() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        printer.set_bed_stuck(true);
        let probe = probe_for(&printer, params());

        let err = probe.probe(ProbeDirection::Descend).unwrap_err();
        assert_eq!(
            err,
            ProbeError::AlreadyTriggered {
                sensor: "bed_sensor".to_string()
            }
        );
        assert!(!has_motion(&printer.journal()));
    }

    #[test]
    fn floor_without_trigger_reports_limit() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        printer.set_bed_missing(true);
        let probe = probe_for(&printer, params());

        match probe.probe(ProbeDirection::Descend) {
            Err(ProbeError::NoTrigger { sensor, limit_z }) => {
                assert_eq!(sensor, "bed_sensor");
                assert_eq!(limit_z, -2.0);
            }
            other => panic!("expected NoTrigger, got {:?}", other),
        }
        assert_eq!(printer.position().z, -2.0);
    }

    #[test]
    fn accel_override_is_restored() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let probe = probe_for(
            &printer,
            ProbeMotion {
                accel: 100.0,
                ..params()
            },
        );

        probe.probe(ProbeDirection::Descend).unwrap();
        let accels: Vec<f64> = printer
            .journal()
            .into_iter()
            .filter_map(|event| match event {
                SimEvent::SetMaxAccel { accel } => Some(accel),
                _ => None,
            })
            .collect();
        assert_eq!(accels, vec![100.0, 5000.0]);
        assert_eq!(printer.max_accel_setting(), 5000.0);
    }

    #[test]
    fn accel_restored_when_probe_misses() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        printer.set_bed_missing(true);
        let probe = probe_for(
            &printer,
            ProbeMotion {
                accel: 250.0,
                ..params()
            },
        );

        assert!(probe.probe(ProbeDirection::Descend).is_err());
        assert_eq!(printer.max_accel_setting(), 5000.0);
    }

    #[test]
    fn zero_accel_leaves_host_setting_alone() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        probe_for(&printer, params())
            .probe(ProbeDirection::Descend)
            .unwrap();
        assert!(!printer
            .journal()
            .iter()
            .any(|event| matches!(event, SimEvent::SetMaxAccel { .. })));
    }

    #[test]
    fn ascent_detects_release_after_contact() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let probe = probe_for(&printer, params());

        let contact = probe.probe(ProbeDirection::Descend).unwrap();
        let release = probe.probe(ProbeDirection::Ascend).unwrap();
        assert!(release > contact);
        assert!(release - contact < 0.1);
    }

    #[test]
    fn ascent_requires_triggered_sensor() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let probe = probe_for(&printer, params());

        assert_eq!(
            probe.probe(ProbeDirection::Ascend).unwrap_err(),
            ProbeError::AlreadyReleased {
                sensor: "bed_sensor".to_string()
            }
        );
        assert!(!has_motion(&printer.journal()));
    }

    #[test]
    fn probing_error_wins_over_accel_restore_error() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let probe = SingleProbe::new(
            Arc::new(StubbornAccel(printer)),
            Arc::new(BrokenEndstop),
            SensorId::new("bed_sensor"),
            ProbeMotion {
                accel: 100.0,
                ..params()
            },
        );

        let err = probe.probe(ProbeDirection::Descend).unwrap_err();
        assert_eq!(
            err,
            ProbeError::hardware("bed_sensor", "endstop query timed out")
        );
    }

    #[test]
    fn accel_restore_error_surfaces_after_clean_move() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let shared = Arc::new(printer.clone());
        let probe = SingleProbe::new(
            Arc::new(StubbornAccel(printer)),
            shared,
            SensorId::new("bed_sensor"),
            ProbeMotion {
                accel: 100.0,
                ..params()
            },
        );

        let err = probe.probe(ProbeDirection::Descend).unwrap_err();
        assert_eq!(err, ProbeError::hardware("motion", "max_accel locked"));
    }

    #[test]
    fn non_finite_trigger_height_is_rejected() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        printer.queue_bed_readings([f64::NAN]);
        let probe = probe_for(&printer, params());

        match probe.probe(ProbeDirection::Descend) {
            Err(ProbeError::Hardware { component, .. }) => assert_eq!(component, "bed_sensor"),
            other => panic!("expected Hardware, got {:?}", other),
        }
    }
}
