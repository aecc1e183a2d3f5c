//! Scoped Z motor current reduction for bed-sensor probing.
//!
//! A reduced drive current lets the Z motors stall against a rigid bed
//! instead of forcing the nozzle into it. [`ScaledCurrent`] owns the driver
//! registers for the whole window and restores them exactly once, either
//! through [`ScaledCurrent::release`] or on drop.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{log_probe_error, ProbeError};
use crate::hardware::{CurrentControl, DriverRegistry};
use crate::telemetry::{ProbeEvent, TelemetryCollector};

/// Recorded state of one driver inside a scaled window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverCurrent {
    pub driver: String,
    pub original_current: f64,
    pub scaled_current: f64,
}

pub struct CurrentScaler {
    registry: Arc<dyn DriverRegistry>,
    telemetry: Arc<TelemetryCollector>,
}

impl CurrentScaler {
    pub fn new(registry: Arc<dyn DriverRegistry>, telemetry: Arc<TelemetryCollector>) -> Self {
        Self {
            registry,
            telemetry,
        }
    }

    /// Scale every current-controllable Z driver by `factor`
    ///
    /// With no controllable drivers the returned handle is inert and probing
    /// proceeds at full current. If scaling fails partway, drivers already
    /// touched are restored before the error is returned.
    pub fn scoped_scale(&self, factor: f64) -> Result<ScaledCurrent<'_>, ProbeError> {
        let drivers = self.registry.current_controllable_z_drivers()?;
        let mut guard = ScaledCurrent {
            scaler: self,
            entries: Vec::with_capacity(drivers.len()),
            released: false,
        };

        if drivers.is_empty() {
            debug!("[CurrentScaler] No current-controllable Z drivers, probing at full current");
            return Ok(guard);
        }

        for driver in drivers {
            let original_current = driver.current()?;
            let scaled_current = original_current * factor;
            let state = DriverCurrent {
                driver: driver.id().to_string(),
                original_current,
                scaled_current,
            };
            // Recorded before the write so a half-applied update is still restored.
            guard.entries.push((Arc::clone(&driver), state));
            driver.set_current(scaled_current)?;
        }

        let states = guard.states();
        info!(
            "[CurrentScaler] Scaled {} Z driver(s) by {:.2}",
            states.len(),
            factor
        );
        self.telemetry.publish(ProbeEvent::CurrentScaled {
            factor,
            drivers: states,
        });
        Ok(guard)
    }
}

/// Handle for an active scaled-current window
pub struct ScaledCurrent<'a> {
    scaler: &'a CurrentScaler,
    entries: Vec<(Arc<dyn CurrentControl>, DriverCurrent)>,
    released: bool,
}

impl ScaledCurrent<'_> {
    /// Whether any driver is actually scaled
    pub fn is_active(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn states(&self) -> Vec<DriverCurrent> {
        self.entries.iter().map(|(_, state)| state.clone()).collect()
    }

    /// Restore every driver to its original current
    ///
    /// Every driver is attempted even if one fails; the first failure is
    /// returned.
    pub fn release(mut self) -> Result<(), ProbeError> {
        self.restore()
    }

    fn restore(&mut self) -> Result<(), ProbeError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let mut first_error = None;
        for (driver, state) in self.entries.iter().rev() {
            if let Err(err) = driver.set_current(state.original_current) {
                warn!(
                    "[CurrentScaler] Failed to restore {} to {:.3} A",
                    state.driver, state.original_current
                );
                log_probe_error(&err, "restore_z_current");
                first_error.get_or_insert(err);
            }
        }

        if self.is_active() {
            debug!("[CurrentScaler] Restored {} Z driver(s)", self.entries.len());
            self.scaler.telemetry.publish(ProbeEvent::CurrentRestored {
                drivers: self.states(),
            });
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ScaledCurrent<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.restore() {
            log_probe_error(&err, "scaled_current_drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{SimEvent, SimPrinter, SimPrinterConfig};

    fn scaler(printer: &SimPrinter) -> CurrentScaler {
        CurrentScaler::new(
            Arc::new(printer.clone()),
            Arc::new(TelemetryCollector::default()),
        )
    }

    fn current_writes(printer: &SimPrinter) -> Vec<(String, f64)> {
        printer
            .journal()
            .into_iter()
            .filter_map(|event| match event {
                SimEvent::SetCurrent { driver, current } => Some((driver, current)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn scales_and_restores_on_release() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let scaler = scaler(&printer);

        let guard = scaler.scoped_scale(0.5).unwrap();
        assert!(guard.is_active());
        assert_eq!(printer.driver_current("stepper_z"), Some(0.4));
        assert_eq!(printer.driver_current("stepper_z1"), Some(0.4));

        guard.release().unwrap();
        assert_eq!(printer.driver_current("stepper_z"), Some(0.8));
        assert_eq!(printer.driver_current("stepper_z1"), Some(0.8));
        // Two scale writes plus exactly two restore writes.
        assert_eq!(current_writes(&printer).len(), 4);
    }

    #[test]
    fn failure_inside_window_still_restores() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let scaler = scaler(&printer);

        let result: Result<(), ProbeError> = (|| {
            let _guard = scaler.scoped_scale(0.33)?;
            Err(ProbeError::NoTrigger {
                sensor: "bed_sensor".to_string(),
                limit_z: -2.0,
            })
        })();

        assert!(matches!(result, Err(ProbeError::NoTrigger { .. })));
        assert_eq!(printer.driver_current("stepper_z"), Some(0.8));
        assert_eq!(printer.driver_current("stepper_z1"), Some(0.8));
        assert_eq!(current_writes(&printer).len(), 4);
    }

    #[test]
    fn no_drivers_is_a_noop() {
        let printer = SimPrinter::new(SimPrinterConfig {
            z_drivers: Vec::new(),
            ..SimPrinterConfig::default()
        });
        let scaler = scaler(&printer);

        let guard = scaler.scoped_scale(0.33).unwrap();
        assert!(!guard.is_active());
        guard.release().unwrap();
        assert!(current_writes(&printer).is_empty());
    }

    #[test]
    fn partial_scale_failure_restores_touched_drivers() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        printer.set_failing_driver(Some("stepper_z1"));
        let scaler = scaler(&printer);

        let result = scaler.scoped_scale(0.33);
        assert!(matches!(result, Err(ProbeError::Hardware { .. })));
        assert_eq!(printer.driver_current("stepper_z"), Some(0.8));
        assert_eq!(printer.driver_current("stepper_z1"), Some(0.8));
    }

    #[test]
    fn release_publishes_restore_event() {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let telemetry = Arc::new(TelemetryCollector::default());
        let scaler = CurrentScaler::new(Arc::new(printer.clone()), Arc::clone(&telemetry));

        scaler.scoped_scale(0.33).unwrap().release().unwrap();

        let snapshot = telemetry.snapshot();
        assert!(matches!(
            snapshot.recent.first(),
            Some(ProbeEvent::CurrentScaled { .. })
        ));
        assert!(matches!(
            snapshot.recent.last(),
            Some(ProbeEvent::CurrentRestored { drivers }) if drivers.len() == 2
        ));
    }
}
