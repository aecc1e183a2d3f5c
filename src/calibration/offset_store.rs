// OffsetStore - live offset and persisted correction
//
// The live offset is the coordinate Z offset the motion system applies on
// every move; nothing else in the crate writes it. Persisted corrections
// are staged through the persistence collaborator and reach durable storage
// only when the host saves its configuration.

use std::sync::Arc;

use log::info;

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::hardware::{LiveOffset, Persistence};
use crate::telemetry::{ProbeEvent, TelemetryCollector};

/// Persistence key holding the committed correction
pub const CORRECTION_KEY: &str = "probe_z_correction";

pub struct OffsetStore {
    live: Arc<dyn LiveOffset>,
    persistence: Arc<dyn Persistence>,
    telemetry: Arc<TelemetryCollector>,
}

impl OffsetStore {
    pub fn new(
        live: Arc<dyn LiveOffset>,
        persistence: Arc<dyn Persistence>,
        telemetry: Arc<TelemetryCollector>,
    ) -> Self {
        Self {
            live,
            persistence,
            telemetry,
        }
    }

    pub fn live_offset(&self) -> Result<f64, ProbeError> {
        self.live.z_offset()
    }

    /// Set the live offset without persisting it
    pub fn apply(&self, z: f64) -> Result<(), ProbeError> {
        self.live.set_z_offset(z)?;
        info!("[OffsetStore] Live Z offset set to {:.6}", z);
        self.telemetry.publish(ProbeEvent::OffsetApplied { z });
        Ok(())
    }

    /// Stage `value` as the persisted correction and update `config`
    ///
    /// The in-memory config only changes once the write is accepted.
    pub fn commit(&self, config: &mut ProbeConfig, value: f64) -> Result<(), ProbeError> {
        self.persistence
            .write(&config.name, CORRECTION_KEY, &format!("{:.6}", value))?;
        config.probe_z_correction = value;
        info!(
            "[OffsetStore] [{}] {} = {:.6} staged; save the host configuration to keep it",
            config.name, CORRECTION_KEY, value
        );
        self.telemetry.publish(ProbeEvent::OffsetCommitted {
            section: config.name.clone(),
            key: CORRECTION_KEY.to_string(),
            value,
        });
        Ok(())
    }

    /// Apply the last persisted correction as the live offset
    pub fn load(&self, config: &ProbeConfig) -> Result<f64, ProbeError> {
        let value = config.probe_z_correction;
        self.apply(value)?;
        Ok(value)
    }

    /// Commit the current live offset, e.g. after manual baby-stepping
    pub fn save_live_offset(&self, config: &mut ProbeConfig) -> Result<f64, ProbeError> {
        let value = self.live_offset()?;
        self.commit(config, value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawProbeConfig;
    use crate::hardware::{MotionProvider, SimPrinter, SimPrinterConfig};

    fn setup() -> (SimPrinter, OffsetStore, ProbeConfig) {
        let printer = SimPrinter::new(SimPrinterConfig::default());
        let shared = Arc::new(printer.clone());
        let store = OffsetStore::new(
            shared.clone(),
            shared,
            Arc::new(TelemetryCollector::default()),
        );
        let raw = RawProbeConfig {
            pin: Some("bed_sensor".to_string()),
            ..RawProbeConfig::default()
        };
        let config = ProbeConfig::from_raw(raw, &printer.limits()).unwrap();
        (printer, store, config)
    }

    #[test]
    fn apply_sets_live_offset_only() {
        let (printer, store, _config) = setup();
        store.apply(-0.25).unwrap();
        assert_eq!(printer.live_offset(), -0.25);
        assert_eq!(printer.persisted("auto_z_offset", CORRECTION_KEY), None);
    }

    #[test]
    fn commit_then_load_applies_committed_value() {
        let (printer, store, mut config) = setup();
        store.commit(&mut config, -0.4967).unwrap();

        assert_eq!(config.probe_z_correction, -0.4967);
        assert_eq!(
            printer.persisted("auto_z_offset", CORRECTION_KEY).as_deref(),
            Some("-0.496700")
        );

        assert_eq!(store.load(&config).unwrap(), -0.4967);
        assert_eq!(printer.live_offset(), -0.4967);
    }

    #[test]
    fn save_live_offset_commits_current_value() {
        let (printer, store, mut config) = setup();
        printer.adjust_live_offset(0.125);

        assert_eq!(store.save_live_offset(&mut config).unwrap(), 0.125);
        assert_eq!(config.probe_z_correction, 0.125);
        assert_eq!(
            printer.persisted("auto_z_offset", CORRECTION_KEY).as_deref(),
            Some("0.125000")
        );
    }
}
