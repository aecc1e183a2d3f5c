//! Host-facing command surface.
//!
//! Command lines look like `AUTO_Z_PROBE RELEASE=1`: a case-insensitive
//! command name followed by optional `KEY=VALUE` parameters.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::calibration::{BedProbe, CalibrationResult, MeasurementResult};
use crate::context::AutoZContext;
use crate::error::{ConfigError, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoZCommand {
    Probe { release: bool },
    HomeZ,
    MeasureOffset,
    Calibrate,
    LoadOffset,
    SaveLiveOffset,
}

impl AutoZCommand {
    pub const NAMES: &'static [&'static str] = &[
        "AUTO_Z_PROBE",
        "AUTO_Z_HOME_Z",
        "AUTO_Z_MEASURE_OFFSET",
        "AUTO_Z_CALIBRATE",
        "AUTO_Z_LOAD_OFFSET",
        "AUTO_Z_SAVE_GCODE_OFFSET",
    ];

    /// Every command with default parameters, in registration order
    pub fn all() -> [AutoZCommand; 6] {
        [
            AutoZCommand::Probe { release: false },
            AutoZCommand::HomeZ,
            AutoZCommand::MeasureOffset,
            AutoZCommand::Calibrate,
            AutoZCommand::LoadOffset,
            AutoZCommand::SaveLiveOffset,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            AutoZCommand::Probe { .. } => "AUTO_Z_PROBE",
            AutoZCommand::HomeZ => "AUTO_Z_HOME_Z",
            AutoZCommand::MeasureOffset => "AUTO_Z_MEASURE_OFFSET",
            AutoZCommand::Calibrate => "AUTO_Z_CALIBRATE",
            AutoZCommand::LoadOffset => "AUTO_Z_LOAD_OFFSET",
            AutoZCommand::SaveLiveOffset => "AUTO_Z_SAVE_GCODE_OFFSET",
        }
    }

    pub fn help(&self) -> &'static str {
        match self {
            AutoZCommand::Probe { .. } => "Probe Z with the bed sensor at the current XY position",
            AutoZCommand::HomeZ => "Home Z at bed center using the bed sensor as endstop",
            AutoZCommand::MeasureOffset => {
                "Measure the bed sensor vs inductive probe offset once, without applying it"
            }
            AutoZCommand::Calibrate => {
                "Measure the offset several times, apply the reduced value and stage it for saving"
            }
            AutoZCommand::LoadOffset => "Apply the saved probe_z_correction as the live Z offset",
            AutoZCommand::SaveLiveOffset => {
                "Stage the current live Z offset as the new probe_z_correction"
            }
        }
    }

    /// Parse a full command line including parameters
    pub fn parse_line(line: &str) -> Result<Self, ConfigError> {
        let mut parts = line.split_whitespace();
        let name = parts.next().unwrap_or_default().to_ascii_uppercase();
        let mut command = match name.as_str() {
            "AUTO_Z_PROBE" => AutoZCommand::Probe { release: false },
            "AUTO_Z_HOME_Z" => AutoZCommand::HomeZ,
            "AUTO_Z_MEASURE_OFFSET" => AutoZCommand::MeasureOffset,
            "AUTO_Z_CALIBRATE" => AutoZCommand::Calibrate,
            "AUTO_Z_LOAD_OFFSET" => AutoZCommand::LoadOffset,
            "AUTO_Z_SAVE_GCODE_OFFSET" => AutoZCommand::SaveLiveOffset,
            _ => {
                return Err(ConfigError::InvalidOption {
                    key: "command".to_string(),
                    value: line.trim().to_string(),
                    expected: Self::NAMES,
                })
            }
        };

        for param in parts {
            let (key, value) = param.split_once('=').ok_or_else(|| ConfigError::Parse {
                key: "parameter".to_string(),
                value: param.to_string(),
            })?;
            match (&mut command, key.to_ascii_uppercase().as_str()) {
                (AutoZCommand::Probe { release }, "RELEASE") => *release = parse_flag(key, value)?,
                _ => log::warn!("[Commands] Ignoring parameter {} for {}", param, name),
            }
        }
        Ok(command)
    }

    /// Run the command against `ctx`
    pub fn execute(&self, ctx: &mut AutoZContext) -> Result<CommandResponse, ProbeError> {
        let response = match *self {
            AutoZCommand::Probe { release } => CommandResponse::Probe(ctx.probe(release)?),
            AutoZCommand::HomeZ => CommandResponse::HomeZ(ctx.home_z()?),
            AutoZCommand::MeasureOffset => CommandResponse::MeasureOffset(ctx.measure_offset()?),
            AutoZCommand::Calibrate => CommandResponse::Calibrate(ctx.calibrate()?),
            AutoZCommand::LoadOffset => CommandResponse::LoadOffset {
                live_offset: ctx.load_offset()?,
            },
            AutoZCommand::SaveLiveOffset => CommandResponse::SaveLiveOffset {
                section: ctx.config().name.clone(),
                probe_z_correction: ctx.save_live_offset()?,
            },
        };
        Ok(response)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::Parse {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

impl FromStr for AutoZCommand {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_line(s)
    }
}

impl fmt::Display for AutoZCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())?;
        if let AutoZCommand::Probe { release: true } = self {
            f.write_str(" RELEASE=1")?;
        }
        Ok(())
    }
}

/// Result of one command, serializable for the host or the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandResponse {
    Probe(BedProbe),
    HomeZ(BedProbe),
    MeasureOffset(MeasurementResult),
    Calibrate(CalibrationResult),
    LoadOffset {
        live_offset: f64,
    },
    SaveLiveOffset {
        section: String,
        probe_z_correction: f64,
    },
}

impl CommandResponse {
    /// One-line operator message
    pub fn message(&self) -> String {
        match self {
            CommandResponse::Probe(bed) => match bed.release_z {
                Some(release) => format!(
                    "Bed sensor triggered at z={:.6}, released at z={:.6}",
                    bed.z, release
                ),
                None => format!("Bed sensor triggered at z={:.6}", bed.z),
            },
            CommandResponse::HomeZ(bed) => format!("Z homed on bed sensor (trigger z={:.6})", bed.z),
            CommandResponse::MeasureOffset(result) => format!(
                "Bed: {:.6}, probe: {:.6}, candidate offset: {:.6}",
                result.bed_sensor_z, result.inductive_probe_z, result.candidate_offset
            ),
            CommandResponse::Calibrate(result) => format!(
                "{} z-offset over {} run(s): {:.6}. Save the configuration to keep it",
                result.reduction,
                result.measurements.len(),
                result.correction
            ),
            CommandResponse::LoadOffset { live_offset } => {
                format!("Live z-offset set to {:.6}", live_offset)
            }
            CommandResponse::SaveLiveOffset {
                section,
                probe_z_correction,
            } => format!(
                "[{}] probe_z_correction: {:.6} staged. Save the configuration to keep it",
                section, probe_z_correction
            ),
        }
    }
}
