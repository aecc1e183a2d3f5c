//! Configuration management for the auto Z-offset probe section
//!
//! Raw values arrive either as JSON (desktop tooling, tests) or as the
//! `key: value` text of a host printer config section. Both paths land in
//! [`RawProbeConfig`], which is validated once into the immutable
//! [`ProbeConfig`] used by every probing component. Validation failures are
//! fatal: the module never becomes active with a bad section.

use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{log_config_error, ConfigError};
use crate::hardware::sim::SimPrinterConfig;
use crate::hardware::{MachineLimits, SensorId};
use crate::probing::floor::resolve_floor;
use crate::probing::samples::SamplingParams;

/// Minimum allowed hop between probing phases (mm)
pub const MIN_PROBE_HOP: f64 = 4.0;
/// Minimum allowed retract between samples (mm)
pub const MIN_SAMPLE_RETRACT_DIST: f64 = 1.0;
/// Allowed range for the Z motor current factor
pub const Z_CURRENT_FACTOR_RANGE: (f64, f64) = (0.1, 1.0);

/// Reduction policy for a set of samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplesResult {
    /// Arithmetic mean
    Average,
    /// Middle value, or mean of the two middle values for even counts
    Median,
}

impl SamplesResult {
    pub const TOKENS: &'static [&'static str] = &["average", "median"];

    pub fn as_str(&self) -> &'static str {
        match self {
            SamplesResult::Average => "average",
            SamplesResult::Median => "median",
        }
    }
}

impl fmt::Display for SamplesResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SamplesResult {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "average" => Ok(SamplesResult::Average),
            "median" => Ok(SamplesResult::Median),
            _ => Err(ConfigError::InvalidOption {
                key: "samples_result".to_string(),
                value: s.to_string(),
                expected: Self::TOKENS,
            }),
        }
    }
}

/// Unvalidated probe section as supplied by the host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RawProbeConfig {
    /// Section name, used as the persistence section and in messages
    pub name: String,
    /// Bed sensor signal pin (required)
    pub pin: Option<String>,
    /// Script run before bed-sensor probing
    pub prepare_gcode: Option<String>,
    /// Air gap added to every candidate offset (mm)
    pub z_offset: f64,
    /// Probing speed (mm/s)
    pub speed: f64,
    /// Lift speed (mm/s), defaults to `speed`
    pub lift_speed: Option<f64>,
    /// XY travel speed for center moves (mm/s)
    pub travel_speed: f64,
    /// Lift between phases (mm)
    pub probe_hop: f64,
    /// Acceleration during bed-sensor probing (mm/s^2), 0 = host default
    pub probe_accel: f64,
    /// Lowest Z for bed-sensor descents, falls back to the Z axis minimum
    pub probe_z_min: Option<f64>,
    /// Measurement cycles per calibration
    pub offset_samples: usize,
    /// Bed-sensor samples per probe point
    pub samples: usize,
    /// Retract between samples (mm)
    pub sample_retract_dist: f64,
    /// `average` or `median`, case-insensitive
    pub samples_result: String,
    /// Maximum allowed spread across a sample set (mm)
    pub samples_tolerance: f64,
    /// Full re-sampling attempts after a tolerance violation
    pub samples_tolerance_retries: usize,
    /// Z motor current multiplier during bed-sensor probing
    pub z_current_factor: f64,
    /// Last persisted correction (mm)
    pub probe_z_correction: f64,
}

impl Default for RawProbeConfig {
    fn default() -> Self {
        Self {
            name: "auto_z_offset".to_string(),
            pin: None,
            prepare_gcode: None,
            z_offset: 0.2,
            speed: 5.0,
            lift_speed: None,
            travel_speed: 50.0,
            probe_hop: 5.0,
            probe_accel: 0.0,
            probe_z_min: None,
            offset_samples: 3,
            samples: 1,
            sample_retract_dist: 2.0,
            samples_result: "average".to_string(),
            samples_tolerance: 0.1,
            samples_tolerance_retries: 0,
            z_current_factor: 0.33,
            probe_z_correction: 0.0,
        }
    }
}

impl RawProbeConfig {
    /// Build a raw section from host `key: value` text pairs
    ///
    /// Keys are matched case-insensitively; unknown keys are logged and
    /// ignored. Values that fail to parse are reported as
    /// [`ConfigError::Parse`].
    pub fn from_key_values<'a, I>(section: &str, pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut raw = RawProbeConfig {
            name: section.to_string(),
            ..RawProbeConfig::default()
        };

        for (key, value) in pairs {
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();
            match key.as_str() {
                "pin" => raw.pin = Some(value.to_string()),
                "prepare_gcode" => raw.prepare_gcode = Some(value.to_string()),
                "z_offset" => raw.z_offset = parse_field(&key, value)?,
                "speed" => raw.speed = parse_field(&key, value)?,
                "lift_speed" => raw.lift_speed = Some(parse_field(&key, value)?),
                "travel_speed" => raw.travel_speed = parse_field(&key, value)?,
                "probe_hop" => raw.probe_hop = parse_field(&key, value)?,
                "probe_accel" => raw.probe_accel = parse_field(&key, value)?,
                "probe_z_min" => raw.probe_z_min = Some(parse_field(&key, value)?),
                "offset_samples" => raw.offset_samples = parse_field(&key, value)?,
                "samples" => raw.samples = parse_field(&key, value)?,
                "sample_retract_dist" => raw.sample_retract_dist = parse_field(&key, value)?,
                "samples_result" => raw.samples_result = value.to_string(),
                "samples_tolerance" => raw.samples_tolerance = parse_field(&key, value)?,
                "samples_tolerance_retries" => {
                    raw.samples_tolerance_retries = parse_field(&key, value)?
                }
                "z_current_factor" => raw.z_current_factor = parse_field(&key, value)?,
                "probe_z_correction" => raw.probe_z_correction = parse_field(&key, value)?,
                other => log::warn!("[Config] Ignoring unknown option '{}' in [{}]", other, section),
            }
        }

        Ok(raw)
    }
}

fn parse_field<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::Parse {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Validated probe configuration
///
/// Immutable after load except `probe_z_correction`, which is rewritten
/// whenever a new correction is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub name: String,
    pub pin: SensorId,
    pub prepare_gcode: Option<String>,
    pub z_offset: f64,
    pub speed: f64,
    pub lift_speed: f64,
    pub travel_speed: f64,
    pub probe_hop: f64,
    pub probe_accel: f64,
    /// Resolved floor, never below the absolute clamp
    pub probe_z_min: f64,
    pub offset_samples: usize,
    pub samples: usize,
    pub sample_retract_dist: f64,
    pub samples_result: SamplesResult,
    pub samples_tolerance: f64,
    pub samples_tolerance_retries: usize,
    pub z_current_factor: f64,
    pub probe_z_correction: f64,
    /// Bed center derived from the X/Y travel maxima
    pub bed_center: (f64, f64),
    configured_z_min: Option<f64>,
}

impl ProbeConfig {
    /// Validate a raw section against the machine's travel limits
    pub fn from_raw(raw: RawProbeConfig, limits: &MachineLimits) -> Result<Self, ConfigError> {
        let result = Self::validate(raw, limits);
        if let Err(err) = &result {
            log_config_error(err, "load_probe_config");
        }
        result
    }

    fn validate(raw: RawProbeConfig, limits: &MachineLimits) -> Result<Self, ConfigError> {
        let pin = match raw.pin.as_deref().map(str::trim) {
            Some(pin) if !pin.is_empty() => SensorId::new(pin),
            _ => {
                return Err(ConfigError::MissingField {
                    key: "pin".to_string(),
                })
            }
        };

        require_above("speed", raw.speed, 0.0)?;
        let lift_speed = raw.lift_speed.unwrap_or(raw.speed);
        require_above("lift_speed", lift_speed, 0.0)?;
        require_above("travel_speed", raw.travel_speed, 0.0)?;
        require_min("probe_hop", raw.probe_hop, MIN_PROBE_HOP)?;
        require_min("probe_accel", raw.probe_accel, 0.0)?;
        require_min_count("offset_samples", raw.offset_samples, 1)?;
        require_min_count("samples", raw.samples, 1)?;
        require_min(
            "sample_retract_dist",
            raw.sample_retract_dist,
            MIN_SAMPLE_RETRACT_DIST,
        )?;
        require_min("samples_tolerance", raw.samples_tolerance, 0.0)?;

        let (factor_min, factor_max) = Z_CURRENT_FACTOR_RANGE;
        if !(factor_min..=factor_max).contains(&raw.z_current_factor) {
            return Err(ConfigError::out_of_range(
                "z_current_factor",
                raw.z_current_factor,
                format!("between {} and {}", factor_min, factor_max),
            ));
        }

        let samples_result: SamplesResult = raw.samples_result.parse()?;
        let probe_z_min = resolve_floor(raw.probe_z_min, limits.z_min);

        log::info!(
            "[Config] Loaded [{}]: pin={}, samples={} ({}), offset_samples={}, floor={:.3}",
            raw.name,
            pin,
            raw.samples,
            samples_result,
            raw.offset_samples,
            probe_z_min
        );

        Ok(Self {
            name: raw.name,
            pin,
            prepare_gcode: raw.prepare_gcode.filter(|script| !script.trim().is_empty()),
            z_offset: raw.z_offset,
            speed: raw.speed,
            lift_speed,
            travel_speed: raw.travel_speed,
            probe_hop: raw.probe_hop,
            probe_accel: raw.probe_accel,
            probe_z_min,
            offset_samples: raw.offset_samples,
            samples: raw.samples,
            sample_retract_dist: raw.sample_retract_dist,
            samples_result,
            samples_tolerance: raw.samples_tolerance,
            samples_tolerance_retries: raw.samples_tolerance_retries,
            z_current_factor: raw.z_current_factor,
            probe_z_correction: raw.probe_z_correction,
            bed_center: (limits.x_max / 2.0, limits.y_max / 2.0),
            configured_z_min: raw.probe_z_min,
        })
    }

    /// Re-resolve the floor after the motion system's Z bound changed
    pub fn refresh_floor(&mut self, limits: &MachineLimits) {
        self.probe_z_min = resolve_floor(self.configured_z_min, limits.z_min);
    }

    /// Bed-sensor sampling parameters
    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            count: self.samples,
            retract_dist: self.sample_retract_dist,
            tolerance: self.samples_tolerance,
            max_retries: self.samples_tolerance_retries,
            reduction: self.samples_result,
        }
    }
}

fn require_above(key: &str, value: f64, bound: f64) -> Result<(), ConfigError> {
    if value > bound {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(key, value, format!("> {}", bound)))
    }
}

fn require_min(key: &str, value: f64, bound: f64) -> Result<(), ConfigError> {
    if value >= bound {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(key, value, format!(">= {}", bound)))
    }
}

fn require_min_count(key: &str, value: usize, bound: usize) -> Result<(), ConfigError> {
    if value >= bound {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(
            key,
            value as f64,
            format!(">= {}", bound),
        ))
    }
}

/// Complete desktop configuration: probe section plus simulated printer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub probe: RawProbeConfig,
    pub printer: SimPrinterConfig,
}

impl Default for AppConfig {
    /// Default configuration values (fallback if config file not found)
    fn default() -> Self {
        Self {
            probe: RawProbeConfig {
                pin: Some("bed_sensor".to_string()),
                ..RawProbeConfig::default()
            },
            printer: SimPrinterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from JSON file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file is missing or the
    /// JSON is invalid.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match Self::try_load_from_file(&path) {
            Ok(config) => {
                log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                config
            }
            Err(err) => {
                log::warn!(
                    "[Config] Failed to load {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from JSON file, surfacing every failure
    pub fn try_load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
