//! Repeated sampling at one probe point with spread tolerance and retry.

use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::SamplesResult;
use crate::error::ProbeError;
use crate::telemetry::{ProbeEvent, TelemetryCollector};

/// Sampling protocol for one logical probe point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub count: usize,
    pub retract_dist: f64,
    pub tolerance: f64,
    pub max_retries: usize,
    pub reduction: SamplesResult,
}

/// Ordered Z values taken at one logical probe point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    values: Vec<f64>,
}

impl SampleSet {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// max - min, zero for an empty set
    pub fn spread(&self) -> f64 {
        let mut values = self.values.iter().copied();
        let first = match values.next() {
            Some(first) => first,
            None => return 0.0,
        };
        let (min, max) = values.fold((first, first), |(min, max), z| (min.min(z), max.max(z)));
        max - min
    }

    pub fn reduce(&self, reduction: SamplesResult) -> Result<f64, ProbeError> {
        reduce(&self.values, reduction)
    }
}

/// Reduce values to one scalar
///
/// `average` is the arithmetic mean. `median` is the middle element of the
/// sorted values, or the mean of the two middle elements for an even count.
/// Any NaN or infinite value fails the reduction.
pub fn reduce(values: &[f64], reduction: SamplesResult) -> Result<f64, ProbeError> {
    if values.is_empty() {
        return Err(ProbeError::NoSamples);
    }
    if let Some(bad) = values.iter().find(|z| !z.is_finite()) {
        return Err(ProbeError::hardware(
            "sample_reduction",
            format!("non-finite value {} in {:?}", bad, values),
        ));
    }
    let value = match reduction {
        SamplesResult::Average => values.iter().sum::<f64>() / values.len() as f64,
        SamplesResult::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                (sorted[mid - 1] + sorted[mid]) / 2.0
            } else {
                sorted[mid]
            }
        }
    };
    Ok(value)
}

/// Result of a successful sampling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOutcome {
    pub value: f64,
    /// Samples of the accepted attempt only
    pub samples: SampleSet,
    /// Attempts used, including the accepted one
    pub attempts: usize,
}

pub struct SampleReducer {
    params: SamplingParams,
    telemetry: Arc<TelemetryCollector>,
}

impl SampleReducer {
    pub fn new(params: SamplingParams, telemetry: Arc<TelemetryCollector>) -> Self {
        Self { params, telemetry }
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    /// Collect a full sample set and reduce it
    ///
    /// `retract` runs before every probe except the very first one of the
    /// run. A set whose spread exceeds the tolerance is discarded whole and
    /// re-taken while retries remain.
    pub fn collect<P, R>(
        &self,
        sensor: &str,
        mut probe: P,
        mut retract: R,
    ) -> Result<SampleOutcome, ProbeError>
    where
        P: FnMut() -> Result<f64, ProbeError>,
        R: FnMut(f64) -> Result<(), ProbeError>,
    {
        let count = self.params.count.max(1);
        let mut first_probe = true;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let mut values = Vec::with_capacity(count);
            for index in 0..count {
                if !first_probe {
                    retract(self.params.retract_dist)?;
                }
                first_probe = false;

                let z = probe()?;
                debug!(
                    "[SampleReducer] '{}' sample {}/{} (attempt {}): z={:.6}",
                    sensor,
                    index + 1,
                    count,
                    attempts,
                    z
                );
                self.telemetry.publish(ProbeEvent::SampleTaken {
                    sensor: sensor.to_string(),
                    attempt: attempts,
                    index,
                    z,
                });
                values.push(z);
            }

            let set = SampleSet::new(values);
            let spread = set.spread();
            if spread <= self.params.tolerance {
                let value = set.reduce(self.params.reduction)?;
                return Ok(SampleOutcome {
                    value,
                    samples: set,
                    attempts,
                });
            }

            if attempts > self.params.max_retries {
                return Err(ProbeError::ToleranceExceeded {
                    sensor: sensor.to_string(),
                    spread,
                    tolerance: self.params.tolerance,
                    attempts,
                });
            }

            warn!(
                "[SampleReducer] '{}' spread {:.6} exceeds tolerance {:.6}, retrying ({}/{})",
                sensor, spread, self.params.tolerance, attempts, self.params.max_retries
            );
            self.telemetry.publish(ProbeEvent::ToleranceRetry {
                sensor: sensor.to_string(),
                attempt: attempts,
                spread,
                tolerance: self.params.tolerance,
            });
        }
    }
}
