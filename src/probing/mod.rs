// Probing primitives: descent floor, scoped current reduction, single probe
// moves and repeated sampling.

pub mod current;
pub mod floor;
pub mod samples;
pub mod single;

pub use current::{CurrentScaler, DriverCurrent, ScaledCurrent};
pub use floor::{resolve_floor, ABSOLUTE_Z_FLOOR};
pub use samples::{reduce, SampleOutcome, SampleReducer, SampleSet, SamplingParams};
pub use single::{ProbeMotion, SingleProbe};
