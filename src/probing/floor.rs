//! Lowest Z the toolhead may reach during a bed-sensor descent.

/// Absolute floor for bed-sensor descents (mm)
pub const ABSOLUTE_Z_FLOOR: f64 = -10.0;

/// Resolve the effective descent floor
///
/// Uses the configured `probe_z_min` when present, otherwise the motion
/// system's Z minimum, and silently raises anything below
/// [`ABSOLUTE_Z_FLOOR`]. NaN inputs resolve to the absolute floor.
pub fn resolve_floor(configured: Option<f64>, axis_min: f64) -> f64 {
    let candidate = configured.unwrap_or(axis_min);
    if candidate.is_nan() {
        return ABSOLUTE_Z_FLOOR;
    }
    candidate.max(ABSOLUTE_Z_FLOOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_value_wins_over_axis_minimum() {
        assert_eq!(resolve_floor(Some(-3.0), -1.0), -3.0);
        assert_eq!(resolve_floor(Some(0.5), -5.0), 0.5);
    }

    #[test]
    fn falls_back_to_axis_minimum() {
        assert_eq!(resolve_floor(None, -2.0), -2.0);
    }

    #[test]
    fn never_below_absolute_floor() {
        for value in [-10.0, -10.001, -25.0, -1.0e9, f64::NEG_INFINITY] {
            assert_eq!(resolve_floor(Some(value), 0.0), ABSOLUTE_Z_FLOOR);
            assert_eq!(resolve_floor(None, value), ABSOLUTE_Z_FLOOR);
        }
        let mut z = -20.0;
        while z < 5.0 {
            assert!(resolve_floor(Some(z), z) >= ABSOLUTE_Z_FLOOR);
            z += 0.25;
        }
    }

    #[test]
    fn nan_resolves_to_absolute_floor() {
        assert_eq!(resolve_floor(Some(f64::NAN), 0.0), ABSOLUTE_Z_FLOOR);
    }
}
