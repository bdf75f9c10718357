//! Automatic thermography range switching
//!
//! Moves between the LO, MED and HI sets based on the scene temperature range of the last
//! corrected frame. Transitions always pass through MED and use separate thresholds in
//! each direction for hysteresis.

use crate::calibration::{CalSet, Calibration, RangeThresholds};
use crate::nuc::CorrectedImage;
use tracing::info;

/// Set the thresholds ask for, or `None` to stay in `current`
pub fn next_range(current: CalSet, thresholds: &RangeThresholds, min: f32, max: f32) -> Option<CalSet> {
    match current {
        CalSet::Med if max < thresholds.med_to_lo => Some(CalSet::Lo),
        CalSet::Med if max > thresholds.med_to_hi => Some(CalSet::Hi),
        CalSet::Lo if max > thresholds.lo_to_med => Some(CalSet::Med),
        CalSet::Hi if min < thresholds.hi_to_med => Some(CalSet::Med),
        _ => None,
    }
}

#[derive(Debug, Default)]
pub struct RangeSelector {
    switches: u64,
}

impl RangeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the range rules to `image` and switch the calibration set if needed.
    ///
    /// Returns true if the current set changed.
    pub fn update(&mut self, cal: &mut Calibration, image: &CorrectedImage) -> bool {
        let current = cal.current_set();
        if !current.is_thermography() {
            return false;
        }

        let Some(next) = next_range(current, &cal.params().thresholds, image.min, image.max) else {
            return false;
        };

        if !cal.select_set(next) {
            return false;
        }

        self.switches += 1;
        info!(
            "Range {} -> {} (scene {:.1}..{:.1})",
            current,
            cal.current_set(),
            image.min,
            image.max
        );
        true
    }

    /// Number of range changes so far
    pub fn switches(&self) -> u64 {
        self.switches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLDS: RangeThresholds = RangeThresholds {
        med_to_lo: 10.0,
        lo_to_med: 15.0,
        hi_to_med: 90.0,
        med_to_hi: 100.0,
    };

    #[test]
    fn test_med_transitions() {
        assert_eq!(next_range(CalSet::Med, &THRESHOLDS, 0.0, 9.0), Some(CalSet::Lo));
        assert_eq!(next_range(CalSet::Med, &THRESHOLDS, 0.0, 101.0), Some(CalSet::Hi));
        assert_eq!(next_range(CalSet::Med, &THRESHOLDS, 0.0, 50.0), None);
    }

    #[test]
    fn test_hysteresis() {
        // Between med_to_lo and lo_to_med LO stays LO and MED stays MED
        assert_eq!(next_range(CalSet::Lo, &THRESHOLDS, 0.0, 12.0), None);
        assert_eq!(next_range(CalSet::Med, &THRESHOLDS, 0.0, 12.0), None);
        assert_eq!(next_range(CalSet::Lo, &THRESHOLDS, 0.0, 16.0), Some(CalSet::Med));

        assert_eq!(next_range(CalSet::Hi, &THRESHOLDS, 95.0, 200.0), None);
        assert_eq!(next_range(CalSet::Hi, &THRESHOLDS, 80.0, 200.0), Some(CalSet::Med));
    }

    #[test]
    fn test_non_thermography_sets_never_switch() {
        assert_eq!(next_range(CalSet::Nv, &THRESHOLDS, 0.0, 1000.0), None);
        assert_eq!(next_range(CalSet::Auto, &THRESHOLDS, 0.0, 0.0), None);
    }
}
