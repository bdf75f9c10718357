//! Sensor temperature tracking
//!
//! Converts the raw thermistor and FPA diode readings to °C, smooths them and decides
//! whether the detector is still settling after power-on. While it is, thermography sets
//! carrying transient tables get an extra correction term driven by the thermistor drift.

use crate::calibration::GlobalParams;
use crate::frame::FrameHeader;
use crate::nuc::Drift;
use std::time::Duration;
use tracing::debug;

/// Exponential smoothing, seeded by the first sample
fn smooth(state: &mut Option<f32>, sample: f32, alpha: f32) -> f32 {
    let alpha = if alpha > 0.0 { alpha.min(1.0) } else { 1.0 };
    let s = state.get_or_insert(sample);
    *s += alpha * (sample - *s);
    *s
}

#[derive(Debug)]
pub struct TemperatureTracker {
    params: GlobalParams,
    enabled: bool,
    thermistor: Option<f32>,
    fpa: Option<f32>,
    initial_thermistor: Option<f32>,
    last_step: Option<(f32, f32)>,
    derivative: f32,
    transient: bool,
}

impl TemperatureTracker {
    /// `factory` says whether `params` came from a calibration directory; the built-in
    /// parameters never enable transient correction.
    pub fn new(params: &GlobalParams, factory: bool) -> Self {
        let enabled = factory && params.transient.is_enabled();
        if enabled {
            debug!(
                "Transient correction for {:.0} s, step {:.1} s, derivative {}..{} °C/s",
                params.transient.oper_time,
                params.transient.step_time,
                params.transient.delta_temp_min,
                params.transient.delta_temp_max
            );
        }

        Self {
            params: params.clone(),
            enabled,
            thermistor: None,
            fpa: None,
            initial_thermistor: None,
            last_step: None,
            derivative: 0.0,
            transient: false,
        }
    }

    /// Feed one frame header. `elapsed` is the time since the stream started and
    /// `delta_thermistor` the current set's drift polynomial.
    pub fn update(
        &mut self,
        header: &FrameHeader,
        elapsed: Duration,
        delta_thermistor: &[f32; 3],
    ) -> Drift {
        let p = &self.params;
        let thermistor = smooth(
            &mut self.thermistor,
            p.thermistor_celsius(header.temp_thermistor),
            p.alpha_thermistor,
        );
        smooth(
            &mut self.fpa,
            p.fpa_diode_celsius(header.temp_fpa_diode),
            p.alpha_fpa_diode,
        );
        let initial = *self.initial_thermistor.get_or_insert(thermistor);

        if !self.enabled {
            return Drift::NONE;
        }

        let t = &p.transient;
        let now = elapsed.as_secs_f32();
        match self.last_step {
            None => self.last_step = Some((now, thermistor)),
            Some((then, previous)) if now - then >= t.step_time => {
                let mut derivative = (thermistor - previous) / (now - then);
                if t.delta_temp_max > 0.0 {
                    derivative = derivative.clamp(-t.delta_temp_max, t.delta_temp_max);
                }
                self.derivative = derivative;
                self.last_step = Some((now, thermistor));

                let transient = derivative.abs() >= t.delta_temp_min;
                if transient != self.transient {
                    debug!(
                        "Transient correction {} at {:.1} s ({:.4} °C/s)",
                        if transient { "on" } else { "off" },
                        now,
                        derivative
                    );
                }
                self.transient = transient;
            }
            Some(_) => {}
        }

        if now >= t.oper_time {
            self.transient = false;
        }

        let delta = thermistor - initial;
        let [d0, d1, d2] = *delta_thermistor;
        Drift {
            enabled: self.transient,
            temp_delta: d0 + d1 * delta + d2 * delta * delta,
        }
    }

    /// Smoothed thermistor temperature, `None` before the first frame
    pub fn thermistor_celsius(&self) -> Option<f32> {
        self.thermistor
    }

    /// Smoothed FPA diode temperature
    pub fn fpa_celsius(&self) -> Option<f32> {
        self.fpa
    }

    /// Last thermistor derivative estimate (°C/s)
    pub fn derivative(&self) -> f32 {
        self.derivative
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn reset(&mut self) {
        self.thermistor = None;
        self.fpa = None;
        self.initial_thermistor = None;
        self.last_step = None;
        self.derivative = 0.0;
        self.transient = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::TransientParams;

    fn params() -> GlobalParams {
        GlobalParams {
            coeffs_thermistor: [0.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            alpha_thermistor: 1.0,
            alpha_fpa_diode: 0.5,
            transient: TransientParams {
                oper_time: 100.0,
                delta_temp_max: 2.0,
                delta_temp_min: 0.1,
                step_time: 5.0,
            },
            ..GlobalParams::experimental()
        }
    }

    fn header(thermistor: i16, fpa: u16) -> FrameHeader {
        FrameHeader {
            temp_thermistor: thermistor,
            temp_fpa_diode: fpa,
            ..FrameHeader::initial_config()
        }
    }

    const DELTA: [f32; 3] = [1.0, 2.0, 0.5];

    #[test]
    fn test_smoothing_seeded_by_first_sample() {
        let mut tracker = TemperatureTracker::new(&params(), true);
        tracker.update(&header(0, 100), Duration::ZERO, &DELTA);
        assert_eq!(tracker.fpa_celsius(), Some(100.0));
        tracker.update(&header(0, 200), Duration::ZERO, &DELTA);
        assert_eq!(tracker.fpa_celsius(), Some(150.0));
    }

    #[test]
    fn test_transient_follows_derivative() {
        let mut tracker = TemperatureTracker::new(&params(), true);

        let drift = tracker.update(&header(20, 0), Duration::ZERO, &DELTA);
        assert!(!drift.enabled);
        assert_eq!(drift.temp_delta, 1.0);

        // Not a full step yet
        assert!(!tracker.update(&header(22, 0), Duration::from_secs(2), &DELTA).enabled);

        // 5 °C over 5 s
        let drift = tracker.update(&header(25, 0), Duration::from_secs(5), &DELTA);
        assert!(drift.enabled);
        assert_eq!(tracker.derivative(), 1.0);
        assert_eq!(drift.temp_delta, 1.0 + 2.0 * 5.0 + 0.5 * 25.0);

        // Settled
        let drift = tracker.update(&header(25, 0), Duration::from_secs(10), &DELTA);
        assert!(!drift.enabled);
    }

    #[test]
    fn test_derivative_clamped() {
        let mut tracker = TemperatureTracker::new(&params(), true);
        tracker.update(&header(0, 0), Duration::ZERO, &DELTA);
        tracker.update(&header(100, 0), Duration::from_secs(5), &DELTA);
        assert_eq!(tracker.derivative(), 2.0);
    }

    #[test]
    fn test_transient_window_closes() {
        let mut tracker = TemperatureTracker::new(&params(), true);
        tracker.update(&header(0, 0), Duration::from_secs(95), &DELTA);
        assert!(!tracker.update(&header(5, 0), Duration::from_secs(100), &DELTA).enabled);
    }

    #[test]
    fn test_disabled_without_factory_params() {
        let mut tracker = TemperatureTracker::new(&params(), false);
        tracker.update(&header(0, 0), Duration::ZERO, &DELTA);
        let drift = tracker.update(&header(50, 0), Duration::from_secs(5), &DELTA);
        assert_eq!(drift, Drift::NONE);
        assert_eq!(tracker.thermistor_celsius(), Some(50.0));
    }
}
