//! Global calibration parameters (leaf 0 of the NV set)

use crate::bytes::FieldReader;
use crate::{Result, ThermError};

/// Exact size of the parameter leaf
pub const PARAMS_LEN: usize = 0x98;

/// Device type value marking a thermography unit with LO/MED/HI sets
pub const CAL_TYPE_THERMOGRAPHY: u16 = 2;

/// Scene-temperature thresholds for switching between thermography ranges
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RangeThresholds {
    pub med_to_lo: f32,
    pub lo_to_med: f32,
    pub hi_to_med: f32,
    pub med_to_hi: f32,
}

/// Limits governing how long after power-on the transient correction stays active
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransientParams {
    /// Maximum operating time (s) during which the correction may apply
    pub oper_time: f32,
    /// Largest temperature derivative (°C/s) accepted as a real reading
    pub delta_temp_max: f32,
    /// Derivative (°C/s) below which the sensor is considered settled
    pub delta_temp_min: f32,
    /// Interval (s) between derivative estimates
    pub step_time: f32,
}

impl TransientParams {
    /// Whether these parameters describe a usable transient window
    pub fn is_enabled(&self) -> bool {
        self.oper_time > 0.0 && self.step_time > 0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalParams {
    /// On-disk encoding of every other leaf (0, 1 or 2)
    pub ver_format: u16,
    pub ver_data: u16,
    pub cal_type: u16,
    pub model: String,
    pub lens: String,
    pub description: String,
    pub cal_date: String,
    pub cal_temp_min: f32,
    pub cal_temp_max: f32,
    /// Linear FPA diode conversion, constant term first
    pub coeffs_fpa_diode: [f32; 2],
    /// Quintic thermistor conversion, constant term first
    pub coeffs_thermistor: [f32; 6],
    pub alpha_fpa_diode: f32,
    pub alpha_thermistor: f32,
    pub thresholds: RangeThresholds,
    pub transient: TransientParams,
}

impl GlobalParams {
    /// Parse the parameter leaf. Anything but the exact length is rejected.
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() != PARAMS_LEN {
            return Err(ThermError::Calibration(format!(
                "parameter leaf is {} bytes, expected {}",
                src.len(),
                PARAMS_LEN
            )));
        }

        let mut r = FieldReader::new(src);
        let ver_format = r.u16();
        let ver_data = r.u16();
        let cal_type = r.u16();
        let model = r.string(20);
        let lens = r.string(10);
        let description = r.string(30);
        let cal_date = r.string(6);
        let cal_temp_min = r.f32();
        let cal_temp_max = r.f32();
        let coeffs_fpa_diode = r.f32_array::<2>();
        let coeffs_thermistor = r.f32_array::<6>();
        let alpha_fpa_diode = r.f32();
        let alpha_thermistor = r.f32();
        let thresholds = RangeThresholds {
            med_to_lo: r.f32(),
            lo_to_med: r.f32(),
            hi_to_med: r.f32(),
            med_to_hi: r.f32(),
        };
        let transient = TransientParams {
            oper_time: r.f32(),
            delta_temp_max: r.f32(),
            delta_temp_min: r.f32(),
            step_time: r.f32(),
        };
        debug_assert_eq!(r.position(), PARAMS_LEN);

        Ok(Self {
            ver_format,
            ver_data,
            cal_type,
            model,
            lens,
            description,
            cal_date,
            cal_temp_min,
            cal_temp_max,
            coeffs_fpa_diode,
            coeffs_thermistor,
            alpha_fpa_diode,
            alpha_thermistor,
            thresholds,
            transient,
        })
    }

    /// Built-in parameters for an uncalibrated unit.
    ///
    /// The thermistor scale is an experimental fit, `(raw - 14336) * 0.00652` °C; the FPA
    /// diode is left in raw units. No smoothing, no transient window.
    pub fn experimental() -> Self {
        const THERMISTOR_SCALE: f32 = 0.00652;
        const THERMISTOR_ZERO: f32 = 14336.0;

        Self {
            ver_format: 0,
            ver_data: 0,
            cal_type: 0,
            model: String::new(),
            lens: String::new(),
            description: String::new(),
            cal_date: String::new(),
            cal_temp_min: 0.0,
            cal_temp_max: 0.0,
            coeffs_fpa_diode: [0.0, 1.0],
            coeffs_thermistor: [-THERMISTOR_ZERO * THERMISTOR_SCALE, THERMISTOR_SCALE, 0.0, 0.0, 0.0, 0.0],
            alpha_fpa_diode: 1.0,
            alpha_thermistor: 1.0,
            thresholds: RangeThresholds::default(),
            transient: TransientParams::default(),
        }
    }

    pub fn is_thermography(&self) -> bool {
        self.cal_type == CAL_TYPE_THERMOGRAPHY
    }

    /// Thermistor temperature in °C (Horner evaluation, highest order first).
    pub fn thermistor_celsius(&self, raw: i16) -> f32 {
        let x = raw as f32;
        self.coeffs_thermistor
            .iter()
            .rev()
            .fold(0.0, |acc, &c| acc * x + c)
    }

    /// FPA diode temperature from its linear fit
    pub fn fpa_diode_celsius(&self, raw: u16) -> f32 {
        self.coeffs_fpa_diode[0] + self.coeffs_fpa_diode[1] * raw as f32
    }
}

/// NUC table dimensions for a format version
pub fn nuc_table_size(ver_format: u16) -> Option<(usize, usize)> {
    match ver_format {
        0 | 1 => Some((384, 288)),
        2 => Some((640, 480)),
        _ => None,
    }
}
