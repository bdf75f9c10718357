//! Gain (VGSK) control
//!
//! Proportional feedback on the centre of mass of a coarse histogram of the raw frame.
//! The device applies a new DAC value with a delay of a couple of frames, so writes are
//! gated on the readback catching up.

use crate::calibration::{Calibration, SetHeader};
use crate::frame::Frame;
use tracing::{debug, warn};

/// Divisor applied to the centre-of-mass error
const LOOP_DIVISOR: f32 = 7.0;

/// Frames to wait for the readback to match a written value before writing again anyway
pub const GAIN_SETTLE_FRAMES: u32 = 10;

/// Bit shift selecting the 8 histogram bits of a raw sample
pub fn histogram_shift(fpa_w: u16) -> u32 {
    if fpa_w == 640 { 8 } else { 4 }
}

/// 256-bin histogram of the top bits of each raw sample
pub fn histogram(frame: &Frame) -> [u32; 256] {
    let shift = histogram_shift(frame.header.fpa_w);
    let mut hist = [0u32; 256];
    for &px in &frame.pixels {
        hist[((px >> shift) & 0xff) as usize] += 1;
    }
    hist
}

/// Zero-based centre of mass of `hist`, `None` if empty
pub fn center_of_mass(hist: &[u32; 256]) -> Option<f32> {
    let (mut mass, mut moment) = (0u64, 0u64);
    for (i, &h) in hist.iter().enumerate() {
        mass += h as u64;
        moment += (i as u64 + 1) * h as u64;
    }
    if mass == 0 {
        return None;
    }
    Some((moment as f64 / mass as f64 - 1.0) as f32)
}

/// Next gain value for the current calibration set.
pub fn next_vgsk(cal: &Calibration, frame: &Frame) -> u16 {
    next_vgsk_with(cal.active().header, frame)
}

/// Next gain value given the set header's target and bounds.
///
/// Returns the reported value unchanged when gain control is off for the set (zero
/// target) or when the step would leave the open interval `(gsk_voltage_min,
/// gsk_voltage_max)`.
pub fn next_vgsk_with(header: &SetHeader, frame: &Frame) -> u16 {
    let current = frame.header.vout_c;
    if header.histogram_peak_target == 0.0 {
        return current;
    }

    let Some(com) = center_of_mass(&histogram(frame)) else {
        return current;
    };

    let delta = (header.histogram_peak_target * 256.0 - com) / LOOP_DIVISOR;
    let candidate = (current as f32 + delta) as i32;

    if candidate > header.gsk_voltage_min as i32 && candidate < header.gsk_voltage_max as i32 {
        candidate as u16
    } else {
        debug!(
            "Gain step to {} outside ({}, {}), holding {}",
            candidate, header.gsk_voltage_min, header.gsk_voltage_max, current
        );
        current
    }
}

/// Tracks the last gain write so a new one is only issued once the device reports it.
#[derive(Debug, Default)]
pub struct GainWriteGate {
    last_written: Option<u16>,
    waited: u32,
}

impl GainWriteGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `proposed` should be written, given the `reported` readback.
    /// Records the write when it returns true.
    pub fn should_write(&mut self, reported: u16, proposed: u16) -> bool {
        if let Some(last) = self.last_written
            && last != reported
        {
            self.waited += 1;
            if self.waited < GAIN_SETTLE_FRAMES {
                return false;
            }
            warn!(
                "Gain readback stuck at {} after writing {}, resuming control",
                reported, last
            );
        }

        self.last_written = None;
        self.waited = 0;
        if proposed == reported {
            return false;
        }

        self.last_written = Some(proposed);
        true
    }

    /// Value written and not yet reflected in the readback
    pub fn pending(&self) -> Option<u16> {
        self.last_written
    }

    pub fn reset(&mut self) {
        self.last_written = None;
        self.waited = 0;
    }
}
