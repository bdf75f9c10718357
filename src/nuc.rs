//! Non-uniformity correction
//!
//! Evaluates the per-pixel correction polynomial of the current calibration set over a raw
//! frame. `T` is the raw FPA diode reading and `V` the raw gain DAC readback, both taken
//! from the frame header. Term order is fixed so results are reproducible bit for bit.

use crate::calibration::{ActiveTables, CalSet, Calibration, Geometry};
use crate::frame::Frame;
use crate::{Result, ThermError};

/// Transient drift input for the thermography polynomial
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drift {
    pub enabled: bool,
    /// Temperature delta fed to the transient tables
    pub temp_delta: f32,
}

impl Drift {
    pub const NONE: Drift = Drift {
        enabled: false,
        temp_delta: 0.0,
    };
}

impl Default for Drift {
    fn default() -> Self {
        Self::NONE
    }
}

/// Radiometric image in image coordinates, with the value range over good pixels
#[derive(Debug, Clone, Default)]
pub struct CorrectedImage {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<f32>,
    pub min: f32,
    pub max: f32,
}

impl CorrectedImage {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0.0; width * height],
            min: 0.0,
            max: 0.0,
        }
    }
}

/// Correct `frame` with the current set of `cal`.
pub fn apply(cal: &Calibration, frame: &Frame, drift: Drift) -> Result<CorrectedImage> {
    let mut out = CorrectedImage::default();
    apply_into(cal, frame, drift, &mut out)?;
    Ok(out)
}

/// Like [`apply`], reusing the allocation in `out`.
pub fn apply_into(
    cal: &Calibration,
    frame: &Frame,
    drift: Drift,
    out: &mut CorrectedImage,
) -> Result<()> {
    let g = cal.geometry();
    if !g.matches(&frame.header) || frame.pixels.len() != g.image_len() {
        return Err(ThermError::InvalidFrame(format!(
            "{}x{} frame does not match {}x{} calibration",
            frame.header.data_w, frame.header.data_h, g.image_w, g.image_h
        )));
    }

    evaluate(&cal.active(), g, cal.live_mask(), frame, drift, out);
    Ok(())
}

/// Evaluate `tables` over `frame` into `out`.
///
/// Tables and `mask` are indexed in NUC coordinates; callers have checked the frame
/// matches `geometry`.
pub fn evaluate(
    tables: &ActiveTables,
    geometry: &Geometry,
    mask: &[bool],
    frame: &Frame,
    drift: Drift,
    out: &mut CorrectedImage,
) {
    let g = geometry;
    out.width = g.image_w;
    out.height = g.image_h;
    out.pixels.resize(g.image_len(), 0.0);

    let temp = frame.header.temp_fpa_diode as f32;
    let vgsk = frame.header.vout_c as f32;
    let transient = drift.enabled && tables.has_transient;

    let mut min = f32::MAX;
    let mut max = f32::MIN;

    for y in 0..g.image_h {
        let base = g.nuc_index(0, y);
        let src = &frame.pixels[y * g.image_w..(y + 1) * g.image_w];
        let dst = &mut out.pixels[y * g.image_w..(y + 1) * g.image_w];

        for (x, (&raw, corrected)) in src.iter().zip(dst.iter_mut()).enumerate() {
            let i = base + x;
            let p = raw as f32;
            let s = match tables.set {
                CalSet::Nv => eval_nv(tables, i, p, temp, vgsk),
                CalSet::Lo | CalSet::Med | CalSet::Hi => {
                    eval_thermography(tables, i, p, temp, transient, drift.temp_delta)
                }
                CalSet::Auto => p + tables.offset[i],
            };
            *corrected = s;

            if mask[i] {
                min = min.min(s);
                max = max.max(s);
            }
        }
    }

    if min > max {
        // No good pixels
        min = 0.0;
        max = 0.0;
    }
    out.min = min;
    out.max = max;
}

#[inline]
fn eval_nv(t: &ActiveTables, i: usize, p: f32, temp: f32, vgsk: f32) -> f32 {
    let t2 = t.tfpa2[i] * temp + t.tfpa[i];
    let v2 = t.vgsk2[i] * vgsk + t.vgsk[i];
    let mut p2 = t.px2[i] * p + t.px[i];
    p2 += t.tfpa_px[i] * temp;
    p2 += t.vgsk_px[i] * vgsk;
    let mut s = p2 * p + t.offset[i];
    s += t2 * temp;
    s += v2 * vgsk;
    s
}

#[inline]
fn eval_thermography(
    t: &ActiveTables,
    i: usize,
    p: f32,
    temp: f32,
    transient: bool,
    temp_delta: f32,
) -> f32 {
    let tp = temp * p;
    let t2 = t.tfpa2[i] * temp + t.tfpa[i];
    let tp2 = t.tfpa2_px2[i] * tp + t.tfpa_px[i];

    let mut s = t.px4[i] * p + t.px3[i];
    s = s * p + t.px2[i];
    s = s * p + t.px[i];
    s = s * p + t.offset[i];
    s += t2 * temp;
    s += tp2 * tp;
    if transient {
        s += t.transient_delta[i] * temp_delta + t.transient_offset[i];
    }

    let d = &t.header.dist_param;
    if s < d[4] { s * d[0] + d[1] } else { s * d[2] + d[3] }
}
