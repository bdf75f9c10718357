//! Offset estimation for cameras without factory calibration
//!
//! The first frames after start-up are averaged into a per-pixel offset; pixels whose
//! offset sits far from the mean are flagged bad. Assumes the camera views a roughly
//! uniform scene while warming up.

use super::{Calibration, Geometry};
use crate::frame::Frame;
use tracing::{debug, info};

/// Frames averaged before the auto offset is committed
pub const AUTOCAL_FRAMES: u32 = 50;

/// Deviation from the mean offset beyond which a pixel is marked bad
pub const BAD_PIXEL_THRESHOLD: f32 = 250.0;

/// Result of feeding one frame to the estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutocalProgress {
    /// Frame geometry did not match; nothing was accumulated
    Skipped,
    /// Frame accumulated, more needed
    Accumulated(u32),
    /// Target reached; call [`AutoCalibrator::finish`]
    Complete,
}

#[derive(Debug)]
pub struct AutoCalibrator {
    geometry: Geometry,
    sum: Box<[f32]>,
    frames: u32,
    target: u32,
}

impl AutoCalibrator {
    pub fn new(geometry: &Geometry) -> Self {
        Self::with_target(geometry, AUTOCAL_FRAMES)
    }

    pub fn with_target(geometry: &Geometry, target: u32) -> Self {
        Self {
            geometry: *geometry,
            sum: vec![0.0; geometry.nuc_len()].into_boxed_slice(),
            frames: 0,
            target: target.max(1),
        }
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    pub fn is_complete(&self) -> bool {
        self.frames >= self.target
    }

    /// Add one frame's raw samples into the running sum.
    pub fn accumulate(&mut self, frame: &Frame) -> AutocalProgress {
        let g = &self.geometry;
        if !g.matches(&frame.header) || frame.pixels.len() != g.image_len() {
            debug!(
                "Autocal: skipping {}x{} frame, expected {}x{}",
                frame.header.data_w, frame.header.data_h, g.image_w, g.image_h
            );
            return AutocalProgress::Skipped;
        }
        if self.is_complete() {
            return AutocalProgress::Complete;
        }

        for (y, row) in frame.pixels.chunks_exact(g.image_w.max(1)).enumerate() {
            let base = g.nuc_index(0, y);
            for (acc, &px) in self.sum[base..base + g.image_w].iter_mut().zip(row) {
                *acc += px as f32;
            }
        }
        self.frames += 1;

        if self.is_complete() {
            AutocalProgress::Complete
        } else {
            AutocalProgress::Accumulated(self.frames)
        }
    }

    /// Commit the averaged offset and bad-pixel mask into `cal` and re-seed bad-pixel
    /// repair. Returns the number of pixels marked bad.
    pub fn finish(&self, cal: &mut Calibration) -> usize {
        let g = self.geometry;
        let frames = self.frames.max(1) as f32;

        let mut offset = vec![0.0f32; g.nuc_len()].into_boxed_slice();
        let mut total = 0.0f64;
        for y in 0..g.image_h {
            for x in 0..g.image_w {
                let i = g.nuc_index(x, y);
                offset[i] = self.sum[i] / -frames;
                total += offset[i] as f64;
            }
        }
        let mean = if g.image_len() > 0 {
            (total / g.image_len() as f64) as f32
        } else {
            0.0
        };

        let mut live = vec![true; g.nuc_len()].into_boxed_slice();
        let mut bad = 0;
        for y in 0..g.image_h {
            for x in 0..g.image_w {
                let i = g.nuc_index(x, y);
                if (offset[i] - mean).abs() > BAD_PIXEL_THRESHOLD {
                    live[i] = false;
                    bad += 1;
                }
            }
        }

        info!(
            "Auto-calibration done after {} frames: mean offset {:.1}, {} bad pixels",
            self.frames, mean, bad
        );

        cal.auto_offset = offset;
        cal.auto_live = live;
        cal.init_bad_pixel_repair();
        bad
    }
}
