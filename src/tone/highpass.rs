//! High-pass detail enhancement
//!
//! Removes the low-frequency component of the scene so small local contrasts survive
//! histogram equalisation. The low-pass runs on a half-resolution copy; output is
//! re-centred at mid-scale.

use crate::config::HIGHPASS_RATIO_RANGE;

const MID_SCALE: f32 = 32768.0;

/// Filter coefficient for a smoothing ratio
pub fn alpha_for_ratio(ratio: f32) -> f32 {
    (8.0 * ratio / 100.0).clamp(0.0, 1.0)
}

/// One recursive pass `s += alpha * (x - s)` over a strided line, forward then backward
fn smooth_line(data: &mut [f32], start: usize, stride: usize, len: usize, alpha: f32) {
    if len == 0 {
        return;
    }

    let mut s = data[start];
    for k in 1..len {
        let v = &mut data[start + k * stride];
        s += alpha * (*v - s);
        *v = s;
    }
    for k in (0..len - 1).rev() {
        let v = &mut data[start + k * stride];
        s += alpha * (*v - s);
        *v = s;
    }
}

#[derive(Debug)]
pub struct HighPass {
    alpha: f32,
    low: Vec<f32>,
}

impl HighPass {
    pub fn new(ratio: f32) -> Self {
        let (lo, hi) = HIGHPASS_RATIO_RANGE;
        Self {
            alpha: alpha_for_ratio(ratio.clamp(lo, hi)),
            low: Vec::new(),
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Filter a `width × height` image in place.
    pub fn apply(&mut self, image: &mut [u16], width: usize, height: usize) {
        debug_assert_eq!(image.len(), width * height);
        let lw = width.div_ceil(2);
        let lh = height.div_ceil(2);

        // 2x2 block mean; edge blocks average what exists
        self.low.clear();
        self.low.resize(lw * lh, 0.0);
        for ly in 0..lh {
            for lx in 0..lw {
                let (mut sum, mut n) = (0.0f32, 0.0f32);
                for y in 2 * ly..(2 * ly + 2).min(height) {
                    for x in 2 * lx..(2 * lx + 2).min(width) {
                        sum += image[y * width + x] as f32;
                        n += 1.0;
                    }
                }
                self.low[ly * lw + lx] = sum / n;
            }
        }

        for ly in 0..lh {
            smooth_line(&mut self.low, ly * lw, 1, lw, self.alpha);
        }
        for lx in 0..lw {
            smooth_line(&mut self.low, lx, lw, lh, self.alpha);
        }

        for y in 0..height {
            let low_row = &self.low[(y / 2) * lw..(y / 2 + 1) * lw];
            for (x, px) in image[y * width..(y + 1) * width].iter_mut().enumerate() {
                let v = *px as f32 - low_row[x / 2] + MID_SCALE;
                *px = v.clamp(0.0, 65535.0) as u16;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha() {
        assert_eq!(alpha_for_ratio(1.0), 0.08);
        assert_eq!(alpha_for_ratio(5.0), 0.4);
        assert_eq!(alpha_for_ratio(50.0), 1.0);
        assert_eq!(alpha_for_ratio(-1.0), 0.0);
    }

    #[test]
    fn test_flat_field_goes_to_mid_scale() {
        let mut image = vec![12345u16; 7 * 5];
        HighPass::new(1.0).apply(&mut image, 7, 5);
        assert!(image.iter().all(|&v| v == 32768));
    }

    #[test]
    fn test_bright_spot_stays_bright() {
        let (w, h) = (16, 16);
        let mut image = vec![1000u16; w * h];
        image[8 * w + 8] = 5000;
        HighPass::new(2.0).apply(&mut image, w, h);

        assert!(image[8 * w + 8] > 32768 + 2000);
        assert!(image[0] <= 32768);
    }

    #[test]
    fn test_output_clamped() {
        let mut image = vec![0u16, 65535, 0, 65535];
        HighPass::new(5.0).apply(&mut image, 2, 2);
        // Single low-pass cell holds the mean
        assert_eq!(image, vec![0, 65535, 0, 65535]);
    }
}
