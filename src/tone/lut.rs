//! Histogram-equalised 16 to 8 bit lookup table with temporal smoothing

use crate::config::LutConfig;

pub const LUT_SIZE: usize = 1 << 16;

/// Blend weights (out of 256) for the previous and new table
const KEEP_WEIGHT: u32 = 230;
const NEW_WEIGHT: u32 = 26;

/// Blend `fresh` into `lut`: `(230·prev + 26·new + 128) >> 8`
pub fn blend(lut: &mut [u8], fresh: &[u8]) {
    for (prev, &new) in lut.iter_mut().zip(fresh) {
        *prev = ((KEEP_WEIGHT * *prev as u32 + NEW_WEIGHT * new as u32 + 128) >> 8) as u8;
    }
}

/// Zero whole bins from both ends while the removed count stays within `budget`.
fn clip_tails(hist: &mut [u32], budget: u64) {
    if budget == 0 {
        return;
    }

    let mut removed = 0u64;
    for bin in hist.iter_mut().filter(|b| **b > 0) {
        if removed + *bin as u64 > budget {
            break;
        }
        removed += *bin as u64;
        *bin = 0;
    }

    let mut removed = 0u64;
    for bin in hist.iter_mut().rev().filter(|b| **b > 0) {
        if removed + *bin as u64 > budget {
            break;
        }
        removed += *bin as u64;
        *bin = 0;
    }
}

/// Build an equalised table from `hist` into `out`.
///
/// Occupied bins are ranked in order and the ranks spread evenly over 0..=255. When that
/// spacing exceeds `max_gain` the spread shrinks to `max_gain` per rank, centred on
/// mid-grey. Unoccupied bins take the value of the nearest occupied bin below them.
pub fn equalize(hist: &mut [u32], config: &LutConfig, out: &mut [u8]) {
    debug_assert_eq!(hist.len(), out.len());

    let total: u64 = hist.iter().map(|&h| h as u64).sum();
    clip_tails(hist, (config.clip_fraction as f64 * total as f64) as u64);

    let occupied = hist.iter().filter(|&&h| h > 0).count();
    let (base, step) = if occupied > 1 {
        let ranks = (occupied - 1) as f32;
        let step = 255.0 / ranks;
        if config.max_gain > 0.0 && step > config.max_gain {
            let span = ranks * config.max_gain;
            ((255.0 - span) / 2.0, config.max_gain)
        } else {
            (0.0, step)
        }
    } else {
        (127.5, 0.0)
    };

    let mut rank: Option<u32> = None;
    for (h, v) in hist.iter().zip(out.iter_mut()) {
        if *h > 0 {
            rank = Some(rank.map_or(0, |r| r + 1));
        }
        let r = rank.unwrap_or(0) as f32;
        *v = (base + r * step + 0.5).clamp(0.0, 255.0) as u8;
    }
}

/// Persistent tone curve
#[derive(Debug)]
pub struct Lut {
    config: LutConfig,
    table: Vec<u8>,
    fresh: Vec<u8>,
    hist: Vec<u32>,
    primed: bool,
}

impl Lut {
    pub fn new(config: LutConfig) -> Self {
        Self {
            config,
            table: vec![0; LUT_SIZE],
            fresh: vec![0; LUT_SIZE],
            hist: vec![0; LUT_SIZE],
            primed: false,
        }
    }

    /// Recompute from `image` and blend into the running table.
    /// The first update after construction or [`Lut::reset`] replaces the table outright.
    pub fn update(&mut self, image: &[u16]) {
        self.hist.fill(0);
        for &px in image {
            self.hist[px as usize] += 1;
        }

        equalize(&mut self.hist, &self.config, &mut self.fresh);
        if self.primed {
            blend(&mut self.table, &self.fresh);
        } else {
            self.table.copy_from_slice(&self.fresh);
            self.primed = true;
        }
    }

    /// Map `image` through the table into `out`
    pub fn map(&self, image: &[u16], out: &mut [u8]) {
        for (dst, &px) in out.iter_mut().zip(image) {
            *dst = self.table[px as usize];
        }
    }

    pub fn table(&self) -> &[u8] {
        &self.table
    }

    pub fn reset(&mut self) {
        self.table.fill(0);
        self.primed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_clip() -> LutConfig {
        LutConfig {
            clip_fraction: 0.0,
            max_gain: 0.0,
        }
    }

    #[test]
    fn test_blend_weights() {
        let mut lut = vec![128u8; 16];
        blend(&mut lut, &[0u8; 16]);
        assert!(lut.iter().all(|&v| v == 115));

        let mut lut = vec![255u8; 4];
        blend(&mut lut, &[255u8; 4]);
        assert!(lut.iter().all(|&v| v == 255));
    }

    #[test]
    fn test_equalize_spreads_ranks() {
        let mut hist = vec![0u32; LUT_SIZE];
        hist[100] = 5;
        hist[200] = 1;
        hist[60000] = 10;
        let mut out = vec![0u8; LUT_SIZE];
        equalize(&mut hist, &no_clip(), &mut out);

        assert_eq!(out[0], 0);
        assert_eq!(out[100], 0);
        assert_eq!(out[150], 0);
        assert_eq!(out[200], 128);
        assert_eq!(out[30000], 128);
        assert_eq!(out[60000], 255);
        assert_eq!(out[65535], 255);
    }

    #[test]
    fn test_equalize_gain_limit_centres() {
        let mut hist = vec![0u32; LUT_SIZE];
        hist[1000] = 1;
        hist[1001] = 1;
        let mut out = vec![0u8; LUT_SIZE];
        equalize(
            &mut hist,
            &LutConfig {
                clip_fraction: 0.0,
                max_gain: 10.0,
            },
            &mut out,
        );
        // span 10 centred: 122.5 and 132.5
        assert_eq!(out[1000], 123);
        assert_eq!(out[1001], 133);
    }

    #[test]
    fn test_equalize_single_level() {
        let mut hist = vec![0u32; LUT_SIZE];
        hist[5] = 100;
        let mut out = vec![0u8; LUT_SIZE];
        equalize(&mut hist, &no_clip(), &mut out);
        assert_eq!(out[5], 128);
    }

    #[test]
    fn test_clip_tails() {
        let mut hist = vec![0u32; 8];
        hist[0] = 1;
        hist[1] = 1;
        hist[3] = 96;
        hist[6] = 1;
        hist[7] = 1;
        clip_tails(&mut hist, 2);
        assert_eq!(hist, vec![0, 0, 0, 96, 0, 0, 0, 0]);

        let mut hist = vec![3u32, 0, 10, 0];
        clip_tails(&mut hist, 2);
        assert_eq!(hist, vec![3, 0, 10, 0]);
    }

    #[test]
    fn test_first_update_replaces_then_blends() {
        let mut lut = Lut::new(no_clip());
        lut.update(&[0, 65535]);
        assert_eq!(lut.table()[65535], 255);

        lut.update(&[0, 1]);
        // fresh table maps 65535 to 255 again (nearest lower occupied is rank 1)
        assert_eq!(lut.table()[65535], 255);
        // level 0 stays black
        assert_eq!(lut.table()[0], 0);

        let mut out = [0u8; 2];
        lut.map(&[0, 65535], &mut out);
        assert_eq!(out, [0, 255]);

        lut.reset();
        assert!(lut.table().iter().all(|&v| v == 0));
    }
}
