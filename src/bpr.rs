//! Bad-pixel repair
//!
//! Single raster pass over the corrected image. A bad pixel takes the mean of its causal
//! neighbours (west, north-west, north, north-east), which are either good or already
//! repaired by the time they are read.

use crate::calibration::Geometry;

/// Find the image index used to fill the origin when the origin itself is bad.
///
/// Scans outward at distance k along the top row, the left column and the diagonal.
/// Returns 0 if no good pixel is found.
pub fn find_seed(geometry: &Geometry, mask: &[bool]) -> usize {
    let g = geometry;
    if g.image_len() == 0 {
        return 0;
    }
    if mask[g.origin()] {
        return 0;
    }

    for k in 1..g.image_w.max(g.image_h) {
        for (x, y) in [(k, 0), (0, k), (k, k)] {
            if x < g.image_w && y < g.image_h && mask[g.nuc_index(x, y)] {
                return y * g.image_w + x;
            }
        }
    }
    0
}

/// Repair bad pixels of `image` (image coordinates) in place.
///
/// `mask` is in NUC coordinates; `seed` is an image index from [`find_seed`].
pub fn repair(image: &mut [f32], geometry: &Geometry, mask: &[bool], seed: usize) {
    let g = geometry;
    let w = g.image_w;
    debug_assert_eq!(image.len(), g.image_len());

    for y in 0..g.image_h {
        let row_mask = &mask[g.nuc_index(0, y)..g.nuc_index(0, y) + w];
        for x in 0..w {
            if row_mask[x] {
                continue;
            }

            let i = y * w + x;
            image[i] = if y == 0 {
                if x == 0 { image[seed] } else { image[i - 1] }
            } else if x == 0 {
                if w > 1 {
                    (image[i - w] + image[i - w + 1]) / 2.0
                } else {
                    image[i - w]
                }
            } else if x == w - 1 {
                (image[i - 1] + image[i - w - 1] + image[i - w]) / 3.0
            } else {
                (image[i - 1] + image[i - w - 1] + image[i - w] + image[i - w + 1]) / 4.0
            };
        }
    }
}
