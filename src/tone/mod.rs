//! Tone mapping: radiometric float image to 8-bit grey
//!
//! quantize → optional high-pass → histogram-equalised LUT

mod highpass;
mod lut;

pub use highpass::{HighPass, alpha_for_ratio};
pub use lut::{LUT_SIZE, Lut, blend, equalize};

use crate::config::ProcessorConfig;
use crate::frame::VideoFrame;
use crate::nuc::CorrectedImage;

/// Bias added before quantising so typical corrected values land mid-range
pub const QUANTIZE_BIAS: f32 = 5000.0;

/// `clamp(v + 5000, 0, 65535)` per pixel
pub fn quantize(image: &[f32], out: &mut Vec<u16>) {
    out.clear();
    out.extend(
        image
            .iter()
            .map(|&v| (v + QUANTIZE_BIAS).clamp(0.0, 65535.0) as u16),
    );
}

#[derive(Debug)]
pub struct ToneMapper {
    highpass: Option<HighPass>,
    lut: Lut,
    quantized: Vec<u16>,
}

impl ToneMapper {
    pub fn new(config: &ProcessorConfig) -> Self {
        Self {
            highpass: config.highpass.map(HighPass::new),
            lut: Lut::new(config.lut),
            quantized: Vec::new(),
        }
    }

    /// Map `image` into `out`, resizing it to the image dimensions.
    pub fn map(&mut self, image: &CorrectedImage, out: &mut VideoFrame) {
        quantize(&image.pixels, &mut self.quantized);
        if let Some(hp) = self.highpass.as_mut() {
            hp.apply(&mut self.quantized, image.width, image.height);
        }

        self.lut.update(&self.quantized);

        out.width = image.width;
        out.height = image.height;
        out.data.resize(image.width * image.height, 0);
        self.lut.map(&self.quantized, &mut out.data);
    }

    pub fn lut(&self) -> &Lut {
        &self.lut
    }

    /// Forget the tone curve (stream restart)
    pub fn reset(&mut self) {
        self.lut.reset();
    }
}
