//! Frame processor configuration

use crate::calibration::{AUTOCAL_FRAMES, CalSet};
use crate::{Result, ThermError};

/// Valid range for the high-pass smoothing ratio
pub const HIGHPASS_RATIO_RANGE: (f32, f32) = (0.25, 5.0);

/// Histogram-equalisation settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LutConfig {
    /// Fraction of pixels dropped from each end of the histogram (0 to <0.5)
    pub clip_fraction: f32,
    /// Largest output step per occupied input level; 0 disables the limit
    pub max_gain: f32,
}

impl Default for LutConfig {
    fn default() -> Self {
        Self {
            clip_fraction: 0.001,
            max_gain: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Set selected after opening the calibration
    pub initial_set: CalSet,
    /// High-pass smoothing ratio, `None` to disable the filter
    pub highpass: Option<f32>,
    pub lut: LutConfig,
    /// Switch between LO/MED/HI on scene range
    pub auto_range: bool,
    /// Drive the gain DAC from the histogram
    pub gain_control: bool,
    /// Frames averaged by auto-calibration
    pub autocal_frames: u32,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            initial_set: CalSet::Nv,
            highpass: None,
            lut: LutConfig::default(),
            auto_range: false,
            gain_control: true,
            autocal_frames: AUTOCAL_FRAMES,
        }
    }
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_set(mut self, set: CalSet) -> Self {
        self.initial_set = set;
        self
    }

    pub fn with_highpass(mut self, ratio: Option<f32>) -> Self {
        self.highpass = ratio;
        self
    }

    pub fn with_lut(mut self, lut: LutConfig) -> Self {
        self.lut = lut;
        self
    }

    pub fn with_auto_range(mut self, enabled: bool) -> Self {
        self.auto_range = enabled;
        self
    }

    pub fn with_gain_control(mut self, enabled: bool) -> Self {
        self.gain_control = enabled;
        self
    }

    pub fn with_autocal_frames(mut self, frames: u32) -> Self {
        self.autocal_frames = frames;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ratio) = self.highpass {
            let (lo, hi) = HIGHPASS_RATIO_RANGE;
            if !(lo..=hi).contains(&ratio) {
                return Err(ThermError::InvalidConfig(format!(
                    "high-pass ratio {} outside [{}, {}]",
                    ratio, lo, hi
                )));
            }
        }

        if !(0.0..0.5).contains(&self.lut.clip_fraction) {
            return Err(ThermError::InvalidConfig(format!(
                "clip fraction {} outside [0, 0.5)",
                self.lut.clip_fraction
            )));
        }

        if self.lut.max_gain.is_nan() || self.lut.max_gain < 0.0 {
            return Err(ThermError::InvalidConfig(format!(
                "max gain {} must be non-negative",
                self.lut.max_gain
            )));
        }

        if self.autocal_frames == 0 {
            return Err(ThermError::InvalidConfig(
                "auto-calibration needs at least one frame".into(),
            ));
        }

        if self.auto_range && !self.initial_set.is_thermography() {
            return Err(ThermError::InvalidConfig(format!(
                "auto range needs a thermography initial set, got {}",
                self.initial_set
            )));
        }

        Ok(())
    }
}
