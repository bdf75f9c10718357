//! Per-frame image pipeline
//!
//! [`FrameProcessor`] owns every piece of per-stream state: the auto-calibration
//! accumulator, temperature tracker, gain write gate, range selector and tone curve.
//! Each call to [`FrameProcessor::process`] runs one device frame through
//! NUC → bad-pixel repair → gain control → tone mapping.

use crate::Result;
use crate::bpr;
use crate::calibration::{AutoCalibrator, AutocalProgress, CalSet, Calibration};
use crate::config::ProcessorConfig;
use crate::frame::{Frame, VideoFrame};
use crate::gain::{self, GainWriteGate};
use crate::nuc::{self, CorrectedImage};
use crate::range::RangeSelector;
use crate::runtime::GainWriter;
use crate::temperature::TemperatureTracker;
use crate::tone::ToneMapper;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Frame counters for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub frames_in: u64,
    pub frames_out: u64,
    /// Frames dropped because their geometry did not match the calibration
    pub frames_skipped: u64,
    /// Frames consumed by auto-calibration
    pub frames_warmup: u64,
    pub gain_writes: u64,
}

pub struct FrameProcessor {
    calibration: Calibration,
    config: ProcessorConfig,
    autocal: Option<AutoCalibrator>,
    /// An auto offset has been committed to the calibration
    autocal_done: bool,
    tracker: TemperatureTracker,
    gain_gate: GainWriteGate,
    range: RangeSelector,
    tone: ToneMapper,
    corrected: CorrectedImage,
    started: Instant,
    stats: ProcessorStats,
}

impl FrameProcessor {
    /// Take ownership of `calibration` and select the configured start set.
    pub fn new(mut calibration: Calibration, config: ProcessorConfig) -> Result<Self> {
        config.validate()?;

        calibration.select_set(config.initial_set);
        let autocal = Self::autocal_for(&calibration, &config);
        let tracker =
            TemperatureTracker::new(calibration.params(), calibration.has_factory_params());

        info!(
            "Processing {}x{} frames with set {}{}",
            calibration.geometry().image_w,
            calibration.geometry().image_h,
            calibration.current_set(),
            if autocal.is_some() {
                " (auto-calibrating)"
            } else {
                ""
            }
        );

        Ok(Self {
            autocal,
            autocal_done: false,
            tracker,
            gain_gate: GainWriteGate::new(),
            range: RangeSelector::new(),
            tone: ToneMapper::new(&config),
            corrected: CorrectedImage::default(),
            started: Instant::now(),
            stats: ProcessorStats::default(),
            calibration,
            config,
        })
    }

    fn autocal_for(cal: &Calibration, config: &ProcessorConfig) -> Option<AutoCalibrator> {
        (cal.current_set() == CalSet::Auto)
            .then(|| AutoCalibrator::with_target(cal.geometry(), config.autocal_frames))
    }

    /// Run one frame through the pipeline.
    ///
    /// Returns `Ok(None)` for frames that produce no output: wrong geometry, or consumed
    /// by auto-calibration.
    pub fn process(
        &mut self,
        frame: &Frame,
        gain_writer: &mut dyn GainWriter,
    ) -> Result<Option<VideoFrame>> {
        let mut out = VideoFrame::new(0, 0);
        Ok(self.process_into(frame, gain_writer, &mut out)?.then_some(out))
    }

    /// Like [`FrameProcessor::process`], writing into `out`. Returns true if `out` holds
    /// a new image.
    pub fn process_into(
        &mut self,
        frame: &Frame,
        gain_writer: &mut dyn GainWriter,
        out: &mut VideoFrame,
    ) -> Result<bool> {
        self.stats.frames_in += 1;

        let g = self.calibration.geometry();
        if !g.matches(&frame.header) || frame.pixels.len() != g.image_len() {
            self.stats.frames_skipped += 1;
            warn!(
                "Skipping frame {}: {}x{} does not match {}x{} calibration",
                frame.header.frame_count(),
                frame.header.data_w,
                frame.header.data_h,
                g.image_w,
                g.image_h
            );
            return Ok(false);
        }

        if let Some(autocal) = self.autocal.as_mut() {
            match autocal.accumulate(frame) {
                AutocalProgress::Accumulated(n) => {
                    trace!("Auto-calibration frame {}", n);
                    self.stats.frames_warmup += 1;
                    return Ok(false);
                }
                AutocalProgress::Complete => {
                    self.stats.frames_warmup += 1;
                    autocal.finish(&mut self.calibration);
                    self.autocal = None;
                    self.autocal_done = true;
                    return Ok(false);
                }
                AutocalProgress::Skipped => return Ok(false),
            }
        }

        let delta_thermistor = self.calibration.active().header.delta_thermistor;
        let drift = self
            .tracker
            .update(&frame.header, self.started.elapsed(), &delta_thermistor);

        nuc::apply_into(&self.calibration, frame, drift, &mut self.corrected)?;
        bpr::repair(
            &mut self.corrected.pixels,
            self.calibration.geometry(),
            self.calibration.live_mask(),
            self.calibration.bpr_seed(),
        );

        if self.config.gain_control {
            let reported = frame.header.vout_c;
            let proposed = gain::next_vgsk(&self.calibration, frame);
            if self.gain_gate.should_write(reported, proposed) {
                debug!("Gain {} -> {}", reported, proposed);
                gain_writer.write_gain(proposed)?;
                self.stats.gain_writes += 1;
            }
        }

        self.tone.map(&self.corrected, out);

        if self.config.auto_range && self.range.update(&mut self.calibration, &self.corrected) {
            self.gain_gate.reset();
        }

        self.stats.frames_out += 1;
        Ok(true)
    }

    /// Select a calibration set by hand. Returns true if the current set changed.
    pub fn select_set(&mut self, set: CalSet) -> bool {
        let changed = self.calibration.select_set(set);
        if changed {
            self.gain_gate.reset();
            if self.calibration.current_set() != CalSet::Auto {
                // A partial average is dropped; returning to Auto starts over
                self.autocal = None;
            } else if self.autocal.is_none() && !self.autocal_done {
                self.autocal = Self::autocal_for(&self.calibration, &self.config);
            }
        }
        changed
    }

    /// Forget per-stream state after the device restarts streaming.
    ///
    /// The tone curve, temperature history and gain gate start over; auto-calibration
    /// results are kept.
    pub fn reset(&mut self) {
        debug!("Resetting stream state");
        self.tone.reset();
        self.tracker.reset();
        self.gain_gate.reset();
        self.started = Instant::now();
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// True while frames are still being averaged for the auto offset
    pub fn is_calibrating(&self) -> bool {
        self.autocal.is_some()
    }

    /// Corrected image of the last processed frame
    pub fn corrected(&self) -> &CorrectedImage {
        &self.corrected
    }

    pub fn tracker(&self) -> &TemperatureTracker {
        &self.tracker
    }

    pub fn range_switches(&self) -> u64 {
        self.range.switches()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }
}
