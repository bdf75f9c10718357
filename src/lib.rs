//! ThermApp thermal camera calibration and image pipeline
//!
//! This library turns raw ThermApp detector frames into displayable 8-bit video. It loads the
//! vendor's per-camera calibration directory, evaluates the per-pixel non-uniformity correction
//! polynomial on every frame, repairs bad pixels, closes the analog gain loop and tone-maps the
//! radiometric result.
//!
//! # Architecture
//!
//! - **Calibration**: versioned binary leaf files parsed into typed per-pixel tables, with a
//!   built-in fallback so a camera without calibration data still streams
//! - **FrameProcessor**: per-frame chain (auto-calibration warm-up, NUC, bad-pixel repair, gain
//!   control, quantize, high-pass, histogram-equalized LUT)
//! - **Runtime**: producer thread with a latest-frame handoff, cooperative shutdown and a stall
//!   watchdog; transport and video output plug in through small collaborator traits
//! - **ReplaySource**: drives the pipeline from a raw capture file instead of hardware
//!
//! # Example
//!
//! ```no_run
//! use thermapp::{Calibration, FrameProcessor, ProcessorConfig, ReplaySource, Stream};
//! use thermapp::runtime::FrameSource;
//!
//! let mut source = ReplaySource::open("capture.raw")?;
//! let first = source.read_frame()?;
//! let calibration = Calibration::open(Some(std::path::Path::new("calibration")), &first.header);
//! let mut processor = FrameProcessor::new(calibration, ProcessorConfig::default())?;
//! let stream = Stream::spawn(source)?;
//! // ... pull frames from `stream`, feed `processor`, write results to a sink
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod bpr;
pub mod bytes;
pub mod calibration;
pub mod config;
pub mod frame;
pub mod gain;
pub mod nuc;
pub mod processor;
pub mod range;
pub mod replay;
pub mod runtime;
pub mod temperature;
pub mod tone;

pub use calibration::{CalSet, Calibration, Geometry};
pub use config::{LutConfig, ProcessorConfig};
pub use frame::{Frame, FrameHeader, PixelFormat, VideoFrame};
pub use nuc::{CorrectedImage, Drift};
pub use processor::{FrameProcessor, ProcessorStats};
pub use replay::ReplaySource;

pub use runtime::{FrameSource, GainWriter, Stream, VideoSink, WorkError, WorkResult};

#[derive(Error, Debug)]
pub enum ThermError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Calibration error: {0}")]
    Calibration(String),

    #[error("Pipeline error: {0}")]
    Work(#[from] WorkError),
}

pub type Result<T> = std::result::Result<T, ThermError>;
