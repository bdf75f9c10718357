//! Collaborator traits
//!
//! The image pipeline does not talk to USB or to a display itself. A transport provides
//! frames and accepts gain writes; a sink consumes the tone-mapped output.

use super::errors::WorkResult;
use crate::frame::{Frame, VideoFrame};

/// Produces device frames, blocking until one is available.
pub trait FrameSource: Send {
    /// Next complete frame. `Err(WorkError::Shutdown)` signals end of stream.
    fn read_frame(&mut self) -> WorkResult<Frame>;

    /// Hand back a consumed frame so its buffer can be reused.
    /// The default drops it.
    fn recycle(&mut self, frame: Frame) {
        drop(frame);
    }

    /// Debug name used for the producer thread and log messages
    fn name(&self) -> &str {
        "frame_source"
    }
}

/// Writes a new gain DAC value to the device (fire and forget).
pub trait GainWriter {
    fn write_gain(&mut self, value: u16) -> WorkResult<()>;
}

/// Consumes tone-mapped frames.
pub trait VideoSink {
    fn write_frame(&mut self, frame: &VideoFrame) -> WorkResult<()>;
}

/// Gain writer for sources that cannot be controlled, such as a replayed capture
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGainControl;

impl GainWriter for NoGainControl {
    fn write_gain(&mut self, _value: u16) -> WorkResult<()> {
        Ok(())
    }
}

impl<T: GainWriter + ?Sized> GainWriter for &mut T {
    fn write_gain(&mut self, value: u16) -> WorkResult<()> {
        (**self).write_gain(value)
    }
}

impl<T: VideoSink + ?Sized> VideoSink for &mut T {
    fn write_frame(&mut self, frame: &VideoFrame) -> WorkResult<()> {
        (**self).write_frame(frame)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read_frame(&mut self) -> WorkResult<Frame> {
        (**self).read_frame()
    }

    fn recycle(&mut self, frame: Frame) {
        (**self).recycle(frame)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
