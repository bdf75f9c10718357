//! Runtime support for streaming frames from a device

pub mod errors;
pub mod handoff;
pub mod node;
pub mod scheduler;
pub mod watchdog;

pub use errors::{WorkError, WorkResult};
pub use handoff::{ChannelMessage, FrameReceiver, FrameSender, handoff};
pub use node::{FrameSource, GainWriter, NoGainControl, VideoSink};
pub use scheduler::{Stream, StreamStats};
pub use watchdog::{OperationGuard, STALL_THRESHOLD, Watchdog, WatchdogHandle};
