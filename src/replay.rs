//! Frame source over a raw capture file
//!
//! A capture is the device's bulk stream written to disk: each frame starts with its
//! 64-byte header and occupies `data_offset + 2·w·h` bytes rounded up to the 512-byte
//! USB transfer size.

use crate::frame::{Frame, FrameHeader, HEADER_SIZE};
use crate::runtime::{FrameSource, WorkError, WorkResult};
use crate::{Result, ThermError};
use memmap2::Mmap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Capture records are padded to this many bytes
pub const RECORD_ALIGN: usize = 512;

/// Record length for a frame with `header`
pub fn record_len(header: &FrameHeader) -> usize {
    header.frame_len().div_ceil(RECORD_ALIGN) * RECORD_ALIGN
}

pub struct ReplaySource {
    path: PathBuf,
    data: Mmap,
    pos: usize,
    looping: bool,
    interval: Option<Duration>,
    last_frame: Option<Instant>,
    spare: Vec<Frame>,
    frames_read: u64,
}

impl ReplaySource {
    /// Map `path` and check that it starts with a frame header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let data = unsafe { Mmap::map(&file)? };

        let header = FrameHeader::decode(&data)?;
        if !header.has_preamble() {
            return Err(ThermError::InvalidFrame(format!(
                "{} does not start with a frame header",
                path.display()
            )));
        }

        info!(
            "Replaying {} ({:.1} MB, ~{} frames of {}x{})",
            path.display(),
            data.len() as f64 / 1_048_576.0,
            data.len() / record_len(&header),
            header.data_w,
            header.data_h
        );

        Ok(Self {
            path,
            data,
            pos: 0,
            looping: false,
            interval: None,
            last_frame: None,
            spare: Vec::new(),
            frames_read: 0,
        })
    }

    /// Start over at the first frame instead of ending the stream.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Pace frames at `interval` instead of reading as fast as possible.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Start of the next complete record, rewinding when looping
    fn next_record(&mut self) -> Option<(usize, usize)> {
        for _ in 0..2 {
            let rest = &self.data[self.pos..];
            if rest.len() >= HEADER_SIZE {
                let start = self.pos;
                match FrameHeader::decode(rest) {
                    Ok(header) if header.has_preamble() => {
                        let len = record_len(&header);
                        if rest.len() >= header.frame_len() {
                            return Some((start, len.min(rest.len())));
                        }
                        warn!(
                            "Truncated frame at offset {} in {}",
                            start,
                            self.path.display()
                        );
                    }
                    _ => warn!(
                        "Lost frame sync at offset {} in {}",
                        start,
                        self.path.display()
                    ),
                }
            }

            if !self.looping || self.frames_read == 0 {
                return None;
            }
            debug!("Rewinding {}", self.path.display());
            self.pos = 0;
        }
        None
    }

    fn pace(&mut self) {
        let Some(interval) = self.interval else {
            return;
        };
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < interval {
                thread::sleep(interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());
    }
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> WorkResult<Frame> {
        let Some((start, len)) = self.next_record() else {
            return Err(WorkError::Shutdown);
        };

        let mut frame = self
            .spare
            .pop()
            .unwrap_or_else(|| Frame::new(FrameHeader::initial_config(), Vec::new()));
        frame
            .decode_from(&self.data[start..start + len])
            .map_err(|e| WorkError::NodeError(e.to_string()))?;

        self.pos = start + len;
        self.frames_read += 1;
        self.pace();
        Ok(frame)
    }

    fn recycle(&mut self, frame: Frame) {
        if self.spare.len() < 4 {
            self.spare.push(frame);
        }
    }

    fn name(&self) -> &str {
        "replay"
    }
}
