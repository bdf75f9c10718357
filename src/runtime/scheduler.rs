//! Producer thread for a frame source
//!
//! [`Stream`] runs a [`FrameSource`] on its own named thread and hands frames to the
//! processing thread through the latest-frame handoff. Shutdown is cooperative: the stop
//! flag is checked between frames, so the frame being read is finished first.

use super::errors::{WorkError, WorkResult};
use super::handoff::{FrameReceiver, handoff};
use super::node::FrameSource;
use super::watchdog::{OperationGuard, Watchdog, WatchdogHandle, WatchdogThread};
use crate::frame::Frame;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters reported when the producer exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub frames_read: u64,
    /// Frames replaced before the consumer took them
    pub frames_superseded: u64,
}

pub struct Stream {
    name: String,
    frames: Option<FrameReceiver>,
    stop_signal: Arc<AtomicBool>,
    producer: Option<JoinHandle<StreamStats>>,
    recv_handle: WatchdogHandle,
    monitor: Option<WatchdogThread>,
}

impl Stream {
    /// Start `source` on a producer thread with the default stall threshold.
    pub fn spawn<S: FrameSource + 'static>(source: S) -> WorkResult<Self> {
        Self::spawn_with_watchdog(source, Watchdog::new())
    }

    pub fn spawn_with_watchdog<S: FrameSource + 'static>(
        mut source: S,
        watchdog: Watchdog,
    ) -> WorkResult<Self> {
        let name = source.name().to_string();
        let stop_signal = Arc::new(AtomicBool::new(false));
        let (mut tx, rx) = handoff();

        let monitor = watchdog.start_monitoring_thread()?;
        info!(
            "Watchdog enabled - will report frame operations blocked >{:.0?}",
            watchdog.threshold()
        );
        let read_handle = watchdog.register(&name, "read_frame");
        let recv_handle = watchdog.register(&name, "wait for frame");

        let stop = Arc::clone(&stop_signal);
        let thread_name = name.clone();
        debug!("Starting producer: {}", name);

        let producer = thread::Builder::new()
            .name(format!("{}-producer", name))
            .spawn(move || {
                let mut stats = StreamStats::default();

                loop {
                    if stop.load(Ordering::Relaxed) {
                        info!("[{}] Stop signal received", thread_name);
                        break;
                    }

                    while let Some(spare) = tx.take_spare() {
                        source.recycle(spare);
                    }

                    let result = {
                        let _guard = OperationGuard::new(&read_handle);
                        source.read_frame()
                    };

                    match result {
                        Ok(frame) => {
                            stats.frames_read += 1;
                            if let Err(e) = tx.publish(frame) {
                                debug!("[{}] Consumer gone: {}", thread_name, e);
                                break;
                            }
                        }
                        Err(WorkError::Shutdown) => {
                            info!("[{}] End of stream", thread_name);
                            break;
                        }
                        Err(e) => {
                            error!("[{}] Read error: {}", thread_name, e);
                            break;
                        }
                    }
                }

                stats.frames_superseded = tx.superseded();
                tx.finish();
                info!(
                    "[{}] Shutdown. Read {} frames, {} superseded.",
                    thread_name, stats.frames_read, stats.frames_superseded
                );
                stats
            })?;

        Ok(Self {
            name,
            frames: Some(rx),
            stop_signal,
            producer: Some(producer),
            recv_handle,
            monitor: Some(monitor),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block for the next frame. `Err(Shutdown)` at end of stream or after [`Stream::join`].
    pub fn recv(&mut self) -> WorkResult<Frame> {
        let frames = self.frames.as_mut().ok_or(WorkError::Shutdown)?;
        let _guard = OperationGuard::new(&self.recv_handle);
        frames.recv()
    }

    /// Wait up to `timeout` for a frame
    pub fn recv_timeout(&mut self, timeout: Duration) -> WorkResult<Option<Frame>> {
        let frames = self.frames.as_mut().ok_or(WorkError::Shutdown)?;
        frames.recv_timeout(timeout)
    }

    /// Give a consumed frame's buffer back to the source
    pub fn recycle(&self, frame: Frame) {
        if let Some(frames) = self.frames.as_ref() {
            frames.recycle(frame);
        }
    }

    /// Ask the producer to stop after the current frame
    pub fn stop(&self) {
        self.stop_signal.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop_signal.load(Ordering::Relaxed)
    }

    /// Stop the producer and wait for it to exit.
    pub fn join(mut self) -> StreamStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> StreamStats {
        self.stop();
        // Dropping the receiver unblocks a producer waiting to hand over its last frame
        self.frames.take();

        let stats = match self.producer.take().map(|h| h.join()) {
            Some(Ok(stats)) => stats,
            Some(Err(e)) => {
                warn!("[{}] Producer panicked: {:?}", self.name, e);
                StreamStats::default()
            }
            None => StreamStats::default(),
        };

        if let Some(mut monitor) = self.monitor.take() {
            monitor.stop();
        }
        stats
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if self.producer.is_some() {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;
    use std::sync::Mutex;

    struct CountingSource {
        count: u16,
        max: u16,
        recycled: Arc<Mutex<usize>>,
        delay: Duration,
    }

    impl CountingSource {
        fn new(max: u16) -> Self {
            Self {
                count: 0,
                max,
                recycled: Arc::new(Mutex::new(0)),
                delay: Duration::ZERO,
            }
        }
    }

    impl FrameSource for CountingSource {
        fn read_frame(&mut self) -> WorkResult<Frame> {
            if self.count >= self.max {
                return Err(WorkError::Shutdown);
            }
            thread::sleep(self.delay);
            self.count += 1;
            let header = FrameHeader {
                frame_count_lo: self.count,
                ..FrameHeader::initial_config()
            };
            Ok(Frame::new(header, vec![0; 4]))
        }

        fn recycle(&mut self, _frame: Frame) {
            *self.recycled.lock().unwrap() += 1;
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[test]
    fn test_stream_delivers_in_order_until_eos() {
        let mut source = CountingSource::new(5);
        source.delay = Duration::from_millis(5);
        let mut stream = Stream::spawn(source).unwrap();

        let mut last = 0;
        let mut received = 0;
        loop {
            match stream.recv() {
                Ok(frame) => {
                    assert!(frame.header.frame_count() > last);
                    last = frame.header.frame_count();
                    received += 1;
                    stream.recycle(frame);
                }
                Err(WorkError::Shutdown) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(last, 5);
        let stats = stream.join();
        assert_eq!(stats.frames_read, 5);
        assert_eq!(stats.frames_superseded + received, 5);
    }

    #[test]
    fn test_stream_stop() {
        let mut source = CountingSource::new(u16::MAX);
        source.delay = Duration::from_millis(2);
        let recycled = Arc::clone(&source.recycled);
        let mut stream = Stream::spawn(source).unwrap();

        let frame = stream.recv().unwrap();
        stream.recycle(frame);
        thread::sleep(Duration::from_millis(20));

        let start = std::time::Instant::now();
        let stats = stream.join();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(stats.frames_read >= 1);
        assert!(*recycled.lock().unwrap() >= 1);
    }

    #[test]
    fn test_recv_after_join_is_shutdown() {
        let mut stream = Stream::spawn(CountingSource::new(0)).unwrap();
        assert!(matches!(stream.recv(), Err(WorkError::Shutdown)));
        stream.stop();
        assert!(stream.is_stopped());
    }
}
