//! Latest-frame handoff between the producer thread and the processing thread
//!
//! At most one frame waits for the consumer. Publishing while a frame is still waiting
//! replaces it, and the superseded buffer goes back to the producer. The consumer returns
//! buffers it is done with through a separate recycle channel.

use super::errors::{WorkError, WorkResult};
use crate::frame::Frame;
use crossbeam_channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError, TrySendError, bounded,
};
use std::time::Duration;
use tracing::trace;

/// Frames the consumer may hand back before further returns are dropped
const RECYCLE_DEPTH: usize = 4;

/// Channel message wrapper for end-of-stream signaling
#[derive(Clone, Debug)]
pub enum ChannelMessage<T> {
    Sample(T),
    /// No more frames will follow
    EndOfStream,
}

/// Create a connected handoff pair
pub fn handoff() -> (FrameSender, FrameReceiver) {
    let (ready_tx, ready_rx) = bounded(1);
    let (recycle_tx, recycle_rx) = bounded(RECYCLE_DEPTH);

    let sender = FrameSender {
        ready_tx,
        stale_rx: ready_rx.clone(),
        recycle_rx,
        spare: Vec::new(),
        superseded: 0,
    };
    let receiver = FrameReceiver {
        ready_rx,
        recycle_tx,
        eos: false,
    };
    (sender, receiver)
}

/// Producer half
pub struct FrameSender {
    ready_tx: Sender<ChannelMessage<Frame>>,
    /// Clone of the ready receiver, used to pull out a frame nobody consumed
    stale_rx: Receiver<ChannelMessage<Frame>>,
    recycle_rx: Receiver<Frame>,
    spare: Vec<Frame>,
    superseded: u64,
}

impl FrameSender {
    /// True once the consumer half has been dropped
    fn consumer_gone(&mut self) -> bool {
        loop {
            match self.recycle_rx.try_recv() {
                Ok(frame) => self.spare.push(frame),
                Err(TryRecvError::Empty) => return false,
                Err(TryRecvError::Disconnected) => return true,
            }
        }
    }

    /// Publish `frame`, replacing any frame the consumer has not taken yet.
    pub fn publish(&mut self, frame: Frame) -> WorkResult<()> {
        if self.consumer_gone() {
            return Err(WorkError::SendError("frame consumer dropped".into()));
        }

        let mut msg = ChannelMessage::Sample(frame);
        loop {
            match self.ready_tx.try_send(msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    msg = back;
                    // The consumer may take the waiting frame first; then the retry succeeds
                    if let Ok(ChannelMessage::Sample(stale)) = self.stale_rx.try_recv() {
                        trace!("Superseded frame {}", stale.header.frame_count());
                        self.superseded += 1;
                        self.spare.push(stale);
                    }
                }
                Err(TrySendError::Disconnected(_)) => {
                    return Err(WorkError::SendError("frame channel closed".into()));
                }
            }
        }
    }

    /// A buffer returned by the consumer or superseded before it was read
    pub fn take_spare(&mut self) -> Option<Frame> {
        if self.spare.is_empty() {
            self.consumer_gone();
        }
        self.spare.pop()
    }

    /// Frames replaced before the consumer read them
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    /// Signal end of stream. Waits for the consumer to take a pending frame first, unless
    /// it has gone away.
    pub fn finish(mut self) {
        let mut msg = ChannelMessage::EndOfStream;
        loop {
            match self.ready_tx.send_timeout(msg, Duration::from_millis(50)) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(back)) => {
                    if self.consumer_gone() {
                        return;
                    }
                    msg = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }
}

/// Consumer half
pub struct FrameReceiver {
    ready_rx: Receiver<ChannelMessage<Frame>>,
    recycle_tx: Sender<Frame>,
    eos: bool,
}

impl FrameReceiver {
    fn unwrap_message(&mut self, msg: ChannelMessage<Frame>) -> WorkResult<Frame> {
        match msg {
            ChannelMessage::Sample(frame) => Ok(frame),
            ChannelMessage::EndOfStream => {
                self.eos = true;
                Err(WorkError::Shutdown)
            }
        }
    }

    /// Block for the next frame. `Err(Shutdown)` once the stream has ended.
    pub fn recv(&mut self) -> WorkResult<Frame> {
        if self.eos {
            return Err(WorkError::Shutdown);
        }
        let msg = self.ready_rx.recv()?;
        self.unwrap_message(msg)
    }

    /// Like [`FrameReceiver::recv`] but gives up after `timeout` with `Ok(None)`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> WorkResult<Option<Frame>> {
        if self.eos {
            return Err(WorkError::Shutdown);
        }
        match self.ready_rx.recv_timeout(timeout) {
            Ok(msg) => self.unwrap_message(msg).map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkError::Shutdown),
        }
    }

    /// Return a consumed frame's buffer to the producer
    pub fn recycle(&self, frame: Frame) {
        // A full recycle queue just means the producer has enough spares
        let _ = self.recycle_tx.try_send(frame);
    }

    pub fn is_finished(&self) -> bool {
        self.eos
    }
}
