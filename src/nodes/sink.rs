//! Producer endpoint

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{SendError, SendTimeoutError, Sender, TrySendError};
use dasp_sample::ToSample;
use tracing::{trace, warn};

use crate::error::{MixerError, MixerResult};
use crate::pool::BufferPool;
use crate::worker::{Event, SlotId};

/// A registered producer.
///
/// Created by [`Mixer::sink`](crate::Mixer::sink). Calls from one sink are
/// observed by the mixer in the order they were made; calls from different
/// sinks are ordered by when they land on the shared hand-off channel.
///
/// Dropping a sink that has not flushed posts its flush sentinel so the
/// session can still end. Dropping never blocks: if the hand-off channel is
/// full, a helper thread delivers the sentinel once the worker drains it.
#[derive(Debug)]
pub struct Sink {
    slot: SlotId,
    block_size: usize,
    channels: usize,
    input: Sender<Event>,
    pool: Arc<BufferPool>,
    flushed: bool,
}

impl Sink {
    pub(crate) fn new(
        slot: SlotId,
        block_size: usize,
        channels: usize,
        input: Sender<Event>,
        pool: Arc<BufferPool>,
    ) -> Self {
        Self {
            slot,
            block_size,
            channels,
            input,
            pool,
            flushed: false,
        }
    }

    /// Contribute one block of interleaved samples to this sink's current window.
    ///
    /// The block is copied into a pooled buffer, so `samples` can be reused as
    /// soon as this returns. Blocks longer than the sink's block size are
    /// truncated to it. Returns the number of frames accepted.
    ///
    /// Blocks until the hand-off channel takes the block; that is the only
    /// wait. Whether the window is complete is not awaited.
    pub fn write<S: ToSample<f64> + Copy>(&mut self, samples: &[S]) -> MixerResult<usize> {
        if self.flushed {
            return Err(MixerError::SinkFlushed);
        }
        if samples.len() % self.channels != 0 {
            return Err(MixerError::PartialFrame {
                len: samples.len(),
                channels: self.channels,
            });
        }

        let limit = self.block_size * self.channels;
        let mut buffer = self.pool.get(limit);
        let copied = buffer.copy_from(&samples[..samples.len().min(limit)]);

        let event = Event::Contribute {
            slot: self.slot,
            buffer,
        };
        if let Err(SendError(event)) = self.input.send(event) {
            if let Event::Contribute { buffer, .. } = event {
                self.pool.put(buffer);
            }
            return Err(MixerError::SessionClosed);
        }
        Ok(copied / self.channels)
    }

    /// Tell the mixer this producer will write nothing more.
    ///
    /// Fails with [`MixerError::FlushTimeout`] if the hand-off channel does not
    /// accept the sentinel before `deadline`. The mixer has then seen nothing
    /// of the flush and the call can be retried.
    pub fn flush(&mut self, deadline: Instant) -> MixerResult<()> {
        if self.flushed {
            return Err(MixerError::SinkFlushed);
        }

        match self.input.send_deadline(Event::Flush { slot: self.slot }, deadline) {
            Ok(()) => {
                trace!(slot = self.slot.0, "flush posted");
                self.flushed = true;
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => Err(MixerError::FlushTimeout),
            Err(SendTimeoutError::Disconnected(_)) => {
                self.flushed = true;
                Err(MixerError::SessionClosed)
            }
        }
    }

    /// [`flush`](Self::flush) with a deadline `timeout` from now.
    pub fn flush_timeout(&mut self, timeout: Duration) -> MixerResult<()> {
        self.flush(Instant::now() + timeout)
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        if self.flushed {
            return;
        }
        let flush = match self.input.try_send(Event::Flush { slot: self.slot }) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(flush)) => flush,
        };

        // queued behind this sink's own writes, so ordering is kept
        let input = self.input.clone();
        let spawned = thread::Builder::new()
            .name("framemix-flush".into())
            .spawn(move || {
                let _ = input.send(flush);
            });
        if let Err(err) = spawned {
            warn!(slot = self.slot.0, %err, "dropped sink could not post its flush");
        }
    }
}
