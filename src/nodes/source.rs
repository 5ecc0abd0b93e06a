//! Consumer endpoint

use core::mem;
use core::ops::Deref;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{Receiver, RecvTimeoutError};
use dasp_sample::FromSample;
use tracing::{debug, warn};

use crate::buffer::{Buffer, SignalProperties};
use crate::error::{MixerError, MixerResult};
use crate::mixer::Mixer;
use crate::pool::BufferPool;

/// The single consumer of a mixing session.
///
/// Created by [`Mixer::source`], which also starts the mixing worker. Once
/// every sink flushed and the last window was delivered, the source reports
/// end of stream and the worker thread has exited.
#[derive(Debug)]
pub struct Source {
    mixer: Mixer,
    mixed: Receiver<Buffer>,
    worker: Option<JoinHandle<()>>,
    done: bool,
}

impl Source {
    pub(crate) fn new(mixer: Mixer, mixed: Receiver<Buffer>, worker: JoinHandle<()>) -> Self {
        Self {
            mixer,
            mixed,
            worker: Some(worker),
            done: false,
        }
    }

    /// Block until the next mixed window and copy it into `out`.
    ///
    /// Returns the number of frames written, or `None` at end of stream.
    /// Every call after end of stream returns `None` again.
    pub fn pull<S: FromSample<f64>>(&mut self, out: &mut [S]) -> Option<usize> {
        let block = self.next_block()?;
        let copied = block.copy_to(out);
        Some(copied / self.mixer.channels())
    }

    /// Block until the next mixed window and hand out the pooled buffer itself.
    ///
    /// The buffer goes back to the pool when the [`MixedBlock`] is dropped.
    pub fn next_block(&mut self) -> Option<MixedBlock> {
        if self.done {
            return None;
        }
        match self.mixed.recv() {
            Ok(buffer) => Some(MixedBlock::new(buffer, Arc::clone(self.mixer.pool()))),
            Err(_) => {
                self.finish();
                None
            }
        }
    }

    /// Discard remaining output until end of stream.
    ///
    /// Fails with [`MixerError::FlushTimeout`] if sinks are still writing at
    /// `deadline`; blocks already discarded stay discarded.
    pub fn flush(&mut self, deadline: Instant) -> MixerResult<()> {
        while !self.done {
            match self.mixed.recv_deadline(deadline) {
                Ok(buffer) => self.mixer.pool().put(buffer),
                Err(RecvTimeoutError::Disconnected) => self.finish(),
                Err(RecvTimeoutError::Timeout) => return Err(MixerError::FlushTimeout),
            }
        }
        Ok(())
    }

    /// Negotiated format, once the first sink registered.
    pub fn properties(&self) -> Option<SignalProperties> {
        self.mixer.properties()
    }

    /// End of stream was reached and the worker thread has exited.
    pub fn is_finished(&self) -> bool {
        self.done && self.worker.is_none()
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("mixing worker panicked");
            }
            debug!("mixed stream ended");
        }
    }
}

/// A mixed window borrowed from the session's pool.
#[derive(Debug)]
pub struct MixedBlock {
    buffer: Buffer,
    pool: Arc<BufferPool>,
}

impl MixedBlock {
    fn new(buffer: Buffer, pool: Arc<BufferPool>) -> Self {
        Self { buffer, pool }
    }
}

impl Deref for MixedBlock {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl Drop for MixedBlock {
    fn drop(&mut self) {
        let buffer = mem::replace(&mut self.buffer, Buffer::with_capacity(1, 0));
        self.pool.put(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn end_of_stream_repeats() {
        let mixer = Mixer::new(1).unwrap();
        let mut source = mixer.source(4).unwrap();
        let mut out = [0.0f32; 4];
        assert_eq!(source.pull(&mut out), None);
        assert_eq!(source.pull(&mut out), None);
        assert!(source.is_finished());
    }

    #[test]
    fn dropped_block_returns_to_pool() {
        let mixer = Mixer::new(1).unwrap();
        let mut sink = mixer.sink(2, SignalProperties::new(8_000, 1)).unwrap();
        let mut source = mixer.source(2).unwrap();

        sink.write(&[1.0f32, -1.0]).unwrap();
        let block = source.next_block().unwrap();
        assert_eq!(block.as_slice(), &[1.0, -1.0]);
        assert_eq!(block.frames(), 2);
        drop(block);

        sink.flush_timeout(Duration::from_secs(1)).unwrap();
        assert!(source.next_block().is_none());
        assert_eq!(mixer.pool().outstanding(), 0);
    }

    #[test]
    fn flush_discards_until_end_of_stream() {
        let mixer = Mixer::new(1).unwrap();
        let mut sink = mixer.sink(1, SignalProperties::new(8_000, 1)).unwrap();
        let mut source = mixer.source(1).unwrap();

        let producer = std::thread::spawn(move || {
            for _ in 0..10 {
                sink.write(&[0.1f32]).unwrap();
            }
            sink.flush_timeout(Duration::from_secs(5)).unwrap();
        });

        source.flush(Instant::now() + Duration::from_secs(5)).unwrap();
        producer.join().unwrap();
        assert!(source.is_finished());
        assert_eq!(source.pull(&mut [0.0f32]), None);
    }

    #[test]
    fn flush_times_out_while_sinks_are_open() {
        let mixer = Mixer::new(1).unwrap();
        let mut sink = mixer.sink(1, SignalProperties::new(8_000, 1)).unwrap();
        let mut source = mixer.source(1).unwrap();

        let err = source.flush(Instant::now() + Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, MixerError::FlushTimeout));

        sink.flush_timeout(Duration::from_secs(1)).unwrap();
        source.flush(Instant::now() + Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn properties_follow_first_sink() {
        let mixer = Mixer::new(2).unwrap();
        let source = mixer.source(4).unwrap();
        assert_eq!(source.properties(), None);
        drop(source);

        let mixer = Mixer::new(2).unwrap();
        let _sink = mixer.sink(4, SignalProperties::new(96_000, 2)).unwrap();
        let source = mixer.source(4).unwrap();
        assert_eq!(source.properties(), Some(SignalProperties::new(96_000, 2)));
    }
}
