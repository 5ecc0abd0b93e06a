//! Mixing session - sink registration and source allocation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};
use tracing::debug;

use crate::buffer::SignalProperties;
use crate::error::{MixerError, MixerResult};
use crate::nodes::{Sink, Source};
use crate::pool::BufferPool;
use crate::worker::{Admission, Event, MixingWorker, Session, SlotId};

/// Tuning for a mixing session.
///
/// The defaults keep both channels at a single slot, which makes every
/// [`Sink::write`] a backpressure point as soon as the worker or the consumer
/// falls behind.
///
/// ```
/// # use framemix::{Mixer, MixerConfig};
/// let mixer = Mixer::with_config(
///     MixerConfig::new(2)
///         .with_handoff_capacity(4)
///         .with_output_capacity(2),
/// ).unwrap();
/// assert_eq!(mixer.channels(), 2);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MixerConfig {
    /// Interleaved channels of every sink and of the mixed output
    pub channels: usize,
    /// Events the sink → worker channel buffers before writes block
    pub handoff_capacity: usize,
    /// Mixed blocks the worker → source channel buffers before mixing blocks
    pub output_capacity: usize,
}

impl MixerConfig {
    pub fn new(channels: usize) -> Self {
        Self {
            channels,
            handoff_capacity: 1,
            output_capacity: 1,
        }
    }

    /// Set the hand-off channel capacity (builder pattern).
    pub fn with_handoff_capacity(mut self, capacity: usize) -> Self {
        self.handoff_capacity = capacity;
        self
    }

    /// Set the output channel capacity (builder pattern).
    pub fn with_output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = capacity;
        self
    }
}

/// Registration state guarded by the session lock.
#[derive(Debug)]
struct Registry {
    sample_rate: Option<u32>,
    next_slot: usize,
    /// Chain and slots, until the source hands them to the worker
    pending: Option<(Session, Receiver<Event>)>,
    source_taken: bool,
}

#[derive(Debug)]
pub(crate) struct Shared {
    config: MixerConfig,
    pool: Arc<BufferPool>,
    admission: Arc<Admission>,
    input: Sender<Event>,
    registry: Mutex<Registry>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Combines any number of sinks into one averaged output stream.
///
/// Every sink must declare the same sample rate and channel count. Each call to
/// [`Sink::write`] contributes one block to the sink's current window; a window
/// is averaged and handed to the single [`Source`] once every sink still active
/// contributed to it or flushed.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use framemix::{Mixer, SignalProperties};
///
/// let mixer = Mixer::new(1).unwrap();
/// let props = SignalProperties::new(48_000, 1);
/// let mut a = mixer.sink(2, props).unwrap();
/// let mut b = mixer.sink(2, props).unwrap();
/// let mut source = mixer.source(2).unwrap();
///
/// let producer = std::thread::spawn(move || {
///     a.write(&[0.7f64, 0.7]).unwrap();
///     b.write(&[0.5f64, 0.5]).unwrap();
///     a.flush_timeout(Duration::from_secs(1)).unwrap();
///     b.flush_timeout(Duration::from_secs(1)).unwrap();
/// });
///
/// let mut out = [0.0f64; 2];
/// assert_eq!(source.pull(&mut out), Some(2));
/// assert!((out[0] - 0.6).abs() < 1e-9);
/// assert_eq!(source.pull(&mut out), None);
/// producer.join().unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct Mixer {
    shared: Arc<Shared>,
}

impl Mixer {
    /// Create a mixer whose channel count is fixed for the session.
    pub fn new(channels: usize) -> MixerResult<Self> {
        Self::with_config(MixerConfig::new(channels))
    }

    pub fn with_config(config: MixerConfig) -> MixerResult<Self> {
        if config.channels == 0 {
            return Err(MixerError::ZeroChannels);
        }
        let (input, receiver) = channel::bounded(config.handoff_capacity);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                pool: Arc::new(BufferPool::new(config.channels)),
                admission: Arc::default(),
                input,
                registry: Mutex::new(Registry {
                    sample_rate: None,
                    next_slot: 0,
                    pending: Some((Session::default(), receiver)),
                    source_taken: false,
                }),
            }),
        })
    }

    pub fn channels(&self) -> usize {
        self.shared.config.channels
    }

    pub fn config(&self) -> MixerConfig {
        self.shared.config
    }

    /// Negotiated format, once the first sink registered.
    pub fn properties(&self) -> Option<SignalProperties> {
        let rate = self.shared.registry().sample_rate?;
        Some(SignalProperties::new(rate, self.channels()))
    }

    /// The pool every sink, the worker and the source borrow buffers from.
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.shared.pool
    }

    /// Register a producer that writes blocks of up to `block_size` frames.
    ///
    /// The first sink fixes the session's sample rate. A sink whose sample rate
    /// or channel count differs is rejected and nothing about the session
    /// changes.
    ///
    /// Sinks may register after the source started; they are then awaited
    /// from the newest pending window onward. Registering after the session
    /// terminated fails with [`MixerError::SessionClosed`].
    pub fn sink(&self, block_size: usize, props: SignalProperties) -> MixerResult<Sink> {
        if block_size == 0 {
            return Err(MixerError::ZeroBlockSize);
        }
        let mut registry = self.shared.registry();

        if let Some(expected) = registry.sample_rate {
            if expected != props.sample_rate {
                return Err(MixerError::SampleRateMismatch {
                    expected,
                    actual: props.sample_rate,
                });
            }
        }
        if props.channels != self.channels() {
            return Err(MixerError::ChannelMismatch {
                expected: self.channels(),
                actual: props.channels,
            });
        }

        let slot = SlotId(registry.next_slot);
        let late = match registry.pending.as_mut() {
            Some((session, _)) => {
                session.join(slot);
                false
            }
            None if self.shared.admission.admit() => true,
            None => return Err(MixerError::SessionClosed),
        };
        registry.next_slot += 1;
        registry.sample_rate = Some(props.sample_rate);
        drop(registry);

        // the worker owns the chain now; the send may wait on a busy worker,
        // so it happens outside the lock
        if late {
            self.shared
                .input
                .send(Event::Join { slot })
                .map_err(|_| MixerError::SessionClosed)?;
        }
        debug!(slot = slot.0, block_size, sample_rate = props.sample_rate, late, "sink registered");

        Ok(Sink::new(
            slot,
            block_size,
            self.channels(),
            self.shared.input.clone(),
            Arc::clone(&self.shared.pool),
        ))
    }

    /// Start mixing and return the single consumer of the mixed stream.
    ///
    /// `block_size` is the output width in frames; windows reserve that much
    /// room up front and grow past it only when a sink writes wider blocks.
    /// Only one source per mixer is allowed; a second call fails with
    /// [`MixerError::SourceTaken`].
    pub fn source(&self, block_size: usize) -> MixerResult<Source> {
        if block_size == 0 {
            return Err(MixerError::ZeroBlockSize);
        }
        let mut registry = self.shared.registry();
        if registry.source_taken {
            return Err(MixerError::SourceTaken);
        }
        let (session, input) = registry.pending.take().ok_or(MixerError::SessionClosed)?;
        debug!(sinks = session.active(), block_size, "starting mixing worker");

        let (output, mixed) = channel::bounded(self.shared.config.output_capacity);
        let worker = MixingWorker::new(
            session,
            Arc::clone(&self.shared.pool),
            Arc::clone(&self.shared.admission),
            block_size * self.channels(),
            input,
            output,
        );
        let handle = worker.spawn()?;
        registry.source_taken = true;

        Ok(Source::new(self.clone(), mixed, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_channels_rejected() {
        assert!(matches!(Mixer::new(0), Err(MixerError::ZeroChannels)));
    }

    #[test]
    fn first_sink_fixes_sample_rate() {
        let mixer = Mixer::new(2).unwrap();
        assert!(mixer.properties().is_none());

        let _a = mixer.sink(4, SignalProperties::new(44_100, 2)).unwrap();
        assert_eq!(mixer.properties(), Some(SignalProperties::new(44_100, 2)));

        let err = mixer.sink(4, SignalProperties::new(48_000, 2)).unwrap_err();
        assert!(matches!(
            err,
            MixerError::SampleRateMismatch { expected: 44_100, actual: 48_000 }
        ));
    }

    #[test]
    fn channel_mismatch_leaves_session_untouched() {
        let mixer = Mixer::new(1).unwrap();
        let err = mixer.sink(2, SignalProperties::new(48_000, 2)).unwrap_err();
        assert!(matches!(err, MixerError::ChannelMismatch { expected: 1, actual: 2 }));
        // a rejected sink must not adopt its sample rate
        assert!(mixer.properties().is_none());

        let registry = mixer.shared.registry();
        assert_eq!(registry.next_slot, 0);
        assert_eq!(registry.pending.as_ref().map(|(s, _)| s.active()), Some(0));
    }

    #[test]
    fn zero_block_size_rejected() {
        let mixer = Mixer::new(1).unwrap();
        assert!(matches!(
            mixer.sink(0, SignalProperties::new(8_000, 1)),
            Err(MixerError::ZeroBlockSize)
        ));
        assert!(matches!(mixer.source(0), Err(MixerError::ZeroBlockSize)));
    }

    #[test]
    fn second_source_rejected() {
        let mixer = Mixer::new(1).unwrap();
        let mut source = mixer.source(2).unwrap();
        assert!(matches!(mixer.source(2), Err(MixerError::SourceTaken)));
        assert_eq!(source.pull(&mut [0.0f64; 2]), None);
    }

    #[test]
    fn builder_sets_capacities() {
        let config = MixerConfig::new(2).with_handoff_capacity(8).with_output_capacity(3);
        assert_eq!(config.handoff_capacity, 8);
        assert_eq!(config.output_capacity, 3);
        assert_eq!(Mixer::with_config(config).unwrap().config(), config);
    }
}
