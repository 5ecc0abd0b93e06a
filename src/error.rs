//! Mixer error types

use thiserror::Error;

/// Errors returned synchronously by mixer sinks, sources and allocators.
///
/// End of stream is not an error: [`Source::pull`](crate::nodes::Source::pull)
/// reports it as `None`.
#[derive(Error, Debug)]
pub enum MixerError {
    /// A sink declared a sample rate different from the session's
    #[error("sinking different sample rates: session={expected}Hz, sink={actual}Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    /// A sink declared a channel count different from the session's
    #[error("sinking different channels: session={expected}, sink={actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// The flush sentinel could not be posted before the deadline
    #[error("sink flush timeout")]
    FlushTimeout,

    /// The mixing worker is gone (all sinks flushed, or the source was dropped)
    #[error("mixing session is closed")]
    SessionClosed,

    /// The sink already flushed successfully
    #[error("sink already flushed")]
    SinkFlushed,

    /// Only a single source per mixer is allowed
    #[error("mixer source already allocated")]
    SourceTaken,

    /// Interleaved sample count is not a whole number of frames
    #[error("{len} samples do not divide into {channels} channels")]
    PartialFrame { len: usize, channels: usize },

    #[error("mixer needs at least one channel")]
    ZeroChannels,

    #[error("buffer size must be non-zero")]
    ZeroBlockSize,

    /// The OS refused to start the worker thread
    #[error("failed to spawn mixing worker: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Result type for mixer operations
pub type MixerResult<T> = Result<T, MixerError>;
