//! Frame-synchronized averaging mixer.
//!
//! Any number of producers write blocks of interleaved samples through their
//! own [`Sink`]; a single [`Source`] pulls the averaged result. Producers may
//! run at different paces, write blocks of different lengths, join late and
//! leave early.
//!
//! Design principles:
//! - All frame state is owned by one worker thread; sinks and the source only
//!   exchange messages with it, so nothing on the mixing path is locked
//! - Both channels are bounded, so a slow consumer throttles every producer
//! - A window is averaged over the producers that actually contributed to it
//! - Sample buffers are pooled and reused in steady state
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use framemix::{Mixer, SignalProperties};
//!
//! let mixer = Mixer::new(1).unwrap();
//! let props = SignalProperties::new(44_100, 1);
//!
//! let producers: Vec<_> = [0.7f32, 0.5]
//!     .into_iter()
//!     .map(|value| {
//!         let mut sink = mixer.sink(2, props).unwrap();
//!         std::thread::spawn(move || {
//!             for _ in 0..3 {
//!                 sink.write(&[value; 2]).unwrap();
//!             }
//!             sink.flush_timeout(Duration::from_secs(1)).unwrap();
//!         })
//!     })
//!     .collect();
//!
//! let mut source = mixer.source(2).unwrap();
//! let mut out = [0.0f32; 2];
//! while let Some(frames) = source.pull(&mut out) {
//!     assert_eq!(frames, 2);
//!     assert!((out[0] - 0.6).abs() < 1e-6);
//! }
//! for p in producers {
//!     p.join().unwrap();
//! }
//! ```

extern crate alloc;

mod buffer;
mod error;
mod frame;
mod mixer;
mod pool;
mod worker;
pub mod nodes;

pub use buffer::{Buffer, SignalProperties};
pub use error::{MixerError, MixerResult};
pub use mixer::{Mixer, MixerConfig};
pub use nodes::{MixedBlock, Sink, Source};
pub use pool::BufferPool;
