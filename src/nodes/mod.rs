//! Producer and consumer endpoints of a mixing session.
//!
//! ## Sinks ([`Sink`])
//!
//! One per producer. [`Sink::write`] hands a block to the mixing worker and
//! [`Sink::flush`] tells it the producer is done.
//!
//! ## Source ([`Source`])
//!
//! Exactly one per session. [`Source::pull`] blocks until the next window is
//! mixed and reports end of stream once every sink flushed.

mod sink;
mod source;

pub use sink::Sink;
pub use source::{MixedBlock, Source};
