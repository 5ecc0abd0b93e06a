//! Interleaved sample buffers and signal properties.

use alloc::vec::Vec;

use dasp_sample::{FromSample, ToSample};

/// Sample rate and channel count negotiated for a mixing session.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SignalProperties {
    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: usize,
}

impl SignalProperties {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self { sample_rate, channels }
    }
}

/// A growable block of interleaved `f64` samples with a fixed channel count.
///
/// Indexing is by sample, not by frame: sample `i` belongs to channel
/// `i % channels` of frame `i / channels`.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    channels: usize,
    samples: Vec<f64>,
}

impl Buffer {
    /// Create an empty buffer able to hold `capacity` samples without reallocating.
    pub fn with_capacity(channels: usize, capacity: usize) -> Self {
        Self {
            channels: channels.max(1),
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Copy interleaved samples of any sample type, converting to `f64`.
    ///
    /// At most `capacity()` samples are copied; the rest are dropped.
    /// Returns the number of samples copied.
    pub fn copy_from<S: ToSample<f64> + Copy>(&mut self, src: &[S]) -> usize {
        self.samples.clear();
        let n = src.len().min(self.samples.capacity());
        self.samples
            .extend(src[..n].iter().copied().map(ToSample::<f64>::to_sample_));
        n
    }

    /// Copy samples out into `dst`, converting from `f64`.
    ///
    /// Returns the number of samples written, `min(self.len(), dst.len())`.
    pub fn copy_to<S: FromSample<f64>>(&self, dst: &mut [S]) -> usize {
        let n = self.samples.len().min(dst.len());
        for (out, sample) in dst.iter_mut().zip(self.samples.iter()) {
            *out = S::from_sample_(*sample);
        }
        n
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples across all channels
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of whole frames (samples per channel)
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.samples.capacity()
    }

    #[inline]
    pub fn sample(&self, i: usize) -> f64 {
        self.samples[i]
    }

    #[inline]
    pub fn set_sample(&mut self, i: usize, value: f64) {
        self.samples[i] = value;
    }

    /// Append one sample, growing the buffer if it is at capacity.
    #[inline]
    pub fn append_sample(&mut self, value: f64) {
        self.samples.push(value);
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_from_truncates_to_capacity() {
        let mut buf = Buffer::with_capacity(1, 4);
        let input = [0.5f32, -0.5, 0.25, -0.25, 0.125, -0.125, 1.0, -1.0, 0.0];
        let copied = buf.copy_from(&input);

        let expected = input.len().min(buf.capacity());
        assert_eq!(copied, expected);
        assert_eq!(buf.len(), expected);
        assert!(buf.capacity() >= 4);
        let widened: Vec<f64> = input[..expected].iter().map(|s| *s as f64).collect();
        assert_eq!(buf.as_slice(), widened.as_slice());
    }

    #[test]
    fn copy_from_converts_integer_samples() {
        let mut buf = Buffer::with_capacity(2, 4);
        buf.copy_from(&[0i16, i16::MIN]);
        assert_eq!(buf.frames(), 1);
        assert_eq!(buf.sample(0), 0.0);
        assert_eq!(buf.sample(1), -1.0);
    }

    #[test]
    fn copy_to_stops_at_shorter_side() {
        let mut buf = Buffer::with_capacity(1, 3);
        buf.append_sample(0.25);
        buf.append_sample(0.5);
        buf.append_sample(0.75);

        let mut out = [0.0f32; 2];
        assert_eq!(buf.copy_to(&mut out), 2);
        assert_eq!(out, [0.25, 0.5]);
    }

    #[test]
    fn frames_counts_interleaved_pairs() {
        let mut buf = Buffer::with_capacity(2, 0);
        for v in [1.0, 2.0, 3.0, 4.0] {
            buf.append_sample(v);
        }
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.frames(), 2);
        buf.set_sample(3, 8.0);
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 3.0, 8.0]);

        let capacity = buf.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.frames(), 0);
        assert_eq!(buf.capacity(), capacity);
    }
}
