//! Aggregation windows and the forward chain that links them.

use alloc::collections::VecDeque;
use core::iter::Map;
use core::ops::RangeInclusive;

use crate::buffer::Buffer;
use crate::pool::BufferPool;

/// Position of a frame within a [`FrameChain`].
///
/// Ids grow monotonically; a frame's successor is always `id.next()`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FrameId(pub(crate) u64);

impl FrameId {
    #[inline]
    pub fn next(self) -> FrameId {
        FrameId(self.0 + 1)
    }
}

/// One pending output window.
///
/// Holds the running sum of contributions plus the counters that decide when
/// the window is done: it completes once at least one producer added data and
/// every expected producer either added or flushed.
#[derive(Debug, Default)]
pub struct Frame {
    expected: usize,
    added: usize,
    flushed: usize,
    buffer: Option<Buffer>,
    emitted: bool,
}

impl Frame {
    pub fn new(expected: usize) -> Self {
        Self {
            expected,
            ..Self::default()
        }
    }

    /// Sum `input` into the frame.
    ///
    /// The first contribution borrows the sum buffer from `pool`, reserving
    /// room for at least `capacity` samples. Positions present in both buffers
    /// are added elementwise. If `input` is longer, the frame grows by
    /// appending the extra samples; positions already summed are never dropped.
    pub fn add(&mut self, input: &Buffer, pool: &BufferPool, capacity: usize) {
        debug_assert!(self.added + self.flushed < self.expected);
        self.added += 1;

        let sum = self
            .buffer
            .get_or_insert_with(|| pool.get(capacity.max(input.len())));
        let overlap = sum.len().min(input.len());
        for i in 0..overlap {
            sum.set_sample(i, sum.sample(i) + input.sample(i));
        }
        for i in overlap..input.len() {
            sum.append_sample(input.sample(i));
        }
    }

    /// Record a producer that will never contribute to this window.
    pub fn mark_flushed(&mut self) {
        debug_assert!(self.added + self.flushed < self.expected);
        self.flushed += 1;
    }

    /// Await one more producer. Only valid before the frame settles.
    pub fn expect_one_more(&mut self) {
        self.expected += 1;
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.added > 0 && self.added + self.flushed == self.expected
    }

    /// Every expected producer has either added or flushed.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.added + self.flushed == self.expected
    }

    /// Divide the sum by the number of contributions and hand it out.
    ///
    /// Returns `None` unless the frame is complete, and on every call after
    /// the first successful one.
    pub fn finalize(&mut self) -> Option<Buffer> {
        if !self.is_complete() || self.emitted {
            return None;
        }
        self.emitted = true;

        let mut mix = self.buffer.take()?;
        let n = self.added as f64;
        for i in 0..mix.len() {
            mix.set_sample(i, mix.sample(i) / n);
        }
        Some(mix)
    }

    /// Number of contributors a successor window should wait for.
    ///
    /// Producers that already flushed at this frame are not awaited again.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.expected - self.flushed
    }

    #[cfg(test)]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Partial sum accumulated so far, if any producer contributed.
    #[cfg(test)]
    pub fn partial(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }
}

/// Strictly forward chain of frames, stored as an arena indexed by [`FrameId`].
///
/// The front of the chain is trimmed as windows settle, so memory is bounded by
/// the windows still in flight rather than by stream length.
#[derive(Debug)]
pub struct FrameChain {
    frames: VecDeque<Frame>,
    base: u64,
}

impl Default for FrameChain {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameChain {
    /// A chain holding a single head frame that awaits nobody yet.
    pub fn new() -> Self {
        let mut frames = VecDeque::with_capacity(8);
        frames.push_back(Frame::new(0));
        Self { frames, base: 0 }
    }

    /// Oldest frame still held
    pub fn head(&self) -> FrameId {
        FrameId(self.base)
    }

    /// Newest frame; it has no successor yet
    pub fn tail(&self) -> FrameId {
        FrameId(self.base + self.frames.len() as u64 - 1)
    }

    /// Frames still held, including the tail
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn get(&self, id: FrameId) -> Option<&Frame> {
        let index = id.0.checked_sub(self.base)?;
        self.frames.get(index as usize)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut Frame> {
        let index = id.0.checked_sub(self.base)?;
        self.frames.get_mut(index as usize)
    }

    /// Successor of `id`, created on first use.
    ///
    /// A new successor awaits every producer the current frame expected,
    /// minus those that already flushed there.
    pub fn advance(&mut self, id: FrameId) -> FrameId {
        let next = id.next();
        if next > self.tail() {
            let remaining = self.get(id).map_or(0, Frame::remaining);
            self.frames.push_back(Frame::new(remaining));
        }
        next
    }

    /// Ids from `from` to the end of the chain, in order.
    pub fn range_from(&self, from: FrameId) -> Map<RangeInclusive<u64>, fn(u64) -> FrameId> {
        (from.0.max(self.base)..=self.tail().0).map(FrameId as fn(u64) -> FrameId)
    }

    /// Drop settled frames from the front, returning any unused sums to the
    /// pool. The tail is always kept. Returns how many frames were removed.
    pub fn reclaim(&mut self, pool: &BufferPool) -> usize {
        let mut removed = 0;
        while self.frames.len() > 1 && self.frames.front().is_some_and(Frame::is_settled) {
            if let Some(mut frame) = self.frames.pop_front() {
                if let Some(buffer) = frame.buffer.take() {
                    pool.put(buffer);
                }
            }
            self.base += 1;
            removed += 1;
        }
        removed
    }

    /// Return every remaining partial sum to the pool.
    pub fn release(&mut self, pool: &BufferPool) {
        for frame in self.frames.iter_mut() {
            if let Some(buffer) = frame.buffer.take() {
                pool.put(buffer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(pool: &BufferPool, values: &[f64]) -> Buffer {
        let mut buf = pool.get(values.len());
        for v in values {
            buf.append_sample(*v);
        }
        buf
    }

    #[test]
    fn completes_only_when_counts_line_up() {
        let pool = BufferPool::new(1);
        let mut frame = Frame::new(2);
        assert!(!frame.is_complete());

        let input = filled(&pool, &[0.7, 0.7]);
        frame.add(&input, &pool, 2);
        assert!(!frame.is_complete());
        assert!(frame.finalize().is_none());

        frame.mark_flushed();
        assert!(frame.is_complete());
        let mix = frame.finalize().expect("complete frame finalizes");
        assert_eq!(mix.as_slice(), &[0.7, 0.7]);
        assert!(frame.finalize().is_none(), "finalize hands out the mix once");
    }

    #[test]
    fn all_flushed_frame_never_completes() {
        let mut frame = Frame::new(2);
        frame.mark_flushed();
        frame.mark_flushed();
        assert!(frame.is_settled());
        assert!(!frame.is_complete());
        assert!(frame.finalize().is_none());
    }

    #[test]
    fn growth_keeps_earlier_partial_sums() {
        let pool = BufferPool::new(1);
        let mut frame = Frame::new(3);

        frame.add(&filled(&pool, &[1.0, 2.0]), &pool, 2);
        frame.add(&filled(&pool, &[1.0, 1.0, 1.0, 1.0]), &pool, 2);
        assert_eq!(frame.partial().unwrap().as_slice(), &[2.0, 3.0, 1.0, 1.0]);

        frame.add(&filled(&pool, &[0.5]), &pool, 2);
        assert_eq!(frame.partial().unwrap().as_slice(), &[2.5, 3.0, 1.0, 1.0]);

        let mix = frame.finalize().unwrap();
        assert_eq!(mix.len(), 4);
        assert_eq!(mix.sample(0), 2.5 / 3.0);
        assert_eq!(mix.sample(3), 1.0 / 3.0);
    }

    #[test]
    fn successor_skips_flushed_producers() {
        let mut chain = FrameChain::new();
        let head = chain.head();
        for _ in 0..3 {
            chain.get_mut(head).unwrap().expect_one_more();
        }
        chain.get_mut(head).unwrap().mark_flushed();

        let next = chain.advance(head);
        assert_eq!(next, head.next());
        assert_eq!(chain.get(next).unwrap().expected(), 2);

        // a second producer passing the same frame reuses the successor
        assert_eq!(chain.advance(head), next);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn reclaim_trims_settled_front() {
        let pool = BufferPool::new(1);
        let mut chain = FrameChain::new();
        let head = chain.head();
        chain.get_mut(head).unwrap().expect_one_more();

        let input = filled(&pool, &[0.1]);
        chain.get_mut(head).unwrap().add(&input, &pool, 1);
        let next = chain.advance(head);
        let mix = chain.get_mut(head).unwrap().finalize().unwrap();
        pool.put(mix);

        assert_eq!(chain.reclaim(&pool), 1);
        assert_eq!(chain.head(), next);
        assert!(chain.get(head).is_none());
        assert_eq!(chain.reclaim(&pool), 0, "the tail is always kept");

        pool.put(input);
        chain.release(&pool);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn range_walks_to_the_tail() {
        let mut chain = FrameChain::new();
        let head = chain.head();
        chain.get_mut(head).unwrap().expect_one_more();
        let second = chain.advance(head);
        let third = chain.advance(second);
        let ids: Vec<_> = chain.range_from(second).collect();
        assert_eq!(ids, vec![second, third]);
    }
}
