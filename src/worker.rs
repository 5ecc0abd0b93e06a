//! The mixing worker - sole owner of the frame chain.
//!
//! Sinks never touch frames. They post [`Event`]s on the bounded hand-off
//! channel, and one dedicated thread folds them into the chain in arrival
//! order, so frame state needs no locking at all.

use alloc::vec::Vec;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, SendError, Sender};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::error::MixerResult;
use crate::frame::{FrameChain, FrameId};
use crate::pool::BufferPool;

/// Stable index of a registered sink within a session.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SlotId(pub(crate) usize);

/// The unit crossing the hand-off channel.
#[derive(Debug)]
pub(crate) enum Event {
    /// A sink registered after the worker started
    Join { slot: SlotId },
    /// One block of samples from a sink
    Contribute { slot: SlotId, buffer: Buffer },
    /// The sink will contribute nothing further
    Flush { slot: SlotId },
}

/// Frame chain plus the slot table, before and after the worker takes over.
///
/// Slots are tombstoned (`None`) on flush rather than removed, so a slot id
/// stays a plain index for the whole session.
#[derive(Debug, Default)]
pub(crate) struct Session {
    chain: FrameChain,
    slots: Vec<Option<FrameId>>,
    active: usize,
}

impl Session {
    /// Attach `slot` to the newest frame and await it from there on.
    ///
    /// Before the worker starts the chain is just the head frame, so this is
    /// also how initial registrations land on the head.
    pub fn join(&mut self, slot: SlotId) {
        let tail = self.chain.tail();
        if let Some(frame) = self.chain.get_mut(tail) {
            frame.expect_one_more();
        }
        if self.slots.len() <= slot.0 {
            self.slots.resize(slot.0 + 1, None);
        }
        self.slots[slot.0] = Some(tail);
        self.active += 1;
    }

    pub fn active(&self) -> usize {
        self.active
    }
}

/// Gate between late registrations and the end of a session.
///
/// A registrant announces its join here before posting [`Event::Join`]. The
/// worker only closes the session while no announced join is still on its
/// way, and once closed no further join is admitted.
#[derive(Debug, Default)]
pub(crate) struct Admission {
    state: Mutex<AdmissionState>,
}

#[derive(Debug, Default)]
struct AdmissionState {
    joining: usize,
    closed: bool,
}

impl Admission {
    fn state(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Announce a join. `false` once the session closed.
    pub fn admit(&self) -> bool {
        let mut state = self.state();
        if !state.closed {
            state.joining += 1;
        }
        !state.closed
    }

    /// An announced join reached the worker.
    pub fn joined(&self) {
        let mut state = self.state();
        state.joining = state.joining.saturating_sub(1);
    }

    /// Close unless a join is still in flight. Returns whether it is closed.
    pub fn try_close(&self) -> bool {
        let mut state = self.state();
        if state.joining == 0 {
            state.closed = true;
        }
        state.closed
    }

    pub fn close(&self) {
        self.state().closed = true;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WorkerState {
    Running { active: usize },
    /// No sink is left; the output channel is about to close
    Draining,
    Terminated,
}

pub(crate) struct MixingWorker {
    session: Session,
    pool: Arc<BufferPool>,
    admission: Arc<Admission>,
    frame_capacity: usize,
    input: Receiver<Event>,
    output: Option<Sender<Buffer>>,
    state: WorkerState,
}

/// The consumer hung up; the mixed block could not be delivered.
#[derive(Debug)]
pub(crate) struct ConsumerGone;

impl MixingWorker {
    pub fn new(
        session: Session,
        pool: Arc<BufferPool>,
        admission: Arc<Admission>,
        frame_capacity: usize,
        input: Receiver<Event>,
        output: Sender<Buffer>,
    ) -> Self {
        let state = WorkerState::Running {
            active: session.active(),
        };
        Self {
            session,
            pool,
            admission,
            frame_capacity,
            input,
            output: Some(output),
            state,
        }
    }

    /// Run the worker on its own named thread.
    pub fn spawn(self) -> MixerResult<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("framemix-worker".into())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    pub fn run(mut self) {
        debug!(active = self.session.active, "mixing worker started");

        loop {
            match self.state {
                WorkerState::Running { active: 0 } if self.admission.try_close() => {
                    debug!("all sinks flushed, draining");
                    self.state = WorkerState::Draining;
                }
                WorkerState::Running { .. } => {
                    let Ok(event) = self.input.recv() else {
                        warn!("hand-off channel closed with sinks still active");
                        self.state = WorkerState::Draining;
                        continue;
                    };
                    if self.handle(event).is_err() {
                        warn!("mixed output has no consumer, stopping worker");
                        self.state = WorkerState::Terminated;
                    }
                }
                WorkerState::Draining => {
                    // dropping the sender is what closes the output channel
                    self.output = None;
                    self.state = WorkerState::Terminated;
                }
                WorkerState::Terminated => break,
            }
        }

        self.shutdown();
        debug!("mixing worker terminated");
    }

    /// Apply one event to the chain.
    pub fn handle(&mut self, event: Event) -> Result<(), ConsumerGone> {
        let result = match event {
            Event::Join { slot } => {
                self.session.join(slot);
                self.admission.joined();
                trace!(slot = slot.0, frame = self.session.chain.tail().0, "late sink joined");
                Ok(())
            }
            Event::Contribute { slot, buffer } => self.contribute(slot, buffer),
            Event::Flush { slot } => self.flush(slot),
        };

        self.state = WorkerState::Running {
            active: self.session.active,
        };
        if self.session.chain.reclaim(&self.pool) > 0 {
            trace!(
                head = self.session.chain.head().0,
                pending = self.session.chain.len(),
                "settled frames reclaimed"
            );
        }
        result
    }

    fn contribute(&mut self, slot: SlotId, buffer: Buffer) -> Result<(), ConsumerGone> {
        let Some(id) = self.session.slots.get(slot.0).copied().flatten() else {
            warn!(slot = slot.0, "contribution from unknown or flushed slot");
            self.pool.put(buffer);
            return Ok(());
        };

        let mixed = self.session.chain.get_mut(id).and_then(|frame| {
            frame.add(&buffer, &self.pool, self.frame_capacity);
            frame.finalize()
        });
        self.pool.put(buffer);
        self.session.slots[slot.0] = Some(self.session.chain.advance(id));

        match mixed {
            Some(mix) => self.emit(id, mix),
            None => Ok(()),
        }
    }

    fn flush(&mut self, slot: SlotId) -> Result<(), ConsumerGone> {
        let Some(from) = self.session.slots.get_mut(slot.0).and_then(Option::take) else {
            warn!(slot = slot.0, "flush from unknown or flushed slot");
            return Ok(());
        };
        self.session.active -= 1;
        trace!(slot = slot.0, frame = from.0, active = self.session.active, "sink flushed");

        for id in self.session.chain.range_from(from) {
            let mixed = self.session.chain.get_mut(id).and_then(|frame| {
                frame.mark_flushed();
                frame.finalize()
            });
            if let Some(mix) = mixed {
                self.emit(id, mix)?;
            }
        }
        Ok(())
    }

    fn emit(&mut self, id: FrameId, mix: Buffer) -> Result<(), ConsumerGone> {
        trace!(frame = id.0, frames = mix.frames(), "frame mixed");
        let Some(output) = self.output.as_ref() else {
            self.pool.put(mix);
            return Err(ConsumerGone);
        };
        output.send(mix).map_err(|SendError(mix)| {
            self.pool.put(mix);
            ConsumerGone
        })
    }

    /// Hand every buffer the worker still holds back to the pool.
    fn shutdown(&mut self) {
        self.admission.close();
        self.output = None;
        self.session.chain.release(&self.pool);
        while let Ok(event) = self.input.try_recv() {
            if let Event::Contribute { buffer, .. } = event {
                self.pool.put(buffer);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> WorkerState {
        self.state
    }
}
