//! # Slots and Worker Loop
//!
//! A slot pairs one [`DecodeUnit`] with one dedicated worker thread. The
//! dispatcher and the worker talk through two one-directional handshakes,
//! each a `crossbeam-channel` of capacity 1:
//!
//! ```text
//!   dispatcher ──work-ready (Job | Wake)──▶ worker
//!   dispatcher ◀──result-ready (Outcome)─── worker
//! ```
//!
//! The output buffer travels inside the job and comes back inside the
//! outcome, so at any moment exactly one side owns it. There is no lock
//! around a slot and nothing at all shared between two slots.

use crate::error::{FrameDecodeError, InitializationError};
use crate::traits::DecodeUnit;
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

/// Lifecycle of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotState {
    /// No work issued this round.
    Empty = 0,
    /// Frame handed to the worker, not yet picked up.
    Loaded = 1,
    /// Worker is decoding.
    Running = 2,
    /// Output buffer holds a decoded frame.
    Ready = 3,
    /// Decode failed; the collector substitutes silence.
    ReadyWithError = 4,
    /// Pool is shutting down.
    Terminating = 5,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotState::Loaded,
            2 => SlotState::Running,
            3 => SlotState::Ready,
            4 => SlotState::ReadyWithError,
            5 => SlotState::Terminating,
            _ => SlotState::Empty,
        }
    }

    /// Returns `true` once the worker has finished with the frame.
    pub fn is_ready(&self) -> bool {
        matches!(self, SlotState::Ready | SlotState::ReadyWithError)
    }
}

/// State tag shared by one slot's dispatcher side and its worker only.
#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: SlotState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> SlotState {
        SlotState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, state: SlotState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; a no-op if the slot has left `from`,
    /// so the worker never overwrites `Terminating`.
    fn advance(&self, from: SlotState, to: SlotState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

struct Job {
    sequence: u64,
    input: Bytes,
    output: Vec<u8>,
}

enum WorkSignal {
    Decode(Job),
    /// Wake an idle worker so it can observe the cleared run flag.
    Wake,
}

struct Outcome {
    sequence: u64,
    output: Vec<u8>,
    result: Result<(), FrameDecodeError>,
    elapsed: Duration,
}

/// What the collector found in a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotResult {
    /// Nothing was submitted to the slot this round.
    Empty,
    /// The output buffer holds the decoded frame.
    Ready { sequence: u64, elapsed: Duration },
    /// The frame failed; the output buffer content is unspecified.
    Failed {
        sequence: u64,
        elapsed: Duration,
        error: FrameDecodeError,
    },
}

/// Dispatcher-side handle of one slot.
///
/// Not `Clone`: the worker and its decode unit are bound 1:1 to this value.
pub(crate) struct Slot {
    index: usize,
    state: Arc<StateCell>,
    run: Arc<AtomicBool>,
    /// Sequence number of the last frame loaded, for diagnostics only.
    sequence_number: Option<u64>,
    /// Decoded-frame buffer; handed to the worker while a frame is in flight.
    output: Vec<u8>,
    decoded_len: usize,
    /// A job was sent and its outcome not yet received.
    in_flight: bool,
    work_tx: Sender<WorkSignal>,
    result_rx: Receiver<Outcome>,
    worker: Option<JoinHandle<()>>,
}

impl Slot {
    /// Start the worker thread for `unit`.
    pub(crate) fn spawn<U: DecodeUnit>(
        index: usize,
        unit: U,
        decoded_len: usize,
    ) -> Result<Self, InitializationError> {
        let (work_tx, work_rx) = bounded(1);
        let (result_tx, result_rx) = bounded(1);
        let state = Arc::new(StateCell::new(SlotState::Empty));
        let run = Arc::new(AtomicBool::new(true));

        let worker = {
            let state = Arc::clone(&state);
            let run = Arc::clone(&run);
            thread::Builder::new()
                .name(format!("dst-slot-{}", index))
                .spawn(move || run_worker(index, unit, &run, &state, &work_rx, &result_tx))
                .map_err(|source| InitializationError::WorkerSpawn {
                    slot: index,
                    source,
                })?
        };

        Ok(Self {
            index,
            state,
            run,
            sequence_number: None,
            output: vec![0; decoded_len],
            decoded_len,
            in_flight: false,
            work_tx,
            result_rx,
            worker: Some(worker),
        })
    }

    pub(crate) fn state(&self) -> SlotState {
        self.state.load()
    }

    pub(crate) fn sequence_number(&self) -> Option<u64> {
        self.sequence_number
    }

    /// Hand a frame to the worker, or mark the slot empty for a flush round.
    ///
    /// Returns immediately; decoding happens on the worker.
    pub(crate) fn load(&mut self, sequence: u64, input: Bytes) {
        self.sequence_number = Some(sequence);

        if input.is_empty() {
            self.state.store(SlotState::Empty);
            return;
        }

        let mut output = std::mem::take(&mut self.output);
        if output.len() != self.decoded_len {
            output = vec![0; self.decoded_len];
        }

        self.state.store(SlotState::Loaded);
        let job = Job {
            sequence,
            input,
            output,
        };

        match self.work_tx.send(WorkSignal::Decode(job)) {
            Ok(()) => self.in_flight = true,
            Err(err) => {
                // Worker is gone; keep the buffer and report the frame as failed.
                error!(slot = self.index, sequence, "Worker unavailable, frame dropped");
                if let WorkSignal::Decode(job) = err.into_inner() {
                    self.output = job.output;
                }
                self.state.store(SlotState::ReadyWithError);
            }
        }
    }

    /// Wait for the slot's result, if it has work outstanding.
    pub(crate) fn collect(&mut self) -> SlotResult {
        if !self.in_flight {
            return match self.state.load() {
                // Failed at load time; nothing reached the worker.
                SlotState::ReadyWithError => SlotResult::Failed {
                    sequence: self.sequence_number.unwrap_or_default(),
                    elapsed: Duration::ZERO,
                    error: FrameDecodeError::Unit("worker unavailable".to_string()),
                },
                _ => SlotResult::Empty,
            };
        }
        self.in_flight = false;

        let outcome = match self.result_rx.recv() {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(slot = self.index, "Worker exited with a frame in flight");
                self.output = vec![0; self.decoded_len];
                self.state.store(SlotState::ReadyWithError);
                return SlotResult::Failed {
                    sequence: self.sequence_number.unwrap_or_default(),
                    elapsed: Duration::ZERO,
                    error: FrameDecodeError::Unit("worker exited".to_string()),
                };
            }
        };

        self.output = outcome.output;
        match outcome.result {
            Ok(()) => SlotResult::Ready {
                sequence: outcome.sequence,
                elapsed: outcome.elapsed,
            },
            Err(error) => SlotResult::Failed {
                sequence: outcome.sequence,
                elapsed: outcome.elapsed,
                error,
            },
        }
    }

    pub(crate) fn output(&self) -> &[u8] {
        &self.output
    }

    /// Overwrite the whole output buffer with `byte`.
    pub(crate) fn fill_output(&mut self, byte: u8) -> &[u8] {
        if self.output.len() != self.decoded_len {
            self.output = vec![byte; self.decoded_len];
        } else {
            self.output.fill(byte);
        }
        &self.output
    }

    /// Stop the worker and wait up to `timeout` for it to exit.
    ///
    /// Idempotent. A frame already being decoded runs to completion first.
    pub(crate) fn terminate(&mut self, timeout: Duration) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        self.state.store(SlotState::Terminating);
        self.run.store(false, Ordering::Release);

        // A full channel already holds a job, which wakes the worker just as well.
        let _ = self.work_tx.try_send(WorkSignal::Wake);

        // The result channel disconnects once the worker has returned.
        let deadline = Instant::now() + timeout;
        loop {
            match self.result_rx.recv_deadline(deadline) {
                Ok(stale) => {
                    trace!(slot = self.index, sequence = stale.sequence, "Discarding uncollected frame");
                }
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    error!(
                        slot = self.index,
                        timeout_ms = timeout.as_millis() as u64,
                        "Worker did not exit in time, detaching"
                    );
                    return;
                }
            }
        }

        if worker.join().is_err() {
            warn!(slot = self.index, "Worker panicked while exiting");
        }
        debug!(slot = self.index, "Worker joined");
    }

    #[cfg(test)]
    pub(crate) fn is_terminated(&self) -> bool {
        self.worker.is_none()
    }
}

/// Per-slot worker loop.
///
/// Blocks on work-ready, decodes, signals result-ready. Exits when the run
/// flag is cleared or the dispatcher side disappears.
fn run_worker<U: DecodeUnit>(
    index: usize,
    mut unit: U,
    run: &AtomicBool,
    state: &StateCell,
    work_rx: &Receiver<WorkSignal>,
    result_tx: &Sender<Outcome>,
) {
    trace!(slot = index, "Worker started");

    while let Ok(signal) = work_rx.recv() {
        if !run.load(Ordering::Acquire) {
            break;
        }

        let WorkSignal::Decode(mut job) = signal else {
            continue;
        };

        state.advance(SlotState::Loaded, SlotState::Running);
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            unit.decode(&job.input, &mut job.output)
        }))
        .unwrap_or_else(|payload| Err(FrameDecodeError::Panicked(panic_message(payload.as_ref()))));
        let elapsed = started.elapsed();

        state.advance(
            SlotState::Running,
            if result.is_ok() {
                SlotState::Ready
            } else {
                SlotState::ReadyWithError
            },
        );

        let outcome = Outcome {
            sequence: job.sequence,
            output: job.output,
            result,
            elapsed,
        };
        if result_tx.send(outcome).is_err() {
            break;
        }
    }

    unit.close();
    trace!(slot = index, "Worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
