//! # Parallel Frame-Decoding Pipeline
//!
//! A fixed ring of slots fed round-robin by a single dispatcher thread.
//!
//! ## Ordering
//!
//! Every call loads the slot at `next_slot` and then collects from the slot
//! right after it, which is the one loaded `pool_size - 1` calls earlier.
//! Output order is therefore structural: frame *k* always comes back on call
//! *k + pool_size - 1*, however long each worker takes.
//!
//! ```text
//! pool_size = 3        call:  0    1    2    3    4    5    6
//!   submit to slot:           0    1    2    0    1    2    0
//!   collect from slot:        1    2    0    1    2    0    1
//!   returns:                  -    -    F0   F1   F2   F3   F4
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bytes::Bytes;
//! use core_dst::{Collected, DecodeUnit, FrameDecodeError, Pipeline, StreamParameters, UnitParameters};
//!
//! struct Fill;
//!
//! impl DecodeUnit for Fill {
//!     fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), FrameDecodeError> {
//!         output.fill(input[0]);
//!         Ok(())
//!     }
//! }
//!
//! let params = StreamParameters::sacd_stereo();
//! let mut pipeline = Pipeline::initialize(2, &params, |_: usize, _: &UnitParameters| {
//!     Ok::<_, FrameDecodeError>(Fill)
//! })?;
//!
//! assert!(pipeline.submit_and_collect(Bytes::from_static(&[1]))?.is_empty());
//! let first = pipeline.submit_and_collect(Bytes::from_static(&[2]))?;
//! assert_eq!(first.bytes().map(|b| b[0]), Some(1));
//!
//! let mut rest = Vec::new();
//! pipeline.drain(|frame| rest.push(frame[0]))?;
//! assert_eq!(rest, vec![2]);
//!
//! pipeline.shutdown();
//! # Ok::<(), core_dst::DstError>(())
//! ```

use crate::config::{PipelineConfig, PipelineStats};
use crate::error::{DstError, InitializationError, Result};
use crate::slot::{Slot, SlotResult, SlotState};
use crate::traits::{Collected, DecodeUnitFactory, StreamParameters};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Byte written in place of a frame that failed to decode.
pub const DSD_SILENCE_BYTE: u8 = 0x69;

/// The slot pool together with its dispatcher/collector state.
///
/// Created once per stream and dropped (or [`shutdown`](Self::shutdown))
/// when the stream ends. Not `Clone`: it owns every worker and decode unit.
pub struct Pipeline {
    slots: Vec<Slot>,
    params: StreamParameters,
    next_slot: usize,
    frame_number: u64,
    join_timeout: Duration,
    stats: PipelineStats,
    shut_down: bool,
}

impl Pipeline {
    /// Build `pool_size` slots, each with its own decode unit and worker.
    ///
    /// Decode units are created and initialized here, on the caller's thread,
    /// and then moved to their workers. If any unit or thread fails, the
    /// workers already started are shut down before the error is returned.
    pub fn initialize<F>(
        pool_size: usize,
        params: &StreamParameters,
        factory: F,
    ) -> std::result::Result<Self, InitializationError>
    where
        F: DecodeUnitFactory,
    {
        let config = PipelineConfig {
            decoder_threads: pool_size,
            ..Default::default()
        };
        Self::with_config(&config, params, factory)
    }

    /// Like [`initialize`](Self::initialize), taking the pool size and join
    /// timeout from `config`.
    pub fn with_config<F>(
        config: &PipelineConfig,
        params: &StreamParameters,
        factory: F,
    ) -> std::result::Result<Self, InitializationError>
    where
        F: DecodeUnitFactory,
    {
        config.validate()?;
        params.validate()?;

        let unit_params = params.unit_parameters();
        let mut pipeline = Self {
            slots: Vec::with_capacity(config.decoder_threads),
            params: *params,
            next_slot: 0,
            frame_number: 0,
            join_timeout: config.join_timeout,
            stats: PipelineStats::default(),
            shut_down: false,
        };

        // On any early return `pipeline` drops and stops the slots built so far.
        for index in 0..config.decoder_threads {
            let unit = factory.create(index, &unit_params).map_err(|source| {
                error!(slot = index, error = %source, "Could not initialize decoder slot");
                InitializationError::DecodeUnit {
                    slot: index,
                    source,
                }
            })?;

            let slot = Slot::spawn(index, unit, unit_params.decoded_frame_len).map_err(|err| {
                error!(slot = index, error = %err, "Could not start decoder thread");
                err
            })?;
            pipeline.slots.push(slot);
        }

        debug!(
            pool_size = config.decoder_threads,
            channels = params.channel_count,
            sample_rate = params.sample_rate,
            frame_rate = params.frame_rate,
            fs44_ratio = unit_params.fs44_ratio,
            "Decoder pipeline initialized"
        );

        Ok(pipeline)
    }

    /// Submit one coded frame and collect the result that is due this round.
    ///
    /// An empty `frame` submits nothing and only collects; use it to drain
    /// the pipeline at end of stream. A frame that failed to decode comes
    /// back as [`Collected::Silence`] of full length instead of an error.
    ///
    /// The returned slice stays valid until the next call.
    ///
    /// # Errors
    ///
    /// - [`DstError::FrameTooLarge`] if `frame` exceeds the stream's maximum
    ///   coded frame size; no slot is touched.
    /// - [`DstError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub fn submit_and_collect(&mut self, frame: Bytes) -> Result<Collected<'_>> {
        if self.shut_down {
            return Err(DstError::ShutDown);
        }

        let max = self.params.max_encoded_frame_len();
        if frame.len() > max {
            return Err(DstError::FrameTooLarge {
                len: frame.len(),
                max,
            });
        }

        let pool_size = self.slots.len();
        let sequence = self.frame_number;
        self.frame_number += 1;

        // Load
        let submit_index = self.next_slot;
        if frame.is_empty() {
            self.stats.flush_rounds += 1;
        } else {
            self.stats.frames_submitted += 1;
        }
        trace!(slot = submit_index, sequence, len = frame.len(), "Submitting frame");
        self.slots[submit_index].load(sequence, frame);

        // Advance to the oldest slot and collect from it
        self.next_slot = (self.next_slot + 1) % pool_size;
        let collect_index = self.next_slot;
        let slot = &mut self.slots[collect_index];

        match slot.collect() {
            SlotResult::Empty => {
                self.stats.empty_collections += 1;
                Ok(Collected::Empty)
            }
            SlotResult::Ready { sequence, elapsed } => {
                trace!(slot = collect_index, sequence, ?elapsed, "Collected frame");
                self.stats.frames_decoded += 1;
                self.stats.total_decode_time += elapsed;
                Ok(Collected::Decoded(slot.output()))
            }
            SlotResult::Failed {
                sequence,
                elapsed,
                error,
            } => {
                warn!(
                    slot = collect_index,
                    sequence,
                    error = %error,
                    "Frame decode failed, substituting silence"
                );
                self.stats.frames_failed += 1;
                self.stats.total_decode_time += elapsed;
                Ok(Collected::Silence(slot.fill_output(DSD_SILENCE_BYTE)))
            }
        }
    }

    /// Flush every frame still in flight, oldest first.
    ///
    /// Runs `pool_size` empty rounds and hands each non-empty result to
    /// `sink`. Returns how many frames were delivered. The pipeline stays
    /// usable afterwards.
    pub fn drain<S>(&mut self, mut sink: S) -> Result<usize>
    where
        S: FnMut(&[u8]),
    {
        let mut delivered = 0;
        for _ in 0..self.slots.len() {
            if let Some(bytes) = self.submit_and_collect(Bytes::new())?.bytes() {
                sink(bytes);
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Stop every worker and release the decode units.
    ///
    /// Idempotent and safe at any point, including before the first frame
    /// and with frames in flight (those finish decoding and are discarded).
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for slot in &mut self.slots {
            slot.terminate(self.join_timeout);
        }

        debug!(
            pool_size = self.slots.len(),
            frames_submitted = self.stats.frames_submitted,
            frames_failed = self.stats.frames_failed,
            "Decoder pipeline shut down"
        );
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next frame will be loaded into.
    pub fn next_slot(&self) -> usize {
        self.next_slot
    }

    /// Number of `submit_and_collect` calls made so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn stream_parameters(&self) -> &StreamParameters {
        &self.params
    }

    /// Current state of every slot, in ring order.
    pub fn slot_states(&self) -> Vec<SlotState> {
        self.slots.iter().map(Slot::state).collect()
    }

    /// Sequence number of the last frame loaded into each slot.
    pub fn slot_sequence_numbers(&self) -> Vec<Option<u64>> {
        self.slots.iter().map(Slot::sequence_number).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        // Partially built pools are never marked shut down, so their
        // started workers are stopped here as well.
        self.shutdown();
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pool_size", &self.slots.len())
            .field("params", &self.params)
            .field("next_slot", &self.next_slot)
            .field("frame_number", &self.frame_number)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}
