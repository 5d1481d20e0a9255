//! # Decoder Abstractions
//!
//! The bitstream decoding algorithm itself is not part of this crate. A host
//! plugs it in through two traits:
//!
//! - [`DecodeUnit`]: one decoder instance. Each slot owns exactly one for the
//!   lifetime of the pipeline and drives it from that slot's worker thread.
//! - [`DecodeUnitFactory`]: builds one unit per slot from the stream's
//!   [`UnitParameters`]. Any `Fn(usize, &UnitParameters) -> Result<U, _>`
//!   closure is a factory.
//!
//! The remaining types describe what flows in and out: the demux layer's
//! tagged [`Frame`]s, the [`StreamParameters`] fixed at initialization, and the
//! [`Collected`] result of a dispatcher round.
//!
//! ## Usage Example
//!
//! ```rust
//! use core_dst::{DecodeUnit, FrameDecodeError, UnitParameters};
//!
//! struct Passthrough;
//!
//! impl DecodeUnit for Passthrough {
//!     fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), FrameDecodeError> {
//!         let n = input.len().min(output.len());
//!         output[..n].copy_from_slice(&input[..n]);
//!         Ok(())
//!     }
//! }
//!
//! let factory = |_slot: usize, _params: &UnitParameters| Ok::<_, FrameDecodeError>(Passthrough);
//! # let _ = factory;
//! ```

use crate::error::{FrameDecodeError, InitializationError};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Stream Parameters
// ============================================================================

/// Base sampling rate all DSD rates are multiples of.
pub const BASE_SAMPLE_RATE: u32 = 44_100;

/// Base frame rate all DST frame rates are multiples of.
pub const BASE_FRAME_RATE: u32 = 75;

/// Largest channel count a DST stream can carry.
pub const MAX_CHANNELS: u16 = 6;

/// Layout of the stream being decoded, fixed for the pipeline's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamParameters {
    /// Number of audio channels (1 to 6).
    pub channel_count: u16,
    /// DSD sample rate in Hz (e.g. 2_822_400 for DSD64).
    pub sample_rate: u32,
    /// Frames per second (75 for SACD).
    pub frame_rate: u32,
}

impl StreamParameters {
    pub fn new(channel_count: u16, sample_rate: u32, frame_rate: u32) -> Self {
        Self {
            channel_count,
            sample_rate,
            frame_rate,
        }
    }

    /// Two-channel DSD64 at 75 frames per second.
    pub fn sacd_stereo() -> Self {
        Self::new(2, 64 * BASE_SAMPLE_RATE, BASE_FRAME_RATE)
    }

    /// Multichannel-area DSD64 stream.
    pub fn sacd_multichannel(channel_count: u16) -> Self {
        Self::new(channel_count, 64 * BASE_SAMPLE_RATE, BASE_FRAME_RATE)
    }

    pub fn validate(&self) -> Result<(), InitializationError> {
        if self.channel_count == 0 || self.channel_count > MAX_CHANNELS {
            return Err(InitializationError::InvalidStreamParameters(format!(
                "channel_count must be between 1 and {}, got {}",
                MAX_CHANNELS, self.channel_count
            )));
        }

        if self.sample_rate == 0 || self.sample_rate % BASE_SAMPLE_RATE != 0 {
            return Err(InitializationError::InvalidStreamParameters(format!(
                "sample_rate must be a non-zero multiple of {}, got {}",
                BASE_SAMPLE_RATE, self.sample_rate
            )));
        }

        if self.frame_rate == 0 || self.frame_rate % BASE_FRAME_RATE != 0 {
            return Err(InitializationError::InvalidStreamParameters(format!(
                "frame_rate must be a non-zero multiple of {}, got {}",
                BASE_FRAME_RATE, self.frame_rate
            )));
        }

        if self.fs44_ratio() == 0 {
            return Err(InitializationError::InvalidStreamParameters(format!(
                "sample_rate {} is too low for frame_rate {}",
                self.sample_rate, self.frame_rate
            )));
        }

        Ok(())
    }

    /// Per-unit block-size parameter: the sample rate as a multiple of
    /// 44.1 kHz, scaled down by the frame rate as a multiple of 75 fps.
    pub fn fs44_ratio(&self) -> u32 {
        (self.sample_rate / BASE_SAMPLE_RATE) / (self.frame_rate / BASE_FRAME_RATE).max(1)
    }

    /// Bytes of DSD produced by one decoded frame (all channels, 8 samples per byte).
    pub fn decoded_frame_len(&self) -> usize {
        (self.sample_rate / 8 / self.frame_rate.max(1)) as usize * self.channel_count as usize
    }

    /// Largest coded frame the stream may carry.
    pub fn max_encoded_frame_len(&self) -> usize {
        self.decoded_frame_len()
    }

    pub fn unit_parameters(&self) -> UnitParameters {
        UnitParameters {
            channel_count: self.channel_count,
            fs44_ratio: self.fs44_ratio(),
            decoded_frame_len: self.decoded_frame_len(),
        }
    }
}

/// What each decode unit is initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitParameters {
    pub channel_count: u16,
    pub fs44_ratio: u32,
    /// Exact size of the output buffer passed to every `decode` call.
    pub decoded_frame_len: usize,
}

// ============================================================================
// Decode Unit
// ============================================================================

/// One opaque decoder instance.
///
/// Not `Clone`: a unit belongs to exactly one slot and is moved
/// onto that slot's worker thread, where every call happens.
#[cfg_attr(test, mockall::automock)]
pub trait DecodeUnit: Send + 'static {
    /// Decode one coded frame into `output`.
    ///
    /// `output` is always exactly `UnitParameters::decoded_frame_len` bytes.
    /// An error marks the frame as failed; the pipeline substitutes silence
    /// and keeps using the unit for later frames.
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), FrameDecodeError>;

    /// Release resources. Called once on the worker thread as it exits.
    fn close(&mut self) {}
}

/// Builds the decode unit for each slot.
pub trait DecodeUnitFactory {
    type Unit: DecodeUnit;

    fn create(&self, slot: usize, params: &UnitParameters) -> Result<Self::Unit, FrameDecodeError>;
}

impl<F, U> DecodeUnitFactory for F
where
    F: Fn(usize, &UnitParameters) -> Result<U, FrameDecodeError>,
    U: DecodeUnit,
{
    type Unit = U;

    fn create(&self, slot: usize, params: &UnitParameters) -> Result<U, FrameDecodeError> {
        self(slot, params)
    }
}

// ============================================================================
// Frames
// ============================================================================

/// How the demux layer tagged a coded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// DST-compressed; needs the decode pipeline.
    Dst,
    /// Plain DSD; passed through untouched.
    Dsd,
    /// Placeholder for a frame that could not be read.
    Invalid,
}

/// One coded frame as produced by the demux layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub data: Bytes,
}

impl Frame {
    pub fn dst(data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Dst,
            data: data.into(),
        }
    }

    pub fn dsd(data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Dsd,
            data: data.into(),
        }
    }

    /// Placeholder for unreadable data; only its length matters.
    pub fn invalid(data: impl Into<Bytes>) -> Self {
        Self {
            kind: FrameKind::Invalid,
            data: data.into(),
        }
    }
}

// ============================================================================
// Collected Output
// ============================================================================

/// Result of one dispatcher round.
///
/// Borrows the slot's output buffer, which the dispatcher reuses once the
/// ring comes back around to that slot. Copy out anything that must outlive
/// the next `submit_and_collect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collected<'a> {
    /// A successfully decoded frame.
    Decoded(&'a [u8]),
    /// A frame that failed to decode, replaced by silence of full length.
    Silence(&'a [u8]),
    /// No output this round (pipeline fill-up or drain).
    Empty,
}

impl<'a> Collected<'a> {
    /// Output bytes, if any.
    pub fn bytes(&self) -> Option<&'a [u8]> {
        match *self {
            Collected::Decoded(bytes) | Collected::Silence(bytes) => Some(bytes),
            Collected::Empty => None,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes().map_or(0, <[u8]>::len)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Collected::Empty)
    }

    pub fn is_silence(&self) -> bool {
        matches!(self, Collected::Silence(_))
    }
}
