//! # DST Decoding Module
//!
//! Parallel frame decoding for DST-compressed DSD streams.
//!
//! ## Overview
//!
//! This module handles:
//! - A fixed pool of decoder slots, each with its own worker thread
//! - Round-robin dispatch with strictly ordered collection
//! - Silence substitution for frames that fail to decode
//! - Routing of DST, plain DSD and invalid frames for one track
//!
//! The DST bitstream decoder itself is supplied by the host through
//! [`DecodeUnit`] and [`DecodeUnitFactory`].

pub mod bits;
pub mod config;
pub mod error;
pub mod pipeline;
mod slot;
pub mod stream;
pub mod traits;

pub use config::{PipelineConfig, PipelineStats, MAX_DECODER_THREADS};
pub use error::{DstError, FrameDecodeError, InitializationError, Result};
pub use pipeline::{Pipeline, DSD_SILENCE_BYTE};
pub use slot::SlotState;
pub use stream::{FrameCounts, StreamDecoder, DSD_IDLE_BYTE};
pub use traits::{
    Collected, DecodeUnit, DecodeUnitFactory, Frame, FrameKind, StreamParameters, UnitParameters,
};
