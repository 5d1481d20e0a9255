//! # Decoder Error Types
//!
//! Two tiers of failure exist in the pipeline:
//!
//! - [`InitializationError`]: a decode unit or worker thread could not be
//!   started. Fatal for the stream; the caller must abort decoding it.
//! - [`FrameDecodeError`]: one frame failed to decode. Captured on the
//!   worker, never crosses the thread boundary as an error, and is turned into
//!   a silence frame by the collector.

use std::io;
use thiserror::Error;

/// Errors raised while building the slot pool.
#[derive(Error, Debug)]
pub enum InitializationError {
    /// Stream parameters cannot describe a decodable stream.
    #[error("Invalid stream parameters: {0}")]
    InvalidStreamParameters(String),

    /// A slot's decode unit failed to initialize.
    #[error("Decode unit for slot {slot} failed to initialize: {source}")]
    DecodeUnit {
        slot: usize,
        #[source]
        source: FrameDecodeError,
    },

    /// The worker thread for a slot could not be spawned.
    #[error("Could not start worker thread for slot {slot}: {source}")]
    WorkerSpawn {
        slot: usize,
        #[source]
        source: io::Error,
    },

    /// Pipeline configuration is out of range.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single decode unit invocation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameDecodeError {
    /// The coded frame is malformed.
    #[error("Corrupted frame: {0}")]
    Corrupted(String),

    /// The decode unit reported an internal failure.
    #[error("Decode unit error: {0}")]
    Unit(String),

    /// The decode unit panicked while decoding.
    #[error("Decode unit panicked: {0}")]
    Panicked(String),
}

/// Errors surfaced by the pipeline and stream decoder.
#[derive(Error, Debug)]
pub enum DstError {
    #[error(transparent)]
    Initialization(#[from] InitializationError),

    /// Settings block could not be read.
    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),

    /// A coded frame is larger than any frame of this stream can be.
    #[error("Frame of {len} bytes exceeds the maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// Operation attempted after `shutdown()`.
    #[error("Pipeline has been shut down")]
    ShutDown,
}

impl DstError {
    /// Returns `true` if decoding of the stream cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DstError::Initialization(_) | DstError::Config(_) | DstError::ShutDown
        )
    }
}

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, DstError>;
