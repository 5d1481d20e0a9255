//! # Pipeline Configuration
//!
//! Configuration and statistics types for the parallel frame decoder.

use crate::error::{InitializationError, Result};
use core_runtime::ConfigBlock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound on worker threads per stream.
pub const MAX_DECODER_THREADS: usize = 64;

/// Pipeline configuration.
///
/// Controls parallelism (and with it the pipeline depth), output bit order
/// and how long shutdown waits for each worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of slots, i.e. worker threads and frames in flight.
    ///
    /// Also the pipeline depth: the first `decoder_threads - 1` submissions
    /// of a stream produce no output.
    ///
    /// Default: 8.
    #[serde(default = "default_decoder_threads")]
    pub decoder_threads: usize,

    /// Emit DSD bytes least-significant bit first.
    ///
    /// Default: false (DSD is stored MSB first).
    #[serde(default)]
    pub lsb_first: bool,

    /// Maximum time to wait for one worker to exit during shutdown.
    ///
    /// A worker that overruns this is logged and detached.
    ///
    /// Default: 5 seconds.
    #[serde(default = "default_join_timeout")]
    pub join_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decoder_threads: default_decoder_threads(),
            lsb_first: false,
            join_timeout: default_join_timeout(),
        }
    }
}

impl PipelineConfig {
    /// Two slots: one frame of added latency, minimal thread count.
    pub fn low_latency() -> Self {
        Self {
            decoder_threads: 2,
            ..Default::default()
        }
    }

    /// One slot per available CPU, clamped to [`MAX_DECODER_THREADS`].
    pub fn from_available_parallelism() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|_| default_decoder_threads());
        Self {
            decoder_threads: threads.clamp(1, MAX_DECODER_THREADS),
            ..Default::default()
        }
    }

    /// Read the decoder's plugin settings block.
    ///
    /// Recognized keys: `dstdec_threads`, `lsbitfirst`, `join_timeout_ms`.
    pub fn from_block(block: &ConfigBlock) -> Result<Self> {
        let join_timeout_ms: u64 = block.get_value(
            "join_timeout_ms",
            default_join_timeout().as_millis() as u64,
        )?;
        let config = Self {
            decoder_threads: block.get_value("dstdec_threads", default_decoder_threads())?,
            lsb_first: block.get_value("lsbitfirst", false)?,
            join_timeout: Duration::from_millis(join_timeout_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> std::result::Result<(), InitializationError> {
        if self.decoder_threads == 0 {
            return Err(InitializationError::InvalidConfig(
                "decoder_threads must be > 0".to_string(),
            ));
        }

        if self.decoder_threads > MAX_DECODER_THREADS {
            return Err(InitializationError::InvalidConfig(format!(
                "decoder_threads must be <= {}",
                MAX_DECODER_THREADS
            )));
        }

        if self.join_timeout.is_zero() {
            return Err(InitializationError::InvalidConfig(
                "join_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_decoder_threads() -> usize {
    8
}

fn default_join_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Counters kept by the dispatcher.
///
/// Updated only on the dispatcher thread from what the collector observes,
/// so workers never share state with each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    /// Frames handed to a worker.
    pub frames_submitted: u64,
    /// Frames collected in the READY state.
    pub frames_decoded: u64,
    /// Frames collected in the READY_WITH_ERROR state (replaced by silence).
    pub frames_failed: u64,
    /// Calls made with an empty frame (fill-up is not counted, drain is).
    pub flush_rounds: u64,
    /// Calls that returned no output.
    pub empty_collections: u64,
    /// Sum of worker-side decode time over all collected frames.
    pub total_decode_time: Duration,
}

impl PipelineStats {
    /// Fraction of collected frames that failed to decode (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        let collected = self.frames_decoded + self.frames_failed;
        if collected == 0 {
            return 0.0;
        }
        self.frames_failed as f64 / collected as f64
    }

    /// Mean worker-side decode time per collected frame.
    pub fn avg_decode_time(&self) -> Duration {
        let collected = self.frames_decoded + self.frames_failed;
        if collected == 0 {
            return Duration::ZERO;
        }
        self.total_decode_time / collected as u32
    }

    /// Frames submitted but not yet collected.
    pub fn in_flight(&self) -> u64 {
        self.frames_submitted - self.frames_decoded - self.frames_failed
    }
}
