//! Decoder pipeline demonstration
//!
//! Pushes a synthetic track through a `StreamDecoder` with a stand-in decode
//! unit that sleeps a variable amount per frame, then checks the output
//! order and prints the pipeline counters.
//!
//! Run with:
//! ```bash
//! # Default: 4 threads, pretty logs
//! cargo run -p core-dst --example pipeline_demo
//!
//! # 8 threads, 300 frames, JSON logs
//! cargo run -p core-dst --example pipeline_demo -- 8 300 json
//!
//! # With per-frame tracing
//! RUST_LOG=core_dst=trace cargo run -p core-dst --example pipeline_demo
//! ```

use anyhow::{bail, Context};
use core_dst::{
    DecodeUnit, Frame, FrameDecodeError, PipelineConfig, StreamDecoder, StreamParameters,
    UnitParameters, DSD_SILENCE_BYTE,
};
use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};
use std::env;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

/// Every 50th frame is treated as corrupt.
const CORRUPT_EVERY: u32 = 50;

/// Stand-in for a real DST decoder: stamps the frame number into the output.
struct SimulatedUnit {
    slot: usize,
}

impl DecodeUnit for SimulatedUnit {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), FrameDecodeError> {
        let number = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
        thread::sleep(Duration::from_micros(200 + u64::from(number % 7) * 150));

        if number % CORRUPT_EVERY == CORRUPT_EVERY - 1 {
            return Err(FrameDecodeError::Corrupted(format!(
                "frame {} failed on slot {}",
                number, self.slot
            )));
        }

        output.fill(0);
        output[..4].copy_from_slice(&input[..4]);
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let threads: usize = match args.get(1) {
        Some(arg) => arg.parse().context("thread count must be a number")?,
        None => 4,
    };
    let frames: u32 = match args.get(2) {
        Some(arg) => arg.parse().context("frame count must be a number")?,
        None => 150,
    };
    let format = match args.get(3).map(String::as_str) {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => LogFormat::Pretty,
    };

    let mut logging = LoggingConfig::default()
        .with_format(format)
        .with_level(LogLevel::Debug)
        .with_thread_info(true);
    if let Ok(filter) = env::var("RUST_LOG") {
        logging = logging.with_filter(filter);
    }
    init_logging(logging)?;

    let config = PipelineConfig {
        decoder_threads: threads,
        ..Default::default()
    };
    run(config, frames)
}

#[instrument(skip(config), fields(threads = config.decoder_threads))]
fn run(config: PipelineConfig, frames: u32) -> anyhow::Result<()> {
    let params = StreamParameters::sacd_stereo();
    let factory = |slot: usize, _: &UnitParameters| Ok::<_, FrameDecodeError>(SimulatedUnit { slot });
    let mut decoder = StreamDecoder::new(config, params, factory)?;

    let started = Instant::now();
    let mut output = Vec::with_capacity(frames as usize);
    for number in 0..frames {
        let mut coded = vec![0u8; 64];
        coded[..4].copy_from_slice(&number.to_be_bytes());
        output.extend(decoder.push(Frame::dst(coded))?);
    }

    let stats = decoder
        .pipeline_stats()
        .cloned()
        .context("pipeline never started")?;
    output.extend(decoder.finish()?);
    let elapsed = started.elapsed();

    if output.len() != frames as usize {
        bail!("expected {} frames, got {}", frames, output.len());
    }

    let mut silent = 0;
    for (expected, frame) in (0..frames).zip(&output) {
        if frame.iter().all(|&b| b == DSD_SILENCE_BYTE) {
            silent += 1;
            continue;
        }
        let number = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
        if number != expected {
            bail!("frame {} arrived in position {}", number, expected);
        }
    }
    if silent == 0 && frames >= CORRUPT_EVERY {
        warn!("No corrupt frames were substituted");
    }

    info!(
        frames,
        silent,
        elapsed_ms = elapsed.as_millis() as u64,
        avg_decode_us = stats.avg_decode_time().as_micros() as u64,
        error_rate = stats.error_rate(),
        "All frames delivered in order"
    );
    Ok(())
}
