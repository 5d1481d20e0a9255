//! Integration tests for the parallel decode pipeline

use bytes::Bytes;
use core_dst::{
    Collected, DecodeUnit, DstError, FrameDecodeError, InitializationError, Pipeline,
    PipelineConfig, SlotState, StreamParameters, UnitParameters, DSD_SILENCE_BYTE,
};
use core_runtime::ConfigBlock;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Fills the output with the frame's first byte, after a delay derived from it.
struct MarkerUnit {
    closed: Arc<AtomicUsize>,
    jitter: bool,
}

impl DecodeUnit for MarkerUnit {
    fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Result<(), FrameDecodeError> {
        let marker = input[0];
        if self.jitter {
            thread::sleep(Duration::from_millis(u64::from(marker.wrapping_mul(7) % 5)));
        }
        if input.len() > 1 && input[1] == 0xFF {
            return Err(FrameDecodeError::Corrupted(format!("frame {}", marker)));
        }
        if input.len() > 1 && input[1] == 0xEE {
            panic!("decoder fault on frame {}", marker);
        }
        output.fill(marker);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sleeps for a fixed time on every frame.
struct SlowUnit {
    delay: Duration,
    closed: Arc<AtomicUsize>,
}

impl DecodeUnit for SlowUnit {
    fn decode(&mut self, _input: &[u8], output: &mut [u8]) -> Result<(), FrameDecodeError> {
        thread::sleep(self.delay);
        output.fill(1);
        Ok(())
    }

    fn close(&mut self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    closed: Arc<AtomicUsize>,
    created: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        Self {
            closed: Arc::new(AtomicUsize::new(0)),
            created: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn factory(
        &self,
        jitter: bool,
    ) -> impl Fn(usize, &UnitParameters) -> Result<MarkerUnit, FrameDecodeError> {
        let closed = Arc::clone(&self.closed);
        let created = Arc::clone(&self.created);
        move |_slot: usize, _params: &UnitParameters| {
            created.fetch_add(1, Ordering::SeqCst);
            Ok(MarkerUnit {
                closed: Arc::clone(&closed),
                jitter,
            })
        }
    }

    fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

fn params() -> StreamParameters {
    StreamParameters::sacd_stereo()
}

fn frame(marker: u8) -> Bytes {
    Bytes::from(vec![marker, 0])
}

fn marker_of(collected: Collected<'_>) -> Option<u8> {
    collected.bytes().map(|bytes| bytes[0])
}

#[test]
fn test_output_order_matches_input_order() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(4, &params(), harness.factory(true)).unwrap();

    let mut markers = Vec::new();
    for n in 0..40u8 {
        if let Some(marker) = marker_of(pipeline.submit_and_collect(frame(n)).unwrap()) {
            markers.push(marker);
        }
    }
    pipeline.drain(|bytes| markers.push(bytes[0])).unwrap();

    assert_eq!(markers, (0..40u8).collect::<Vec<_>>());
    assert_eq!(pipeline.stats().frames_decoded, 40);
    assert_eq!(pipeline.stats().in_flight(), 0);
}

#[test]
fn test_two_slot_walkthrough() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(2, &params(), harness.factory(false)).unwrap();

    assert_eq!(marker_of(pipeline.submit_and_collect(frame(0)).unwrap()), None);
    assert_eq!(marker_of(pipeline.submit_and_collect(frame(1)).unwrap()), Some(0));
    assert_eq!(marker_of(pipeline.submit_and_collect(frame(2)).unwrap()), Some(1));
    assert_eq!(marker_of(pipeline.submit_and_collect(frame(3)).unwrap()), Some(2));

    let mut tail = Vec::new();
    assert_eq!(pipeline.drain(|bytes| tail.push(bytes[0])).unwrap(), 1);
    assert_eq!(tail, vec![3]);
}

#[test]
fn test_drain_delivers_only_in_flight_frames() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(5, &params(), harness.factory(true)).unwrap();

    for n in 0..2u8 {
        assert!(pipeline.submit_and_collect(frame(n)).unwrap().is_empty());
    }

    let mut tail = Vec::new();
    assert_eq!(pipeline.drain(|bytes| tail.push(bytes[0])).unwrap(), 2);
    assert_eq!(tail, vec![0, 1]);

    // Nothing left after a full drain
    assert_eq!(pipeline.drain(|_| panic!("pipeline should be empty")).unwrap(), 0);
}

#[test]
fn test_pipeline_reusable_after_drain() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(3, &params(), harness.factory(false)).unwrap();

    for n in 0..4u8 {
        pipeline.submit_and_collect(frame(n)).unwrap();
    }
    pipeline.drain(|_| {}).unwrap();

    let mut markers = Vec::new();
    for n in 10..16u8 {
        if let Some(marker) = marker_of(pipeline.submit_and_collect(frame(n)).unwrap()) {
            markers.push(marker);
        }
    }
    pipeline.drain(|bytes| markers.push(bytes[0])).unwrap();
    assert_eq!(markers, (10..16u8).collect::<Vec<_>>());
}

#[test]
fn test_failed_frame_keeps_its_position() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(3, &params(), harness.factory(true)).unwrap();
    let frame_len = params().decoded_frame_len();

    let mut outputs: Vec<Vec<u8>> = Vec::new();
    for n in 0..6u8 {
        let input = if n == 2 {
            Bytes::from(vec![n, 0xFF])
        } else {
            frame(n)
        };
        if let Some(bytes) = pipeline.submit_and_collect(input).unwrap().bytes() {
            outputs.push(bytes.to_vec());
        }
    }
    pipeline.drain(|bytes| outputs.push(bytes.to_vec())).unwrap();

    assert_eq!(outputs.len(), 6);
    assert!(outputs.iter().all(|out| out.len() == frame_len));
    assert!(outputs[2].iter().all(|&b| b == DSD_SILENCE_BYTE));
    for (n, out) in outputs.iter().enumerate().filter(|(n, _)| *n != 2) {
        assert!(out.iter().all(|&b| b == n as u8), "frame {} corrupted", n);
    }
    assert_eq!(pipeline.stats().frames_failed, 1);
    assert_eq!(pipeline.stats().frames_decoded, 5);
}

#[test]
fn test_panicking_unit_yields_silence_and_recovers() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(1, &params(), harness.factory(false)).unwrap();

    let collected = pipeline.submit_and_collect(Bytes::from(vec![1u8, 0xEE])).unwrap();
    assert!(collected.is_silence());
    assert_eq!(collected.len(), params().decoded_frame_len());

    let collected = pipeline.submit_and_collect(frame(2)).unwrap();
    assert_eq!(marker_of(collected), Some(2));
    assert!(!collected.is_silence());
}

#[test]
fn test_shutdown_before_first_frame() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(4, &params(), harness.factory(false)).unwrap();

    pipeline.shutdown();
    assert_eq!(harness.closed(), 4);

    pipeline.shutdown();
    drop(pipeline);
    assert_eq!(harness.closed(), 4);
}

#[test]
fn test_shutdown_with_frames_in_flight() {
    let harness = Harness::new();
    let mut pipeline = Pipeline::initialize(4, &params(), harness.factory(true)).unwrap();

    for n in 0..3u8 {
        pipeline.submit_and_collect(frame(n)).unwrap();
    }
    assert_eq!(pipeline.stats().in_flight(), 3);

    pipeline.shutdown();
    assert_eq!(harness.closed(), 4);
    assert!(pipeline
        .slot_states()
        .iter()
        .all(|state| *state == SlotState::Terminating));
    assert!(matches!(
        pipeline.drain(|_| {}),
        Err(DstError::ShutDown)
    ));
}

#[test]
fn test_shutdown_mid_decode_marks_every_slot_terminating() {
    let harness = Harness::new();
    let slow = {
        let closed = Arc::clone(&harness.closed);
        move |_: usize, _: &UnitParameters| {
            Ok::<_, FrameDecodeError>(SlowUnit {
                delay: Duration::from_millis(50),
                closed: Arc::clone(&closed),
            })
        }
    };
    let mut pipeline = Pipeline::initialize(2, &params(), slow).unwrap();

    pipeline.submit_and_collect(frame(1)).unwrap();
    thread::sleep(Duration::from_millis(5));
    pipeline.shutdown();

    assert_eq!(pipeline.slot_states(), vec![SlotState::Terminating; 2]);
    assert_eq!(harness.closed(), 2);
}

#[test]
fn test_shutdown_detaches_worker_past_join_timeout() {
    let closed = Arc::new(AtomicUsize::new(0));
    let slow = {
        let closed = Arc::clone(&closed);
        move |_: usize, _: &UnitParameters| {
            Ok::<_, FrameDecodeError>(SlowUnit {
                delay: Duration::from_millis(200),
                closed: Arc::clone(&closed),
            })
        }
    };
    let config = PipelineConfig {
        decoder_threads: 2,
        join_timeout: Duration::from_millis(10),
        ..Default::default()
    };
    let mut pipeline = Pipeline::with_config(&config, &params(), slow).unwrap();

    pipeline.submit_and_collect(frame(1)).unwrap();
    thread::sleep(Duration::from_millis(5));

    let started = Instant::now();
    pipeline.shutdown();
    assert!(started.elapsed() < Duration::from_millis(150));
    assert!(pipeline.is_shut_down());
    assert_eq!(pipeline.slot_states(), vec![SlotState::Terminating; 2]);

    // The busy worker was left behind; only the idle one has closed.
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    pipeline.shutdown();
    assert!(started.elapsed() < Duration::from_millis(10));
    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_stops_workers() {
    let harness = Harness::new();
    {
        let mut pipeline = Pipeline::initialize(3, &params(), harness.factory(false)).unwrap();
        pipeline.submit_and_collect(frame(9)).unwrap();
    }
    assert_eq!(harness.closed(), 3);
}

#[test]
fn test_init_failure_releases_started_units() {
    let closed = Arc::new(AtomicUsize::new(0));
    let attempts = Arc::new(Mutex::new(Vec::new()));

    let factory = {
        let closed = Arc::clone(&closed);
        let attempts = Arc::clone(&attempts);
        move |slot: usize, _: &UnitParameters| {
            attempts.lock().push(slot);
            if slot == 2 {
                return Err(FrameDecodeError::Unit("tables unavailable".into()));
            }
            Ok(MarkerUnit {
                closed: Arc::clone(&closed),
                jitter: false,
            })
        }
    };

    let err = Pipeline::initialize(4, &params(), factory).unwrap_err();
    assert!(matches!(err, InitializationError::DecodeUnit { slot: 2, .. }));
    assert_eq!(*attempts.lock(), vec![0, 1, 2]);
    assert_eq!(closed.load(Ordering::SeqCst), 2);
}

#[test]
fn test_pipeline_from_settings_block() {
    let block = ConfigBlock::new("dsdiff")
        .with_value("dstdec_threads", 3)
        .unwrap()
        .with_value("join_timeout_ms", 500)
        .unwrap();
    let config = PipelineConfig::from_block(&block).unwrap();

    let harness = Harness::new();
    let pipeline = Pipeline::with_config(&config, &params(), harness.factory(false)).unwrap();
    assert_eq!(pipeline.pool_size(), 3);
    assert_eq!(harness.created(), 3);
}

#[test]
fn test_multichannel_frame_length() {
    let harness = Harness::new();
    let params = StreamParameters::sacd_multichannel(6);
    let mut pipeline = Pipeline::initialize(1, &params, harness.factory(false)).unwrap();

    let collected = pipeline.submit_and_collect(frame(4)).unwrap();
    assert_eq!(collected.len(), params.decoded_frame_len());
    assert_eq!(collected.len(), 4704 * 6);
}
