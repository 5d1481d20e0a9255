//! # Stream Decoder
//!
//! Routes the demux layer's tagged frames for one track:
//!
//! | Frame kind | Output |
//! |------------|--------|
//! | `Dst`      | decoded through the [`Pipeline`], `pool_size - 1` frames later |
//! | `Dsd`      | passed through as-is |
//! | `Invalid`  | one full frame of the DSD idle pattern (`0xAA`) |
//!
//! The pipeline is created on the first `Dst` frame, so plain DSD tracks
//! never start worker threads. Every emitted buffer is bit-reversed when the
//! configuration asks for LSB-first output.
//!
//! `Dsd` and `Invalid` frames are emitted immediately, ahead of any `Dst`
//! frames still in the pipeline. Streams mix kinds only around damaged
//! areas, where this reordering stays inaudible.

use crate::bits::reverse_bits_in_place;
use crate::config::{PipelineConfig, PipelineStats};
use crate::error::{DstError, Result};
use crate::pipeline::Pipeline;
use crate::traits::{DecodeUnitFactory, Frame, FrameKind, StreamParameters};
use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

/// Byte pattern of DSD digital silence ("idle" pattern).
pub const DSD_IDLE_BYTE: u8 = 0xAA;

/// How many frames of each kind a stream decoder has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCounts {
    pub dst: u64,
    pub dsd: u64,
    pub invalid: u64,
    /// Zero-length frames, which produce no output.
    pub skipped: u64,
    /// `Dst` frames the pipeline refused, such as oversized ones.
    pub rejected: u64,
}

/// Frame router for one track.
pub struct StreamDecoder<F: DecodeUnitFactory> {
    config: PipelineConfig,
    params: StreamParameters,
    /// Consumed when the pipeline is created.
    factory: Option<F>,
    pipeline: Option<Pipeline>,
    counts: FrameCounts,
    finished: bool,
}

impl<F: DecodeUnitFactory> StreamDecoder<F> {
    /// Validate the configuration and stream layout. No threads are started.
    pub fn new(config: PipelineConfig, params: StreamParameters, factory: F) -> Result<Self> {
        config.validate()?;
        params.validate()?;

        Ok(Self {
            config,
            params,
            factory: Some(factory),
            pipeline: None,
            counts: FrameCounts::default(),
            finished: false,
        })
    }

    /// Route one frame, returning the output due now, if any.
    ///
    /// # Errors
    ///
    /// - [`DstError::Initialization`] if the pipeline could not be started;
    ///   the track cannot be decoded.
    /// - [`DstError::FrameTooLarge`] for an oversized `Dst` frame; the frame
    ///   is dropped and the stream may continue.
    /// - [`DstError::ShutDown`] after [`finish`](Self::finish) or a failed
    ///   pipeline start.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Bytes>> {
        if self.finished {
            return Err(DstError::ShutDown);
        }

        if frame.data.is_empty() {
            self.counts.skipped += 1;
            return Ok(None);
        }

        let lsb_first = self.config.lsb_first;
        match frame.kind {
            FrameKind::Dst => {
                let pipeline = self.ensure_pipeline()?;
                let result = pipeline.submit_and_collect(frame.data);
                let collected = match result {
                    Ok(collected) => collected,
                    Err(err) => {
                        self.counts.rejected += 1;
                        return Err(err);
                    }
                };
                let out = collected.bytes().map(|bytes| emit(bytes, lsb_first));
                self.counts.dst += 1;
                Ok(out)
            }
            FrameKind::Dsd => {
                self.counts.dsd += 1;
                if lsb_first {
                    Ok(Some(emit(&frame.data, true)))
                } else {
                    Ok(Some(frame.data))
                }
            }
            FrameKind::Invalid => {
                self.counts.invalid += 1;
                trace!(len = frame.data.len(), "Replacing invalid frame with idle pattern");
                let idle = vec![DSD_IDLE_BYTE; self.params.decoded_frame_len()];
                Ok(Some(emit(&idle, lsb_first)))
            }
        }
    }

    /// End of track: flush every frame still in the pipeline and stop it.
    ///
    /// Returns the flushed frames in order. Calling it again returns nothing.
    pub fn finish(&mut self) -> Result<Vec<Bytes>> {
        self.finished = true;

        let mut tail = Vec::new();
        if let Some(mut pipeline) = self.pipeline.take() {
            let lsb_first = self.config.lsb_first;
            let flushed = pipeline.drain(|bytes| tail.push(emit(bytes, lsb_first)))?;
            pipeline.shutdown();
            debug!(flushed, counts = ?self.counts, "Stream finished");
        }
        Ok(tail)
    }

    /// Returns `true` once a `Dst` frame has started the pipeline.
    pub fn is_dst_active(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Pipeline counters, while the pipeline is running.
    pub fn pipeline_stats(&self) -> Option<&PipelineStats> {
        self.pipeline.as_ref().map(Pipeline::stats)
    }

    pub fn frame_counts(&self) -> FrameCounts {
        self.counts
    }

    pub fn stream_parameters(&self) -> &StreamParameters {
        &self.params
    }

    fn ensure_pipeline(&mut self) -> Result<&mut Pipeline> {
        if self.pipeline.is_none() {
            let factory = self.factory.take().ok_or(DstError::ShutDown)?;
            debug!(
                threads = self.config.decoder_threads,
                "DST frames detected, starting decoder pipeline"
            );
            match Pipeline::with_config(&self.config, &self.params, factory) {
                Ok(pipeline) => self.pipeline = Some(pipeline),
                Err(err) => {
                    self.finished = true;
                    return Err(err.into());
                }
            }
        }
        self.pipeline.as_mut().ok_or(DstError::ShutDown)
    }
}

fn emit(bytes: &[u8], lsb_first: bool) -> Bytes {
    let mut out = BytesMut::from(bytes);
    if lsb_first {
        reverse_bits_in_place(&mut out);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FrameDecodeError;
    use crate::traits::{MockDecodeUnit, UnitParameters};

    type UnitResult = std::result::Result<MockDecodeUnit, FrameDecodeError>;

    fn never_called(_: usize, _: &UnitParameters) -> UnitResult {
        panic!("pipeline must not start for plain DSD");
    }

    fn refusing(_: usize, _: &UnitParameters) -> UnitResult {
        Err(FrameDecodeError::Unit("unsupported".into()))
    }

    fn decoder<F: DecodeUnitFactory>(lsb_first: bool, factory: F) -> StreamDecoder<F> {
        let config = PipelineConfig {
            decoder_threads: 2,
            lsb_first,
            ..Default::default()
        };
        StreamDecoder::new(config, StreamParameters::sacd_stereo(), factory).unwrap()
    }

    #[test]
    fn test_dsd_passes_through_without_pipeline() {
        let mut stream = decoder(false, never_called);
        let out = stream.push(Frame::dsd(vec![1u8, 2, 3])).unwrap();
        assert_eq!(out.as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(!stream.is_dst_active());
        assert!(stream.finish().unwrap().is_empty());
    }

    #[test]
    fn test_lsb_first_reverses_pass_through() {
        let mut stream = decoder(true, never_called);
        let out = stream.push(Frame::dsd(vec![0x01u8, 0x80])).unwrap();
        assert_eq!(out.as_deref(), Some(&[0x80u8, 0x01][..]));
    }

    #[test]
    fn test_invalid_frame_becomes_idle_pattern() {
        let mut stream = decoder(false, never_called);
        let out = stream.push(Frame::invalid(vec![0u8; 10])).unwrap().unwrap();
        assert_eq!(out.len(), StreamParameters::sacd_stereo().decoded_frame_len());
        assert!(out.iter().all(|&b| b == DSD_IDLE_BYTE));
        assert_eq!(stream.frame_counts().invalid, 1);
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let mut stream = decoder(false, never_called);
        assert_eq!(stream.push(Frame::dst(Bytes::new())).unwrap(), None);
        assert_eq!(stream.push(Frame::invalid(Bytes::new())).unwrap(), None);
        assert_eq!(stream.frame_counts().skipped, 2);
        assert!(!stream.is_dst_active());
    }

    #[test]
    fn test_pipeline_start_failure_is_fatal() {
        let mut stream = decoder(false, refusing);
        let err = stream.push(Frame::dst(vec![1u8])).unwrap_err();
        assert!(matches!(err, DstError::Initialization(_)));
        assert!(err.is_fatal());
        assert!(matches!(
            stream.push(Frame::dsd(vec![1u8])),
            Err(DstError::ShutDown)
        ));
    }

    #[test]
    fn test_dst_frames_are_delayed_then_flushed() {
        let factory = |_: usize, _: &UnitParameters| -> UnitResult {
            let mut unit = MockDecodeUnit::new();
            unit.expect_decode().returning(|input, output| {
                output.fill(input[0]);
                Ok(())
            });
            unit.expect_close().return_const(());
            Ok(unit)
        };
        let mut stream = decoder(false, factory);

        assert_eq!(stream.push(Frame::dst(vec![7u8])).unwrap(), None);
        assert!(stream.is_dst_active());
        let second = stream.push(Frame::dst(vec![8u8])).unwrap().unwrap();
        assert!(second.iter().all(|&b| b == 7));

        let tail = stream.finish().unwrap();
        assert_eq!(tail.len(), 1);
        assert!(tail[0].iter().all(|&b| b == 8));
        assert!(stream.finish().unwrap().is_empty());
        assert!(matches!(stream.push(Frame::dst(vec![9u8])), Err(DstError::ShutDown)));
    }
}
