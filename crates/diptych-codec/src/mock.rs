//! Test doubles for the codec seams, in two layers.
//!
//! [`MockEngine`] is a deterministic software *fake*: decoders
//! synthesize real frames from access-unit payloads, encoders wrap
//! payloads into tagged chunk bytes, and [`CanvasSurface`] does actual
//! RGBA pixel math, so end-to-end tests can assert on composited output
//! and on [`FrameLot`] release accounting.
//!
//! For tests that only need one scripted box (a pinned queue depth, a
//! pts log), the unimock constructors at the bottom build per-trait
//! doubles instead of dragging in the whole engine.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use diptych_core::consts;
use diptych_demux::EncodedUnit;
use tracing::trace;

use crate::{
    chunk::EncodedChunk,
    config::{AudioDecoderConfig, AudioEncoderConfig, VideoDecoderConfig, VideoEncoderConfig},
    error::{CodecError, CodecResult},
    frame::{FrameLot, PlanarPcm, RawAudioFrame, RawVideoFrame},
    traits::{
        AudioDecoder, AudioEncoder, CodecEngine, Rect, Surface, VideoDecoder, VideoEncoder,
    },
};

/// Audio codec strings the mock host accepts.
const SUPPORTED_AUDIO: &[&str] = &["mp4a.40.2", "mp4a.40.5", "mp4a.40.29"];

/// Magic prefixes of mock-encoded chunk payloads.
pub const VIDEO_CHUNK_MAGIC: &[u8; 4] = b"mVP8";
pub const AUDIO_CHUNK_MAGIC: &[u8; 4] = b"mOPU";

/// The engine: a frame lot plus factory methods.
#[derive(Debug)]
pub struct MockEngine {
    lot: Arc<FrameLot>,
}

impl MockEngine {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            lot: FrameLot::new(),
        })
    }
}

#[async_trait]
impl CodecEngine for MockEngine {
    fn video_decoder(&self) -> Box<dyn VideoDecoder> {
        Box::new(MockVideoDecoder {
            lot: Arc::clone(&self.lot),
            configured: None,
            out: VecDeque::new(),
        })
    }

    fn audio_decoder(&self) -> Box<dyn AudioDecoder> {
        Box::new(MockAudioDecoder {
            lot: Arc::clone(&self.lot),
            configured: None,
            out: VecDeque::new(),
        })
    }

    fn video_encoder(&self) -> Box<dyn VideoEncoder> {
        Box::new(MockVideoEncoder {
            configured: None,
            out: VecDeque::new(),
        })
    }

    fn audio_encoder(&self) -> Box<dyn AudioEncoder> {
        Box::new(MockAudioEncoder {
            configured: None,
            out: VecDeque::new(),
        })
    }

    fn surface(&self, width: u32, height: u32) -> Box<dyn Surface> {
        Box::new(CanvasSurface::new(Arc::clone(&self.lot), width, height))
    }

    async fn supports_audio(&self, config: &AudioDecoderConfig) -> bool {
        SUPPORTED_AUDIO.contains(&config.codec.as_str())
    }

    async fn supports_video(&self, config: &VideoDecoderConfig) -> bool {
        config.codec.starts_with("avc1") || config.codec.starts_with("hvc1")
    }

    fn frame_lot(&self) -> Arc<FrameLot> {
        Arc::clone(&self.lot)
    }
}

/// Solid color derived from an access-unit payload: deterministic and
/// different for different inputs.
fn payload_color(bytes: &[u8]) -> [u8; 4] {
    let mut hash = 0x811c_9dc5u32;
    for &b in bytes.iter().take(64) {
        hash = (hash ^ u32::from(b)).wrapping_mul(0x0100_0193);
    }
    let [_, r, g, b] = hash.to_be_bytes();
    [r, g, b, 0xFF]
}

struct MockVideoDecoder {
    lot: Arc<FrameLot>,
    configured: Option<VideoDecoderConfig>,
    out: VecDeque<RawVideoFrame>,
}

impl VideoDecoder for MockVideoDecoder {
    fn configure(&mut self, config: &VideoDecoderConfig) -> CodecResult<()> {
        if !(config.codec.starts_with("avc1") || config.codec.starts_with("hvc1")) {
            return Err(CodecError::Unsupported(config.codec.clone()));
        }
        self.configured = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, unit: EncodedUnit) -> CodecResult<()> {
        let config = self.configured.as_ref().ok_or(CodecError::NotConfigured)?;
        let width = u32::from(config.coded_width.max(16));
        let height = u32::from(config.coded_height.max(16));
        let color = payload_color(&unit.bytes);
        let mut pixels = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            pixels.extend_from_slice(&color);
        }
        self.out
            .push_back(RawVideoFrame::new(&self.lot, unit.pts_us, width, height, pixels));
        Ok(())
    }

    fn poll_frame(&mut self) -> Option<RawVideoFrame> {
        self.out.pop_front()
    }

    fn in_flight(&self) -> usize {
        self.out.len()
    }

    fn flush(&mut self) -> CodecResult<()> {
        Ok(())
    }
}

struct MockAudioDecoder {
    lot: Arc<FrameLot>,
    configured: Option<AudioDecoderConfig>,
    out: VecDeque<RawAudioFrame>,
}

impl AudioDecoder for MockAudioDecoder {
    fn configure(&mut self, config: &AudioDecoderConfig) -> CodecResult<()> {
        if !SUPPORTED_AUDIO.contains(&config.codec.as_str()) {
            return Err(CodecError::Unsupported(config.codec.clone()));
        }
        self.configured = Some(config.clone());
        Ok(())
    }

    fn decode(&mut self, unit: EncodedUnit) -> CodecResult<()> {
        let config = self.configured.as_ref().ok_or(CodecError::NotConfigured)?;
        let rate = config.sample_rate.max(8_000);
        let frames = (unit.duration_us.max(0) as u64 * u64::from(rate) / 1_000_000) as usize;
        // A quiet ramp keyed off the payload keeps output deterministic
        // without being all-zero.
        let seed = f32::from(unit.bytes.first().copied().unwrap_or(0)) / 512.0;
        let plane: Vec<f32> = (0..frames).map(|i| seed * (i as f32 / frames.max(1) as f32)).collect();
        let pcm = PlanarPcm::new(rate, vec![plane.clone(), plane]);
        self.out.push_back(RawAudioFrame::new(
            &self.lot,
            unit.pts_us,
            unit.duration_us,
            pcm,
        ));
        Ok(())
    }

    fn poll_frame(&mut self) -> Option<RawAudioFrame> {
        self.out.pop_front()
    }

    fn in_flight(&self) -> usize {
        self.out.len()
    }

    fn flush(&mut self) -> CodecResult<()> {
        Ok(())
    }
}

struct MockVideoEncoder {
    configured: Option<VideoEncoderConfig>,
    out: VecDeque<EncodedChunk>,
}

impl VideoEncoder for MockVideoEncoder {
    fn configure(&mut self, config: &VideoEncoderConfig) -> CodecResult<()> {
        self.configured = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, frame: RawVideoFrame, force_keyframe: bool) -> CodecResult<()> {
        if self.configured.is_none() {
            frame.release();
            return Err(CodecError::NotConfigured);
        }
        // Payload: magic + keyframe marker + pts + a pixel checksum, so
        // tests can trace a chunk back to the frame that produced it.
        let checksum: u32 = frame
            .pixels()
            .iter()
            .step_by(1021)
            .fold(0u32, |acc, &b| acc.wrapping_mul(31).wrapping_add(u32::from(b)));
        let mut bytes = BytesMut::with_capacity(17);
        bytes.put_slice(VIDEO_CHUNK_MAGIC);
        bytes.put_u8(u8::from(force_keyframe));
        bytes.put_i64(frame.pts_us);
        bytes.put_u32(checksum);
        let chunk = EncodedChunk {
            track: diptych_core::TrackKind::Video,
            is_keyframe: force_keyframe,
            pts_us: frame.pts_us,
            duration_us: diptych_core::consts::FRAME_PERIOD_US,
            bytes: bytes.freeze(),
        };
        trace!(pts_us = chunk.pts_us, keyframe = chunk.is_keyframe, "mock video encode");
        frame.release();
        self.out.push_back(chunk);
        Ok(())
    }

    fn poll_chunk(&mut self) -> Option<EncodedChunk> {
        self.out.pop_front()
    }

    fn queue_depth(&self) -> usize {
        self.out.len()
    }

    fn flush(&mut self) -> CodecResult<()> {
        Ok(())
    }
}

struct MockAudioEncoder {
    configured: Option<AudioEncoderConfig>,
    out: VecDeque<EncodedChunk>,
}

impl AudioEncoder for MockAudioEncoder {
    fn configure(&mut self, config: &AudioEncoderConfig) -> CodecResult<()> {
        self.configured = Some(config.clone());
        Ok(())
    }

    fn encode(&mut self, frame: RawAudioFrame, pts_us: i64) -> CodecResult<()> {
        if self.configured.is_none() {
            frame.release();
            return Err(CodecError::NotConfigured);
        }
        let mut bytes = BytesMut::with_capacity(16);
        bytes.put_slice(AUDIO_CHUNK_MAGIC);
        bytes.put_i64(pts_us);
        bytes.put_u32(frame.pcm().frames() as u32);
        let chunk = EncodedChunk {
            track: diptych_core::TrackKind::Audio,
            is_keyframe: true,
            pts_us,
            duration_us: consts::AUDIO_GRAIN_US,
            bytes: bytes.freeze(),
        };
        frame.release();
        self.out.push_back(chunk);
        Ok(())
    }

    fn poll_chunk(&mut self) -> Option<EncodedChunk> {
        self.out.pop_front()
    }

    fn flush(&mut self) -> CodecResult<()> {
        Ok(())
    }
}

/// Software RGBA canvas surface.
pub struct CanvasSurface {
    lot: Arc<FrameLot>,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl CanvasSurface {
    #[must_use]
    pub fn new(lot: Arc<FrameLot>, width: u32, height: u32) -> Self {
        Self {
            lot,
            width,
            height,
            pixels: vec![0; (width * height * 4) as usize],
        }
    }

    fn put(&mut self, x: i64, y: i64, rgba: [u8; 4]) {
        if x < 0 || y < 0 || x >= i64::from(self.width) || y >= i64::from(self.height) {
            return;
        }
        let idx = ((y * i64::from(self.width) + x) * 4) as usize;
        if rgba[3] == 0xFF {
            self.pixels[idx..idx + 4].copy_from_slice(&rgba);
        } else {
            // Source-over blend.
            let alpha = u32::from(rgba[3]);
            for c in 0..3 {
                let src = u32::from(rgba[c]);
                let dst = u32::from(self.pixels[idx + c]);
                self.pixels[idx + c] = ((src * alpha + dst * (255 - alpha)) / 255) as u8;
            }
            self.pixels[idx + 3] = 0xFF;
        }
    }

    /// Read one pixel; test hook.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let idx = ((y * self.width + x) * 4) as usize;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }
}

impl Surface for CanvasSurface {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn clear(&mut self, rgba: [u8; 4]) {
        for chunk in self.pixels.chunks_exact_mut(4) {
            chunk.copy_from_slice(&rgba);
        }
    }

    fn draw_frame(&mut self, frame: &RawVideoFrame, dst: Rect) {
        if dst.w == 0 || dst.h == 0 || frame.width == 0 || frame.height == 0 {
            return;
        }
        let src = frame.pixels();
        for dy in 0..dst.h {
            let sy = (u64::from(dy) * u64::from(frame.height) / u64::from(dst.h)) as u32;
            for dx in 0..dst.w {
                let sx = (u64::from(dx) * u64::from(frame.width) / u64::from(dst.w)) as u32;
                let sidx = ((sy * frame.width + sx) * 4) as usize;
                let rgba = [src[sidx], src[sidx + 1], src[sidx + 2], 0xFF];
                self.put(
                    i64::from(dst.x) + i64::from(dx),
                    i64::from(dst.y) + i64::from(dy),
                    rgba,
                );
            }
        }
    }

    fn stroke_rect(&mut self, rect: Rect, thickness: u32, rgba: [u8; 4]) {
        let t = i64::from(thickness);
        let (x, y) = (i64::from(rect.x), i64::from(rect.y));
        let (w, h) = (i64::from(rect.w), i64::from(rect.h));
        for dy in 0..h {
            for dx in 0..w {
                let edge = dx < t || dy < t || dx >= w - t || dy >= h - t;
                if edge {
                    self.put(x + dx, y + dy, rgba);
                }
            }
        }
    }

    fn fill_rect(&mut self, rect: Rect, rgba: [u8; 4]) {
        for dy in 0..i64::from(rect.h) {
            for dx in 0..i64::from(rect.w) {
                self.put(i64::from(rect.x) + dx, i64::from(rect.y) + dy, rgba);
            }
        }
    }

    fn capture(&mut self, pts_us: i64) -> RawVideoFrame {
        RawVideoFrame::new(&self.lot, pts_us, self.width, self.height, self.pixels.clone())
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use scripted::{recording_audio_encoder, saturated_video_encoder, EncodeLog, GridLog};
#[cfg(any(test, feature = "test-utils"))]
pub use crate::traits::{AudioDecoderMock, AudioEncoderMock, VideoDecoderMock, VideoEncoderMock};

/// Scripted per-trait doubles backed by unimock.
#[cfg(any(test, feature = "test-utils"))]
mod scripted {
    use std::sync::Arc;

    use parking_lot::Mutex;
    use unimock::{matching, MockFn, Unimock};

    use crate::traits::{AudioEncoder, AudioEncoderMock, VideoEncoder, VideoEncoderMock};

    /// Grid timestamps handed to a recording audio encoder, in call order.
    pub type GridLog = Arc<Mutex<Vec<i64>>>;
    /// Number of frames a scripted video encoder actually accepted.
    pub type EncodeLog = Arc<Mutex<u32>>;

    /// An audio encoder that swallows frames and logs the pts each one
    /// was submitted with. Emits no chunks; switch-protocol tests only
    /// care about the grid.
    #[must_use]
    pub fn recording_audio_encoder() -> (Box<dyn AudioEncoder>, GridLog) {
        let log: GridLog = Arc::new(Mutex::new(Vec::new()));
        let log_for_encode = Arc::clone(&log);

        let mock = Unimock::new((
            AudioEncoderMock::configure
                .each_call(matching!(_))
                .answers_arc(Arc::new(|_, _config| Ok(())))
                .at_least_times(0),
            AudioEncoderMock::encode
                .each_call(matching!(_, _))
                .answers_arc(Arc::new(move |_, frame, pts_us| {
                    log_for_encode.lock().push(pts_us);
                    frame.release();
                    Ok(())
                }))
                .at_least_times(0),
            AudioEncoderMock::poll_chunk
                .each_call(matching!())
                .answers_arc(Arc::new(|_| None))
                .at_least_times(0),
            AudioEncoderMock::flush
                .each_call(matching!())
                .answers_arc(Arc::new(|_| Ok(())))
                .at_least_times(0),
        ))
        .no_verify_in_drop();

        (Box::new(mock), log)
    }

    /// A video encoder whose reported queue depth never moves, for
    /// exercising the saturation drop path. Accepted frames are counted
    /// and released; no chunks come out.
    #[must_use]
    pub fn saturated_video_encoder(queue_depth: usize) -> (Box<dyn VideoEncoder>, EncodeLog) {
        let log: EncodeLog = Arc::new(Mutex::new(0));
        let log_for_encode = Arc::clone(&log);

        let mock = Unimock::new((
            VideoEncoderMock::configure
                .each_call(matching!(_))
                .answers_arc(Arc::new(|_, _config| Ok(())))
                .at_least_times(0),
            VideoEncoderMock::encode
                .each_call(matching!(_, _))
                .answers_arc(Arc::new(move |_, frame, _force_keyframe| {
                    *log_for_encode.lock() += 1;
                    frame.release();
                    Ok(())
                }))
                .at_least_times(0),
            VideoEncoderMock::poll_chunk
                .each_call(matching!())
                .answers_arc(Arc::new(|_| None))
                .at_least_times(0),
            VideoEncoderMock::queue_depth
                .each_call(matching!())
                .returns(queue_depth)
                .at_least_times(0),
            VideoEncoderMock::flush
                .each_call(matching!())
                .answers_arc(Arc::new(|_| Ok(())))
                .at_least_times(0),
        ))
        .no_verify_in_drop();

        (Box::new(mock), log)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use diptych_core::TrackKind;

    use super::*;

    fn unit(payload: &[u8], pts_us: i64) -> EncodedUnit {
        EncodedUnit {
            track: TrackKind::Video,
            is_keyframe: true,
            pts_us,
            duration_us: 33_333,
            bytes: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn video_decode_emits_one_frame_per_unit() {
        let engine = MockEngine::new();
        let mut decoder = engine.video_decoder();
        decoder
            .configure(&VideoDecoderConfig {
                codec: "avc1.64001F".to_string(),
                config: Bytes::new(),
                coded_width: 64,
                coded_height: 48,
            })
            .unwrap();

        decoder.decode(unit(b"unit-0", 0)).unwrap();
        decoder.decode(unit(b"unit-1", 33_333)).unwrap();
        assert_eq!(decoder.in_flight(), 2);

        let frame = decoder.poll_frame().unwrap();
        assert_eq!(frame.pts_us, 0);
        assert_eq!(frame.width, 64);
        frame.release();
        decoder.poll_frame().unwrap().release();
        assert_eq!(engine.frame_lot().outstanding(), 0);
    }

    #[test]
    fn distinct_payloads_decode_to_distinct_colors() {
        assert_ne!(payload_color(b"aaaa"), payload_color(b"bbbb"));
    }

    #[tokio::test]
    async fn audio_support_probe_rejects_unknown_profiles() {
        let engine = MockEngine::new();
        let supported = |codec: &str| AudioDecoderConfig {
            codec: codec.to_string(),
            config: Bytes::new(),
            sample_rate: 48_000,
            channels: 2,
        };
        assert!(engine.supports_audio(&supported("mp4a.40.2")).await);
        assert!(!engine.supports_audio(&supported("mp4a.40.34")).await);
    }

    #[test]
    fn encoder_chunks_carry_pts_and_keyframe_flag() {
        let engine = MockEngine::new();
        let mut encoder = engine.video_encoder();
        encoder.configure(&VideoEncoderConfig::default()).unwrap();

        let frame = RawVideoFrame::new(&engine.frame_lot(), 66_666, 2, 2, vec![9; 16]);
        encoder.encode(frame, true).unwrap();
        let chunk = encoder.poll_chunk().unwrap();
        assert!(chunk.is_keyframe);
        assert_eq!(chunk.pts_us, 66_666);
        assert_eq!(&chunk.bytes[..4], VIDEO_CHUNK_MAGIC);
        assert_eq!(engine.frame_lot().outstanding(), 0);
    }

    #[test]
    fn surface_draw_and_capture_round_trip() {
        let engine = MockEngine::new();
        let lot = engine.frame_lot();
        let mut surface = CanvasSurface::new(Arc::clone(&lot), 16, 16);

        let red = RawVideoFrame::new(&lot, 0, 2, 2, vec![0xFF, 0, 0, 0xFF].repeat(4));
        surface.draw_frame(&red, Rect::new(0, 0, 16, 16));
        red.release();
        assert_eq!(surface.pixel(8, 8), [0xFF, 0, 0, 0xFF]);

        surface.fill_rect(Rect::new(0, 0, 4, 4), [0xFF, 0xFF, 0xFF, 0x80]);
        let blended = surface.pixel(1, 1);
        assert!(blended[0] > 0xFE && blended[1] > 0x70 && blended[1] < 0x90);

        let snap = surface.capture(1_000);
        assert_eq!(snap.pts_us, 1_000);
        snap.release();
        assert_eq!(lot.outstanding(), 0);
    }

    #[test]
    fn recording_encoder_logs_the_grid_and_releases_frames() {
        let lot = FrameLot::new();
        let (mut encoder, grid) = recording_audio_encoder();
        encoder.configure(&AudioEncoderConfig::default()).unwrap();

        for pts in [0, 20_000, 40_000] {
            let frame =
                RawAudioFrame::new(&lot, pts, 20_000, PlanarPcm::silence(48_000, 2, 960));
            encoder.encode(frame, pts).unwrap();
        }

        assert_eq!(*grid.lock(), vec![0, 20_000, 40_000]);
        assert!(encoder.poll_chunk().is_none());
        assert_eq!(lot.outstanding(), 0);
    }

    #[test]
    fn saturated_encoder_reports_a_pinned_depth() {
        let lot = FrameLot::new();
        let (mut encoder, encoded) = saturated_video_encoder(11);
        encoder.configure(&VideoEncoderConfig::default()).unwrap();

        assert_eq!(encoder.queue_depth(), 11);
        let frame = RawVideoFrame::new(&lot, 0, 2, 2, vec![0; 16]);
        encoder.encode(frame, true).unwrap();
        assert_eq!(encoder.queue_depth(), 11);
        assert_eq!(*encoded.lock(), 1);
        assert_eq!(lot.outstanding(), 0);
    }
}
