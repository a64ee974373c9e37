//! The configure/feed/poll seams the external codec engines plug into.

use std::sync::Arc;

use async_trait::async_trait;
use diptych_demux::EncodedUnit;
#[cfg(any(test, feature = "test-utils"))]
use unimock::unimock;

use crate::{
    chunk::EncodedChunk,
    config::{AudioDecoderConfig, AudioEncoderConfig, VideoDecoderConfig, VideoEncoderConfig},
    error::CodecResult,
    frame::{FrameLot, RawAudioFrame, RawVideoFrame},
};

/// Pixel-space rectangle used for surface draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    #[must_use]
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
}

/// Video decoder box: configure once, feed encoded units, poll frames.
#[cfg_attr(any(test, feature = "test-utils"), unimock(api = VideoDecoderMock))]
pub trait VideoDecoder: Send {
    fn configure(&mut self, config: &VideoDecoderConfig) -> CodecResult<()>;

    /// Feed one access unit. The unit is consumed; its bytes do not
    /// outlive input acceptance.
    fn decode(&mut self, unit: EncodedUnit) -> CodecResult<()>;

    /// Take the next decoded frame, if one is ready. The caller owns it.
    fn poll_frame(&mut self) -> Option<RawVideoFrame>;

    /// Decoded-but-undelivered output depth, for the feeding back-pressure
    /// rule.
    fn in_flight(&self) -> usize;

    /// Drain internal state at end of stream.
    fn flush(&mut self) -> CodecResult<()>;
}

/// Audio decoder box; same contract as [`VideoDecoder`] with PCM output.
#[cfg_attr(any(test, feature = "test-utils"), unimock(api = AudioDecoderMock))]
pub trait AudioDecoder: Send {
    fn configure(&mut self, config: &AudioDecoderConfig) -> CodecResult<()>;
    fn decode(&mut self, unit: EncodedUnit) -> CodecResult<()>;
    fn poll_frame(&mut self) -> Option<RawAudioFrame>;
    fn in_flight(&self) -> usize;
    fn flush(&mut self) -> CodecResult<()>;
}

/// Video encoder box.
#[cfg_attr(any(test, feature = "test-utils"), unimock(api = VideoEncoderMock))]
pub trait VideoEncoder: Send {
    fn configure(&mut self, config: &VideoEncoderConfig) -> CodecResult<()>;

    /// Submit one frame. The frame is consumed (and thereby released)
    /// whether or not encoding succeeds.
    fn encode(&mut self, frame: RawVideoFrame, force_keyframe: bool) -> CodecResult<()>;

    fn poll_chunk(&mut self) -> Option<EncodedChunk>;

    /// In-flight depth; beyond the limit the compositor drops frames
    /// instead of submitting.
    fn queue_depth(&self) -> usize;

    fn flush(&mut self) -> CodecResult<()>;
}

/// Audio encoder box. Output is a sequence of 20 ms key frames; `pts_us`
/// is assigned by the caller from the emission grid.
#[cfg_attr(any(test, feature = "test-utils"), unimock(api = AudioEncoderMock))]
pub trait AudioEncoder: Send {
    fn configure(&mut self, config: &AudioEncoderConfig) -> CodecResult<()>;
    fn encode(&mut self, frame: RawAudioFrame, pts_us: i64) -> CodecResult<()>;
    fn poll_chunk(&mut self) -> Option<EncodedChunk>;
    fn flush(&mut self) -> CodecResult<()>;
}

/// Off-screen composition surface.
pub trait Surface: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    fn clear(&mut self, rgba: [u8; 4]);

    /// Draw a frame scaled into `dst`, clipped to the surface.
    fn draw_frame(&mut self, frame: &RawVideoFrame, dst: Rect);

    /// Stroke a rectangle outline of the given thickness.
    fn stroke_rect(&mut self, rect: Rect, thickness: u32, rgba: [u8; 4]);

    /// Fill a rectangle, alpha-blending with existing content.
    fn fill_rect(&mut self, rect: Rect, rgba: [u8; 4]);

    /// Snapshot the surface into a new frame with the given pts.
    fn capture(&mut self, pts_us: i64) -> RawVideoFrame;
}

/// Factory for codec boxes; the host supplies one per player.
#[async_trait]
pub trait CodecEngine: Send + Sync {
    fn video_decoder(&self) -> Box<dyn VideoDecoder>;
    fn audio_decoder(&self) -> Box<dyn AudioDecoder>;
    fn video_encoder(&self) -> Box<dyn VideoEncoder>;
    fn audio_encoder(&self) -> Box<dyn AudioEncoder>;
    fn surface(&self, width: u32, height: u32) -> Box<dyn Surface>;

    /// Mirror of the host's async `isConfigSupported` probe.
    async fn supports_audio(&self, config: &AudioDecoderConfig) -> bool;
    async fn supports_video(&self, config: &VideoDecoderConfig) -> bool;

    /// The allocation ledger all of this engine's frames are tagged with.
    fn frame_lot(&self) -> Arc<FrameLot>;
}
