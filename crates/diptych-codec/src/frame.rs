//! Raw media frames and their release accounting.
//!
//! Frames are affine values: dropping one is its single release path, so
//! double-release cannot be expressed. The [`FrameLot`] counts
//! allocations and releases so shutdown paths (and property tests) can
//! assert that nothing buffered was leaked.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tracing::trace;

/// Shared allocation ledger for raw frames.
#[derive(Debug, Default)]
pub struct FrameLot {
    created: AtomicU64,
    released: AtomicU64,
}

impl FrameLot {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn allocate(self: &Arc<Self>) -> FrameTag {
        self.created.fetch_add(1, Ordering::Relaxed);
        FrameTag {
            lot: Arc::clone(self),
        }
    }

    #[must_use]
    pub fn created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }

    /// Frames currently alive. Zero after a clean teardown.
    #[must_use]
    pub fn outstanding(&self) -> u64 {
        self.created() - self.released()
    }
}

/// Ties one frame to its lot; dropping the tag is the release.
#[derive(Debug)]
struct FrameTag {
    lot: Arc<FrameLot>,
}

impl Drop for FrameTag {
    fn drop(&mut self) {
        self.lot.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// One decoded (or composited) video frame.
///
/// Exclusively owned; ownership moves decoder queue → compositor draw →
/// release. [`RawVideoFrame::release`] makes the release explicit at the
/// call site; plain drop is equivalent.
#[derive(Debug)]
pub struct RawVideoFrame {
    pub pts_us: i64,
    pub width: u32,
    pub height: u32,
    pixels: Arc<[u8]>,
    _tag: FrameTag,
}

impl RawVideoFrame {
    /// Wrap RGBA pixels into a frame. `pixels.len()` must be
    /// `width × height × 4`.
    #[must_use]
    pub fn new(lot: &Arc<FrameLot>, pts_us: i64, width: u32, height: u32, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), (width * height * 4) as usize);
        Self {
            pts_us,
            width,
            height,
            pixels: pixels.into(),
            _tag: lot.allocate(),
        }
    }

    /// RGBA pixel data, row-major.
    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Release the underlying handle. Consumes the frame; equivalent to
    /// dropping it, spelled out where the protocol demands a release.
    pub fn release(self) {
        trace!(pts_us = self.pts_us, "video frame released");
    }
}

/// Planar PCM payload shared between duplicated audio frames.
#[derive(Debug)]
pub struct PlanarPcm {
    pub sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl PlanarPcm {
    /// All channel planes must be the same length.
    #[must_use]
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> Self {
        debug_assert!(channels.windows(2).all(|w| w[0].len() == w[1].len()));
        Self {
            sample_rate,
            channels,
        }
    }

    /// Silence of the given length.
    #[must_use]
    pub fn silence(sample_rate: u32, channel_count: usize, frames: usize) -> Self {
        Self::new(sample_rate, vec![vec![0.0; frames]; channel_count])
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    #[must_use]
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    #[must_use]
    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.channels[channel]
    }
}

/// One decoded audio frame.
///
/// Exclusively owned like video frames; the only clone path is
/// [`RawAudioFrame::duplicate`], which the ring uses at ingress.
#[derive(Debug)]
pub struct RawAudioFrame {
    pub pts_us: i64,
    pub duration_us: i64,
    pcm: Arc<PlanarPcm>,
    tag: FrameTag,
}

impl RawAudioFrame {
    #[must_use]
    pub fn new(lot: &Arc<FrameLot>, pts_us: i64, duration_us: i64, pcm: PlanarPcm) -> Self {
        Self {
            pts_us,
            duration_us,
            pcm: Arc::new(pcm),
            tag: lot.allocate(),
        }
    }

    /// Explicit duplication: a new owned frame over the same PCM payload.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        Self {
            pts_us: self.pts_us,
            duration_us: self.duration_us,
            pcm: Arc::clone(&self.pcm),
            tag: self.tag.lot.allocate(),
        }
    }

    #[must_use]
    pub fn pcm(&self) -> &PlanarPcm {
        &self.pcm
    }

    /// Release the underlying handle; see [`RawVideoFrame::release`].
    pub fn release(self) {
        trace!(pts_us = self.pts_us, "audio frame released");
    }
}
