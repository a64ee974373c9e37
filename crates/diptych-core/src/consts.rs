//! Bit-exact pipeline defaults.

/// Composited canvas width in pixels.
pub const CANVAS_WIDTH: u32 = 640;
/// Composited canvas height in pixels.
pub const CANVAS_HEIGHT: u32 = 480;

/// Output sample rate for re-encoded audio.
pub const SAMPLE_RATE: u32 = 48_000;
/// Output channel count for re-encoded audio.
pub const CHANNELS: u16 = 2;
/// One re-encoded audio grain on the emission grid, in microseconds.
pub const AUDIO_GRAIN_US: i64 = 20_000;

/// Target compositor cadence.
pub const FRAMES_PER_SECOND: u32 = 30;
/// Compositor frame period in microseconds.
pub const FRAME_PERIOD_US: i64 = 33_333;
/// Forced video keyframe interval, in frames (5 s at 30 fps).
pub const KEYFRAME_INTERVAL_FRAMES: u64 = 150;

/// Video encoder bitrate in bits per second.
pub const VIDEO_BITRATE: u32 = 2_000_000;
/// Audio encoder bitrate in bits per second.
pub const AUDIO_BITRATE: u32 = 128_000;
/// Encoder in-flight depth beyond which composited frames are dropped.
pub const ENCODER_QUEUE_LIMIT: usize = 10;

/// Minimum PiP inset edge length in pixels.
pub const MIN_PIP_SIZE: u32 = 80;
/// Edge length of the square resize affordance in the PiP corner.
pub const RESIZE_HANDLE_SIZE: u32 = 15;

/// Maximum buffered media ahead of the playhead, in seconds.
pub const MAX_LOOKAHEAD_S: f64 = 30.0;
/// Sliding window kept behind the playhead, in seconds.
pub const MAX_BEHIND_S: f64 = 10.0;

/// Per-source audio ring capacity (60 s of 20 ms grains).
pub const AUDIO_RING_CAP: usize = 3_000;

/// Post-demux ready-queue depth per track; fetches stop while full.
pub const SEGMENT_PREFETCH: usize = 4;
/// Producer progress tick.
pub const PRODUCER_TICK_MS: u64 = 100;

/// Video decoder in-flight ceiling; feeding pauses at this depth.
pub const DECODER_IN_FLIGHT_LIMIT: usize = 10;

/// Demux sample batch sizes.
pub const VIDEO_SAMPLE_BATCH: usize = 50;
pub const AUDIO_SAMPLE_BATCH: usize = 100;

/// Gap inserted ahead of the playhead when splicing audio on a source
/// switch, in microseconds.
pub const SWITCH_SPLICE_LEAD_US: i64 = 100_000;
