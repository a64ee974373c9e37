use bytes::Bytes;
use diptych_core::consts;

/// Video decoder configuration: codec string plus the codec-specific
/// configuration record from the sample entry.
#[derive(Clone, Debug)]
pub struct VideoDecoderConfig {
    pub codec: String,
    pub config: Bytes,
    pub coded_width: u16,
    pub coded_height: u16,
}

/// Audio decoder configuration. `config` carries the AudioSpecificConfig
/// payload, not the surrounding descriptor.
#[derive(Clone, Debug)]
pub struct AudioDecoderConfig {
    pub codec: String,
    pub config: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Output video encoder configuration (VP8).
#[derive(Clone, Debug)]
pub struct VideoEncoderConfig {
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub framerate: u32,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            width: consts::CANVAS_WIDTH,
            height: consts::CANVAS_HEIGHT,
            bitrate: consts::VIDEO_BITRATE,
            framerate: consts::FRAMES_PER_SECOND,
        }
    }
}

/// Output audio encoder configuration (Opus, 20 ms grains).
#[derive(Clone, Debug)]
pub struct AudioEncoderConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate: u32,
}

impl Default for AudioEncoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: consts::SAMPLE_RATE,
            channels: consts::CHANNELS,
            bitrate: consts::AUDIO_BITRATE,
        }
    }
}
