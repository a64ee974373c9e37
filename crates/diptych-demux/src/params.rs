use bytes::Bytes;

/// Track parameters extracted from an init segment; everything a decoder
/// needs to be configured.
#[derive(Clone, Debug)]
pub enum TrackParams {
    Video(VideoParams),
    Audio(AudioParams),
}

#[derive(Clone, Debug)]
pub struct VideoParams {
    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub codec: String,
    /// Codec-specific configuration: the `avcC` / `hvcC` payload.
    pub config: Bytes,
    pub width: u16,
    pub height: u16,
    pub timescale: u32,
}

#[derive(Clone, Debug)]
pub struct AudioParams {
    /// RFC 6381 codec string, e.g. `mp4a.40.2`.
    pub codec: String,
    /// The AudioSpecificConfig payload (not the surrounding descriptor).
    pub config: Bytes,
    pub sample_rate: u32,
    pub channels: u16,
    pub timescale: u32,
}

impl TrackParams {
    #[must_use]
    pub fn timescale(&self) -> u32 {
        match self {
            Self::Video(v) => v.timescale,
            Self::Audio(a) => a.timescale,
        }
    }
}
