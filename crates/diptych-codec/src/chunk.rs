use bytes::Bytes;
use diptych_core::TrackKind;

/// One encoded output chunk, headed for a muxer.
#[derive(Clone, Debug)]
pub struct EncodedChunk {
    pub track: TrackKind,
    pub is_keyframe: bool,
    pub pts_us: i64,
    pub duration_us: i64,
    pub bytes: Bytes,
}
