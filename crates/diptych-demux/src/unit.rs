use bytes::Bytes;
use diptych_core::TrackKind;

/// One encoded access unit in the common microsecond time base.
///
/// `bytes` is a zero-copy slice of the segment the unit came from.
#[derive(Clone, Debug)]
pub struct EncodedUnit {
    pub track: TrackKind,
    pub is_keyframe: bool,
    pub pts_us: i64,
    pub duration_us: i64,
    pub bytes: Bytes,
}
