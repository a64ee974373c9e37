use bytes::Bytes;
use diptych_core::{SegmentKind, TrackKind};

/// One fetched segment, ready for the demuxer.
///
/// `bytes` is owned; the record is dropped after the demux append.
#[derive(Clone, Debug)]
pub struct SegmentRecord {
    pub kind: SegmentKind,
    pub track: TrackKind,
    pub bytes: Bytes,
    pub pts_us: i64,
    pub duration_us: i64,
}

impl SegmentRecord {
    #[must_use]
    pub fn init(track: TrackKind, bytes: Bytes) -> Self {
        Self {
            kind: SegmentKind::Init,
            track,
            bytes,
            pts_us: 0,
            duration_us: 0,
        }
    }

    #[must_use]
    pub fn media(track: TrackKind, bytes: Bytes, pts_us: i64, duration_us: i64) -> Self {
        Self {
            kind: SegmentKind::Media,
            track,
            bytes,
            pts_us,
            duration_us,
        }
    }
}
