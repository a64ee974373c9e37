//! The per-(source, track) demuxer state machine.

use bytes::{Bytes, BytesMut};
use diptych_core::{consts, TrackKind};
use tracing::{trace, warn};

use crate::{
    boxes::{fourcc, BoxHeader},
    error::{DemuxError, DemuxResult},
    fragment::Fragment,
    init,
    params::TrackParams,
    unit::EncodedUnit,
};

/// Demuxer output, in emission order.
#[derive(Debug)]
pub enum DemuxEvent {
    /// Track metadata decoded; emitted once, before any samples.
    Ready(TrackParams),
    /// A batch of access units (≤ 50 video / ≤ 100 audio).
    Samples(Vec<EncodedUnit>),
}

/// Push-based fragmented-MP4 demuxer for one track.
///
/// Byte ranges are appended contiguously; the demuxer consumes complete
/// top-level boxes and buffers the tail until the next append.
pub struct Demuxer {
    track: TrackKind,
    buf: BytesMut,
    /// File offset of `buf[0]`; trun data offsets are resolved against it.
    buf_offset: u64,
    timescale: u32,
    ready_sent: bool,
    pending_fragment: Option<Fragment>,
    batch_size: usize,
}

impl Demuxer {
    #[must_use]
    pub fn new(track: TrackKind) -> Self {
        let batch_size = match track {
            TrackKind::Video => consts::VIDEO_SAMPLE_BATCH,
            TrackKind::Audio => consts::AUDIO_SAMPLE_BATCH,
        };
        Self {
            track,
            buf: BytesMut::new(),
            buf_offset: 0,
            timescale: 0,
            ready_sent: false,
            pending_fragment: None,
            batch_size,
        }
    }

    /// Append the next contiguous byte range and collect whatever events
    /// become complete.
    pub fn append(&mut self, bytes: Bytes) -> DemuxResult<Vec<DemuxEvent>> {
        self.buf.extend_from_slice(&bytes);

        let mut events = Vec::new();
        let mut units = Vec::new();

        loop {
            let Some(header) = BoxHeader::peek(&self.buf)? else {
                break;
            };
            if (self.buf.len() as u64) < header.size {
                // Partial top-level box; wait for the next append.
                break;
            }

            let box_offset = self.buf_offset;
            let full = self.buf.split_to(header.size as usize).freeze();
            self.buf_offset += header.size;
            let payload = full.slice(header.header_len as usize..);

            match &header.kind {
                fourcc::MOOV => {
                    if self.ready_sent {
                        warn!(track = %self.track, "duplicate init segment ignored");
                        continue;
                    }
                    let params = init::parse_moov(&payload, self.track)?;
                    self.timescale = params.timescale();
                    self.ready_sent = true;
                    events.push(DemuxEvent::Ready(params));
                }
                fourcc::MOOF => {
                    if !self.ready_sent {
                        return Err(DemuxError::Malformed(
                            "media segment before init segment".to_string(),
                        ));
                    }
                    if self.pending_fragment.replace(Fragment::parse(&payload, box_offset)?).is_some()
                    {
                        warn!(track = %self.track, "moof without matching mdat dropped");
                    }
                }
                fourcc::MDAT => {
                    let Some(fragment) = self.pending_fragment.take() else {
                        warn!(track = %self.track, "mdat without moof skipped");
                        continue;
                    };
                    let mdat_payload_offset = box_offset + header.header_len;
                    let extracted = fragment.extract(
                        self.track,
                        self.timescale,
                        &payload,
                        mdat_payload_offset,
                    )?;
                    trace!(
                        track = %self.track,
                        samples = extracted.len(),
                        "fragment demuxed"
                    );
                    units.extend(extracted);
                }
                fourcc::FTYP | fourcc::STYP | fourcc::SIDX | fourcc::FREE | fourcc::SKIP => {}
                other => {
                    trace!(
                        track = %self.track,
                        kind = %String::from_utf8_lossy(other),
                        "skipping box"
                    );
                }
            }
        }

        let mut iter = units.into_iter();
        loop {
            let batch: Vec<EncodedUnit> = iter.by_ref().take(self.batch_size).collect();
            if batch.is_empty() {
                break;
            }
            events.push(DemuxEvent::Samples(batch));
        }

        Ok(events)
    }

    /// Bytes held back waiting for box completion. Non-zero at end of
    /// stream means the input was truncated mid-box.
    #[must_use]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the init segment has been parsed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{init_segment, media_segment};

    #[test]
    fn ready_precedes_samples() {
        let mut demuxer = Demuxer::new(TrackKind::Video);
        let mut events = demuxer.append(init_segment(TrackKind::Video, 1_000)).unwrap();
        events.extend(
            demuxer
                .append(media_segment(0, 10, 33, 16, true).bytes)
                .unwrap(),
        );

        assert!(matches!(events[0], DemuxEvent::Ready(TrackParams::Video(_))));
        let DemuxEvent::Samples(units) = &events[1] else {
            panic!("expected samples");
        };
        assert_eq!(units.len(), 10);
        assert!(units[0].is_keyframe);
    }

    #[test]
    fn split_appends_reassemble_boxes() {
        let mut demuxer = Demuxer::new(TrackKind::Audio);
        let init = init_segment(TrackKind::Audio, 48_000);
        let (head, tail) = init.split_at(init.len() / 2);

        let events = demuxer.append(Bytes::copy_from_slice(head)).unwrap();
        assert!(events.is_empty());
        assert!(demuxer.buffered_len() > 0);

        let events = demuxer.append(Bytes::copy_from_slice(tail)).unwrap();
        assert!(matches!(events[0], DemuxEvent::Ready(TrackParams::Audio(_))));
        assert_eq!(demuxer.buffered_len(), 0);
    }

    #[test]
    fn media_before_init_is_malformed() {
        let mut demuxer = Demuxer::new(TrackKind::Video);
        let media = media_segment(0, 4, 33, 16, true);
        assert!(demuxer.append(media.bytes).is_err());
    }

    #[test]
    fn video_batches_are_capped_at_fifty() {
        let mut demuxer = Demuxer::new(TrackKind::Video);
        demuxer.append(init_segment(TrackKind::Video, 1_000)).unwrap();
        let media = media_segment(0, 120, 33, 16, true);
        let events = demuxer.append(media.bytes).unwrap();

        let sizes: Vec<usize> = events
            .iter()
            .map(|e| match e {
                DemuxEvent::Samples(units) => units.len(),
                DemuxEvent::Ready(_) => panic!("unexpected ready"),
            })
            .collect();
        assert_eq!(sizes, vec![50, 50, 20]);
    }

    #[test]
    fn pts_continues_across_segments() {
        let mut demuxer = Demuxer::new(TrackKind::Audio);
        demuxer.append(init_segment(TrackKind::Audio, 48_000)).unwrap();

        let first = media_segment(0, 5, 960, 8, false);
        let second = media_segment(4_800, 5, 960, 8, false);

        let mut last_pts = i64::MIN;
        for segment in [first, second] {
            for event in demuxer.append(segment.bytes).unwrap() {
                if let DemuxEvent::Samples(units) = event {
                    for unit in units {
                        assert!(unit.pts_us > last_pts);
                        last_pts = unit.pts_us;
                    }
                }
            }
        }
        assert_eq!(last_pts, 180_000);
    }
}
