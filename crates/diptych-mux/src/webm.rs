//! Streaming single-track WebM muxer.

use bytes::{BufMut, Bytes, BytesMut};
use diptych_codec::EncodedChunk;
use diptych_core::consts;
use tracing::trace;

use crate::{
    ebml,
    error::{MuxError, MuxResult},
};

/// Cluster span cap. Video clusters also open on keyframes. Half a
/// second keeps chunks finer than the feeder's look-ahead tolerance and
/// well inside the i16 relative timestamp.
const MAX_CLUSTER_SPAN_MS: i64 = 500;

/// One container chunk, in emission order.
#[derive(Clone, Debug)]
pub struct ContainerChunk {
    pub bytes: Bytes,
}

/// What to do with the timestamp of the first written chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstTimestampBehavior {
    /// Re-base the timeline so the first chunk lands at zero. The sink
    /// feeder places the output on the playhead with its own offset.
    Offset,
    /// Keep timestamps as given.
    Strict,
}

/// The single track this muxer carries.
#[derive(Clone, Debug)]
pub enum MuxTrack {
    /// `V_VP8` video.
    Video { width: u32, height: u32 },
    /// `A_OPUS` audio.
    Audio { sample_rate: u32, channels: u16 },
}

#[derive(Clone, Debug)]
pub struct MuxerConfig {
    pub track: MuxTrack,
    pub first_timestamp: FirstTimestampBehavior,
}

impl MuxerConfig {
    #[must_use]
    pub fn video() -> Self {
        Self {
            track: MuxTrack::Video {
                width: consts::CANVAS_WIDTH,
                height: consts::CANVAS_HEIGHT,
            },
            first_timestamp: FirstTimestampBehavior::Offset,
        }
    }

    #[must_use]
    pub fn audio() -> Self {
        Self {
            track: MuxTrack::Audio {
                sample_rate: consts::SAMPLE_RATE,
                channels: consts::CHANNELS,
            },
            first_timestamp: FirstTimestampBehavior::Offset,
        }
    }
}

struct Cluster {
    start_ms: i64,
    buf: BytesMut,
}

/// Streaming Matroska writer for one track.
///
/// Emits a header chunk (EBML head, unknown-size Segment, Info, Tracks)
/// ahead of the first media chunk, then one chunk per closed cluster.
pub struct WebmMuxer {
    config: MuxerConfig,
    base_pts_us: Option<i64>,
    last_ms: i64,
    cluster: Option<Cluster>,
    header_emitted: bool,
    finalized: bool,
}

impl WebmMuxer {
    #[must_use]
    pub fn new(config: MuxerConfig) -> Self {
        Self {
            config,
            base_pts_us: None,
            last_ms: i64::MIN,
            cluster: None,
            header_emitted: false,
            finalized: false,
        }
    }

    /// Append one encoded chunk; returns any container chunks that became
    /// complete.
    pub fn write(&mut self, chunk: &EncodedChunk) -> MuxResult<Vec<ContainerChunk>> {
        if self.finalized {
            return Err(MuxError::Finalized);
        }

        let mut out = Vec::new();
        if !self.header_emitted {
            out.push(ContainerChunk {
                bytes: self.header(),
            });
            self.header_emitted = true;
        }

        let base = match self.config.first_timestamp {
            FirstTimestampBehavior::Offset => *self.base_pts_us.get_or_insert(chunk.pts_us),
            FirstTimestampBehavior::Strict => 0,
        };
        let ms = (chunk.pts_us - base) / 1_000;
        if ms < self.last_ms {
            return Err(MuxError::OutOfOrder {
                last_ms: self.last_ms,
                got_ms: ms,
            });
        }
        self.last_ms = ms;

        let needs_new_cluster = match (&self.cluster, &self.config.track) {
            (None, _) => true,
            (Some(_), MuxTrack::Video { .. }) if chunk.is_keyframe => true,
            (Some(cluster), _) => ms - cluster.start_ms >= MAX_CLUSTER_SPAN_MS,
        };
        if needs_new_cluster {
            if let Some(closed) = self.take_cluster() {
                out.push(closed);
            }
            let mut buf = BytesMut::new();
            ebml::put_uint(&mut buf, ebml::CLUSTER_TIMESTAMP, ms.max(0) as u64);
            self.cluster = Some(Cluster { start_ms: ms, buf });
        }

        let cluster = self.cluster.as_mut().expect("cluster opened above");
        let rel = i16::try_from(ms - cluster.start_ms).expect("span cap bounds the relative ts");

        // SimpleBlock: track vint, i16 relative timestamp, flags, payload.
        let mut block = BytesMut::with_capacity(chunk.bytes.len() + 4);
        block.put_u8(0x81);
        block.put_i16(rel);
        block.put_u8(if chunk.is_keyframe { 0x80 } else { 0x00 });
        block.put_slice(&chunk.bytes);
        ebml::put_bytes(&mut cluster.buf, ebml::SIMPLE_BLOCK, &block);

        trace!(ms, keyframe = chunk.is_keyframe, "block muxed");
        Ok(out)
    }

    /// Close the pending cluster and refuse further writes. Errors are
    /// not possible; the signature leaves room for writer finalization.
    pub fn finalize(&mut self) -> MuxResult<Vec<ContainerChunk>> {
        if self.finalized {
            return Ok(Vec::new());
        }
        self.finalized = true;
        Ok(self.take_cluster().into_iter().collect())
    }

    fn take_cluster(&mut self) -> Option<ContainerChunk> {
        let cluster = self.cluster.take()?;
        let mut out = BytesMut::new();
        ebml::put_master(&mut out, ebml::CLUSTER, &cluster.buf);
        Some(ContainerChunk {
            bytes: out.freeze(),
        })
    }

    fn header(&self) -> Bytes {
        let mut head = BytesMut::new();
        ebml::put_uint(&mut head, ebml::EBML_VERSION, 1);
        ebml::put_uint(&mut head, ebml::EBML_READ_VERSION, 1);
        ebml::put_uint(&mut head, ebml::EBML_MAX_ID_LENGTH, 4);
        ebml::put_uint(&mut head, ebml::EBML_MAX_SIZE_LENGTH, 8);
        ebml::put_string(&mut head, ebml::DOC_TYPE, "webm");
        ebml::put_uint(&mut head, ebml::DOC_TYPE_VERSION, 4);
        ebml::put_uint(&mut head, ebml::DOC_TYPE_READ_VERSION, 2);

        let mut info = BytesMut::new();
        // 1 ms ticks: cluster/block timestamps below are milliseconds.
        ebml::put_uint(&mut info, ebml::TIMESTAMP_SCALE, 1_000_000);
        ebml::put_string(&mut info, ebml::MUXING_APP, "diptych");
        ebml::put_string(&mut info, ebml::WRITING_APP, "diptych");

        let mut entry = BytesMut::new();
        ebml::put_uint(&mut entry, ebml::TRACK_NUMBER, 1);
        ebml::put_uint(&mut entry, ebml::TRACK_UID, 1);
        ebml::put_uint(&mut entry, ebml::FLAG_LACING, 0);
        match &self.config.track {
            MuxTrack::Video { width, height } => {
                ebml::put_uint(&mut entry, ebml::TRACK_TYPE, 1);
                ebml::put_string(&mut entry, ebml::CODEC_ID, "V_VP8");
                let mut video = BytesMut::new();
                ebml::put_uint(&mut video, ebml::PIXEL_WIDTH, u64::from(*width));
                ebml::put_uint(&mut video, ebml::PIXEL_HEIGHT, u64::from(*height));
                ebml::put_master(&mut entry, ebml::VIDEO_SETTINGS, &video);
            }
            MuxTrack::Audio {
                sample_rate,
                channels,
            } => {
                ebml::put_uint(&mut entry, ebml::TRACK_TYPE, 2);
                ebml::put_string(&mut entry, ebml::CODEC_ID, "A_OPUS");
                ebml::put_bytes(
                    &mut entry,
                    ebml::CODEC_PRIVATE,
                    &opus_head(*sample_rate, *channels),
                );
                let mut audio = BytesMut::new();
                ebml::put_f32(&mut audio, ebml::SAMPLING_FREQUENCY, *sample_rate as f32);
                ebml::put_uint(&mut audio, ebml::CHANNELS, u64::from(*channels));
                ebml::put_master(&mut entry, ebml::AUDIO_SETTINGS, &audio);
            }
        }

        let mut tracks = BytesMut::new();
        ebml::put_master(&mut tracks, ebml::TRACK_ENTRY, &entry);

        let mut out = BytesMut::new();
        ebml::put_master(&mut out, ebml::EBML_HEAD, &head);
        ebml::put_id(&mut out, ebml::SEGMENT);
        ebml::put_unknown_size(&mut out);
        ebml::put_master(&mut out, ebml::INFO, &info);
        ebml::put_master(&mut out, ebml::TRACKS, &tracks);
        out.freeze()
    }
}

/// OpusHead identification header carried as CodecPrivate.
fn opus_head(sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut head = Vec::with_capacity(19);
    head.extend_from_slice(b"OpusHead");
    head.push(1); // version
    head.push(channels as u8);
    head.extend_from_slice(&312u16.to_le_bytes()); // pre-skip
    head.extend_from_slice(&sample_rate.to_le_bytes());
    head.extend_from_slice(&0i16.to_le_bytes()); // output gain
    head.push(0); // channel mapping family
    head
}

#[cfg(test)]
mod tests {
    use diptych_core::TrackKind;

    use super::*;

    fn video_chunk(pts_us: i64, keyframe: bool) -> EncodedChunk {
        EncodedChunk {
            track: TrackKind::Video,
            is_keyframe: keyframe,
            pts_us,
            duration_us: 33_333,
            bytes: Bytes::from_static(b"frame-payload"),
        }
    }

    fn audio_chunk(pts_us: i64) -> EncodedChunk {
        EncodedChunk {
            track: TrackKind::Audio,
            is_keyframe: true,
            pts_us,
            duration_us: 20_000,
            bytes: Bytes::from_static(b"grain"),
        }
    }

    /// Scan a cluster chunk: (cluster timestamp ms, first block rel ms,
    /// first block payload).
    fn parse_cluster(bytes: &[u8]) -> (u64, i16, Vec<u8>) {
        assert_eq!(&bytes[..4], &[0x1F, 0x43, 0xB6, 0x75], "cluster id");
        let mut pos = 4;
        // Cluster size vint.
        let width = bytes[pos].leading_zeros() as usize + 1;
        pos += width;
        // Timestamp element: E7, size, value.
        assert_eq!(bytes[pos], 0xE7);
        let ts_len = (bytes[pos + 1] & 0x7F) as usize;
        let mut ts = 0u64;
        for b in &bytes[pos + 2..pos + 2 + ts_len] {
            ts = ts << 8 | u64::from(*b);
        }
        pos += 2 + ts_len;
        // SimpleBlock: A3, size vint, 0x81, i16 rel, flags, payload.
        assert_eq!(bytes[pos], 0xA3);
        pos += 1;
        let width = bytes[pos].leading_zeros() as usize + 1;
        let mut size = u64::from(bytes[pos]) & (0xFF >> width);
        for b in &bytes[pos + 1..pos + width] {
            size = size << 8 | u64::from(*b);
        }
        pos += width;
        assert_eq!(bytes[pos], 0x81, "track number");
        let rel = i16::from_be_bytes([bytes[pos + 1], bytes[pos + 2]]);
        let payload = bytes[pos + 4..pos + size as usize].to_vec();
        (ts, rel, payload)
    }

    #[test]
    fn header_chunk_precedes_first_cluster() {
        let mut muxer = WebmMuxer::new(MuxerConfig::video());
        let chunks = muxer.write(&video_chunk(0, true)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(&chunks[0].bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);

        let closed = muxer.finalize().unwrap();
        assert_eq!(closed.len(), 1);
        let (ts, rel, payload) = parse_cluster(&closed[0].bytes);
        assert_eq!(ts, 0);
        assert_eq!(rel, 0);
        assert_eq!(payload, b"frame-payload");
    }

    #[test]
    fn keyframe_submitted_at_pts_round_trips_to_ms_precision() {
        let mut muxer = WebmMuxer::new(MuxerConfig {
            track: MuxTrack::Video {
                width: 640,
                height: 480,
            },
            first_timestamp: FirstTimestampBehavior::Strict,
        });
        muxer.write(&video_chunk(7_266_600, true)).unwrap();
        let closed = muxer.finalize().unwrap();
        let (ts, rel, _) = parse_cluster(&closed[0].bytes);
        assert_eq!(ts as i64 + i64::from(rel), 7_266);
    }

    #[test]
    fn offset_behavior_rebases_first_chunk_to_zero() {
        let mut muxer = WebmMuxer::new(MuxerConfig::audio());
        muxer.write(&audio_chunk(3_100_000)).unwrap();
        muxer.write(&audio_chunk(3_120_000)).unwrap();
        let closed = muxer.finalize().unwrap();
        let (ts, rel, _) = parse_cluster(&closed[0].bytes);
        assert_eq!(ts, 0);
        assert_eq!(rel, 0);
    }

    #[test]
    fn backward_timestamp_is_rejected() {
        let mut muxer = WebmMuxer::new(MuxerConfig::audio());
        muxer.write(&audio_chunk(1_000_000)).unwrap();
        let err = muxer.write(&audio_chunk(500_000)).unwrap_err();
        assert!(matches!(err, MuxError::OutOfOrder { .. }));
    }

    #[test]
    fn video_keyframes_open_new_clusters() {
        let mut muxer = WebmMuxer::new(MuxerConfig::video());
        let mut emitted = Vec::new();
        emitted.extend(muxer.write(&video_chunk(0, true)).unwrap());
        emitted.extend(muxer.write(&video_chunk(33_333, false)).unwrap());
        emitted.extend(muxer.write(&video_chunk(66_666, true)).unwrap());
        emitted.extend(muxer.finalize().unwrap());

        // Header, the first (closed) cluster, the final cluster.
        assert_eq!(emitted.len(), 3);
        let (ts, _, _) = parse_cluster(&emitted[2].bytes);
        assert_eq!(ts, 66);
    }

    #[test]
    fn audio_clusters_roll_over_at_span_cap() {
        let mut muxer = WebmMuxer::new(MuxerConfig::audio());
        let mut emitted = Vec::new();
        for i in 0..300 {
            // 6 s of 20 ms grains.
            emitted.extend(muxer.write(&audio_chunk(i * 20_000)).unwrap());
        }
        emitted.extend(muxer.finalize().unwrap());
        // Header + one cluster per 500 ms span.
        assert_eq!(emitted.len(), 1 + 12);

        // Every block stays within the span cap of its cluster.
        for chunk in &emitted[1..] {
            let (_, rel, _) = parse_cluster(&chunk.bytes);
            assert!(i64::from(rel) < MAX_CLUSTER_SPAN_MS);
        }
    }

    #[test]
    fn write_after_finalize_is_an_error() {
        let mut muxer = WebmMuxer::new(MuxerConfig::video());
        muxer.write(&video_chunk(0, true)).unwrap();
        muxer.finalize().unwrap();
        assert!(matches!(
            muxer.write(&video_chunk(33_333, false)),
            Err(MuxError::Finalized)
        ));
    }

    #[test]
    fn opus_head_layout() {
        let head = opus_head(48_000, 2);
        assert_eq!(&head[..8], b"OpusHead");
        assert_eq!(head.len(), 19);
        assert_eq!(head[9], 2);
    }
}
