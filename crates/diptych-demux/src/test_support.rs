//! Deterministic fragmented-MP4 fixtures for tests.
//!
//! Built by hand so tests control every field; shared with downstream
//! crates the same way their decoders are fed in production.

use bytes::Bytes;
use diptych_core::TrackKind;

use crate::boxes::BoxHeader;

fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full_box(kind: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(body.len() + 4);
    payload.push(version);
    payload.extend_from_slice(&flags.to_be_bytes()[1..]);
    payload.extend_from_slice(body);
    boxed(kind, &payload)
}

fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0; 4]); // pre_defined
    body.extend_from_slice(handler);
    body.extend_from_slice(&[0; 12]); // reserved
    body.push(0); // empty name
    full_box(b"hdlr", 0, 0, &body)
}

fn mdhd(timescale: u32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&[0; 8]); // creation + modification
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&0u32.to_be_bytes()); // duration
    body.extend_from_slice(&0x55C4u16.to_be_bytes()); // language: und
    body.extend_from_slice(&[0; 2]); // pre_defined
    full_box(b"mdhd", 0, 0, &body)
}

fn avc1_entry(width: u16, height: u16) -> Vec<u8> {
    let mut entry = Vec::new();
    entry.extend_from_slice(&[0; 6]); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    entry.extend_from_slice(&[0; 16]); // pre_defined + reserved
    entry.extend_from_slice(&width.to_be_bytes());
    entry.extend_from_slice(&height.to_be_bytes());
    entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // horizresolution
    entry.extend_from_slice(&0x0048_0000u32.to_be_bytes()); // vertresolution
    entry.extend_from_slice(&[0; 4]); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // frame_count
    entry.extend_from_slice(&[0; 32]); // compressorname
    entry.extend_from_slice(&24u16.to_be_bytes()); // depth
    entry.extend_from_slice(&(-1i16).to_be_bytes()); // pre_defined

    // Minimal but structurally valid avcC: version 1, high profile, L3.1.
    let avcc = [
        0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x64, 0x01, 0x00, 0x01, 0x68,
    ];
    entry.extend_from_slice(&boxed(b"avcC", &avcc));
    boxed(b"avc1", &entry)
}

fn esds_payload(asc: &[u8]) -> Vec<u8> {
    let mut dsi = vec![0x05, asc.len() as u8];
    dsi.extend_from_slice(asc);

    let mut dcd = vec![0x04, (13 + dsi.len()) as u8, 0x40, 0x15];
    dcd.extend_from_slice(&[0; 3]); // bufferSizeDB
    dcd.extend_from_slice(&[0, 1, 0xF4, 0]); // maxBitrate
    dcd.extend_from_slice(&[0, 1, 0xF4, 0]); // avgBitrate
    dcd.extend_from_slice(&dsi);

    let mut esd = vec![0x03, (3 + dcd.len()) as u8, 0, 1, 0];
    esd.extend_from_slice(&dcd);
    esd
}

fn mp4a_entry(sample_rate: u32, channels: u16, asc: &[u8]) -> Vec<u8> {
    let mut entry = Vec::new();
    entry.extend_from_slice(&[0; 6]); // reserved
    entry.extend_from_slice(&1u16.to_be_bytes()); // data_reference_index
    entry.extend_from_slice(&[0; 8]); // reserved
    entry.extend_from_slice(&channels.to_be_bytes());
    entry.extend_from_slice(&16u16.to_be_bytes()); // samplesize
    entry.extend_from_slice(&[0; 4]); // pre_defined + reserved
    entry.extend_from_slice(&(sample_rate << 16).to_be_bytes());
    entry.extend_from_slice(&full_box(b"esds", 0, 0, &esds_payload(asc)[..]));
    boxed(b"mp4a", &entry)
}

fn stsd(entry: Vec<u8>) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&1u32.to_be_bytes()); // entry_count
    body.extend_from_slice(&entry);
    full_box(b"stsd", 0, 0, &body)
}

fn moov_for(track: TrackKind, timescale: u32, entry: Vec<u8>) -> Vec<u8> {
    let handler: &[u8; 4] = match track {
        TrackKind::Video => b"vide",
        TrackKind::Audio => b"soun",
    };
    let stbl = boxed(b"stbl", &stsd(entry));
    let minf = boxed(b"minf", &stbl);
    let mut mdia = Vec::new();
    mdia.extend_from_slice(&mdhd(timescale));
    mdia.extend_from_slice(&hdlr(handler));
    mdia.extend_from_slice(&minf);
    let trak = boxed(b"trak", &boxed(b"mdia", &mdia));
    trak
}

/// A `moov` payload with one AVC video track.
#[must_use]
pub fn video_init_moov(timescale: u32, width: u16, height: u16) -> Vec<u8> {
    moov_for(TrackKind::Video, timescale, avc1_entry(width, height))
}

/// A `moov` payload with one AAC audio track described by `asc`.
#[must_use]
pub fn audio_init_moov(timescale: u32, asc: &[u8]) -> Vec<u8> {
    let (rate, channels) = crate::esds::audio_layout(asc).unwrap_or((48_000, 2));
    moov_for(TrackKind::Audio, timescale, mp4a_entry(rate, channels, asc))
}

/// A complete init segment (`ftyp` + `moov`) for one track.
#[must_use]
pub fn init_segment(track: TrackKind, timescale: u32) -> Bytes {
    match track {
        TrackKind::Video => {
            let moov_payload = video_init_moov(timescale, 640, 480);
            let mut out = boxed(b"ftyp", b"isom\x00\x00\x00\x01isomiso6");
            out.extend_from_slice(&boxed(b"moov", &moov_payload));
            Bytes::from(out)
        }
        TrackKind::Audio => audio_init_segment(timescale, &[0x11, 0x90]),
    }
}

/// An audio init segment with a caller-chosen AudioSpecificConfig, for
/// exercising unsupported-codec paths.
#[must_use]
pub fn audio_init_segment(timescale: u32, asc: &[u8]) -> Bytes {
    let moov_payload = audio_init_moov(timescale, asc);
    let mut out = boxed(b"ftyp", b"isom\x00\x00\x00\x01isomiso6");
    out.extend_from_slice(&boxed(b"moov", &moov_payload));
    Bytes::from(out)
}

/// One media segment (`styp` + `moof` + `mdat`).
pub struct FixtureSegment {
    pub bytes: Bytes,
}

impl FixtureSegment {
    /// Locate the moof payload and mdat payload plus their offsets
    /// within this segment, for direct fragment-level tests.
    #[must_use]
    pub fn split(&self) -> (Bytes, u64, Bytes, u64) {
        let mut offset = 0u64;
        let mut moof: Option<(Bytes, u64)> = None;
        let mut rest = self.bytes.clone();
        loop {
            let Ok(Some(header)) = BoxHeader::peek(&rest) else {
                panic!("fixture segment ended before mdat");
            };
            let payload = rest.slice(header.header_len as usize..header.size as usize);
            match &header.kind {
                b"moof" => moof = Some((payload, offset)),
                b"mdat" => {
                    let (moof_payload, moof_offset) = moof.expect("moof precedes mdat");
                    return (moof_payload, moof_offset, payload, offset + header.header_len);
                }
                _ => {}
            }
            rest = rest.slice(header.size as usize..);
            offset += header.size;
        }
    }
}

/// Build a media segment with evenly sized and spaced samples.
///
/// `first_keyframe = true` marks sample 0 sync and the rest non-sync
/// (video pattern); `false` marks every sample sync (audio pattern).
#[must_use]
pub fn media_segment(
    base_decode_time: u64,
    sample_count: u32,
    sample_duration: u32,
    sample_size: u32,
    first_keyframe: bool,
) -> FixtureSegment {
    const NON_SYNC: u32 = 0x0001_0000;

    // tfhd: track_ID only.
    let tfhd = full_box(b"tfhd", 0, 0, &1u32.to_be_bytes());
    let tfdt = full_box(b"tfdt", 0, 0, &(base_decode_time as u32).to_be_bytes());

    // trun: data-offset + per-sample duration/size/flags.
    let trun_flags = 0x0000_0001 | 0x0000_0100 | 0x0000_0200 | 0x0000_0400;
    let mut trun_body = Vec::new();
    trun_body.extend_from_slice(&sample_count.to_be_bytes());
    trun_body.extend_from_slice(&0i32.to_be_bytes()); // data_offset patched below
    for i in 0..sample_count {
        let flags = if first_keyframe && i > 0 { NON_SYNC } else { 0 };
        trun_body.extend_from_slice(&sample_duration.to_be_bytes());
        trun_body.extend_from_slice(&sample_size.to_be_bytes());
        trun_body.extend_from_slice(&flags.to_be_bytes());
    }
    let trun = full_box(b"trun", 0, trun_flags, &trun_body);

    let mut traf = Vec::new();
    traf.extend_from_slice(&tfhd);
    traf.extend_from_slice(&tfdt);
    traf.extend_from_slice(&trun);

    let mfhd = full_box(b"mfhd", 0, 0, &1u32.to_be_bytes());
    let mut moof_payload = Vec::new();
    moof_payload.extend_from_slice(&mfhd);
    moof_payload.extend_from_slice(&boxed(b"traf", &traf));
    let mut moof = boxed(b"moof", &moof_payload);

    // Patch the trun data_offset: first sample byte sits right after the
    // mdat header, relative to the moof start.
    let data_offset = (moof.len() + 8) as i32;
    let patch_at = moof
        .windows(4)
        .position(|w| w == b"trun")
        .expect("trun present")
        + 4 // fourcc
        + 4 // version + flags
        + 4; // sample_count
    moof[patch_at..patch_at + 4].copy_from_slice(&data_offset.to_be_bytes());

    let mut mdat_payload = Vec::with_capacity((sample_count * sample_size) as usize);
    for i in 0..sample_count {
        mdat_payload.extend(std::iter::repeat(i as u8).take(sample_size as usize));
    }
    let mdat = boxed(b"mdat", &mdat_payload);

    let mut out = boxed(b"styp", b"msdh\x00\x00\x00\x00msdhmsix");
    out.extend_from_slice(&moof);
    out.extend_from_slice(&mdat);
    FixtureSegment {
        bytes: Bytes::from(out),
    }
}
