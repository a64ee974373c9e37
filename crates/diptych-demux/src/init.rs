//! Init segment parsing: `moov` → track parameters.

use bytes::Bytes;
use diptych_core::TrackKind;
use tracing::debug;

use crate::{
    boxes::{children, find_child, find_path, fourcc, Reader},
    error::{DemuxError, DemuxResult},
    esds,
    params::{AudioParams, TrackParams, VideoParams},
};

/// Fixed part of a VisualSampleEntry before its child boxes.
const VISUAL_ENTRY_FIXED: usize = 78;
/// Fixed part of an AudioSampleEntry before its child boxes.
const AUDIO_ENTRY_FIXED: usize = 28;

/// Parse a `moov` payload, returning the parameters of the first track
/// whose handler matches `track`.
pub(crate) fn parse_moov(moov: &[u8], track: TrackKind) -> DemuxResult<TrackParams> {
    for child in children(moov) {
        let (kind, trak, _) = child?;
        if &kind != fourcc::TRAK {
            continue;
        }
        if let Some(params) = parse_trak(trak, track)? {
            return Ok(params);
        }
    }
    Err(DemuxError::Malformed(format!(
        "init segment has no {track} track"
    )))
}

fn parse_trak(trak: &[u8], track: TrackKind) -> DemuxResult<Option<TrackParams>> {
    let Some(mdia) = find_child(trak, fourcc::MDIA)? else {
        return Ok(None);
    };

    let Some(hdlr) = find_child(mdia, fourcc::HDLR)? else {
        return Ok(None);
    };
    if handler_kind(hdlr)? != Some(track) {
        return Ok(None);
    }

    let mdhd = find_child(mdia, fourcc::MDHD)?
        .ok_or_else(|| DemuxError::Malformed("trak without mdhd".to_string()))?;
    let timescale = mdhd_timescale(mdhd)?;

    let stsd = find_path(mdia, &[fourcc::MINF, fourcc::STBL, fourcc::STSD])?
        .ok_or_else(|| DemuxError::Malformed("trak without stsd".to_string()))?;

    let params = parse_stsd(stsd, track, timescale)?;
    Ok(Some(params))
}

fn handler_kind(hdlr: &[u8]) -> DemuxResult<Option<TrackKind>> {
    let mut reader = Reader::new(hdlr);
    reader.version_flags("hdlr")?;
    reader.skip(4, "hdlr pre_defined")?;
    let handler = reader.take(4, "hdlr handler_type")?;
    Ok(match handler {
        b"vide" => Some(TrackKind::Video),
        b"soun" => Some(TrackKind::Audio),
        _ => None,
    })
}

fn mdhd_timescale(mdhd: &[u8]) -> DemuxResult<u32> {
    let mut reader = Reader::new(mdhd);
    let (version, _) = reader.version_flags("mdhd")?;
    // creation_time + modification_time.
    reader.skip(if version == 1 { 16 } else { 8 }, "mdhd times")?;
    reader.u32("mdhd timescale")
}

fn parse_stsd(stsd: &[u8], track: TrackKind, timescale: u32) -> DemuxResult<TrackParams> {
    let mut reader = Reader::new(stsd);
    reader.version_flags("stsd")?;
    let entry_count = reader.u32("stsd entry_count")?;
    if entry_count == 0 {
        return Err(DemuxError::Malformed("stsd with no entries".to_string()));
    }

    // Only the first sample entry matters; rendition switching within a
    // stream is out of scope.
    let entries = &stsd[8..];
    let (kind, payload, _) = children(entries)
        .next()
        .ok_or_else(|| DemuxError::truncated("stsd sample entry"))??;

    match (track, &kind) {
        (TrackKind::Video, fourcc::AVC1 | fourcc::AVC3) => video_params(payload, &kind, timescale),
        (TrackKind::Video, fourcc::HVC1 | fourcc::HEV1) => video_params(payload, &kind, timescale),
        (TrackKind::Audio, fourcc::MP4A) => audio_params(payload, timescale),
        _ => Err(DemuxError::UnsupportedEntry(format!(
            "{track} sample entry {}",
            String::from_utf8_lossy(&kind)
        ))),
    }
}

fn video_params(entry: &[u8], kind: &[u8; 4], timescale: u32) -> DemuxResult<TrackParams> {
    let mut reader = Reader::new(entry);
    reader.skip(24, "visual sample entry")?;
    let width = reader.u16("width")?;
    let height = reader.u16("height")?;

    if entry.len() < VISUAL_ENTRY_FIXED {
        return Err(DemuxError::truncated("visual sample entry"));
    }
    let extensions = &entry[VISUAL_ENTRY_FIXED..];

    let (config_kind, config) = match kind {
        fourcc::AVC1 | fourcc::AVC3 => (fourcc::AVCC, find_child(extensions, fourcc::AVCC)?),
        _ => (fourcc::HVCC, find_child(extensions, fourcc::HVCC)?),
    };
    let config = config.ok_or_else(|| {
        DemuxError::Malformed(format!(
            "video entry without {}",
            String::from_utf8_lossy(config_kind)
        ))
    })?;

    let codec = video_codec_string(kind, config);
    debug!(codec, width, height, timescale, "video track ready");

    Ok(TrackParams::Video(VideoParams {
        codec,
        config: Bytes::copy_from_slice(config),
        width,
        height,
        timescale,
    }))
}

/// RFC 6381 string from the decoder configuration record.
fn video_codec_string(kind: &[u8; 4], config: &[u8]) -> String {
    match kind {
        fourcc::AVC1 | fourcc::AVC3 if config.len() >= 4 => {
            // avcC: configurationVersion, AVCProfileIndication,
            // profile_compatibility, AVCLevelIndication.
            format!(
                "{}.{:02X}{:02X}{:02X}",
                String::from_utf8_lossy(kind),
                config[1],
                config[2],
                config[3]
            )
        }
        _ => String::from_utf8_lossy(kind).into_owned(),
    }
}

fn audio_params(entry: &[u8], timescale: u32) -> DemuxResult<TrackParams> {
    let mut reader = Reader::new(entry);
    reader.skip(16, "audio sample entry")?;
    let entry_channels = reader.u16("channelcount")?;
    reader.skip(6, "samplesize + reserved")?;
    let entry_rate = reader.u32("samplerate")? >> 16;

    if entry.len() < AUDIO_ENTRY_FIXED {
        return Err(DemuxError::truncated("audio sample entry"));
    }
    let extensions = &entry[AUDIO_ENTRY_FIXED..];

    let esds_payload = find_child(extensions, fourcc::ESDS)?
        .ok_or_else(|| DemuxError::Malformed("mp4a entry without esds".to_string()))?;
    let config = esds::audio_specific_config_from_payload(esds_payload)?;

    // The AudioSpecificConfig is authoritative; the sample entry fields
    // are a fallback for odd muxers that leave it minimal.
    let (sample_rate, channels) = esds::audio_layout(&config)
        .unwrap_or((entry_rate, entry_channels));
    let codec = esds::codec_string(&config);
    debug!(codec, sample_rate, channels, timescale, "audio track ready");

    Ok(TrackParams::Audio(AudioParams {
        codec,
        config,
        sample_rate,
        channels,
        timescale,
    }))
}
