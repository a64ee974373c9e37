//! Elementary-stream descriptor parsing.
//!
//! The decoder wants the AudioSpecificConfig payload, which sits three
//! descriptor levels deep: ES_Descriptor (tag 0x03) wraps
//! DecoderConfigDescriptor (tag 0x04) wraps DecoderSpecificInfo
//! (tag 0x05). Descriptor lengths use the expandable encoding.

use bytes::Bytes;

use crate::{
    boxes::Reader,
    error::{DemuxError, DemuxResult},
};

const TAG_ES_DESCRIPTOR: u8 = 0x03;
const TAG_DECODER_CONFIG: u8 = 0x04;
const TAG_DECODER_SPECIFIC_INFO: u8 = 0x05;

/// Read an expandable descriptor length: up to four 7-bit groups, high
/// bit marking continuation.
fn expandable_len(reader: &mut Reader<'_>) -> DemuxResult<usize> {
    let mut len = 0usize;
    for _ in 0..4 {
        let b = reader.u8("descriptor length")?;
        len = (len << 7) | usize::from(b & 0x7F);
        if b & 0x80 == 0 {
            return Ok(len);
        }
    }
    Err(DemuxError::Malformed(
        "descriptor length longer than 4 bytes".to_string(),
    ))
}

fn expect_tag(reader: &mut Reader<'_>, tag: u8) -> DemuxResult<usize> {
    let got = reader.u8("descriptor tag")?;
    if got != tag {
        return Err(DemuxError::Malformed(format!(
            "expected descriptor tag {tag:#04x}, got {got:#04x}"
        )));
    }
    expandable_len(reader)
}

/// Extract the AudioSpecificConfig from a full `esds` box (including its
/// 8-byte box header).
pub fn audio_specific_config(esds_box: &[u8]) -> DemuxResult<Bytes> {
    if esds_box.len() < 8 {
        return Err(DemuxError::truncated("esds box header"));
    }
    audio_specific_config_from_payload(&esds_box[8..])
}

/// Same extraction over the box payload (version/flags onward).
pub(crate) fn audio_specific_config_from_payload(payload: &[u8]) -> DemuxResult<Bytes> {
    let mut reader = Reader::new(payload);
    reader.version_flags("esds")?;

    expect_tag(&mut reader, TAG_ES_DESCRIPTOR)?;
    reader.skip(2, "ES_ID")?;
    let stream_flags = reader.u8("ES flags")?;
    if stream_flags & 0x80 != 0 {
        reader.skip(2, "dependsOn_ES_ID")?;
    }
    if stream_flags & 0x40 != 0 {
        let url_len = usize::from(reader.u8("URL length")?);
        reader.skip(url_len, "URLstring")?;
    }
    if stream_flags & 0x20 != 0 {
        reader.skip(2, "OCR_ES_ID")?;
    }

    expect_tag(&mut reader, TAG_DECODER_CONFIG)?;
    // objectTypeIndication (1) + streamType/bufferSizeDB (4) +
    // maxBitrate (4) + avgBitrate (4).
    reader.skip(13, "DecoderConfigDescriptor")?;

    let len = expect_tag(&mut reader, TAG_DECODER_SPECIFIC_INFO)?;
    let config = reader.take(len, "DecoderSpecificInfo")?;
    Ok(Bytes::copy_from_slice(config))
}

/// MSB-first bit reader over an AudioSpecificConfig.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn read(&mut self, bits: usize) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..bits {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = value << 1 | u32::from(bit);
            self.pos += 1;
        }
        Some(value)
    }
}

/// Fields of the AudioSpecificConfig the pipeline cares about.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AscLayout {
    pub object_type: u32,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Parse the AudioSpecificConfig header, including the escaped forms of
/// the object type (31 → extended) and sampling frequency (15 → literal).
pub(crate) fn parse_asc(config: &[u8]) -> Option<AscLayout> {
    const RATES: [u32; 13] = [
        96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025,
        8_000, 7_350,
    ];

    let mut bits = BitReader::new(config);
    let mut object_type = bits.read(5)?;
    if object_type == 31 {
        object_type = 32 + bits.read(6)?;
    }
    let freq_index = bits.read(4)?;
    let sample_rate = if freq_index == 15 {
        bits.read(24)?
    } else {
        RATES.get(freq_index as usize).copied()?
    };
    let channels = bits.read(4)? as u16;
    Some(AscLayout {
        object_type,
        sample_rate,
        channels,
    })
}

/// Map an AudioSpecificConfig onto its RFC 6381 codec string.
pub(crate) fn codec_string(config: &[u8]) -> String {
    let object_type = parse_asc(config).map_or(2, |asc| asc.object_type);
    format!("mp4a.40.{object_type}")
}

/// Sample rate and channel layout declared in the AudioSpecificConfig.
pub(crate) fn audio_layout(config: &[u8]) -> Option<(u32, u16)> {
    parse_asc(config).map(|asc| (asc.sample_rate, asc.channels))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an esds box matching the layout the extraction contract
    /// describes: [8-byte header][version/flags][03 .. 04 .. 05 LEN CFG].
    fn esds_fixture(config: &[u8]) -> Vec<u8> {
        let mut dsi = vec![TAG_DECODER_SPECIFIC_INFO, config.len() as u8];
        dsi.extend_from_slice(config);

        let mut dcd = vec![TAG_DECODER_CONFIG, (13 + dsi.len()) as u8];
        dcd.push(0x40); // objectTypeIndication: AAC
        dcd.extend_from_slice(&[0x15, 0, 0, 0]); // streamType + bufferSizeDB
        dcd.extend_from_slice(&[0, 1, 0xF4, 0]); // maxBitrate
        dcd.extend_from_slice(&[0, 1, 0xF4, 0]); // avgBitrate
        dcd.extend_from_slice(&dsi);

        let mut esd = vec![TAG_ES_DESCRIPTOR, (3 + dcd.len()) as u8];
        esd.extend_from_slice(&[0, 1]); // ES_ID
        esd.push(0); // flags
        esd.extend_from_slice(&dcd);

        let mut payload = vec![0, 0, 0, 0]; // version + flags
        payload.extend_from_slice(&esd);

        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(b"esds");
        out.extend_from_slice(&payload);
        out
    }

    #[test]
    fn extracts_inner_config_not_outer_box() {
        let config = [0x11, 0x90]; // AAC-LC, 48 kHz, stereo
        let esds = esds_fixture(&config);
        let extracted = audio_specific_config(&esds).unwrap();
        assert_eq!(&extracted[..], &config);
    }

    #[test]
    fn long_config_uses_expandable_length() {
        let config = vec![0xAB; 200];
        let mut dsi = vec![TAG_DECODER_SPECIFIC_INFO, 0x81, 200 - 128];
        dsi.extend_from_slice(&config);

        // 0x81 0x48 encodes 200 in two expandable groups.
        let mut reader = Reader::new(&dsi[1..]);
        assert_eq!(expandable_len(&mut reader).unwrap(), 200);
    }

    #[test]
    fn wrong_leading_tag_is_malformed() {
        let mut esds = esds_fixture(&[0x11, 0x90]);
        esds[12] = 0x06; // clobber the ES_Descriptor tag
        assert!(audio_specific_config(&esds).is_err());
    }

    // AAC-LC stereo 48 kHz is 00010 0011 0010 000 → 0x11 0x90; the last
    // case escapes the object type (31 + ext 2 → 34, ER AAC ELD).
    #[rstest::rstest]
    #[case::aac_lc(&[0x11, 0x90], "mp4a.40.2", 48_000, 2)]
    #[case::he_aac(&[0x29, 0x90], "mp4a.40.5", 48_000, 2)]
    #[case::aac_lc_44k(&[0x12, 0x10], "mp4a.40.2", 44_100, 2)]
    #[case::mono(&[0x11, 0x88], "mp4a.40.2", 48_000, 1)]
    #[case::escaped_eld(&[0xF8, 0x46, 0x40], "mp4a.40.34", 48_000, 2)]
    fn layout_and_codec_string_decode(
        #[case] asc: &[u8],
        #[case] codec: &str,
        #[case] rate: u32,
        #[case] channels: u16,
    ) {
        assert_eq!(codec_string(asc), codec);
        assert_eq!(audio_layout(asc), Some((rate, channels)));
    }
}
