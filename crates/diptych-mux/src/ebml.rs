//! Minimal EBML element writer.
//!
//! Element IDs are written verbatim (they carry their own length marker);
//! data sizes use the vint encoding. Only what the WebM subset needs.

use bytes::{BufMut, BytesMut};

// Top-level / master element IDs.
pub const EBML_HEAD: u32 = 0x1A45_DFA3;
pub const SEGMENT: u32 = 0x1853_8067;
pub const INFO: u32 = 0x1549_A966;
pub const TRACKS: u32 = 0x1654_AE6B;
pub const CLUSTER: u32 = 0x1F43_B675;
pub const TRACK_ENTRY: u32 = 0xAE;
pub const VIDEO_SETTINGS: u32 = 0xE0;
pub const AUDIO_SETTINGS: u32 = 0xE1;

// Scalar element IDs.
pub const EBML_VERSION: u32 = 0x4286;
pub const EBML_READ_VERSION: u32 = 0x42F7;
pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
pub const DOC_TYPE: u32 = 0x4282;
pub const DOC_TYPE_VERSION: u32 = 0x4287;
pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;
pub const TIMESTAMP_SCALE: u32 = 0x2AD7_B1;
pub const MUXING_APP: u32 = 0x4D80;
pub const WRITING_APP: u32 = 0x5741;
pub const TRACK_NUMBER: u32 = 0xD7;
pub const TRACK_UID: u32 = 0x73C5;
pub const TRACK_TYPE: u32 = 0x83;
pub const FLAG_LACING: u32 = 0x9C;
pub const CODEC_ID: u32 = 0x86;
pub const CODEC_PRIVATE: u32 = 0x63A2;
pub const PIXEL_WIDTH: u32 = 0xB0;
pub const PIXEL_HEIGHT: u32 = 0xBA;
pub const SAMPLING_FREQUENCY: u32 = 0xB5;
pub const CHANNELS: u32 = 0x9F;
pub const CLUSTER_TIMESTAMP: u32 = 0xE7;
pub const SIMPLE_BLOCK: u32 = 0xA3;

/// Write an element ID with its embedded length marker.
pub fn put_id(out: &mut BytesMut, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count();
    out.put_slice(&bytes[skip..]);
}

/// Write a data-size vint in the smallest width that fits.
pub fn put_size(out: &mut BytesMut, value: u64) {
    for width in 1..=8u32 {
        // All-ones is reserved for "unknown", hence the minus one.
        let cap = (1u64 << (7 * width)) - 1;
        if value < cap {
            let marker = 1u64 << (8 * width - width);
            let encoded = marker | value;
            let bytes = encoded.to_be_bytes();
            out.put_slice(&bytes[(8 - width as usize)..]);
            return;
        }
    }
    unreachable!("vint width search is exhaustive for u64 sizes");
}

/// The reserved all-ones size: element extent unknown (streaming Segment).
pub fn put_unknown_size(out: &mut BytesMut) {
    out.put_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
}

/// Unsigned integer element, minimal payload width.
pub fn put_uint(out: &mut BytesMut, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|b| **b == 0).count().min(7);
    put_id(out, id);
    put_size(out, (8 - skip) as u64);
    out.put_slice(&bytes[skip..]);
}

pub fn put_f32(out: &mut BytesMut, id: u32, value: f32) {
    put_id(out, id);
    put_size(out, 4);
    out.put_slice(&value.to_be_bytes());
}

pub fn put_string(out: &mut BytesMut, id: u32, value: &str) {
    put_bytes(out, id, value.as_bytes());
}

pub fn put_bytes(out: &mut BytesMut, id: u32, value: &[u8]) {
    put_id(out, id);
    put_size(out, value.len() as u64);
    out.put_slice(value);
}

/// Master element with a known, already-rendered payload.
pub fn put_master(out: &mut BytesMut, id: u32, payload: &[u8]) {
    put_id(out, id);
    put_size(out, payload.len() as u64);
    out.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::one_byte(0, &[0x80])]
    #[case::max_one_byte(126, &[0xFE])]
    #[case::two_bytes(127, &[0x40, 0x7F])]
    #[case::larger(500, &[0x41, 0xF4])]
    #[case::three_bytes(0x4000, &[0x20, 0x40, 0x00])]
    fn size_vints(#[case] value: u64, #[case] expected: &[u8]) {
        let mut out = BytesMut::new();
        put_size(&mut out, value);
        assert_eq!(&out[..], expected);
    }

    #[test]
    fn ids_write_verbatim() {
        let mut out = BytesMut::new();
        put_id(&mut out, EBML_HEAD);
        put_id(&mut out, TRACK_NUMBER);
        assert_eq!(&out[..], &[0x1A, 0x45, 0xDF, 0xA3, 0xD7]);
    }

    #[test]
    fn uint_uses_minimal_width() {
        let mut out = BytesMut::new();
        put_uint(&mut out, TRACK_NUMBER, 1);
        assert_eq!(&out[..], &[0xD7, 0x81, 0x01]);

        let mut out = BytesMut::new();
        put_uint(&mut out, TIMESTAMP_SCALE, 1_000_000);
        assert_eq!(&out[..], &[0x2A, 0xD7, 0xB1, 0x83, 0x0F, 0x42, 0x40]);
    }

    #[test]
    fn zero_uint_still_writes_one_byte() {
        let mut out = BytesMut::new();
        put_uint(&mut out, TRACK_TYPE, 0);
        assert_eq!(&out[..], &[0x83, 0x81, 0x00]);
    }
}
