//! Movie fragment parsing: `moof` → per-sample layout, `mdat` → units.

use bytes::Bytes;
use diptych_core::{scaled_to_micros, TrackKind};

use crate::{
    boxes::{find_child, fourcc, Reader},
    error::{DemuxError, DemuxResult},
    unit::EncodedUnit,
};

/// `sample_is_non_sync_sample` bit of the ISO sample flags word.
const FLAG_NON_SYNC: u32 = 0x0001_0000;

// tfhd flag bits.
const TFHD_BASE_DATA_OFFSET: u32 = 0x0000_0001;
const TFHD_SAMPLE_DESC_INDEX: u32 = 0x0000_0002;
const TFHD_DEFAULT_DURATION: u32 = 0x0000_0008;
const TFHD_DEFAULT_SIZE: u32 = 0x0000_0010;
const TFHD_DEFAULT_FLAGS: u32 = 0x0000_0020;

// trun flag bits.
const TRUN_DATA_OFFSET: u32 = 0x0000_0001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x0000_0004;
const TRUN_SAMPLE_DURATION: u32 = 0x0000_0100;
const TRUN_SAMPLE_SIZE: u32 = 0x0000_0200;
const TRUN_SAMPLE_FLAGS: u32 = 0x0000_0400;
const TRUN_SAMPLE_CTS: u32 = 0x0000_0800;

#[derive(Clone, Copy, Debug, Default)]
struct TfhdDefaults {
    base_data_offset: Option<u64>,
    sample_duration: u32,
    sample_size: u32,
    sample_flags: u32,
}

#[derive(Clone, Copy, Debug)]
struct SampleLayout {
    duration: u32,
    size: u32,
    flags: u32,
    cts_offset: i64,
}

/// A parsed `moof`, waiting for its `mdat` payload.
#[derive(Clone, Debug)]
pub(crate) struct Fragment {
    /// File offset of the first byte of the moof box.
    moof_offset: u64,
    base_decode_time: u64,
    /// Offset of the first sample byte, relative to `moof_offset`.
    data_offset: Option<i64>,
    samples: Vec<SampleLayout>,
}

impl Fragment {
    /// Parse a moof payload located at `moof_offset` in the file.
    pub fn parse(moof: &[u8], moof_offset: u64) -> DemuxResult<Self> {
        let traf = find_child(moof, fourcc::TRAF)?
            .ok_or_else(|| DemuxError::Malformed("moof without traf".to_string()))?;

        let tfhd = find_child(traf, fourcc::TFHD)?
            .ok_or_else(|| DemuxError::Malformed("traf without tfhd".to_string()))?;
        let defaults = parse_tfhd(tfhd)?;

        let base_decode_time = match find_child(traf, fourcc::TFDT)? {
            Some(tfdt) => parse_tfdt(tfdt)?,
            None => 0,
        };

        let trun = find_child(traf, fourcc::TRUN)?
            .ok_or_else(|| DemuxError::Malformed("traf without trun".to_string()))?;
        let (data_offset, samples) = parse_trun(trun, defaults)?;

        let data_offset = match (data_offset, defaults.base_data_offset) {
            // trun data offset is relative to the moof start.
            (Some(rel), _) => Some(i64::from(rel)),
            // base-data-offset is absolute; re-express relative to moof.
            (None, Some(abs)) => Some(abs as i64 - moof_offset as i64),
            (None, None) => None,
        };

        Ok(Self {
            moof_offset,
            base_decode_time,
            data_offset,
            samples,
        })
    }

    /// Slice one mdat into encoded units.
    ///
    /// `mdat_payload_offset` is the file offset of the first payload byte
    /// (after the mdat header); `payload` is the full mdat payload, which
    /// `bytes` slices are shared with (zero-copy).
    pub fn extract(
        &self,
        track: TrackKind,
        timescale: u32,
        payload: &Bytes,
        mdat_payload_offset: u64,
    ) -> DemuxResult<Vec<EncodedUnit>> {
        // Default per ISO 14496-12 §8.8.7: data starts at the moof, which
        // in practice means the start of the following mdat payload.
        let mut cursor = match self.data_offset {
            Some(rel) => {
                let abs = self.moof_offset as i64 + rel;
                let within = abs - mdat_payload_offset as i64;
                if within < 0 || within as usize > payload.len() {
                    return Err(DemuxError::Malformed(format!(
                        "trun data offset {abs} outside mdat"
                    )));
                }
                within as usize
            }
            None => 0,
        };

        let mut decode_time = self.base_decode_time;
        let mut units = Vec::with_capacity(self.samples.len());

        for sample in &self.samples {
            let size = sample.size as usize;
            if cursor + size > payload.len() {
                return Err(DemuxError::truncated("sample payload"));
            }
            let bytes = payload.slice(cursor..cursor + size);
            cursor += size;

            let cts = decode_time as i64 + sample.cts_offset;
            let pts_us = if cts >= 0 {
                scaled_to_micros(cts as u64, timescale)
            } else {
                -scaled_to_micros(cts.unsigned_abs(), timescale)
            };

            units.push(EncodedUnit {
                track,
                is_keyframe: sample.flags & FLAG_NON_SYNC == 0,
                pts_us,
                duration_us: scaled_to_micros(u64::from(sample.duration), timescale),
                bytes,
            });
            decode_time += u64::from(sample.duration);
        }

        Ok(units)
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

fn parse_tfhd(tfhd: &[u8]) -> DemuxResult<TfhdDefaults> {
    let mut reader = Reader::new(tfhd);
    let (_, flags) = reader.version_flags("tfhd")?;
    reader.u32("tfhd track_ID")?;

    let mut defaults = TfhdDefaults::default();
    if flags & TFHD_BASE_DATA_OFFSET != 0 {
        defaults.base_data_offset = Some(reader.u64("tfhd base_data_offset")?);
    }
    if flags & TFHD_SAMPLE_DESC_INDEX != 0 {
        reader.u32("tfhd sample_description_index")?;
    }
    if flags & TFHD_DEFAULT_DURATION != 0 {
        defaults.sample_duration = reader.u32("tfhd default_sample_duration")?;
    }
    if flags & TFHD_DEFAULT_SIZE != 0 {
        defaults.sample_size = reader.u32("tfhd default_sample_size")?;
    }
    if flags & TFHD_DEFAULT_FLAGS != 0 {
        defaults.sample_flags = reader.u32("tfhd default_sample_flags")?;
    }
    Ok(defaults)
}

fn parse_tfdt(tfdt: &[u8]) -> DemuxResult<u64> {
    let mut reader = Reader::new(tfdt);
    let (version, _) = reader.version_flags("tfdt")?;
    if version == 1 {
        reader.u64("tfdt baseMediaDecodeTime")
    } else {
        Ok(u64::from(reader.u32("tfdt baseMediaDecodeTime")?))
    }
}

fn parse_trun(
    trun: &[u8],
    defaults: TfhdDefaults,
) -> DemuxResult<(Option<i32>, Vec<SampleLayout>)> {
    let mut reader = Reader::new(trun);
    let (version, flags) = reader.version_flags("trun")?;
    let sample_count = reader.u32("trun sample_count")?;

    let data_offset = if flags & TRUN_DATA_OFFSET != 0 {
        Some(reader.i32("trun data_offset")?)
    } else {
        None
    };
    let first_sample_flags = if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
        Some(reader.u32("trun first_sample_flags")?)
    } else {
        None
    };

    let mut samples = Vec::with_capacity(sample_count as usize);
    for index in 0..sample_count {
        let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
            reader.u32("trun sample_duration")?
        } else {
            defaults.sample_duration
        };
        let size = if flags & TRUN_SAMPLE_SIZE != 0 {
            reader.u32("trun sample_size")?
        } else {
            defaults.sample_size
        };
        let sample_flags = if flags & TRUN_SAMPLE_FLAGS != 0 {
            reader.u32("trun sample_flags")?
        } else if index == 0 {
            first_sample_flags.unwrap_or(defaults.sample_flags)
        } else {
            defaults.sample_flags
        };
        let cts_offset = if flags & TRUN_SAMPLE_CTS != 0 {
            if version == 0 {
                i64::from(reader.u32("trun cts offset")?)
            } else {
                i64::from(reader.i32("trun cts offset")?)
            }
        } else {
            0
        };

        if size == 0 {
            return Err(DemuxError::Malformed(format!(
                "sample {index} with zero size and no default"
            )));
        }

        samples.push(SampleLayout {
            duration,
            size,
            flags: sample_flags,
            cts_offset,
        });
    }

    Ok((data_offset, samples))
}
