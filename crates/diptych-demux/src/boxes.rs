//! ISO-BMFF box framing primitives.

use crate::error::{DemuxError, DemuxResult};

/// Box fourcc constants used by the pipeline.
pub(crate) mod fourcc {
    pub const FTYP: &[u8; 4] = b"ftyp";
    pub const STYP: &[u8; 4] = b"styp";
    pub const MOOV: &[u8; 4] = b"moov";
    pub const MVHD: &[u8; 4] = b"mvhd";
    pub const TRAK: &[u8; 4] = b"trak";
    pub const MDIA: &[u8; 4] = b"mdia";
    pub const MDHD: &[u8; 4] = b"mdhd";
    pub const HDLR: &[u8; 4] = b"hdlr";
    pub const MINF: &[u8; 4] = b"minf";
    pub const STBL: &[u8; 4] = b"stbl";
    pub const STSD: &[u8; 4] = b"stsd";
    pub const SIDX: &[u8; 4] = b"sidx";
    pub const FREE: &[u8; 4] = b"free";
    pub const SKIP: &[u8; 4] = b"skip";
    pub const MOOF: &[u8; 4] = b"moof";
    pub const MFHD: &[u8; 4] = b"mfhd";
    pub const TRAF: &[u8; 4] = b"traf";
    pub const TFHD: &[u8; 4] = b"tfhd";
    pub const TFDT: &[u8; 4] = b"tfdt";
    pub const TRUN: &[u8; 4] = b"trun";
    pub const MDAT: &[u8; 4] = b"mdat";

    pub const AVC1: &[u8; 4] = b"avc1";
    pub const AVC3: &[u8; 4] = b"avc3";
    pub const HVC1: &[u8; 4] = b"hvc1";
    pub const HEV1: &[u8; 4] = b"hev1";
    pub const AVCC: &[u8; 4] = b"avcC";
    pub const HVCC: &[u8; 4] = b"hvcC";
    pub const MP4A: &[u8; 4] = b"mp4a";
    pub const ESDS: &[u8; 4] = b"esds";
}

/// A parsed box header at some position within a byte slice.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BoxHeader {
    pub kind: [u8; 4],
    /// Total box size including the header.
    pub size: u64,
    /// Header length: 8, or 16 for a largesize box.
    pub header_len: u64,
}

impl BoxHeader {
    /// Peek a header from the front of `data`. Returns `None` when fewer
    /// bytes than a full header are available.
    pub fn peek(data: &[u8]) -> DemuxResult<Option<Self>> {
        if data.len() < 8 {
            return Ok(None);
        }
        let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let kind = [data[4], data[5], data[6], data[7]];
        match size32 {
            0 => Err(DemuxError::Malformed(
                "box extends to end of file, unsupported in streaming input".to_string(),
            )),
            1 => {
                if data.len() < 16 {
                    return Ok(None);
                }
                let size = u64::from_be_bytes([
                    data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
                ]);
                if size < 16 {
                    return Err(DemuxError::Malformed(format!("largesize {size} < 16")));
                }
                Ok(Some(Self {
                    kind,
                    size,
                    header_len: 16,
                }))
            }
            2..=7 => Err(DemuxError::Malformed(format!("box size {size32} < 8"))),
            _ => Ok(Some(Self {
                kind,
                size: u64::from(size32),
                header_len: 8,
            })),
        }
    }
}

/// Iterate the child boxes of a container payload, yielding
/// `(kind, payload, offset_of_box_within_parent)`.
pub(crate) fn children(data: &[u8]) -> ChildIter<'_> {
    ChildIter { data, pos: 0 }
}

pub(crate) struct ChildIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = DemuxResult<([u8; 4], &'a [u8], usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.pos..];
        if rest.is_empty() {
            return None;
        }
        let header = match BoxHeader::peek(rest) {
            Ok(Some(h)) => h,
            Ok(None) => {
                return Some(Err(DemuxError::truncated("child box header")));
            }
            Err(e) => return Some(Err(e)),
        };
        if header.size > rest.len() as u64 {
            return Some(Err(DemuxError::truncated("child box payload")));
        }
        let start = self.pos;
        let payload = &rest[header.header_len as usize..header.size as usize];
        self.pos += header.size as usize;
        Some(Ok((header.kind, payload, start)))
    }
}

/// Find the first child with the given fourcc and return its payload.
pub(crate) fn find_child<'a>(data: &'a [u8], kind: &[u8; 4]) -> DemuxResult<Option<&'a [u8]>> {
    for child in children(data) {
        let (k, payload, _) = child?;
        if &k == kind {
            return Ok(Some(payload));
        }
    }
    Ok(None)
}

/// Descend a path of nested containers and return the terminal payload.
pub(crate) fn find_path<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> DemuxResult<Option<&'a [u8]>> {
    let mut current = data;
    for kind in path {
        match find_child(current, kind)? {
            Some(payload) => current = payload,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Big-endian field reader over a box payload.
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn skip(&mut self, n: usize, context: &str) -> DemuxResult<()> {
        if self.remaining() < n {
            return Err(DemuxError::truncated(context));
        }
        self.pos += n;
        Ok(())
    }

    pub fn take(&mut self, n: usize, context: &str) -> DemuxResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(DemuxError::truncated(context));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self, context: &str) -> DemuxResult<u8> {
        Ok(self.take(1, context)?[0])
    }

    pub fn u16(&mut self, context: &str) -> DemuxResult<u16> {
        let b = self.take(2, context)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, context: &str) -> DemuxResult<u32> {
        let b = self.take(4, context)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self, context: &str) -> DemuxResult<i32> {
        Ok(self.u32(context)? as i32)
    }

    pub fn u64(&mut self, context: &str) -> DemuxResult<u64> {
        let b = self.take(8, context)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Version byte + 24-bit flags of a full box.
    pub fn version_flags(&mut self, context: &str) -> DemuxResult<(u8, u32)> {
        let b = self.take(4, context)?;
        Ok((b[0], u32::from_be_bytes([0, b[1], b[2], b[3]])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(payload.len() as u32 + 8).to_be_bytes());
        out.extend_from_slice(kind);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn peek_short_input_is_not_an_error() {
        assert!(BoxHeader::peek(&[0, 0]).unwrap().is_none());
    }

    #[test]
    fn peek_reads_size_and_kind() {
        let data = make_box(b"ftyp", b"isom");
        let header = BoxHeader::peek(&data).unwrap().unwrap();
        assert_eq!(&header.kind, b"ftyp");
        assert_eq!(header.size, 12);
        assert_eq!(header.header_len, 8);
    }

    #[test]
    fn undersized_box_is_malformed() {
        let data = [0, 0, 0, 4, b'f', b'r', b'e', b'e'];
        assert!(BoxHeader::peek(&data).is_err());
    }

    #[test]
    fn find_path_descends_containers() {
        let inner = make_box(b"mdhd", &[1, 2, 3]);
        let mdia = make_box(b"mdia", &inner);
        let trak = make_box(b"trak", &mdia);
        let found = find_path(&trak, &[b"trak", b"mdia", b"mdhd"]).unwrap();
        assert_eq!(found, Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn children_yields_siblings_in_order() {
        let mut data = make_box(b"tfhd", &[0; 4]);
        data.extend_from_slice(&make_box(b"trun", &[0; 8]));
        let kinds: Vec<[u8; 4]> = children(&data).map(|c| c.unwrap().0).collect();
        assert_eq!(kinds, vec![*b"tfhd", *b"trun"]);
    }
}
