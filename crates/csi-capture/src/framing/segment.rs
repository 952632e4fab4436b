//! PicoScenes frame and segment framing.
//!
//! ```text
//! frame   := u32 frameLength | frameLength bytes
//! rx head := u32 magic (0x20150315) | u16 version (1) | u8 numRxSegments
//! segment := u32 len | u8 nameLen | name | u16 version | content
//! ```
//!
//! `len` counts everything after itself. Segment names may carry a trailing
//! NUL, which is dropped. All fields are little endian.

use crate::bits::{ByteCursor, Endian};
use crate::error::{CsiError, CsiResult};

/// Magic word opening the rx header and the optional tx header.
pub const FRAME_MAGIC: u32 = 0x2015_0315;
/// The only rx frame version understood.
pub const RX_FRAME_VERSION: u16 = 1;
/// Size of `frameLength + magic + version + numRxSegments`.
pub const RX_HEADER_LEN: usize = 11;

/// One PicoScenes frame, including its length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PicoFrame<'a> {
    /// Absolute offset of the `frameLength` field.
    pub offset: usize,
    /// Whole frame, `frameLength + 4` bytes.
    pub bytes: &'a [u8],
}

/// Iterator over length-prefixed PicoScenes frames.
#[derive(Debug, Clone)]
pub struct PicoFrames<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    done: bool,
}

impl<'a> PicoFrames<'a> {
    /// Walk frames in `data`, whose first byte sits at absolute `base`.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            pos: 0,
            base,
            done: false,
        }
    }
}

impl<'a> Iterator for PicoFrames<'a> {
    type Item = CsiResult<PicoFrame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let left = self.data.len() - start;
        let mut cursor = ByteCursor::with_base(&self.data[start..], self.base + start);
        let frame_len = match cursor.read_u32(Endian::Little) {
            Ok(len) => len as usize + 4,
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        if frame_len > left {
            self.done = true;
            return Some(Err(CsiError::truncated(self.base + start, frame_len, left)));
        }
        self.pos += frame_len;
        Some(Ok(PicoFrame {
            offset: self.base + start,
            bytes: &self.data[start..start + frame_len],
        }))
    }
}

/// The fixed rx header opening every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RxFrameHeader {
    /// Declared frame length, excluding the field itself.
    pub frame_length: u32,
    /// Magic word.
    pub magic: u32,
    /// Frame format version.
    pub version: u16,
    /// Number of rx segments that follow.
    pub num_rx_segments: u8,
}

impl RxFrameHeader {
    /// Read and validate the rx header.
    pub fn read(cursor: &mut ByteCursor<'_>) -> CsiResult<Self> {
        let at = cursor.absolute_position();
        let header = Self {
            frame_length: cursor.read_u32(Endian::Little)?,
            magic: cursor.read_u32(Endian::Little)?,
            version: cursor.read_u16(Endian::Little)?,
            num_rx_segments: cursor.read_u8()?,
        };
        if header.magic != FRAME_MAGIC {
            return Err(CsiError::malformed(
                at,
                format!("bad frame magic {:#010x}", header.magic),
            ));
        }
        if header.version != RX_FRAME_VERSION {
            return Err(CsiError::unsupported("PicoScenes frame version", header.version));
        }
        Ok(header)
    }
}

/// A named, versioned segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    /// Absolute offset of the segment's length field.
    pub offset: usize,
    /// Segment name with any trailing NUL removed.
    pub name: &'a str,
    /// Declared length, excluding the length field.
    pub length: u32,
    /// Segment version.
    pub version: u16,
    /// Content following the version field.
    pub content: &'a [u8],
    /// Absolute offset of the content.
    pub content_offset: usize,
}

impl<'a> Segment<'a> {
    /// Read one segment and advance the cursor past it.
    pub fn read(cursor: &mut ByteCursor<'a>) -> CsiResult<Self> {
        let offset = cursor.absolute_position();
        let length = cursor.read_u32(Endian::Little)?;
        if length as usize > cursor.remaining() {
            return Err(CsiError::truncated(
                offset,
                length as usize + 4,
                cursor.remaining() + 4,
            ));
        }
        let name_len = usize::from(cursor.read_u8()?);
        let raw_name = cursor.read_bytes(name_len)?;
        let raw_name = raw_name.strip_suffix(b"\0").unwrap_or(raw_name);
        let name = std::str::from_utf8(raw_name)
            .map_err(|_| CsiError::malformed(offset, "segment name is not UTF-8"))?;
        let version = cursor.read_u16(Endian::Little)?;

        let meta = 1 + name_len + 2;
        let content_len = (length as usize)
            .checked_sub(meta)
            .ok_or_else(|| CsiError::malformed(offset, format!("segment `{name}` shorter than its header")))?;
        let content_offset = cursor.absolute_position();
        let content = cursor.read_bytes(content_len)?;
        Ok(Self {
            offset,
            name,
            length,
            version,
            content,
            content_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_segment(name: &str, version: u16, content: &[u8]) -> Vec<u8> {
        let mut name_bytes = name.as_bytes().to_vec();
        name_bytes.push(0);
        let len = 1 + name_bytes.len() + 2 + content.len();
        let mut out = (len as u32).to_le_bytes().to_vec();
        out.push(name_bytes.len() as u8);
        out.extend_from_slice(&name_bytes);
        out.extend_from_slice(&version.to_le_bytes());
        out.extend_from_slice(content);
        out
    }

    #[test]
    fn test_segment_round_trip_trims_nul() {
        let bytes = build_segment("RxSBasic", 3, &[1, 2, 3, 4]);
        let mut cursor = ByteCursor::with_base(&bytes, 50);
        let seg = Segment::read(&mut cursor).unwrap();
        assert_eq!(seg.name, "RxSBasic");
        assert_eq!(seg.version, 3);
        assert_eq!(seg.content, &[1, 2, 3, 4]);
        assert_eq!(seg.offset, 50);
        assert_eq!(seg.content_offset, 50 + 4 + 1 + 9 + 2);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_segment_longer_than_buffer() {
        let mut bytes = build_segment("CSI", 1, &[0; 20]);
        bytes.truncate(bytes.len() - 4);
        let mut cursor = ByteCursor::new(&bytes);
        assert!(matches!(
            Segment::read(&mut cursor),
            Err(CsiError::TruncatedRecord { .. })
        ));
    }

    #[test]
    fn test_rx_header_validation() {
        let mut bytes = 7u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(2);
        let header = RxFrameHeader::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(header.num_rx_segments, 2);

        bytes[8] = 2;
        assert!(matches!(
            RxFrameHeader::read(&mut ByteCursor::new(&bytes)),
            Err(CsiError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn test_frames_walk_and_truncate() {
        let mut data = Vec::new();
        for body_len in [3u32, 5] {
            data.extend_from_slice(&body_len.to_le_bytes());
            data.extend(std::iter::repeat(0xaa).take(body_len as usize));
        }
        data.extend_from_slice(&100u32.to_le_bytes());

        let mut frames = PicoFrames::new(&data, 0);
        assert_eq!(frames.next().unwrap().unwrap().bytes.len(), 7);
        let second = frames.next().unwrap().unwrap();
        assert_eq!(second.offset, 7);
        assert!(matches!(frames.next(), Some(Err(CsiError::TruncatedRecord { .. }))));
        assert!(frames.next().is_none());
    }
}
