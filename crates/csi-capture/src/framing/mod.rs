//! Record framing for the five capture formats.
//!
//! A framer splits a capture buffer into [`RawFrame`]s without interpreting
//! their content. Every framer is an iterator of `CsiResult<RawFrame>`; when
//! a record declares more bytes than the buffer holds, the iterator yields a
//! single `TruncatedRecord` error and then stops.
//!
//! - [`IntelFrames`]: `[u16 BE len][u8 code][len-1 bytes]`
//! - [`AtherosFrames`]: `[u16 len][len bytes]` in the session byte order
//! - [`pcap`]: libpcap records carrying nexmon UDP payloads
//! - [`Lines`]: newline-terminated ESP32 CSV rows
//! - [`segment`]: PicoScenes length-prefixed frames and named segments

pub mod pcap;
pub mod segment;

use crate::bits::{ByteCursor, Endian};
use crate::error::{CsiError, CsiResult};

/// Status code of an Intel CSI (beamforming feedback) record.
pub const INTEL_CODE_CSI: u16 = 0xbb;
/// Status code of an Intel 802.11 MAC header record.
pub const INTEL_CODE_MAC: u16 = 0xc1;
/// Status code reported for Atheros records.
pub const ATHEROS_CODE: u16 = 0xff00;
/// Status code reported for nexmon records.
pub const NEXMON_CODE: u16 = 0xf100;
/// Status code reported for nexmon "pull 46" records.
pub const NEXMON_PULL46_CODE: u16 = 0xf101;
/// Status code reported for ESP32 rows.
pub const ESP32_CODE: u16 = 0xf200;
/// Status code reported for PicoScenes frames.
pub const PICOSCENES_CODE: u16 = 0xf300;

/// One framed record, borrowed from the capture buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame<'a> {
    /// Absolute offset of the record's first byte (its length field).
    pub offset: usize,
    /// Length declared by the record's framing.
    pub declared_len: usize,
    /// Type code carried by (or assigned to) the record.
    pub code: u16,
    /// Absolute offset of the payload's first byte.
    pub payload_offset: usize,
    /// Record body handed to a decoder.
    pub payload: &'a [u8],
}

/// Iterator over Intel 5300 length-prefixed records.
#[derive(Debug, Clone)]
pub struct IntelFrames<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    done: bool,
}

impl<'a> IntelFrames<'a> {
    /// Frame `data`, whose first byte sits at absolute offset `base`.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self {
            data,
            pos: 0,
            base,
            done: false,
        }
    }

    /// Relative position of the next record.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for IntelFrames<'a> {
    type Item = CsiResult<RawFrame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let offset = self.base + start;
        let left = self.data.len() - start;
        if left < 3 {
            self.done = true;
            return Some(Err(CsiError::truncated(offset, 3, left)));
        }

        let field_len = usize::from(u16::from_be_bytes([self.data[start], self.data[start + 1]]));
        if field_len == 0 {
            self.pos += 2;
            return Some(Err(CsiError::malformed(offset, "zero-length record")));
        }
        if 2 + field_len > left {
            self.done = true;
            return Some(Err(CsiError::truncated(offset, 2 + field_len, left)));
        }

        let code = u16::from(self.data[start + 2]);
        self.pos += 2 + field_len;
        Some(Ok(RawFrame {
            offset,
            declared_len: field_len,
            code,
            payload_offset: offset + 3,
            payload: &self.data[start + 3..start + 2 + field_len],
        }))
    }
}

/// Iterator over Atheros length-prefixed records.
#[derive(Debug, Clone)]
pub struct AtherosFrames<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    endian: Endian,
    done: bool,
}

impl<'a> AtherosFrames<'a> {
    /// Frame `data` with length fields in `endian` byte order.
    pub fn new(data: &'a [u8], base: usize, endian: Endian) -> Self {
        Self {
            data,
            pos: 0,
            base,
            endian,
            done: false,
        }
    }
}

impl<'a> Iterator for AtherosFrames<'a> {
    type Item = CsiResult<RawFrame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let start = self.pos;
        let mut cursor = ByteCursor::with_base(&self.data[start..], self.base + start);
        let field_len = match cursor.read_u16(self.endian) {
            Ok(len) => usize::from(len),
            Err(e) => {
                self.done = true;
                return Some(Err(e));
            }
        };
        let payload = match cursor.read_bytes(field_len) {
            Ok(payload) => payload,
            Err(_) => {
                self.done = true;
                return Some(Err(CsiError::truncated(
                    self.base + start,
                    2 + field_len,
                    self.data.len() - start,
                )));
            }
        };
        self.pos += 2 + field_len;
        Some(Ok(RawFrame {
            offset: self.base + start,
            declared_len: field_len,
            code: ATHEROS_CODE,
            payload_offset: self.base + start + 2,
            payload,
        }))
    }
}

/// Iterator over non-blank newline-terminated lines.
///
/// Yields each line without its terminator (`\n` or `\r\n`), tagged with
/// [`ESP32_CODE`] and the absolute offset of its first byte.
#[derive(Debug, Clone)]
pub struct Lines<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> Lines<'a> {
    /// Split `data`, whose first byte sits at absolute offset `base`.
    pub fn new(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }
}

impl<'a> Iterator for Lines<'a> {
    type Item = RawFrame<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.data.len() {
            let start = self.pos;
            let end = self.data[start..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(self.data.len(), |i| start + i);
            self.pos = end + 1;

            let mut line = &self.data[start..end];
            if let Some(stripped) = line.strip_suffix(b"\r") {
                line = stripped;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(RawFrame {
                offset: self.base + start,
                declared_len: end - start,
                code: ESP32_CODE,
                payload_offset: self.base + start,
                payload: line,
            });
        }
        None
    }
}
