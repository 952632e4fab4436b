//! libpcap framing for nexmon_csi captures.
//!
//! A capture starts with a 24-byte global header whose magic selects the
//! byte order and timestamp resolution. Each packet then carries a 16-byte
//! record header (`sec, usec, caplen, wirelen`) followed by `caplen` bytes.
//!
//! nexmon_csi emits its CSI as UDP datagrams with the Ethernet source
//! address set to the ASCII bytes `NEXMON`; records without that marker are
//! skipped by the framer but still advance it.

use crate::bits::{ByteCursor, Endian};
use crate::error::{CsiError, CsiResult};

/// Size of the pcap global header.
pub const GLOBAL_HEADER_LEN: usize = 24;
/// Size of a pcap record header.
pub const RECORD_HEADER_LEN: usize = 16;
/// Ethernet + IPv4 + UDP prefix preceding the nexmon frame.
pub const UDP_PREFIX_LEN: usize = 42;
/// Marker found in the Ethernet source address of nexmon packets.
pub const NEXMON_MARKER: &[u8; 6] = b"NEXMON";

/// Parsed pcap global header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapHeader {
    /// Byte order of every header field in the file.
    pub endian: Endian,
    /// Whether the sub-second timestamp field counts nanoseconds.
    pub nanosecond: bool,
    /// Maximum bytes captured per packet.
    pub snaplen: u32,
    /// Data-link type.
    pub linktype: u32,
}

impl PcapHeader {
    /// Parse the global header at the start of `data`.
    pub fn parse(data: &[u8]) -> CsiResult<Self> {
        let mut cursor = ByteCursor::new(data);
        let magic = cursor.read_u32(Endian::Big)?;
        let (endian, nanosecond) = match magic {
            0xa1b2_c3d4 => (Endian::Big, false),
            0xd4c3_b2a1 => (Endian::Little, false),
            0xa1b2_3c4d => (Endian::Big, true),
            0x4d3c_b2a1 => (Endian::Little, true),
            other => return Err(CsiError::unsupported("pcap magic", format!("{other:#010x}"))),
        };
        // version major/minor, thiszone, sigfigs
        cursor.skip(12)?;
        let snaplen = cursor.read_u32(endian)?;
        let linktype = cursor.read_u32(endian)?;
        Ok(Self {
            endian,
            nanosecond,
            snaplen,
            linktype,
        })
    }
}

/// One pcap packet record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcapRecord<'a> {
    /// Absolute offset of the record header.
    pub offset: usize,
    /// Timestamp seconds.
    pub ts_sec: u32,
    /// Timestamp fraction (µs or ns, per the global header).
    pub ts_frac: u32,
    /// Bytes captured.
    pub caplen: u32,
    /// Bytes on the wire.
    pub wirelen: u32,
    /// Captured bytes.
    pub data: &'a [u8],
}

impl<'a> PcapRecord<'a> {
    /// Whether the packet was emitted by nexmon_csi.
    pub fn is_nexmon(&self) -> bool {
        self.data.len() >= UDP_PREFIX_LEN && &self.data[6..12] == NEXMON_MARKER
    }

    /// The UDP payload, when the packet carries the nexmon marker.
    pub fn nexmon_payload(&self) -> Option<&'a [u8]> {
        self.is_nexmon().then(|| &self.data[UDP_PREFIX_LEN..])
    }

    /// Absolute offset of the UDP payload.
    pub fn payload_offset(&self) -> usize {
        self.offset + RECORD_HEADER_LEN + UDP_PREFIX_LEN
    }
}

/// Iterator over pcap records.
///
/// `data` must start at a record header, not at the global header.
#[derive(Debug, Clone)]
pub struct PcapRecords<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
    endian: Endian,
    done: bool,
}

impl<'a> PcapRecords<'a> {
    /// Walk records in `data`, whose first byte sits at absolute `base`.
    pub fn new(data: &'a [u8], base: usize, header: &PcapHeader) -> Self {
        Self {
            data,
            pos: 0,
            base,
            endian: header.endian,
            done: false,
        }
    }

    fn read_record(&self, start: usize) -> CsiResult<PcapRecord<'a>> {
        let data: &'a [u8] = self.data;
        let offset = self.base + start;
        let mut cursor = ByteCursor::with_base(&data[start..], offset);
        let ts_sec = cursor.read_u32(self.endian)?;
        let ts_frac = cursor.read_u32(self.endian)?;
        let caplen = cursor.read_u32(self.endian)?;
        let wirelen = cursor.read_u32(self.endian)?;
        let body = cursor.read_bytes(caplen as usize).map_err(|_| {
            CsiError::truncated(
                offset,
                RECORD_HEADER_LEN + caplen as usize,
                data.len() - start,
            )
        })?;
        Ok(PcapRecord {
            offset,
            ts_sec,
            ts_frac,
            caplen,
            wirelen,
            data: body,
        })
    }
}

impl<'a> Iterator for PcapRecords<'a> {
    type Item = CsiResult<PcapRecord<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.pos >= self.data.len() {
            return None;
        }
        let record = self.read_record(self.pos);
        match record {
            Ok(record) => {
                self.pos += RECORD_HEADER_LEN + record.caplen as usize;
                Some(Ok(record))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Count nexmon records, used to size a store before the bulk read.
pub fn count_nexmon(data: &[u8], base: usize, header: &PcapHeader) -> usize {
    PcapRecords::new(data, base, header)
        .map_while(Result::ok)
        .filter(PcapRecord::is_nexmon)
        .count()
}
