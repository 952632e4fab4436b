//! nexmon_csi decoder.
//!
//! The UDP payload starts with an 18-byte header, then `nfft` 32-bit CSI
//! words:
//!
//! ```text
//! u32 magic | u8[6] src | u16 seq | u16 core_spatial | u16 chan_spec | u16 chip
//! ```
//!
//! The "pull 46" firmware splits the magic into `u16 magic, i8 rssi, u8 fc`.
//!
//! BCM4339 and BCM43455c0 store each word as an int16 (real, imag) pair.
//! BCM4358 and BCM4366c0 pack a shared-exponent float into each word:
//!
//! ```text
//! | sign_r | sign_i | real (M-1) | imag (M-1) | exponent (E) |
//! ```
//!
//! Floats are unpacked with the firmware's algorithm: an optional
//! record-wide autoscale finds the largest exponent, then every component
//! is shifted so the largest lands at 10 bits.

use chrono::{DateTime, Utc};
use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::MacAddr;
use crate::bits::{ByteCursor, Endian};
use crate::config::{NexmonChip, NexmonConfig};
use crate::error::{CsiError, CsiResult};
use crate::framing::pcap::PcapRecord;

/// Size of the nexmon frame header.
pub const FRAME_HEADER_LEN: usize = 18;
/// Target bit width of the float unpacker.
const UNPACK_BITS: i32 = 10;

/// One decoded nexmon record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NexmonRecord {
    /// Capture time seconds (pcap).
    pub sec: u32,
    /// Capture time fraction (µs, or ns for nanosecond captures).
    pub usec: u32,
    /// Bytes captured (pcap).
    pub caplen: u32,
    /// Bytes on the wire (pcap).
    pub wirelen: u32,
    /// Frame magic (`0x1111` or `0x11111111`).
    pub magic: u32,
    /// RSSI (pull 46 only).
    pub rssi: Option<i8>,
    /// Frame control byte (pull 46 only).
    pub fc: Option<u8>,
    /// Transmitter address.
    pub src_addr: MacAddr,
    /// Sequence number of the triggering frame.
    pub seq: u16,
    /// Receive core.
    pub core: u8,
    /// Spatial stream.
    pub spatial: u8,
    /// Chanspec.
    pub chan_spec: u16,
    /// Chip version reported by the firmware.
    pub chip_version: u16,
    /// CSI `[nfft, 1, 1]`.
    pub csi: Array3<Complex64>,
}

impl NexmonRecord {
    /// Capture timestamp, when the pcap header fields form a valid time.
    pub fn timestamp(&self, nanosecond: bool) -> Option<DateTime<Utc>> {
        let nanos = if nanosecond {
            self.usec
        } else {
            self.usec.checked_mul(1000)?
        };
        DateTime::from_timestamp(i64::from(self.sec), nanos)
    }
}

/// Record decoder for one chip and bandwidth.
#[derive(Debug, Clone)]
pub struct NexmonDecoder {
    chip: NexmonChip,
    nfft: usize,
    pull46: bool,
}

impl NexmonDecoder {
    /// Create a decoder. Fails with `UnsupportedVariant` for unknown chips.
    pub fn new(config: &NexmonConfig, pull46: bool) -> CsiResult<Self> {
        Ok(Self {
            chip: config.chip()?,
            nfft: config.nfft(),
            pull46,
        })
    }

    /// CSI values per record.
    pub fn nfft(&self) -> usize {
        self.nfft
    }

    /// Whether this decodes the pull-46 header layout.
    pub fn is_pull46(&self) -> bool {
        self.pull46
    }

    /// Decode a pcap record carrying the nexmon marker.
    pub fn decode_pcap(&self, record: &PcapRecord<'_>) -> CsiResult<NexmonRecord> {
        let payload = record.nexmon_payload().ok_or_else(|| {
            CsiError::malformed(record.offset, "record does not carry the nexmon marker")
        })?;
        let mut out = self.decode_udp(payload, record.payload_offset())?;
        out.sec = record.ts_sec;
        out.usec = record.ts_frac;
        out.caplen = record.caplen;
        out.wirelen = record.wirelen;
        Ok(out)
    }

    /// Decode a UDP payload (frame header plus CSI). `base` is its absolute
    /// offset, used in error reports.
    pub fn decode_udp(&self, payload: &[u8], base: usize) -> CsiResult<NexmonRecord> {
        let mut cursor = ByteCursor::with_base(payload, base);
        let (magic, rssi, fc) = if self.pull46 {
            let magic = cursor.read_u16(Endian::Little)?;
            let rssi = cursor.read_i8()?;
            let fc = cursor.read_u8()?;
            (u32::from(magic), Some(rssi), Some(fc))
        } else {
            (cursor.read_u32(Endian::Little)?, None, None)
        };
        let src_addr = cursor.read_array::<6>()?;
        let seq = cursor.read_u16(Endian::Little)?;
        let core_spatial = cursor.read_u16(Endian::Little)?;
        let chan_spec = cursor.read_u16(Endian::Little)?;
        let chip_version = cursor.read_u16(Endian::Little)?;

        let needed = self.nfft * 4;
        if cursor.remaining() < needed {
            return Err(CsiError::truncated(
                cursor.absolute_position(),
                needed,
                cursor.remaining(),
            ));
        }
        let words = cursor.read_bytes(needed)?;
        let values = match self.chip.float_format() {
            None => unpack_int16(words),
            Some((nman, nexp)) => {
                let packed: Vec<u32> = words
                    .chunks_exact(4)
                    .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                    .collect();
                unpack_float(&packed, nman, nexp, !self.pull46)
            }
        };

        let mut csi = Array3::zeros((self.nfft, 1, 1));
        for (slot, value) in csi.iter_mut().zip(values) {
            *slot = value;
        }

        Ok(NexmonRecord {
            sec: 0,
            usec: 0,
            caplen: 0,
            wirelen: 0,
            magic,
            rssi,
            fc,
            src_addr,
            seq,
            core: (core_spatial & 0x7) as u8,
            spatial: ((core_spatial >> 3) & 0x7) as u8,
            chan_spec,
            chip_version,
            csi,
        })
    }
}

fn unpack_int16(words: &[u8]) -> Vec<Complex64> {
    words
        .chunks_exact(4)
        .map(|w| {
            let re = i16::from_le_bytes([w[0], w[1]]);
            let im = i16::from_le_bytes([w[2], w[3]]);
            Complex64::new(f64::from(re), f64::from(im))
        })
        .collect()
}

/// Unpack shared-exponent floats with `nman` mantissa and `nexp` exponent
/// bits per word.
pub fn unpack_float(words: &[u32], nman: u32, nexp: u32, autoscale: bool) -> Vec<Complex64> {
    let iq_mask = (1u32 << (nman - 1)) - 1;
    let e_mask = (1u32 << nexp) - 1;
    let e_p = 1i32 << (nexp - 1);
    let sgnr_mask = 1u32 << (nexp + 2 * nman - 1);
    let sgni_mask = sgnr_mask >> nman;
    let e_zero = -(nman as i32);

    let mut maxbit = -e_p;
    let mut exponents = Vec::with_capacity(words.len());
    let mut parts = Vec::with_capacity(words.len());
    for &h in words {
        let vi = (h >> (nexp + nman)) & iq_mask;
        let vq = (h >> nexp) & iq_mask;
        let mut e = (h & e_mask) as i32;
        if e >= e_p {
            e -= e_p << 1;
        }
        exponents.push(e);

        let mut x = vi | vq;
        if autoscale && x != 0 {
            let (mut m, mut b, mut s) = (0xffff_0000u32, 0xffffu32, 16u32);
            while s > 0 {
                if x & m != 0 {
                    e += s as i32;
                    x >>= s;
                }
                s >>= 1;
                m = (m >> s) & b;
                b >>= s;
            }
            maxbit = maxbit.max(e);
        }
        parts.push((
            (i64::from(vi), h & sgnr_mask != 0),
            (i64::from(vq), h & sgni_mask != 0),
        ));
    }

    let shft = UNPACK_BITS - maxbit;
    let scale = |(v, negative): (i64, bool), e: i32| -> f64 {
        let magnitude = if e < e_zero {
            0
        } else if e < 0 {
            v >> (-e)
        } else {
            v << e.min(62)
        };
        let signed = if negative { -magnitude } else { magnitude };
        signed as f64
    };

    parts
        .into_iter()
        .zip(exponents)
        .map(|((re, im), e)| {
            let e = e + shft;
            Complex64::new(scale(re, e), scale(im, e))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pack(nman: u32, nexp: u32, re: i32, im: i32, e: i32) -> u32 {
        let mask = (1u32 << (nman - 1)) - 1;
        let mut h = (e as u32) & ((1 << nexp) - 1);
        h |= (re.unsigned_abs() & mask) << (nexp + nman);
        h |= (im.unsigned_abs() & mask) << nexp;
        if re < 0 {
            h |= 1 << (nexp + 2 * nman - 1);
        }
        if im < 0 {
            h |= 1 << (nexp + nman - 1);
        }
        h
    }

    fn build_udp(pull46: bool, seq: u16, core: u16, spatial: u16, words: &[u32]) -> Vec<u8> {
        let mut out = Vec::new();
        if pull46 {
            out.extend_from_slice(&0x1111u16.to_le_bytes());
            out.push((-57i8) as u8);
            out.push(0x80);
        } else {
            out.extend_from_slice(&0x1111_1111u32.to_le_bytes());
        }
        out.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        out.extend_from_slice(&seq.to_le_bytes());
        out.extend_from_slice(&(core | (spatial << 3)).to_le_bytes());
        out.extend_from_slice(&0xe02au16.to_le_bytes());
        out.extend_from_slice(&0x4358u16.to_le_bytes());
        for w in words {
            out.extend_from_slice(&w.to_le_bytes());
        }
        out
    }

    fn config(chip: &str, bw: u32) -> NexmonConfig {
        NexmonConfig {
            chip: chip.to_string(),
            bw,
        }
    }

    #[test]
    fn test_unpack_without_autoscale_shifts_by_exponent() {
        // Without autoscale maxbit stays at -16 for nexp = 5, so shft = 26.
        let words = [pack(9, 5, 3, -2, -16), pack(9, 5, 0, 0, 0)];
        let out = unpack_float(&words, 9, 5, false);
        assert_eq!(out[0], Complex64::new(3072.0, -2048.0));
        assert_eq!(out[1], Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_unpack_autoscale_normalizes_largest_to_ten_bits() {
        // The highest set bit of 255 is bit 7: maxbit = 7, shft = 3.
        let words = [pack(9, 5, 255, 1, 0), pack(9, 5, 4, -4, -2)];
        let out = unpack_float(&words, 9, 5, true);
        assert_eq!(out[0], Complex64::new(2040.0, 8.0));
        assert_eq!(out[1], Complex64::new(8.0, -8.0));
    }

    #[test]
    fn test_unpack_underflow_is_zero() {
        // e + shft below -nman yields zero.
        let words = [pack(9, 5, 255, 255, 15), pack(9, 5, 100, 100, -16)];
        let out = unpack_float(&words, 9, 5, true);
        assert_eq!(out[1], Complex64::new(0.0, 0.0));
        assert!(out[0].re > 0.0);
    }

    #[test]
    fn test_decode_int16_chip() {
        let decoder = NexmonDecoder::new(&config("43455c0", 20), false).unwrap();
        let words: Vec<u32> = (0..64)
            .map(|i: i32| {
                let re = (i as i16) as u16 as u32;
                let im = ((-i) as i16) as u16 as u32;
                re | (im << 16)
            })
            .collect();
        let data = build_udp(false, 9, 2, 1, &words);
        let record = decoder.decode_udp(&data, 0).unwrap();
        assert_eq!(record.magic, 0x1111_1111);
        assert_eq!(record.seq, 9);
        assert_eq!((record.core, record.spatial), (2, 1));
        assert_eq!(record.chan_spec, 0xe02a);
        assert_eq!(record.csi.shape(), &[64, 1, 1]);
        assert_eq!(record.csi[[5, 0, 0]], Complex64::new(5.0, -5.0));
        assert!(record.rssi.is_none());
    }

    #[test]
    fn test_decode_pull46_header() {
        let decoder = NexmonDecoder::new(&config("4358", 20), true).unwrap();
        let words = vec![pack(9, 5, 1, 1, 0); 64];
        let data = build_udp(true, 3, 0, 3, &words);
        let record = decoder.decode_udp(&data, 0).unwrap();
        assert_eq!(record.magic, 0x1111);
        assert_eq!(record.rssi, Some(-57));
        assert_eq!(record.fc, Some(0x80));
        assert_eq!(record.spatial, 3);
        assert_eq!(record.src_addr, [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    }

    #[test]
    fn test_short_csi_region() {
        let decoder = NexmonDecoder::new(&config("4339", 80), false).unwrap();
        let data = build_udp(false, 0, 0, 0, &[0; 64]);
        assert!(matches!(
            decoder.decode_udp(&data, 0),
            Err(CsiError::TruncatedRecord { needed: 1024, .. })
        ));
    }

    #[test]
    fn test_unknown_chip() {
        assert!(matches!(
            NexmonDecoder::new(&config("4375b1", 80), false),
            Err(CsiError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn test_timestamp_resolution() {
        let decoder = NexmonDecoder::new(&config("4339", 20), false).unwrap();
        let mut record = decoder
            .decode_udp(&build_udp(false, 0, 0, 0, &[0; 64]), 0)
            .unwrap();
        record.sec = 1_600_000_000;
        record.usec = 250_000;
        let ts = record.timestamp(false).unwrap();
        assert_eq!(ts.timestamp_subsec_micros(), 250_000);
        let ts = record.timestamp(true).unwrap();
        assert_eq!(ts.timestamp_subsec_nanos(), 250_000);
    }
}
