//! Atheros CSI Tool decoder.
//!
//! Record body, in the session byte order:
//!
//! ```text
//! u64 timestamp | u16 csi_len | u16 tx_channel
//! u8 err_info | u8 noise_floor | u8 rate | u8 bandwidth
//! u8 num_tones | u8 nr | u8 nc
//! u8 rssi | u8 rssi_1 | u8 rssi_2 | u8 rssi_3 | u16 payload_len
//! csi_len bytes of CSI | payload_len bytes of payload
//! ```
//!
//! The CSI is a stream of 10-bit signed values, imaginary part first,
//! ordered tone → tx (`nc`) → rx (`nr`).

use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::bits::{BitReader, ByteCursor, Endian};
use crate::config::AtherosConfig;
use crate::error::{CsiError, CsiResult};
use crate::framing::RawFrame;

/// Size of the fixed record header.
pub const HEADER_LEN: usize = 25;
/// Width of each CSI component in bits.
pub const SAMPLE_BITS: u32 = 10;

/// One decoded Atheros record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtherosRecord {
    /// TSF timestamp.
    pub timestamp: u64,
    /// Bytes of packed CSI.
    pub csi_len: u16,
    /// Channel frequency, MHz.
    pub tx_channel: u16,
    /// PHY error code (0 when none).
    pub err_info: u8,
    /// Noise floor.
    pub noise_floor: u8,
    /// Rate code.
    pub rate: u8,
    /// 0 for 20 MHz, 1 for 40 MHz.
    pub bandwidth: u8,
    /// Subcarriers reported.
    pub num_tones: u8,
    /// Receive antennas.
    pub nr: u8,
    /// Transmit antennas.
    pub nc: u8,
    /// Combined RSSI.
    pub rssi: u8,
    /// RSSI of chain 0.
    pub rssi_1: u8,
    /// RSSI of chain 1.
    pub rssi_2: u8,
    /// RSSI of chain 2.
    pub rssi_3: u8,
    /// Bytes of payload in the record.
    pub payload_len: u16,
    /// Leading payload bytes, at most the configured payload slot.
    pub payload: Vec<u8>,
    /// Host timestamp from the `.datstp` companion file.
    pub stp: Option<f64>,
    /// CSI `[tones, nrxnum, ntxnum]`.
    pub csi: Array3<Complex64>,
}

/// Stateless record decoder.
#[derive(Debug, Clone)]
pub struct AtherosDecoder {
    config: AtherosConfig,
    endian: Endian,
}

impl AtherosDecoder {
    /// Create a decoder reading header fields in `endian` byte order.
    pub fn new(config: AtherosConfig, endian: Endian) -> Self {
        Self { config, endian }
    }

    /// Byte order used for header fields.
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Decode one framed record.
    pub fn decode(&self, frame: &RawFrame<'_>) -> CsiResult<AtherosRecord> {
        let e = self.endian;
        let mut cursor = ByteCursor::with_base(frame.payload, frame.payload_offset);
        let timestamp = cursor.read_u64(e)?;
        let csi_len = cursor.read_u16(e)?;
        let tx_channel = cursor.read_u16(e)?;
        let err_info = cursor.read_u8()?;
        let noise_floor = cursor.read_u8()?;
        let rate = cursor.read_u8()?;
        let bandwidth = cursor.read_u8()?;
        let num_tones = cursor.read_u8()?;
        let nr = cursor.read_u8()?;
        let nc = cursor.read_u8()?;
        let rssi = cursor.read_u8()?;
        let rssi_1 = cursor.read_u8()?;
        let rssi_2 = cursor.read_u8()?;
        let rssi_3 = cursor.read_u8()?;
        let payload_len = cursor.read_u16(e)?;

        let body_len = usize::from(csi_len) + usize::from(payload_len);
        if cursor.remaining() < body_len {
            return Err(CsiError::truncated(
                frame.offset,
                HEADER_LEN + body_len,
                frame.payload.len(),
            ));
        }
        let csi_bytes = cursor.read_bytes(usize::from(csi_len))?;
        let payload_bytes = cursor.read_bytes(usize::from(payload_len))?;

        let (tones, nrx, ntx) = (
            usize::from(num_tones),
            usize::from(nr),
            usize::from(nc),
        );
        let mut csi = Array3::zeros((self.config.tones, self.config.nrxnum, self.config.ntxnum));
        if csi_len > 0 {
            if tones > self.config.tones {
                return Err(CsiError::dimension("num_tones", tones, self.config.tones));
            }
            if nrx > self.config.nrxnum {
                return Err(CsiError::dimension("nr", nrx, self.config.nrxnum));
            }
            if ntx > self.config.ntxnum {
                return Err(CsiError::dimension("nc", ntx, self.config.ntxnum));
            }
            let needed = (tones * nrx * ntx * 2 * SAMPLE_BITS as usize + 7) / 8;
            if csi_bytes.len() < needed {
                return Err(CsiError::truncated(
                    frame.payload_offset + HEADER_LEN,
                    needed,
                    csi_bytes.len(),
                ));
            }

            let mut reader = BitReader::with_base(csi_bytes, frame.payload_offset + HEADER_LEN);
            for k in 0..tones {
                for t in 0..ntx {
                    for r in 0..nrx {
                        let im = reader.read_signed(SAMPLE_BITS)?;
                        let re = reader.read_signed(SAMPLE_BITS)?;
                        csi[[k, r, t]] = Complex64::new(f64::from(re), f64::from(im));
                    }
                }
            }
        }

        let keep = payload_bytes.len().min(self.config.payload_slot);
        Ok(AtherosRecord {
            timestamp,
            csi_len,
            tx_channel,
            err_info,
            noise_floor,
            rate,
            bandwidth,
            num_tones,
            nr,
            nc,
            rssi,
            rssi_1,
            rssi_2,
            rssi_3,
            payload_len,
            payload: payload_bytes[..keep].to_vec(),
            stp: None,
            csi,
        })
    }
}

/// Byte order declared by the first byte of a pull-10 capture.
pub fn pull10_endian(first: u8) -> Endian {
    if first == 0xff {
        Endian::Big
    } else {
        Endian::Little
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;
    use crate::framing::AtherosFrames;

    fn put_u16(out: &mut Vec<u8>, v: u16, e: Endian) {
        match e {
            Endian::Little => out.extend_from_slice(&v.to_le_bytes()),
            Endian::Big => out.extend_from_slice(&v.to_be_bytes()),
        }
    }

    /// Record with value `(k - r, t + 1)` at `[k, r, t]`.
    fn build_record(tones: u8, nr: u8, nc: u8, payload: &[u8], e: Endian) -> Vec<u8> {
        let mut bits = BitWriter::new();
        for k in 0..i32::from(tones) {
            for t in 0..i32::from(nc) {
                for r in 0..i32::from(nr) {
                    bits.push(t + 1, 10);
                    bits.push(k - r, 10);
                }
            }
        }
        let csi = bits.finish();

        let mut body = Vec::new();
        match e {
            Endian::Little => body.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes()),
            Endian::Big => body.extend_from_slice(&0x0102_0304_0506_0708u64.to_be_bytes()),
        }
        put_u16(&mut body, csi.len() as u16, e);
        put_u16(&mut body, 2437, e);
        body.extend_from_slice(&[0, 160, 0x8c, 0, tones, nr, nc, 50, 48, 47, 46]);
        put_u16(&mut body, payload.len() as u16, e);
        body.extend(csi);
        body.extend_from_slice(payload);

        let mut out = Vec::new();
        put_u16(&mut out, body.len() as u16, e);
        out.extend(body);
        out
    }

    fn decode_first(data: &[u8], config: AtherosConfig, e: Endian) -> CsiResult<AtherosRecord> {
        let frame = AtherosFrames::new(data, 0, e).next().unwrap()?;
        AtherosDecoder::new(config, e).decode(&frame)
    }

    #[test]
    fn test_header_is_25_bytes() {
        let data = build_record(0, 0, 0, &[], Endian::Little);
        assert_eq!(data.len(), 2 + HEADER_LEN);
    }

    #[test]
    fn test_decode_little_endian() {
        let config = AtherosConfig {
            payload_slot: 4,
            ..AtherosConfig::default()
        };
        let data = build_record(56, 3, 2, &[1, 2, 3, 4, 5, 6], Endian::Little);
        let record = decode_first(&data, config, Endian::Little).unwrap();

        assert_eq!(record.timestamp, 0x0102_0304_0506_0708);
        assert_eq!(record.tx_channel, 2437);
        assert_eq!(record.noise_floor, 160);
        assert_eq!(record.rate, 0x8c);
        assert_eq!((record.num_tones, record.nr, record.nc), (56, 3, 2));
        assert_eq!(record.rssi_3, 46);
        assert_eq!(record.payload_len, 6);
        assert_eq!(record.payload, vec![1, 2, 3, 4]);
        assert_eq!(record.csi.shape(), &[56, 3, 2]);
        assert_eq!(record.csi[[10, 2, 1]], Complex64::new(8.0, 2.0));
        assert_eq!(record.csi[[0, 1, 0]], Complex64::new(-1.0, 1.0));
    }

    #[test]
    fn test_decode_big_endian() {
        let data = build_record(4, 1, 1, &[], Endian::Big);
        let config = AtherosConfig::default();
        let record = decode_first(&data, config, Endian::Big).unwrap();
        assert_eq!(record.tx_channel, 2437);
        assert_eq!(record.csi[[3, 0, 0]], Complex64::new(3.0, 1.0));
    }

    #[test]
    fn test_zero_csi_len_leaves_zeros() {
        let data = build_record(0, 3, 2, &[], Endian::Little);
        let record = decode_first(&data, AtherosConfig::default(), Endian::Little).unwrap();
        assert_eq!(record.csi_len, 0);
        assert!(record.csi.iter().all(|c| c.norm() == 0.0));
    }

    #[test]
    fn test_oversized_dimensions() {
        let data = build_record(114, 3, 2, &[], Endian::Little);
        let result = decode_first(&data, AtherosConfig::default(), Endian::Little);
        assert!(matches!(
            result,
            Err(CsiError::DimensionMismatch { declared: 114, capacity: 56, .. })
        ));
    }

    #[test]
    fn test_declared_body_longer_than_record() {
        let mut data = build_record(2, 1, 1, &[7; 8], Endian::Little);
        // Shrink the record's length field so the payload falls outside it.
        let len = (data.len() - 2 - 4) as u16;
        data[..2].copy_from_slice(&len.to_le_bytes());
        let result = decode_first(&data, AtherosConfig::default(), Endian::Little);
        assert!(matches!(result, Err(CsiError::TruncatedRecord { .. })));
    }

    #[test]
    fn test_pull10_marker() {
        assert_eq!(pull10_endian(0xff), Endian::Big);
        assert_eq!(pull10_endian(0x00), Endian::Little);
    }
}
