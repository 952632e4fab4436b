//! Linux 802.11n CSI Tool (Intel 5300) decoder.
//!
//! The tool logs two record types. `0xbb` carries the beamforming feedback:
//!
//! | Offset | Field                         |
//! |--------|-------------------------------|
//! | 0      | timestamp_low (u32 LE)        |
//! | 4      | bfee_count (u16 LE)           |
//! | 8      | Nrx, Ntx                      |
//! | 10     | rssi_a, rssi_b, rssi_c        |
//! | 13     | noise (i8)                    |
//! | 14     | agc                           |
//! | 15     | antenna_sel                   |
//! | 16     | CSI byte length (u16 LE)      |
//! | 18     | fake rate_n_flags (u16 LE)    |
//! | 20     | CSI bits                      |
//!
//! Each of the 30 subcarriers starts with 3 unused bits, followed by
//! `Nrx · Ntx` pairs of 8-bit signed (real, imag), tx varying fastest.
//!
//! `0xc1` carries the 802.11 header and payload of the packet whose CSI
//! follows in the next `0xbb` record.

use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::MacAddr;
use crate::bits::{BitReader, ByteCursor, Endian};
use crate::config::IntelConfig;
use crate::error::{CsiError, CsiResult};
use crate::framing::{RawFrame, INTEL_CODE_CSI, INTEL_CODE_MAC};

/// Subcarriers reported per record.
pub const INTEL_SUBCARRIERS: usize = 30;
/// Offset of the CSI bits within a `0xbb` payload.
pub const CSI_OFFSET: usize = 20;
/// Bytes of the 802.11 header within a `0xc1` payload.
pub const MAC_HEADER_LEN: usize = 24;

/// Bytes of packed CSI for `nrx × ntx` antennas.
pub fn csi_byte_len(nrx: usize, ntx: usize) -> usize {
    (INTEL_SUBCARRIERS * (nrx * ntx * 16 + 3) + 7) / 8
}

/// Scaling already applied to a record's CSI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CsiScale {
    /// Raw firmware integers.
    #[default]
    Raw,
    /// Scaled to the reported RSSI.
    Scaled,
    /// Scaled and with the transmit spatial mapping removed.
    ScaledSm,
}

/// 802.11 header and payload carried by a `0xc1` record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacHeader {
    /// Frame control.
    pub fc: u16,
    /// Duration.
    pub dur: u16,
    /// Receiver address.
    pub addr_des: MacAddr,
    /// Transmitter address.
    pub addr_src: MacAddr,
    /// BSSID.
    pub addr_bssid: MacAddr,
    /// Sequence number (sequence control without the fragment bits).
    pub seq: u16,
    /// Leading payload bytes, at most the configured payload slot.
    pub payload: Vec<u8>,
}

/// One decoded beamforming-feedback record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelRecord {
    /// Low 32 bits of the NIC's 1 MHz clock.
    pub timestamp_low: u32,
    /// Driver's running count of feedback reports.
    pub bfee_count: u16,
    /// Receive antennas used.
    pub nrx: u8,
    /// Transmit streams used.
    pub ntx: u8,
    /// RSSI of antenna A, dB.
    pub rssi_a: u8,
    /// RSSI of antenna B, dB.
    pub rssi_b: u8,
    /// RSSI of antenna C, dB.
    pub rssi_c: u8,
    /// Noise floor, dBm (-127 when unknown).
    pub noise: i8,
    /// Automatic gain control setting.
    pub agc: u8,
    /// Raw antenna selection byte.
    pub antenna_sel: u8,
    /// Receive antenna permutation decoded from `antenna_sel`.
    pub perm: [u8; 3],
    /// rate_n_flags, truncated to 16 bits.
    pub rate: u16,
    /// Header of the preceding `0xc1` record, if any.
    pub mac: Option<MacHeader>,
    /// Host timestamp from the `.datstp` companion file.
    pub stp: Option<f64>,
    /// CSI `[30, nrxnum, ntxnum]`.
    pub csi: Array3<Complex64>,
    /// Scaling applied to `csi`.
    pub scale: CsiScale,
}

impl IntelRecord {
    /// Whether the packet was sent on a 40 MHz channel.
    pub fn is_40mhz(&self) -> bool {
        self.rate & 0x800 != 0
    }
}

/// Stateful decoder: remembers a `0xc1` header until the next `0xbb`.
#[derive(Debug, Clone)]
pub struct IntelDecoder {
    config: IntelConfig,
    pending_mac: Option<MacHeader>,
}

impl IntelDecoder {
    /// Create a decoder for the given capacities.
    pub fn new(config: IntelConfig) -> Self {
        Self {
            config,
            pending_mac: None,
        }
    }

    /// Drop any pending `0xc1` header.
    pub fn reset(&mut self) {
        self.pending_mac = None;
    }

    /// Feed one frame. Returns a record for `0xbb`, `None` for `0xc1` and
    /// any other code.
    pub fn feed(&mut self, frame: &RawFrame<'_>) -> CsiResult<Option<IntelRecord>> {
        match frame.code {
            INTEL_CODE_MAC => {
                self.pending_mac = Some(self.decode_mac(frame)?);
                Ok(None)
            }
            INTEL_CODE_CSI => {
                let mac = self.pending_mac.take();
                let mut record = self.decode_csi(frame)?;
                record.mac = mac;
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    /// Decode a `0xc1` payload.
    pub fn decode_mac(&self, frame: &RawFrame<'_>) -> CsiResult<MacHeader> {
        let mut cursor = ByteCursor::with_base(frame.payload, frame.payload_offset);
        let fc = cursor.read_u16(Endian::Little)?;
        let dur = cursor.read_u16(Endian::Little)?;
        let addr_des = cursor.read_array::<6>()?;
        let addr_src = cursor.read_array::<6>()?;
        let addr_bssid = cursor.read_array::<6>()?;
        let seq = cursor.read_u16(Endian::Little)? >> 4;

        // The trailing 4 bytes are the FCS.
        let body = cursor.rest();
        let body = &body[..body.len().saturating_sub(4)];
        let keep = body.len().min(self.config.payload_slot);
        Ok(MacHeader {
            fc,
            dur,
            addr_des,
            addr_src,
            addr_bssid,
            seq,
            payload: body[..keep].to_vec(),
        })
    }

    /// Decode a `0xbb` payload.
    pub fn decode_csi(&self, frame: &RawFrame<'_>) -> CsiResult<IntelRecord> {
        let mut cursor = ByteCursor::with_base(frame.payload, frame.payload_offset);
        let timestamp_low = cursor.read_u32(Endian::Little)?;
        let bfee_count = cursor.read_u16(Endian::Little)?;
        cursor.skip(2)?;
        let nrx = cursor.read_u8()?;
        let ntx = cursor.read_u8()?;
        let rssi_a = cursor.read_u8()?;
        let rssi_b = cursor.read_u8()?;
        let rssi_c = cursor.read_u8()?;
        let noise = cursor.read_i8()?;
        let agc = cursor.read_u8()?;
        let antenna_sel = cursor.read_u8()?;
        cursor.skip(2)?;
        let rate = cursor.read_u16(Endian::Little)?;

        let (nrx_n, ntx_n) = (usize::from(nrx), usize::from(ntx));
        if nrx_n == 0 || ntx_n == 0 {
            return Err(CsiError::malformed(
                frame.offset,
                format!("antenna counts Nrx={nrx} Ntx={ntx}"),
            ));
        }
        let rx_capacity = self.config.nrxnum.min(3);
        if nrx_n > rx_capacity {
            return Err(CsiError::dimension("Nrx", nrx_n, rx_capacity));
        }
        if ntx_n > self.config.ntxnum {
            return Err(CsiError::dimension("Ntx", ntx_n, self.config.ntxnum));
        }

        let perm = [
            antenna_sel & 0x3,
            (antenna_sel >> 2) & 0x3,
            (antenna_sel >> 4) & 0x3,
        ];
        let mut seen = [false; 4];
        for &p in &perm[..nrx_n] {
            let p = usize::from(p);
            if p >= self.config.nrxnum || seen[p] {
                return Err(CsiError::malformed(
                    frame.offset,
                    format!("invalid antenna permutation {perm:?} for Nrx={nrx}"),
                ));
            }
            seen[p] = true;
        }

        let needed = csi_byte_len(nrx_n, ntx_n);
        let bits = cursor.rest();
        if bits.len() < needed {
            return Err(CsiError::truncated(
                frame.payload_offset + CSI_OFFSET,
                needed,
                bits.len(),
            ));
        }

        let mut csi = Array3::zeros((INTEL_SUBCARRIERS, self.config.nrxnum, self.config.ntxnum));
        let mut reader = BitReader::with_base(bits, frame.payload_offset + CSI_OFFSET);
        for sc in 0..INTEL_SUBCARRIERS {
            reader.skip_bits(3)?;
            for r in 0..nrx_n {
                let row = usize::from(perm[r]);
                for t in 0..ntx_n {
                    let re = reader.read_signed(8)?;
                    let im = reader.read_signed(8)?;
                    csi[[sc, row, t]] = Complex64::new(f64::from(re), f64::from(im));
                }
            }
        }

        Ok(IntelRecord {
            timestamp_low,
            bfee_count,
            nrx,
            ntx,
            rssi_a,
            rssi_b,
            rssi_c,
            noise,
            agc,
            antenna_sel,
            perm,
            rate,
            mac: None,
            stp: None,
            csi,
            scale: CsiScale::Raw,
        })
    }
}
