//! Synthetic capture builders shared by the integration tests.

#![allow(dead_code)]

use csi_capture::decoder::intel::csi_byte_len;

/// Antenna selection mapping rx `j` to row `j`.
pub const IDENTITY_ANTENNA_SEL: u8 = 0b10_01_00;

/// One Intel record `[u16 BE len][code][body]`.
pub fn intel_frame(code: u8, body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 1) as u16).to_be_bytes().to_vec();
    out.push(code);
    out.extend_from_slice(body);
    out
}

/// `0xbb` body for `nrx × ntx` antennas with every CSI byte set to `fill`.
pub fn bfee_body(bfee_count: u16, nrx: u8, ntx: u8, fill: u8) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(1_000 + u32::from(bfee_count)).to_le_bytes());
    body.extend_from_slice(&bfee_count.to_le_bytes());
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(&[nrx, ntx, 41, 38, 0, (-92i8) as u8, 30, IDENTITY_ANTENNA_SEL]);
    body.extend_from_slice(&[0, 0]);
    body.extend_from_slice(&0x4101u16.to_le_bytes());
    body.extend(std::iter::repeat(fill).take(csi_byte_len(usize::from(nrx), usize::from(ntx))));
    body
}

/// `0xc1` body: 802.11 header, payload and FCS.
pub fn mac_body(seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x0208u16.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&[0x00, 0x16, 0xea, 0x12, 0x34, 0x56]);
    body.extend_from_slice(&[0x00, 0x16, 0xea, 0x12, 0x34, 0x57]);
    body.extend_from_slice(&[0xff; 6]);
    body.extend_from_slice(&(seq << 4).to_le_bytes());
    body.extend_from_slice(payload);
    body.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
    body
}

/// Intel capture of `records` 3x2 beamforming records. Every third record
/// is preceded by a `0xc1` header.
pub fn intel_capture(records: u16) -> Vec<u8> {
    let mut data = Vec::new();
    for i in 0..records {
        if i % 3 == 0 {
            data.extend(intel_frame(0xc1, &mac_body(i, &[i as u8; 4])));
        }
        data.extend(intel_frame(0xbb, &bfee_body(i, 3, 2, i as u8)));
    }
    data
}

/// pcap global header, little endian, microsecond timestamps.
pub fn pcap_global_header() -> Vec<u8> {
    let mut out = 0xa1b2_c3d4u32.to_le_bytes().to_vec();
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&4u16.to_le_bytes());
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(&65535u32.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out
}

/// pcap record holding a nexmon UDP packet for an int16 chip with `nfft`
/// values.
pub fn nexmon_record(sec: u32, seq: u16, core: u16, spatial: u16, nfft: usize) -> Vec<u8> {
    let mut packet = vec![0xffu8; 6];
    packet.extend_from_slice(b"NEXMON");
    packet.resize(42, 0);
    packet.extend_from_slice(&0x1111_1111u32.to_le_bytes());
    packet.extend_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    packet.extend_from_slice(&seq.to_le_bytes());
    packet.extend_from_slice(&(core | (spatial << 3)).to_le_bytes());
    packet.extend_from_slice(&0xe024u16.to_le_bytes());
    packet.extend_from_slice(&0x4339u16.to_le_bytes());
    for k in 0..nfft {
        packet.extend_from_slice(&(k as i16).to_le_bytes());
        packet.extend_from_slice(&(-(seq as i16)).to_le_bytes());
    }

    let mut out = Vec::new();
    out.extend_from_slice(&sec.to_le_bytes());
    out.extend_from_slice(&500u32.to_le_bytes());
    out.extend_from_slice(&(packet.len() as u32).to_le_bytes());
    out.extend_from_slice(&(packet.len() as u32).to_le_bytes());
    out.extend(packet);
    out
}

/// A PicoScenes segment `[u32 len][u8 nameLen][name\0][u16 version][content]`.
pub fn pico_segment(name: &str, version: u16, content: &[u8]) -> Vec<u8> {
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

/// RxSBasic v3 content for a QCA9300 on a 20 MHz channel.
pub fn rxs_basic_v3() -> Vec<u8> {
    let mut c = Vec::new();
    c.extend_from_slice(&0x9300u16.to_le_bytes());
    c.extend_from_slice(&1_234_567u64.to_le_bytes());
    c.extend_from_slice(&5200i16.to_le_bytes());
    c.extend_from_slice(&5200i16.to_le_bytes());
    c.extend_from_slice(&20u16.to_le_bytes());
    c.push(1);
    c.extend_from_slice(&20u16.to_le_bytes());
    c.extend_from_slice(&800u16.to_le_bytes());
    c.extend_from_slice(&[3, 1, 0, 1, 1, 0]);
    c.extend_from_slice(&[(-92i8) as u8, (-50i8) as u8, (-51i8) as u8, (-52i8) as u8, 0]);
    c
}

/// 24-byte 802.11 data frame header.
pub fn wifi_header(seq: u16) -> Vec<u8> {
    let mut h = Vec::new();
    h.extend_from_slice(&0x0208u16.to_le_bytes());
    h.extend_from_slice(&0u16.to_le_bytes());
    h.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
    h.extend_from_slice(&[7, 8, 9, 10, 11, 12]);
    h.extend_from_slice(&[0xff; 6]);
    h.extend_from_slice(&(seq << 4).to_le_bytes());
    h
}

/// A complete PicoScenes frame: RxSBasic, then an MPDU of
/// `24 + payload_len` bytes.
pub fn pico_frame(seq: u16, payload_len: usize) -> Vec<u8> {
    pico_frame_with(seq, payload_len, &[])
}

/// [`pico_frame`] with `extra` rx segments after RxSBasic.
pub fn pico_frame_with(seq: u16, payload_len: usize, extra: &[Vec<u8>]) -> Vec<u8> {
    let mut body = 0x2015_0315u32.to_le_bytes().to_vec();
    body.extend_from_slice(&1u16.to_le_bytes());
    body.push(1 + extra.len() as u8);
    body.extend(pico_segment("RxSBasic", 3, &rxs_basic_v3()));
    for segment in extra {
        body.extend_from_slice(segment);
    }
    body.extend(wifi_header(seq));
    body.extend(std::iter::repeat(0x5a).take(payload_len));

    let mut out = (body.len() as u32).to_le_bytes().to_vec();
    out.extend(body);
    out
}
