//! ESP32-CSI-Tool CSV decoder.
//!
//! A full row has 25 scalar columns followed by the CSI as a bracketed,
//! space-separated integer list:
//!
//! ```text
//! CSI_DATA,AP,3C:71:BF:6D:2A:78,-73,11,1,0,0,0,1,0,0,0,0,-93,0,1,1,80115,0,128,0,0,0.000000,128,[104 -128 3 0 ...]
//! ```
//!
//! In `csi_only` mode everything before the last `,[` is ignored. The CSI
//! integers alternate imaginary/real: value `k` is `csi[2k+1] + j·csi[2k]`.

use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::Esp32Config;
use crate::error::{CsiError, CsiResult};
use crate::framing::RawFrame;

/// Leading tag of every CSI row.
pub const ROW_TAG: &str = "CSI_DATA";

/// Column names of a full row, in file order.
pub const ESP32_COLUMNS: [&str; 26] = [
    "type",
    "role",
    "mac",
    "rssi",
    "rate",
    "sig_mode",
    "mcs",
    "bandwidth",
    "smoothing",
    "not_sounding",
    "aggregation",
    "stbc",
    "fec_coding",
    "sgi",
    "noise_floor",
    "ampdu_cnt",
    "channel",
    "secondary_channel",
    "local_timestamp",
    "ant",
    "sig_len",
    "rx_state",
    "real_time_set",
    "real_timestamp",
    "len",
    "CSI_DATA",
];

const FIRST_INT: usize = 3;
const INT_COLUMNS: usize = 20;
const REAL_TIMESTAMP: usize = 23;
const LEN: usize = 24;

/// One decoded CSV row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Esp32Record {
    /// Row tag, `CSI_DATA`.
    pub kind: String,
    /// `AP` or `STA`.
    pub role: String,
    /// Transmitter MAC as printed by the firmware.
    pub mac: String,
    /// RSSI of the packet, dBm.
    pub rssi: i64,
    /// PHY rate encoding.
    pub rate: i64,
    /// 0 non-HT, 1 HT, 3 VHT.
    pub sig_mode: i64,
    /// Modulation coding scheme.
    pub mcs: i64,
    /// 0 for 20 MHz, 1 for 40 MHz.
    pub bandwidth: i64,
    /// Whether the receiver smoothed the channel estimate.
    pub smoothing: i64,
    /// 0 for a sounding PPDU.
    pub not_sounding: i64,
    /// Whether the packet was aggregated.
    pub aggregation: i64,
    /// Space-time block coding.
    pub stbc: i64,
    /// 1 for LDPC.
    pub fec_coding: i64,
    /// Short guard interval.
    pub sgi: i64,
    /// Noise floor, dBm.
    pub noise_floor: i64,
    /// A-MPDU count.
    pub ampdu_cnt: i64,
    /// Primary channel.
    pub channel: i64,
    /// 0 none, 1 above, 2 below the primary.
    pub secondary_channel: i64,
    /// Receive time on the chip, microseconds.
    pub local_timestamp: i64,
    /// Antenna number.
    pub ant: i64,
    /// Length of the packet, bytes.
    pub sig_len: i64,
    /// Receiver state, 0 when the packet is error-free.
    pub rx_state: i64,
    /// Whether the host clock was set.
    pub real_time_set: i64,
    /// Host-side timestamp, seconds.
    pub real_timestamp: f64,
    /// Number of CSI integers declared by the firmware.
    pub len: i64,
    /// CSI `[maxlen / 2, 1, 1]`.
    pub csi: Array3<Complex64>,
}

/// Row decoder.
#[derive(Debug, Clone)]
pub struct Esp32Decoder {
    config: Esp32Config,
}

impl Esp32Decoder {
    /// Create a decoder.
    pub fn new(config: Esp32Config) -> Self {
        Self { config }
    }

    /// Whether `line` is a record row for this layout.
    pub fn is_record(&self, line: &[u8]) -> bool {
        if self.config.csi_only {
            line.contains(&b'[')
        } else {
            line.starts_with(ROW_TAG.as_bytes())
        }
    }

    /// Decode one row.
    pub fn decode(&self, frame: &RawFrame<'_>) -> CsiResult<Esp32Record> {
        let offset = frame.offset;
        let line = std::str::from_utf8(frame.payload)
            .map_err(|_| CsiError::malformed(offset, "row is not valid UTF-8"))?
            .trim();

        if self.config.csi_only {
            let csi_text = line.rsplit(",[").next().unwrap_or(line);
            return Ok(Esp32Record {
                csi: self.parse_csi(csi_text, offset)?,
                ..Esp32Record::default()
            });
        }

        let fields: Vec<&str> = line.splitn(ESP32_COLUMNS.len(), ',').collect();
        if fields.len() < ESP32_COLUMNS.len() {
            return Err(CsiError::malformed(
                offset,
                format!(
                    "expected {} columns, found {}",
                    ESP32_COLUMNS.len(),
                    fields.len()
                ),
            ));
        }

        let mut ints = [0i64; INT_COLUMNS];
        for (i, slot) in ints.iter_mut().enumerate() {
            *slot = parse_column(&fields, FIRST_INT + i, offset)?;
        }
        let real_timestamp: f64 = parse_column(&fields, REAL_TIMESTAMP, offset)?;
        let len: i64 = parse_column(&fields, LEN, offset)?;
        let csi = self.parse_csi(fields[ESP32_COLUMNS.len() - 1], offset)?;

        let [rssi, rate, sig_mode, mcs, bandwidth, smoothing, not_sounding, aggregation, stbc, fec_coding, sgi, noise_floor, ampdu_cnt, channel, secondary_channel, local_timestamp, ant, sig_len, rx_state, real_time_set] =
            ints;
        Ok(Esp32Record {
            kind: fields[0].to_string(),
            role: fields[1].to_string(),
            mac: fields[2].to_string(),
            rssi,
            rate,
            sig_mode,
            mcs,
            bandwidth,
            smoothing,
            not_sounding,
            aggregation,
            stbc,
            fec_coding,
            sgi,
            noise_floor,
            ampdu_cnt,
            channel,
            secondary_channel,
            local_timestamp,
            ant,
            sig_len,
            rx_state,
            real_time_set,
            real_timestamp,
            len,
            csi,
        })
    }

    fn parse_csi(&self, text: &str, offset: usize) -> CsiResult<Array3<Complex64>> {
        let body = text.trim().trim_start_matches('[').trim_end_matches(']');
        let values = body
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<i64>().map_err(|_| {
                    CsiError::malformed(offset, format!("non-numeric CSI value `{s}`"))
                })
            })
            .collect::<CsiResult<Vec<_>>>()?;

        if values.len() > self.config.maxlen {
            return Err(CsiError::dimension("csi", values.len(), self.config.maxlen));
        }

        let mut csi = Array3::zeros((self.config.maxlen / 2, 1, 1));
        for (k, pair) in values.chunks(2).enumerate() {
            let im = pair[0] as f64;
            let re = pair.get(1).copied().unwrap_or(0) as f64;
            csi[[k, 0, 0]] = Complex64::new(re, im);
        }
        Ok(csi)
    }
}

fn parse_column<T: std::str::FromStr>(fields: &[&str], index: usize, offset: usize) -> CsiResult<T> {
    let raw = fields[index].trim();
    raw.parse().map_err(|_| {
        CsiError::malformed(
            offset,
            format!("column `{}` is not numeric: `{raw}`", ESP32_COLUMNS[index]),
        )
    })
}
