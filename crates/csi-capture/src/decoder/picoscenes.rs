//! PicoScenes `.csi` frame decoder.
//!
//! A frame is a list of rx segments written by the receiver, followed by the
//! received MPDU. When the MPDU was sent by PicoScenes itself, the 802.11
//! header is followed by a PicoScenes tx header and a list of tx segments.
//!
//! ```text
//! rx header | rx segment × N | 802.11 header | [tx header | tx segment × M] | ...
//! ```
//!
//! Every sub-field with a configured capacity (the three CSI kinds, the two
//! signal matrices and the MPDU) is checked against it before decoding. A
//! sub-field that does not fit is skipped and counted in [`CapacityUsage`];
//! the rest of the frame still decodes.

use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::intel::csi_byte_len;
use super::MacAddr;
use crate::bits::{BitReader, ByteCursor, Endian};
use crate::config::{CsiCapacity, PicoScenesConfig};
use crate::error::{CsiError, CsiResult};
use crate::framing::segment::{PicoFrame, RxFrameHeader, Segment, FRAME_MAGIC};
use crate::subcarrier::{iwl5300_subcarriers, qca9300_subcarriers};
use crate::transform::{interpolate_gaps, InterpolationMode};

const LE: Endian = Endian::Little;

/// Size of the 802.11 MAC header opening the MPDU.
pub const MAC_FRAME_HEADER_LEN: usize = 24;
/// Size of the PicoScenes tx header.
pub const PICOSCENES_HEADER_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Device types
// ---------------------------------------------------------------------------

/// Hardware that produced a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PicoDevice {
    /// Qualcomm Atheros AR9300.
    Qca9300,
    /// Intel Wireless Link 5300.
    Iwl5300,
    /// Intel AX200 (iwlmvm).
    IwlMvmAx200,
    /// Intel AX210 (iwlmvm).
    IwlMvmAx210,
    /// Generic mac80211 NIC.
    Mac80211Compatible,
    /// Ettus USRP software radio.
    Usrp,
    /// Simulated SDR.
    VirtualSdr,
    /// Anything else.
    Unknown(u16),
}

impl PicoDevice {
    /// Map a device type code.
    pub fn from_code(code: u16) -> Self {
        match code {
            0x9300 => Self::Qca9300,
            0x5300 => Self::Iwl5300,
            0x2000 => Self::IwlMvmAx200,
            0x2100 => Self::IwlMvmAx210,
            0x0802 => Self::Mac80211Compatible,
            0x1234 => Self::Usrp,
            0x1000 => Self::VirtualSdr,
            other => Self::Unknown(other),
        }
    }

    /// The device type code.
    pub fn code(self) -> u16 {
        match self {
            Self::Qca9300 => 0x9300,
            Self::Iwl5300 => 0x5300,
            Self::IwlMvmAx200 => 0x2000,
            Self::IwlMvmAx210 => 0x2100,
            Self::Mac80211Compatible => 0x0802,
            Self::Usrp => 0x1234,
            Self::VirtualSdr => 0x1000,
            Self::Unknown(code) => code,
        }
    }
}

// ---------------------------------------------------------------------------
// Capacity accounting
// ---------------------------------------------------------------------------

/// Sub-fields whose size is bounded by the session configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PicoField {
    Csi,
    PilotCsi,
    LegacyCsi,
    BasebandSignals,
    PreEqSymbols,
    Mpdu,
}

impl PicoField {
    /// All bounded sub-fields, in report order.
    pub const ALL: [PicoField; 6] = [
        PicoField::Csi,
        PicoField::PilotCsi,
        PicoField::LegacyCsi,
        PicoField::BasebandSignals,
        PicoField::PreEqSymbols,
        PicoField::Mpdu,
    ];

    /// Segment or field name as written in the capture.
    pub fn name(self) -> &'static str {
        match self {
            PicoField::Csi => "CSI",
            PicoField::PilotCsi => "PilotCSI",
            PicoField::LegacyCsi => "LegacyCSI",
            PicoField::BasebandSignals => "BasebandSignal",
            PicoField::PreEqSymbols => "PreEQSymbols",
            PicoField::Mpdu => "MPDU",
        }
    }
}

/// Observed demand for one sub-field.
///
/// Sizes are `[tones, tx, rx]` for CSI fields and `[n, 1, 1]` for the
/// element and byte counted fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldUsage {
    /// Configured capacity.
    pub configured: [usize; 3],
    /// Element-wise minimum required size.
    pub min: Option<[usize; 3]>,
    /// Element-wise maximum required size.
    pub max: Option<[usize; 3]>,
    /// Occurrences seen.
    pub seen: usize,
    /// Occurrences skipped for not fitting.
    pub skipped: usize,
}

impl FieldUsage {
    fn new(configured: [usize; 3]) -> Self {
        Self {
            configured,
            ..Self::default()
        }
    }

    /// Record one occurrence; returns whether it fits.
    fn observe(&mut self, required: [usize; 3]) -> bool {
        self.seen += 1;
        self.min = Some(match self.min {
            Some(m) => std::array::from_fn(|i| m[i].min(required[i])),
            None => required,
        });
        self.max = Some(match self.max {
            Some(m) => std::array::from_fn(|i| m[i].max(required[i])),
            None => required,
        });
        let fits = required
            .iter()
            .zip(&self.configured)
            .all(|(need, cap)| need <= cap);
        if !fits {
            self.skipped += 1;
        }
        fits
    }
}

/// Per-field demand collected while decoding PicoScenes frames.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityUsage {
    /// CSI sub-field.
    pub csi: FieldUsage,
    /// Pilot CSI sub-field.
    pub pilot_csi: FieldUsage,
    /// Legacy CSI sub-field.
    pub legacy_csi: FieldUsage,
    /// Baseband signal matrix.
    pub baseband_signals: FieldUsage,
    /// Pre-equalization symbols.
    pub pre_eq_symbols: FieldUsage,
    /// MPDU bytes.
    pub mpdu: FieldUsage,
}

impl CapacityUsage {
    /// Empty usage for the configured capacities.
    pub fn new(config: &PicoScenesConfig) -> Self {
        let dims = |c: &CsiCapacity| [c.tones, c.tx, c.rx];
        Self {
            csi: FieldUsage::new(dims(&config.csi)),
            pilot_csi: FieldUsage::new(dims(&config.pilot_csi)),
            legacy_csi: FieldUsage::new(dims(&config.legacy_csi)),
            baseband_signals: FieldUsage::new([config.baseband_signals, 1, 1]),
            pre_eq_symbols: FieldUsage::new([config.pre_eq_symbols, 1, 1]),
            mpdu: FieldUsage::new([config.mpdu, 1, 1]),
        }
    }

    /// Usage of one field.
    pub fn field(&self, field: PicoField) -> &FieldUsage {
        match field {
            PicoField::Csi => &self.csi,
            PicoField::PilotCsi => &self.pilot_csi,
            PicoField::LegacyCsi => &self.legacy_csi,
            PicoField::BasebandSignals => &self.baseband_signals,
            PicoField::PreEqSymbols => &self.pre_eq_symbols,
            PicoField::Mpdu => &self.mpdu,
        }
    }

    fn field_mut(&mut self, field: PicoField) -> &mut FieldUsage {
        match field {
            PicoField::Csi => &mut self.csi,
            PicoField::PilotCsi => &mut self.pilot_csi,
            PicoField::LegacyCsi => &mut self.legacy_csi,
            PicoField::BasebandSignals => &mut self.baseband_signals,
            PicoField::PreEqSymbols => &mut self.pre_eq_symbols,
            PicoField::Mpdu => &mut self.mpdu,
        }
    }

    /// Skips summed over every field.
    pub fn total_skipped(&self) -> usize {
        PicoField::ALL.iter().map(|&f| self.field(f).skipped).sum()
    }

    fn admit(&mut self, field: PicoField, required: [usize; 3]) -> bool {
        let fits = self.field_mut(field).observe(required);
        if !fits {
            debug!(
                field = field.name(),
                ?required,
                configured = ?self.field(field).configured,
                "sub-field exceeds capacity, skipping"
            );
        }
        fits
    }
}

// ---------------------------------------------------------------------------
// RxSBasic
// ---------------------------------------------------------------------------

/// Receiver-side basic information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RxSBasic {
    /// Receiving device code.
    pub device_type: u16,
    /// Hardware timestamp.
    pub tstamp: u64,
    /// Center frequency, MHz.
    pub center_freq: i16,
    /// Control channel frequency, MHz.
    pub control_freq: i16,
    /// Channel bandwidth, MHz.
    pub cbw: u16,
    /// 0 NonHT, 1 HT, 2 VHT, 3 HE-SU, 4 HE-MU.
    pub packet_format: u8,
    /// Packet bandwidth, MHz.
    pub pkt_cbw: u16,
    /// Guard interval, ns.
    pub guard_interval: u16,
    /// Modulation coding scheme.
    pub mcs: u8,
    /// Space-time streams.
    pub num_sts: u8,
    /// Extension spatial streams.
    pub num_ess: u8,
    /// Receive chains.
    pub num_rx: u8,
    /// Users in an MU transmission.
    pub num_user: u8,
    /// This receiver's user index.
    pub user_index: u8,
    /// Noise floor, dBm.
    pub noise_floor: i8,
    /// Frame RSSI, dBm.
    pub rssi: i16,
    /// RSSI of rx chain 0, dBm.
    pub rssi_ctl0: i16,
    /// RSSI of rx chain 1, dBm.
    pub rssi_ctl1: i16,
    /// RSSI of rx chain 2, dBm.
    pub rssi_ctl2: i16,
}

impl RxSBasic {
    /// Parse an `RxSBasic` segment, versions 1 to 3.
    pub fn parse(segment: &Segment<'_>) -> CsiResult<Self> {
        let mut c = ByteCursor::with_base(segment.content, segment.content_offset);
        let mut basic = Self {
            num_user: 1,
            ..Self::default()
        };
        match segment.version {
            1 | 2 => {
                basic.device_type = c.read_u16(LE)?;
                basic.tstamp = c.read_u64(LE)?;
                basic.center_freq = c.read_i16(LE)?;
                basic.control_freq = basic.center_freq;
                basic.packet_format = c.read_u8()?;
                basic.cbw = c.read_u16(LE)?;
                basic.pkt_cbw = basic.cbw;
                basic.guard_interval = c.read_u16(LE)?;
                basic.mcs = c.read_u8()?;
                basic.num_sts = c.read_u8()?;
                basic.num_ess = c.read_u8()?;
                basic.num_rx = c.read_u8()?;
                if segment.version == 2 {
                    basic.num_user = c.read_u8()?;
                    basic.user_index = c.read_u8()?;
                }
                basic.noise_floor = c.read_i8()?;
                // Older firmware reports RSSI relative to the noise floor.
                let nf = i16::from(basic.noise_floor);
                basic.rssi = nf + i16::from(c.read_i8()?);
                basic.rssi_ctl0 = nf + i16::from(c.read_i8()?);
                basic.rssi_ctl1 = nf + i16::from(c.read_i8()?);
                basic.rssi_ctl2 = nf + i16::from(c.read_i8()?);
            }
            3 => {
                basic.device_type = c.read_u16(LE)?;
                basic.tstamp = c.read_u64(LE)?;
                basic.center_freq = c.read_i16(LE)?;
                basic.control_freq = c.read_i16(LE)?;
                basic.cbw = c.read_u16(LE)?;
                basic.packet_format = c.read_u8()?;
                basic.pkt_cbw = c.read_u16(LE)?;
                basic.guard_interval = c.read_u16(LE)?;
                basic.mcs = c.read_u8()?;
                basic.num_sts = c.read_u8()?;
                basic.num_ess = c.read_u8()?;
                basic.num_rx = c.read_u8()?;
                basic.num_user = c.read_u8()?;
                basic.user_index = c.read_u8()?;
                basic.noise_floor = c.read_i8()?;
                basic.rssi = i16::from(c.read_i8()?);
                basic.rssi_ctl0 = i16::from(c.read_i8()?);
                basic.rssi_ctl1 = i16::from(c.read_i8()?);
                basic.rssi_ctl2 = i16::from(c.read_i8()?);
            }
            v => return Err(CsiError::unsupported("RxSBasic segment version", v)),
        }
        if c.remaining() != 0 {
            return Err(CsiError::malformed(
                segment.offset,
                format!("RxSBasic v{} has {} trailing bytes", segment.version, c.remaining()),
            ));
        }
        Ok(basic)
    }
}

// ---------------------------------------------------------------------------
// ExtraInfo
// ---------------------------------------------------------------------------

/// One optional ExtraInfo field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtraInfoFeature {
    /// Field name.
    pub name: &'static str,
    /// Presence bit in the feature code.
    pub bit: u32,
    /// Encoded size in bytes.
    pub size: usize,
}

const fn feature(name: &'static str, bit: u32, size: usize) -> ExtraInfoFeature {
    ExtraInfoFeature { name, bit, size }
}

/// ExtraInfo fields in encoding order. Bits 0 and 1 are stored swapped.
pub const EXTRA_INFO_FEATURES: [ExtraInfoFeature; 25] = [
    feature("length", 1, 2),
    feature("version", 0, 8),
    feature("macaddr_cur", 2, 6),
    feature("macaddr_rom", 3, 6),
    feature("chansel", 4, 4),
    feature("bmode", 5, 1),
    feature("evm", 6, 20),
    feature("tx_chain_mask", 7, 1),
    feature("rx_chain_mask", 8, 1),
    feature("txpower", 9, 1),
    feature("cf", 10, 8),
    feature("tx_tsf", 11, 4),
    feature("last_hw_tx_tsf", 12, 4),
    feature("channel_flags", 13, 2),
    feature("tx_ness", 14, 1),
    feature("tuning_policy", 15, 1),
    feature("pll_rate", 16, 2),
    feature("pll_refdiv", 17, 1),
    feature("pll_clock_select", 18, 1),
    feature("agc", 19, 1),
    feature("ant_sel", 20, 1),
    feature("sampling_rate", 21, 8),
    feature("cfo", 22, 4),
    feature("sfo", 23, 4),
    feature("precise_tx_timing", 24, 8),
];

/// Feature-code driven driver and radio state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraInfo {
    /// Bit set of the fields present.
    pub feature_code: u32,
    /// Encoded length.
    pub length: Option<u16>,
    /// Driver version.
    pub version: Option<u64>,
    /// Current MAC address.
    pub macaddr_cur: Option<MacAddr>,
    /// MAC address burned into ROM.
    pub macaddr_rom: Option<MacAddr>,
    /// Channel selection word.
    pub chansel: Option<u32>,
    /// Whether 802.11b mode is on.
    pub bmode: Option<u8>,
    /// Per-chain EVM.
    pub evm: Option<[i8; 20]>,
    /// Enabled transmit chains.
    pub tx_chain_mask: Option<u8>,
    /// Enabled receive chains.
    pub rx_chain_mask: Option<u8>,
    /// Transmit power, dBm.
    pub txpower: Option<u8>,
    /// Carrier frequency, Hz.
    pub cf: Option<u64>,
    /// TSF at transmit.
    pub tx_tsf: Option<u32>,
    /// TSF of the last hardware transmission.
    pub last_hw_tx_tsf: Option<u32>,
    /// Channel flags.
    pub channel_flags: Option<u16>,
    /// Transmit extension streams.
    pub tx_ness: Option<u8>,
    /// Frequency tuning policy.
    pub tuning_policy: Option<u8>,
    /// PLL rate.
    pub pll_rate: Option<u16>,
    /// PLL reference divider.
    pub pll_refdiv: Option<u8>,
    /// PLL clock select.
    pub pll_clock_select: Option<u8>,
    /// Automatic gain control.
    pub agc: Option<u8>,
    /// Antenna selection, expanded to one 1-based entry per chain.
    pub ant_sel: Option<[u8; 3]>,
    /// Baseband sampling rate, Hz.
    pub sampling_rate: Option<u64>,
    /// Carrier frequency offset.
    pub cfo: Option<i32>,
    /// Sampling frequency offset.
    pub sfo: Option<i32>,
    /// Transmit timestamp, seconds.
    pub precise_tx_timing: Option<f64>,
}

impl ExtraInfo {
    /// Encoded size of the fields selected by `feature_code`, excluding
    /// the code itself.
    pub fn encoded_len(feature_code: u32) -> usize {
        EXTRA_INFO_FEATURES
            .iter()
            .filter(|f| feature_code >> f.bit & 1 == 1)
            .map(|f| f.size)
            .sum()
    }

    /// Names of the fields present.
    pub fn present_fields(&self) -> Vec<&'static str> {
        EXTRA_INFO_FEATURES
            .iter()
            .filter(|f| self.feature_code >> f.bit & 1 == 1)
            .map(|f| f.name)
            .collect()
    }

    /// Read a feature code followed by the fields it selects.
    pub fn read(c: &mut ByteCursor<'_>) -> CsiResult<Self> {
        let at = c.absolute_position();
        let feature_code = c.read_u32(LE)?;
        let needed = Self::encoded_len(feature_code);
        if c.remaining() < needed {
            return Err(CsiError::truncated(at, needed + 4, c.remaining() + 4));
        }

        let mut info = Self {
            feature_code,
            ..Self::default()
        };
        for f in EXTRA_INFO_FEATURES
            .iter()
            .filter(|f| feature_code >> f.bit & 1 == 1)
        {
            match f.bit {
                0 => info.version = Some(c.read_u64(LE)?),
                1 => info.length = Some(c.read_u16(LE)?),
                2 => info.macaddr_cur = Some(c.read_array()?),
                3 => info.macaddr_rom = Some(c.read_array()?),
                4 => info.chansel = Some(c.read_u32(LE)?),
                5 => info.bmode = Some(c.read_u8()?),
                6 => info.evm = Some(c.read_array::<20>()?.map(|b| b as i8)),
                7 => info.tx_chain_mask = Some(c.read_u8()?),
                8 => info.rx_chain_mask = Some(c.read_u8()?),
                9 => info.txpower = Some(c.read_u8()?),
                10 => info.cf = Some(c.read_u64(LE)?),
                11 => info.tx_tsf = Some(c.read_u32(LE)?),
                12 => info.last_hw_tx_tsf = Some(c.read_u32(LE)?),
                13 => info.channel_flags = Some(c.read_u16(LE)?),
                14 => info.tx_ness = Some(c.read_u8()?),
                15 => info.tuning_policy = Some(c.read_u8()?),
                16 => info.pll_rate = Some(c.read_u16(LE)?),
                17 => info.pll_refdiv = Some(c.read_u8()?),
                18 => info.pll_clock_select = Some(c.read_u8()?),
                19 => info.agc = Some(c.read_u8()?),
                20 => {
                    let raw = c.read_u8()?;
                    info.ant_sel = Some([
                        (raw & 0x1) + 1,
                        ((raw >> 2) & 0x3) + 1,
                        ((raw >> 4) & 0x3) + 1,
                    ]);
                }
                21 => info.sampling_rate = Some(c.read_u64(LE)?),
                22 => info.cfo = Some(c.read_i32(LE)?),
                23 => info.sfo = Some(c.read_i32(LE)?),
                24 => info.precise_tx_timing = Some(c.read_f64(LE)?),
                _ => c.skip(f.size)?,
            }
        }
        Ok(info)
    }
}

// ---------------------------------------------------------------------------
// MVMExtra and DPASRequest
// ---------------------------------------------------------------------------

/// Fields of the Intel iwlmvm CSI header carried by `MVMExtra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvmExtra {
    /// Length of the raw CSI header.
    pub header_length: u16,
    /// Size of the IQ data.
    pub iq_data_size: u32,
    /// FTM clock.
    pub ftm_clock: u32,
    /// Second sampling tick.
    pub sampling_tick2: u32,
    /// Tones reported by the firmware.
    pub num_tones: u32,
    /// RSSI of chain 1.
    pub rssi1: i32,
    /// RSSI of chain 2.
    pub rssi2: i32,
    /// Transmitter MAC address.
    pub source_address: MacAddr,
    /// CSI sequence number.
    pub csi_sequence: u8,
    /// MU clock.
    pub mu_clock: u32,
    /// rate_n_flags of the received packet.
    pub rate_n_flags: u32,
}

impl MvmExtra {
    /// Bytes of the CSI header needed to reach `rate_n_flags`.
    pub const MIN_HEADER_LEN: usize = 96;

    /// Parse an `MVMExtra` segment.
    pub fn parse(segment: &Segment<'_>) -> CsiResult<Self> {
        let mut c = ByteCursor::with_base(segment.content, segment.content_offset);
        let header_length = c.read_u16(LE)?;
        if usize::from(header_length) < Self::MIN_HEADER_LEN {
            return Err(CsiError::malformed(
                segment.offset,
                format!("MVM CSI header of {header_length} bytes"),
            ));
        }
        let base = c.absolute_position();
        let header = c.read_bytes(usize::from(header_length))?;
        let mut h = ByteCursor::with_base(header, base);

        let iq_data_size = h.read_u32(LE)?;
        h.seek_to(8)?;
        let ftm_clock = h.read_u32(LE)?;
        let sampling_tick2 = h.read_u32(LE)?;
        h.seek_to(52)?;
        let num_tones = h.read_u32(LE)?;
        h.seek_to(60)?;
        let rssi1 = h.read_i32(LE)?;
        let rssi2 = h.read_i32(LE)?;
        let source_address = h.read_array()?;
        h.seek_to(76)?;
        let csi_sequence = h.read_u8()?;
        h.seek_to(88)?;
        let mu_clock = h.read_u32(LE)?;
        let rate_n_flags = h.read_u32(LE)?;

        Ok(Self {
            header_length,
            iq_data_size,
            ftm_clock,
            sampling_tick2,
            num_tones,
            rssi1,
            rssi2,
            source_address,
            csi_sequence,
            mu_clock,
            rate_n_flags,
        })
    }
}

/// Request parameters of a DPAS (device probing and sounding) exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DpasRequest {
    /// Request mode, version 4 and later.
    pub request_mode: Option<u8>,
    /// Batch identifier.
    pub batch_id: u16,
    /// Packets in the batch.
    pub batch_length: u16,
    /// Sequence within the batch.
    pub sequence_id: u16,
    /// Interval between requests.
    pub interval_time: u16,
    /// Interval step, version 2 and later.
    pub interval_step: Option<u16>,
    /// Device code, version 3 and later.
    pub device_type: Option<u16>,
    /// Device subtype, version 4 and later.
    pub device_subtype: Option<u16>,
    /// Carrier frequency, Hz, version 3 and later.
    pub carrier_frequency: Option<u64>,
    /// Sampling frequency, Hz, version 3 and later.
    pub sampling_frequency: Option<u32>,
}

impl DpasRequest {
    /// Parse a `DPASRequest` segment, versions 1 to 4.
    pub fn parse(segment: &Segment<'_>) -> CsiResult<Self> {
        let v = segment.version;
        if !(1..=4).contains(&v) {
            return Err(CsiError::unsupported("DPASRequest segment version", v));
        }
        let mut c = ByteCursor::with_base(segment.content, segment.content_offset);
        let mut req = Self::default();
        if v >= 4 {
            req.request_mode = Some(c.read_u8()?);
        }
        req.batch_id = c.read_u16(LE)?;
        req.batch_length = c.read_u16(LE)?;
        req.sequence_id = c.read_u16(LE)?;
        req.interval_time = c.read_u16(LE)?;
        if v >= 2 {
            req.interval_step = Some(c.read_u16(LE)?);
        }
        if v >= 3 {
            req.device_type = Some(c.read_u16(LE)?);
            if v >= 4 {
                req.device_subtype = Some(c.read_u16(LE)?);
            }
            req.carrier_frequency = Some(c.read_u64(LE)?);
            req.sampling_frequency = Some(c.read_u32(LE)?);
        }
        Ok(req)
    }
}

// ---------------------------------------------------------------------------
// SignalMatrix
// ---------------------------------------------------------------------------

/// Storage order of a signal matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Majority {
    #[default]
    ColumnMajor,
    RowMajor,
}

/// Header of a `BBv1`/`BBv2` signal matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalMatrixHeader {
    /// 1 or 2.
    pub version: u8,
    /// Size of each dimension.
    pub dimensions: Vec<usize>,
    /// Whether elements are complex.
    pub complex: bool,
    /// `F`, `D`, `I` or `U`.
    pub element_type: char,
    /// Bits per component.
    pub element_bits: u8,
    /// Storage order of the data section.
    pub majority: Majority,
}

impl SignalMatrixHeader {
    /// Read the matrix header.
    pub fn read(c: &mut ByteCursor<'_>) -> CsiResult<Self> {
        let at = c.absolute_position();
        let tag = c.read_array::<4>()?;
        let version = match &tag {
            b"BBv1" => 1,
            b"BBv2" => 2,
            _ => {
                return Err(CsiError::unsupported(
                    "signal matrix format",
                    String::from_utf8_lossy(&tag),
                ))
            }
        };
        let ndim = c.read_u8()?;
        let mut dimensions = Vec::with_capacity(usize::from(ndim));
        for _ in 0..ndim {
            let d = if version == 1 {
                u64::from(c.read_u32(LE)?)
            } else {
                c.read_u64(LE)?
            };
            let d = usize::try_from(d)
                .map_err(|_| CsiError::malformed(at, format!("matrix dimension {d}")))?;
            dimensions.push(d);
        }
        let complex = match c.read_u8()? {
            b'C' => true,
            b'R' => false,
            other => return Err(CsiError::unsupported("signal matrix complexity", char::from(other))),
        };
        let element_type = char::from(c.read_u8()?);
        let element_bits = c.read_u8()?;
        let supported = matches!(
            (element_type, element_bits),
            ('F', 32) | ('D', 64) | ('I', 8 | 16 | 32) | ('U', 8 | 16 | 32)
        );
        if !supported {
            return Err(CsiError::unsupported(
                "signal matrix element type",
                format!("{element_type}{element_bits}"),
            ));
        }
        let majority = match c.read_u8()? {
            b'C' => Majority::ColumnMajor,
            b'R' => Majority::RowMajor,
            other => return Err(CsiError::unsupported("signal matrix majority", char::from(other))),
        };
        let header = Self {
            version,
            dimensions,
            complex,
            element_type,
            element_bits,
            majority,
        };
        if header.data_len().is_none() {
            return Err(CsiError::malformed(
                at,
                format!("signal matrix dimensions {:?} overflow", header.dimensions),
            ));
        }
        Ok(header)
    }

    /// Number of elements, `None` if the product overflows.
    pub fn numel(&self) -> Option<usize> {
        self.dimensions
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    fn component_bytes(&self) -> usize {
        usize::from(self.element_bits / 8)
    }

    /// Encoded size of the data section, `None` if it overflows.
    pub fn data_len(&self) -> Option<usize> {
        let components = if self.complex { 2 } else { 1 };
        self.numel()?
            .checked_mul(self.component_bytes())?
            .checked_mul(components)
    }

    fn checked_len(&self, at: usize) -> CsiResult<(usize, usize)> {
        match (self.numel(), self.data_len()) {
            (Some(n), Some(len)) => Ok((n, len)),
            _ => Err(CsiError::malformed(
                at,
                format!("signal matrix dimensions {:?} overflow", self.dimensions),
            )),
        }
    }

    fn read_component(&self, c: &mut ByteCursor<'_>) -> CsiResult<f64> {
        Ok(match (self.element_type, self.element_bits) {
            ('F', _) => f64::from(c.read_f32(LE)?),
            ('D', _) => c.read_f64(LE)?,
            ('I', 8) => f64::from(c.read_i8()?),
            ('I', 16) => f64::from(c.read_i16(LE)?),
            ('I', _) => f64::from(c.read_i32(LE)?),
            ('U', 8) => f64::from(c.read_u8()?),
            ('U', 16) => f64::from(c.read_u16(LE)?),
            _ => f64::from(c.read_u32(LE)?),
        })
    }
}

/// A decoded signal matrix, stored column-major.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMatrix {
    /// Header the values were decoded with.
    pub header: SignalMatrixHeader,
    /// Elements in column-major order.
    pub values: Vec<Complex64>,
}

impl SignalMatrix {
    /// Read the data section for `header`.
    pub fn read_data(header: SignalMatrixHeader, c: &mut ByteCursor<'_>) -> CsiResult<Self> {
        let at = c.absolute_position();
        let (n, data_len) = header.checked_len(at)?;
        if c.remaining() != data_len {
            return Err(CsiError::malformed(
                at,
                format!(
                    "signal matrix data is {} bytes, dimensions {:?} need {data_len}",
                    c.remaining(),
                    header.dimensions,
                ),
            ));
        }
        let mut stored = Vec::with_capacity(n);
        for _ in 0..n {
            let re = header.read_component(c)?;
            let im = if header.complex {
                header.read_component(c)?
            } else {
                0.0
            };
            stored.push(Complex64::new(re, im));
        }
        let values = match header.majority {
            Majority::ColumnMajor => stored,
            Majority::RowMajor => row_to_column_major(&stored, &header.dimensions),
        };
        Ok(Self { header, values })
    }

    /// Parse a complete matrix.
    pub fn parse(c: &mut ByteCursor<'_>) -> CsiResult<Self> {
        let header = SignalMatrixHeader::read(c)?;
        Self::read_data(header, c)
    }

    /// Element at column-major coordinates; missing trailing coordinates
    /// are zero.
    pub fn get(&self, coords: &[usize]) -> Option<Complex64> {
        let mut pos = 0;
        let mut stride = 1;
        for (i, &dim) in self.header.dimensions.iter().enumerate() {
            let k = coords.get(i).copied().unwrap_or(0);
            if k >= dim {
                return None;
            }
            pos += k * stride;
            stride *= dim;
        }
        self.values.get(pos).copied()
    }
}

fn row_to_column_major(values: &[Complex64], dims: &[usize]) -> Vec<Complex64> {
    let mut out = vec![Complex64::new(0.0, 0.0); values.len()];
    let mut coords = vec![0usize; dims.len()];
    for value in values {
        let mut pos = 0;
        let mut stride = 1;
        for (k, d) in coords.iter().zip(dims) {
            pos += k * stride;
            stride *= d;
        }
        out[pos] = *value;
        // Row-major walk: last coordinate varies fastest.
        for axis in (0..dims.len()).rev() {
            coords[axis] += 1;
            if coords[axis] < dims[axis] {
                break;
            }
            coords[axis] = 0;
        }
    }
    out
}

// ---------------------------------------------------------------------------
// CSI
// ---------------------------------------------------------------------------

/// Descriptive fields of a CSI segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiInfo {
    /// Device code that selects the decoder.
    pub device_type: u16,
    /// Firmware version, segment version 4 and later.
    pub firmware_version: u8,
    /// 0 NonHT, 1 HT, 2 VHT, 3 HE-SU, 4 HE-MU.
    pub packet_format: i8,
    /// Channel bandwidth, MHz.
    pub cbw: u16,
    /// Carrier frequency, Hz.
    pub carrier_freq: u64,
    /// Sampling rate, Hz.
    pub sampling_rate: u64,
    /// Subcarrier spacing, Hz.
    pub subcarrier_bandwidth: u32,
    /// Tones in the segment.
    pub num_tones: u16,
    /// Transmit streams.
    pub num_tx: u8,
    /// Receive chains.
    pub num_rx: u8,
    /// Extension spatial streams.
    pub num_ess: u8,
    /// CSI matrices in the segment.
    pub num_csi: u16,
    /// Antenna selection.
    pub ant_sel: u8,
    /// Offset added to every subcarrier index.
    pub subcarrier_offset: i16,
}

/// A CSI sub-field laid out in its configured capacity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsiBlock {
    /// Fields of the source segment.
    pub info: CsiInfo,
    /// Subcarrier index of each row of `csi`.
    pub subcarrier_index: Vec<i32>,
    /// CSI `[tones, rx, tx]` at the configured capacity.
    pub csi: Array3<Complex64>,
}

impl CsiBlock {
    /// A zeroed block for `capacity`.
    pub fn empty(capacity: &CsiCapacity) -> Self {
        Self {
            info: CsiInfo::default(),
            subcarrier_index: vec![0; capacity.tones],
            csi: Array3::zeros((capacity.tones, capacity.rx, capacity.tx)),
        }
    }

    /// Whether the segment was present and fit.
    pub fn is_present(&self) -> bool {
        self.info.num_tones > 0
    }

    fn place(decoded: DecodedCsi, capacity: &CsiCapacity) -> Self {
        let mut block = Self::empty(capacity);
        let (tones, rx, tx) = decoded.values.dim();
        if tones > 0 {
            for k in 0..capacity.tones {
                // Rows past the decoded tones repeat the last decoded row.
                let src = k.min(tones - 1);
                block.subcarrier_index[k] = decoded.index[src];
                for r in 0..rx {
                    for t in 0..tx {
                        block.csi[[k, r, t]] = decoded.values[[src, r, t]];
                    }
                }
            }
        }
        block.info = decoded.info;
        block
    }
}

struct DecodedCsi {
    info: CsiInfo,
    index: Vec<i32>,
    values: Array3<Complex64>,
}

impl DecodedCsi {
    fn required(&self) -> [usize; 3] {
        let (tones, rx, tx) = self.values.dim();
        [tones, tx, rx]
    }
}

fn stream_count(streams: usize, offset: usize) -> CsiResult<u8> {
    u8::try_from(streams)
        .map_err(|_| CsiError::malformed(offset, format!("CSI buffer implies {streams} streams")))
}

fn decode_csi_segment(segment: &Segment<'_>) -> CsiResult<DecodedCsi> {
    let v = segment.version;
    if !(1..=4).contains(&v) {
        return Err(CsiError::unsupported("CSI segment version", v));
    }
    let mut c = ByteCursor::with_base(segment.content, segment.content_offset);
    let mut info = CsiInfo {
        device_type: c.read_u16(LE)?,
        num_csi: 1,
        ..CsiInfo::default()
    };
    if v >= 4 {
        info.firmware_version = c.read_u8()?;
    }
    info.packet_format = c.read_i8()?;
    info.cbw = c.read_u16(LE)?;
    info.carrier_freq = c.read_u64(LE)?;
    info.sampling_rate = c.read_u64(LE)?;
    info.subcarrier_bandwidth = c.read_u32(LE)?;
    info.num_tones = c.read_u16(LE)?;
    info.num_tx = c.read_u8()?;
    info.num_rx = c.read_u8()?;
    info.num_ess = c.read_u8()?;
    if v >= 3 {
        info.num_csi = c.read_u16(LE)?;
    }
    info.ant_sel = c.read_u8()?;
    if v >= 2 {
        info.subcarrier_offset = c.read_i16(LE)?;
    }
    let buffer_len = c.read_u32(LE)? as usize;
    let buffer_offset = c.absolute_position();
    let buffer = c.read_bytes(buffer_len)?;

    if info.num_rx == 0 {
        return Err(CsiError::malformed(segment.offset, "CSI segment with zero rx chains"));
    }
    let offset = i32::from(info.subcarrier_offset);
    match PicoDevice::from_code(info.device_type) {
        PicoDevice::Qca9300 => {
            let index: Vec<i32> = qca9300_subcarriers(info.cbw)
                .into_iter()
                .map(|k| k + offset)
                .collect();
            let tones = usize::from(info.num_tones);
            if index.len() != tones {
                return Err(CsiError::malformed(
                    segment.offset,
                    format!("QCA9300 reports {tones} tones at {} MHz", info.cbw),
                ));
            }
            let per_chain = if info.cbw == 20 { 140 } else { 285 };
            let nrx = usize::from(info.num_rx);
            let streams = buffer.len() / per_chain / nrx;
            info.num_ess = stream_count(streams, segment.offset)?.saturating_sub(info.num_tx);
            let values = decode_qca9300(buffer, buffer_offset, tones, streams, nrx)?;
            Ok(DecodedCsi { info, index, values })
        }
        PicoDevice::Iwl5300 => {
            let index: Vec<i32> = iwl5300_subcarriers(info.cbw)
                .into_iter()
                .map(|k| k + offset)
                .collect();
            if index.len() != 30 {
                return Err(CsiError::malformed(
                    segment.offset,
                    format!("IWL5300 CSI at {} MHz", info.cbw),
                ));
            }
            let nrx = usize::from(info.num_rx);
            if nrx > 3 || buffer.len() < 12 {
                return Err(CsiError::malformed(
                    segment.offset,
                    format!("IWL5300 CSI with {nrx} rx chains in {} bytes", buffer.len()),
                ));
            }
            let streams = (buffer.len() - 12) / 60 / nrx;
            info.num_tones = 30;
            info.num_ess = stream_count(streams, segment.offset)?.saturating_sub(info.num_tx);
            let values = decode_iwl5300(buffer, buffer_offset, streams, nrx, info.ant_sel)?;
            Ok(DecodedCsi { info, index, values })
        }
        PicoDevice::Usrp => {
            let mut b = ByteCursor::with_base(buffer, buffer_offset);
            let tones = usize::from(info.num_tones);
            let mut index = Vec::with_capacity(tones);
            for _ in 0..tones {
                index.push(i32::from(b.read_i16(LE)?));
            }
            let matrix = SignalMatrix::parse(&mut b)?;
            let dims = &matrix.header.dimensions;
            let dim = |i: usize| dims.get(i).copied().unwrap_or(1);
            if dim(0) != tones {
                return Err(CsiError::malformed(
                    segment.offset,
                    format!("USRP CSI matrix has {} rows for {tones} tones", dim(0)),
                ));
            }
            let (tx, rx) = (dim(1), dim(2));
            let mut values = Array3::zeros((tones, rx, tx));
            for k in 0..tones {
                for t in 0..tx {
                    for r in 0..rx {
                        values[[k, r, t]] = matrix.get(&[k, t, r]).unwrap_or_default();
                    }
                }
            }
            Ok(DecodedCsi { info, index, values })
        }
        other => Err(CsiError::unsupported("PicoScenes CSI device type", format!("{:#06x}", other.code()))),
    }
}

/// 10-bit (imag, real) pairs, rx varying fastest, then stream, then tone.
fn decode_qca9300(
    buffer: &[u8],
    base: usize,
    tones: usize,
    streams: usize,
    nrx: usize,
) -> CsiResult<Array3<Complex64>> {
    let mut values = Array3::zeros((tones, nrx, streams));
    let mut reader = BitReader::with_base(buffer, base);
    for k in 0..tones {
        for t in 0..streams {
            for r in 0..nrx {
                let im = reader.read_signed(10)?;
                let re = reader.read_signed(10)?;
                values[[k, r, t]] = Complex64::new(f64::from(re), f64::from(im));
            }
        }
    }
    Ok(values)
}

/// Row each rx chain lands in: the rank of its selected antenna.
fn iwl5300_rx_rank(ant_sel: u8, nrx: usize) -> Vec<usize> {
    if nrx <= 1 {
        return (0..nrx).collect();
    }
    let sel = [
        (ant_sel & 0x1) + 1,
        ((ant_sel >> 2) & 0x3) + 1,
        ((ant_sel >> 4) & 0x3) + 1,
    ];
    let sel = &sel[..nrx];
    let mut order: Vec<usize> = (0..nrx).collect();
    order.sort_by_key(|&i| sel[i]);
    let mut rank = vec![0; nrx];
    for (r, &i) in order.iter().enumerate() {
        rank[i] = r;
    }
    rank
}

fn decode_iwl5300(
    buffer: &[u8],
    base: usize,
    streams: usize,
    nrx: usize,
    ant_sel: u8,
) -> CsiResult<Array3<Complex64>> {
    let needed = csi_byte_len(nrx, streams);
    if buffer.len() < needed {
        return Err(CsiError::truncated(base, needed, buffer.len()));
    }
    let rank = iwl5300_rx_rank(ant_sel, nrx);
    let mut values = Array3::zeros((30, nrx, streams));
    let mut reader = BitReader::with_base(buffer, base);
    for k in 0..30 {
        reader.skip_bits(3)?;
        for &row in &rank {
            for t in 0..streams {
                let re = reader.read_signed(8)?;
                let im = reader.read_signed(8)?;
                values[[k, row, t]] = Complex64::new(f64::from(re), f64::from(im));
            }
        }
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// MPDU side
// ---------------------------------------------------------------------------

/// The 802.11 MAC header opening the MPDU.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacFrameHeader {
    /// Raw frame control.
    pub fc: u16,
    /// Duration/ID.
    pub dur: u16,
    /// Receiver address.
    pub addr1: MacAddr,
    /// Transmitter address.
    pub addr2: MacAddr,
    /// BSSID or third address.
    pub addr3: MacAddr,
    /// Fragment number.
    pub frag: u8,
    /// Sequence number.
    pub seq: u16,
}

impl MacFrameHeader {
    /// Read the 24-byte header.
    pub fn read(c: &mut ByteCursor<'_>) -> CsiResult<Self> {
        let fc = c.read_u16(LE)?;
        let dur = c.read_u16(LE)?;
        let addr1 = c.read_array()?;
        let addr2 = c.read_array()?;
        let addr3 = c.read_array()?;
        let sc = c.read_u16(LE)?;
        Ok(Self {
            fc,
            dur,
            addr1,
            addr2,
            addr3,
            frag: (sc & 0xf) as u8,
            seq: sc >> 4,
        })
    }

    pub fn protocol_version(&self) -> u8 {
        (self.fc & 0x3) as u8
    }

    pub fn frame_type(&self) -> u8 {
        ((self.fc >> 2) & 0x3) as u8
    }

    pub fn subtype(&self) -> u8 {
        ((self.fc >> 4) & 0xf) as u8
    }

    pub fn to_ds(&self) -> bool {
        self.fc & (1 << 8) != 0
    }

    pub fn from_ds(&self) -> bool {
        self.fc & (1 << 9) != 0
    }

    pub fn more_frags(&self) -> bool {
        self.fc & (1 << 10) != 0
    }

    pub fn retry(&self) -> bool {
        self.fc & (1 << 11) != 0
    }

    pub fn power_mgmt(&self) -> bool {
        self.fc & (1 << 12) != 0
    }

    pub fn more_data(&self) -> bool {
        self.fc & (1 << 13) != 0
    }

    pub fn protected(&self) -> bool {
        self.fc & (1 << 14) != 0
    }

    pub fn order(&self) -> bool {
        self.fc & (1 << 15) != 0
    }
}

/// Header written by a PicoScenes transmitter after the 802.11 header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PicoScenesFrameHeader {
    /// Always the PicoScenes frame magic.
    pub magic: u32,
    /// Header version.
    pub version: u32,
    /// Transmitting device code.
    pub device_type: u16,
    /// Tx segments that follow.
    pub num_segments: u8,
    /// Application frame type.
    pub frame_type: u8,
    /// Task identifier.
    pub task_id: u16,
    /// Transmission identifier.
    pub tx_id: u16,
}

impl PicoScenesFrameHeader {
    /// Read the header if the next bytes carry the PicoScenes magic.
    pub fn read_if_present(c: &mut ByteCursor<'_>) -> CsiResult<Option<Self>> {
        if c.remaining() < PICOSCENES_HEADER_LEN {
            return Ok(None);
        }
        let start = c.position();
        if c.read_u32(LE)? != FRAME_MAGIC {
            c.seek_to(start)?;
            return Ok(None);
        }
        Ok(Some(Self {
            magic: FRAME_MAGIC,
            version: c.read_u32(LE)?,
            device_type: c.read_u16(LE)?,
            num_segments: c.read_u8()?,
            frame_type: c.read_u8()?,
            task_id: c.read_u16(LE)?,
            tx_id: c.read_u16(LE)?,
        }))
    }
}

/// A `Payload` tx segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSegment {
    /// 0 raw, 1 segment, 2 signal matrix, 3 CSI, 4 MSDU, 5 PicoScenes packet.
    pub data_type: u8,
    /// Free-form label.
    pub description: String,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl PayloadSegment {
    /// Parse a `Payload` segment.
    pub fn parse(segment: &Segment<'_>) -> CsiResult<Self> {
        let mut c = ByteCursor::with_base(segment.content, segment.content_offset);
        let _total = c.read_u32(LE)?;
        let data_type = c.read_u8()?;
        let desc_len = usize::from(c.read_u8()?);
        let description = String::from_utf8_lossy(c.read_bytes(desc_len)?).into_owned();
        let len = c.read_u32(LE)? as usize;
        let data = c.read_bytes(len)?.to_vec();
        Ok(Self {
            data_type,
            description,
            data,
        })
    }
}

/// A segment with no dedicated decoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownSegment {
    /// Segment name.
    pub name: String,
    /// Segment version.
    pub version: u16,
    /// Declared length, excluding the length field.
    pub length: u32,
}

impl From<&Segment<'_>> for UnknownSegment {
    fn from(segment: &Segment<'_>) -> Self {
        Self {
            name: segment.name.to_string(),
            version: segment.version,
            length: segment.length,
        }
    }
}

// ---------------------------------------------------------------------------
// Record and decoder
// ---------------------------------------------------------------------------

/// One decoded PicoScenes frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PicoScenesRecord {
    /// Absolute offset of the frame.
    pub offset: usize,
    /// Frame header.
    pub rx_header: RxFrameHeader,
    /// `RxSBasic` segment.
    pub basic: RxSBasic,
    /// Receiver-side `ExtraInfo` segment.
    pub rx_extra_info: Option<ExtraInfo>,
    /// Data CSI.
    pub csi: CsiBlock,
    /// Pilot CSI.
    pub pilot_csi: CsiBlock,
    /// Legacy (L-LTF) CSI.
    pub legacy_csi: CsiBlock,
    /// `MVMExtra` segment.
    pub mvm_extra: Option<MvmExtra>,
    /// `DPASRequest` segment.
    pub dpas_request: Option<DpasRequest>,
    /// Baseband signal; `None` when absent or over capacity.
    pub baseband_signal: Option<SignalMatrix>,
    /// Pre-equalization symbols; `None` when absent or over capacity.
    pub pre_eq_symbols: Option<SignalMatrix>,
    /// Rx segments with no decoder.
    pub rx_unknown: Vec<UnknownSegment>,
    /// 802.11 header of the MPDU.
    pub mac_header: MacFrameHeader,
    /// PicoScenes transmitter header, if present.
    pub picoscenes_header: Option<PicoScenesFrameHeader>,
    /// Transmitter-side `ExtraInfo` segment.
    pub tx_extra_info: Option<ExtraInfo>,
    /// `Payload` tx segments.
    pub payloads: Vec<PayloadSegment>,
    /// Tx segments with no decoder.
    pub tx_unknown: Vec<UnknownSegment>,
    /// Length of the MPDU in the capture.
    pub mpdu_len: usize,
    /// MPDU bytes; empty when the MPDU exceeds its capacity.
    pub mpdu: Vec<u8>,
}

/// Stateless frame decoder.
#[derive(Debug, Clone)]
pub struct PicoScenesDecoder {
    config: PicoScenesConfig,
}

impl PicoScenesDecoder {
    pub fn new(config: PicoScenesConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PicoScenesConfig {
        &self.config
    }

    /// Decode one frame, recording capacity demand in `usage`.
    pub fn decode(
        &self,
        frame: &PicoFrame<'_>,
        usage: &mut CapacityUsage,
    ) -> CsiResult<PicoScenesRecord> {
        let cfg = &self.config;
        let mut c = ByteCursor::with_base(frame.bytes, frame.offset);
        let rx_header = RxFrameHeader::read(&mut c)?;

        let mut record = PicoScenesRecord {
            offset: frame.offset,
            rx_header,
            basic: RxSBasic::default(),
            rx_extra_info: None,
            csi: CsiBlock::empty(&cfg.csi),
            pilot_csi: CsiBlock::empty(&cfg.pilot_csi),
            legacy_csi: CsiBlock::empty(&cfg.legacy_csi),
            mvm_extra: None,
            dpas_request: None,
            baseband_signal: None,
            pre_eq_symbols: None,
            rx_unknown: Vec::new(),
            mac_header: MacFrameHeader::default(),
            picoscenes_header: None,
            tx_extra_info: None,
            payloads: Vec::new(),
            tx_unknown: Vec::new(),
            mpdu_len: 0,
            mpdu: Vec::new(),
        };

        for _ in 0..rx_header.num_rx_segments {
            let segment = Segment::read(&mut c)?;
            match segment.name {
                "RxSBasic" => record.basic = RxSBasic::parse(&segment)?,
                "ExtraInfo" => {
                    let mut sc = ByteCursor::with_base(segment.content, segment.content_offset);
                    record.rx_extra_info = Some(ExtraInfo::read(&mut sc)?);
                }
                "CSI" => {
                    if let Some(block) =
                        self.csi_block(&segment, PicoField::Csi, &cfg.csi, cfg.interpolate, usage)?
                    {
                        record.csi = block;
                    }
                }
                "PilotCSI" => {
                    if let Some(block) =
                        self.csi_block(&segment, PicoField::PilotCsi, &cfg.pilot_csi, false, usage)?
                    {
                        record.pilot_csi = block;
                    }
                }
                "LegacyCSI" => {
                    if let Some(block) = self.csi_block(
                        &segment,
                        PicoField::LegacyCsi,
                        &cfg.legacy_csi,
                        cfg.interpolate,
                        usage,
                    )? {
                        record.legacy_csi = block;
                    }
                }
                "MVMExtra" => record.mvm_extra = Some(MvmExtra::parse(&segment)?),
                "DPASRequest" => record.dpas_request = Some(DpasRequest::parse(&segment)?),
                "BasebandSignal" => {
                    record.baseband_signal =
                        signal_matrix(&segment, PicoField::BasebandSignals, usage)?;
                }
                "PreEQSymbols" => {
                    record.pre_eq_symbols = signal_matrix(&segment, PicoField::PreEqSymbols, usage)?;
                }
                _ => {
                    debug!(name = segment.name, length = segment.length, "unknown rx segment");
                    record.rx_unknown.push(UnknownSegment::from(&segment));
                }
            }
        }

        let mpdu_start = c.position();
        record.mpdu_len = c.remaining();
        record.mac_header = MacFrameHeader::read(&mut c)?;
        record.picoscenes_header = PicoScenesFrameHeader::read_if_present(&mut c)?;
        if let Some(header) = record.picoscenes_header {
            for _ in 0..header.num_segments {
                let segment = Segment::read(&mut c)?;
                match segment.name {
                    "ExtraInfo" => {
                        let mut sc = ByteCursor::with_base(segment.content, segment.content_offset);
                        record.tx_extra_info = Some(ExtraInfo::read(&mut sc)?);
                    }
                    "Payload" => record.payloads.push(PayloadSegment::parse(&segment)?),
                    _ => {
                        debug!(name = segment.name, length = segment.length, "unknown tx segment");
                        record.tx_unknown.push(UnknownSegment::from(&segment));
                    }
                }
            }
        }

        if usage.admit(PicoField::Mpdu, [record.mpdu_len, 1, 1]) {
            record.mpdu = frame.bytes[mpdu_start..].to_vec();
        }
        Ok(record)
    }

    fn csi_block(
        &self,
        segment: &Segment<'_>,
        field: PicoField,
        capacity: &CsiCapacity,
        interpolate: bool,
        usage: &mut CapacityUsage,
    ) -> CsiResult<Option<CsiBlock>> {
        let mut decoded = decode_csi_segment(segment)?;
        if interpolate && decoded.values.dim().0 > 1 {
            let (index, values) =
                interpolate_gaps(&decoded.index, &decoded.values, InterpolationMode::AmplitudePhase)?;
            decoded.info.num_tones = u16::try_from(index.len()).unwrap_or(u16::MAX);
            decoded.index = index;
            decoded.values = values;
        }
        if !usage.admit(field, decoded.required()) {
            return Ok(None);
        }
        Ok(Some(CsiBlock::place(decoded, capacity)))
    }
}

fn signal_matrix(
    segment: &Segment<'_>,
    field: PicoField,
    usage: &mut CapacityUsage,
) -> CsiResult<Option<SignalMatrix>> {
    let mut c = ByteCursor::with_base(segment.content, segment.content_offset);
    let header = SignalMatrixHeader::read(&mut c)?;
    let (numel, _) = header.checked_len(segment.content_offset)?;
    if !usage.admit(field, [numel, 1, 1]) {
        return Ok(None);
    }
    SignalMatrix::read_data(header, &mut c).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;
    use crate::framing::segment::PicoFrames;

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

    fn build_frame(rx_segments: &[Vec<u8>], mpdu: &[u8]) -> Vec<u8> {
        let mut body = FRAME_MAGIC.to_le_bytes().to_vec();
        body.extend_from_slice(&1u16.to_le_bytes());
        body.push(rx_segments.len() as u8);
        for s in rx_segments {
            body.extend_from_slice(s);
        }
        body.extend_from_slice(mpdu);
        let mut out = (body.len() as u32).to_le_bytes().to_vec();
        out.extend(body);
        out
    }

    fn rxs_basic_v3() -> Vec<u8> {
        let mut c = Vec::new();
        c.extend_from_slice(&0x9300u16.to_le_bytes());
        c.extend_from_slice(&42u64.to_le_bytes());
        c.extend_from_slice(&5200i16.to_le_bytes());
        c.extend_from_slice(&5190i16.to_le_bytes());
        c.extend_from_slice(&40u16.to_le_bytes());
        c.push(1);
        c.extend_from_slice(&20u16.to_le_bytes());
        c.extend_from_slice(&800u16.to_le_bytes());
        c.extend_from_slice(&[7, 1, 0, 2, 1, 0]);
        c.extend_from_slice(&[(-95i8) as u8, (-40i8) as u8, (-42i8) as u8, (-43i8) as u8, 0]);
        build_segment("RxSBasic", 3, &c)
    }

    /// QCA9300 CSI v2 segment with value `(k + r, -(t + 1))` at `[k, r, t]`.
    fn qca_csi(cbw: u16, tones: u16, ntx: u8, nrx: u8) -> Vec<u8> {
        let mut bits = BitWriter::new();
        for k in 0..i32::from(tones) {
            for t in 0..i32::from(ntx) {
                for r in 0..i32::from(nrx) {
                    bits.push(-(t + 1), 10);
                    bits.push(k + r, 10);
                }
            }
        }
        let data = bits.finish();
        let mut c = Vec::new();
        c.extend_from_slice(&0x9300u16.to_le_bytes());
        c.push(1);
        c.extend_from_slice(&cbw.to_le_bytes());
        c.extend_from_slice(&5_200_000_000u64.to_le_bytes());
        c.extend_from_slice(&40_000_000u64.to_le_bytes());
        c.extend_from_slice(&312_500u32.to_le_bytes());
        c.extend_from_slice(&tones.to_le_bytes());
        c.extend_from_slice(&[ntx, nrx, 0, 0]);
        c.extend_from_slice(&0i16.to_le_bytes());
        c.extend_from_slice(&(data.len() as u32).to_le_bytes());
        c.extend(data);
        c
    }

    fn mac_header() -> Vec<u8> {
        let mut h = Vec::new();
        h.extend_from_slice(&0x0208u16.to_le_bytes());
        h.extend_from_slice(&0u16.to_le_bytes());
        h.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        h.extend_from_slice(&[7, 8, 9, 10, 11, 12]);
        h.extend_from_slice(&[0xff; 6]);
        h.extend_from_slice(&((100u16 << 4) | 3).to_le_bytes());
        h
    }

    fn decode(data: &[u8], config: PicoScenesConfig) -> (CsiResult<PicoScenesRecord>, CapacityUsage) {
        let frame = PicoFrames::new(data, 0).next().unwrap().unwrap();
        let mut usage = CapacityUsage::new(&config);
        let record = PicoScenesDecoder::new(config).decode(&frame, &mut usage);
        (record, usage)
    }

    #[test]
    fn test_basic_and_qca9300_csi() {
        let csi = build_segment("CSI", 2, &qca_csi(20, 56, 1, 2));
        let mut mpdu = mac_header();
        mpdu.extend_from_slice(&[0xaa; 10]);
        let data = build_frame(&[rxs_basic_v3(), csi], &mpdu);
        let config = PicoScenesConfig {
            csi: CsiCapacity::new(64, 2, 2),
            ..PicoScenesConfig::default()
        };
        let (record, usage) = decode(&data, config);
        let record = record.unwrap();

        assert_eq!(record.basic.device_type, 0x9300);
        assert_eq!(record.basic.control_freq, 5190);
        assert_eq!(record.basic.rssi, -40);
        assert_eq!(record.basic.noise_floor, -95);

        let block = &record.csi;
        assert_eq!(block.info.num_tones, 56);
        assert_eq!(block.csi.shape(), &[64, 2, 2]);
        assert_eq!(block.csi[[0, 0, 0]], Complex64::new(0.0, -1.0));
        assert_eq!(block.csi[[10, 1, 0]], Complex64::new(11.0, -1.0));
        assert_eq!(block.subcarrier_index[0], -28);
        assert_eq!(block.subcarrier_index[28], 1);
        // Padding repeats the last decoded tone.
        assert_eq!(block.subcarrier_index[63], 28);
        assert_eq!(block.csi[[63, 1, 0]], block.csi[[55, 1, 0]]);
        // Second stream was never sent.
        assert_eq!(block.csi[[5, 0, 1]], Complex64::new(0.0, 0.0));

        assert_eq!(record.mac_header.seq, 100);
        assert_eq!(record.mac_header.frag, 3);
        assert_eq!(record.mac_header.frame_type(), 2);
        assert!(record.picoscenes_header.is_none());
        assert_eq!(record.mpdu.len(), 34);
        assert_eq!(usage.csi.max, Some([56, 1, 2]));
        assert_eq!(usage.total_skipped(), 0);
    }

    #[test]
    fn test_oversized_csi_is_skipped_not_failed() {
        let csi = build_segment("CSI", 2, &qca_csi(40, 114, 1, 1));
        let data = build_frame(&[csi], &mac_header());
        let config = PicoScenesConfig {
            csi: CsiCapacity::new(56, 1, 1),
            ..PicoScenesConfig::default()
        };
        let (record, usage) = decode(&data, config);
        let record = record.unwrap();
        assert!(!record.csi.is_present());
        assert_eq!(usage.csi.skipped, 1);
        assert_eq!(usage.csi.min, Some([114, 1, 1]));
    }

    #[test]
    fn test_mpdu_capacity_zero_counts_skip() {
        let data = build_frame(&[rxs_basic_v3()], &mac_header());
        let config = PicoScenesConfig {
            mpdu: 0,
            ..PicoScenesConfig::default()
        };
        let (record, usage) = decode(&data, config);
        let record = record.unwrap();
        assert!(record.mpdu.is_empty());
        assert_eq!(record.mpdu_len, 24);
        assert_eq!(usage.mpdu.skipped, 1);
    }

    #[test]
    fn test_extra_info_feature_order() {
        // version (bit 0), length (bit 1), agc (bit 19), ant_sel (bit 20)
        let code: u32 = 1 | 2 | (1 << 19) | (1 << 20);
        let mut bytes = code.to_le_bytes().to_vec();
        bytes.extend_from_slice(&0x1234u16.to_le_bytes());
        bytes.extend_from_slice(&7u64.to_le_bytes());
        bytes.push(30);
        bytes.push(0b10_01_01);
        assert_eq!(ExtraInfo::encoded_len(code), 2 + 8 + 1 + 1);

        let info = ExtraInfo::read(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(info.length, Some(0x1234));
        assert_eq!(info.version, Some(7));
        assert_eq!(info.agc, Some(30));
        assert_eq!(info.ant_sel, Some([2, 2, 3]));
        assert!(info.cf.is_none());
        assert_eq!(info.present_fields(), vec!["length", "version", "agc", "ant_sel"]);
    }

    #[test]
    fn test_extra_info_short_buffer() {
        let code: u32 = 1 << 10;
        let mut bytes = code.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        assert!(matches!(
            ExtraInfo::read(&mut ByteCursor::new(&bytes)),
            Err(CsiError::TruncatedRecord { .. })
        ));
    }

    #[test]
    fn test_unknown_csi_device() {
        let mut content = qca_csi(20, 56, 1, 1);
        content[..2].copy_from_slice(&0x2000u16.to_le_bytes());
        let data = build_frame(&[build_segment("CSI", 2, &content)], &mac_header());
        let (record, _) = decode(&data, PicoScenesConfig::default());
        assert!(matches!(record, Err(CsiError::UnsupportedVariant { .. })));
    }

    #[test]
    fn test_unknown_segment_inventory() {
        let data = build_frame(&[build_segment("Mystery", 9, &[1, 2, 3])], &mac_header());
        let (record, _) = decode(&data, PicoScenesConfig::default());
        let record = record.unwrap();
        assert_eq!(record.rx_unknown.len(), 1);
        assert_eq!(record.rx_unknown[0].name, "Mystery");
        assert_eq!(record.rx_unknown[0].version, 9);
    }

    #[test]
    fn test_tx_header_and_payload() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0u32.to_le_bytes());
        payload.push(0);
        payload.push(4);
        payload.extend_from_slice(b"ping");
        payload.extend_from_slice(&3u32.to_le_bytes());
        payload.extend_from_slice(&[9, 8, 7]);

        let mut mpdu = mac_header();
        mpdu.extend_from_slice(&FRAME_MAGIC.to_le_bytes());
        mpdu.extend_from_slice(&0x2u32.to_le_bytes());
        mpdu.extend_from_slice(&0x9300u16.to_le_bytes());
        mpdu.push(1);
        mpdu.push(10);
        mpdu.extend_from_slice(&5u16.to_le_bytes());
        mpdu.extend_from_slice(&6u16.to_le_bytes());
        mpdu.extend(build_segment("Payload", 1, &payload));

        let data = build_frame(&[], &mpdu);
        let (record, _) = decode(&data, PicoScenesConfig::default());
        let record = record.unwrap();
        let header = record.picoscenes_header.unwrap();
        assert_eq!((header.task_id, header.tx_id, header.frame_type), (5, 6, 10));
        assert_eq!(record.payloads.len(), 1);
        assert_eq!(record.payloads[0].description, "ping");
        assert_eq!(record.payloads[0].data, vec![9, 8, 7]);
    }

    #[test]
    fn test_dpas_request_versions() {
        let mut v4 = vec![2];
        for v in [1u16, 16, 3, 1000, 2, 0x9300, 1] {
            v4.extend_from_slice(&v.to_le_bytes());
        }
        v4.extend_from_slice(&5_180_000_000u64.to_le_bytes());
        v4.extend_from_slice(&20_000_000u32.to_le_bytes());
        let seg = build_segment("DPASRequest", 4, &v4);
        let parsed = Segment::read(&mut ByteCursor::new(&seg)).unwrap();
        let req = DpasRequest::parse(&parsed).unwrap();
        assert_eq!(req.request_mode, Some(2));
        assert_eq!(req.batch_length, 16);
        assert_eq!(req.device_subtype, Some(1));
        assert_eq!(req.carrier_frequency, Some(5_180_000_000));

        let seg = build_segment("DPASRequest", 5, &v4);
        let parsed = Segment::read(&mut ByteCursor::new(&seg)).unwrap();
        assert!(matches!(
            DpasRequest::parse(&parsed),
            Err(CsiError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn test_signal_matrix_row_major() {
        let mut bytes = b"BBv1".to_vec();
        bytes.push(2);
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(b"RI");
        bytes.push(16);
        bytes.push(b'R');
        for v in 0i16..6 {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let m = SignalMatrix::parse(&mut ByteCursor::new(&bytes)).unwrap();
        assert_eq!(m.header.dimensions, vec![2, 3]);
        // Row-major [[0,1,2],[3,4,5]]
        assert_eq!(m.get(&[1, 0]), Some(Complex64::new(3.0, 0.0)));
        assert_eq!(m.get(&[0, 2]), Some(Complex64::new(2.0, 0.0)));
        assert_eq!(m.values[1], Complex64::new(3.0, 0.0));
        assert_eq!(m.get(&[2, 0]), None);
    }

    #[test]
    fn test_signal_matrix_rejects_unknown_type() {
        let mut bytes = b"BBv2".to_vec();
        bytes.push(1);
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.extend_from_slice(b"CX");
        bytes.push(8);
        bytes.push(b'C');
        assert!(matches!(
            SignalMatrix::parse(&mut ByteCursor::new(&bytes)),
            Err(CsiError::UnsupportedVariant { .. })
        ));
    }

    fn huge_matrix() -> Vec<u8> {
        let mut bytes = b"BBv2".to_vec();
        bytes.push(2);
        bytes.extend_from_slice(&(1u64 << 33).to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 33).to_le_bytes());
        bytes.extend_from_slice(b"CF");
        bytes.push(32);
        bytes.push(b'C');
        bytes
    }

    #[test]
    fn test_signal_matrix_dimension_overflow() {
        assert!(matches!(
            SignalMatrix::parse(&mut ByteCursor::new(&huge_matrix())),
            Err(CsiError::Malformed { .. })
        ));

        let header = SignalMatrixHeader {
            version: 2,
            dimensions: vec![usize::MAX / 2, 3],
            complex: true,
            element_type: 'F',
            element_bits: 32,
            majority: Majority::ColumnMajor,
        };
        assert_eq!(header.numel(), None);
        assert_eq!(header.data_len(), None);

        let data = build_frame(&[build_segment("BasebandSignal", 1, &huge_matrix())], &mac_header());
        let (record, _) = decode(&data, PicoScenesConfig::default());
        assert!(matches!(record, Err(CsiError::Malformed { .. })));
    }

    #[test]
    fn test_qca9300_stream_count_past_u8() {
        let mut content = qca_csi(20, 56, 1, 1);
        content.truncate(33);
        let buffer_len = 140 * 256;
        content.extend_from_slice(&(buffer_len as u32).to_le_bytes());
        content.extend(std::iter::repeat(0u8).take(buffer_len));
        let data = build_frame(&[build_segment("CSI", 2, &content)], &mac_header());
        let (record, _) = decode(&data, PicoScenesConfig::default());
        assert!(matches!(record, Err(CsiError::Malformed { .. })));
    }

    #[test]
    fn test_iwl5300_rank_permutation() {
        // Antennas 1, 1, 2 keep their order.
        assert_eq!(iwl5300_rx_rank(0b01_00_00, 3), vec![0, 1, 2]);
        // Antennas 2, 1, 1: chain 0 moves last.
        assert_eq!(iwl5300_rx_rank(0b00_00_01, 3), vec![2, 0, 1]);
        assert_eq!(iwl5300_rx_rank(0xff, 1), vec![0]);
    }

    #[test]
    fn test_device_codes() {
        for code in [0x9300, 0x5300, 0x2000, 0x2100, 0x0802, 0x1234, 0x1000, 0x7777] {
            assert_eq!(PicoDevice::from_code(code).code(), code);
        }
    }
}
