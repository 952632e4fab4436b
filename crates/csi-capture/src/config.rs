//! Session configuration.
//!
//! [`SessionConfig`] fixes the device kind, the per-record capacities that
//! shape every CSI tensor, and how the record store is sized up front. It is
//! serializable via [`serde`] so a capture setup can be kept next to the
//! capture itself as a JSON file.
//!
//! # Example
//!
//! ```rust
//! use csi_capture::config::{DeviceConfig, IntelConfig, SessionConfig};
//!
//! let cfg = SessionConfig::new(DeviceConfig::Intel(IntelConfig::default()));
//! cfg.validate().expect("default config is valid");
//! assert_eq!(cfg.device.csi_shape(), (30, 3, 2));
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::bits::Endian;
use crate::error::{CsiError, CsiResult};

// ---------------------------------------------------------------------------
// DeviceKind
// ---------------------------------------------------------------------------

/// The capture tool a session decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Linux 802.11n CSI Tool (Intel 5300).
    Intel,
    /// Atheros CSI Tool.
    Atheros,
    /// Atheros CSI Tool with a leading byte-order marker.
    AtherosPull10,
    /// nexmon_csi pcap capture.
    Nexmon,
    /// nexmon_csi with RSSI and frame control in the frame header.
    NexmonPull46,
    /// ESP32-CSI-Tool CSV output.
    Esp32,
    /// PicoScenes `.csi` capture.
    PicoScenes,
}

impl DeviceKind {
    /// All device kinds, in declaration order.
    pub const ALL: [DeviceKind; 7] = [
        Self::Intel,
        Self::Atheros,
        Self::AtherosPull10,
        Self::Nexmon,
        Self::NexmonPull46,
        Self::Esp32,
        Self::PicoScenes,
    ];

    /// Stable lowercase name, as used in JSON and on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Self::Intel => "intel",
            Self::Atheros => "atheros",
            Self::AtherosPull10 => "atheros_pull10",
            Self::Nexmon => "nexmon",
            Self::NexmonPull46 => "nexmon_pull46",
            Self::Esp32 => "esp32",
            Self::PicoScenes => "pico_scenes",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DeviceKind {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.to_ascii_lowercase().replace('-', "_");
        match normalized.as_str() {
            "picoscenes" => return Ok(Self::PicoScenes),
            "intel5300" | "iwl5300" => return Ok(Self::Intel),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| CsiError::invalid_config("device", format!("unknown device kind `{s}`")))
    }
}

// ---------------------------------------------------------------------------
// Per-device configuration
// ---------------------------------------------------------------------------

/// Intel 5300 capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntelConfig {
    /// Receive antennas allotted per record (1..=3). Default: **3**.
    pub nrxnum: usize,
    /// Transmit antennas allotted per record (1..=3). Default: **2**.
    pub ntxnum: usize,
    /// Bytes of 802.11 payload kept per record. Default: **0**.
    pub payload_slot: usize,
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            nrxnum: 3,
            ntxnum: 2,
            payload_slot: 0,
        }
    }
}

/// Atheros capacities and byte order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtherosConfig {
    /// Receive antennas allotted per record. Default: **3**.
    pub nrxnum: usize,
    /// Transmit antennas allotted per record. Default: **2**.
    pub ntxnum: usize,
    /// Subcarriers allotted per record. Default: **56**.
    pub tones: usize,
    /// Bytes of payload kept per record. Default: **0**.
    pub payload_slot: usize,
    /// Byte order of the capture. Ignored by the pull-10 variant, which
    /// reads it from the file. Default: **little**.
    pub endian: Endian,
}

impl Default for AtherosConfig {
    fn default() -> Self {
        Self {
            nrxnum: 3,
            ntxnum: 2,
            tones: 56,
            payload_slot: 0,
            endian: Endian::Little,
        }
    }
}

/// nexmon_csi chip and bandwidth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NexmonConfig {
    /// Chip identifier: `4339`, `43455c0`, `4358` or `4366c0`. Default: **4358**.
    pub chip: String,
    /// Channel bandwidth in MHz (20, 40, 80 or 160). Default: **80**.
    pub bw: u32,
}

impl NexmonConfig {
    /// Number of CSI values per record (`bw · 3.2`).
    pub fn nfft(&self) -> usize {
        (self.bw as usize * 16) / 5
    }

    /// Resolve the chip identifier.
    pub fn chip(&self) -> CsiResult<NexmonChip> {
        self.chip.parse()
    }
}

impl Default for NexmonConfig {
    fn default() -> Self {
        Self {
            chip: "4358".to_string(),
            bw: 80,
        }
    }
}

/// Chips with a known CSI encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NexmonChip {
    /// BCM4339 (Nexus 5), int16 I/Q.
    Bcm4339,
    /// BCM43455c0 (Raspberry Pi 3B+/4), int16 I/Q.
    Bcm43455c0,
    /// BCM4358 (Nexus 6P), packed float with 9-bit mantissa and 5-bit exponent.
    Bcm4358,
    /// BCM4366c0 (Asus RT-AC86U), packed float with 12-bit mantissa and 6-bit exponent.
    Bcm4366c0,
}

impl NexmonChip {
    /// Mantissa and exponent widths of the packed-float chips.
    pub fn float_format(self) -> Option<(u32, u32)> {
        match self {
            Self::Bcm4339 | Self::Bcm43455c0 => None,
            Self::Bcm4358 => Some((9, 5)),
            Self::Bcm4366c0 => Some((12, 6)),
        }
    }
}

impl FromStr for NexmonChip {
    type Err = CsiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().trim_start_matches("bcm") {
            "4339" => Ok(Self::Bcm4339),
            "43455c0" => Ok(Self::Bcm43455c0),
            "4358" => Ok(Self::Bcm4358),
            "4366c0" => Ok(Self::Bcm4366c0),
            _ => Err(CsiError::unsupported("nexmon chip", s)),
        }
    }
}

/// ESP32-CSI-Tool row layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Esp32Config {
    /// Rows carry only the bracketed CSI array. Default: **false**.
    pub csi_only: bool,
    /// Maximum number of CSI integers per row (even). Default: **128**.
    pub maxlen: usize,
}

impl Default for Esp32Config {
    fn default() -> Self {
        Self {
            csi_only: false,
            maxlen: 128,
        }
    }
}

/// Shape allotted to one PicoScenes CSI sub-field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiCapacity {
    /// Subcarriers.
    pub tones: usize,
    /// Spatial streams (transmit side, including extra sounding streams).
    pub tx: usize,
    /// Receive chains.
    pub rx: usize,
}

impl CsiCapacity {
    /// Build a capacity.
    pub const fn new(tones: usize, tx: usize, rx: usize) -> Self {
        Self { tones, tx, rx }
    }

    /// Whether any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.tones == 0 || self.tx == 0 || self.rx == 0
    }
}

/// PicoScenes per-field capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PicoScenesConfig {
    /// `CSI` segment. Default: **242×2×2**.
    pub csi: CsiCapacity,
    /// `PilotCSI` segment. Default: **16×2×2**.
    pub pilot_csi: CsiCapacity,
    /// `LegacyCSI` segment. Default: **52×2×2**.
    pub legacy_csi: CsiCapacity,
    /// Complex samples kept from a `BasebandSignal` segment. Default: **0**.
    pub baseband_signals: usize,
    /// Complex samples kept from a `PreEQSymbols` segment. Default: **0**.
    pub pre_eq_symbols: usize,
    /// MPDU bytes kept per frame. Default: **1522**.
    pub mpdu: usize,
    /// Fill subcarrier-index gaps of `CSI` and `LegacyCSI` by linear
    /// interpolation. Default: **false**.
    pub interpolate: bool,
}

impl Default for PicoScenesConfig {
    fn default() -> Self {
        Self {
            csi: CsiCapacity::new(242, 2, 2),
            pilot_csi: CsiCapacity::new(16, 2, 2),
            legacy_csi: CsiCapacity::new(52, 2, 2),
            baseband_signals: 0,
            pre_eq_symbols: 0,
            mpdu: 1522,
            interpolate: false,
        }
    }
}

/// Device selection plus its capacities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "device", rename_all = "snake_case")]
pub enum DeviceConfig {
    /// Intel 5300.
    Intel(IntelConfig),
    /// Atheros.
    Atheros(AtherosConfig),
    /// Atheros with byte-order marker.
    AtherosPull10(AtherosConfig),
    /// nexmon_csi.
    Nexmon(NexmonConfig),
    /// nexmon_csi pull 46.
    NexmonPull46(NexmonConfig),
    /// ESP32.
    Esp32(Esp32Config),
    /// PicoScenes.
    PicoScenes(PicoScenesConfig),
}

impl DeviceConfig {
    /// Default configuration for `kind`.
    pub fn default_for(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Intel => Self::Intel(IntelConfig::default()),
            DeviceKind::Atheros => Self::Atheros(AtherosConfig::default()),
            DeviceKind::AtherosPull10 => Self::AtherosPull10(AtherosConfig::default()),
            DeviceKind::Nexmon => Self::Nexmon(NexmonConfig::default()),
            DeviceKind::NexmonPull46 => Self::NexmonPull46(NexmonConfig::default()),
            DeviceKind::Esp32 => Self::Esp32(Esp32Config::default()),
            DeviceKind::PicoScenes => Self::PicoScenes(PicoScenesConfig::default()),
        }
    }

    /// The device kind this configuration selects.
    pub fn kind(&self) -> DeviceKind {
        match self {
            Self::Intel(_) => DeviceKind::Intel,
            Self::Atheros(_) => DeviceKind::Atheros,
            Self::AtherosPull10(_) => DeviceKind::AtherosPull10,
            Self::Nexmon(_) => DeviceKind::Nexmon,
            Self::NexmonPull46(_) => DeviceKind::NexmonPull46,
            Self::Esp32(_) => DeviceKind::Esp32,
            Self::PicoScenes(_) => DeviceKind::PicoScenes,
        }
    }

    /// Shape `[subcarrier, rx, tx]` of the primary CSI tensor of each record.
    pub fn csi_shape(&self) -> (usize, usize, usize) {
        match self {
            Self::Intel(c) => (30, c.nrxnum, c.ntxnum),
            Self::Atheros(c) | Self::AtherosPull10(c) => (c.tones, c.nrxnum, c.ntxnum),
            Self::Nexmon(c) | Self::NexmonPull46(c) => (c.nfft(), 1, 1),
            Self::Esp32(c) => (c.maxlen / 2, 1, 1),
            Self::PicoScenes(c) => (c.csi.tones, c.csi.rx, c.csi.tx),
        }
    }

    /// Check every field and return the first problem found.
    pub fn validate(&self) -> CsiResult<()> {
        match self {
            Self::Intel(c) => {
                check_antennas("nrxnum", c.nrxnum, Some(3))?;
                check_antennas("ntxnum", c.ntxnum, Some(3))?;
            }
            Self::Atheros(c) | Self::AtherosPull10(c) => {
                check_antennas("nrxnum", c.nrxnum, None)?;
                check_antennas("ntxnum", c.ntxnum, None)?;
                if c.tones == 0 {
                    return Err(CsiError::invalid_config("tones", "must be > 0"));
                }
            }
            Self::Nexmon(c) | Self::NexmonPull46(c) => {
                if ![20, 40, 80, 160].contains(&c.bw) {
                    return Err(CsiError::invalid_config(
                        "bw",
                        format!("must be one of 20, 40, 80, 160 (got {})", c.bw),
                    ));
                }
            }
            Self::Esp32(c) => {
                if c.maxlen == 0 || c.maxlen % 2 != 0 {
                    return Err(CsiError::invalid_config(
                        "maxlen",
                        format!("must be a positive even number (got {})", c.maxlen),
                    ));
                }
            }
            Self::PicoScenes(c) => {
                for (field, cap) in [
                    ("csi", &c.csi),
                    ("pilot_csi", &c.pilot_csi),
                    ("legacy_csi", &c.legacy_csi),
                ] {
                    // An all-zero capacity disables the field.
                    if cap.is_empty() && (cap.tones, cap.tx, cap.rx) != (0, 0, 0) {
                        return Err(CsiError::invalid_config(
                            field,
                            format!(
                                "capacity {}x{}x{} has a zero dimension",
                                cap.tones, cap.tx, cap.rx
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_antennas(field: &str, value: usize, max: Option<usize>) -> CsiResult<()> {
    if value == 0 {
        return Err(CsiError::invalid_config(field, "must be > 0"));
    }
    if let Some(max) = max {
        if value > max {
            return Err(CsiError::invalid_config(
                field,
                format!("must be <= {max} (got {value})"),
            ));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// How the record store is sized before a bulk read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedCount {
    /// Estimate from the capture size (or a counting pre-pass).
    #[default]
    Heuristic,
    /// Reserve exactly this many records.
    Exact(usize),
}

/// Complete configuration of a parse session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Device and capacities.
    #[serde(flatten)]
    pub device: DeviceConfig,
    /// Up-front store sizing.
    #[serde(default)]
    pub expected_count: ExpectedCount,
}

impl SessionConfig {
    /// Configuration with heuristic sizing.
    pub fn new(device: DeviceConfig) -> Self {
        Self {
            device,
            expected_count: ExpectedCount::Heuristic,
        }
    }

    /// Default configuration for `kind`.
    pub fn for_kind(kind: DeviceKind) -> Self {
        Self::new(DeviceConfig::default_for(kind))
    }

    /// Replace the sizing policy.
    #[must_use]
    pub fn with_expected_count(mut self, expected: ExpectedCount) -> Self {
        self.expected_count = expected;
        self
    }

    /// Load and validate a configuration from a JSON file.
    pub fn from_json(path: &Path) -> CsiResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| CsiError::io(path, e))?;
        let cfg: SessionConfig = serde_json::from_str(&contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Write this configuration as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn to_json(&self, path: &Path) -> CsiResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CsiError::io(parent, e))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| CsiError::io(path, e))
    }

    /// Validate every field.
    ///
    /// # Errors
    ///
    /// [`CsiError::InvalidConfiguration`] naming the first offending field:
    /// zero antenna counts (or more than 3 for Intel), a nexmon bandwidth
    /// outside {20, 40, 80, 160}, an odd or zero ESP32 `maxlen`, a PicoScenes
    /// CSI capacity with a zero dimension, or `Exact(0)` sizing.
    pub fn validate(&self) -> CsiResult<()> {
        self.device.validate()?;
        if self.expected_count == ExpectedCount::Exact(0) {
            return Err(CsiError::invalid_config("expected_count", "must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_configs_are_valid() {
        for kind in DeviceKind::ALL {
            SessionConfig::for_kind(kind)
                .validate()
                .unwrap_or_else(|e| panic!("{kind}: {e}"));
        }
    }

    #[test]
    fn csi_shapes_follow_capacities() {
        assert_eq!(DeviceConfig::default_for(DeviceKind::Intel).csi_shape(), (30, 3, 2));
        assert_eq!(DeviceConfig::default_for(DeviceKind::Atheros).csi_shape(), (56, 3, 2));
        assert_eq!(DeviceConfig::default_for(DeviceKind::Nexmon).csi_shape(), (256, 1, 1));
        assert_eq!(DeviceConfig::default_for(DeviceKind::Esp32).csi_shape(), (64, 1, 1));
        assert_eq!(DeviceConfig::default_for(DeviceKind::PicoScenes).csi_shape(), (242, 2, 2));
    }

    #[test]
    fn invalid_fields_are_named() {
        let cfg = DeviceConfig::Intel(IntelConfig {
            nrxnum: 4,
            ..IntelConfig::default()
        });
        assert!(matches!(
            cfg.validate(),
            Err(CsiError::InvalidConfiguration { field, .. }) if field == "nrxnum"
        ));

        let cfg = DeviceConfig::Nexmon(NexmonConfig {
            bw: 30,
            ..NexmonConfig::default()
        });
        assert!(matches!(
            cfg.validate(),
            Err(CsiError::InvalidConfiguration { field, .. }) if field == "bw"
        ));

        let cfg = DeviceConfig::Esp32(Esp32Config {
            maxlen: 127,
            ..Esp32Config::default()
        });
        assert!(cfg.validate().is_err());

        let cfg = DeviceConfig::PicoScenes(PicoScenesConfig {
            csi: CsiCapacity::new(242, 0, 2),
            ..PicoScenesConfig::default()
        });
        assert!(matches!(
            cfg.validate(),
            Err(CsiError::InvalidConfiguration { field, .. }) if field == "csi"
        ));
    }

    #[test]
    fn nexmon_chip_resolution() {
        let cfg = NexmonConfig::default();
        assert_eq!(cfg.chip().unwrap(), NexmonChip::Bcm4358);
        assert_eq!(NexmonChip::Bcm4366c0.float_format(), Some((12, 6)));
        assert!(matches!(
            "43xx".parse::<NexmonChip>(),
            Err(CsiError::UnsupportedVariant { .. })
        ));
    }

    #[test]
    fn device_kind_parsing() {
        assert_eq!("intel".parse::<DeviceKind>().unwrap(), DeviceKind::Intel);
        assert_eq!("nexmon-pull46".parse::<DeviceKind>().unwrap(), DeviceKind::NexmonPull46);
        assert_eq!("PicoScenes".parse::<DeviceKind>().unwrap(), DeviceKind::PicoScenes);
        assert!("bluetooth".parse::<DeviceKind>().is_err());
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("cfg").join("session.json");

        let cfg = SessionConfig::new(DeviceConfig::Atheros(AtherosConfig {
            tones: 114,
            endian: Endian::Big,
            ..AtherosConfig::default()
        }))
        .with_expected_count(ExpectedCount::Exact(10));
        cfg.to_json(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"device\": \"atheros\""));
        let loaded = SessionConfig::from_json(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn json_defaults_fill_missing_fields() {
        let cfg: SessionConfig =
            serde_json::from_str(r#"{"device": "nexmon", "chip": "4366c0"}"#).unwrap();
        assert_eq!(cfg.expected_count, ExpectedCount::Heuristic);
        match cfg.device {
            DeviceConfig::Nexmon(n) => {
                assert_eq!(n.chip, "4366c0");
                assert_eq!(n.bw, 80);
            }
            other => panic!("unexpected device {other:?}"),
        }
    }
}
