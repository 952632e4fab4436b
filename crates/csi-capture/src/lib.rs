//! # csi-capture
//!
//! Decoders for the binary and text capture formats written by WiFi channel
//! state information (CSI) tools:
//!
//! - **Intel 5300**: Linux 802.11n CSI Tool `.dat` logs, with the optional
//!   `0xc1` MAC header records and `.datstp` timestamps
//! - **Atheros**: Atheros CSI Tool logs, in either byte order
//! - **nexmon**: `nexmon_csi` pcap captures, packed-float and int16 chips
//! - **ESP32**: ESP32-CSI-Tool CSV rows
//! - **PicoScenes**: self-describing segmented `.csi` frames
//!
//! Every format decodes into a per-device record type whose CSI is an
//! [`ndarray::Array3`] of [`num_complex::Complex64`] indexed
//! `[subcarrier, rx, tx]`, with a shape fixed by the session configuration.
//!
//! The [`transform`] module turns raw Intel CSI into a channel matrix and
//! interpolates CSI across subcarriers. [`grouping`] builds spatial-stream
//! indices over nexmon captures.
//!
//! ## Example
//!
//! ```rust
//! use csi_capture::prelude::*;
//!
//! let mut session = ParseSession::new(SessionConfig::for_kind(DeviceKind::Intel))?;
//! let summary = session.read(&[])?;
//! assert_eq!(summary.count, 0);
//! assert_eq!(session.decode_one(&[]), DecodeStatus::NotRecognized);
//! # Ok::<(), CsiError>(())
//! ```

#![forbid(unsafe_code)]

pub mod bits;
pub mod config;
pub mod decoder;
pub mod error;
pub mod framing;
pub mod grouping;
pub mod session;
pub mod store;
pub mod subcarrier;
pub mod transform;

pub use config::{DeviceConfig, DeviceKind, ExpectedCount, SessionConfig};
pub use decoder::{
    AtherosRecord, CsiRecord, Esp32Record, IntelRecord, NexmonRecord, PicoScenesRecord,
};
pub use error::{CsiError, CsiResult};
pub use session::{CheckReport, DecodeStatus, ParseSession, ReadSummary};
pub use store::{RecordSet, RecordStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports.
///
/// ```rust
/// use csi_capture::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bits::Endian;
    pub use crate::config::{
        AtherosConfig, CsiCapacity, DeviceConfig, DeviceKind, Esp32Config, ExpectedCount,
        IntelConfig, NexmonConfig, PicoScenesConfig, SessionConfig,
    };
    pub use crate::decoder::{
        AtherosRecord, CsiRecord, CsiScale, Esp32Record, IntelRecord, NexmonRecord,
        PicoScenesRecord,
    };
    pub use crate::error::{CsiError, CsiResult};
    pub use crate::session::{CheckReport, DecodeStatus, ParseSession, ReadSummary};
    pub use crate::store::{RecordSet, RecordStore};
    pub use crate::transform::{
        interpolate_csi, scaled_csi, scaled_csi_sm, total_rss, undo_spatial_mapping,
        InterpolationMode,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_valid() {
        assert!(!VERSION.is_empty());
    }
}
