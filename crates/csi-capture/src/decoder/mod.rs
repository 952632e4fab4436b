//! Per-device field decoders.
//!
//! Each decoder turns one [`RawFrame`](crate::framing::RawFrame) into a
//! typed record whose CSI tensor is shaped by the session configuration.
//! Decoders never read past the frame they are given.

pub mod atheros;
pub mod esp32;
pub mod intel;
pub mod nexmon;
pub mod picoscenes;

use ndarray::Array3;
use num_complex::Complex64;

pub use atheros::{AtherosDecoder, AtherosRecord};
pub use esp32::{Esp32Decoder, Esp32Record};
pub use intel::{CsiScale, IntelDecoder, IntelRecord, MacHeader};
pub use nexmon::{NexmonDecoder, NexmonRecord};
pub use picoscenes::{PicoScenesDecoder, PicoScenesRecord};

/// A 48-bit IEEE 802 address.
pub type MacAddr = [u8; 6];

/// Render a MAC address as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac(addr: &MacAddr) -> String {
    addr.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse `aa:bb:cc:dd:ee:ff`.
pub fn parse_mac(text: &str) -> Option<MacAddr> {
    let mut out = [0u8; 6];
    let mut parts = text.trim().split(':');
    for slot in &mut out {
        *slot = u8::from_str_radix(parts.next()?, 16).ok()?;
    }
    parts.next().is_none().then_some(out)
}

/// Variant-agnostic view of a decoded record's CSI.
pub trait CsiRecord {
    /// CSI tensor indexed `[subcarrier, rx, tx]`.
    fn csi(&self) -> &Array3<Complex64>;

    /// Mutable CSI tensor.
    fn csi_mut(&mut self) -> &mut Array3<Complex64>;

    /// Subcarriers in the tensor.
    fn subcarrier_count(&self) -> usize {
        self.csi().shape()[0]
    }
}

macro_rules! impl_csi_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl CsiRecord for $ty {
                fn csi(&self) -> &Array3<Complex64> {
                    &self.csi
                }

                fn csi_mut(&mut self) -> &mut Array3<Complex64> {
                    &mut self.csi
                }
            }
        )+
    };
}

impl_csi_record!(IntelRecord, AtherosRecord, NexmonRecord, Esp32Record);

impl CsiRecord for PicoScenesRecord {
    fn csi(&self) -> &Array3<Complex64> {
        &self.csi.csi
    }

    fn csi_mut(&mut self) -> &mut Array3<Complex64> {
        &mut self.csi.csi
    }
}
