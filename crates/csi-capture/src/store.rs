//! Growable per-device record storage.
//!
//! A [`RecordStore`] is sized once before a bulk read and grows only through
//! [`RecordStore::push`], which doubles the reservation and logs the
//! reallocation. [`RecordSet`] is the closed set of stores a session can own.

use ndarray::Array3;
use num_complex::Complex64;
use tracing::warn;

use crate::config::DeviceKind;
use crate::decoder::{
    AtherosRecord, CsiRecord, Esp32Record, IntelRecord, NexmonRecord, PicoScenesRecord,
};
use crate::error::{CsiError, CsiResult};

/// Records of one device kind, with an explicit reservation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordStore<R> {
    records: Vec<R>,
}

impl<R> Default for RecordStore<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
        }
    }
}

impl<R> RecordStore<R> {
    /// Empty store with room for `capacity` records.
    pub fn with_capacity(capacity: usize) -> CsiResult<Self> {
        let mut records = Vec::new();
        records
            .try_reserve_exact(capacity)
            .map_err(|_| CsiError::CapacityExceeded { capacity: 0 })?;
        Ok(Self { records })
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no record.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records the store can hold before it must grow.
    pub fn capacity(&self) -> usize {
        self.records.capacity()
    }

    /// Append a record, doubling the reservation when full.
    pub fn push(&mut self, record: R) -> CsiResult<()> {
        let capacity = self.records.capacity();
        if self.records.len() == capacity {
            let additional = capacity.max(1);
            warn!(
                from = capacity,
                to = capacity + additional,
                "record store full, growing"
            );
            self.records
                .try_reserve_exact(additional)
                .map_err(|_| CsiError::CapacityExceeded { capacity })?;
        }
        self.records.push(record);
        Ok(())
    }

    /// Keep the first `count` records.
    pub fn truncate(&mut self, count: usize) {
        self.records.truncate(count);
    }

    /// Release the unused reservation.
    pub fn shrink_to_fit(&mut self) {
        self.records.shrink_to_fit();
    }

    /// Drop every record, keeping the reservation.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Option<&R> {
        self.records.get(index)
    }

    /// Mutable record at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut R> {
        self.records.get_mut(index)
    }

    /// Records in capture order.
    pub fn as_slice(&self) -> &[R] {
        &self.records
    }

    /// Mutable records in capture order.
    pub fn as_mut_slice(&mut self) -> &mut [R] {
        &mut self.records
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.records.iter()
    }

    /// Iterate mutably over the records.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, R> {
        self.records.iter_mut()
    }

    /// Take the records out of the store.
    pub fn into_vec(self) -> Vec<R> {
        self.records
    }
}

impl<'a, R> IntoIterator for &'a RecordStore<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

macro_rules! record_set_accessors {
    ($($variant:ident => $record:ty, $as_ref:ident, $as_mut:ident;)+) => {
        $(
            #[doc = concat!("The store, if this set holds `", stringify!($record), "`s.")]
            pub fn $as_ref(&self) -> Option<&RecordStore<$record>> {
                match self {
                    Self::$variant(store) => Some(store),
                    _ => None,
                }
            }

            #[doc = concat!("Mutable store, if this set holds `", stringify!($record), "`s.")]
            pub fn $as_mut(&mut self) -> Option<&mut RecordStore<$record>> {
                match self {
                    Self::$variant(store) => Some(store),
                    _ => None,
                }
            }
        )+
    };
}

/// Dispatch `$body` over whichever store `$set` holds, binding it to `$store`.
macro_rules! with_store {
    ($set:expr, $store:ident => $body:expr) => {
        match $set {
            RecordSet::Intel($store) => $body,
            RecordSet::Atheros($store) => $body,
            RecordSet::Nexmon($store) => $body,
            RecordSet::Esp32($store) => $body,
            RecordSet::PicoScenes($store) => $body,
        }
    };
}

/// The records of a session, one variant per record type.
///
/// The two Atheros layouts share [`AtherosRecord`] and the two nexmon
/// layouts share [`NexmonRecord`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordSet {
    /// Intel 5300 records.
    Intel(RecordStore<IntelRecord>),
    /// Atheros records.
    Atheros(RecordStore<AtherosRecord>),
    /// nexmon records.
    Nexmon(RecordStore<NexmonRecord>),
    /// ESP32 rows.
    Esp32(RecordStore<Esp32Record>),
    /// PicoScenes frames.
    PicoScenes(RecordStore<PicoScenesRecord>),
}

impl RecordSet {
    /// Empty set for `kind` with room for `capacity` records.
    pub fn with_capacity(kind: DeviceKind, capacity: usize) -> CsiResult<Self> {
        Ok(match kind {
            DeviceKind::Intel => Self::Intel(RecordStore::with_capacity(capacity)?),
            DeviceKind::Atheros | DeviceKind::AtherosPull10 => {
                Self::Atheros(RecordStore::with_capacity(capacity)?)
            }
            DeviceKind::Nexmon | DeviceKind::NexmonPull46 => {
                Self::Nexmon(RecordStore::with_capacity(capacity)?)
            }
            DeviceKind::Esp32 => Self::Esp32(RecordStore::with_capacity(capacity)?),
            DeviceKind::PicoScenes => Self::PicoScenes(RecordStore::with_capacity(capacity)?),
        })
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        with_store!(self, s => s.len())
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserved record slots.
    pub fn capacity(&self) -> usize {
        with_store!(self, s => s.capacity())
    }

    /// Keep the first `count` records.
    pub fn truncate(&mut self, count: usize) {
        with_store!(self, s => s.truncate(count));
    }

    /// Release the unused reservation.
    pub fn shrink_to_fit(&mut self) {
        with_store!(self, s => s.shrink_to_fit());
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        with_store!(self, s => s.clear());
    }

    /// CSI tensor of record `index`.
    pub fn csi(&self, index: usize) -> Option<&Array3<Complex64>> {
        with_store!(self, s => s.get(index).map(CsiRecord::csi))
    }

    /// Short name of the record type held.
    pub fn record_type(&self) -> &'static str {
        match self {
            Self::Intel(_) => "intel",
            Self::Atheros(_) => "atheros",
            Self::Nexmon(_) => "nexmon",
            Self::Esp32(_) => "esp32",
            Self::PicoScenes(_) => "picoscenes",
        }
    }

    record_set_accessors! {
        Intel => IntelRecord, as_intel, as_intel_mut;
        Atheros => AtherosRecord, as_atheros, as_atheros_mut;
        Nexmon => NexmonRecord, as_nexmon, as_nexmon_mut;
        Esp32 => Esp32Record, as_esp32, as_esp32_mut;
        PicoScenes => PicoScenesRecord, as_picoscenes, as_picoscenes_mut;
    }
}
