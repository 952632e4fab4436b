//! Error types for CSI capture decoding.
//!
//! Every fallible operation in the crate returns [`CsiResult`]. The variants
//! follow the decode propagation rules: truncation ends a bulk read with a
//! partial result, a malformed or oversized record is skipped in bulk mode,
//! and configuration errors are reported before any parsing starts.

use std::path::PathBuf;

use thiserror::Error;

/// Convenient `Result` alias used throughout the crate.
pub type CsiResult<T> = Result<T, CsiError>;

/// Errors produced while configuring a session or decoding capture data.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CsiError {
    /// Fewer bytes remain than the record or field declares.
    #[error("Truncated record at offset {offset}: need {needed} bytes, {available} available")]
    TruncatedRecord {
        /// Absolute byte offset where the read was attempted.
        offset: usize,
        /// Bytes required to finish the read.
        needed: usize,
        /// Bytes actually left in the buffer.
        available: usize,
    },

    /// An unrecognized device, chip, segment version or sub-format identifier.
    #[error("Unsupported {what}: {value}")]
    UnsupportedVariant {
        /// What kind of identifier was rejected.
        what: &'static str,
        /// The rejected value, rendered for display.
        value: String,
    },

    /// A record declares a size larger than the configured capacity.
    #[error("Dimension mismatch for {field}: record declares {declared}, capacity is {capacity}")]
    DimensionMismatch {
        /// The field or dimension that overflowed.
        field: String,
        /// Size declared by the record.
        declared: usize,
        /// Size configured for the session.
        capacity: usize,
    },

    /// Configuration parameters outside the recognized set.
    #[error("Invalid configuration for {field}: {reason}")]
    InvalidConfiguration {
        /// The offending configuration field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The record store could not grow to hold more records.
    #[error("Capacity exceeded: cannot grow record store beyond {capacity} records")]
    CapacityExceeded {
        /// Capacity at the time growth failed.
        capacity: usize,
    },

    /// Structurally invalid record content.
    #[error("Malformed record at offset {offset}: {message}")]
    Malformed {
        /// Absolute byte offset of the record.
        offset: usize,
        /// Human-readable description.
        message: String,
    },

    /// An I/O error while reading a capture or companion file.
    #[error("I/O error on {path:?}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// JSON (de)serialization of a session configuration failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CsiError {
    /// Create a truncation error.
    #[must_use]
    pub fn truncated(offset: usize, needed: usize, available: usize) -> Self {
        Self::TruncatedRecord {
            offset,
            needed,
            available,
        }
    }

    /// Create an unsupported-variant error.
    #[must_use]
    pub fn unsupported(what: &'static str, value: impl ToString) -> Self {
        Self::UnsupportedVariant {
            what,
            value: value.to_string(),
        }
    }

    /// Create a dimension-mismatch error.
    #[must_use]
    pub fn dimension(field: impl Into<String>, declared: usize, capacity: usize) -> Self {
        Self::DimensionMismatch {
            field: field.into(),
            declared,
            capacity,
        }
    }

    /// Create an invalid-configuration error.
    #[must_use]
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed-record error.
    #[must_use]
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        Self::Malformed {
            offset,
            message: message.into(),
        }
    }

    /// Create an I/O error bound to a path.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` if a bulk read can continue past this error by
    /// skipping the offending record.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Malformed { .. } | Self::DimensionMismatch { .. } => true,
            Self::TruncatedRecord { .. }
            | Self::UnsupportedVariant { .. }
            | Self::InvalidConfiguration { .. }
            | Self::CapacityExceeded { .. }
            | Self::Io { .. }
            | Self::Json(_) => false,
        }
    }

    /// Returns `true` for the truncation variant.
    #[must_use]
    pub fn is_truncation(&self) -> bool {
        matches!(self, Self::TruncatedRecord { .. })
    }
}
