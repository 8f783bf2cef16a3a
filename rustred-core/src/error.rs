//! Error types for rustred-core.

use std::fmt;

use thiserror::Error;

use crate::event::EventType;

/// Result type alias for rustred operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for rustred operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Malformed binning request.
    #[error("invalid binning: {0}")]
    InvalidBinning(String),

    /// Unknown unit name.
    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    /// Two arrays that must agree in length do not.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Workspace index outside the collection.
    #[error("workspace index {index} out of range (number of spectra: {len})")]
    IndexOutOfRange { index: usize, len: usize },

    /// Per-spectrum X mutation requested on a collection with a shared axis.
    #[error("the X axis is shared by all spectra; make the collection ragged first")]
    SharedAxis,

    /// The collection does not hold the storage the operation needs.
    #[error("operation requires {0} storage")]
    WrongStorage(&'static str),

    /// Event variants can only be promoted, never downgraded.
    #[error("cannot convert {from} events to {to} events")]
    InvalidPromotion { from: EventType, to: EventType },

    /// Operation needs pulse times that the events no longer carry.
    #[error("events without pulse times cannot be filtered or sorted by pulse time")]
    NoPulseTime,

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Geometry lookup failed for a detector or spectrum.
    #[error("geometry error: {0}")]
    Geometry(String),

    /// A unit formula has no valid value for the given input.
    #[error("numeric error: {0}")]
    Numeric(String),

    /// A per-spectrum transform panicked.
    #[error("worker panicked: {0}")]
    WorkerPanic(String),

    /// One or more spectra failed inside a parallel run.
    #[error("{}", FailureSummary(.0))]
    SpectrumFailures(Vec<SpectrumFailure>),
}

/// A failure recorded for one workspace index during a parallel run.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFailure {
    /// Workspace index that failed.
    pub index: usize,
    /// Error raised while processing it.
    pub error: Box<Error>,
}

impl fmt::Display for SpectrumFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "spectrum {}: {}", self.index, self.error)
    }
}

struct FailureSummary<'a>(&'a [SpectrumFailure]);

impl fmt::Display for FailureSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} spectra failed", self.0.len())?;
        if let Some(first) = self.0.first() {
            write!(f, " (first: {first})")?;
        }
        Ok(())
    }
}

impl Error {
    /// Returns the per-spectrum failures if this is an aggregated parallel error.
    #[must_use]
    pub fn failures(&self) -> &[SpectrumFailure] {
        match self {
            Self::SpectrumFailures(failures) => failures,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_message_names_first_failure() {
        let err = Error::SpectrumFailures(vec![
            SpectrumFailure {
                index: 3,
                error: Box::new(Error::Geometry("detector 7 not found".into())),
            },
            SpectrumFailure {
                index: 9,
                error: Box::new(Error::SharedAxis),
            },
        ]);
        let message = err.to_string();
        assert!(message.starts_with("2 spectra failed"));
        assert!(message.contains("spectrum 3: geometry error: detector 7 not found"));
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn test_failures_empty_for_plain_errors() {
        assert!(Error::SharedAxis.failures().is_empty());
    }
}
