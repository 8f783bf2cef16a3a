//! rustred-algorithms: Workspace algorithms built on rustred-core.
//!
//! Each algorithm takes an input [`SpectrumCollection`] and produces a new
//! one, running its per-spectrum work through a [`ParallelSpectrumDriver`]:
//! - **Rebin** - shared binning from rebin parameters
//! - **ResampleX** - ragged per-spectrum binning with a fixed bin count
//! - **ConvertUnits** - X unit conversion for events and histograms
//! - **RemoveBins** - zero the bins inside an X range
//! - **CompressEvents** - merge nearby events
//! - **ConvertToHistogram** / **ConvertToPointData** - representation changes
//!
#![warn(missing_docs)]

mod algorithm;
mod compress;
mod convert_units;
mod histogram;
mod rebin;
mod remove_bins;
mod resample;

pub use algorithm::{AlgorithmOutput, SpectrumAlgorithm};
pub use compress::{CompressEvents, CompressEventsConfig};
pub use convert_units::{ConvertUnits, ConvertUnitsConfig};
pub use histogram::{ConvertToHistogram, ConvertToPointData};
pub use rebin::{Rebin, RebinConfig};
pub use remove_bins::{RemoveBins, RemoveBinsConfig};
pub use resample::{ResampleConfig, ResampleX};

// Re-export the core types every algorithm signature uses
pub use rustred_core::{DriverConfig, ParallelSpectrumDriver, SpectrumCollection};
