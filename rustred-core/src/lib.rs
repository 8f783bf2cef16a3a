//! rustred-core: event storage, binning and unit conversion for neutron data reduction.
//!
//! This crate provides the per-spectrum event lists, the bin-edge generators,
//! the unit conversion strategy, and the spectrum collection that ties them
//! together, plus a parallel driver for per-spectrum work.
//!

pub mod binning;
pub mod collection;
pub mod conversion;
pub mod driver;
pub mod error;
pub mod event;
pub mod event_list;
pub mod geometry;
pub mod units;

pub use binning::{
    convert_to_bin_boundary, convert_to_bin_centre, create_axis_from_rebin_params,
    determine_binning, rebin_histogram, BinEdges, BinningOutcome, RaggedBinning, RebinParams,
};
pub use collection::{
    Spectrum, SpectrumCollection, SpectrumData, SpectrumDataMut, SpectrumInfo, SpectrumMut,
    SpectrumStorage, XAxis,
};
pub use conversion::{ConversionConfig, ConversionMode, SpectrumConversion, UnitsConversionHelper};
pub use driver::{DriverConfig, ParallelSpectrumDriver, Progress};
pub use error::{Error, Result, SpectrumFailure};
pub use event::{Event, EventType, PulseTime, SortOrder, TofEvent, WeightedEvent, WeightedEventNoTime};
pub use event_list::{EventList, EventStorage};
pub use geometry::{
    DetectorGeometry, DetectorId, DetectorTable, InstrumentGeometry, SimpleInstrument,
    SpectrumGeometry,
};
pub use units::{ConversionContext, EnergyMode, PreparedUnit, Unit};
