//! Indexed collection of spectra with shared or ragged X axes.
//!
//! A [`SpectrumCollection`] holds either one [`EventList`] per spectrum or one
//! `(Y, E)` histogram per spectrum, never a mix. The X axis is either a single
//! shared vector or one vector per spectrum. Event-backed collections always
//! use bin edges; histograms may use edges or points.

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::binning::BinEdges;
use crate::driver::ParallelSpectrumDriver;
use crate::error::{Error, Result};
use crate::event_list::EventList;
use crate::geometry::{DetectorId, InstrumentGeometry};
use crate::units::Unit;

/// Immutable identity of one spectrum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumInfo {
    /// Global spectrum number.
    pub spectrum_no: i32,
    /// Detectors contributing to this spectrum.
    pub detector_ids: BTreeSet<DetectorId>,
}

impl SpectrumInfo {
    /// Creates spectrum metadata.
    #[must_use]
    pub fn new<I: IntoIterator<Item = DetectorId>>(spectrum_no: i32, detector_ids: I) -> Self {
        Self {
            spectrum_no,
            detector_ids: detector_ids.into_iter().collect(),
        }
    }
}

/// Per-spectrum data representation.
#[derive(Debug, Clone, PartialEq)]
pub enum SpectrumStorage {
    /// One event list per spectrum.
    Events(Vec<EventList>),
    /// One `(Y, E)` pair per spectrum.
    Histogram {
        /// Counts.
        y: Vec<Vec<f64>>,
        /// Errors.
        e: Vec<Vec<f64>>,
    },
}

impl SpectrumStorage {
    fn len(&self) -> usize {
        match self {
            Self::Events(lists) => lists.len(),
            Self::Histogram { y, .. } => y.len(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Events(_) => "event",
            Self::Histogram { .. } => "histogram",
        }
    }
}

/// X values for the whole collection.
#[derive(Debug, Clone, PartialEq)]
pub enum XAxis {
    /// One axis shared by every spectrum.
    Shared(Arc<Vec<f64>>),
    /// One axis per spectrum.
    Ragged(Vec<Vec<f64>>),
}

impl XAxis {
    fn get(&self, index: usize) -> &[f64] {
        match self {
            Self::Shared(x) => x,
            Self::Ragged(xs) => &xs[index],
        }
    }
}

/// Borrowed view of one spectrum.
#[derive(Debug, Clone, Copy)]
pub struct Spectrum<'a> {
    /// Workspace index.
    pub index: usize,
    /// Spectrum number and detectors.
    pub info: &'a SpectrumInfo,
    /// X values.
    pub x: &'a [f64],
    /// Data.
    pub data: SpectrumData<'a>,
}

/// Borrowed data of one spectrum.
#[derive(Debug, Clone, Copy)]
pub enum SpectrumData<'a> {
    /// Events, histogrammed on demand against the spectrum's X.
    Events(&'a EventList),
    /// Stored histogram.
    Histogram {
        /// Counts.
        y: &'a [f64],
        /// Errors.
        e: &'a [f64],
    },
}

/// Mutable access to one spectrum of a ragged collection.
///
/// The X vector may be replaced wholesale; the collection re-checks its
/// length invariants when the borrow ends through
/// [`SpectrumCollection::validate`].
#[derive(Debug)]
pub struct SpectrumMut<'a> {
    /// Workspace index.
    pub index: usize,
    /// X values of this spectrum.
    pub x: &'a mut Vec<f64>,
    /// Data of this spectrum.
    pub data: SpectrumDataMut<'a>,
}

/// Mutable data of one spectrum.
#[derive(Debug)]
pub enum SpectrumDataMut<'a> {
    /// Event list.
    Events(&'a mut EventList),
    /// Histogram arrays.
    Histogram {
        /// Counts.
        y: &'a mut Vec<f64>,
        /// Errors.
        e: &'a mut Vec<f64>,
    },
}

/// Spectra, X axes, and metadata for one measurement.
#[derive(Clone)]
pub struct SpectrumCollection {
    spectra: Vec<SpectrumInfo>,
    storage: SpectrumStorage,
    x: XAxis,
    point_data: bool,
    unit: Unit,
    y_label: String,
    title: String,
    instrument: Arc<dyn InstrumentGeometry>,
}

impl fmt::Debug for SpectrumCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumCollection")
            .field("spectra", &self.spectra.len())
            .field("storage", &self.storage.kind())
            .field("ragged", &self.is_ragged())
            .field("point_data", &self.point_data)
            .field("unit", &self.unit)
            .field("title", &self.title)
            .field("instrument", &self.instrument.name())
            .finish_non_exhaustive()
    }
}

impl SpectrumCollection {
    /// Creates an event collection with one shared binning.
    ///
    /// Spectrum numbers are `1..=n`; detector IDs are taken from each list.
    ///
    /// # Errors
    /// Returns [`Error::InvalidBinning`] if `edges` are not valid bin edges.
    pub fn from_events(
        instrument: Arc<dyn InstrumentGeometry>,
        lists: Vec<EventList>,
        edges: Vec<f64>,
    ) -> Result<Self> {
        let edges = BinEdges::new(edges)?.into_vec();
        let spectra = lists
            .iter()
            .zip(1..)
            .map(|(list, number)| SpectrumInfo::new(number, list.detector_ids().iter().copied()))
            .collect();
        Ok(Self {
            spectra,
            storage: SpectrumStorage::Events(lists),
            x: XAxis::Shared(Arc::new(edges)),
            point_data: false,
            unit: Unit::Tof,
            y_label: "Counts".to_string(),
            title: String::new(),
            instrument,
        })
    }

    /// Creates a histogram collection.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] if the array lengths break the
    /// X/Y/E invariants.
    pub fn from_histograms(
        instrument: Arc<dyn InstrumentGeometry>,
        spectra: Vec<SpectrumInfo>,
        x: XAxis,
        y: Vec<Vec<f64>>,
        e: Vec<Vec<f64>>,
        point_data: bool,
    ) -> Result<Self> {
        let collection = Self {
            spectra,
            storage: SpectrumStorage::Histogram { y, e },
            x,
            point_data,
            unit: Unit::Tof,
            y_label: "Counts".to_string(),
            title: String::new(),
            instrument,
        };
        collection.validate()?;
        Ok(collection)
    }

    /// Sets the X unit.
    #[must_use]
    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    /// Sets the title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the Y label.
    #[must_use]
    pub fn with_y_label(mut self, label: impl Into<String>) -> Self {
        self.y_label = label.into();
        self
    }

    /// Creates an output collection shaped like `other`.
    ///
    /// Geometry, metadata and X axes are always copied. Data is copied when
    /// `copy_data` is set; otherwise event lists are empty (keeping detector
    /// IDs) and histograms are zero-filled.
    #[must_use]
    pub fn derive_from(other: &Self, copy_data: bool) -> Self {
        let storage = if copy_data {
            other.storage.clone()
        } else {
            match &other.storage {
                SpectrumStorage::Events(lists) => SpectrumStorage::Events(
                    lists
                        .iter()
                        .map(|list| {
                            EventList::new().with_detector_ids(list.detector_ids().iter().copied())
                        })
                        .collect(),
                ),
                SpectrumStorage::Histogram { y, .. } => SpectrumStorage::Histogram {
                    y: y.iter().map(|v| vec![0.0; v.len()]).collect(),
                    e: y.iter().map(|v| vec![0.0; v.len()]).collect(),
                },
            }
        };
        Self {
            spectra: other.spectra.clone(),
            storage,
            x: other.x.clone(),
            point_data: other.point_data,
            unit: other.unit,
            y_label: other.y_label.clone(),
            title: other.title.clone(),
            instrument: Arc::clone(&other.instrument),
        }
    }

    /// Number of spectra.
    #[must_use]
    pub fn number_of_spectra(&self) -> usize {
        self.spectra.len()
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index < self.spectra.len() {
            Ok(())
        } else {
            Err(Error::IndexOutOfRange {
                index,
                len: self.spectra.len(),
            })
        }
    }

    /// Returns a view of spectrum `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`].
    pub fn spectrum(&self, index: usize) -> Result<Spectrum<'_>> {
        self.check_index(index)?;
        let data = match &self.storage {
            SpectrumStorage::Events(lists) => SpectrumData::Events(&lists[index]),
            SpectrumStorage::Histogram { y, e } => SpectrumData::Histogram {
                y: &y[index],
                e: &e[index],
            },
        };
        Ok(Spectrum {
            index,
            info: &self.spectra[index],
            x: self.x.get(index),
            data,
        })
    }

    /// Spectrum metadata for every index.
    #[must_use]
    pub fn spectrum_info(&self) -> &[SpectrumInfo] {
        &self.spectra
    }

    /// Returns true if the collection stores events.
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(self.storage, SpectrumStorage::Events(_))
    }

    /// Returns true if every spectrum has its own X axis.
    #[must_use]
    pub fn is_ragged(&self) -> bool {
        matches!(self.x, XAxis::Ragged(_))
    }

    /// Returns true if X holds points rather than bin edges.
    #[must_use]
    pub fn is_point_data(&self) -> bool {
        self.point_data
    }

    /// X unit.
    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Relabels the X unit. Callers converting X values must set this.
    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }

    /// Y label.
    #[must_use]
    pub fn y_label(&self) -> &str {
        &self.y_label
    }

    /// Title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Instrument geometry service.
    #[must_use]
    pub fn instrument(&self) -> &Arc<dyn InstrumentGeometry> {
        &self.instrument
    }

    /// Storage.
    #[must_use]
    pub fn storage(&self) -> &SpectrumStorage {
        &self.storage
    }

    /// X axis.
    #[must_use]
    pub fn x_axis(&self) -> &XAxis {
        &self.x
    }

    /// X values of spectrum `index`.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`].
    pub fn read_x(&self, index: usize) -> Result<&[f64]> {
        self.check_index(index)?;
        Ok(self.x.get(index))
    }

    /// Mutable X values of spectrum `index`.
    ///
    /// # Errors
    /// Returns [`Error::SharedAxis`] unless the collection is ragged.
    pub fn data_x(&mut self, index: usize) -> Result<&mut [f64]> {
        self.check_index(index)?;
        match &mut self.x {
            XAxis::Shared(_) => Err(Error::SharedAxis),
            XAxis::Ragged(xs) => Ok(&mut xs[index]),
        }
    }

    /// Replaces the X values of spectrum `index`.
    ///
    /// # Errors
    /// Returns [`Error::SharedAxis`] unless ragged, and
    /// [`Error::LengthMismatch`] or [`Error::InvalidBinning`] if `x` does not
    /// fit the spectrum's data.
    pub fn set_x(&mut self, index: usize, x: Vec<f64>) -> Result<()> {
        self.check_index(index)?;
        if !self.is_ragged() {
            return Err(Error::SharedAxis);
        }
        let x = self.check_axis(index, x)?;
        if let XAxis::Ragged(xs) = &mut self.x {
            xs[index] = x;
        }
        Ok(())
    }

    /// Replaces every X axis with one shared axis.
    ///
    /// # Errors
    /// Returns [`Error::LengthMismatch`] or [`Error::InvalidBinning`] if `x`
    /// does not fit every spectrum.
    pub fn set_shared_x(&mut self, x: Vec<f64>) -> Result<()> {
        let mut x = x;
        for index in 0..self.spectra.len() {
            x = self.check_axis(index, x)?;
        }
        if self.spectra.is_empty() && self.is_event() {
            x = BinEdges::new(x)?.into_vec();
        }
        self.x = XAxis::Shared(Arc::new(x));
        Ok(())
    }

    /// Replaces the whole X axis, keeping the data.
    ///
    /// # Errors
    /// Returns the invariant violation and leaves the collection unchanged.
    pub fn set_x_axis(&mut self, x: XAxis) -> Result<()> {
        let previous = std::mem::replace(&mut self.x, x);
        if let Err(err) = self.validate() {
            self.x = previous;
            return Err(err);
        }
        Ok(())
    }

    /// Replaces the data with histograms on a new X axis.
    ///
    /// # Errors
    /// Returns the invariant violation and leaves the collection unchanged.
    pub fn set_histograms(
        &mut self,
        x: XAxis,
        y: Vec<Vec<f64>>,
        e: Vec<Vec<f64>>,
        point_data: bool,
    ) -> Result<()> {
        let previous_storage =
            std::mem::replace(&mut self.storage, SpectrumStorage::Histogram { y, e });
        let previous_x = std::mem::replace(&mut self.x, x);
        let previous_point_data = std::mem::replace(&mut self.point_data, point_data);
        if let Err(err) = self.validate() {
            self.storage = previous_storage;
            self.x = previous_x;
            self.point_data = previous_point_data;
            return Err(err);
        }
        Ok(())
    }

    /// Gives every spectrum its own copy of the X axis.
    pub fn make_ragged(&mut self) {
        if let XAxis::Shared(x) = &self.x {
            self.x = XAxis::Ragged(vec![x.as_ref().clone(); self.spectra.len()]);
        }
    }

    fn check_axis(&self, index: usize, x: Vec<f64>) -> Result<Vec<f64>> {
        match &self.storage {
            SpectrumStorage::Events(_) => Ok(BinEdges::new(x)?.into_vec()),
            SpectrumStorage::Histogram { y, .. } => {
                let expected = y[index].len() + usize::from(!self.point_data);
                if x.len() == expected {
                    Ok(x)
                } else {
                    Err(Error::LengthMismatch {
                        expected,
                        actual: x.len(),
                    })
                }
            }
        }
    }

    /// Checks the length invariants of every spectrum, and that bin edges
    /// are strictly increasing.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        let n = self.spectra.len();
        if self.storage.len() != n {
            return Err(Error::LengthMismatch {
                expected: n,
                actual: self.storage.len(),
            });
        }
        if let XAxis::Ragged(xs) = &self.x {
            if xs.len() != n {
                return Err(Error::LengthMismatch {
                    expected: n,
                    actual: xs.len(),
                });
            }
        }
        match &self.storage {
            SpectrumStorage::Events(_) => {
                if self.point_data {
                    return Err(Error::InvalidBinning(
                        "event data requires bin edges".into(),
                    ));
                }
                for index in 0..n {
                    let x = self.x.get(index);
                    if x.len() < 2 || !strictly_increasing(x) {
                        return Err(invalid_edges(index));
                    }
                }
            }
            SpectrumStorage::Histogram { y, e } => {
                if e.len() != y.len() {
                    return Err(Error::LengthMismatch {
                        expected: y.len(),
                        actual: e.len(),
                    });
                }
                let offset = usize::from(!self.point_data);
                for (index, (yi, ei)) in y.iter().zip(e).enumerate() {
                    if ei.len() != yi.len() {
                        return Err(Error::LengthMismatch {
                            expected: yi.len(),
                            actual: ei.len(),
                        });
                    }
                    let x = self.x.get(index);
                    if x.len() != yi.len() + offset {
                        return Err(Error::LengthMismatch {
                            expected: yi.len() + offset,
                            actual: x.len(),
                        });
                    }
                    if !self.point_data && !strictly_increasing(x) {
                        return Err(invalid_edges(index));
                    }
                }
            }
        }
        Ok(())
    }

    /// Event list of spectrum `index`.
    ///
    /// # Errors
    /// Returns [`Error::WrongStorage`] for histogram collections.
    pub fn events(&self, index: usize) -> Result<&EventList> {
        self.check_index(index)?;
        match &self.storage {
            SpectrumStorage::Events(lists) => Ok(&lists[index]),
            SpectrumStorage::Histogram { .. } => Err(Error::WrongStorage("event")),
        }
    }

    /// Mutable event list of spectrum `index`.
    ///
    /// # Errors
    /// Returns [`Error::WrongStorage`] for histogram collections.
    pub fn events_mut(&mut self, index: usize) -> Result<&mut EventList> {
        self.check_index(index)?;
        match &mut self.storage {
            SpectrumStorage::Events(lists) => Ok(&mut lists[index]),
            SpectrumStorage::Histogram { .. } => Err(Error::WrongStorage("event")),
        }
    }

    /// Every event list, for per-spectrum parallel mutation.
    ///
    /// # Errors
    /// Returns [`Error::WrongStorage`] for histogram collections.
    pub fn event_lists_mut(&mut self) -> Result<&mut [EventList]> {
        match &mut self.storage {
            SpectrumStorage::Events(lists) => Ok(lists),
            SpectrumStorage::Histogram { .. } => Err(Error::WrongStorage("event")),
        }
    }

    /// Mutable views of every spectrum of a ragged collection.
    ///
    /// Call [`Self::validate`] after changing X lengths.
    ///
    /// # Errors
    /// Returns [`Error::SharedAxis`] unless the collection is ragged.
    pub fn spectra_mut(&mut self) -> Result<Vec<SpectrumMut<'_>>> {
        let XAxis::Ragged(xs) = &mut self.x else {
            return Err(Error::SharedAxis);
        };
        let views = match &mut self.storage {
            SpectrumStorage::Events(lists) => xs
                .iter_mut()
                .zip(lists.iter_mut())
                .enumerate()
                .map(|(index, (x, list))| SpectrumMut {
                    index,
                    x,
                    data: SpectrumDataMut::Events(list),
                })
                .collect(),
            SpectrumStorage::Histogram { y, e } => xs
                .iter_mut()
                .zip(y.iter_mut().zip(e.iter_mut()))
                .enumerate()
                .map(|(index, (x, (y, e)))| SpectrumMut {
                    index,
                    x,
                    data: SpectrumDataMut::Histogram { y, e },
                })
                .collect(),
        };
        Ok(views)
    }

    /// Counts of spectrum `index`; event lists are histogrammed on demand.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`].
    pub fn read_y(&self, index: usize) -> Result<Cow<'_, [f64]>> {
        Ok(match self.spectrum(index)?.data {
            SpectrumData::Events(list) => Cow::Owned(list.generate_histogram(self.x.get(index)).0),
            SpectrumData::Histogram { y, .. } => Cow::Borrowed(y),
        })
    }

    /// Errors of spectrum `index`; event lists are histogrammed on demand.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`].
    pub fn read_e(&self, index: usize) -> Result<Cow<'_, [f64]>> {
        Ok(match self.spectrum(index)?.data {
            SpectrumData::Events(list) => Cow::Owned(list.generate_histogram(self.x.get(index)).1),
            SpectrumData::Histogram { e, .. } => Cow::Borrowed(e),
        })
    }

    /// `(Y, E)` of spectrum `index` in one pass.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`].
    pub fn histogram(&self, index: usize) -> Result<(Vec<f64>, Vec<f64>)> {
        Ok(match self.spectrum(index)?.data {
            SpectrumData::Events(list) => list.generate_histogram(self.x.get(index)),
            SpectrumData::Histogram { y, e } => (y.to_vec(), e.to_vec()),
        })
    }

    /// Replaces every event list with its histogram on the current X.
    ///
    /// One-way. Histogram collections are left unchanged. If some spectra
    /// fail, the collection is still converted with those spectra zeroed and
    /// the aggregated error is returned.
    ///
    /// # Errors
    /// Propagates [`ParallelSpectrumDriver::for_each_mut`] errors.
    pub fn convert_to_histogram(&mut self, driver: &ParallelSpectrumDriver) -> Result<()> {
        let SpectrumStorage::Events(lists) = &self.storage else {
            return Ok(());
        };
        let x = &self.x;
        let mut slots: Vec<(Vec<f64>, Vec<f64>)> = (0..lists.len())
            .map(|index| {
                let n_bins = x.get(index).len().saturating_sub(1);
                (vec![0.0; n_bins], vec![0.0; n_bins])
            })
            .collect();
        let outcome = driver.for_each_mut(
            &mut slots,
            || (),
            |_, index, slot| {
                *slot = lists[index].generate_histogram(x.get(index));
                Ok(())
            },
        );
        if matches!(outcome, Err(Error::ConfigError(_))) {
            return outcome;
        }
        let (y, e) = slots.into_iter().unzip();
        self.storage = SpectrumStorage::Histogram { y, e };
        outcome
    }
}

fn strictly_increasing(x: &[f64]) -> bool {
    x.windows(2).all(|pair| pair[0] < pair[1])
}

fn invalid_edges(index: usize) -> Error {
    Error::InvalidBinning(format!("spectrum {index} has invalid bin edges"))
}
