//! Instrument geometry service and the per-spectrum detector table.
//!
//! Geometry lookups are treated as an opaque, side-effect-free service. A
//! [`DetectorTable`] resolves every spectrum once before a conversion run so
//! that workers only read plain numbers.
#![allow(clippy::cast_precision_loss)]

use std::collections::{BTreeSet, HashMap};
use std::f64::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::units::{ConversionContext, EnergyMode};

/// Physical detector pixel identifier.
pub type DetectorId = i32;

/// Geometry of one detector pixel as reported by the instrument service.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DetectorGeometry {
    /// Sample-to-detector distance (m).
    pub l2: f64,
    /// Scattering angle (radians).
    pub two_theta: f64,
    /// Solid angle subtended at the sample (sr).
    pub solid_angle: f64,
    /// Analyser energy for indirect geometries (meV).
    pub efixed: Option<f64>,
    /// Calibrated diffractometer constants `(difa, difc, tzero)`.
    pub calibration: Option<(f64, f64, f64)>,
}

impl DetectorGeometry {
    /// Creates an uncalibrated detector.
    #[must_use]
    pub fn new(l2: f64, two_theta: f64) -> Self {
        Self {
            l2,
            two_theta,
            solid_angle: 0.0,
            efixed: None,
            calibration: None,
        }
    }

    /// Sets the solid angle.
    #[must_use]
    pub fn with_solid_angle(mut self, solid_angle: f64) -> Self {
        self.solid_angle = solid_angle;
        self
    }

    /// Sets the detector's fixed energy.
    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.efixed = Some(efixed);
        self
    }

    /// Sets calibrated diffractometer constants.
    #[must_use]
    pub fn with_calibration(mut self, difa: f64, difc: f64, tzero: f64) -> Self {
        self.calibration = Some((difa, difc, tzero));
        self
    }
}

/// Read-only geometry lookup consumed by unit conversion.
pub trait InstrumentGeometry: Send + Sync {
    /// Returns the instrument name.
    fn name(&self) -> &str;

    /// Returns the source-to-sample distance (m).
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if the instrument has no source or sample.
    fn l1(&self) -> Result<f64>;

    /// Looks up one detector.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] if the detector is unknown.
    fn detector(&self, id: DetectorId) -> Result<DetectorGeometry>;
}

/// In-memory instrument: a primary flight path plus a detector map.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimpleInstrument {
    name: String,
    l1: f64,
    detectors: HashMap<DetectorId, DetectorGeometry>,
}

impl SimpleInstrument {
    /// Creates an instrument with no detectors.
    #[must_use]
    pub fn new(name: impl Into<String>, l1: f64) -> Self {
        Self {
            name: name.into(),
            l1,
            detectors: HashMap::new(),
        }
    }

    /// Adds a detector.
    #[must_use]
    pub fn with_detector(mut self, id: DetectorId, detector: DetectorGeometry) -> Self {
        self.detectors.insert(id, detector);
        self
    }

    /// Adds an uncalibrated detector with the scattering angle in degrees.
    #[must_use]
    pub fn with_detector_degrees(self, id: DetectorId, l2: f64, two_theta_deg: f64) -> Self {
        self.with_detector(id, DetectorGeometry::new(l2, two_theta_deg * PI / 180.0))
    }

    /// Number of detectors.
    #[must_use]
    pub fn detector_count(&self) -> usize {
        self.detectors.len()
    }
}

impl InstrumentGeometry for SimpleInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn l1(&self) -> Result<f64> {
        if self.l1 > 0.0 && self.l1.is_finite() {
            Ok(self.l1)
        } else {
            Err(Error::Geometry(format!(
                "instrument '{}' has no valid source-sample distance",
                self.name
            )))
        }
    }

    fn detector(&self, id: DetectorId) -> Result<DetectorGeometry> {
        self.detectors
            .get(&id)
            .copied()
            .ok_or_else(|| Error::Geometry(format!("detector {id} not found")))
    }
}

/// Geometry of one spectrum, averaged over its detector group.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SpectrumGeometry {
    /// Mean sample-to-detector distance (m).
    pub l2: f64,
    /// Mean scattering angle (radians).
    pub two_theta: f64,
    /// Total solid angle (sr).
    pub solid_angle: f64,
    /// Mean detector fixed energy, if every detector has one.
    pub efixed: Option<f64>,
    /// Calibration of a single-detector spectrum.
    pub calibration: Option<(f64, f64, f64)>,
}

impl SpectrumGeometry {
    fn from_group(detectors: &[DetectorGeometry]) -> Self {
        let n = detectors.len() as f64;
        let mean = |f: fn(&DetectorGeometry) -> f64| detectors.iter().map(f).sum::<f64>() / n;
        let efixed = detectors
            .iter()
            .map(|d| d.efixed)
            .collect::<Option<Vec<_>>>()
            .map(|values| values.iter().sum::<f64>() / n);
        let calibration = match detectors {
            [single] => single.calibration,
            _ => None,
        };
        Self {
            l2: mean(|d| d.l2),
            two_theta: mean(|d| d.two_theta),
            solid_angle: detectors.iter().map(|d| d.solid_angle).sum(),
            efixed,
            calibration,
        }
    }
}

/// Per-spectrum geometry resolved once before a conversion run.
///
/// A failed lookup is stored in place of its entry and reported when that
/// spectrum is converted; other spectra still proceed.
#[derive(Debug, Clone)]
pub struct DetectorTable {
    l1: f64,
    entries: Vec<std::result::Result<SpectrumGeometry, Error>>,
}

impl DetectorTable {
    /// Resolves geometry for each spectrum's detector group.
    ///
    /// # Errors
    /// Fails only if the instrument has no valid L1; per-spectrum failures
    /// are stored and surface from [`Self::entry`].
    pub fn build<'a, I>(instrument: &dyn InstrumentGeometry, spectra: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a BTreeSet<DetectorId>>,
    {
        let l1 = instrument.l1()?;
        let entries = spectra
            .into_iter()
            .map(|ids| {
                if ids.is_empty() {
                    return Err(Error::Geometry("spectrum has no detectors".into()));
                }
                let detectors = ids
                    .iter()
                    .map(|&id| instrument.detector(id))
                    .collect::<Result<Vec<_>>>()?;
                Ok(SpectrumGeometry::from_group(&detectors))
            })
            .collect();
        Ok(Self { l1, entries })
    }

    /// Builds a table from already-resolved entries.
    #[must_use]
    pub fn from_entries(l1: f64, entries: Vec<SpectrumGeometry>) -> Self {
        Self {
            l1,
            entries: entries.into_iter().map(Ok).collect(),
        }
    }

    /// Source-to-sample distance.
    #[must_use]
    pub fn l1(&self) -> f64 {
        self.l1
    }

    /// Number of spectra in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no spectra.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Geometry for one spectrum.
    ///
    /// # Errors
    /// Returns [`Error::IndexOutOfRange`] or the stored lookup failure.
    pub fn entry(&self, index: usize) -> Result<&SpectrumGeometry> {
        match self.entries.get(index) {
            Some(Ok(entry)) => Ok(entry),
            Some(Err(err)) => Err(err.clone()),
            None => Err(Error::IndexOutOfRange {
                index,
                len: self.entries.len(),
            }),
        }
    }

    /// Conversion context for one spectrum.
    ///
    /// Direct geometry prefers the run's incident energy; indirect geometry
    /// prefers the detector's analyser energy.
    ///
    /// # Errors
    /// Same as [`Self::entry`].
    pub fn context(
        &self,
        index: usize,
        emode: EnergyMode,
        efixed: Option<f64>,
    ) -> Result<ConversionContext> {
        let entry = self.entry(index)?;
        let efixed = match emode {
            EnergyMode::Elastic => None,
            EnergyMode::Direct => efixed.or(entry.efixed),
            EnergyMode::Indirect => entry.efixed.or(efixed),
        };
        let mut context =
            ConversionContext::new(self.l1, entry.l2, entry.two_theta).with_energy(emode, efixed);
        if let Some((difa, difc, tzero)) = entry.calibration {
            context = context.with_diffractometer_constants(difa, difc, tzero);
        }
        Ok(context)
    }
}
