//! Per-spectrum unit conversion strategy.
//!
//! The strategy ([`ConversionMode`]) is chosen once per source/target pair.
//! [`UnitsConversionHelper::update_conversion`] then folds one spectrum's
//! geometry into a [`SpectrumConversion`], after which
//! [`UnitsConversionHelper::convert_units`] is a pure function of the value.
#![allow(clippy::float_cmp)]

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::geometry::DetectorTable;
use crate::units::{just_above, EnergyMode, PreparedUnit, Unit};

/// How values are converted between two units.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ConversionMode {
    /// Source and target are the same unit.
    NoOp,
    /// `target = factor * source^power`, independent of geometry.
    Fast {
        /// Multiplicative constant.
        factor: f64,
        /// Exponent applied to the source value.
        power: f64,
    },
    /// Source is TOF; apply the target's TOF formula.
    FromTof,
    /// Source to TOF, then TOF to target.
    ViaTof,
}

impl ConversionMode {
    /// Selects the cheapest valid strategy.
    #[must_use]
    pub fn select(source: Unit, target: Unit, force_via_tof: bool) -> Self {
        if source == target {
            return Self::NoOp;
        }
        if !force_via_tof {
            if let Some((factor, power)) = source.quick_conversion(target) {
                return Self::Fast { factor, power };
            }
            if source == Unit::Tof {
                return Self::FromTof;
            }
        }
        Self::ViaTof
    }

    /// Returns true if the strategy needs per-spectrum geometry.
    #[must_use]
    pub fn needs_geometry(self) -> bool {
        matches!(self, Self::FromTof | Self::ViaTof)
    }
}

/// Energy and strategy settings for a conversion run.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionConfig {
    /// Energy-transfer mode.
    pub emode: EnergyMode,
    /// Run-level fixed energy (meV).
    pub efixed: Option<f64>,
    /// Skip the quick and direct paths and always go through TOF.
    pub force_via_tof: bool,
}

impl ConversionConfig {
    /// Sets the energy mode.
    #[must_use]
    pub fn with_emode(mut self, emode: EnergyMode) -> Self {
        self.emode = emode;
        self
    }

    /// Sets the fixed energy.
    #[must_use]
    pub fn with_efixed(mut self, efixed: f64) -> Self {
        self.efixed = Some(efixed);
        self
    }

    /// Forces conversion through TOF.
    #[must_use]
    pub fn with_force_via_tof(mut self, force: bool) -> Self {
        self.force_via_tof = force;
        self
    }
}

/// A conversion with one spectrum's geometry applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpectrumConversion {
    /// Identity.
    NoOp,
    /// Power law.
    Fast {
        /// Multiplicative constant.
        factor: f64,
        /// Exponent.
        power: f64,
    },
    /// TOF to target.
    FromTof {
        /// Prepared target unit.
        target: PreparedUnit,
    },
    /// Source to TOF to target.
    ViaTof {
        /// Prepared source unit.
        source: PreparedUnit,
        /// Prepared target unit.
        target: PreparedUnit,
    },
}

impl SpectrumConversion {
    /// Converts one value.
    #[inline]
    #[must_use]
    pub fn convert(&self, value: f64) -> f64 {
        match self {
            Self::NoOp => value,
            Self::Fast { factor, power } => {
                if *power == 1.0 {
                    factor * value
                } else {
                    factor * value.powf(*power)
                }
            }
            Self::FromTof { target } => target.from_tof(value),
            Self::ViaTof { source, target } => target.from_tof(source.to_tof(value)),
        }
    }

    /// Clamps `[x1, x2]` to the source interval where [`Self::convert`] is
    /// finite and real-valued. An interval entirely outside collapses onto the nearest
    /// valid bound.
    #[must_use]
    pub fn conversion_range(&self, x1: f64, x2: f64) -> (f64, f64) {
        let (lo, hi) = match self {
            Self::NoOp => (f64::NEG_INFINITY, f64::INFINITY),
            Self::Fast { power, .. } => {
                if *power < 0.0 {
                    (just_above(0.0), f64::INFINITY)
                } else if power.fract() == 0.0 {
                    (f64::NEG_INFINITY, f64::INFINITY)
                } else {
                    (0.0, f64::INFINITY)
                }
            }
            Self::FromTof { target } => target.tof_range(),
            Self::ViaTof { source, target } => {
                let (t_lo, t_hi) = target.tof_range();
                let (v_lo, v_hi) = source.value_range();
                let image = |tof: f64, fallback: f64| {
                    if tof.is_finite() {
                        source.from_tof(tof)
                    } else {
                        fallback
                    }
                };
                let (lo, hi) = if source.tof_increases() {
                    (image(t_lo, v_lo), image(t_hi, v_hi))
                } else {
                    (image(t_hi, v_lo), image(t_lo, v_hi))
                };
                (lo.max(v_lo), hi.min(v_hi))
            }
        };
        let (x1, x2) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        (x1.max(lo).min(hi), x2.max(lo).min(hi))
    }
}

/// Converts values between two units one spectrum at a time.
///
/// Each worker owns its own clone; the detector table is shared read-only.
#[derive(Debug, Clone)]
pub struct UnitsConversionHelper {
    source: Unit,
    target: Unit,
    mode: ConversionMode,
    config: ConversionConfig,
    table: Arc<DetectorTable>,
    current: Option<SpectrumConversion>,
}

impl UnitsConversionHelper {
    /// Selects the strategy for `source` → `target`.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if an energy-transfer unit is involved
    /// in an elastic run.
    pub fn new(
        source: Unit,
        target: Unit,
        config: ConversionConfig,
        table: Arc<DetectorTable>,
    ) -> Result<Self> {
        let mode = ConversionMode::select(source, target, config.force_via_tof);
        let inelastic_unit = source.requires_inelastic() || target.requires_inelastic();
        if mode.needs_geometry() && inelastic_unit && !config.emode.is_inelastic() {
            return Err(Error::ConfigError(format!(
                "converting {source} to {target} requires a direct or indirect energy mode"
            )));
        }
        let current = match mode {
            ConversionMode::NoOp => Some(SpectrumConversion::NoOp),
            ConversionMode::Fast { factor, power } => {
                Some(SpectrumConversion::Fast { factor, power })
            }
            ConversionMode::FromTof | ConversionMode::ViaTof => None,
        };
        log::debug!("unit conversion {source} -> {target} uses {mode:?}");
        Ok(Self {
            source,
            target,
            mode,
            config,
            table,
            current,
        })
    }

    /// Source unit.
    #[must_use]
    pub fn source(&self) -> Unit {
        self.source
    }

    /// Target unit.
    #[must_use]
    pub fn target(&self) -> Unit {
        self.target
    }

    /// Selected strategy.
    #[must_use]
    pub fn mode(&self) -> ConversionMode {
        self.mode
    }

    /// Builds the conversion for spectrum `index` without changing state.
    ///
    /// # Errors
    /// Returns geometry errors for the spectrum and configuration errors for
    /// missing fixed energies.
    pub fn spectrum_conversion(&self, index: usize) -> Result<SpectrumConversion> {
        match self.mode {
            ConversionMode::NoOp => Ok(SpectrumConversion::NoOp),
            ConversionMode::Fast { factor, power } => Ok(SpectrumConversion::Fast { factor, power }),
            ConversionMode::FromTof => {
                let context = self
                    .table
                    .context(index, self.config.emode, self.config.efixed)?;
                Ok(SpectrumConversion::FromTof {
                    target: self.target.prepare(&context)?,
                })
            }
            ConversionMode::ViaTof => {
                let context = self
                    .table
                    .context(index, self.config.emode, self.config.efixed)?;
                Ok(SpectrumConversion::ViaTof {
                    source: self.source.prepare(&context)?,
                    target: self.target.prepare(&context)?,
                })
            }
        }
    }

    /// Loads spectrum `index`'s geometry for subsequent conversions.
    ///
    /// # Errors
    /// Same as [`Self::spectrum_conversion`]. On error the previous context
    /// is discarded.
    pub fn update_conversion(&mut self, index: usize) -> Result<()> {
        if !self.mode.needs_geometry() {
            return Ok(());
        }
        self.current = None;
        self.current = Some(self.spectrum_conversion(index)?);
        Ok(())
    }

    /// The conversion currently loaded, if any.
    #[must_use]
    pub fn current(&self) -> Option<&SpectrumConversion> {
        self.current.as_ref()
    }

    /// Converts one value using the loaded spectrum context.
    ///
    /// Returns NaN if no spectrum has been loaded for a geometry-dependent
    /// strategy.
    #[must_use]
    pub fn convert_units(&self, value: f64) -> f64 {
        debug_assert!(
            self.current.is_some(),
            "update_conversion must be called before convert_units"
        );
        self.current
            .as_ref()
            .map_or(f64::NAN, |conversion| conversion.convert(value))
    }

    /// Clamps `[x1, x2]` to the interval the loaded conversion can handle.
    #[must_use]
    pub fn get_conversion_range(&self, x1: f64, x2: f64) -> (f64, f64) {
        match &self.current {
            Some(conversion) => conversion.conversion_range(x1, x2),
            None => (x1.min(x2), x1.max(x2)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SpectrumGeometry;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn table() -> Arc<DetectorTable> {
        Arc::new(DetectorTable::from_entries(
            10.0,
            vec![
                SpectrumGeometry {
                    l2: 2.0,
                    two_theta: PI / 2.0,
                    solid_angle: 0.0,
                    efixed: None,
                    calibration: None,
                },
                SpectrumGeometry {
                    l2: 3.0,
                    two_theta: PI / 3.0,
                    solid_angle: 0.0,
                    efixed: Some(3.5),
                    calibration: None,
                },
            ],
        ))
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(
            ConversionMode::select(Unit::Tof, Unit::Tof, true),
            ConversionMode::NoOp
        );
        assert_eq!(
            ConversionMode::select(Unit::Tof, Unit::DSpacing, false),
            ConversionMode::FromTof
        );
        assert_eq!(
            ConversionMode::select(Unit::Tof, Unit::DSpacing, true),
            ConversionMode::ViaTof
        );
        assert!(matches!(
            ConversionMode::select(Unit::Wavelength, Unit::Energy, false),
            ConversionMode::Fast { power, .. } if power == -2.0
        ));
        assert_eq!(
            ConversionMode::select(Unit::Wavelength, Unit::Energy, true),
            ConversionMode::ViaTof
        );
        assert_eq!(
            ConversionMode::select(Unit::Wavelength, Unit::DSpacing, false),
            ConversionMode::ViaTof
        );
    }

    #[test]
    fn test_from_tof_matches_forced_via_tof() {
        let config = ConversionConfig::default();
        let mut direct =
            UnitsConversionHelper::new(Unit::Tof, Unit::DSpacing, config, table()).unwrap();
        let mut forced = UnitsConversionHelper::new(
            Unit::Tof,
            Unit::DSpacing,
            config.with_force_via_tof(true),
            table(),
        )
        .unwrap();
        assert_eq!(direct.mode(), ConversionMode::FromTof);
        assert_eq!(forced.mode(), ConversionMode::ViaTof);
        direct.update_conversion(0).unwrap();
        forced.update_conversion(0).unwrap();
        let a = direct.convert_units(1000.0);
        let b = forced.convert_units(1000.0);
        assert_relative_eq!(a, b, max_relative = 1e-9);
        // d = λ / (2 sin 45°), λ = 0.0039560 * 1000 / 12
        assert_relative_eq!(a, 0.329_67 / 2.0_f64.sqrt(), max_relative = 1e-4);
    }

    #[test]
    fn test_via_tof_round_trip() {
        let config = ConversionConfig::default();
        let pairs = [
            (Unit::Wavelength, Unit::DSpacing),
            (Unit::Energy, Unit::MomentumTransfer),
            (Unit::DSpacing, Unit::Tof),
        ];
        for (a, b) in pairs {
            let mut forward = UnitsConversionHelper::new(
                a,
                b,
                config.with_force_via_tof(true),
                table(),
            )
            .unwrap();
            let mut back =
                UnitsConversionHelper::new(b, a, config.with_force_via_tof(true), table())
                    .unwrap();
            forward.update_conversion(1).unwrap();
            back.update_conversion(1).unwrap();
            for value in [0.5, 1.0, 2.5, 7.0] {
                let there = forward.convert_units(value);
                assert_relative_eq!(back.convert_units(there), value, max_relative = 1e-10);
            }
        }
    }

    #[test]
    fn test_fast_mode_needs_no_geometry() {
        let empty = Arc::new(DetectorTable::from_entries(10.0, Vec::new()));
        let mut helper = UnitsConversionHelper::new(
            Unit::Wavelength,
            Unit::Energy,
            ConversionConfig::default(),
            empty,
        )
        .unwrap();
        helper.update_conversion(42).unwrap();
        assert_relative_eq!(
            helper.convert_units(1.0),
            crate::units::ENERGY_WAVELENGTH,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_missing_spectrum_is_reported() {
        let mut helper = UnitsConversionHelper::new(
            Unit::Tof,
            Unit::Wavelength,
            ConversionConfig::default(),
            table(),
        )
        .unwrap();
        assert!(matches!(
            helper.update_conversion(5),
            Err(Error::IndexOutOfRange { index: 5, len: 2 })
        ));
        assert!(helper.current().is_none());
    }

    #[test]
    fn test_delta_e_requires_inelastic_mode() {
        let err = UnitsConversionHelper::new(
            Unit::Tof,
            Unit::DeltaE,
            ConversionConfig::default(),
            table(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }

    #[test]
    fn test_indirect_uses_detector_efixed() {
        let config = ConversionConfig::default().with_emode(EnergyMode::Indirect);
        let mut helper =
            UnitsConversionHelper::new(Unit::Tof, Unit::DeltaE, config, table()).unwrap();
        assert!(helper.update_conversion(0).is_err());
        helper.update_conversion(1).unwrap();
        let elastic_tof =
            crate::units::flight_time(10.0, 3.5) + crate::units::flight_time(3.0, 3.5);
        assert!(helper.convert_units(elastic_tof).abs() < 1e-9);
    }

    #[test]
    fn test_conversion_range_is_clamped() {
        let mut helper = UnitsConversionHelper::new(
            Unit::Wavelength,
            Unit::DSpacing,
            ConversionConfig::default(),
            table(),
        )
        .unwrap();
        helper.update_conversion(0).unwrap();
        let (lo, hi) = helper.get_conversion_range(-5.0, 10.0);
        assert_eq!((lo, hi), (0.0, 10.0));
        assert!(!helper.convert_units(lo).is_nan());

        let config = ConversionConfig::default()
            .with_emode(EnergyMode::Direct)
            .with_efixed(50.0);
        let mut delta_e =
            UnitsConversionHelper::new(Unit::Tof, Unit::DeltaE, config, table()).unwrap();
        delta_e.update_conversion(0).unwrap();
        let t1 = crate::units::flight_time(10.0, 50.0);
        let (lo, hi) = delta_e.get_conversion_range(0.0, 20_000.0);
        assert!(lo > t1);
        assert_relative_eq!(lo, t1, max_relative = 1e-9);
        assert!(delta_e.convert_units(lo).is_finite());
        assert_eq!(hi, 20_000.0);
    }

    #[test]
    fn test_fast_negative_power_excludes_zero() {
        let mode = SpectrumConversion::Fast {
            factor: 81.8,
            power: -2.0,
        };
        let (lo, hi) = mode.conversion_range(0.0, 1.0);
        assert!(lo > 0.0);
        assert_eq!(hi, 1.0);
        assert!(mode.convert(lo).is_finite());
        let squared = SpectrumConversion::Fast {
            factor: 1.0,
            power: 2.0,
        };
        assert_eq!(squared.conversion_range(-3.0, 1.0), (-3.0, 1.0));
    }

    #[test]
    fn test_quadratic_calibration_limits_range() {
        let calibrated = Arc::new(DetectorTable::from_entries(
            10.0,
            vec![SpectrumGeometry {
                l2: 2.0,
                two_theta: PI / 2.0,
                solid_angle: 0.0,
                efixed: None,
                calibration: Some((-2.0, 5000.0, 3.0)),
            }],
        ));
        let mut helper = UnitsConversionHelper::new(
            Unit::Tof,
            Unit::DSpacing,
            ConversionConfig::default(),
            calibrated,
        )
        .unwrap();
        helper.update_conversion(0).unwrap();
        let (lo, hi) = helper.get_conversion_range(0.0, 1e9);
        assert_eq!(lo, 3.0);
        assert_relative_eq!(hi, 3_125_003.0);
        assert!(helper.convert_units(hi).is_finite());
    }
}
