//! Physical units derivable from time-of-flight.
//!
//! Every unit knows how to convert to and from TOF (microseconds) given a
//! [`ConversionContext`]. [`Unit::prepare`] folds the context into a
//! [`PreparedUnit`] once per spectrum so that per-value conversion is a few
//! arithmetic operations.
#![allow(clippy::float_cmp)]

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Planck constant (J s).
pub const PLANCK: f64 = 6.626_068_96e-34;
/// Neutron mass (kg).
pub const NEUTRON_MASS: f64 = 1.674_927_211e-27;
/// One milli-electron-volt (J).
pub const MEV: f64 = 1.602_176_487e-22;
/// Energy conversion from meV to cm⁻¹.
pub const MEV_TO_WAVENUMBER: f64 = 8.065_544_65;
/// `E[meV] = ENERGY_WAVELENGTH / λ[Å]²` (about 81.8042).
pub const ENERGY_WAVELENGTH: f64 = PLANCK * PLANCK / (2.0 * NEUTRON_MASS * MEV) * 1e20;
/// `λ[Å] = TOF_TO_WAVELENGTH · t[µs] / L[m]`.
pub const TOF_TO_WAVELENGTH: f64 = PLANCK / NEUTRON_MASS * 1e4;
/// `DIFC[µs/Å] = TOF_TO_DSPACING · L[m] · sin θ`.
pub const TOF_TO_DSPACING: f64 = 2.0 * NEUTRON_MASS / PLANCK * 1e-4;

/// Kinetic energy factor `½ m L² / meV` for `L = 1 m` and `t` in µs.
const ENERGY_TOF_FACTOR: f64 = 0.5 * NEUTRON_MASS / MEV * 1e12;

/// Relative gap kept between a range bound and a pole of the formula.
const SINGULAR_MARGIN: f64 = 1e-12;

/// Smallest bound treated as strictly above the pole at `x`.
pub(crate) fn just_above(x: f64) -> f64 {
    x + x.abs().max(1.0) * SINGULAR_MARGIN
}

/// Largest bound treated as strictly below the pole at `x`.
pub(crate) fn just_below(x: f64) -> f64 {
    x - x.abs().max(1.0) * SINGULAR_MARGIN
}

/// Energy-transfer geometry of the instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnergyMode {
    /// No energy transfer.
    #[default]
    Elastic,
    /// Fixed incident energy.
    Direct,
    /// Fixed final energy.
    Indirect,
}

impl EnergyMode {
    /// Returns true for direct and indirect geometries.
    #[must_use]
    pub fn is_inelastic(self) -> bool {
        self != Self::Elastic
    }
}

impl FromStr for EnergyMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Elastic" | "elastic" | "0" => Ok(Self::Elastic),
            "Direct" | "direct" | "1" => Ok(Self::Direct),
            "Indirect" | "indirect" | "2" => Ok(Self::Indirect),
            other => Err(Error::ConfigError(format!("unknown energy mode '{other}'"))),
        }
    }
}

impl fmt::Display for EnergyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Elastic => "Elastic",
            Self::Direct => "Direct",
            Self::Indirect => "Indirect",
        })
    }
}

/// Geometry and energy parameters for converting one spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConversionContext {
    /// Source-to-sample distance (m).
    pub l1: f64,
    /// Sample-to-detector distance (m).
    pub l2: f64,
    /// Scattering angle (radians).
    pub two_theta: f64,
    /// Energy-transfer mode.
    pub emode: EnergyMode,
    /// Fixed incident (direct) or final (indirect) energy in meV.
    pub efixed: Option<f64>,
    /// Quadratic diffractometer constant (µs/Å²).
    pub difa: f64,
    /// Calibrated linear diffractometer constant (µs/Å); derived from geometry if unset.
    pub difc: Option<f64>,
    /// Diffractometer TOF offset (µs).
    pub tzero: f64,
}

impl ConversionContext {
    /// Creates an elastic context from flight paths and scattering angle.
    #[must_use]
    pub fn new(l1: f64, l2: f64, two_theta: f64) -> Self {
        Self {
            l1,
            l2,
            two_theta,
            emode: EnergyMode::Elastic,
            efixed: None,
            difa: 0.0,
            difc: None,
            tzero: 0.0,
        }
    }

    /// Sets the energy mode and fixed energy.
    #[must_use]
    pub fn with_energy(mut self, emode: EnergyMode, efixed: Option<f64>) -> Self {
        self.emode = emode;
        self.efixed = efixed;
        self
    }

    /// Sets calibrated diffractometer constants.
    #[must_use]
    pub fn with_diffractometer_constants(mut self, difa: f64, difc: f64, tzero: f64) -> Self {
        self.difa = difa;
        self.difc = Some(difc);
        self.tzero = tzero;
        self
    }

    fn fixed_energy(&self) -> Result<f64> {
        match self.efixed {
            Some(efixed) if efixed > 0.0 && efixed.is_finite() => Ok(efixed),
            Some(efixed) => Err(Error::ConfigError(format!(
                "fixed energy must be positive, got {efixed}"
            ))),
            None => Err(Error::ConfigError(format!(
                "{} conversion requires a fixed energy",
                self.emode
            ))),
        }
    }

    /// Flight path and TOF offset seen by the neutron whose energy is not fixed.
    fn scattered_path(&self) -> Result<(f64, f64)> {
        let (path, offset) = match self.emode {
            EnergyMode::Elastic => (self.l1 + self.l2, 0.0),
            EnergyMode::Direct => (self.l2, flight_time(self.l1, self.fixed_energy()?)),
            EnergyMode::Indirect => (self.l1, flight_time(self.l2, self.fixed_energy()?)),
        };
        if !(path > 0.0) || !path.is_finite() {
            return Err(Error::Geometry(format!("invalid flight path length {path}")));
        }
        Ok((path, offset))
    }

    fn sin_theta(&self) -> Result<f64> {
        let sin_theta = (0.5 * self.two_theta).sin();
        if sin_theta == 0.0 || !sin_theta.is_finite() {
            return Err(Error::Geometry(format!(
                "scattering angle {} rad gives no momentum transfer",
                self.two_theta
            )));
        }
        Ok(sin_theta)
    }
}

/// Time in µs for a neutron of `energy` meV to travel `path` metres.
#[must_use]
pub fn flight_time(path: f64, energy: f64) -> f64 {
    path * (ENERGY_TOF_FACTOR / energy).sqrt()
}

/// A physical unit that can be converted through time-of-flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Unit {
    /// Time-of-flight (µs).
    Tof,
    /// Neutron wavelength (Å).
    Wavelength,
    /// Neutron kinetic energy (meV).
    Energy,
    /// Neutron kinetic energy (cm⁻¹).
    EnergyInWavenumber,
    /// Interplanar spacing (Å).
    DSpacing,
    /// Elastic momentum transfer Q (Å⁻¹).
    MomentumTransfer,
    /// Q² (Å⁻²).
    QSquared,
    /// Neutron wavevector k (Å⁻¹).
    Momentum,
    /// Energy transfer (meV).
    DeltaE,
    /// Energy transfer (cm⁻¹).
    DeltaEInWavenumber,
}

impl Unit {
    /// Every supported unit.
    pub const ALL: [Unit; 10] = [
        Unit::Tof,
        Unit::Wavelength,
        Unit::Energy,
        Unit::EnergyInWavenumber,
        Unit::DSpacing,
        Unit::MomentumTransfer,
        Unit::QSquared,
        Unit::Momentum,
        Unit::DeltaE,
        Unit::DeltaEInWavenumber,
    ];

    /// Returns the unit's registered name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Tof => "TOF",
            Self::Wavelength => "Wavelength",
            Self::Energy => "Energy",
            Self::EnergyInWavenumber => "Energy_inWavenumber",
            Self::DSpacing => "dSpacing",
            Self::MomentumTransfer => "MomentumTransfer",
            Self::QSquared => "QSquared",
            Self::Momentum => "Momentum",
            Self::DeltaE => "DeltaE",
            Self::DeltaEInWavenumber => "DeltaE_inWavenumber",
        }
    }

    /// Returns the unit label, e.g. `microsecond`.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Tof => "microsecond",
            Self::Wavelength | Self::DSpacing => "Angstrom",
            Self::Energy | Self::DeltaE => "meV",
            Self::EnergyInWavenumber | Self::DeltaEInWavenumber => "cm^-1",
            Self::MomentumTransfer | Self::Momentum => "Angstrom^-1",
            Self::QSquared => "Angstrom^-2",
        }
    }

    /// Returns true if the unit needs an inelastic energy mode.
    #[must_use]
    pub fn requires_inelastic(self) -> bool {
        matches!(self, Self::DeltaE | Self::DeltaEInWavenumber)
    }

    /// Returns `(factor, power)` if `target = factor · self^power` holds
    /// independently of geometry.
    #[must_use]
    pub fn quick_conversion(self, target: Unit) -> Option<(f64, f64)> {
        use Unit::{
            DSpacing, DeltaE, DeltaEInWavenumber, Energy, EnergyInWavenumber, Momentum,
            MomentumTransfer, QSquared, Wavelength,
        };
        let two_pi = 2.0 * PI;
        let conversion = match (self, target) {
            (Energy, Wavelength) => (ENERGY_WAVELENGTH.sqrt(), -0.5),
            (Wavelength, Energy) => (ENERGY_WAVELENGTH, -2.0),
            (Energy, EnergyInWavenumber) | (DeltaE, DeltaEInWavenumber) => {
                (MEV_TO_WAVENUMBER, 1.0)
            }
            (EnergyInWavenumber, Energy) | (DeltaEInWavenumber, DeltaE) => {
                (1.0 / MEV_TO_WAVENUMBER, 1.0)
            }
            (Wavelength, EnergyInWavenumber) => (ENERGY_WAVELENGTH * MEV_TO_WAVENUMBER, -2.0),
            (EnergyInWavenumber, Wavelength) => {
                ((ENERGY_WAVELENGTH * MEV_TO_WAVENUMBER).sqrt(), -0.5)
            }
            (Energy, Momentum) => (two_pi / ENERGY_WAVELENGTH.sqrt(), 0.5),
            (Momentum, Energy) => (ENERGY_WAVELENGTH / (two_pi * two_pi), 2.0),
            (DSpacing, MomentumTransfer)
            | (MomentumTransfer, DSpacing)
            | (Wavelength, Momentum)
            | (Momentum, Wavelength) => (two_pi, -1.0),
            (DSpacing, QSquared) => (two_pi * two_pi, -2.0),
            (QSquared, DSpacing) => (two_pi, -0.5),
            (MomentumTransfer, QSquared) => (1.0, 2.0),
            (QSquared, MomentumTransfer) => (1.0, 0.5),
            _ => return None,
        };
        Some(conversion)
    }

    /// Folds a spectrum's context into a ready-to-use conversion.
    ///
    /// # Errors
    /// Returns [`Error::Geometry`] for degenerate geometry (zero flight path,
    /// zero scattering angle for Q or d-spacing) and [`Error::ConfigError`]
    /// if an inelastic unit lacks an energy mode or fixed energy.
    pub fn prepare(self, context: &ConversionContext) -> Result<PreparedUnit> {
        let formula = match self {
            Self::Tof => Formula::Identity,
            Self::Wavelength => {
                let (path, offset) = context.scattered_path()?;
                Formula::Linear {
                    factor: TOF_TO_WAVELENGTH / path,
                    offset,
                }
            }
            Self::Momentum => {
                let (path, offset) = context.scattered_path()?;
                Formula::Reciprocal {
                    factor: 2.0 * PI * path / TOF_TO_WAVELENGTH,
                    offset,
                }
            }
            Self::MomentumTransfer | Self::QSquared => {
                let (path, offset) = context.scattered_path()?;
                let factor = 4.0 * PI * context.sin_theta()? * path / TOF_TO_WAVELENGTH;
                if self == Self::QSquared {
                    Formula::InverseSquare {
                        factor: factor * factor,
                        offset,
                    }
                } else {
                    Formula::Reciprocal { factor, offset }
                }
            }
            Self::Energy | Self::EnergyInWavenumber => {
                let path = context.l1 + context.l2;
                if !(path > 0.0) || !path.is_finite() {
                    return Err(Error::Geometry(format!("invalid flight path length {path}")));
                }
                let scale = if self == Self::Energy {
                    1.0
                } else {
                    MEV_TO_WAVENUMBER
                };
                Formula::InverseSquare {
                    factor: ENERGY_TOF_FACTOR * path * path * scale,
                    offset: 0.0,
                }
            }
            Self::DSpacing => {
                let difc = match context.difc {
                    Some(difc) => difc,
                    None => TOF_TO_DSPACING * (context.l1 + context.l2) * context.sin_theta()?,
                };
                if !(difc > 0.0) || !difc.is_finite() {
                    return Err(Error::Geometry(format!("DIFC must be positive, got {difc}")));
                }
                Formula::Diffractometer {
                    difa: context.difa,
                    difc,
                    tzero: context.tzero,
                }
            }
            Self::DeltaE | Self::DeltaEInWavenumber => {
                let scale = if self == Self::DeltaE {
                    1.0
                } else {
                    MEV_TO_WAVENUMBER
                };
                if !context.emode.is_inelastic() {
                    return Err(Error::ConfigError(format!(
                        "{} requires a direct or indirect energy mode",
                        self.name()
                    )));
                }
                let efixed = context.fixed_energy()?;
                match context.emode {
                    EnergyMode::Elastic | EnergyMode::Direct => Formula::DirectTransfer {
                        incident: efixed,
                        fixed_time: flight_time(context.l1, efixed),
                        factor: ENERGY_TOF_FACTOR * context.l2 * context.l2,
                        scale,
                    },
                    EnergyMode::Indirect => Formula::IndirectTransfer {
                        final_energy: efixed,
                        fixed_time: flight_time(context.l2, efixed),
                        factor: ENERGY_TOF_FACTOR * context.l1 * context.l1,
                        scale,
                    },
                }
            }
        };
        Ok(PreparedUnit {
            unit: self,
            formula,
        })
    }
}

impl FromStr for Unit {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Unit::ALL
            .into_iter()
            .find(|unit| unit.name() == s)
            .ok_or_else(|| Error::UnknownUnit(s.to_string()))
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Formula {
    Identity,
    /// `x = factor · (t − offset)`
    Linear { factor: f64, offset: f64 },
    /// `x = factor / (t − offset)`
    Reciprocal { factor: f64, offset: f64 },
    /// `x = factor / (t − offset)²`
    InverseSquare { factor: f64, offset: f64 },
    /// `t = difa·d² + difc·d + tzero`
    Diffractometer { difa: f64, difc: f64, tzero: f64 },
    /// `x = scale · (Ei − factor / (t − t1)²)`
    DirectTransfer {
        incident: f64,
        fixed_time: f64,
        factor: f64,
        scale: f64,
    },
    /// `x = scale · (factor / (t − t2)² − Ef)`
    IndirectTransfer {
        final_energy: f64,
        fixed_time: f64,
        factor: f64,
        scale: f64,
    },
}

/// A unit with one spectrum's geometry folded in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreparedUnit {
    unit: Unit,
    formula: Formula,
}

impl PreparedUnit {
    /// Returns the unit.
    #[must_use]
    pub fn unit(&self) -> Unit {
        self.unit
    }

    /// Converts a TOF value to this unit.
    #[must_use]
    pub fn from_tof(&self, tof: f64) -> f64 {
        match self.formula {
            Formula::Identity => tof,
            Formula::Linear { factor, offset } => factor * (tof - offset),
            Formula::Reciprocal { factor, offset } => factor / (tof - offset),
            Formula::InverseSquare { factor, offset } => {
                let dt = tof - offset;
                factor / (dt * dt)
            }
            Formula::Diffractometer { difa, difc, tzero } => {
                let dt = tof - tzero;
                if difa == 0.0 {
                    dt / difc
                } else if dt.is_infinite() {
                    if difa > 0.0 {
                        f64::INFINITY
                    } else {
                        f64::NAN
                    }
                } else {
                    2.0 * dt / (difc + (difc * difc + 4.0 * difa * dt).sqrt())
                }
            }
            Formula::DirectTransfer {
                incident,
                fixed_time,
                factor,
                scale,
            } => {
                let dt = tof - fixed_time;
                scale * (incident - factor / (dt * dt))
            }
            Formula::IndirectTransfer {
                final_energy,
                fixed_time,
                factor,
                scale,
            } => {
                let dt = tof - fixed_time;
                scale * (factor / (dt * dt) - final_energy)
            }
        }
    }

    /// Converts a value in this unit to TOF.
    #[must_use]
    pub fn to_tof(&self, value: f64) -> f64 {
        match self.formula {
            Formula::Identity => value,
            Formula::Linear { factor, offset } => value / factor + offset,
            Formula::Reciprocal { factor, offset } => factor / value + offset,
            Formula::InverseSquare { factor, offset } => offset + (factor / value).sqrt(),
            Formula::Diffractometer { difa, difc, tzero } => {
                difa * value * value + difc * value + tzero
            }
            Formula::DirectTransfer {
                incident,
                fixed_time,
                factor,
                scale,
            } => {
                let final_energy = incident - value / scale;
                fixed_time + (factor / final_energy).sqrt()
            }
            Formula::IndirectTransfer {
                final_energy,
                fixed_time,
                factor,
                scale,
            } => {
                let incident = value / scale + final_energy;
                fixed_time + (factor / incident).sqrt()
            }
        }
    }

    /// Returns true if [`Self::to_tof`] increases with the value.
    #[must_use]
    pub fn tof_increases(&self) -> bool {
        match self.formula {
            Formula::Identity
            | Formula::Diffractometer { .. }
            | Formula::DirectTransfer { .. } => true,
            Formula::Linear { factor, .. } => factor > 0.0,
            Formula::Reciprocal { .. }
            | Formula::InverseSquare { .. }
            | Formula::IndirectTransfer { .. } => false,
        }
    }

    /// TOF interval over which [`Self::from_tof`] is finite and real-valued.
    ///
    /// Bounds at a pole of the formula sit just inside it, so clamping to
    /// this range never produces an infinite value.
    #[must_use]
    pub fn tof_range(&self) -> (f64, f64) {
        match self.formula {
            Formula::Identity => (f64::NEG_INFINITY, f64::INFINITY),
            Formula::Linear { offset, .. } => (offset, f64::INFINITY),
            Formula::Reciprocal { offset, .. } | Formula::InverseSquare { offset, .. } => {
                (just_above(offset), f64::INFINITY)
            }
            Formula::Diffractometer { difa, difc, tzero } => {
                if difa < 0.0 {
                    (tzero, tzero - difc * difc / (4.0 * difa))
                } else {
                    (tzero, f64::INFINITY)
                }
            }
            Formula::DirectTransfer { fixed_time, .. }
            | Formula::IndirectTransfer { fixed_time, .. } => {
                (just_above(fixed_time), f64::INFINITY)
            }
        }
    }

    /// Value interval over which [`Self::to_tof`] is finite and real-valued.
    #[must_use]
    pub fn value_range(&self) -> (f64, f64) {
        match self.formula {
            Formula::Identity => (f64::NEG_INFINITY, f64::INFINITY),
            Formula::Linear { .. } => (0.0, f64::INFINITY),
            Formula::Reciprocal { .. } | Formula::InverseSquare { .. } => {
                (just_above(0.0), f64::INFINITY)
            }
            Formula::Diffractometer { difa, difc, .. } => {
                if difa < 0.0 {
                    (0.0, -difc / (2.0 * difa))
                } else {
                    (0.0, f64::INFINITY)
                }
            }
            Formula::DirectTransfer {
                incident, scale, ..
            } => (f64::NEG_INFINITY, just_below(scale * incident)),
            Formula::IndirectTransfer {
                final_energy,
                scale,
                ..
            } => (just_above(-scale * final_energy), f64::INFINITY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn context() -> ConversionContext {
        ConversionContext::new(10.0, 2.0, PI / 2.0)
    }

    #[test]
    fn test_unit_names_round_trip() {
        for unit in Unit::ALL {
            assert_eq!(unit.name().parse::<Unit>().unwrap(), unit);
        }
        assert_eq!(
            "Furlong".parse::<Unit>().unwrap_err(),
            Error::UnknownUnit("Furlong".into())
        );
    }

    #[test]
    fn test_energy_wavelength_constant() {
        assert_relative_eq!(ENERGY_WAVELENGTH, 81.8042, max_relative = 1e-5);
    }

    #[test]
    fn test_wavelength_from_tof() {
        let wavelength = Unit::Wavelength.prepare(&context()).unwrap();
        // 3956 m/s is a 1 Å neutron; 12 m takes 3033 µs.
        let lambda = wavelength.from_tof(12.0 / 3956.034 * 1e6);
        assert_relative_eq!(lambda, 1.0, max_relative = 1e-5);
        assert_relative_eq!(
            wavelength.to_tof(lambda),
            12.0 / 3956.034 * 1e6,
            max_relative = 1e-12
        );
    }

    #[test]
    fn test_dspacing_matches_bragg() {
        let d_unit = Unit::DSpacing.prepare(&context()).unwrap();
        let wavelength = Unit::Wavelength.prepare(&context()).unwrap();
        let tof = 1000.0;
        let d = d_unit.from_tof(tof);
        let lambda = wavelength.from_tof(tof);
        // λ = 2 d sin θ
        assert_relative_eq!(lambda, 2.0 * d * (PI / 4.0).sin(), max_relative = 1e-12);
    }

    #[test]
    fn test_dspacing_quadratic_calibration() {
        let ctx = context().with_diffractometer_constants(-2.0, 5000.0, 3.0);
        let d_unit = Unit::DSpacing.prepare(&ctx).unwrap();
        let d = 1.5;
        let tof = d_unit.to_tof(d);
        assert_relative_eq!(tof, -2.0 * 2.25 + 7500.0 + 3.0);
        assert_relative_eq!(d_unit.from_tof(tof), d, max_relative = 1e-12);
        let (lo, hi) = d_unit.tof_range();
        assert_relative_eq!(lo, 3.0);
        assert_relative_eq!(d_unit.from_tof(hi), d_unit.value_range().1, max_relative = 1e-9);
    }

    #[test]
    fn test_energy_matches_quick_wavelength() {
        let energy = Unit::Energy.prepare(&context()).unwrap();
        let wavelength = Unit::Wavelength.prepare(&context()).unwrap();
        let tof = 5000.0;
        let (factor, power) = Unit::Wavelength.quick_conversion(Unit::Energy).unwrap();
        let quick = factor * wavelength.from_tof(tof).powf(power);
        assert_relative_eq!(energy.from_tof(tof), quick, max_relative = 1e-12);
    }

    #[test]
    fn test_zero_angle_has_no_dspacing() {
        let ctx = ConversionContext::new(10.0, 2.0, 0.0);
        assert!(matches!(Unit::DSpacing.prepare(&ctx), Err(Error::Geometry(_))));
        assert!(matches!(
            Unit::MomentumTransfer.prepare(&ctx),
            Err(Error::Geometry(_))
        ));
        assert!(Unit::Wavelength.prepare(&ctx).is_ok());
    }

    #[test]
    fn test_delta_e_direct_round_trip() {
        let ctx = context().with_energy(EnergyMode::Direct, Some(50.0));
        let delta_e = Unit::DeltaE.prepare(&ctx).unwrap();
        let (t_min, _) = delta_e.tof_range();
        let tof = t_min + 2000.0;
        let value = delta_e.from_tof(tof);
        assert!(value < 50.0);
        assert_relative_eq!(delta_e.to_tof(value), tof, max_relative = 1e-12);
        let (lo, hi) = delta_e.value_range();
        assert_eq!(lo, f64::NEG_INFINITY);
        assert!(hi < 50.0);
        assert_relative_eq!(hi, 50.0, max_relative = 1e-9);
        assert!(delta_e.to_tof(hi).is_finite());
    }

    #[test]
    fn test_range_bounds_convert_to_finite_values() {
        let direct = context().with_energy(EnergyMode::Direct, Some(50.0));
        let indirect = context().with_energy(EnergyMode::Indirect, Some(3.5));
        let cases = [
            (Unit::Energy, context()),
            (Unit::Momentum, context()),
            (Unit::EnergyInWavenumber, context()),
            (Unit::DeltaE, direct),
            (Unit::DeltaE, indirect),
        ];
        for (unit, ctx) in cases {
            let prepared = unit.prepare(&ctx).unwrap();
            let (t_lo, _) = prepared.tof_range();
            let (v_lo, v_hi) = prepared.value_range();
            assert!(prepared.from_tof(t_lo).is_finite(), "{unit} at {t_lo}");
            assert!(prepared.to_tof(v_lo).is_finite(), "{unit} at {v_lo}");
            if v_hi.is_finite() {
                assert!(prepared.to_tof(v_hi).is_finite(), "{unit} at {v_hi}");
            }
        }
    }

    #[test]
    fn test_delta_e_indirect_elastic_line() {
        let ctx = context().with_energy(EnergyMode::Indirect, Some(3.5));
        let delta_e = Unit::DeltaE.prepare(&ctx).unwrap();
        // A neutron with Ei = Ef has zero energy transfer.
        let elastic_tof = flight_time(10.0, 3.5) + flight_time(2.0, 3.5);
        assert!(delta_e.from_tof(elastic_tof).abs() < 1e-9);
    }

    #[test]
    fn test_delta_e_needs_energy() {
        assert!(matches!(
            Unit::DeltaE.prepare(&context()),
            Err(Error::ConfigError(_))
        ));
        let ctx = context().with_energy(EnergyMode::Direct, None);
        assert!(Unit::DeltaE.prepare(&ctx).is_err());
    }

    #[test]
    fn test_quick_conversions_invert() {
        for source in Unit::ALL {
            for target in Unit::ALL {
                let (Some((f1, p1)), Some((f2, p2))) = (
                    source.quick_conversion(target),
                    target.quick_conversion(source),
                ) else {
                    continue;
                };
                let x = 1.7;
                let y = f1 * f64::powf(x, p1);
                assert_relative_eq!(f2 * f64::powf(y, p2), x, max_relative = 1e-12);
            }
        }
    }
}
