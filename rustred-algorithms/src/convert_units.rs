//! ConvertUnits: change the X unit of every spectrum.
//!
//! Events have their TOF field rewritten in place; X axes are converted value
//! by value. Geometry-dependent conversions leave the output ragged. Values
//! outside the range the conversion can handle are clamped on the axis and
//! dropped from event lists.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rustred_core::{
    ConversionConfig, ConversionMode, DetectorTable, Error, ParallelSpectrumDriver, Result,
    SpectrumCollection, SpectrumConversion, SpectrumDataMut, Unit, UnitsConversionHelper, XAxis,
};

use crate::algorithm::{collect_failures, AlgorithmOutput};
use crate::SpectrumAlgorithm;

/// ConvertUnits configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ConvertUnitsConfig {
    /// Unit to convert to.
    pub target: Unit,
    /// Energy mode, fixed energy and strategy override.
    pub conversion: ConversionConfig,
}

impl ConvertUnitsConfig {
    /// Elastic conversion to `target`.
    #[must_use]
    pub fn new(target: Unit) -> Self {
        Self {
            target,
            conversion: ConversionConfig::default(),
        }
    }

    /// Sets the conversion settings.
    #[must_use]
    pub fn with_conversion(mut self, conversion: ConversionConfig) -> Self {
        self.conversion = conversion;
        self
    }
}

/// Converts the X unit of a collection.
#[derive(Clone, Debug)]
pub struct ConvertUnits {
    config: ConvertUnitsConfig,
}

impl ConvertUnits {
    /// Create with configuration.
    #[must_use]
    pub fn new(config: ConvertUnitsConfig) -> Self {
        Self { config }
    }

    fn helper(&self, input: &SpectrumCollection) -> Result<UnitsConversionHelper> {
        let source = input.unit();
        let target = self.config.target;
        let mode = ConversionMode::select(source, target, self.config.conversion.force_via_tof);
        let table = if mode.needs_geometry() {
            DetectorTable::build(
                input.instrument().as_ref(),
                input.spectrum_info().iter().map(|info| &info.detector_ids),
            )?
        } else {
            DetectorTable::from_entries(0.0, Vec::new())
        };
        UnitsConversionHelper::new(source, target, self.config.conversion, Arc::new(table))
    }
}

/// Converts an axis in place, clamping to the valid range and restoring
/// ascending order. Returns true if the axis was reversed.
///
/// Event binning drops edges that coincide after clamping; histogram axes
/// keep their length. Bin edges must stay strictly increasing, so a
/// histogram whose edges collapse at a range bound is rejected.
fn convert_axis(
    x: &mut Vec<f64>,
    conversion: &SpectrumConversion,
    dedup: bool,
    edges: bool,
) -> Result<bool> {
    let (Some(&first), Some(&last)) = (x.first(), x.last()) else {
        return Ok(false);
    };
    let (lo, hi) = conversion.conversion_range(first, last);
    let mut converted: Vec<f64> = x
        .iter()
        .map(|value| conversion.convert(value.max(lo).min(hi)))
        .collect();
    if let Some(bad) = converted.iter().find(|value| !value.is_finite()) {
        return Err(Error::Numeric(format!("unit conversion produced {bad}")));
    }
    let reversed = converted.len() > 1 && converted[0] > converted[converted.len() - 1];
    if reversed {
        converted.reverse();
    }
    if dedup {
        converted.dedup();
        if converted.len() < 2 {
            return Err(Error::Numeric(
                "converted bin edges collapse outside the valid range".into(),
            ));
        }
    }
    if edges && converted.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(Error::Numeric(
            "converted bin edges collapse at the edge of the valid range".into(),
        ));
    }
    *x = converted;
    Ok(reversed)
}

impl SpectrumAlgorithm for ConvertUnits {
    fn name(&self) -> &'static str {
        "ConvertUnits"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let helper = self.helper(input)?;
        let mut output = SpectrumCollection::derive_from(input, true);
        if helper.mode() == ConversionMode::NoOp {
            return Ok(AlgorithmOutput::new(output, Vec::new()));
        }
        let was_shared = !input.is_ragged();
        output.make_ragged();
        let dropped = AtomicUsize::new(0);
        let point_data = output.is_point_data();

        let mut spectra = output.spectra_mut()?;
        let outcome = driver.for_each_mut(
            &mut spectra,
            || helper.clone(),
            |helper, index, spectrum| {
                helper.update_conversion(index)?;
                let Some(conversion) = helper.current().copied() else {
                    return Err(Error::Numeric("no conversion loaded".into()));
                };
                let is_events = matches!(spectrum.data, SpectrumDataMut::Events(_));
                let reversed = convert_axis(spectrum.x, &conversion, is_events, !point_data)?;
                match &mut spectrum.data {
                    SpectrumDataMut::Events(list) => {
                        let (lo, hi) =
                            conversion.conversion_range(f64::NEG_INFINITY, f64::INFINITY);
                        let removed = list.retain_tof_within(lo, hi);
                        if removed > 0 {
                            dropped.fetch_add(removed, Ordering::Relaxed);
                        }
                        match conversion {
                            SpectrumConversion::Fast { factor, power } => {
                                list.convert_tof(factor, power);
                            }
                            _ => list.convert_tof_with(|tof| conversion.convert(tof)),
                        }
                    }
                    SpectrumDataMut::Histogram { y, e } => {
                        if reversed {
                            y.reverse();
                            e.reverse();
                        }
                    }
                }
                Ok(())
            },
        );
        drop(spectra);
        let failures = collect_failures(outcome)?;

        let dropped = dropped.into_inner();
        if dropped > 0 {
            log::warn!(
                "dropped {dropped} events outside the range valid for {} -> {}",
                helper.source(),
                helper.target()
            );
        }

        output.set_unit(self.config.target);
        if was_shared && !helper.mode().needs_geometry() && failures.is_empty() {
            if let Ok(x) = output.read_x(0).map(<[f64]>::to_vec) {
                output.set_x_axis(XAxis::Shared(Arc::new(x)))?;
            }
        }
        output.validate()?;
        Ok(AlgorithmOutput::new(output, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rustred_core::{
        EnergyMode, EventList, InstrumentGeometry, PulseTime, SimpleInstrument, SpectrumInfo,
        TofEvent,
    };

    fn instrument() -> Arc<dyn InstrumentGeometry> {
        Arc::new(
            SimpleInstrument::new("TEST", 10.0)
                .with_detector_degrees(1, 2.0, 90.0)
                .with_detector_degrees(2, 2.0, 30.0),
        )
    }

    fn event_workspace() -> SpectrumCollection {
        let lists = [1, 2]
            .into_iter()
            .map(|id| {
                EventList::from(
                    [1000.0, 2000.0, 3000.0]
                        .iter()
                        .map(|&tof| TofEvent::new(tof, PulseTime::new(0)))
                        .collect::<Vec<_>>(),
                )
                .with_detector_ids([id])
            })
            .collect();
        SpectrumCollection::from_events(instrument(), lists, vec![500.0, 1500.0, 2500.0, 3500.0])
            .unwrap()
    }

    #[test]
    fn test_tof_to_wavelength_events() {
        let output = ConvertUnits::new(ConvertUnitsConfig::new(Unit::Wavelength))
            .execute(&event_workspace(), &ParallelSpectrumDriver::default())
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(output.unit(), Unit::Wavelength);
        assert!(output.is_ragged());
        let tofs = output.events(0).unwrap().tofs();
        assert_relative_eq!(tofs[0], 0.329_67, max_relative = 1e-4);
        // Events still land in the same bins after conversion.
        assert_eq!(output.read_y(0).unwrap().as_ref(), &[1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_histogram_round_trip_stays_ascending() {
        let mut input = event_workspace();
        input
            .convert_to_histogram(&ParallelSpectrumDriver::default())
            .unwrap();
        let wavelength = ConvertUnits::new(ConvertUnitsConfig::new(Unit::Wavelength))
            .execute(&input, &ParallelSpectrumDriver::default())
            .unwrap()
            .workspace;
        let energy = ConvertUnits::new(ConvertUnitsConfig::new(Unit::Energy))
            .execute(&wavelength, &ParallelSpectrumDriver::default())
            .unwrap()
            .workspace;
        // Energy falls with wavelength, so bins come out reversed.
        let x = energy.read_x(0).unwrap();
        assert!(x.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(energy.read_y(0).unwrap().as_ref(), &[1.0, 1.0, 1.0]);
        assert!(energy.is_ragged());
    }

    #[test]
    fn test_quick_conversion_keeps_shared_axis() {
        let input = SpectrumCollection::from_histograms(
            instrument(),
            vec![SpectrumInfo::new(1, [1]), SpectrumInfo::new(2, [2])],
            XAxis::Shared(Arc::new(vec![1.0, 2.0, 4.0])),
            vec![vec![5.0, 1.0], vec![2.0, 3.0]],
            vec![vec![1.0, 1.0], vec![1.0, 1.0]],
            false,
        )
        .unwrap()
        .with_unit(Unit::Wavelength);
        let output = ConvertUnits::new(ConvertUnitsConfig::new(Unit::Energy))
            .execute(&input, &ParallelSpectrumDriver::default())
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!output.is_ragged());
        assert_eq!(output.read_y(0).unwrap().as_ref(), &[1.0, 5.0]);
        let x = output.read_x(1).unwrap();
        assert_relative_eq!(x[2], rustred_core::units::ENERGY_WAVELENGTH, max_relative = 1e-12);
    }

    #[test]
    fn test_missing_detector_fails_only_that_spectrum() {
        let lists = vec![
            EventList::from(vec![TofEvent::new(1000.0, PulseTime::new(0))]).with_detector_ids([1]),
            EventList::from(vec![TofEvent::new(1000.0, PulseTime::new(0))]).with_detector_ids([9]),
        ];
        let input =
            SpectrumCollection::from_events(instrument(), lists, vec![0.0, 5000.0]).unwrap();
        let output = ConvertUnits::new(ConvertUnitsConfig::new(Unit::DSpacing))
            .execute(&input, &ParallelSpectrumDriver::default())
            .unwrap();
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].index, 1);
        assert!(output.workspace.events(0).unwrap().tofs()[0] < 1.0);
        assert_eq!(output.workspace.events(1).unwrap().tofs(), vec![1000.0]);
    }

    #[test]
    fn test_delta_e_drops_events_before_elastic_arrival() {
        let config = ConvertUnitsConfig::new(Unit::DeltaE).with_conversion(
            ConversionConfig::default()
                .with_emode(EnergyMode::Direct)
                .with_efixed(50.0),
        );
        let t1 = rustred_core::units::flight_time(10.0, 50.0);
        let list = EventList::from(vec![
            TofEvent::new(t1 * 0.5, PulseTime::new(0)),
            TofEvent::new(t1 + 1000.0, PulseTime::new(0)),
        ])
        .with_detector_ids([1]);
        let input =
            SpectrumCollection::from_events(instrument(), vec![list], vec![0.0, 5000.0]).unwrap();
        let output = ConvertUnits::new(config)
            .execute(&input, &ParallelSpectrumDriver::default())
            .unwrap()
            .into_result()
            .unwrap();
        let events = output.events(0).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events.tofs()[0] < 50.0);
        assert!(output.read_x(0).unwrap().iter().all(|x| !x.is_nan()));
    }

    #[test]
    fn test_histogram_edges_collapsing_below_zero_fail_that_spectrum() {
        let input = SpectrumCollection::from_histograms(
            instrument(),
            vec![SpectrumInfo::new(1, [1]), SpectrumInfo::new(2, [2])],
            XAxis::Ragged(vec![
                vec![-200.0, -100.0, 1000.0, 2000.0],
                vec![500.0, 1000.0, 1500.0, 2000.0],
            ]),
            vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]],
            vec![vec![1.0, 1.0, 1.0], vec![2.0, 2.0, 2.0]],
            false,
        )
        .unwrap();
        let output = ConvertUnits::new(ConvertUnitsConfig::new(Unit::Wavelength))
            .execute(&input, &ParallelSpectrumDriver::default())
            .unwrap();
        assert_eq!(output.failures.len(), 1);
        assert_eq!(output.failures[0].index, 0);
        assert!(matches!(*output.failures[0].error, Error::Numeric(_)));
        let workspace = &output.workspace;
        assert!(workspace.validate().is_ok());
        let kept = workspace.read_x(0).unwrap();
        assert_eq!(kept, &[-200.0, -100.0, 1000.0, 2000.0]);
        assert_eq!(workspace.read_y(0).unwrap().as_ref(), &[1.0, 2.0, 3.0]);
        let converted = workspace.read_x(1).unwrap();
        assert!(converted.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(converted.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_elastic_delta_e_fails_fast() {
        let err = ConvertUnits::new(ConvertUnitsConfig::new(Unit::DeltaE))
            .execute(&event_workspace(), &ParallelSpectrumDriver::default())
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
    }
}
