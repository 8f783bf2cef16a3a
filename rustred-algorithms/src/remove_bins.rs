//! RemoveBins: blank out an X range in the middle of every spectrum.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rustred_core::{
    convert_to_bin_centre, Error, ParallelSpectrumDriver, Result, SpectrumCollection,
    SpectrumDataMut,
};

use crate::algorithm::{collect_failures, AlgorithmOutput};
use crate::SpectrumAlgorithm;

/// RemoveBins configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RemoveBinsConfig {
    /// Lower bound of the removed range (inclusive).
    pub x_min: f64,
    /// Upper bound of the removed range (inclusive).
    pub x_max: f64,
}

/// Zeroes every bin whose centre lies in `[x_min, x_max]`.
///
/// Histogram bins outside the range are untouched. Event spectra lose the
/// events inside the range instead.
#[derive(Clone, Debug)]
pub struct RemoveBins {
    config: RemoveBinsConfig,
}

impl RemoveBins {
    /// Create with configuration.
    #[must_use]
    pub fn new(config: RemoveBinsConfig) -> Self {
        Self { config }
    }
}

impl SpectrumAlgorithm for RemoveBins {
    fn name(&self) -> &'static str {
        "RemoveBins"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let RemoveBinsConfig { x_min, x_max } = self.config;
        if !x_min.is_finite() || !x_max.is_finite() || x_min > x_max {
            return Err(Error::ConfigError(format!(
                "invalid range to remove: [{x_min}, {x_max}]"
            )));
        }
        let mut output = SpectrumCollection::derive_from(input, true);
        let point_data = output.is_point_data();
        output.make_ragged();

        let mut spectra = output.spectra_mut()?;
        let outcome = driver.for_each_mut(
            &mut spectra,
            || (),
            |_, _, spectrum| {
                match &mut spectrum.data {
                    SpectrumDataMut::Events(list) => {
                        list.mask_tof(x_min, x_max)?;
                    }
                    SpectrumDataMut::Histogram { y, e } => {
                        let centres = if point_data {
                            spectrum.x.clone()
                        } else {
                            convert_to_bin_centre(&spectrum.x[..])
                        };
                        for (bin, centre) in centres.iter().enumerate() {
                            if *centre >= x_min && *centre <= x_max {
                                y[bin] = 0.0;
                                e[bin] = 0.0;
                            }
                        }
                    }
                }
                Ok(())
            },
        );
        drop(spectra);
        let failures = collect_failures(outcome)?;
        if !input.is_ragged() {
            output.set_x_axis(input.x_axis().clone())?;
        }
        Ok(AlgorithmOutput::new(output, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rustred_core::{SimpleInstrument, SpectrumInfo, XAxis};

    fn workspace() -> SpectrumCollection {
        SpectrumCollection::from_histograms(
            Arc::new(SimpleInstrument::new("TEST", 10.0)),
            vec![SpectrumInfo::new(1, [1])],
            XAxis::Shared(Arc::new(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])),
            vec![vec![1.0, 2.0, 3.0, 4.0, 5.0]],
            vec![vec![0.1, 0.2, 0.3, 0.4, 0.5]],
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_zeroes_bins_with_centres_in_closed_range() {
        // Centres are 0.5, 1.5, 2.5, 3.5, 4.5; the range touches 1.5 and 3.5 exactly.
        let config = RemoveBinsConfig {
            x_min: 1.5,
            x_max: 3.5,
        };
        let output = RemoveBins::new(config)
            .execute(&workspace(), &ParallelSpectrumDriver::default())
            .unwrap()
            .into_result()
            .unwrap();
        assert_eq!(output.read_y(0).unwrap().as_ref(), &[1.0, 0.0, 0.0, 0.0, 5.0]);
        assert_eq!(output.read_e(0).unwrap().as_ref(), &[0.1, 0.0, 0.0, 0.0, 0.5]);
        assert!(!output.is_ragged());
    }

    #[test]
    fn test_range_between_centres_removes_nothing() {
        let config = RemoveBinsConfig {
            x_min: 1.6,
            x_max: 2.4,
        };
        let output = RemoveBins::new(config)
            .execute(&workspace(), &ParallelSpectrumDriver::default())
            .unwrap()
            .workspace;
        assert_eq!(
            output.read_y(0).unwrap().as_ref(),
            &[1.0, 2.0, 3.0, 4.0, 5.0]
        );
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let config = RemoveBinsConfig {
            x_min: 3.0,
            x_max: 1.0,
        };
        assert!(matches!(
            RemoveBins::new(config).execute(&workspace(), &ParallelSpectrumDriver::default()),
            Err(Error::ConfigError(_))
        ));
    }
}
