//! ResampleX: a fixed number of bins per spectrum over each spectrum's own range.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rustred_core::{
    convert_to_bin_boundary, Error, ParallelSpectrumDriver, RaggedBinning, Result,
    SpectrumCollection, XAxis,
};

use crate::algorithm::{collect_failures, data_x_range, histogram_onto, AlgorithmOutput};
use crate::SpectrumAlgorithm;

/// ResampleX configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResampleConfig {
    /// Number of bins per spectrum.
    pub number_of_bins: usize,
    /// Logarithmic binning.
    pub log_binning: bool,
    /// Lower X bound for every spectrum; the data minimum if unset.
    pub x_min: Option<f64>,
    /// Upper X bound for every spectrum; the data maximum if unset.
    pub x_max: Option<f64>,
    /// Keep events and only replace the X axes.
    pub preserve_events: bool,
}

impl Default for ResampleConfig {
    fn default() -> Self {
        Self {
            number_of_bins: 100,
            log_binning: false,
            x_min: None,
            x_max: None,
            preserve_events: true,
        }
    }
}

impl ResampleConfig {
    /// Sets the bin count.
    #[must_use]
    pub fn with_number_of_bins(mut self, n: usize) -> Self {
        self.number_of_bins = n;
        self
    }

    /// Sets logarithmic binning.
    #[must_use]
    pub fn with_log_binning(mut self, log: bool) -> Self {
        self.log_binning = log;
        self
    }

    /// Fixes the X range for every spectrum.
    #[must_use]
    pub fn with_range(mut self, x_min: f64, x_max: f64) -> Self {
        self.x_min = Some(x_min);
        self.x_max = Some(x_max);
        self
    }

    /// Sets whether events are kept.
    #[must_use]
    pub fn with_preserve_events(mut self, preserve: bool) -> Self {
        self.preserve_events = preserve;
        self
    }
}

/// Gives every spectrum its own binning with the same number of bins.
#[derive(Clone, Debug)]
pub struct ResampleX {
    config: ResampleConfig,
}

impl ResampleX {
    /// Create with configuration.
    #[must_use]
    pub fn new(config: ResampleConfig) -> Self {
        Self { config }
    }

    fn validate(&self, binning: &RaggedBinning) -> Result<()> {
        if self.config.number_of_bins == 0 {
            return Err(Error::InvalidBinning(
                "number of bins must be positive".into(),
            ));
        }
        if let (Some(x_min), Some(x_max)) = (self.config.x_min, self.config.x_max) {
            binning.determine(x_min, x_max)?;
        }
        Ok(())
    }

    fn spectrum_axis(
        &self,
        input: &SpectrumCollection,
        index: usize,
        binning: &RaggedBinning,
    ) -> Result<Vec<f64>> {
        let data_range = data_x_range(input, index)?;
        let x_min = self.config.x_min.or(data_range.map(|(lo, _)| lo));
        let x_max = self.config.x_max.or(data_range.map(|(_, hi)| hi));
        let (Some(x_min), Some(x_max)) = (x_min, x_max) else {
            return Err(Error::InvalidBinning(
                "spectrum has no data to take the X range from".into(),
            ));
        };
        Ok(binning.determine(x_min, x_max)?.edges)
    }
}

impl SpectrumAlgorithm for ResampleX {
    fn name(&self) -> &'static str {
        "ResampleX"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let point_data = !input.is_event() && input.is_point_data();
        let binning = RaggedBinning::new(self.config.number_of_bins)
            .with_log(self.config.log_binning)
            .with_point_data(point_data);
        self.validate(&binning)?;
        let n = input.number_of_spectra();

        if input.is_event() && self.config.preserve_events {
            let mut axes = (0..n)
                .map(|index| input.read_x(index).map(<[f64]>::to_vec))
                .collect::<Result<Vec<_>>>()?;
            let failures = collect_failures(driver.for_each_mut(
                &mut axes,
                || (),
                |_, index, x| {
                    *x = self.spectrum_axis(input, index, &binning)?;
                    Ok(())
                },
            ))?;
            let mut output = SpectrumCollection::derive_from(input, true);
            output.set_x_axis(XAxis::Ragged(axes))?;
            return Ok(AlgorithmOutput::new(output, failures));
        }

        let mut slots = (0..n)
            .map(|index| {
                let x = input.read_x(index)?.to_vec();
                let (y, e) = if input.is_event() {
                    let n_bins = x.len() - 1;
                    (vec![0.0; n_bins], vec![0.0; n_bins])
                } else {
                    (input.read_y(index)?.into_owned(), input.read_e(index)?.into_owned())
                };
                Ok((x, y, e))
            })
            .collect::<Result<Vec<_>>>()?;
        let failures = collect_failures(driver.for_each_mut(
            &mut slots,
            || (),
            |_, index, slot| {
                let x = self.spectrum_axis(input, index, &binning)?;
                let (y, e) = if point_data {
                    histogram_onto(input, index, &convert_to_bin_boundary(&x))?
                } else {
                    histogram_onto(input, index, &x)?
                };
                *slot = (x, y, e);
                Ok(())
            },
        ))?;

        let mut xs = Vec::with_capacity(n);
        let mut ys = Vec::with_capacity(n);
        let mut es = Vec::with_capacity(n);
        for (x, y, e) in slots {
            xs.push(x);
            ys.push(y);
            es.push(e);
        }
        let mut output = SpectrumCollection::derive_from(input, false);
        output.set_histograms(XAxis::Ragged(xs), ys, es, point_data)?;
        Ok(AlgorithmOutput::new(output, failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use rustred_core::{EventList, PulseTime, SimpleInstrument, TofEvent};

    fn events(tofs: &[f64]) -> EventList {
        tofs.iter()
            .map(|&tof| TofEvent::new(tof, PulseTime::new(0)))
            .collect::<Vec<_>>()
            .into()
    }

    fn workspace() -> SpectrumCollection {
        SpectrumCollection::from_events(
            Arc::new(SimpleInstrument::new("TEST", 10.0)),
            vec![
                events(&[10.0, 20.0, 30.0, 50.0]),
                events(&[100.0, 400.0]),
                EventList::new(),
            ],
            vec![1.0, 1000.0],
        )
        .unwrap()
    }

    #[test]
    fn test_each_spectrum_gets_its_own_range() {
        let config = ResampleConfig::default().with_number_of_bins(4);
        let output = ResampleX::new(config)
            .execute(&workspace(), &ParallelSpectrumDriver::default())
            .unwrap();
        let output = output.into_result().unwrap();
        assert!(output.is_ragged());
        assert!(output.is_event());
        assert_eq!(output.read_x(0).unwrap(), &[10.0, 20.0, 30.0, 40.0, 50.0]);
        assert_eq!(output.read_x(1).unwrap(), &[100.0, 175.0, 250.0, 325.0, 400.0]);
        // An empty list keeps the range of its previous axis.
        assert_eq!(output.read_x(2).unwrap().len(), 5);
        assert_eq!(output.read_x(2).unwrap()[0], 1.0);
    }

    #[test]
    fn test_log_resample_to_histogram() {
        let config = ResampleConfig::default()
            .with_number_of_bins(10)
            .with_log_binning(true)
            .with_range(1.0, 1000.0)
            .with_preserve_events(false);
        let output = ResampleX::new(config)
            .execute(&workspace(), &ParallelSpectrumDriver::default())
            .unwrap()
            .into_result()
            .unwrap();
        assert!(!output.is_event());
        let x = output.read_x(0).unwrap();
        assert_eq!(x.len(), 11);
        assert_eq!(x[0], 1.0);
        assert_eq!(x[10], 1000.0);
        let total: f64 = output.read_y(0).unwrap().iter().sum();
        assert_eq!(total, 4.0);
    }

    #[test]
    fn test_invalid_range_fails_fast() {
        let config = ResampleConfig::default().with_range(5.0, 5.0);
        let err = ResampleX::new(config)
            .execute(&workspace(), &ParallelSpectrumDriver::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBinning(_)));
    }
}
