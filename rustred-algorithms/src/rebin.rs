//! Rebin: one shared binning for every spectrum.

use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rustred_core::{
    convert_to_bin_centre, create_axis_from_rebin_params, Error, ParallelSpectrumDriver,
    RebinParams, Result, SpectrumCollection, XAxis,
};

use crate::algorithm::{collect_failures, data_x_range, histogram_onto, AlgorithmOutput};
use crate::SpectrumAlgorithm;

/// Rebin configuration.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RebinConfig {
    /// Rebin parameters `[x0, step, x1, ...]` or a bare width.
    pub params: RebinParams,
    /// Keep events and only replace the X axis.
    pub preserve_events: bool,
    /// Drop a partial last bin instead of widening the previous one.
    pub full_bins_only: bool,
}

impl RebinConfig {
    /// Creates a configuration that preserves events.
    #[must_use]
    pub fn new(params: RebinParams) -> Self {
        Self {
            params,
            preserve_events: true,
            full_bins_only: false,
        }
    }

    /// Sets whether events are kept.
    #[must_use]
    pub fn with_preserve_events(mut self, preserve: bool) -> Self {
        self.preserve_events = preserve;
        self
    }

    /// Sets whether only full bins are produced.
    #[must_use]
    pub fn with_full_bins_only(mut self, full_bins_only: bool) -> Self {
        self.full_bins_only = full_bins_only;
        self
    }
}

/// Rebins every spectrum onto the same edges.
#[derive(Clone, Debug)]
pub struct Rebin {
    config: RebinConfig,
}

impl Rebin {
    /// Create with configuration.
    #[must_use]
    pub fn new(config: RebinConfig) -> Self {
        Self { config }
    }

    /// Computes the output edges, using the data range for a bare width.
    fn edges(&self, input: &SpectrumCollection) -> Result<Vec<f64>> {
        let hints = if self.config.params.is_width_only() {
            let mut range: Option<(f64, f64)> = None;
            for index in 0..input.number_of_spectra() {
                if let Some((lo, hi)) = data_x_range(input, index)? {
                    range = Some(match range {
                        Some((min, max)) => (min.min(lo), max.max(hi)),
                        None => (lo, hi),
                    });
                }
            }
            Some(range.ok_or_else(|| {
                Error::InvalidBinning("no data to take the X range from".into())
            })?)
        } else {
            None
        };
        create_axis_from_rebin_params(
            self.config.params.as_slice(),
            self.config.full_bins_only,
            hints,
        )
    }
}

impl SpectrumAlgorithm for Rebin {
    fn name(&self) -> &'static str {
        "Rebin"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let edges = self.edges(input)?;
        log::debug!("rebinning onto {} edges", edges.len());

        if input.is_event() && self.config.preserve_events {
            let mut output = SpectrumCollection::derive_from(input, true);
            output.set_x_axis(XAxis::Shared(Arc::new(edges)))?;
            return Ok(AlgorithmOutput::new(output, Vec::new()));
        }

        let n_bins = edges.len() - 1;
        let mut slots = vec![(vec![0.0; n_bins], vec![0.0; n_bins]); input.number_of_spectra()];
        let failures = collect_failures(driver.for_each_mut(
            &mut slots,
            || (),
            |_, index, slot| {
                *slot = histogram_onto(input, index, &edges)?;
                Ok(())
            },
        ))?;

        let point_data = !input.is_event() && input.is_point_data();
        let x = if point_data {
            convert_to_bin_centre(&edges)
        } else {
            edges
        };
        let (y, e) = slots.into_iter().unzip();
        let mut output = SpectrumCollection::derive_from(input, false);
        output.set_histograms(XAxis::Shared(Arc::new(x)), y, e, point_data)?;
        Ok(AlgorithmOutput::new(output, failures))
    }
}
