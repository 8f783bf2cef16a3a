//! Representation changes: events or points to bin-edge histograms, and back to points.

use std::sync::Arc;

use rustred_core::{
    convert_to_bin_boundary, convert_to_bin_centre, ParallelSpectrumDriver, Result,
    SpectrumCollection, XAxis,
};

use crate::algorithm::{collect_failures, AlgorithmOutput};
use crate::SpectrumAlgorithm;

/// Converts X of every spectrum with `convert`, keeping a shared axis shared.
fn map_axis(input: &SpectrumCollection, convert: fn(&[f64]) -> Vec<f64>) -> XAxis {
    match input.x_axis() {
        XAxis::Shared(x) => XAxis::Shared(Arc::new(convert(x))),
        XAxis::Ragged(xs) => XAxis::Ragged(xs.iter().map(|x| convert(x)).collect()),
    }
}

fn histogram_arrays(input: &SpectrumCollection) -> Result<(Vec<Vec<f64>>, Vec<Vec<f64>>)> {
    (0..input.number_of_spectra())
        .map(|index| input.histogram(index))
        .collect::<Result<Vec<_>>>()
        .map(|pairs| pairs.into_iter().unzip())
}

/// Produces bin-edge histograms.
///
/// Event lists are histogrammed on their current X and dropped. Point data
/// gets boundaries midway between points.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvertToHistogram;

impl SpectrumAlgorithm for ConvertToHistogram {
    fn name(&self) -> &'static str {
        "ConvertToHistogram"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let mut output = SpectrumCollection::derive_from(input, true);
        if input.is_event() {
            let failures = collect_failures(output.convert_to_histogram(driver))?;
            return Ok(AlgorithmOutput::new(output, failures));
        }
        if input.is_point_data() {
            let (y, e) = histogram_arrays(input)?;
            output.set_histograms(map_axis(input, convert_to_bin_boundary), y, e, false)?;
        }
        Ok(AlgorithmOutput::new(output, Vec::new()))
    }
}

/// Produces point data at bin centres.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConvertToPointData;

impl SpectrumAlgorithm for ConvertToPointData {
    fn name(&self) -> &'static str {
        "ConvertToPointData"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let mut output = SpectrumCollection::derive_from(input, true);
        let failures = collect_failures(output.convert_to_histogram(driver))?;
        if !output.is_point_data() {
            let (y, e) = histogram_arrays(&output)?;
            let x = map_axis(&output, convert_to_bin_centre);
            output.set_histograms(x, y, e, true)?;
        }
        Ok(AlgorithmOutput::new(output, failures))
    }
}
