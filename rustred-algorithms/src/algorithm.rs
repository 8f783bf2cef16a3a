//! Shared algorithm interface and per-spectrum helpers.

use rustred_core::{
    convert_to_bin_boundary, rebin_histogram, Error, ParallelSpectrumDriver, Result,
    SpectrumCollection, SpectrumData, SpectrumFailure,
};

/// Result of running an algorithm over a collection.
///
/// Spectra that failed are listed in `failures`; every other spectrum of
/// `workspace` holds a valid result. Whether a partial run is acceptable is
/// the caller's decision.
#[derive(Debug)]
pub struct AlgorithmOutput {
    /// Output collection.
    pub workspace: SpectrumCollection,
    /// Per-spectrum failures, sorted by workspace index.
    pub failures: Vec<SpectrumFailure>,
}

impl AlgorithmOutput {
    pub(crate) fn new(workspace: SpectrumCollection, failures: Vec<SpectrumFailure>) -> Self {
        Self {
            workspace,
            failures,
        }
    }

    /// Returns true if every spectrum succeeded.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Returns the workspace, or the aggregated error if any spectrum failed.
    ///
    /// # Errors
    /// Returns [`Error::SpectrumFailures`] for partial runs.
    pub fn into_result(self) -> Result<SpectrumCollection> {
        if self.failures.is_empty() {
            Ok(self.workspace)
        } else {
            Err(Error::SpectrumFailures(self.failures))
        }
    }
}

/// A transformation from one spectrum collection to another.
pub trait SpectrumAlgorithm {
    /// Algorithm name.
    fn name(&self) -> &'static str;

    /// Runs the algorithm.
    ///
    /// # Errors
    /// Configuration errors are returned before any spectrum is processed.
    /// Per-spectrum failures are reported in [`AlgorithmOutput::failures`].
    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput>;
}

/// Splits a driver outcome into per-spectrum failures and fatal errors.
pub(crate) fn collect_failures(outcome: Result<()>) -> Result<Vec<SpectrumFailure>> {
    match outcome {
        Ok(()) => Ok(Vec::new()),
        Err(Error::SpectrumFailures(failures)) => Ok(failures),
        Err(err) => Err(err),
    }
}

/// X extent of the data in spectrum `index`.
///
/// Event spectra report their TOF range; empty event lists and histograms
/// report the first and last X value.
pub(crate) fn data_x_range(input: &SpectrumCollection, index: usize) -> Result<Option<(f64, f64)>> {
    let spectrum = input.spectrum(index)?;
    if let SpectrumData::Events(list) = spectrum.data {
        if let Some(range) = list.tof_range() {
            return Ok(Some(range));
        }
    }
    Ok(match (spectrum.x.first(), spectrum.x.last()) {
        (Some(&first), Some(&last)) if first.is_finite() && last.is_finite() => {
            Some((first.min(last), first.max(last)))
        }
        _ => None,
    })
}

/// Histograms one spectrum of `input` onto `edges`.
///
/// Events are binned directly; stored histograms are redistributed by
/// fractional overlap, with point data first converted to bin boundaries.
pub(crate) fn histogram_onto(
    input: &SpectrumCollection,
    index: usize,
    edges: &[f64],
) -> Result<(Vec<f64>, Vec<f64>)> {
    let spectrum = input.spectrum(index)?;
    match spectrum.data {
        SpectrumData::Events(list) => Ok(list.generate_histogram(edges)),
        SpectrumData::Histogram { y, e } => {
            if input.is_point_data() {
                let boundaries = convert_to_bin_boundary(spectrum.x);
                rebin_histogram(&boundaries, y, e, edges)
            } else {
                rebin_histogram(spectrum.x, y, e, edges)
            }
        }
    }
}
