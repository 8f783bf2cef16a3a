//! Bin-edge generation and histogram rebinning.
//!
//! Two request styles are supported:
//!
//! - **Rebin parameters** `[x0, Δ1, x1, Δ2, x2, …]`: a positive Δ is an
//!   absolute step, a negative Δ a logarithmic step `x · |Δ|`.
//! - **Ragged requests** `(xmin, xmax, n_bins, use_log)`: the step is solved
//!   for so that the axis has the requested number of bins. Logarithmic
//!   requests are solved iteratively with a damped correction.
#![allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::missing_errors_doc,
    clippy::neg_cmp_op_on_partial_ord
)]

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Fraction of a step the final bin may exceed before a new bin is started.
pub const LAST_BIN_FRACTION: f64 = 0.25;

/// Iteration cap for the logarithmic bin solver.
pub const MAX_LOG_ITERATIONS: usize = 100;

/// Initial relative correction applied to the logarithmic step.
pub const INITIAL_LOG_SHIFT: f64 = 0.1;

/// Upper bound on generated boundaries; larger requests are rejected.
pub const MAX_BOUNDARIES: usize = 50_000_000;

/// A strictly increasing set of at least two bin boundaries.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinEdges(Vec<f64>);

impl BinEdges {
    /// Validates and wraps a boundary vector.
    pub fn new(edges: Vec<f64>) -> Result<Self> {
        if edges.len() < 2 {
            return Err(Error::InvalidBinning(format!(
                "at least 2 bin boundaries are required, got {}",
                edges.len()
            )));
        }
        if let Some(i) = edges
            .windows(2)
            .position(|pair| !(pair[0] < pair[1]) || !pair[0].is_finite() || !pair[1].is_finite())
        {
            return Err(Error::InvalidBinning(format!(
                "bin boundaries must be finite and strictly increasing (index {i}: {} then {})",
                edges[i],
                edges[i + 1]
            )));
        }
        Ok(Self(edges))
    }

    /// Builds boundaries from rebin parameters.
    pub fn from_params(params: &RebinParams, full_bins_only: bool) -> Result<Self> {
        Self::new(create_axis_from_rebin_params(
            params.as_slice(),
            full_bins_only,
            None,
        )?)
    }

    /// Returns the boundaries.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Returns the number of boundaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a valid edge set has at least two boundaries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of bins.
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.0.len() - 1
    }

    /// Returns the bin centres.
    #[must_use]
    pub fn centres(&self) -> Vec<f64> {
        convert_to_bin_centre(&self.0)
    }

    /// Unwraps the boundary vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.0
    }
}

impl AsRef<[f64]> for BinEdges {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Validated rebin parameters `[x0, Δ1, x1, …]`, or a single bin width.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RebinParams(Vec<f64>);

impl RebinParams {
    /// Validates a parameter list.
    ///
    /// A single value is a bin width whose range comes from the data.
    /// Otherwise the list must have odd length, non-zero steps, strictly
    /// increasing boundaries, and positive boundaries wherever a logarithmic
    /// step starts.
    pub fn new(params: Vec<f64>) -> Result<Self> {
        if params.iter().any(|value| !value.is_finite()) {
            return Err(Error::InvalidBinning(
                "rebin parameters must be finite".into(),
            ));
        }
        match params.len() {
            0 => {
                return Err(Error::InvalidBinning(
                    "rebin parameters must not be empty".into(),
                ))
            }
            1 => {
                if params[0] == 0.0 {
                    return Err(Error::InvalidBinning("bin width must not be zero".into()));
                }
                return Ok(Self(params));
            }
            n if n % 2 == 0 => {
                return Err(Error::InvalidBinning(format!(
                    "rebin parameters must have odd length (x0, step, x1, ...), got {n} values"
                )))
            }
            _ => {}
        }
        for segment in params.windows(3).step_by(2) {
            let (start, step, stop) = (segment[0], segment[1], segment[2]);
            if step == 0.0 {
                return Err(Error::InvalidBinning("bin step must not be zero".into()));
            }
            if start >= stop {
                return Err(Error::InvalidBinning(format!(
                    "bin boundaries must be increasing ({start} >= {stop})"
                )));
            }
            if step < 0.0 && start <= 0.0 {
                return Err(Error::InvalidBinning(format!(
                    "logarithmic binning cannot start at a non-positive boundary ({start})"
                )));
            }
        }
        Ok(Self(params))
    }

    /// Returns the raw parameters.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Returns true if this is a bare bin width that needs an X range.
    #[must_use]
    pub fn is_width_only(&self) -> bool {
        self.0.len() == 1
    }

    /// Expands a bare bin width into `[xmin, width, xmax]`.
    pub fn with_range(&self, xmin: f64, xmax: f64) -> Result<Self> {
        if self.is_width_only() {
            Self::new(vec![xmin, self.0[0], xmax])
        } else {
            Ok(self.clone())
        }
    }
}

impl FromStr for RebinParams {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|token| {
                token.trim().parse::<f64>().map_err(|_| {
                    Error::InvalidBinning(format!("cannot parse rebin parameter '{token}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(values)
    }
}

impl fmt::Display for RebinParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for value in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{value}")?;
            first = false;
        }
        Ok(())
    }
}

/// Builds an axis from rebin parameters.
///
/// Within each segment the axis advances by the step while the current bin
/// plus [`LAST_BIN_FRACTION`] of another still fits below the segment's
/// boundary; otherwise the boundary closes the segment, so a remainder
/// smaller than a quarter step widens the previous bin. With
/// `full_bins_only` the partial last bin is dropped instead.
///
/// `hints` supplies `(xmin, xmax)` when `params` holds only a bin width.
pub fn create_axis_from_rebin_params(
    params: &[f64],
    full_bins_only: bool,
    hints: Option<(f64, f64)>,
) -> Result<Vec<f64>> {
    let expanded;
    let params = if params.len() == 1 {
        let (xmin, xmax) = hints.ok_or_else(|| {
            Error::InvalidBinning("a bare bin width needs the X range of the data".into())
        })?;
        expanded = [xmin, params[0], xmax];
        &expanded[..]
    } else {
        params
    };
    if params.len() < 3 || params.len() % 2 == 0 {
        return Err(Error::InvalidBinning(format!(
            "rebin parameters must have odd length of at least 3, got {}",
            params.len()
        )));
    }

    let last_bin_coefficient = if full_bins_only {
        1.0
    } else {
        LAST_BIN_FRACTION
    };
    let last_boundary = params.len() - 1;

    let mut xcurr = params[0];
    let mut axis = vec![xcurr];
    let mut ibound = 2;
    let mut istep = 1;
    while ibound <= last_boundary {
        let step = if params[istep] >= 0.0 {
            params[istep]
        } else {
            xcurr * params[istep].abs()
        };
        if !(step > 0.0) || !step.is_finite() {
            return Err(Error::InvalidBinning(format!(
                "invalid bin step {step} at x = {xcurr}"
            )));
        }
        if !(xcurr + step > xcurr) {
            return Err(Error::InvalidBinning(format!(
                "bin step {step} is too small to advance from x = {xcurr}"
            )));
        }

        if xcurr + step * (1.0 + last_bin_coefficient) <= params[ibound] {
            xcurr += step;
        } else {
            if full_bins_only {
                xcurr += step;
            } else {
                xcurr = params[ibound];
            }
            ibound += 2;
            istep += 2;
        }
        axis.push(xcurr);
        if axis.len() > MAX_BOUNDARIES {
            return Err(Error::InvalidBinning(format!(
                "binning would create more than {MAX_BOUNDARIES} boundaries"
            )));
        }
    }
    Ok(axis)
}

/// A ragged, per-spectrum binning request.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RaggedBinning {
    /// Requested number of bins (or points in point mode).
    pub n_bins: usize,
    /// Use logarithmic rather than linear steps.
    pub use_log: bool,
    /// Produce bin centres instead of boundaries.
    pub point_data: bool,
}

impl RaggedBinning {
    /// Creates a linear histogram request.
    #[must_use]
    pub fn new(n_bins: usize) -> Self {
        Self {
            n_bins,
            use_log: false,
            point_data: false,
        }
    }

    /// Use logarithmic steps.
    #[must_use]
    pub fn with_log(mut self, use_log: bool) -> Self {
        self.use_log = use_log;
        self
    }

    /// Produce point data (bin centres).
    #[must_use]
    pub fn with_point_data(mut self, point_data: bool) -> Self {
        self.point_data = point_data;
        self
    }

    /// Number of values the axis should have.
    #[must_use]
    pub fn expected_len(&self) -> usize {
        if self.point_data {
            self.n_bins
        } else {
            self.n_bins + 1
        }
    }

    /// Generates the axis for `[xmin, xmax]`.
    ///
    /// A shortfall in the number of generated values is not an error: it is
    /// logged and reported through [`BinningOutcome::converged`].
    pub fn determine(&self, xmin: f64, xmax: f64) -> Result<BinningOutcome> {
        self.validate(xmin, xmax)?;
        let outcome = if self.use_log {
            self.solve_log(xmin, xmax)?
        } else {
            self.linear(xmin, xmax)?
        };
        if !outcome.converged {
            log::warn!(
                "did not generate the requested number of bins: generated {} requested {} (xmin={xmin}, xmax={xmax})",
                outcome.edges.len(),
                self.expected_len()
            );
        }
        Ok(outcome)
    }

    fn validate(&self, xmin: f64, xmax: f64) -> Result<()> {
        if !(xmin < xmax) || !xmin.is_finite() || !xmax.is_finite() {
            return Err(Error::InvalidBinning(format!(
                "xmin must be less than xmax (xmin={xmin}, xmax={xmax})"
            )));
        }
        if self.n_bins == 0 {
            return Err(Error::InvalidBinning(
                "number of bins must be positive".into(),
            ));
        }
        if self.point_data && self.n_bins < 2 {
            return Err(Error::InvalidBinning(
                "point data needs at least 2 points".into(),
            ));
        }
        if self.use_log {
            if xmin == 0.0 || xmax == 0.0 {
                return Err(Error::InvalidBinning(format!(
                    "cannot calculate log of zero (xmin={xmin}, xmax={xmax})"
                )));
            }
            if xmin < 0.0 {
                return Err(Error::InvalidBinning(format!(
                    "logarithmic binning needs a positive range (xmin={xmin}, xmax={xmax})"
                )));
            }
        }
        Ok(())
    }

    fn linear(&self, xmin: f64, xmax: f64) -> Result<BinningOutcome> {
        let steps = if self.point_data {
            self.n_bins - 1
        } else {
            self.n_bins
        };
        let delta = (xmax - xmin) / steps as f64;
        let edges = create_axis_from_rebin_params(&[xmin, delta, xmax], false, None)?;
        Ok(BinningOutcome {
            converged: edges.len() == self.expected_len(),
            edges,
            delta,
            iterations: 1,
        })
    }

    fn solve_log(&self, xmin: f64, xmax: f64) -> Result<BinningOutcome> {
        let expected = self.expected_len();
        let mut delta = (xmax.ln() - xmin.ln()) / self.n_bins as f64;
        let mut shift = INITIAL_LOG_SHIFT;
        let mut direction = 0_i8;
        let mut edges = Vec::new();
        let mut iterations = 0;
        let mut converged = false;

        while iterations < MAX_LOG_ITERATIONS {
            iterations += 1;
            let stop = if self.point_data { xmax } else { xmax + delta };
            edges = create_axis_from_rebin_params(&[xmin, -delta, stop], false, None)?;

            match edges.len().cmp(&expected) {
                std::cmp::Ordering::Equal => {
                    converged = true;
                    break;
                }
                std::cmp::Ordering::Greater => {
                    delta *= 1.0 + shift;
                    if direction < 0 {
                        shift *= 0.5;
                    }
                    direction = 1;
                }
                std::cmp::Ordering::Less => {
                    delta *= 1.0 - shift;
                    if direction > 0 {
                        shift *= 0.5;
                    }
                    direction = -1;
                }
            }
        }

        if converged {
            let n = edges.len();
            if edges[n - 1] != xmax {
                if n < 2 || edges[n - 2] < xmax {
                    log::debug!(
                        "resetting final boundary {} to xmax={xmax}",
                        edges[n - 1]
                    );
                    edges[n - 1] = xmax;
                } else {
                    log::debug!("kept final boundary {} above xmax={xmax}", edges[n - 1]);
                }
            }
        }

        Ok(BinningOutcome {
            edges,
            delta,
            converged,
            iterations,
        })
    }
}

/// Result of a ragged binning request.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BinningOutcome {
    /// Generated boundaries (or centres in point mode).
    pub edges: Vec<f64>,
    /// Final step: absolute for linear, fractional for logarithmic.
    pub delta: f64,
    /// Whether the requested count was reached exactly.
    pub converged: bool,
    /// Number of solver iterations used.
    pub iterations: usize,
}

/// Generates a ragged axis for `[xmin, xmax]`.
pub fn determine_binning(
    xmin: f64,
    xmax: f64,
    n_bins: usize,
    use_log: bool,
) -> Result<BinningOutcome> {
    RaggedBinning::new(n_bins).with_log(use_log).determine(xmin, xmax)
}

/// Converts point positions into bin boundaries.
///
/// Interior boundaries are midpoints; the outer boundaries mirror the first
/// and last half-widths. A single point gets a unit-width bin.
#[must_use]
pub fn convert_to_bin_boundary(centres: &[f64]) -> Vec<f64> {
    match centres.len() {
        0 => Vec::new(),
        1 => vec![centres[0] - 0.5, centres[0] + 0.5],
        n => {
            let mut edges = Vec::with_capacity(n + 1);
            edges.push(0.0);
            edges.extend(centres.windows(2).map(|pair| 0.5 * (pair[0] + pair[1])));
            edges[0] = centres[0] - (edges[1] - centres[0]);
            edges.push(centres[n - 1] + (centres[n - 1] - edges[n - 1]));
            edges
        }
    }
}

/// Converts bin boundaries into bin centres.
#[must_use]
pub fn convert_to_bin_centre(edges: &[f64]) -> Vec<f64> {
    edges
        .windows(2)
        .map(|pair| 0.5 * (pair[0] + pair[1]))
        .collect()
}

/// Redistributes histogram counts onto new boundaries.
///
/// Each old bin contributes to a new bin in proportion to their overlap.
/// Squared errors are distributed the same way, as for Poisson counts.
/// Returns `(counts, errors)` with `x_new.len() - 1` entries.
pub fn rebin_histogram(
    x_old: &[f64],
    y_old: &[f64],
    e_old: &[f64],
    x_new: &[f64],
) -> Result<(Vec<f64>, Vec<f64>)> {
    if x_old.len() != y_old.len() + 1 {
        return Err(Error::LengthMismatch {
            expected: y_old.len() + 1,
            actual: x_old.len(),
        });
    }
    if e_old.len() != y_old.len() {
        return Err(Error::LengthMismatch {
            expected: y_old.len(),
            actual: e_old.len(),
        });
    }
    let n_new = x_new.len().saturating_sub(1);
    let mut y_new = vec![0.0; n_new];
    let mut e_new = vec![0.0; n_new];

    let mut iold = 0;
    let mut inew = 0;
    while iold < y_old.len() && inew < n_new {
        let (xo_low, xo_high) = (x_old[iold], x_old[iold + 1]);
        let (xn_low, xn_high) = (x_new[inew], x_new[inew + 1]);
        if xn_high <= xo_low {
            inew += 1;
            continue;
        }
        if xo_high <= xn_low {
            iold += 1;
            continue;
        }
        let width = xo_high - xo_low;
        if !(width > 0.0) {
            return Err(Error::InvalidBinning(format!(
                "non-positive bin width at index {iold}"
            )));
        }
        let overlap = xo_high.min(xn_high) - xo_low.max(xn_low);
        let fraction = overlap / width;
        y_new[inew] += y_old[iold] * fraction;
        e_new[inew] += e_old[iold] * e_old[iold] * fraction;

        if xn_high > xo_high {
            iold += 1;
        } else {
            inew += 1;
        }
    }
    for error in &mut e_new {
        *error = error.sqrt();
    }
    Ok((y_new, e_new))
}
