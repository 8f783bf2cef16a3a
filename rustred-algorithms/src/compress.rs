//! CompressEvents: merge events that are close in TOF.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use rustred_core::{Error, ParallelSpectrumDriver, Result, SpectrumCollection};

use crate::algorithm::{collect_failures, AlgorithmOutput};
use crate::SpectrumAlgorithm;

/// CompressEvents configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompressEventsConfig {
    /// Maximum TOF distance from the first event of a merged run.
    pub tolerance: f64,
}

impl Default for CompressEventsConfig {
    fn default() -> Self {
        Self { tolerance: 0.01 }
    }
}

/// Compresses every event list into weighted events without pulse time.
#[derive(Clone, Debug, Default)]
pub struct CompressEvents {
    config: CompressEventsConfig,
}

impl CompressEvents {
    /// Create with configuration.
    #[must_use]
    pub fn new(config: CompressEventsConfig) -> Self {
        Self { config }
    }
}

impl SpectrumAlgorithm for CompressEvents {
    fn name(&self) -> &'static str {
        "CompressEvents"
    }

    fn execute(
        &self,
        input: &SpectrumCollection,
        driver: &ParallelSpectrumDriver,
    ) -> Result<AlgorithmOutput> {
        let tolerance = self.config.tolerance;
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(Error::ConfigError(format!(
                "compression tolerance must be a non-negative number, got {tolerance}"
            )));
        }
        if !input.is_event() {
            return Err(Error::WrongStorage("event"));
        }
        let mut output = SpectrumCollection::derive_from(input, true);
        let before: usize = (0..input.number_of_spectra())
            .filter_map(|index| input.events(index).ok())
            .map(|list| list.len())
            .sum();
        let outcome = driver.for_each_mut(output.event_lists_mut()?, || (), |_, _, list| {
            list.compress(tolerance)
        });
        let failures = collect_failures(outcome)?;
        let after: usize = (0..output.number_of_spectra())
            .filter_map(|index| output.events(index).ok())
            .map(|list| list.len())
            .sum();
        log::debug!("compressed {before} events into {after}");
        Ok(AlgorithmOutput::new(output, failures))
    }
}
