//! Parallel per-spectrum execution with aggregated failures.
//!
//! Work is split into contiguous index ranges, one per worker thread. Each
//! range gets its own context from the `init` closure and writes only the
//! output slots it owns. A failing or panicking spectrum is recorded and the
//! run continues; the failures are returned together once every spectrum has
//! been attempted.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, SpectrumFailure};

/// Thread configuration for [`ParallelSpectrumDriver`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DriverConfig {
    /// Worker threads; `None` uses the global rayon pool.
    pub parallelism: Option<usize>,
}

impl DriverConfig {
    /// Sets the worker thread count.
    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }

    /// Runs everything on the calling thread.
    #[must_use]
    pub fn serial() -> Self {
        Self {
            parallelism: Some(1),
        }
    }
}

/// Completed-spectrum counter, safe to update from any worker.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl Progress {
    /// Creates a counter with nothing to do.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
    }

    fn increment(&self) -> usize {
        self.completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Spectra finished so far in the current run.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    /// Spectra in the current run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

/// Runs a transform over every spectrum of a collection.
#[derive(Debug, Clone, Default)]
pub struct ParallelSpectrumDriver {
    config: DriverConfig,
    progress: Arc<Progress>,
}

impl ParallelSpectrumDriver {
    /// Creates a driver.
    #[must_use]
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            progress: Arc::new(Progress::new()),
        }
    }

    /// Shares a progress counter with the caller.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<Progress>) -> Self {
        self.progress = progress;
        self
    }

    /// Returns the driver configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns the progress counter.
    #[must_use]
    pub fn progress(&self) -> &Arc<Progress> {
        &self.progress
    }

    /// Calls `transform(context, index, slot)` for every slot.
    ///
    /// Slots of spectra that succeed keep their results even if others fail.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] before any work if the thread pool
    /// cannot be built, and [`Error::SpectrumFailures`] (sorted by index)
    /// after the run if any spectrum failed or panicked.
    pub fn for_each_mut<T, C, I, F>(&self, slots: &mut [T], init: I, transform: F) -> Result<()>
    where
        T: Send,
        I: Fn() -> C + Sync,
        F: Fn(&mut C, usize, &mut T) -> Result<()> + Sync,
    {
        let pool = match self.config.parallelism {
            Some(0) => {
                return Err(Error::ConfigError(
                    "parallelism must be at least one thread".into(),
                ))
            }
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| Error::ConfigError(format!("failed to create thread pool: {e}")))?,
            ),
            None => None,
        };

        self.progress.reset(slots.len());
        let mut failures = match &pool {
            Some(pool) => pool.install(|| self.run_chunks(slots, &init, &transform)),
            None => self.run_chunks(slots, &init, &transform),
        };

        if failures.is_empty() {
            return Ok(());
        }
        failures.sort_by_key(|failure| failure.index);
        log::warn!(
            "{} of {} spectra failed",
            failures.len(),
            self.progress.total()
        );
        Err(Error::SpectrumFailures(failures))
    }

    fn run_chunks<T, C, I, F>(&self, slots: &mut [T], init: &I, transform: &F) -> Vec<SpectrumFailure>
    where
        T: Send,
        I: Fn() -> C + Sync,
        F: Fn(&mut C, usize, &mut T) -> Result<()> + Sync,
    {
        if slots.is_empty() {
            return Vec::new();
        }
        let workers = rayon::current_num_threads().max(1);
        let chunk_size = slots.len().div_ceil(workers);
        let total = slots.len();
        let step = (total / 10).max(1);

        slots
            .par_chunks_mut(chunk_size)
            .enumerate()
            .flat_map_iter(|(chunk, items)| {
                let start = chunk * chunk_size;
                let mut context = init();
                let mut failures = Vec::new();
                for (offset, slot) in items.iter_mut().enumerate() {
                    let index = start + offset;
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                        transform(&mut context, index, slot)
                    }));
                    let error = match outcome {
                        Ok(Ok(())) => None,
                        Ok(Err(err)) => Some(err),
                        Err(payload) => Some(Error::WorkerPanic(panic_message(payload.as_ref()))),
                    };
                    if let Some(error) = error {
                        failures.push(SpectrumFailure {
                            index,
                            error: Box::new(error),
                        });
                    }
                    let done = self.progress.increment();
                    if done % step == 0 || done == total {
                        log::debug!("processed {done}/{total} spectra");
                    }
                }
                failures
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_slot_is_visited_once() {
        let driver = ParallelSpectrumDriver::new(DriverConfig::default().with_parallelism(4));
        let mut slots = vec![0usize; 1000];
        driver
            .for_each_mut(&mut slots, || (), |_, index, slot| {
                *slot += index + 1;
                Ok(())
            })
            .unwrap();
        assert!(slots.iter().enumerate().all(|(i, &v)| v == i + 1));
        assert_eq!(driver.progress().completed(), 1000);
        assert_eq!(driver.progress().total(), 1000);
    }

    #[test]
    fn test_failures_are_aggregated_and_partial_results_kept() {
        let driver = ParallelSpectrumDriver::new(DriverConfig::default().with_parallelism(3));
        let mut slots = vec![0.0; 20];
        let err = driver
            .for_each_mut(&mut slots, || (), |_, index, slot| {
                if index % 7 == 3 {
                    return Err(Error::Geometry(format!("detector {index} not found")));
                }
                if index == 11 {
                    panic!("bad spectrum");
                }
                *slot = 1.0;
                Ok(())
            })
            .unwrap_err();
        let indices: Vec<usize> = err.failures().iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![3, 10, 11, 17]);
        assert_eq!(
            *err.failures()[2].error,
            Error::WorkerPanic("bad spectrum".into())
        );
        assert_eq!(slots.iter().filter(|&&v| v == 1.0).count(), 16);
        assert_eq!(driver.progress().completed(), 20);
    }

    #[test]
    fn test_context_is_private_per_chunk() {
        let driver = ParallelSpectrumDriver::new(DriverConfig::serial());
        let mut slots = vec![0usize; 5];
        driver
            .for_each_mut(
                &mut slots,
                || 0usize,
                |seen, _, slot| {
                    *seen += 1;
                    *slot = *seen;
                    Ok(())
                },
            )
            .unwrap();
        assert_eq!(slots, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_zero_threads_fails_before_work() {
        let driver = ParallelSpectrumDriver::new(DriverConfig::default().with_parallelism(0));
        let mut slots = vec![0; 3];
        let err = driver
            .for_each_mut(&mut slots, || (), |_, _, slot| {
                *slot = 1;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, Error::ConfigError(_)));
        assert_eq!(slots, vec![0, 0, 0]);
    }

    #[test]
    fn test_empty_run() {
        let driver = ParallelSpectrumDriver::default();
        let mut slots: Vec<u8> = Vec::new();
        assert!(driver
            .for_each_mut(&mut slots, || (), |_, _, _| Ok(()))
            .is_ok());
    }
}
