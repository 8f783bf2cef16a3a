//! Per-spectrum event storage.
//!
//! An [`EventList`] owns exactly one contiguous vector of event records,
//! selected by [`EventStorage`]. Generic helpers over [`Event`] do the work,
//! so an operation is monomorphised once per variant rather than dispatched
//! per event.
#![allow(
    clippy::float_cmp,
    clippy::cast_precision_loss,
    clippy::neg_cmp_op_on_partial_ord
)]

use std::collections::BTreeSet;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::{
    Event, EventType, PulseTime, SortOrder, TofEvent, WeightedEvent, WeightedEventNoTime,
};
use crate::geometry::DetectorId;

/// Contiguous storage for one event variant.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventStorage {
    /// Raw events.
    Tof(Vec<TofEvent>),
    /// Weighted events with pulse time.
    Weighted(Vec<WeightedEvent>),
    /// Weighted events without pulse time.
    WeightedNoTime(Vec<WeightedEventNoTime>),
}

impl Default for EventStorage {
    fn default() -> Self {
        Self::Tof(Vec::new())
    }
}

/// Runs `$body` with `$events` bound to the vector of whichever variant is stored.
macro_rules! with_events {
    ($storage:expr, $events:ident => $body:expr) => {
        match $storage {
            EventStorage::Tof($events) => $body,
            EventStorage::Weighted($events) => $body,
            EventStorage::WeightedNoTime($events) => $body,
        }
    };
}

/// Records whose weight can be rewritten in place.
trait WeightedRecord: Event {
    fn scale(&mut self, value: f64, value_squared: f64, error_squared: f64);
}

impl WeightedRecord for WeightedEvent {
    #[inline]
    fn scale(&mut self, value: f64, value_squared: f64, error_squared: f64) {
        self.error_squared =
            self.error_squared * value_squared + error_squared * self.weight * self.weight;
        self.weight *= value;
    }
}

impl WeightedRecord for WeightedEventNoTime {
    #[inline]
    fn scale(&mut self, value: f64, value_squared: f64, error_squared: f64) {
        self.error_squared =
            self.error_squared * value_squared + error_squared * self.weight * self.weight;
        self.weight *= value;
    }
}

/// An ordered collection of events for one spectrum.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EventList {
    events: EventStorage,
    order: SortOrder,
    detector_ids: BTreeSet<DetectorId>,
}

impl From<Vec<TofEvent>> for EventList {
    fn from(events: Vec<TofEvent>) -> Self {
        Self::from_storage(EventStorage::Tof(events))
    }
}

impl From<Vec<WeightedEvent>> for EventList {
    fn from(events: Vec<WeightedEvent>) -> Self {
        Self::from_storage(EventStorage::Weighted(events))
    }
}

impl From<Vec<WeightedEventNoTime>> for EventList {
    fn from(events: Vec<WeightedEventNoTime>) -> Self {
        Self::from_storage(EventStorage::WeightedNoTime(events))
    }
}

impl EventList {
    /// Creates an empty list of raw events.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a list from existing storage. The order is unknown.
    #[must_use]
    pub fn from_storage(events: EventStorage) -> Self {
        Self {
            events,
            order: SortOrder::Unsorted,
            detector_ids: BTreeSet::new(),
        }
    }

    /// Attaches the set of detectors that contributed to this list.
    #[must_use]
    pub fn with_detector_ids<I: IntoIterator<Item = DetectorId>>(mut self, ids: I) -> Self {
        self.detector_ids = ids.into_iter().collect();
        self
    }

    /// Returns the detectors that contributed to this list.
    #[must_use]
    pub fn detector_ids(&self) -> &BTreeSet<DetectorId> {
        &self.detector_ids
    }

    /// Returns the underlying storage.
    #[must_use]
    pub fn storage(&self) -> &EventStorage {
        &self.events
    }

    /// Returns the stored event variant.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match self.events {
            EventStorage::Tof(_) => EventType::Tof,
            EventStorage::Weighted(_) => EventType::Weighted,
            EventStorage::WeightedNoTime(_) => EventType::WeightedNoTime,
        }
    }

    /// Returns the current sort state.
    #[must_use]
    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    /// Returns the number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        with_events!(&self.events, events => events.len())
    }

    /// Returns true if the list holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes all events, keeping the variant and detector IDs.
    pub fn clear(&mut self) {
        with_events!(&mut self.events, events => events.clear());
        self.order = SortOrder::Unsorted;
    }

    /// Appends a raw event, converting it to the stored variant.
    pub fn push(&mut self, event: TofEvent) {
        match &mut self.events {
            EventStorage::Tof(events) => events.push(event),
            EventStorage::Weighted(events) => events.push(event.into()),
            EventStorage::WeightedNoTime(events) => events.push(event.into()),
        }
        self.order = SortOrder::Unsorted;
    }

    /// Appends a weighted event, promoting a raw list to weighted first.
    pub fn push_weighted(&mut self, event: WeightedEvent) {
        if self.event_type() == EventType::Tof {
            self.promote(EventType::Weighted);
        }
        match &mut self.events {
            EventStorage::Weighted(events) => events.push(event),
            EventStorage::WeightedNoTime(events) => events.push(event.into()),
            EventStorage::Tof(_) => {}
        }
        self.order = SortOrder::Unsorted;
    }

    /// Converts the list to a more general variant.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPromotion`] if `target` is less general than
    /// the current variant; pulse times once dropped cannot be recovered.
    pub fn switch_to(&mut self, target: EventType) -> Result<()> {
        let current = self.event_type();
        if !current.can_promote_to(target) {
            return Err(Error::InvalidPromotion {
                from: current,
                to: target,
            });
        }
        self.promote(target);
        Ok(())
    }

    fn promote(&mut self, target: EventType) {
        let events = std::mem::take(&mut self.events);
        self.events = match (events, target) {
            (EventStorage::Tof(events), EventType::Weighted) => {
                EventStorage::Weighted(events.into_iter().map(WeightedEvent::from).collect())
            }
            (EventStorage::Tof(events), EventType::WeightedNoTime) => EventStorage::WeightedNoTime(
                events.into_iter().map(WeightedEventNoTime::from).collect(),
            ),
            (EventStorage::Weighted(events), EventType::WeightedNoTime) => {
                EventStorage::WeightedNoTime(
                    events.into_iter().map(WeightedEventNoTime::from).collect(),
                )
            }
            (unchanged, _) => unchanged,
        };
    }

    /// Sorts the events. A no-op if the list is already in `order`.
    ///
    /// Sorting is stable, so events with equal keys keep their relative order.
    /// Lists without pulse times are trivially ordered by pulse time.
    pub fn sort(&mut self, order: SortOrder) {
        if order == self.order {
            return;
        }
        match order {
            SortOrder::Unsorted => return,
            SortOrder::SortedByTof => {
                with_events!(&mut self.events, events => {
                    events.sort_by(|a, b| a.tof().total_cmp(&b.tof()));
                });
            }
            SortOrder::SortedByPulseTime => {
                with_events!(&mut self.events, events => {
                    events.sort_by_key(Event::pulse_time);
                });
            }
        }
        self.order = order;
    }

    /// Multiplies every TOF by `factor`.
    pub fn scale_tof(&mut self, factor: f64) {
        self.convert_tof(factor, 1.0);
    }

    /// Replaces every TOF with `factor * tof^power`.
    ///
    /// A decreasing mapping (`factor * power < 0`) invalidates TOF ordering.
    pub fn convert_tof(&mut self, factor: f64, power: f64) {
        if power == 1.0 {
            with_events!(&mut self.events, events => {
                for event in events.iter_mut() {
                    *event.tof_mut() *= factor;
                }
            });
        } else {
            with_events!(&mut self.events, events => {
                for event in events.iter_mut() {
                    let tof = event.tof_mut();
                    *tof = factor * tof.powf(power);
                }
            });
        }
        if factor * power < 0.0 && self.order == SortOrder::SortedByTof {
            self.order = SortOrder::Unsorted;
        }
    }

    /// Replaces every TOF with `convert(tof)`.
    ///
    /// A TOF-sorted list stays tagged as sorted only if the mapped values are
    /// still ascending.
    pub fn convert_tof_with<F>(&mut self, convert: F)
    where
        F: Fn(f64) -> f64,
    {
        with_events!(&mut self.events, events => {
            for event in events.iter_mut() {
                let tof = event.tof_mut();
                *tof = convert(*tof);
            }
        });
        if self.order == SortOrder::SortedByTof && !self.is_ascending_tof() {
            self.order = SortOrder::Unsorted;
        }
    }

    fn is_ascending_tof(&self) -> bool {
        with_events!(&self.events, events => {
            events.windows(2).all(|pair| pair[0].tof() <= pair[1].tof())
        })
    }

    /// Histograms the events into `edges`, returning `(counts, errors)`.
    ///
    /// Bin `i` collects events with `edges[i] <= tof < edges[i + 1]`. Counts
    /// are summed weights and errors are the root of the summed squared
    /// weight errors. Edges must be ascending; fewer than two edges give
    /// empty output.
    #[must_use]
    pub fn generate_histogram(&self, edges: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let n_bins = edges.len().saturating_sub(1);
        let mut counts = vec![0.0; n_bins];
        let mut errors = vec![0.0; n_bins];
        if n_bins == 0 {
            return (counts, errors);
        }
        let sorted = self.order == SortOrder::SortedByTof;
        with_events!(&self.events, events => {
            if sorted {
                histogram_sorted(events, edges, &mut counts, &mut errors);
            } else {
                histogram_unsorted(events, edges, &mut counts, &mut errors);
            }
        });
        for error in &mut errors {
            *error = error.sqrt();
        }
        (counts, errors)
    }

    /// Merges events closer than `tolerance` in TOF into weighted events
    /// without pulse time.
    ///
    /// The list is sorted by TOF first. Each run starts at an event and takes
    /// every following event whose TOF is less than `tolerance` above the
    /// run's first TOF. The merged event has the weight-averaged TOF, the
    /// summed weight and the summed squared error.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] for a negative or non-finite tolerance.
    pub fn compress(&mut self, tolerance: f64) -> Result<()> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(Error::ConfigError(format!(
                "compression tolerance must be a non-negative number, got {tolerance}"
            )));
        }
        self.sort(SortOrder::SortedByTof);
        let compressed = with_events!(&self.events, events => compress_sorted(events, tolerance));
        self.events = EventStorage::WeightedNoTime(compressed);
        Ok(())
    }

    /// Multiplies every weight by `value` with uncertainty `error`.
    ///
    /// Squared errors propagate as `e² v² + σ² w²`. Raw lists become weighted.
    pub fn multiply(&mut self, value: f64, error: f64) {
        if value == 1.0 && error == 0.0 {
            return;
        }
        if self.event_type() == EventType::Tof {
            self.promote(EventType::Weighted);
        }
        let value_squared = value * value;
        let error_squared = error * error;
        match &mut self.events {
            EventStorage::Weighted(events) => scale_weights(events, value, value_squared, error_squared),
            EventStorage::WeightedNoTime(events) => {
                scale_weights(events, value, value_squared, error_squared);
            }
            EventStorage::Tof(_) => {}
        }
    }

    /// Removes events with `min <= tof <= max`, returning how many were removed.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] if `min > max`.
    pub fn mask_tof(&mut self, min: f64, max: f64) -> Result<usize> {
        if min > max {
            return Err(Error::ConfigError(format!(
                "mask range is inverted: [{min}, {max}]"
            )));
        }
        let before = self.len();
        with_events!(&mut self.events, events => {
            events.retain(|event| event.tof() < min || event.tof() > max);
        });
        Ok(before - self.len())
    }

    /// Keeps only events with `min <= tof <= max`, returning how many were dropped.
    pub fn retain_tof_within(&mut self, min: f64, max: f64) -> usize {
        let before = self.len();
        with_events!(&mut self.events, events => {
            events.retain(|event| event.tof() >= min && event.tof() <= max);
        });
        before - self.len()
    }

    /// Returns a new list with the events whose pulse time is in `[start, stop)`.
    ///
    /// # Errors
    /// Returns [`Error::NoPulseTime`] for lists without pulse times.
    pub fn filter_by_pulse_time(&self, start: PulseTime, stop: PulseTime) -> Result<EventList> {
        let in_window = |time: PulseTime| time >= start && time < stop;
        let events = match &self.events {
            EventStorage::Tof(events) => EventStorage::Tof(
                events
                    .iter()
                    .filter(|event| in_window(event.pulse_time))
                    .copied()
                    .collect(),
            ),
            EventStorage::Weighted(events) => EventStorage::Weighted(
                events
                    .iter()
                    .filter(|event| in_window(event.pulse_time))
                    .copied()
                    .collect(),
            ),
            EventStorage::WeightedNoTime(_) => return Err(Error::NoPulseTime),
        };
        Ok(EventList {
            events,
            order: self.order,
            detector_ids: self.detector_ids.clone(),
        })
    }

    /// Appends all events of `other`, promoting to the more general variant.
    pub fn append(&mut self, other: &EventList) {
        if other.is_empty() {
            return;
        }
        let target = self.event_type().max(other.event_type());
        self.promote(target);
        match (&mut self.events, &other.events) {
            (EventStorage::Tof(events), EventStorage::Tof(more)) => events.extend_from_slice(more),
            (EventStorage::Weighted(events), EventStorage::Tof(more)) => {
                events.extend(more.iter().copied().map(WeightedEvent::from));
            }
            (EventStorage::Weighted(events), EventStorage::Weighted(more)) => {
                events.extend_from_slice(more);
            }
            (EventStorage::WeightedNoTime(events), EventStorage::Tof(more)) => {
                events.extend(more.iter().copied().map(WeightedEventNoTime::from));
            }
            (EventStorage::WeightedNoTime(events), EventStorage::Weighted(more)) => {
                events.extend(more.iter().copied().map(WeightedEventNoTime::from));
            }
            (EventStorage::WeightedNoTime(events), EventStorage::WeightedNoTime(more)) => {
                events.extend_from_slice(more);
            }
            // Excluded by the promotion above.
            (EventStorage::Tof(_) | EventStorage::Weighted(_), _) => {}
        }
        self.detector_ids.extend(other.detector_ids.iter().copied());
        self.order = SortOrder::Unsorted;
    }

    /// Sums weights of events with `min <= tof < max`, returning `(sum, error)`.
    #[must_use]
    pub fn integrate(&self, min: f64, max: f64) -> (f64, f64) {
        let (sum, error_squared) = with_events!(&self.events, events => {
            events
                .iter()
                .filter(|event| event.tof() >= min && event.tof() < max)
                .fold((0.0, 0.0), |(sum, err), event| {
                    (sum + event.weight(), err + event.error_squared())
                })
        });
        (sum, error_squared.sqrt())
    }

    /// Returns the smallest and largest TOF, or `None` for an empty list.
    #[must_use]
    pub fn tof_range(&self) -> Option<(f64, f64)> {
        if self.is_empty() {
            return None;
        }
        with_events!(&self.events, events => {
            if self.order == SortOrder::SortedByTof {
                Some((events[0].tof(), events[events.len() - 1].tof()))
            } else {
                Some(events.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), event| {
                    (lo.min(event.tof()), hi.max(event.tof()))
                }))
            }
        })
    }

    /// Returns all TOF values in storage order.
    #[must_use]
    pub fn tofs(&self) -> Vec<f64> {
        with_events!(&self.events, events => events.iter().map(Event::tof).collect())
    }

    /// Returns all weights in storage order.
    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        with_events!(&self.events, events => events.iter().map(Event::weight).collect())
    }

    /// Returns all weight errors in storage order.
    #[must_use]
    pub fn errors(&self) -> Vec<f64> {
        with_events!(&self.events, events => events.iter().map(Event::error).collect())
    }

    /// Returns all pulse times in storage order.
    ///
    /// # Errors
    /// Returns [`Error::NoPulseTime`] for lists without pulse times.
    pub fn pulse_times(&self) -> Result<Vec<PulseTime>> {
        match &self.events {
            EventStorage::Tof(events) => Ok(events.iter().map(|e| e.pulse_time).collect()),
            EventStorage::Weighted(events) => Ok(events.iter().map(|e| e.pulse_time).collect()),
            EventStorage::WeightedNoTime(_) => Err(Error::NoPulseTime),
        }
    }
}

/// Adds TOF-ordered events to their bins.
///
/// Each bin sums its weights in the order given, so every caller passes
/// events in stable TOF order to get bit-identical totals.
fn accumulate_ascending<'a, E, I>(
    events: I,
    edges: &[f64],
    counts: &mut [f64],
    errors: &mut [f64],
) where
    E: Event + 'a,
    I: IntoIterator<Item = &'a E>,
{
    let first = edges[0];
    let last = edges[edges.len() - 1];
    let mut bin = 0;
    for event in events {
        let tof = event.tof();
        if !(tof >= first) {
            continue;
        }
        if !(tof < last) {
            break;
        }
        while edges[bin + 1] <= tof {
            bin += 1;
        }
        counts[bin] += event.weight();
        errors[bin] += event.error_squared();
    }
}

fn histogram_sorted<E: Event>(
    events: &[E],
    edges: &[f64],
    counts: &mut [f64],
    errors: &mut [f64],
) {
    let start = events.partition_point(|event| event.tof() < edges[0]);
    accumulate_ascending(&events[start..], edges, counts, errors);
}

/// Bins through a stable TOF ordering of the in-range events, matching the
/// summation order of a sorted copy of the same list.
fn histogram_unsorted<E: Event>(
    events: &[E],
    edges: &[f64],
    counts: &mut [f64],
    errors: &mut [f64],
) {
    let first = edges[0];
    let last = edges[edges.len() - 1];
    let mut in_range: Vec<&E> = events
        .iter()
        .filter(|event| event.tof() >= first && event.tof() < last)
        .collect();
    in_range.sort_by(|a, b| a.tof().total_cmp(&b.tof()));
    accumulate_ascending(in_range, edges, counts, errors);
}

fn compress_sorted<E: Event>(events: &[E], tolerance: f64) -> Vec<WeightedEventNoTime> {
    struct Run {
        start: f64,
        weight: f64,
        error_squared: f64,
        weighted_tof: f64,
        plain_tof: f64,
        count: usize,
    }

    impl Run {
        fn open<E: Event>(event: &E) -> Self {
            Self {
                start: event.tof(),
                weight: event.weight(),
                error_squared: event.error_squared(),
                weighted_tof: event.tof() * event.weight(),
                plain_tof: event.tof(),
                count: 1,
            }
        }

        fn add<E: Event>(&mut self, event: &E) {
            self.weight += event.weight();
            self.error_squared += event.error_squared();
            self.weighted_tof += event.tof() * event.weight();
            self.plain_tof += event.tof();
            self.count += 1;
        }

        fn close(&self) -> WeightedEventNoTime {
            let tof = if self.weight == 0.0 {
                self.plain_tof / self.count as f64
            } else {
                self.weighted_tof / self.weight
            };
            WeightedEventNoTime::new(tof, self.weight, self.error_squared)
        }
    }

    let mut compressed = Vec::new();
    let mut iter = events.iter();
    let Some(first) = iter.next() else {
        return compressed;
    };
    let mut run = Run::open(first);
    for event in iter {
        if event.tof() - run.start < tolerance {
            run.add(event);
        } else {
            compressed.push(run.close());
            run = Run::open(event);
        }
    }
    compressed.push(run.close());
    compressed
}

fn scale_weights<E: WeightedRecord>(
    events: &mut [E],
    value: f64,
    value_squared: f64,
    error_squared: f64,
) {
    for event in events {
        event.scale(value, value_squared, error_squared);
    }
}
