//! Event record types for time-of-flight detector data.
//!
//! Three fixed-layout records exist. An [`crate::EventList`] stores exactly one
//! of them in a contiguous vector; the [`Event`] trait gives generic code a
//! uniform view without per-event dispatch.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Absolute pulse time in nanoseconds since the run epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PulseTime(pub i64);

impl PulseTime {
    /// Creates a pulse time from nanoseconds.
    #[inline]
    #[must_use]
    pub fn new(nanoseconds: i64) -> Self {
        Self(nanoseconds)
    }

    /// Returns the raw nanosecond value.
    #[inline]
    #[must_use]
    pub fn as_nanos(&self) -> i64 {
        self.0
    }
}

/// A raw detector event: time-of-flight plus the pulse it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TofEvent {
    /// Time-of-flight (microseconds, or the current X unit after conversion).
    pub tof: f64,
    /// Pulse time.
    pub pulse_time: PulseTime,
}

impl TofEvent {
    /// Creates a new event.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, pulse_time: PulseTime) -> Self {
        Self { tof, pulse_time }
    }
}

/// An event carrying a weight and squared weight error.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEvent {
    /// Time-of-flight.
    pub tof: f64,
    /// Pulse time.
    pub pulse_time: PulseTime,
    /// Weight.
    pub weight: f64,
    /// Squared error of the weight.
    pub error_squared: f64,
}

impl WeightedEvent {
    /// Creates a new weighted event.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, pulse_time: PulseTime, weight: f64, error_squared: f64) -> Self {
        Self {
            tof,
            pulse_time,
            weight,
            error_squared,
        }
    }
}

impl From<TofEvent> for WeightedEvent {
    fn from(event: TofEvent) -> Self {
        Self::new(event.tof, event.pulse_time, 1.0, 1.0)
    }
}

/// A weighted event without pulse time. The most compact representation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEventNoTime {
    /// Time-of-flight.
    pub tof: f64,
    /// Weight.
    pub weight: f64,
    /// Squared error of the weight.
    pub error_squared: f64,
}

impl WeightedEventNoTime {
    /// Creates a new weighted event without pulse time.
    #[inline]
    #[must_use]
    pub fn new(tof: f64, weight: f64, error_squared: f64) -> Self {
        Self {
            tof,
            weight,
            error_squared,
        }
    }
}

impl From<TofEvent> for WeightedEventNoTime {
    fn from(event: TofEvent) -> Self {
        Self::new(event.tof, 1.0, 1.0)
    }
}

impl From<WeightedEvent> for WeightedEventNoTime {
    fn from(event: WeightedEvent) -> Self {
        Self::new(event.tof, event.weight, event.error_squared)
    }
}

/// Common view over the three event records.
pub trait Event: Copy + Send + Sync {
    /// Returns the time-of-flight.
    fn tof(&self) -> f64;

    /// Returns a mutable reference to the time-of-flight.
    fn tof_mut(&mut self) -> &mut f64;

    /// Returns the weight (1.0 for raw events).
    fn weight(&self) -> f64;

    /// Returns the squared weight error (1.0 for raw events).
    fn error_squared(&self) -> f64;

    /// Returns the pulse time, if the record carries one.
    fn pulse_time(&self) -> Option<PulseTime>;

    /// Returns the weight error.
    #[inline]
    fn error(&self) -> f64 {
        self.error_squared().sqrt()
    }
}

impl Event for TofEvent {
    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn tof_mut(&mut self) -> &mut f64 {
        &mut self.tof
    }

    #[inline]
    fn weight(&self) -> f64 {
        1.0
    }

    #[inline]
    fn error_squared(&self) -> f64 {
        1.0
    }

    #[inline]
    fn pulse_time(&self) -> Option<PulseTime> {
        Some(self.pulse_time)
    }
}

impl Event for WeightedEvent {
    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn tof_mut(&mut self) -> &mut f64 {
        &mut self.tof
    }

    #[inline]
    fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    fn error_squared(&self) -> f64 {
        self.error_squared
    }

    #[inline]
    fn pulse_time(&self) -> Option<PulseTime> {
        Some(self.pulse_time)
    }
}

impl Event for WeightedEventNoTime {
    #[inline]
    fn tof(&self) -> f64 {
        self.tof
    }

    #[inline]
    fn tof_mut(&mut self) -> &mut f64 {
        &mut self.tof
    }

    #[inline]
    fn weight(&self) -> f64 {
        self.weight
    }

    #[inline]
    fn error_squared(&self) -> f64 {
        self.error_squared
    }

    #[inline]
    fn pulse_time(&self) -> Option<PulseTime> {
        None
    }
}

/// Which record variant an event list holds.
///
/// Variants are ordered by generality: `Tof < Weighted < WeightedNoTime`.
/// A list may only move forward in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventType {
    /// [`TofEvent`] records.
    Tof,
    /// [`WeightedEvent`] records.
    Weighted,
    /// [`WeightedEventNoTime`] records.
    WeightedNoTime,
}

impl EventType {
    /// Returns true if a list of this type may be converted to `target`.
    #[inline]
    #[must_use]
    pub fn can_promote_to(self, target: Self) -> bool {
        target >= self
    }

    /// Returns true if records of this type carry a pulse time.
    #[inline]
    #[must_use]
    pub fn has_pulse_time(self) -> bool {
        self != Self::WeightedNoTime
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tof => "TOF",
            Self::Weighted => "WEIGHTED",
            Self::WeightedNoTime => "WEIGHTED_NOTIME",
        };
        f.write_str(name)
    }
}

/// Sort state of an event list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SortOrder {
    /// No known order.
    #[default]
    Unsorted,
    /// Ascending time-of-flight.
    SortedByTof,
    /// Ascending pulse time.
    SortedByPulseTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_event_has_unit_weight() {
        let event = TofEvent::new(12.5, PulseTime::new(1_000));
        assert!((event.weight() - 1.0).abs() < f64::EPSILON);
        assert!((event.error() - 1.0).abs() < f64::EPSILON);
        assert_eq!(event.pulse_time(), Some(PulseTime::new(1_000)));
    }

    #[test]
    fn test_promotion_drops_pulse_time() {
        let weighted = WeightedEvent::new(3.0, PulseTime::new(42), 2.0, 4.0);
        let compact = WeightedEventNoTime::from(weighted);
        assert_eq!(compact.pulse_time(), None);
        assert!((compact.error() - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_promotion_order() {
        assert!(EventType::Tof.can_promote_to(EventType::Weighted));
        assert!(EventType::Weighted.can_promote_to(EventType::WeightedNoTime));
        assert!(EventType::Weighted.can_promote_to(EventType::Weighted));
        assert!(!EventType::WeightedNoTime.can_promote_to(EventType::Tof));
        assert!(!EventType::Weighted.can_promote_to(EventType::Tof));
    }
}
