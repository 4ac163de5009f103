//! Signal strength normalization.
//!
//! Raw RSSI readings are mapped to a proportion of the range observed since
//! the last reset, so the strongest tag seen so far reads as 1.0 and the
//! weakest as 0.0.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Expected weakest RSSI before any reading has been seen, in dBm.
pub const DEFAULT_MINIMUM_RSSI: i32 = -100;

/// Expected strongest RSSI before any reading has been seen, in dBm.
pub const DEFAULT_MAXIMUM_RSSI: i32 = -30;

/// Output when the observed range has collapsed to a single value.
const COLLAPSED_RANGE_SIGNAL: f64 = 0.5;

/// Seed bounds for a [`SignalNormalizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalRange {
    pub minimum: i32,
    pub maximum: i32,
}

impl SignalRange {
    /// Reject a range whose minimum exceeds its maximum.
    pub fn validate(&self) -> Result<()> {
        if self.minimum > self.maximum {
            return Err(Error::invalid_config(format!(
                "signal minimum ({}) is above maximum ({})",
                self.minimum, self.maximum
            )));
        }
        Ok(())
    }
}

impl Default for SignalRange {
    fn default() -> Self {
        Self {
            minimum: DEFAULT_MINIMUM_RSSI,
            maximum: DEFAULT_MAXIMUM_RSSI,
        }
    }
}

/// Maps raw signal readings to `[0, 1]`.
pub trait SignalNormalization: Send {
    /// Forget the observed range.
    fn reset(&mut self);

    /// Normalize a reading, widening the observed range if needed. A
    /// missing reading yields 0.0.
    fn normalize(&mut self, rssi: Option<i32>) -> f64;
}

/// Running min/max normalizer.
#[derive(Debug, Clone)]
pub struct SignalNormalizer {
    seed: SignalRange,
    minimum_seen: i32,
    maximum_seen: i32,
}

impl SignalNormalizer {
    /// Create a normalizer seeded with the default range.
    pub fn new() -> Self {
        Self::with_range(SignalRange::default())
    }

    /// Create a normalizer seeded with `range`.
    pub fn with_range(range: SignalRange) -> Self {
        Self {
            seed: range,
            minimum_seen: range.minimum,
            maximum_seen: range.maximum,
        }
    }

    /// Weakest reading seen since the last reset (or the seed).
    pub fn minimum_seen(&self) -> i32 {
        self.minimum_seen
    }

    /// Strongest reading seen since the last reset (or the seed).
    pub fn maximum_seen(&self) -> i32 {
        self.maximum_seen
    }
}

impl Default for SignalNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalNormalization for SignalNormalizer {
    fn reset(&mut self) {
        self.minimum_seen = self.seed.minimum;
        self.maximum_seen = self.seed.maximum;
    }

    fn normalize(&mut self, rssi: Option<i32>) -> f64 {
        let Some(rssi) = rssi else {
            return 0.0;
        };

        // A single reading widens at most one bound.
        if rssi > self.maximum_seen {
            self.maximum_seen = rssi;
        } else if rssi < self.minimum_seen {
            self.minimum_seen = rssi;
        }

        let span = i64::from(self.maximum_seen) - i64::from(self.minimum_seen);
        if span == 0 {
            return COLLAPSED_RANGE_SIGNAL;
        }
        (i64::from(rssi) - i64::from(self.minimum_seen)) as f64 / span as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_map_to_zero_and_one() {
        let mut signal = SignalNormalizer::new();
        assert_eq!(signal.normalize(Some(-100)), 0.0);
        assert_eq!(signal.normalize(Some(-30)), 1.0);
        assert!((signal.normalize(Some(-65)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_missing_reading_is_zero() {
        let mut signal = SignalNormalizer::new();
        assert_eq!(signal.normalize(None), 0.0);
        assert_eq!(signal.minimum_seen(), DEFAULT_MINIMUM_RSSI);
        assert_eq!(signal.maximum_seen(), DEFAULT_MAXIMUM_RSSI);
    }

    #[test]
    fn test_new_extremes_widen_range() {
        let mut signal = SignalNormalizer::new();
        assert_eq!(signal.normalize(Some(-20)), 1.0);
        assert_eq!(signal.maximum_seen(), -20);

        assert_eq!(signal.normalize(Some(-110)), 0.0);
        assert_eq!(signal.minimum_seen(), -110);

        assert!((signal.normalize(Some(-65)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset_restores_seed() {
        let mut signal = SignalNormalizer::new();
        signal.normalize(Some(-10));
        signal.reset();
        assert_eq!(signal.maximum_seen(), DEFAULT_MAXIMUM_RSSI);
        assert_eq!(signal.normalize(Some(-30)), 1.0);
    }

    #[test]
    fn test_collapsed_range_is_half() {
        let mut signal = SignalNormalizer::with_range(SignalRange {
            minimum: -50,
            maximum: -50,
        });
        assert_eq!(signal.normalize(Some(-50)), 0.5);
        assert_eq!(signal.normalize(Some(-40)), 1.0);
    }

    #[test]
    fn test_range_validation() {
        assert!(SignalRange::default().validate().is_ok());
        let range = SignalRange {
            minimum: -20,
            maximum: -80,
        };
        assert!(matches!(range.validate(), Err(Error::InvalidConfig(_))));
    }
}
