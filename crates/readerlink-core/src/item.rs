//! A uniquely tracked scanned identity.

use std::fmt;

use time::OffsetDateTime;

/// Signal value of an item that has never been seen with a reading.
///
/// Distinct from 0.0, which is a reading at the bottom of the observed
/// range.
pub const NO_SIGNAL: f64 = -0.0001;

/// One unique tag or barcode with seen-count and timing.
///
/// Created on the first observation of an identifier; every observation,
/// including the first, is recorded with [`IdentifiedItem::seen`].
#[derive(Debug, Clone, PartialEq)]
pub struct IdentifiedItem {
    identifier: String,
    source: Option<String>,
    seen_count: u32,
    first_seen: Option<OffsetDateTime>,
    last_seen: Option<OffsetDateTime>,
    normalized_signal: f64,
    channel_frequency: Option<i32>,
    phase: Option<i32>,
}

impl IdentifiedItem {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            source: None,
            seen_count: 0,
            first_seen: None,
            last_seen: None,
            normalized_signal: NO_SIGNAL,
            channel_frequency: None,
            phase: None,
        }
    }

    /// Create an item tagged with where it came from (e.g. `"host"`).
    pub fn with_source(identifier: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Self::new(identifier)
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn seen_count(&self) -> u32 {
        self.seen_count
    }

    pub fn first_seen(&self) -> Option<OffsetDateTime> {
        self.first_seen
    }

    pub fn last_seen(&self) -> Option<OffsetDateTime> {
        self.last_seen
    }

    /// Normalized signal in `[0, 1]`, or [`NO_SIGNAL`].
    pub fn normalized_signal(&self) -> f64 {
        self.normalized_signal
    }

    pub fn has_signal(&self) -> bool {
        self.normalized_signal != NO_SIGNAL
    }

    pub fn channel_frequency(&self) -> Option<i32> {
        self.channel_frequency
    }

    pub fn phase(&self) -> Option<i32> {
        self.phase
    }

    /// Record an observation. A missing timestamp means now.
    pub fn seen(&mut self, timestamp: Option<OffsetDateTime>) {
        let timestamp = timestamp.unwrap_or_else(OffsetDateTime::now_utc);
        self.seen_count = self.seen_count.saturating_add(1);
        self.last_seen = Some(timestamp);
        if self.first_seen.is_none() {
            self.first_seen = Some(timestamp);
        }
    }

    /// Set the normalized signal, clamped to `[0, 1]` unless it is
    /// [`NO_SIGNAL`].
    pub fn set_normalized_signal(&mut self, signal: f64) {
        self.normalized_signal = if signal == NO_SIGNAL {
            NO_SIGNAL
        } else {
            signal.clamp(0.0, 1.0)
        };
    }

    pub fn set_channel_frequency(&mut self, channel_frequency: i32) {
        self.channel_frequency = Some(channel_frequency);
    }

    pub fn set_phase(&mut self, phase: i32) {
        self.phase = Some(phase);
    }
}

impl fmt::Display for IdentifiedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_signal() {
            write!(
                f,
                "{} {} {}%",
                self.identifier,
                self.seen_count,
                self.normalized_signal * 100.0
            )
        } else {
            write!(f, "{} {}", self.identifier, self.seen_count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_seen_tracks_first_and_last() {
        let mut item = IdentifiedItem::new("3008");
        item.seen(Some(datetime!(2026-03-01 10:00 UTC)));
        item.seen(Some(datetime!(2026-03-01 10:05 UTC)));

        assert_eq!(item.seen_count(), 2);
        assert_eq!(item.first_seen(), Some(datetime!(2026-03-01 10:00 UTC)));
        assert_eq!(item.last_seen(), Some(datetime!(2026-03-01 10:05 UTC)));
    }

    #[test]
    fn test_seen_without_timestamp_uses_now() {
        let before = OffsetDateTime::now_utc();
        let mut item = IdentifiedItem::new("3008");
        item.seen(None);
        let first = item.first_seen().unwrap();
        assert!(first >= before);
        assert_eq!(item.first_seen(), item.last_seen());
    }

    #[test]
    fn test_signal_clamps_except_sentinel() {
        let mut item = IdentifiedItem::new("3008");
        assert!(!item.has_signal());

        item.set_normalized_signal(1.7);
        assert_eq!(item.normalized_signal(), 1.0);
        item.set_normalized_signal(-0.3);
        assert_eq!(item.normalized_signal(), 0.0);
        item.set_normalized_signal(NO_SIGNAL);
        assert_eq!(item.normalized_signal(), NO_SIGNAL);
    }

    #[test]
    fn test_display() {
        let mut item = IdentifiedItem::with_source("5012345678900", "host");
        item.seen(None);
        assert_eq!(item.to_string(), "5012345678900 1");
        assert_eq!(item.source(), Some("host"));

        item.set_normalized_signal(0.25);
        assert_eq!(item.to_string(), "5012345678900 1 25%");
    }
}
