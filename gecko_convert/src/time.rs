//! Time origin and range tracking.
//!
//! Trace timestamps are absolute microseconds on the tracing clock. The output
//! uses milliseconds relative to a single origin chosen once per conversion.

use crate::chrome::{Phase, TraceEvent};

/// Event names that mark the start of tracing.
pub const TRACING_STARTED_EVENTS: &[&str] = &["TracingStartedInBrowser", "TracingStartedInPage"];

/// Convert a microsecond span into milliseconds.
pub fn us_to_ms(us: f64) -> f64 {
    us / 1000.0
}

/// Pick the time origin in microseconds.
///
/// The first tracing-started event with a positive timestamp wins. Otherwise
/// the smallest positive timestamp of a non-metadata event is used. Returns
/// `None` when no event carries a positive timestamp.
pub fn resolve_time_origin(events: &[TraceEvent]) -> Option<f64> {
    let started = events
        .iter()
        .find(|event| TRACING_STARTED_EVENTS.contains(&event.name.as_str()) && event.ts > 0.0);
    if let Some(event) = started {
        return Some(event.ts);
    }

    events
        .iter()
        .filter(|event| event.phase() != Phase::Metadata && event.ts > 0.0)
        .map(|event| event.ts)
        .reduce(f64::min)
}

/// Observed span of event timestamps, in microseconds.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct TimeRange {
    min: Option<f64>,
    max: Option<f64>,
}

impl TimeRange {
    /// Widen the range to cover an event, if its timestamp is positive.
    pub fn widen(&mut self, event: &TraceEvent) {
        if event.ts <= 0.0 {
            return;
        }
        let end = event.ts + event.dur.unwrap_or(0.0).max(0.0);
        self.min = Some(self.min.map_or(event.ts, |min| min.min(event.ts)));
        self.max = Some(self.max.map_or(end, |max| max.max(end)));
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    /// Span in microseconds, zero when nothing was observed.
    pub fn duration(&self) -> f64 {
        match (self.min, self.max) {
            (Some(min), Some(max)) => max - min,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, ph: &str, ts: f64) -> TraceEvent {
        TraceEvent {
            name: name.to_string(),
            ph: ph.to_string(),
            ts,
            ..Default::default()
        }
    }

    #[test]
    fn tracing_started_wins() {
        let events = vec![
            event("a", "X", 100.0),
            event("TracingStartedInBrowser", "I", 500.0),
            event("b", "X", 50.0),
        ];
        assert_eq!(resolve_time_origin(&events), Some(500.0));
    }

    #[test]
    fn tracing_started_needs_positive_timestamp() {
        let events = vec![
            event("TracingStartedInBrowser", "I", 0.0),
            event("a", "X", 300.0),
            event("b", "X", 200.0),
        ];
        assert_eq!(resolve_time_origin(&events), Some(200.0));
    }

    #[test]
    fn metadata_and_zero_timestamps_are_skipped() {
        let events = vec![
            event("thread_name", "M", 10.0),
            event("a", "X", 0.0),
            event("b", "X", -5.0),
            event("c", "I", 40.0),
        ];
        assert_eq!(resolve_time_origin(&events), Some(40.0));
    }

    #[test]
    fn no_positive_timestamps() {
        assert_eq!(resolve_time_origin(&[]), None);
        assert_eq!(resolve_time_origin(&[event("a", "X", 0.0)]), None);
    }

    #[test]
    fn range_covers_durations() {
        let mut range = TimeRange::default();
        let mut long = event("a", "X", 100.0);
        long.dur = Some(400.0);
        range.widen(&long);
        range.widen(&event("b", "I", 50.0));
        range.widen(&event("c", "I", 0.0));

        assert_eq!(range.min(), Some(50.0));
        assert_eq!(range.duration(), 450.0);
    }

    #[test]
    fn empty_range() {
        let range = TimeRange::default();
        assert_eq!(range.min(), None);
        assert_eq!(range.duration(), 0.0);
    }

    #[test]
    fn exact_millisecond_conversion() {
        assert_eq!(us_to_ms(5000.0), 5.0);
        assert_eq!(us_to_ms(0.0), 0.0);
    }
}
