//! Time-windowed reduction of interval samples, keyed by `(tag, instance)`.
//!
//! Grounded in `aggregate_interval_info`/`aggregate_intervals` from
//! `original_source/.../implementation_impl.cpp`: each key accumulates
//! sum/min/max/count until its window timer expires, at which point the
//! caller is expected to consume the snapshot and call [`AggregationEngine::reset`].

use log_ident::Identifier;
use log_model::AggregateInterval;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Matches the original's default aggregation period.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(120);

struct Aggregate {
    sum: Duration,
    min: Duration,
    max: Duration,
    count: u64,
    window: Duration,
    window_start: Instant,
}

impl Aggregate {
    fn new(window: Duration, window_start: Instant) -> Self {
        Aggregate {
            sum: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            count: 0,
            window,
            window_start,
        }
    }

    fn update(&mut self, duration: Duration) {
        self.sum += duration;
        if duration < self.min {
            self.min = duration;
        }
        if duration > self.max {
            self.max = duration;
        }
        self.count += 1;
    }

    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.window_start) >= self.window
    }

    fn snapshot(&self, tag: Identifier, instance: u64) -> AggregateInterval {
        AggregateInterval {
            tag,
            instance,
            duration_sum: self.sum,
            count: self.count,
            min: if self.count == 0 { Duration::ZERO } else { self.min },
            max: self.max,
            hit_interval: self.window,
        }
    }

    fn reset(&mut self, now: Instant) {
        self.sum = Duration::ZERO;
        self.min = Duration::MAX;
        self.max = Duration::ZERO;
        self.count = 0;
        self.window_start = now;
    }
}

/// A keyed, windowed interval reducer. Not `Sync`; one instance is owned per
/// sink, same as the original's per-sink `aggregate_intervals` member.
pub struct AggregationEngine {
    window: Duration,
    table: HashMap<(Identifier, u64), Aggregate>,
}

impl AggregationEngine {
    pub fn new(window: Duration) -> Self {
        AggregationEngine {
            window,
            table: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accumulate one interval sample. Returns a snapshot once the owning
    /// key's window has expired; the caller must then call [`Self::reset`]
    /// to restart that key's window, mirroring `should_consume()` +
    /// `reset()` in the original.
    pub fn update(&mut self, tag: Identifier, instance: u64, duration: Duration) -> Option<AggregateInterval> {
        self.update_at(tag, instance, duration, Instant::now())
    }

    /// Same as [`Self::update`] but with an explicit clock, for deterministic tests.
    pub fn update_at(
        &mut self,
        tag: Identifier,
        instance: u64,
        duration: Duration,
        now: Instant,
    ) -> Option<AggregateInterval> {
        let window = self.window;
        let agg = self
            .table
            .entry((tag, instance))
            .or_insert_with(|| Aggregate::new(window, now));
        agg.update(duration);
        if agg.expired(now) {
            Some(agg.snapshot(tag, instance))
        } else {
            None
        }
    }

    /// Zero the accumulators for `(tag, instance)` and restart its window.
    /// No-op if the key was never seen.
    pub fn reset(&mut self, tag: Identifier, instance: u64) {
        self.reset_at(tag, instance, Instant::now())
    }

    pub fn reset_at(&mut self, tag: Identifier, instance: u64, now: Instant) {
        if let Some(agg) = self.table.get_mut(&(tag, instance)) {
            agg.reset(now);
        }
    }

    pub fn hit_count(&self, tag: Identifier, instance: u64) -> Option<u64> {
        self.table.get(&(tag, instance)).map(|a| a.count)
    }
}

impl Default for AggregationEngine {
    fn default() -> Self {
        AggregationEngine::new(DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_without_expiring_within_window() {
        let mut engine = AggregationEngine::new(Duration::from_secs(60));
        let tag = Identifier::new("frame");
        let t0 = Instant::now();
        assert!(engine
            .update_at(tag, 1, Duration::from_millis(10), t0)
            .is_none());
        assert!(engine
            .update_at(tag, 1, Duration::from_millis(20), t0 + Duration::from_secs(1))
            .is_none());
        assert_eq!(engine.hit_count(tag, 1), Some(2));
    }

    #[test]
    fn yields_snapshot_once_window_elapses() {
        let mut engine = AggregationEngine::new(Duration::from_secs(60));
        let tag = Identifier::new("frame");
        let t0 = Instant::now();
        engine.update_at(tag, 1, Duration::from_millis(5), t0);
        let snap = engine
            .update_at(tag, 1, Duration::from_millis(15), t0 + Duration::from_secs(61))
            .expect("window should have expired");
        assert_eq!(snap.count, 2);
        assert_eq!(snap.min, Duration::from_millis(5));
        assert_eq!(snap.max, Duration::from_millis(15));
        assert_eq!(snap.avg(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn reset_restarts_window_and_zeroes_accumulators() {
        let mut engine = AggregationEngine::new(Duration::from_secs(60));
        let tag = Identifier::new("frame");
        let t0 = Instant::now();
        engine.update_at(tag, 1, Duration::from_millis(5), t0);
        engine
            .update_at(tag, 1, Duration::from_millis(5), t0 + Duration::from_secs(61))
            .unwrap();
        engine.reset_at(tag, 1, t0 + Duration::from_secs(61));
        assert_eq!(engine.hit_count(tag, 1), Some(0));
        assert!(engine
            .update_at(tag, 1, Duration::from_millis(1), t0 + Duration::from_secs(62))
            .is_none());
    }

    #[test]
    fn distinct_instances_are_independent_keys() {
        let mut engine = AggregationEngine::new(Duration::from_secs(60));
        let tag = Identifier::new("frame");
        let t0 = Instant::now();
        engine.update_at(tag, 1, Duration::from_millis(5), t0);
        engine.update_at(tag, 2, Duration::from_millis(9), t0);
        assert_eq!(engine.hit_count(tag, 1), Some(1));
        assert_eq!(engine.hit_count(tag, 2), Some(1));
    }
}
