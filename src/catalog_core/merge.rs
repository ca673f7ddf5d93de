//! The merge engine: folds fresh observations into durable aggregates.
//!
//! One canonical implementation feeds every store variant. Per merge:
//! time bounds widen (min/max), hit counters accumulate unconditionally,
//! attribute sets union and never shrink, and `days_seen` is re-derived
//! from the merged bounds. Timestamp parsing failures degrade to defaults;
//! nothing in here raises.

use chrono::{DateTime, Utc};

use super::types::{Aggregate, Observation};

/// Computes merged aggregates deterministically. "Now" is injected so the
/// fallback bounds and `export_timestamp` are reproducible under test.
pub struct MergeEngine {
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl MergeEngine {
    pub fn new() -> Self {
        Self::with_now_fn(Box::new(Utc::now))
    }

    /// Engine with a custom timestamp function, for deterministic tests.
    pub fn with_now_fn(now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        Self { now_fn }
    }

    /// Merge a single observation into an optional existing aggregate.
    ///
    /// - `first_seen` = min of whichever bounds resolved, `last_seen` = max;
    ///   if neither side resolved, both fall back to now.
    /// - `total_hits` accumulates unconditionally. Replaying the same batch
    ///   twice double-counts; idempotency holds per identity per merge, not
    ///   across batch replays.
    /// - `days_seen` is recomputed from the merged bounds when both
    ///   resolved; otherwise the prior value, else the observation's own
    ///   declared value, else 0.
    /// - attribute sets union; an absent or empty incoming set leaves the
    ///   existing set untouched.
    pub fn merge_one(&self, existing: Option<&Aggregate>, obs: &Observation) -> Aggregate {
        let now = (self.now_fn)();

        let first = min_opt(existing.and_then(|e| e.first_seen), obs.first_seen);
        let last = max_opt(existing.and_then(|e| e.last_seen), obs.last_seen);

        let (first_seen, last_seen, days_seen) = match (first, last) {
            (Some(f), Some(l)) => (f, l, round2((l - f).num_seconds() as f64 / 86_400.0)),
            _ => {
                let fallback = existing
                    .map(|e| e.days_seen)
                    .or(obs.days_seen)
                    .unwrap_or(0.0);
                (first.unwrap_or(now), last.unwrap_or(now), fallback)
            }
        };

        let mut attributes = existing.map(|e| e.attributes.clone()).unwrap_or_default();
        for (kind, values) in &obs.attributes {
            if values.is_empty() {
                continue;
            }
            attributes.entry(*kind).or_default().extend(values.iter().cloned());
        }

        Aggregate {
            indicator_key: obs.indicator_key(),
            indicator: obs.indicator.clone(),
            indicator_type: obs.indicator_type.clone(),
            first_seen: Some(first_seen),
            last_seen: Some(last_seen),
            total_hits: existing.map(|e| e.total_hits).unwrap_or(0) + obs.total_hits,
            days_seen,
            attributes,
            export_timestamp: now,
        }
    }

    /// Fold a sequence of observations sharing one identity, seeded by the
    /// externally-read existing aggregate. Left fold: each step's output is
    /// the next step's "existing" input.
    pub fn merge(&self, existing: Option<Aggregate>, incoming: &[Observation]) -> Option<Aggregate> {
        let mut acc = existing;
        for obs in incoming {
            acc = Some(self.merge_one(acc.as_ref(), obs));
        }
        acc
    }
}

impl Default for MergeEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn min_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (x, None) | (None, x) => x,
    }
}

fn max_opt(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (x, None) | (None, x) => x,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
