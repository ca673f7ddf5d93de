//! Batch reconciliation: read-merge-write per observation.
//!
//! Observations are processed one at a time in source order; repeated
//! identities within a batch fold naturally through the store round-trip.
//! A failed read degrades to "no existing aggregate" (better to under-merge
//! than to fail the whole batch); a failed write aborts only that
//! identity's update. There is no cross-run concurrency control: two
//! overlapping runs touching the same identity race read-then-write and the
//! last write wins. That limitation is accepted, not fixed here.

use crate::store::CatalogStore;

use super::merge::MergeEngine;
use super::types::Observation;

/// Outcome of one reconcile run. Write failures are collected per identity
/// rather than raised; prior writes are already committed and stay.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub processed: usize,
    pub skipped: usize,
    pub written: usize,
    pub errors: Vec<ReconcileError>,
}

#[derive(Debug)]
pub struct ReconcileError {
    pub indicator_key: String,
    pub message: String,
}

impl ReconcileReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Drives the merge engine against a primary store, with optional
/// best-effort mirrors that receive the same merged record stream.
pub struct Reconciler<'a> {
    engine: &'a MergeEngine,
    primary: &'a dyn CatalogStore,
    mirrors: Vec<&'a dyn CatalogStore>,
}

impl<'a> Reconciler<'a> {
    pub fn new(engine: &'a MergeEngine, primary: &'a dyn CatalogStore) -> Self {
        Self {
            engine,
            primary,
            mirrors: Vec::new(),
        }
    }

    /// Add a secondary store. Mirror writes happen after a successful
    /// primary write; mirror failures are logged, never collected.
    pub fn with_mirror(mut self, store: &'a dyn CatalogStore) -> Self {
        self.mirrors.push(store);
        self
    }

    pub async fn reconcile(&self, observations: &[Observation]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        for obs in observations {
            report.processed += 1;

            if obs.indicator.is_empty() || obs.indicator_type.is_empty() {
                report.skipped += 1;
                continue;
            }

            let key = obs.indicator_key();

            let existing = match self.primary.get(&key).await {
                Ok(existing) => existing,
                Err(e) => {
                    log::warn!("⚠️  Could not read existing aggregate {}: {}", key, e);
                    None
                }
            };

            let merged = self.engine.merge_one(existing.as_ref(), obs);

            if let Err(e) = self.primary.put(&merged).await {
                log::error!("❌ Failed to write aggregate {}: {}", key, e);
                report.errors.push(ReconcileError {
                    indicator_key: key,
                    message: e.to_string(),
                });
                continue;
            }
            report.written += 1;

            for mirror in &self.mirrors {
                if let Err(e) = mirror.put(&merged).await {
                    log::warn!("⚠️  {} mirror write failed for {}: {}", mirror.backend_type(), key, e);
                }
            }
        }

        log::info!(
            "📊 Reconcile complete: {} processed, {} written, {} skipped, {} errors",
            report.processed,
            report.written,
            report.skipped,
            report.errors.len()
        );

        report
    }
}
