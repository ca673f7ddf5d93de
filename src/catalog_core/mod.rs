//! Catalog Core - Observable Reconciliation Engine
//!
//! This module turns windowed observations from the search head into
//! durable, continuously-merged aggregates keyed by indicator identity.
//!
//! # Architecture
//!
//! ```text
//! Search rows → normalizer → Observation (grouped by identity key)
//!     ↓
//! Reconciler (read existing → MergeEngine::merge_one → upsert)
//!     ↓
//! CatalogStore (key-value primary, relational mirror)
//!     ↓
//! SnapshotWriter (throttled master export, dated batch export)
//! ```

pub mod identity;
pub mod merge;
pub mod normalizer;
pub mod reconciler;
pub mod snapshot;
pub mod types;

pub use identity::indicator_key;
pub use merge::MergeEngine;
pub use normalizer::{normalize, normalize_batch};
pub use reconciler::{ReconcileReport, Reconciler};
pub use snapshot::{snapshot_due, ExportError, SnapshotWriter};
pub use types::{Aggregate, AttrKind, AttrMap, Observation};
