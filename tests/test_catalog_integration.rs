//! Integration tests: full reconcile flow over real SQLite stores.
//!
//! Exercises the path the runtime drives: normalize raw rows, reconcile
//! them through the merge engine into the catalog store (with a relational
//! mirror), replay a batch, and produce the master snapshot.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use iocflow::catalog_core::merge::MergeEngine;
use iocflow::catalog_core::normalizer::normalize_batch;
use iocflow::catalog_core::reconciler::Reconciler;
use iocflow::catalog_core::snapshot::{snapshot_due, SnapshotWriter};
use iocflow::catalog_core::types::{parse_timestamp, AttrKind};
use iocflow::source::value::{FieldValue, RawRecord};
use iocflow::store::{CatalogStore, KvCatalogStore, RelationalCatalogStore};

fn fixed_engine(now: &str) -> MergeEngine {
    let now: DateTime<Utc> = parse_timestamp(now).unwrap();
    MergeEngine::with_now_fn(Box::new(move || now))
}

fn raw_row(fields: &[(&str, FieldValue)]) -> RawRecord {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn sample_batch() -> Vec<RawRecord> {
    vec![
        raw_row(&[
            ("indicator", FieldValue::Text("10.0.0.1".to_string())),
            ("indicator_type", FieldValue::Text("ip".to_string())),
            ("first_seen", FieldValue::Text("2024-01-01T00:00:00Z".to_string())),
            ("last_seen", FieldValue::Text("2024-01-10T00:00:00Z".to_string())),
            ("total_hits", FieldValue::Number(40.0)),
            (
                "src_ips",
                FieldValue::List(vec!["192.0.2.1".to_string(), "192.0.2.2".to_string()]),
            ),
        ]),
        // Same identity, later window: folds into the first aggregate.
        raw_row(&[
            ("indicator", FieldValue::Text("10.0.0.1".to_string())),
            ("indicator_type", FieldValue::Text("ip".to_string())),
            ("first_seen", FieldValue::Text("2024-01-05T00:00:00Z".to_string())),
            ("last_seen", FieldValue::Text("2024-01-15T00:00:00Z".to_string())),
            ("total_hits", FieldValue::Number(2.0)),
            (
                "src_ips",
                FieldValue::List(vec!["192.0.2.2".to_string(), "192.0.2.3".to_string()]),
            ),
        ]),
        raw_row(&[
            ("indicator", FieldValue::Text("evil.test".to_string())),
            ("indicator_type", FieldValue::Text("domain".to_string())),
            ("total_hits", FieldValue::Text("7".to_string())),
            ("users", FieldValue::Text("alice|bob".to_string())),
        ]),
        // Missing identity type: dropped by the normalizer.
        raw_row(&[("indicator", FieldValue::Text("orphan".to_string()))]),
    ]
}

#[tokio::test]
async fn test_end_to_end_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let store = KvCatalogStore::open(dir.path().join("catalog.db"), 90).unwrap();
    let engine = fixed_engine("2024-03-01T12:00:00Z");

    let observations = normalize_batch(&sample_batch());
    assert_eq!(observations.len(), 3);

    let report = Reconciler::new(&engine, &store).reconcile(&observations).await;
    assert_eq!(report.processed, 3);
    assert_eq!(report.written, 3);
    assert!(!report.has_errors());

    // The repeated identity folded through the store round-trip.
    let merged = store.get("ip#10.0.0.1").await.unwrap().unwrap();
    assert_eq!(merged.total_hits, 42);
    assert_eq!(merged.first_seen, parse_timestamp("2024-01-01T00:00:00Z"));
    assert_eq!(merged.last_seen, parse_timestamp("2024-01-15T00:00:00Z"));
    assert_eq!(merged.days_seen, 14.0);
    assert_eq!(
        merged.attributes[&AttrKind::SrcIps],
        BTreeSet::from([
            "192.0.2.1".to_string(),
            "192.0.2.2".to_string(),
            "192.0.2.3".to_string()
        ])
    );

    // Unresolvable bounds fell back to the injected "now".
    let domain = store.get("domain#evil.test").await.unwrap().unwrap();
    assert_eq!(domain.total_hits, 7);
    assert_eq!(domain.first_seen, parse_timestamp("2024-03-01T12:00:00Z"));
    assert_eq!(domain.days_seen, 0.0);
    assert_eq!(
        domain.attributes[&AttrKind::Users],
        BTreeSet::from(["alice".to_string(), "bob".to_string()])
    );
}

#[tokio::test]
async fn test_batch_replay_doubles_hits_only() {
    let dir = tempfile::tempdir().unwrap();
    let store = KvCatalogStore::open(dir.path().join("catalog.db"), 90).unwrap();
    let engine = fixed_engine("2024-03-01T12:00:00Z");

    let observations = normalize_batch(&sample_batch());
    let reconciler = Reconciler::new(&engine, &store);

    reconciler.reconcile(&observations).await;
    reconciler.reconcile(&observations).await;

    let merged = store.get("ip#10.0.0.1").await.unwrap().unwrap();

    // Hit accumulation is not batch-idempotent: the replay double-counts.
    assert_eq!(merged.total_hits, 84);

    // Bounds and sets are idempotent under the replay.
    assert_eq!(merged.first_seen, parse_timestamp("2024-01-01T00:00:00Z"));
    assert_eq!(merged.last_seen, parse_timestamp("2024-01-15T00:00:00Z"));
    assert_eq!(merged.attributes[&AttrKind::SrcIps].len(), 3);
}

#[tokio::test]
async fn test_relational_mirror_sees_same_merged_stream() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = KvCatalogStore::open(dir.path().join("catalog.db"), 90).unwrap();
    let relational = RelationalCatalogStore::open(dir.path().join("relational.db")).unwrap();
    let engine = fixed_engine("2024-03-01T12:00:00Z");

    let observations = normalize_batch(&sample_batch());
    Reconciler::new(&engine, &catalog)
        .with_mirror(&relational)
        .reconcile(&observations)
        .await;

    let primary = catalog.get("ip#10.0.0.1").await.unwrap().unwrap();
    let mirrored = relational.get("ip#10.0.0.1").await.unwrap().unwrap();

    assert_eq!(mirrored.total_hits, primary.total_hits);
    assert_eq!(mirrored.first_seen, primary.first_seen);
    assert_eq!(mirrored.last_seen, primary.last_seen);
    assert_eq!(mirrored.attributes, primary.attributes);
}

#[tokio::test]
async fn test_master_snapshot_after_reconcile() {
    let dir = tempfile::tempdir().unwrap();
    let store = KvCatalogStore::open(dir.path().join("catalog.db"), 90).unwrap();
    let engine = fixed_engine("2024-03-01T12:00:00Z");

    let observations = normalize_batch(&sample_batch());
    Reconciler::new(&engine, &store).reconcile(&observations).await;

    let export_dir = dir.path().join("exports");
    let writer = SnapshotWriter::new(&export_dir).unwrap();

    // First run: no marker, snapshot due.
    assert!(snapshot_due(writer.master_marker(), Utc::now()));
    let count = writer.write_master(&store, 1).await.unwrap();
    assert_eq!(count, 2);

    // Same day: throttled.
    assert!(!snapshot_due(writer.master_marker(), Utc::now()));

    let csv = std::fs::read_to_string(export_dir.join("master.csv")).unwrap();
    assert!(csv.contains("\"10.0.0.1\""));
    assert!(csv.contains("\"evil.test\""));
}

#[tokio::test]
async fn test_relational_as_primary_store() {
    // Relational-only mode drives the same reconcile loop against the
    // relational variant.
    let dir = tempfile::tempdir().unwrap();
    let store = RelationalCatalogStore::open(dir.path().join("relational.db")).unwrap();
    let engine = fixed_engine("2024-03-01T12:00:00Z");

    let observations = normalize_batch(&sample_batch());
    let report = Reconciler::new(&engine, &store).reconcile(&observations).await;
    assert_eq!(report.written, 3);

    let merged = store.get("ip#10.0.0.1").await.unwrap().unwrap();
    assert_eq!(merged.total_hits, 42);
    assert_eq!(merged.days_seen, 14.0);
}
