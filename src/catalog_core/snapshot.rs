//! Snapshot throttle and bulk export.
//!
//! The master snapshot is a full dump of the catalog, regenerated at most
//! once per calendar day. The gate compares the calendar date of the
//! existing master file's last-modified marker against today; an absent or
//! unreadable marker means refresh (fail-open, so a snapshot is never
//! silently skipped forever). Dated exports write the current batch
//! under a `date=YYYY-MM-DD/` partition without touching the stores.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::store::{CatalogStore, StoreError};

use super::types::{format_timestamp, Aggregate, AttrKind, Observation};

const MASTER_CSV: &str = "master.csv";
const MASTER_JSON: &str = "master.json";

/// Fixed column order for delimited exports (sorted field names).
const CSV_FIELDS: [&str; 12] = [
    "actions",
    "days_seen",
    "dest_ips",
    "export_timestamp",
    "first_seen",
    "indicator",
    "indicator_type",
    "last_seen",
    "sourcetypes",
    "src_ips",
    "total_hits",
    "types",
];

#[derive(Debug)]
pub enum ExportError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Store(StoreError),
}

impl From<std::io::Error> for ExportError {
    fn from(err: std::io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Serialization(err)
    }
}

impl From<StoreError> for ExportError {
    fn from(err: StoreError) -> Self {
        ExportError::Store(err)
    }
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::Io(e) => write!(f, "IO error: {}", e),
            ExportError::Serialization(e) => write!(f, "Serialization error: {}", e),
            ExportError::Store(e) => write!(f, "Store error: {}", e),
        }
    }
}

impl std::error::Error for ExportError {}

/// True when the master snapshot should be regenerated: no marker, or the
/// marker's calendar date is not today.
pub fn snapshot_due(marker: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match marker {
        Some(marker) => marker.date_naive() != now.date_naive(),
        None => true,
    }
}

/// Writes master and dated exports into a local export directory.
pub struct SnapshotWriter {
    export_dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(export_dir: impl AsRef<Path>) -> Result<Self, ExportError> {
        let export_dir = export_dir.as_ref().to_path_buf();
        fs::create_dir_all(&export_dir)?;
        Ok(Self { export_dir })
    }

    /// Last-modified marker of the master snapshot. `None` when the file is
    /// absent or its metadata is unreadable; callers treat that as "due".
    pub fn master_marker(&self) -> Option<DateTime<Utc>> {
        let metadata = fs::metadata(self.export_dir.join(MASTER_JSON)).ok()?;
        let modified = metadata.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// Regenerate the master snapshot from a full store scan. Returns the
    /// number of exported aggregates. The scan tolerates concurrent
    /// writers; it reads whatever each page holds at the time.
    pub async fn write_master(
        &self,
        store: &dyn CatalogStore,
        page_size: usize,
    ) -> Result<usize, ExportError> {
        let mut aggregates = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = store.scan_page(cursor.as_deref(), page_size).await?;
            aggregates.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let csv_path = self.export_dir.join(MASTER_CSV);
        write_csv(&csv_path, aggregates.iter().map(aggregate_row))?;

        let json_path = self.export_dir.join(MASTER_JSON);
        fs::write(&json_path, serde_json::to_string_pretty(&aggregates)?)?;

        log::info!(
            "✅ Master snapshot written: {} aggregates to {}",
            aggregates.len(),
            self.export_dir.display()
        );

        Ok(aggregates.len())
    }

    /// Write the current batch of normalized observations to a dated
    /// partition, leaving the stores untouched.
    pub fn write_dated(
        &self,
        observations: &[Observation],
        now: DateTime<Utc>,
    ) -> Result<(PathBuf, PathBuf), ExportError> {
        let partition = self.export_dir.join(format!("date={}", now.format("%Y-%m-%d")));
        fs::create_dir_all(&partition)?;

        let stamp = now.format("%Y%m%d_%H%M%S");
        let csv_path = partition.join(format!("observables_{}.csv", stamp));
        let json_path = partition.join(format!("observables_{}.json", stamp));

        write_csv(&csv_path, observations.iter().map(observation_row))?;
        fs::write(&json_path, serde_json::to_string_pretty(&observations)?)?;

        log::info!(
            "✅ Dated export written: {} observations to {}",
            observations.len(),
            partition.display()
        );

        Ok((csv_path, json_path))
    }
}

fn write_csv(path: &Path, rows: impl Iterator<Item = Vec<String>>) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);

    let header: Vec<String> = CSV_FIELDS.iter().map(|f| csv_quote(f)).collect();
    writeln!(writer, "{}", header.join(","))?;

    for row in rows {
        let quoted: Vec<String> = row.iter().map(|f| csv_quote(f)).collect();
        writeln!(writer, "{}", quoted.join(","))?;
    }

    writer.flush()?;
    Ok(())
}

/// Every field is quoted; embedded quotes double.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

/// Multi-valued fields round-trip through delimited text as pipe-joined
/// values.
fn join_set(set: Option<&BTreeSet<String>>) -> String {
    set.map(|s| s.iter().cloned().collect::<Vec<_>>().join("|"))
        .unwrap_or_default()
}

fn aggregate_row(aggregate: &Aggregate) -> Vec<String> {
    vec![
        join_set(aggregate.attribute(AttrKind::Actions)),
        format!("{}", aggregate.days_seen),
        join_set(aggregate.attribute(AttrKind::DestIps)),
        format_timestamp(aggregate.export_timestamp),
        aggregate.first_seen.map(format_timestamp).unwrap_or_default(),
        aggregate.indicator.clone(),
        aggregate.indicator_type.clone(),
        aggregate.last_seen.map(format_timestamp).unwrap_or_default(),
        join_set(aggregate.attribute(AttrKind::Sourcetypes)),
        join_set(aggregate.attribute(AttrKind::SrcIps)),
        aggregate.total_hits.to_string(),
        join_set(aggregate.attribute(AttrKind::Types)),
    ]
}

fn observation_row(obs: &Observation) -> Vec<String> {
    vec![
        join_set(obs.attributes.get(&AttrKind::Actions)),
        obs.days_seen.map(|d| format!("{}", d)).unwrap_or_default(),
        join_set(obs.attributes.get(&AttrKind::DestIps)),
        String::new(), // export_timestamp set only on aggregates
        obs.first_seen.map(format_timestamp).unwrap_or_default(),
        obs.indicator.clone(),
        obs.indicator_type.clone(),
        obs.last_seen.map(format_timestamp).unwrap_or_default(),
        join_set(obs.attributes.get(&AttrKind::Sourcetypes)),
        join_set(obs.attributes.get(&AttrKind::SrcIps)),
        obs.total_hits.to_string(),
        join_set(obs.attributes.get(&AttrKind::Types)),
    ]
}
