//! Key-value catalog store — the primary system of record.
//!
//! One table keyed by `indicator_key`. Timestamps are stored as ISO text,
//! multi-valued attributes as JSON arrays (NULL when empty), and every row
//! carries a TTL expiry hint refreshed on each write. The upsert overwrites
//! scalar attributes and COALESCEs set-valued columns, so a write produced
//! after a degraded read can never shrink a stored set.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::catalog_core::types::{format_timestamp, parse_timestamp, Aggregate, AttrKind, AttrMap};

use super::{apply_catalog_pragmas, CatalogStore, ScanPage, StoreError};

pub struct KvCatalogStore {
    conn: Arc<Mutex<Connection>>,
    ttl_days: i64,
}

impl KvCatalogStore {
    /// Open (creating if needed) the catalog database. `ttl_days` sets the
    /// retention window used for the per-row expiry hint.
    pub fn open(db_path: impl AsRef<Path>, ttl_days: i64) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_catalog_pragmas(&conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS observable_catalog (
                indicator_key    TEXT PRIMARY KEY,
                indicator        TEXT NOT NULL,
                indicator_type   TEXT NOT NULL,
                first_seen       TEXT,
                last_seen        TEXT,
                total_hits       INTEGER NOT NULL DEFAULT 0,
                days_seen        REAL NOT NULL DEFAULT 0,
                src_ips          TEXT,
                dest_ips         TEXT,
                users            TEXT,
                sourcetypes      TEXT,
                actions          TEXT,
                types            TEXT,
                export_timestamp TEXT NOT NULL,
                ttl              INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_catalog_type ON observable_catalog(indicator_type)",
            [],
        )?;

        log::info!("✅ Catalog store initialized with WAL mode");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl_days,
        })
    }

    fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<Aggregate> {
        let mut attributes = AttrMap::new();
        for (idx, kind) in AttrKind::ALL.iter().enumerate() {
            let raw: Option<String> = row.get(7 + idx)?;
            let set = decode_set(raw.as_deref());
            if !set.is_empty() {
                attributes.insert(*kind, set);
            }
        }

        let first_seen: Option<String> = row.get(3)?;
        let last_seen: Option<String> = row.get(4)?;
        let export_timestamp: String = row.get(13)?;

        Ok(Aggregate {
            indicator_key: row.get(0)?,
            indicator: row.get(1)?,
            indicator_type: row.get(2)?,
            first_seen: first_seen.as_deref().and_then(parse_timestamp),
            last_seen: last_seen.as_deref().and_then(parse_timestamp),
            total_hits: row.get::<_, i64>(5)?.max(0) as u64,
            days_seen: row.get(6)?,
            attributes,
            export_timestamp: parse_timestamp(&export_timestamp).unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl CatalogStore for KvCatalogStore {
    async fn get(&self, indicator_key: &str) -> Result<Option<Aggregate>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT indicator_key, indicator, indicator_type, first_seen, last_seen,
                    total_hits, days_seen, src_ips, dest_ips, users, sourcetypes,
                    actions, types, export_timestamp
             FROM observable_catalog WHERE indicator_key = ?1",
        )?;

        let mut rows = stmt.query_map(params![indicator_key], Self::aggregate_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    async fn put(&self, aggregate: &Aggregate) -> Result<(), StoreError> {
        let ttl = Utc::now().timestamp() + self.ttl_days * 86_400;
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO observable_catalog (
                indicator_key, indicator, indicator_type, first_seen, last_seen,
                total_hits, days_seen, src_ips, dest_ips, users, sourcetypes,
                actions, types, export_timestamp, ttl
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(indicator_key) DO UPDATE SET
                indicator = excluded.indicator,
                indicator_type = excluded.indicator_type,
                first_seen = excluded.first_seen,
                last_seen = excluded.last_seen,
                total_hits = excluded.total_hits,
                days_seen = excluded.days_seen,
                src_ips = COALESCE(excluded.src_ips, src_ips),
                dest_ips = COALESCE(excluded.dest_ips, dest_ips),
                users = COALESCE(excluded.users, users),
                sourcetypes = COALESCE(excluded.sourcetypes, sourcetypes),
                actions = COALESCE(excluded.actions, actions),
                types = COALESCE(excluded.types, types),
                export_timestamp = excluded.export_timestamp,
                ttl = excluded.ttl",
            params![
                aggregate.indicator_key,
                aggregate.indicator,
                aggregate.indicator_type,
                aggregate.first_seen.map(format_timestamp),
                aggregate.last_seen.map(format_timestamp),
                aggregate.total_hits as i64,
                aggregate.days_seen,
                encode_set(aggregate, AttrKind::SrcIps)?,
                encode_set(aggregate, AttrKind::DestIps)?,
                encode_set(aggregate, AttrKind::Users)?,
                encode_set(aggregate, AttrKind::Sourcetypes)?,
                encode_set(aggregate, AttrKind::Actions)?,
                encode_set(aggregate, AttrKind::Types)?,
                format_timestamp(aggregate.export_timestamp),
                ttl,
            ],
        )?;

        Ok(())
    }

    async fn scan_page(&self, cursor: Option<&str>, limit: usize) -> Result<ScanPage, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT indicator_key, indicator, indicator_type, first_seen, last_seen,
                    total_hits, days_seen, src_ips, dest_ips, users, sourcetypes,
                    actions, types, export_timestamp
             FROM observable_catalog
             WHERE indicator_key > ?1
             ORDER BY indicator_key ASC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(
            params![cursor.unwrap_or(""), limit as i64],
            Self::aggregate_from_row,
        )?;

        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }

        let next_cursor = if items.len() == limit {
            items.last().map(|a| a.indicator_key.clone())
        } else {
            None
        };

        Ok(ScanPage { items, next_cursor })
    }

    fn backend_type(&self) -> &'static str {
        "catalog"
    }
}

/// Empty sets encode as NULL so the upsert's COALESCE leaves the stored
/// column alone.
fn encode_set(aggregate: &Aggregate, kind: AttrKind) -> Result<Option<String>, StoreError> {
    match aggregate.attributes.get(&kind) {
        Some(set) if !set.is_empty() => Ok(Some(serde_json::to_string(set)?)),
        _ => Ok(None),
    }
}

fn decode_set(raw: Option<&str>) -> BTreeSet<String> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}
