//! Relational catalog store — the secondary, best-effort variant.
//!
//! Mirrors the warehouse-style schema: epoch-integer timestamps, derived
//! unique-count columns, and an index on `indicator_type` for ad-hoc
//! querying. It receives aggregates already merged by the canonical engine
//! and performs a plain upsert-on-conflict; no merge logic lives in SQL.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::catalog_core::types::{Aggregate, AttrKind, AttrMap};

use super::{apply_catalog_pragmas, CatalogStore, ScanPage, StoreError};

pub struct RelationalCatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl RelationalCatalogStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
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
                first_seen       INTEGER,
                last_seen        INTEGER,
                total_hits       INTEGER NOT NULL DEFAULT 0,
                days_seen        REAL,
                src_ips          TEXT,
                dest_ips         TEXT,
                users            TEXT,
                sourcetypes      TEXT,
                actions          TEXT,
                types            TEXT,
                unique_src_ips   INTEGER,
                unique_dest_ips  INTEGER,
                export_timestamp INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_relational_type ON observable_catalog(indicator_type)",
            [],
        )?;

        log::info!("✅ Relational store initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn aggregate_from_row(row: &Row<'_>) -> rusqlite::Result<Aggregate> {
        let mut attributes = AttrMap::new();
        for (idx, kind) in AttrKind::ALL.iter().enumerate() {
            let raw: Option<String> = row.get(7 + idx)?;
            let set: BTreeSet<String> = raw
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default();
            if !set.is_empty() {
                attributes.insert(*kind, set);
            }
        }

        let first_seen: Option<i64> = row.get(3)?;
        let last_seen: Option<i64> = row.get(4)?;
        let export_timestamp: i64 = row.get(13)?;

        Ok(Aggregate {
            indicator_key: row.get(0)?,
            indicator: row.get(1)?,
            indicator_type: row.get(2)?,
            first_seen: first_seen.and_then(|s| Utc.timestamp_opt(s, 0).single()),
            last_seen: last_seen.and_then(|s| Utc.timestamp_opt(s, 0).single()),
            total_hits: row.get::<_, i64>(5)?.max(0) as u64,
            days_seen: row.get::<_, Option<f64>>(6)?.unwrap_or(0.0),
            attributes,
            export_timestamp: Utc.timestamp_opt(export_timestamp, 0).single().unwrap_or_else(Utc::now),
        })
    }
}

#[async_trait]
impl CatalogStore for RelationalCatalogStore {
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
        let unique_src_ips = aggregate.attribute(AttrKind::SrcIps).map(|s| s.len() as i64);
        let unique_dest_ips = aggregate.attribute(AttrKind::DestIps).map(|s| s.len() as i64);
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO observable_catalog (
                indicator_key, indicator, indicator_type, first_seen, last_seen,
                total_hits, days_seen, src_ips, dest_ips, users, sourcetypes,
                actions, types, unique_src_ips, unique_dest_ips, export_timestamp
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
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
                unique_src_ips = COALESCE(excluded.unique_src_ips, unique_src_ips),
                unique_dest_ips = COALESCE(excluded.unique_dest_ips, unique_dest_ips),
                export_timestamp = excluded.export_timestamp",
            params![
                aggregate.indicator_key,
                aggregate.indicator,
                aggregate.indicator_type,
                aggregate.first_seen.map(|ts| ts.timestamp()),
                aggregate.last_seen.map(|ts| ts.timestamp()),
                aggregate.total_hits as i64,
                aggregate.days_seen,
                encode_set(aggregate, AttrKind::SrcIps)?,
                encode_set(aggregate, AttrKind::DestIps)?,
                encode_set(aggregate, AttrKind::Users)?,
                encode_set(aggregate, AttrKind::Sourcetypes)?,
                encode_set(aggregate, AttrKind::Actions)?,
                encode_set(aggregate, AttrKind::Types)?,
                unique_src_ips,
                unique_dest_ips,
                aggregate.export_timestamp.timestamp(),
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
        "relational"
    }
}

fn encode_set(aggregate: &Aggregate, kind: AttrKind) -> Result<Option<String>, StoreError> {
    match aggregate.attributes.get(&kind) {
        Some(set) if !set.is_empty() => Ok(Some(serde_json::to_string(set)?)),
        _ => Ok(None),
    }
}
