//! Store adapters for the observable catalog.
//!
//! The reconciler and the snapshot exporter require exactly three
//! capabilities: point read by indicator key, full-attribute upsert, and a
//! paginated full scan. Two variants back the trait: the key-value catalog
//! store (primary, system of record) and the relational store (secondary,
//! best-effort mirror). Both consume aggregates produced by the one
//! canonical merge engine; neither re-derives merge semantics.

pub mod kv;
pub mod relational;

use async_trait::async_trait;
use rusqlite::Connection;

use crate::catalog_core::types::Aggregate;

pub use kv::KvCatalogStore;
pub use relational::RelationalCatalogStore;

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Serialization(serde_json::Error),
    Io(std::io::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Serialization(e) => write!(f, "Serialization error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// One page of a full-store scan. The cursor is the last key of the page;
/// a scan is restartable only from the beginning, not resumable mid-scan
/// across process restarts.
#[derive(Debug)]
pub struct ScanPage {
    pub items: Vec<Aggregate>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Point read by indicator key. `Ok(None)` when absent.
    async fn get(&self, indicator_key: &str) -> Result<Option<Aggregate>, StoreError>;

    /// Full-attribute upsert. Concurrent writers to the same key race;
    /// last write wins per put.
    async fn put(&self, aggregate: &Aggregate) -> Result<(), StoreError>;

    /// Read one page of the full scan, ordered by indicator key. Pass the
    /// previous page's `next_cursor` to continue; `None` starts over.
    async fn scan_page(&self, cursor: Option<&str>, limit: usize) -> Result<ScanPage, StoreError>;

    /// Backend tag for logging.
    fn backend_type(&self) -> &'static str;
}

/// Pragmas shared by both SQLite-backed variants: WAL for concurrent
/// readers during a scan, relaxed sync, in-memory temp store.
pub(crate) fn apply_catalog_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    Ok(())
}
