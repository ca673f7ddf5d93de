//! Core data model for the observable catalog.
//!
//! `Observation` is the ephemeral value produced per search-result row;
//! `Aggregate` is the durable, continuously-merged record for one identity,
//! owned by the catalog stores. Multi-valued attributes come from a closed
//! set of known field names.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::identity;

/// Known multi-valued attribute fields. Unknown fields on incoming rows are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttrKind {
    #[serde(rename = "src_ips")]
    SrcIps,
    #[serde(rename = "dest_ips")]
    DestIps,
    #[serde(rename = "users")]
    Users,
    #[serde(rename = "sourcetypes")]
    Sourcetypes,
    #[serde(rename = "actions")]
    Actions,
    #[serde(rename = "types")]
    Types,
}

impl AttrKind {
    pub const ALL: [AttrKind; 6] = [
        AttrKind::SrcIps,
        AttrKind::DestIps,
        AttrKind::Users,
        AttrKind::Sourcetypes,
        AttrKind::Actions,
        AttrKind::Types,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttrKind::SrcIps => "src_ips",
            AttrKind::DestIps => "dest_ips",
            AttrKind::Users => "users",
            AttrKind::Sourcetypes => "sourcetypes",
            AttrKind::Actions => "actions",
            AttrKind::Types => "types",
        }
    }

    pub fn from_field(name: &str) -> Option<AttrKind> {
        AttrKind::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

/// Attribute name to deduplicated value set. Keys are present only when the
/// set is non-empty.
pub type AttrMap = BTreeMap<AttrKind, BTreeSet<String>>;

/// One data point about an observable from a single query window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub indicator: String,
    pub indicator_type: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub total_hits: u64,
    /// Declared by some sources; consulted only when merged time bounds are
    /// unresolvable.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub days_seen: Option<f64>,
    #[serde(flatten)]
    pub attributes: AttrMap,
}

impl Observation {
    pub fn indicator_key(&self) -> String {
        identity::indicator_key(&self.indicator_type, &self.indicator)
    }
}

/// The durable, continuously-merged record for one identity.
///
/// `first_seen`/`last_seen` are always `Some` after a merge; `None` only
/// occurs when a stored row round-trips with malformed timestamp text. The
/// key-value store's TTL expiry hint is a storage-layer column, not a field
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    pub indicator_key: String,
    pub indicator: String,
    pub indicator_type: String,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub total_hits: u64,
    pub days_seen: f64,
    #[serde(flatten)]
    pub attributes: AttrMap,
    pub export_timestamp: DateTime<Utc>,
}

impl Aggregate {
    /// Deduplicated values for one attribute, if any were ever observed.
    pub fn attribute(&self, kind: AttrKind) -> Option<&BTreeSet<String>> {
        self.attributes.get(&kind)
    }
}

/// Parse a timestamp string, tolerating the formats the search head emits.
///
/// Accepts RFC 3339 (with `Z` or an offset), a naive `YYYY-MM-DDTHH:MM:SS`,
/// or a bare `YYYY-MM-DD` date. Anything else resolves to `None` — malformed
/// timestamps are tolerated, never an error.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Format a timestamp the way it is stored and exported (`...Z`, whole
/// seconds).
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
