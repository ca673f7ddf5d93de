//! Record normalization from raw search rows to `Observation` values.

use chrono::{DateTime, TimeZone, Utc};

use crate::source::value::{FieldValue, RawRecord};

use super::types::{parse_timestamp, AttrKind, AttrMap, Observation};

/// Normalize one raw row.
///
/// Returns `None` when `indicator` or `indicator_type` is missing or empty
/// (the row is skipped, not an error). Every other field defaults: missing
/// counts to 0, malformed timestamps to "no value", absent attributes to an
/// absent key.
pub fn normalize(record: &RawRecord) -> Option<Observation> {
    let indicator = record.get("indicator").and_then(FieldValue::as_text)?;
    let indicator_type = record.get("indicator_type").and_then(FieldValue::as_text)?;
    if indicator.is_empty() || indicator_type.is_empty() {
        return None;
    }

    let mut attributes = AttrMap::new();
    for kind in AttrKind::ALL {
        if let Some(value) = record.get(kind.as_str()) {
            let set = value.as_set();
            if !set.is_empty() {
                attributes.insert(kind, set);
            }
        }
    }

    Some(Observation {
        indicator: indicator.to_string(),
        indicator_type: indicator_type.to_string(),
        first_seen: record.get("first_seen").and_then(value_timestamp),
        last_seen: record.get("last_seen").and_then(value_timestamp),
        total_hits: record.get("total_hits").map(FieldValue::as_count).unwrap_or(0),
        days_seen: record.get("days_seen").and_then(FieldValue::as_float),
        attributes,
    })
}

/// Normalize a batch, dropping rows without identity fields.
pub fn normalize_batch(rows: &[RawRecord]) -> Vec<Observation> {
    let mut observations = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in rows {
        match normalize(row) {
            Some(obs) => observations.push(obs),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("⚠️  Skipped {} rows without indicator/indicator_type", skipped);
    }
    log::info!("📥 Normalized {} observations from {} rows", observations.len(), rows.len());

    observations
}

/// Timestamp fields arrive as ISO text or as epoch seconds.
fn value_timestamp(value: &FieldValue) -> Option<DateTime<Utc>> {
    match value {
        FieldValue::Text(s) => parse_timestamp(s),
        FieldValue::Number(n) => Utc.timestamp_opt(*n as i64, 0).single(),
        _ => None,
    }
}
