//! Tagged wire values from the search backend.
//!
//! Result rows arrive as maps of field name to a small set of wire shapes.
//! Conversion to the catalog data model happens only at the normalizer
//! boundary; nothing downstream inspects raw values.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One raw result row from the search head.
pub type RawRecord = HashMap<String, FieldValue>;

/// A single field value as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Number(f64),
    List(Vec<String>),
    Null,
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to a non-negative count. Unparsable or negative input
    /// degrades to 0.
    pub fn as_count(&self) -> u64 {
        match self {
            FieldValue::Number(n) if *n >= 0.0 => *n as u64,
            FieldValue::Text(s) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Coerce to a deduplicated value set.
    ///
    /// Lists keep their non-empty elements; pipe-joined text (`"a|b|c"`,
    /// the delimited round-trip form of a multi-valued field) splits on
    /// `|`; any other non-empty text is a one-element set.
    pub fn as_set(&self) -> BTreeSet<String> {
        match self {
            FieldValue::List(items) => items
                .iter()
                .filter(|v| !v.is_empty())
                .cloned()
                .collect(),
            FieldValue::Text(s) if s.contains('|') => s
                .split('|')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect(),
            FieldValue::Text(s) if !s.is_empty() => BTreeSet::from([s.clone()]),
            _ => BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_wire_shapes() {
        let row: RawRecord = serde_json::from_str(
            r#"{"indicator":"10.0.0.1","total_hits":42,"src_ips":["a","b"],"note":null}"#,
        )
        .unwrap();

        assert_eq!(row["indicator"], FieldValue::Text("10.0.0.1".to_string()));
        assert_eq!(row["total_hits"], FieldValue::Number(42.0));
        assert_eq!(
            row["src_ips"],
            FieldValue::List(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(row["note"], FieldValue::Null);
    }

    #[test]
    fn test_count_coercion() {
        assert_eq!(FieldValue::Number(42.0).as_count(), 42);
        assert_eq!(FieldValue::Text("17".to_string()).as_count(), 17);
        assert_eq!(FieldValue::Text("garbage".to_string()).as_count(), 0);
        assert_eq!(FieldValue::Number(-3.0).as_count(), 0);
        assert_eq!(FieldValue::Null.as_count(), 0);
    }

    #[test]
    fn test_set_coercion() {
        let list = FieldValue::List(vec!["a".to_string(), "".to_string(), "b".to_string(), "a".to_string()]);
        assert_eq!(list.as_set(), BTreeSet::from(["a".to_string(), "b".to_string()]));

        let piped = FieldValue::Text("a|b| c".to_string());
        assert_eq!(
            piped.as_set(),
            BTreeSet::from(["a".to_string(), "b".to_string(), "c".to_string()])
        );

        let scalar = FieldValue::Text("solo".to_string());
        assert_eq!(scalar.as_set(), BTreeSet::from(["solo".to_string()]));

        assert!(FieldValue::Null.as_set().is_empty());
        assert!(FieldValue::Text(String::new()).as_set().is_empty());
    }
}
