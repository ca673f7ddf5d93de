//! Search backend boundary.
//!
//! The catalog consumes a sequence of raw rows — maps of field name to a
//! tagged wire value — produced by an async search job against the search
//! head. Everything past this boundary works on normalized observations.

pub mod search;
pub mod value;

pub use search::{SearchClient, SourceError};
pub use value::{FieldValue, RawRecord};
