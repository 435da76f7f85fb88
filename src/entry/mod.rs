//! Entry, tag and metadata types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{QmdError, Result};

/// A primitive metadata value.
///
/// Metadata is schema-less but flat: nested arrays and objects are rejected
/// so the stored encoding stays a canonical string-to-primitive map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    /// Parse a CLI-style value: booleans and numbers are recognised, anything
    /// else is kept as text.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "true" => return Self::Bool(true),
            "false" => return Self::Bool(false),
            "null" => return Self::Null,
            _ => {}
        }
        if let Ok(n) = raw.parse::<i64>() {
            return Self::Integer(n);
        }
        match raw.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Text(raw.to_string()),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Canonical metadata map. `BTreeMap` keeps the serialized form key-sorted.
pub type Metadata = BTreeMap<String, MetaValue>;

/// Encode metadata as canonical JSON text.
///
/// # Errors
///
/// Returns `QmdError::Serialization` if encoding fails.
pub fn encode_metadata(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

/// Decode stored metadata. Empty or missing text decodes to an empty map.
///
/// # Errors
///
/// Returns `QmdError::Serialization` if the stored text is not a flat map.
pub fn decode_metadata(raw: Option<&str>) -> Result<Metadata> {
    match raw {
        None => Ok(Metadata::new()),
        Some(text) if text.trim().is_empty() => Ok(Metadata::new()),
        Some(text) => Ok(serde_json::from_str(text)?),
    }
}

/// Convert arbitrary JSON into metadata, rejecting nested values.
///
/// # Errors
///
/// Returns `QmdError::InvalidArgument` if `value` is not an object or holds
/// arrays/objects.
pub fn metadata_from_json(value: serde_json::Value) -> Result<Metadata> {
    match value {
        serde_json::Value::Null => Ok(Metadata::new()),
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(key, value)| {
                let parsed: MetaValue = match value {
                    serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                        return Err(QmdError::invalid(format!(
                            "metadata value for '{key}' must be a string, number, boolean or null"
                        )));
                    }
                    other => serde_json::from_value(other)?,
                };
                Ok((key, parsed))
            })
            .collect(),
        _ => Err(QmdError::invalid("metadata must be a JSON object")),
    }
}

/// A stored document unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub updated_at: i64,
}

/// A named label attachable to many entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub color: Option<String>,
}

/// A search hit: the entry plus its relevance score (higher is better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    #[serde(flatten)]
    pub entry: Entry,
    pub score: f32,
}

/// Aggregate read of an entry, its outgoing relations and its tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub entry: Entry,
    pub related: Vec<Entry>,
    pub tags: Vec<Tag>,
}

/// Validate a caller-supplied entry id.
///
/// Ids are opaque: any non-empty string is accepted as-is.
///
/// # Errors
///
/// Returns `QmdError::InvalidArgument` if the id is empty.
pub fn validate_id(id: &str, field_name: &str) -> Result<()> {
    if id.is_empty() {
        return Err(QmdError::invalid(format!("{field_name} cannot be empty")));
    }
    Ok(())
}
