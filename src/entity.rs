//! Logical Entities
//!
//! The caller-visible, de-versioned view of a row: a key, an open property
//! bag and an optional optimistic-concurrency token.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::version::{Version, BIGGEST_VERSION, SMALLEST_VERSION};

/// Typed property value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Binary(Vec<u8>),
    Guid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
}

impl Value {
    /// Parse a `type=value` style literal as used by the CLI
    ///
    /// `kind` is one of `string`, `bool`, `i32`, `i64`, `f64`, `guid`,
    /// `datetime` (RFC 3339).
    pub fn parse_typed(kind: &str, raw: &str) -> Result<Self> {
        let invalid =
            |e: String| Error::Validation(format!("invalid {} value {:?}: {}", kind, raw, e));

        let value = match kind {
            "string" | "str" => Value::String(raw.to_string()),
            "bool" => Value::Bool(raw.parse::<bool>().map_err(|e| invalid(e.to_string()))?),
            "i32" | "int32" => {
                Value::Int32(raw.parse::<i32>().map_err(|e| invalid(e.to_string()))?)
            }
            "i64" | "int64" | "int" => {
                Value::Int64(raw.parse::<i64>().map_err(|e| invalid(e.to_string()))?)
            }
            "f64" | "double" => {
                Value::Double(raw.parse::<f64>().map_err(|e| invalid(e.to_string()))?)
            }
            "guid" | "uuid" => {
                Value::Guid(raw.parse::<uuid::Uuid>().map_err(|e| invalid(e.to_string()))?)
            }
            "datetime" => Value::DateTime(
                chrono::DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| invalid(e.to_string()))?
                    .with_timezone(&chrono::Utc),
            ),
            other => {
                return Err(Error::Validation(format!("unknown value type {:?}", other)));
            }
        };

        Ok(value)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Binary(v) => write!(f, "<{} bytes>", v.len()),
            Value::Guid(v) => write!(f, "{}", v),
            Value::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

/// Property bag: name -> value
pub type Properties = BTreeMap<String, Value>;

/// Optimistic-concurrency token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ETag {
    /// Wildcard: match any current version
    Any,
    /// Match exactly this version
    Version(Version),
}

impl ETag {
    /// Check whether this token accepts the given current version
    pub fn matches(&self, current: Version) -> bool {
        match self {
            ETag::Any => true,
            ETag::Version(v) => *v == current,
        }
    }
}

impl FromStr for ETag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "*" {
            return Ok(ETag::Any);
        }
        // Unsigned decimal within the minted version range
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidETag(s.to_string()));
        }
        match s.parse::<Version>() {
            Ok(v) if (SMALLEST_VERSION..=BIGGEST_VERSION).contains(&v) => Ok(ETag::Version(v)),
            _ => Err(Error::InvalidETag(s.to_string())),
        }
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ETag::Any => write!(f, "*"),
            ETag::Version(v) => write!(f, "{}", v),
        }
    }
}

impl Serialize for ETag {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ETag {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Caller-visible row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<ETag>,
    #[serde(default)]
    pub properties: Properties,
}

impl Entity {
    /// Create an entity with no properties and no ETag
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            etag: None,
            properties: Properties::new(),
        }
    }

    /// Add or overwrite a property
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Set the concurrency token
    pub fn with_etag(mut self, etag: ETag) -> Self {
        self.etag = Some(etag);
        self
    }

    /// Look up a property
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Check whether two entities hold the same key and properties,
    /// ignoring their tokens
    pub fn same_content(&self, other: &Entity) -> bool {
        self.partition_key == other.partition_key
            && self.row_key == other.row_key
            && self.properties == other.properties
    }
}
