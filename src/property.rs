//! Normalized property model
//!
//! Adapters turn format-specific input into [`Configuration`]s: a named,
//! immutable set of [`Property`] values keyed by a dotted path such as
//! `database.driver`. The matcher and correlator only ever see this model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// A typed scalar configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Decimal text (`2.10`, `0.75`), kept verbatim so it can still be read
    /// as a two-part version
    #[serde(skip_deserializing)]
    Decimal(String),
    /// Version-shaped string (`2.5.1`, `v1.0.0-rc1`), kept verbatim
    #[serde(skip_deserializing)]
    Version(String),
    String(String),
}

impl Value {
    /// Infer a typed value from raw text (e.g. a `key=value` line)
    pub fn infer(raw: &str) -> Self {
        let trimmed = raw.trim();

        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return Value::Boolean(true),
            "false" => return Value::Boolean(false),
            _ => {}
        }

        // `0755` and `+5` stay text
        if let Ok(i) = trimmed.parse::<i64>() {
            if i.to_string() == trimmed {
                return Value::Integer(i);
            }
        }

        if looks_like_float(trimmed) && trimmed.parse::<f64>().is_ok() {
            return Value::Decimal(trimmed.to_string());
        }

        if looks_like_version(trimmed) && parse_version(trimmed).is_some() {
            return Value::Version(trimmed.to_string());
        }

        Value::String(trimmed.to_string())
    }

    /// Semantic type used for comparisons
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) | Value::Float(_) | Value::Decimal(_) => ValueType::Number,
            Value::Version(_) => ValueType::Version,
            Value::String(s) if s.is_empty() => ValueType::Unknown,
            Value::String(_) => ValueType::String,
        }
    }

    /// Interpret the value as a semantic version, if it has that shape
    pub fn as_version(&self) -> Option<semver::Version> {
        match self {
            Value::Boolean(_) => None,
            Value::Version(s) | Value::Decimal(s) | Value::String(s) => parse_version(s),
            Value::Integer(_) | Value::Float(_) => parse_version(&self.to_string()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Type-aware equality
    ///
    /// Booleans and numbers compare by value, versions by semantic-version
    /// ordering; any other pairing falls back to the canonical text form, so
    /// `"8080"` equals `8080` and `"false"` equals `false`.
    pub fn loosely_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (a, b) if a.as_f64().is_some() && b.as_f64().is_some() => a.as_f64() == b.as_f64(),
            (Value::Version(_), _) | (_, Value::Version(_)) => {
                match (self.as_version(), other.as_version()) {
                    (Some(a), Some(b)) => a == b,
                    _ => self.to_string() == other.to_string(),
                }
            }
            _ => self.to_string() == other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Version(s) | Value::Decimal(s) | Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

/// Inferred semantic type of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Number,
    Boolean,
    Version,
    Unknown,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::String => write!(f, "string"),
            ValueType::Number => write!(f, "number"),
            ValueType::Boolean => write!(f, "boolean"),
            ValueType::Version => write!(f, "version"),
            ValueType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Parse a version leniently: optional `v` prefix, one to three numeric
/// components (missing ones are zero), optional pre-release/build suffix.
///
/// Returns `None` for anything else (`latest`, `1.2.3.4`, `1..2`).
pub fn parse_version(raw: &str) -> Option<semver::Version> {
    let s = raw.trim();
    let s = s
        .strip_prefix('v')
        .or_else(|| s.strip_prefix('V'))
        .unwrap_or(s);

    let split_at = s.find(['-', '+']).unwrap_or(s.len());
    let (core, suffix) = s.split_at(split_at);

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }
    if parts
        .iter()
        .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);

    semver::Version::parse(&padded).ok()
}

fn looks_like_float(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    digits.matches('.').count() == 1
        && !digits.starts_with('.')
        && !digits.ends_with('.')
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn looks_like_version(s: &str) -> bool {
    let body = s.strip_prefix('v').or_else(|| s.strip_prefix('V')).unwrap_or(s);
    let core = body.split(['-', '+']).next().unwrap_or("");
    core.matches('.').count() >= 2 || (body.len() != s.len() && !core.is_empty())
}

/// One normalized configuration setting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    /// Origin (file path, host name, logical unit)
    pub source: String,
    /// Dotted key path, unique within a configuration
    pub key: String,
    /// Typed value
    pub value: Value,
    /// Inferred semantic type
    pub raw_type: ValueType,
}

impl Property {
    /// Create a property, inferring its semantic type from the value
    pub fn new(source: &str, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            source: source.to_string(),
            key: key.to_string(),
            raw_type: value.value_type(),
            value,
        }
    }

    /// Create a property from raw text, inferring both value and type
    pub fn from_text(source: &str, key: &str, raw: &str) -> Self {
        Self::new(source, key, Value::infer(raw))
    }
}

/// Two properties in one configuration share a key
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("duplicate key '{key}' in {origin}")]
pub struct DuplicateKey {
    /// Source of the second occurrence
    pub origin: String,
    pub key: String,
}

/// A named collection of properties from one logical unit
///
/// Built once by an adapter and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Configuration {
    id: String,
    properties: BTreeMap<String, Property>,
}

impl Configuration {
    /// Create an empty configuration
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            properties: BTreeMap::new(),
        }
    }

    /// Build from a list of properties, rejecting duplicate keys
    pub fn from_properties(
        id: &str,
        properties: impl IntoIterator<Item = Property>,
    ) -> Result<Self, DuplicateKey> {
        let mut map = BTreeMap::new();
        for property in properties {
            if map.contains_key(&property.key) {
                return Err(DuplicateKey {
                    origin: property.source,
                    key: property.key,
                });
            }
            map.insert(property.key.clone(), property);
        }
        Ok(Self {
            id: id.to_string(),
            properties: map,
        })
    }

    /// Add a property sourced from the configuration itself (replaces any
    /// existing property with the same key)
    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        let property = Property::new(&self.id, key, value);
        self.properties.insert(property.key.clone(), property);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Look up a property by exact key
    pub fn get(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    /// Properties in key order
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}
