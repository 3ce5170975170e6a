//! Adapters turning configuration sources into the property model
//!
//! The engine only sees [`Configuration`]s. Anything that can produce one
//! implements [`Adapter`]; [`FileAdapter`] covers JSON, YAML and `key=value`
//! text files.

use crate::property::{Configuration, DuplicateKey, Property, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A source could not be turned into a configuration
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unsupported configuration format: {0}")]
    UnsupportedFormat(String),

    #[error("Duplicate key '{key}' in {origin}")]
    DuplicateKey { origin: String, key: String },

    #[error("{origin}:{line}: expected 'key=value'")]
    InvalidLine { origin: String, line: usize },

    #[error("{0}: top level is not a mapping")]
    NotAMapping(String),
}

impl From<DuplicateKey> for AdapterError {
    fn from(e: DuplicateKey) -> Self {
        AdapterError::DuplicateKey {
            origin: e.origin,
            key: e.key,
        }
    }
}

/// Anything that can produce a normalized configuration
pub trait Adapter {
    /// Human-readable name for logs
    fn name(&self) -> String;

    fn produce(&self) -> Result<Configuration, AdapterError>;
}

/// In-memory configurations produce themselves
impl Adapter for Configuration {
    fn name(&self) -> String {
        self.id().to_string()
    }

    fn produce(&self) -> Result<Configuration, AdapterError> {
        Ok(self.clone())
    }
}

/// Supported file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Json,
    Yaml,
    KeyValue,
}

impl FileFormat {
    /// Pick a format from the file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "json" => Some(FileFormat::Json),
            "yaml" | "yml" => Some(FileFormat::Yaml),
            "properties" | "env" | "conf" | "cfg" | "ini" => Some(FileFormat::KeyValue),
            _ => None,
        }
    }
}

/// Reads one configuration file
#[derive(Debug, Clone)]
pub struct FileAdapter {
    path: PathBuf,
    id: Option<String>,
}

impl FileAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            id: None,
        }
    }

    /// Use this configuration id instead of the file path
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Parse content as if it had been read from this adapter's path
    pub fn parse(&self, content: &str) -> Result<Configuration, AdapterError> {
        let origin = self.path.display().to_string();
        let id = self.id.clone().unwrap_or_else(|| origin.clone());

        let format = FileFormat::from_path(&self.path)
            .ok_or_else(|| AdapterError::UnsupportedFormat(origin.clone()))?;

        let properties = match format {
            FileFormat::Json => {
                let doc: serde_json::Value = serde_json::from_str(content)?;
                flatten_document(&doc, &origin)?
            }
            FileFormat::Yaml => {
                let doc: serde_json::Value = serde_yaml::from_str(content)?;
                flatten_document(&doc, &origin)?
            }
            FileFormat::KeyValue => parse_key_values(content, &origin)?,
        };

        log::debug!("{}: {} propert(ies)", origin, properties.len());
        Ok(Configuration::from_properties(&id, properties)?)
    }
}

impl Adapter for FileAdapter {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn produce(&self) -> Result<Configuration, AdapterError> {
        let content = std::fs::read_to_string(&self.path)?;
        self.parse(&content)
    }
}

/// Run every adapter in order
///
/// With `skip_invalid`, failing sources are logged and left out; otherwise
/// the first failure is returned.
pub fn produce_all<A: Adapter>(
    adapters: &[A],
    skip_invalid: bool,
) -> Result<Vec<Configuration>, AdapterError> {
    let mut configurations = Vec::with_capacity(adapters.len());
    for adapter in adapters {
        match adapter.produce() {
            Ok(configuration) => configurations.push(configuration),
            Err(e) if skip_invalid => {
                log::warn!("skipping {}: {}", adapter.name(), e);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(configurations)
}

/// Flatten a structured document into dotted-key properties
fn flatten_document(doc: &serde_json::Value, origin: &str) -> Result<Vec<Property>, AdapterError> {
    if !doc.is_object() {
        return Err(AdapterError::NotAMapping(origin.to_string()));
    }

    let mut properties = Vec::new();
    flatten_into(doc, String::new(), origin, &mut properties);
    Ok(properties)
}

fn flatten_into(value: &serde_json::Value, prefix: String, origin: &str, out: &mut Vec<Property>) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };

    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, join(key), origin, out);
            }
        }
        serde_json::Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(child, join(&idx.to_string()), origin, out);
            }
        }
        serde_json::Value::Null => {}
        scalar => {
            if let Some(value) = scalar_value(scalar) {
                out.push(Property::new(origin, &prefix, value));
            }
        }
    }
}

fn scalar_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map(Value::Integer)
            .or_else(|| n.as_f64().map(Value::Float)),
        serde_json::Value::String(s) => Some(Value::infer(s)),
        _ => None,
    }
}

/// Parse `key=value` text with `[section]` prefixes
fn parse_key_values(content: &str, origin: &str) -> Result<Vec<Property>, AdapterError> {
    let mut properties = Vec::new();
    let mut section: Option<String> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim();
            section = (!name.is_empty()).then(|| name.to_string());
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = line
            .split_once('=')
            .or_else(|| line.split_once(':'))
            .ok_or_else(|| AdapterError::InvalidLine {
                origin: origin.to_string(),
                line: idx + 1,
            })?;

        let key = key.trim();
        if key.is_empty() {
            return Err(AdapterError::InvalidLine {
                origin: origin.to_string(),
                line: idx + 1,
            });
        }

        let key = match &section {
            Some(section) => format!("{}.{}", section, key),
            None => key.to_string(),
        };

        properties.push(Property::from_text(origin, &key, unquote(value.trim())));
    }

    Ok(properties)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
