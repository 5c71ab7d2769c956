//! Parsing definition text into documents

use std::path::Path;

use serde_json::Value;

/// Source format of a definition document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    /// Infer the format from a file extension (`.json` is JSON, anything else YAML)
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

/// Errors produced while parsing a document
#[derive(Debug, thiserror::Error)]
pub enum DocError {
    #[error("invalid YAML syntax: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON syntax: {0}")]
    Json(#[from] serde_json::Error),

    #[error("document is empty")]
    Empty,

    #[error("document root must be a mapping, got {0}")]
    NotAMapping(&'static str),
}

/// Parse `text` and require the root to be a mapping.
pub fn parse_document(text: &str, format: Format) -> Result<Value, DocError> {
    if text.trim().is_empty() {
        return Err(DocError::Empty);
    }

    let value: Value = match format {
        Format::Yaml => serde_yaml::from_str(text)?,
        Format::Json => serde_json::from_str(text)?,
    };

    match value {
        Value::Object(_) => Ok(value),
        Value::Null => Err(DocError::Empty),
        other => Err(DocError::NotAMapping(kind_name(&other))),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}
