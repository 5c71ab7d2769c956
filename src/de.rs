//! Lenient serde helpers for hand-written definition documents

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Accept `18` as well as `"18.1.8"` for string-valued fields
pub(crate) fn scalar_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a scalar, got {}",
            other
        ))),
    }
}

/// Accept `compiler: clang` as shorthand for `compiler: [clang]`
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Ok(Vec::new()),
        Some(OneOrMany::One(item)) => Ok(vec![item]),
        Some(OneOrMany::Many(items)) => Ok(items),
    }
}

/// Render a scalar document value as text; `null` becomes empty
pub(crate) fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
