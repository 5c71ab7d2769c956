//! `{{placeholder}}` interpolation
//!
//! Tokens with no binding are left verbatim so a partially bound template can
//! be interpolated again later with more variables.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex_lite::{Captures, Regex};
use serde_json::Value;

/// Interpolation context: variable name -> replacement text.
pub type Vars = BTreeMap<String, String>;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // A literal pattern; every test that interpolates compiles it.
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}\}").expect("placeholder pattern")
    })
}

/// Substitute every bound `{{name}}` token in `template`.
pub fn interpolate_str(template: &str, vars: &Vars) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }
    token_pattern()
        .replace_all(template, |caps: &Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Interpolate recursively through strings, arrays and objects.
///
/// Object keys are not interpolated. Non-string scalars pass through.
pub fn interpolate(value: &Value, vars: &Vars) -> Value {
    match value {
        Value::String(s) => Value::String(interpolate_str(s, vars)),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Names of all placeholder tokens in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<&str> {
    token_pattern()
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}
