//! Typed compiler definition
//!
//! The resolver merges raw documents; once the `extends` chain and platform
//! override are applied the result is deserialized into [`CompilerDefinition`]
//! so shape errors surface at load time instead of at first query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::de::scalar_string;

/// Compile flags, defines and link flags contributed together
/// (standard libraries, sanitizers, LTO and coverage variants).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagBundle {
    #[serde(default)]
    pub compile_flags: Vec<String>,

    #[serde(default)]
    pub defines: Vec<String>,

    #[serde(default)]
    pub link_flags: Vec<String>,
}

/// Linker entry: an inline flag or the name of a linker layer file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkerEntry {
    Inline { flag: String },
    Reference(String),
}

/// `features` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub sanitizers: BTreeMap<String, FlagBundle>,

    #[serde(default)]
    pub lto: BTreeMap<String, FlagBundle>,

    #[serde(default)]
    pub coverage: BTreeMap<String, FlagBundle>,
}

/// Per-language standard defaults (`standards.cpp.default`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardDefaults {
    #[serde(default)]
    pub default: Option<String>,
}

/// Nested `cmake.variables` form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CmakeSection {
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
}

/// A fully resolved compiler definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerDefinition {
    pub name: String,

    pub compiler_family: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,

    #[serde(default, deserialize_with = "scalar_string")]
    pub version: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    /// Build-type key (lowercase) -> flags; `common` applies unconditionally
    #[serde(default)]
    pub flags: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub warning_levels: BTreeMap<String, Vec<String>>,

    /// Language -> standard id -> flag
    #[serde(default)]
    pub language_standards: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default)]
    pub standards: BTreeMap<String, StandardDefaults>,

    #[serde(default)]
    pub stdlib: BTreeMap<String, FlagBundle>,

    #[serde(default)]
    pub linker: BTreeMap<String, LinkerEntry>,

    #[serde(default)]
    pub features: Features,

    #[serde(default)]
    pub cmake_variables: BTreeMap<String, Value>,

    #[serde(default)]
    pub cmake: CmakeSection,

    #[serde(default)]
    pub executables: BTreeMap<String, String>,

    #[serde(default)]
    pub platform_overrides: BTreeMap<String, Value>,
}

/// Fields every compiler definition must carry
pub const REQUIRED_FIELDS: &[&str] = &["name", "compiler_family"];

/// Required fields absent from a raw document
pub fn missing_required_fields(doc: &Value) -> Vec<&'static str> {
    REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| doc.get(field).map_or(true, Value::is_null))
        .collect()
}
