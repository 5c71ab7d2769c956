//! Layer definition documents
//!
//! ```yaml
//! type: security
//! description: Full hardening
//! security_type: hardened
//! flags: {common: [], compile: [], link: []}
//! defines: []
//! cmake_variables: {}
//! runtime_env: {}
//! requires: {compiler: [clang, gcc]}
//! conflicts_with: {sanitizer: [memory]}
//! ```
//!
//! Kind fields that name the layer itself (`platform`, `stdlib`,
//! `security_type`, ...) default to the layer name.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use super::{
    AllocatorSpec, IntegrationMethod, Layer, LayerKind, LayerSettings, LayerType, ParameterError,
    ProfilingMode, Requirements, SecurityFeature,
};
use crate::de::{render_scalar, scalar_string};

/// Errors turning a parsed document into a [`Layer`]
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("layer type mismatch: expected '{expected}', got '{}'", .found.as_deref().unwrap_or("<missing>"))]
    TypeMismatch {
        expected: LayerType,
        found: Option<String>,
    },

    #[error("malformed layer document: {0}")]
    Malformed(String),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

impl DocumentError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            DocumentError::TypeMismatch { .. } => "type_mismatch",
            DocumentError::Malformed(_) => "invalid_document",
            DocumentError::Parameter(_) => "parameter_validation",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LayerDocument {
    #[serde(rename = "type")]
    layer_type: Option<String>,
    description: Option<String>,

    compiler: Option<String>,
    #[serde(alias = "compiler_version", deserialize_with = "scalar_string")]
    version: Option<String>,
    platform: Option<String>,
    stdlib: Option<String>,
    build_type: Option<String>,
    optimization: Option<String>,
    sanitizer: Option<String>,
    method: Option<String>,
    security_type: Option<String>,
    #[serde(deserialize_with = "scalar_string")]
    level: Option<String>,
    mode: Option<String>,
    stack_size: Option<u64>,
    profiling_type: Option<String>,

    flags: FlagsSection,
    defines: Vec<String>,
    cmake_variables: BTreeMap<String, Value>,
    runtime_env: BTreeMap<String, Value>,
    requires: Requirements,
    conflicts_with: BTreeMap<LayerType, Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FlagsSection {
    common: Vec<String>,
    compile: Vec<String>,
    link: Vec<String>,
}

impl Layer {
    /// Build a layer of `layer_type` named `name` from a parsed document.
    ///
    /// The document's `type` field must equal `layer_type`.
    pub fn from_document(
        layer_type: LayerType,
        name: &str,
        document: &Value,
    ) -> Result<Layer, DocumentError> {
        let doc = LayerDocument::deserialize(document)
            .map_err(|e| DocumentError::Malformed(e.to_string()))?;

        let declared = doc.layer_type.as_deref().map(str::parse::<LayerType>);
        if !matches!(declared, Some(Ok(t)) if t == layer_type) {
            return Err(DocumentError::TypeMismatch {
                expected: layer_type,
                found: doc.layer_type.clone(),
            });
        }

        let kind = build_kind(layer_type, name, &doc)?;
        let mut layer = Layer::new(name, kind)
            .with_description(doc.description.clone().unwrap_or_default())
            .with_settings(LayerSettings {
                common_flags: doc.flags.common,
                compile_flags: doc.flags.compile,
                link_flags: doc.flags.link,
                defines: doc.defines,
                cmake_variables: render_map(&doc.cmake_variables),
                runtime_env: render_map(&doc.runtime_env),
            })
            .with_requires(doc.requires);

        for (conflict_type, names) in doc.conflicts_with {
            for conflict in names {
                layer = layer.with_conflict(conflict_type, conflict);
            }
        }
        Ok(layer)
    }
}

fn build_kind(layer_type: LayerType, name: &str, doc: &LayerDocument) -> Result<LayerKind, DocumentError> {
    let or_name = |value: &Option<String>| value.clone().unwrap_or_else(|| name.to_string());

    let kind = match layer_type {
        LayerType::Base => LayerKind::Base {
            compiler: doc
                .compiler
                .clone()
                .ok_or_else(|| DocumentError::Malformed("base layer must declare 'compiler'".to_string()))?,
            version: doc.version.clone(),
        },
        LayerType::Platform => LayerKind::Platform {
            platform: or_name(&doc.platform),
        },
        LayerType::Stdlib => LayerKind::Stdlib {
            stdlib: or_name(&doc.stdlib),
        },
        LayerType::BuildType => LayerKind::BuildType {
            build_type: or_name(&doc.build_type),
        },
        LayerType::Optimization => LayerKind::Optimization {
            optimization: or_name(&doc.optimization),
        },
        LayerType::Sanitizer => LayerKind::Sanitizer {
            sanitizer: or_name(&doc.sanitizer),
        },
        LayerType::Security => LayerKind::Security(SecurityFeature::from_params(
            &or_name(&doc.security_type),
            doc.level.as_deref(),
            doc.mode.as_deref(),
            doc.stack_size,
        )?),
        LayerType::Profiling => LayerKind::Profiling(or_name(&doc.profiling_type).parse()?),
        LayerType::Allocator => {
            let method = match doc.method.as_deref() {
                Some(method) => method.parse()?,
                None => IntegrationMethod::default(),
            };
            LayerKind::Allocator(AllocatorSpec::new(name, method))
        }
    };
    Ok(kind)
}

fn render_map(values: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    values
        .iter()
        .map(|(key, value)| (key.clone(), render_scalar(value)))
        .collect()
}
