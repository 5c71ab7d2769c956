//! Immutable composition result

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::layer::{Layer, LayerContext, LayerType};

/// Final configuration produced by [`LayerComposer::compose`](super::LayerComposer::compose)
#[derive(Debug, Clone)]
pub struct ComposedConfig {
    context: LayerContext,
    layers: Vec<Arc<Layer>>,
}

/// Summary of one applied layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub name: String,
    pub description: String,
}

impl ComposedConfig {
    pub(crate) fn new(context: LayerContext, layers: Vec<Arc<Layer>>) -> Self {
        Self { context, layers }
    }

    pub fn compiler(&self) -> Option<&str> {
        self.context.compiler.as_deref()
    }

    pub fn compiler_version(&self) -> Option<&str> {
        self.context.compiler_version.as_deref()
    }

    pub fn platform(&self) -> Option<&str> {
        self.context.platform.as_deref()
    }

    pub fn stdlib(&self) -> Option<&str> {
        self.context.stdlib.as_deref()
    }

    pub fn build_type(&self) -> Option<&str> {
        self.context.build_type.as_deref()
    }

    pub fn compile_flags(&self) -> &[String] {
        self.context.compile_flags()
    }

    pub fn link_flags(&self) -> &[String] {
        self.context.link_flags()
    }

    pub fn defines(&self) -> &[String] {
        self.context.defines()
    }

    pub fn cmake_variables(&self) -> &BTreeMap<String, String> {
        self.context.cmake_variables()
    }

    pub fn runtime_env(&self) -> &BTreeMap<String, String> {
        self.context.runtime_env()
    }

    pub fn sanitizers(&self) -> &BTreeSet<String> {
        self.context.sanitizers()
    }

    /// Linker named by the first `-fuse-ld=<name>` link flag
    pub fn linker(&self) -> Option<&str> {
        self.context.linker()
    }

    /// Applied layers in canonical order
    pub fn layers(&self) -> &[Arc<Layer>] {
        &self.layers
    }

    pub fn context(&self) -> &LayerContext {
        &self.context
    }

    pub fn layer_info(&self) -> Vec<LayerInfo> {
        self.layers
            .iter()
            .map(|layer| LayerInfo {
                layer_type: layer.layer_type(),
                name: layer.name().to_string(),
                description: layer.description().to_string(),
            })
            .collect()
    }

    pub fn to_dict(&self) -> Value {
        json!({
            "compiler": self.compiler(),
            "compiler_version": self.compiler_version(),
            "platform": self.platform(),
            "stdlib": self.stdlib(),
            "build_type": self.build_type(),
            "compile_flags": self.compile_flags(),
            "link_flags": self.link_flags(),
            "defines": self.defines(),
            "cmake_variables": self.cmake_variables(),
            "runtime_env": self.runtime_env(),
            "sanitizers": self.sanitizers(),
            "linker": self.linker(),
            "layers": self.layers.iter().map(|l| l.id().to_string()).collect::<Vec<_>>(),
        })
    }

    /// SHA-256 hex digest of the RFC 8785 canonical form of [`to_dict`](Self::to_dict)
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let jcs_bytes = serde_json_canonicalizer::to_vec(&self.to_dict())?;

        let mut hasher = Sha256::new();
        hasher.update(&jcs_bytes);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl Serialize for ComposedConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_dict().serialize(serializer)
    }
}
