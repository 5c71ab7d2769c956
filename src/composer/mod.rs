//! Layer Composer
//!
//! Composes a [`ComposedConfig`] from a list of [`LayerSpec`]s:
//! 1. Validate the request (required types present, no duplicate single-instance types)
//! 2. Load every layer: project-local, then global (user), then built-in
//! 3. Check declared conflicts across the whole requested set
//! 4. Apply layers to a fresh [`LayerContext`] in canonical type order, then
//!    by name within a type, so the result does not depend on request order
//!
//! Composition is all-or-nothing: the context is private to the call and is
//! dropped on the first error.

mod builtin;
mod composed;

pub use builtin::{builtin_document, builtin_names};
pub use composed::{ComposedConfig, LayerInfo};

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use cfgstack_doc::{parse_document, DocError, Format, Vars};
use serde::Deserialize;

use crate::layer::{
    DocumentError, Layer, LayerContext, LayerError, LayerId, LayerType, LibraryProbe,
    SystemLibraryProbe, UnknownLayerType,
};
use crate::settings::Settings;
use crate::store::{find_document, is_plain_name, list_documents};

/// Request to include one layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "RawLayerSpec")]
pub struct LayerSpec {
    pub layer_type: LayerType,
    pub name: String,
}

#[derive(Deserialize)]
struct RawLayerSpec {
    #[serde(rename = "type")]
    layer_type: LayerType,
    name: String,
}

impl TryFrom<RawLayerSpec> for LayerSpec {
    type Error = LayerSpecError;

    fn try_from(raw: RawLayerSpec) -> Result<Self, Self::Error> {
        if !is_plain_name(&raw.name) {
            return Err(LayerSpecError::InvalidName(raw.name));
        }
        Ok(Self::new(raw.layer_type, raw.name))
    }
}

impl LayerSpec {
    pub fn new(layer_type: LayerType, name: impl Into<String>) -> Self {
        Self {
            layer_type,
            name: name.into(),
        }
    }

    pub fn id(&self) -> LayerId {
        LayerId::new(self.layer_type, self.name.clone())
    }
}

impl fmt::Display for LayerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer_type, self.name)
    }
}

/// Malformed `type/name` text
#[derive(Debug, thiserror::Error)]
pub enum LayerSpecError {
    #[error("invalid layer spec '{0}': expected <type>/<name>")]
    Format(String),

    #[error("invalid layer name '{0}': names may not contain path separators or be '.' or '..'")]
    InvalidName(String),

    #[error(transparent)]
    UnknownType(#[from] UnknownLayerType),
}

impl FromStr for LayerSpec {
    type Err = LayerSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (layer_type, name) = s
            .split_once('/')
            .filter(|(t, n)| !t.is_empty() && !n.is_empty() && !n.contains('/'))
            .ok_or_else(|| LayerSpecError::Format(s.to_string()))?;
        let layer_type = layer_type.parse()?;
        if !is_plain_name(name) {
            return Err(LayerSpecError::InvalidName(name.to_string()));
        }
        Ok(Self::new(layer_type, name))
    }
}

/// Layer composition errors
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("layer '{id}' not found (searched: {})", .searched.join(", "))]
    NotFound { id: LayerId, searched: Vec<String> },

    #[error("invalid layer name '{name}' for type '{layer_type}': names may not contain path separators or be '.' or '..'")]
    InvalidName { layer_type: LayerType, name: String },

    #[error("failed to read layer '{id}' from {}: {source}", .path.display())]
    Io {
        id: LayerId,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid layer '{id}' ({origin}): {source}")]
    InvalidDocument {
        id: LayerId,
        origin: String,
        #[source]
        source: DocError,
    },

    #[error("invalid layer '{id}' ({origin}): {source}")]
    Definition {
        id: LayerId,
        origin: String,
        #[source]
        source: DocumentError,
    },

    #[error("missing required layer type '{0}'")]
    MissingRequired(LayerType),

    #[error("multiple '{layer_type}' layers are not allowed ({first}, {second})")]
    Duplicate {
        layer_type: LayerType,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Layer(#[from] LayerError),
}

impl ComposeError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::NotFound { .. } => "not_found",
            ComposeError::InvalidName { .. } => "invalid_name",
            ComposeError::Io { .. } => "io",
            ComposeError::InvalidDocument { .. } => "invalid_document",
            ComposeError::Definition { source, .. } => source.kind(),
            ComposeError::MissingRequired(_) => "missing_required_layer",
            ComposeError::Duplicate { .. } => "duplicate_layer",
            ComposeError::Layer(e) => e.kind(),
        }
    }
}

/// Where a layer document was found
#[derive(Debug, Clone, PartialEq, Eq)]
enum LayerSource {
    File(PathBuf),
    Builtin,
}

impl fmt::Display for LayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerSource::File(path) => write!(f, "{}", path.display()),
            LayerSource::Builtin => write!(f, "built-in"),
        }
    }
}

/// Loads layers and composes them into configurations
pub struct LayerComposer {
    project_layers_dir: Option<PathBuf>,
    global_layers_dir: Option<PathBuf>,
    include_builtin: bool,
    probe: Arc<dyn LibraryProbe>,
    cache: Mutex<HashMap<LayerId, Arc<Layer>>>,
}

impl fmt::Debug for LayerComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerComposer")
            .field("project_layers_dir", &self.project_layers_dir)
            .field("global_layers_dir", &self.global_layers_dir)
            .field("include_builtin", &self.include_builtin)
            .finish_non_exhaustive()
    }
}

impl Default for LayerComposer {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerComposer {
    /// Composer backed by the built-in library only
    pub fn new() -> Self {
        Self {
            project_layers_dir: None,
            global_layers_dir: None,
            include_builtin: true,
            probe: Arc::new(SystemLibraryProbe),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            project_layers_dir: settings.project_layers_dir(),
            global_layers_dir: settings.global_layers_dir.clone(),
            include_builtin: settings.include_builtin,
            ..Self::new()
        }
    }

    /// Search `<root>/.cfgstack/layers/` first
    pub fn with_project_root(mut self, root: impl AsRef<Path>) -> Self {
        self.project_layers_dir = Some(root.as_ref().join(crate::settings::PROJECT_DIR).join("layers"));
        self
    }

    pub fn with_global_layers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.global_layers_dir = Some(dir.into());
        self
    }

    pub fn with_builtin(mut self, include_builtin: bool) -> Self {
        self.include_builtin = include_builtin;
        self
    }

    /// Replace the allocator library probe
    pub fn with_probe(mut self, probe: Arc<dyn LibraryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Compose without interpolation
    pub fn compose(&self, specs: &[LayerSpec]) -> Result<ComposedConfig, ComposeError> {
        let (context, layers) = self.apply_all(specs)?;
        Ok(ComposedConfig::new(context, layers))
    }

    /// Compose, then interpolate `cmake_variables` and `runtime_env` with
    /// `compiler_version`, `platform` and `vars`
    pub fn compose_with_vars(
        &self,
        specs: &[LayerSpec],
        vars: &Vars,
    ) -> Result<ComposedConfig, ComposeError> {
        let (mut context, layers) = self.apply_all(specs)?;
        context.interpolate(vars);
        Ok(ComposedConfig::new(context, layers))
    }

    fn apply_all(&self, specs: &[LayerSpec]) -> Result<(LayerContext, Vec<Arc<Layer>>), ComposeError> {
        validate_specs(specs)?;

        let mut layers = specs
            .iter()
            .map(|spec| self.load_layer(spec.layer_type, &spec.name))
            .collect::<Result<Vec<_>, _>>()?;
        check_declared_conflicts(&layers)?;

        layers.sort_by(|a, b| {
            (a.layer_type(), a.name()).cmp(&(b.layer_type(), b.name()))
        });

        let mut context = LayerContext::new();
        for layer in &layers {
            layer.apply_with(&mut context, self.probe.as_ref())?;
        }
        tracing::debug!(layers = layers.len(), "composition complete");
        Ok((context, layers))
    }

    /// Load (and cache) a layer by type and name
    pub fn load_layer(&self, layer_type: LayerType, name: &str) -> Result<Arc<Layer>, ComposeError> {
        if !is_plain_name(name) {
            return Err(ComposeError::InvalidName {
                layer_type,
                name: name.to_string(),
            });
        }
        let id = LayerId::new(layer_type, name);

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(layer) = cache.get(&id) {
            return Ok(Arc::clone(layer));
        }

        let (source, text) = self.find_layer(&id)?;
        tracing::debug!(layer = %id, source = %source, "loading layer");

        let format = match &source {
            LayerSource::File(path) => Format::from_path(path),
            LayerSource::Builtin => Format::Yaml,
        };
        let document = parse_document(&text, format).map_err(|source_err| ComposeError::InvalidDocument {
            id: id.clone(),
            origin: source.to_string(),
            source: source_err,
        })?;
        let layer = Layer::from_document(layer_type, name, &document).map_err(|source_err| {
            ComposeError::Definition {
                id: id.clone(),
                origin: source.to_string(),
                source: source_err,
            }
        })?;

        let layer = Arc::new(layer);
        cache.insert(id, Arc::clone(&layer));
        Ok(layer)
    }

    fn find_layer(&self, id: &LayerId) -> Result<(LayerSource, String), ComposeError> {
        let mut searched = Vec::new();

        for dir in self.layer_dirs() {
            let type_dir = dir.join(id.layer_type.as_str());
            match find_document(&type_dir, &id.name) {
                Some(path) => {
                    let text = std::fs::read_to_string(&path).map_err(|source| ComposeError::Io {
                        id: id.clone(),
                        path: path.clone(),
                        source,
                    })?;
                    return Ok((LayerSource::File(path), text));
                }
                None => searched.push(type_dir.join(format!("{}.yaml", id.name)).display().to_string()),
            }
        }

        if self.include_builtin {
            if let Some(text) = builtin_document(id.layer_type, &id.name) {
                return Ok((LayerSource::Builtin, text.to_string()));
            }
            searched.push("built-in library".to_string());
        }

        Err(ComposeError::NotFound {
            id: id.clone(),
            searched,
        })
    }

    /// Project then global layer directories, as configured
    fn layer_dirs(&self) -> impl Iterator<Item = &PathBuf> {
        self.project_layers_dir
            .iter()
            .chain(self.global_layers_dir.iter())
    }

    /// Sorted `type/name` identifiers of every available layer
    pub fn list_layers(&self, layer_type: Option<LayerType>) -> Vec<String> {
        let types = match layer_type {
            Some(layer_type) => vec![layer_type],
            None => LayerType::ALL.to_vec(),
        };

        let mut ids = BTreeSet::new();
        for layer_type in types {
            for dir in self.layer_dirs() {
                for name in list_documents(&dir.join(layer_type.as_str())) {
                    ids.insert(format!("{}/{}", layer_type, name));
                }
            }
            if self.include_builtin {
                for name in builtin_names(layer_type) {
                    ids.insert(format!("{}/{}", layer_type, name));
                }
            }
        }
        ids.into_iter().collect()
    }
}

fn validate_specs(specs: &[LayerSpec]) -> Result<(), ComposeError> {
    for required in LayerType::REQUIRED {
        if !specs.iter().any(|spec| spec.layer_type == required) {
            return Err(ComposeError::MissingRequired(required));
        }
    }

    for layer_type in LayerType::ALL.iter().filter(|t| t.is_single_instance()) {
        let mut of_type = specs.iter().filter(|spec| spec.layer_type == *layer_type);
        if let (Some(first), Some(second)) = (of_type.next(), of_type.next()) {
            return Err(ComposeError::Duplicate {
                layer_type: *layer_type,
                first: first.name.clone(),
                second: second.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_declared_conflicts(layers: &[Arc<Layer>]) -> Result<(), LayerError> {
    for layer in layers {
        for other in layers {
            if layer.id() != other.id() && layer.declares_conflict(other.id()) {
                return Err(LayerError::Conflict {
                    layer: layer.id().clone(),
                    other: other.id().to_string(),
                    reason: "the two layers are mutually exclusive".to_string(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(items: &[&str]) -> Vec<LayerSpec> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_layer_spec_parse() {
        let spec: LayerSpec = "stdlib/libc++".parse().unwrap();
        assert_eq!(spec, LayerSpec::new(LayerType::Stdlib, "libc++"));
        assert_eq!(spec.to_string(), "stdlib/libc++");

        assert!(matches!("libc++".parse::<LayerSpec>(), Err(LayerSpecError::Format(_))));
        assert!(matches!("stdlib/".parse::<LayerSpec>(), Err(LayerSpecError::Format(_))));
        assert!(matches!("toolchain/x".parse::<LayerSpec>(), Err(LayerSpecError::UnknownType(_))));
        assert!(matches!("buildtype/..".parse::<LayerSpec>(), Err(LayerSpecError::InvalidName(_))));
        assert!(matches!("buildtype/..\\x".parse::<LayerSpec>(), Err(LayerSpecError::InvalidName(_))));
    }

    #[test]
    fn test_layer_spec_deserialize_rejects_path_names() {
        let result: Result<LayerSpec, _> =
            serde_json::from_str(r#"{"type": "buildtype", "name": "../secret/evil"}"#);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("invalid layer name"), "{}", err);
    }

    #[test]
    fn test_load_layer_rejects_path_names() {
        let err = LayerComposer::new()
            .load_layer(LayerType::BuildType, "../secret/evil")
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_name");
    }

    #[test]
    fn test_layer_spec_deserialize() {
        let spec: LayerSpec =
            serde_json::from_value(serde_json::json!({"type": "buildtype", "name": "release"})).unwrap();
        assert_eq!(spec, LayerSpec::new(LayerType::BuildType, "release"));
    }

    #[test]
    fn test_missing_base() {
        let err = LayerComposer::new()
            .compose(&specs(&["platform/linux-x64", "buildtype/release"]))
            .unwrap_err();
        assert_eq!(err.kind(), "missing_required_layer");
        assert!(err.to_string().contains("'base'"));
    }

    #[test]
    fn test_duplicate_single_instance() {
        let err = LayerComposer::new()
            .compose(&specs(&[
                "base/clang-18",
                "platform/linux-x64",
                "buildtype/release",
                "buildtype/debug",
            ]))
            .unwrap_err();
        assert_eq!(err.kind(), "duplicate_layer");
        assert!(err.to_string().contains("release"));
    }

    #[test]
    fn test_canonical_order() {
        let config = LayerComposer::new()
            .compose(&specs(&[
                "buildtype/release",
                "stdlib/libc++",
                "platform/linux-x64",
                "base/clang-18",
            ]))
            .unwrap();
        let ids: Vec<String> = config.layers().iter().map(|l| l.id().to_string()).collect();
        assert_eq!(
            ids,
            ["base/clang-18", "platform/linux-x64", "stdlib/libc++", "buildtype/release"]
        );
    }

    #[test]
    fn test_unknown_layer() {
        let err = LayerComposer::new()
            .load_layer(LayerType::Platform, "amiga-m68k")
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
        assert!(err.to_string().contains("platform/amiga-m68k"));
        assert!(err.to_string().contains("built-in library"));
    }

    #[test]
    fn test_builtin_disabled() {
        let composer = LayerComposer::new().with_builtin(false);
        assert!(composer.load_layer(LayerType::Base, "clang-18").is_err());
        assert!(composer.list_layers(None).is_empty());
    }

    #[test]
    fn test_layer_cache_returns_same_instance() {
        let composer = LayerComposer::new();
        let a = composer.load_layer(LayerType::BuildType, "release").unwrap();
        let b = composer.load_layer(LayerType::BuildType, "release").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_declared_conflict_regardless_of_order() {
        let err = LayerComposer::new()
            .compose(&specs(&[
                "base/clang-18",
                "platform/linux-x64",
                "buildtype/release",
                "optimization/lto-full",
                "optimization/lto-thin",
            ]))
            .unwrap_err();
        assert_eq!(err.kind(), "layer_conflict");
    }

    #[test]
    fn test_list_builtin_sanitizers() {
        assert_eq!(
            LayerComposer::new().list_layers(Some(LayerType::Sanitizer)),
            [
                "sanitizer/address",
                "sanitizer/leak",
                "sanitizer/memory",
                "sanitizer/thread",
                "sanitizer/undefined"
            ]
        );
    }
}
