//! Compiler Definition Resolver
//!
//! Resolves a compiler definition into a single flattened document:
//! 1. Load the named document from the [`DefinitionStore`]
//! 2. Walk the `extends` chain, merging child over parent (lists append)
//! 3. Apply the matching `platform_overrides` entry (lists replace)
//! 4. Validate and wrap the result in a [`ResolvedCompilerConfig`]
//!
//! Results are cached per `(name, platform)`.

mod definition;

pub use definition::{
    CmakeSection, CompilerDefinition, Features, FlagBundle, LinkerEntry, StandardDefaults,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use cfgstack_doc::{deep_merge, interpolate, ListMerge, Vars};
use serde_json::{json, Value};

use crate::de::render_scalar;
use crate::store::{DefinitionStore, StoreError};

/// Compiler resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("compiler '{name}' is missing required fields: {}", .fields.join(", "))]
    MissingFields {
        name: String,
        fields: Vec<&'static str>,
    },

    #[error("compiler '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },

    #[error("circular extends detected: {chain}")]
    CircularExtends { chain: String },
}

impl ResolveError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ResolveError::Store(e) => e.kind(),
            ResolveError::MissingFields { .. } | ResolveError::Invalid { .. } => "invalid_document",
            ResolveError::CircularExtends { .. } => "circular_extends",
        }
    }
}

/// Resolves and caches compiler definitions
#[derive(Debug)]
pub struct CompilerResolver {
    store: Arc<DefinitionStore>,
    cache: Mutex<HashMap<(String, String), Arc<ResolvedCompilerConfig>>>,
}

impl CompilerResolver {
    pub fn new(store: Arc<DefinitionStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<DefinitionStore> {
        &self.store
    }

    /// Load a compiler definition, resolving `extends` and platform overrides.
    ///
    /// The cache lock is held while resolving so concurrent callers asking for
    /// the same key wait for the first one instead of resolving twice.
    pub fn load(
        &self,
        name: &str,
        platform: Option<&str>,
    ) -> Result<Arc<ResolvedCompilerConfig>, ResolveError> {
        let key = (name.to_string(), platform.unwrap_or("default").to_string());

        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(config) = cache.get(&key) {
            return Ok(Arc::clone(config));
        }

        let document = self.resolve_document(name, platform)?;
        let config = Arc::new(ResolvedCompilerConfig::from_document(
            name,
            platform,
            document,
            Arc::clone(&self.store),
        )?);
        cache.insert(key, Arc::clone(&config));
        Ok(config)
    }

    /// Names of all available compiler definitions
    pub fn list_available(&self) -> Vec<String> {
        self.store.list_compilers()
    }

    fn resolve_document(&self, name: &str, platform: Option<&str>) -> Result<Value, ResolveError> {
        let mut chain = vec![name.to_string()];
        let document = self.resolve_extends(name, &mut chain)?;

        match platform {
            Some(platform) => Ok(apply_platform_override(document, platform)),
            None => Ok(document),
        }
    }

    fn resolve_extends(&self, name: &str, chain: &mut Vec<String>) -> Result<Value, ResolveError> {
        let document = self.store.load_compiler(name)?;

        let parent = match document.get("extends") {
            None | Some(Value::Null) => return Ok(document),
            Some(Value::String(parent)) => parent.strip_suffix(".yaml").unwrap_or(parent).to_string(),
            Some(other) => {
                return Err(ResolveError::Invalid {
                    name: name.to_string(),
                    reason: format!("'extends' must be a compiler name, got {}", other),
                })
            }
        };

        if chain.contains(&parent) {
            chain.push(parent);
            return Err(ResolveError::CircularExtends {
                chain: chain.join(" -> "),
            });
        }

        tracing::debug!(child = name, parent = %parent, "resolving extends");
        chain.push(parent.clone());
        let base = self.resolve_extends(&parent, chain)?;
        Ok(deep_merge(base, document, ListMerge::Append))
    }
}

/// Select the override for `platform` (exact key, then the OS prefix before
/// the first `-`) and merge it with list replacement.
///
/// Replacement applies to any list present on both sides, at whatever depth
/// it sits in the map structure; list items are never merged element-wise.
pub fn apply_platform_override(document: Value, platform: &str) -> Value {
    let overrides = match document.get("platform_overrides") {
        Some(Value::Object(map)) => map,
        _ => return document,
    };

    let os_name = platform.split('-').next().unwrap_or(platform);
    let selected = overrides
        .get(platform)
        .map(|o| (platform, o))
        .or_else(|| overrides.get(os_name).map(|o| (os_name, o)));

    match selected {
        Some((key, override_doc)) => {
            tracing::debug!(platform, key, "applying platform override");
            let override_doc = override_doc.clone();
            deep_merge(document, override_doc, ListMerge::Replace)
        }
        None => document,
    }
}

/// A resolved compiler definition with a query API
#[derive(Debug)]
pub struct ResolvedCompilerConfig {
    requested_name: String,
    platform: Option<String>,
    document: Value,
    definition: CompilerDefinition,
    store: Arc<DefinitionStore>,
}

impl ResolvedCompilerConfig {
    /// Validate a resolved document and wrap it
    pub fn from_document(
        name: &str,
        platform: Option<&str>,
        document: Value,
        store: Arc<DefinitionStore>,
    ) -> Result<Self, ResolveError> {
        let missing = definition::missing_required_fields(&document);
        if !missing.is_empty() {
            return Err(ResolveError::MissingFields {
                name: name.to_string(),
                fields: missing,
            });
        }

        let definition: CompilerDefinition =
            serde_json::from_value(document.clone()).map_err(|e| ResolveError::Invalid {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            requested_name: name.to_string(),
            platform: platform.map(String::from),
            document,
            definition,
            store,
        })
    }

    /// Name the definition was requested under
    pub fn name(&self) -> &str {
        &self.requested_name
    }

    pub fn platform(&self) -> Option<&str> {
        self.platform.as_deref()
    }

    pub fn compiler_family(&self) -> &str {
        &self.definition.compiler_family
    }

    pub fn version(&self) -> Option<&str> {
        self.definition.version.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.definition
            .display_name
            .as_deref()
            .unwrap_or(&self.requested_name)
    }

    /// The typed definition
    pub fn definition(&self) -> &CompilerDefinition {
        &self.definition
    }

    /// The raw resolved document
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Flags for a build type (`Release` and `release` are equivalent).
    /// Unknown build types yield an empty slice.
    pub fn flags_for_build_type(&self, build_type: &str) -> &[String] {
        self.definition
            .flags
            .get(&build_type.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Flags applied for every build type
    pub fn common_flags(&self) -> &[String] {
        self.flags_for_build_type("common")
    }

    pub fn warning_flags(&self, level: &str) -> &[String] {
        self.definition
            .warning_levels
            .get(level)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn standard_flag(&self, language: &str, standard: &str) -> Option<&str> {
        self.definition
            .language_standards
            .get(language)?
            .get(standard)
            .map(String::as_str)
    }

    pub fn default_standard(&self, language: &str) -> Option<&str> {
        self.definition.standards.get(language)?.default.as_deref()
    }

    pub fn stdlib_flags(&self, stdlib: &str) -> Option<&FlagBundle> {
        self.definition.stdlib.get(stdlib)
    }

    /// Linker selection flag.
    ///
    /// Returns `None` when the definition declares no `linker` section.
    /// Otherwise a linker layer file `<data_dir>/layers/linker/<id>` takes
    /// precedence over the inline entry.
    pub fn linker_flag(&self, linker: &str) -> Result<Option<String>, ResolveError> {
        if self.definition.linker.is_empty() {
            return Ok(None);
        }

        if let Some(flag) = self.linker_file_flag(linker)? {
            return Ok(Some(flag));
        }

        match self.definition.linker.get(linker) {
            Some(LinkerEntry::Inline { flag }) => Ok(Some(flag.clone())),
            Some(LinkerEntry::Reference(file)) => self.linker_file_flag(file),
            None => Ok(None),
        }
    }

    fn linker_file_flag(&self, name: &str) -> Result<Option<String>, ResolveError> {
        let doc = self.store.load_aux_layer("linker", name)?;
        Ok(doc
            .as_ref()
            .and_then(|d| d.get("flag"))
            .and_then(Value::as_str)
            .filter(|flag| !flag.is_empty())
            .map(String::from))
    }

    pub fn sanitizer_flags(&self, sanitizer: &str) -> Option<&FlagBundle> {
        self.definition.features.sanitizers.get(sanitizer)
    }

    pub fn lto_flags(&self, variant: &str) -> Option<&FlagBundle> {
        self.definition.features.lto.get(variant)
    }

    pub fn coverage_flags(&self, variant: &str) -> Option<&FlagBundle> {
        self.definition.features.coverage.get(variant)
    }

    pub fn executables(&self) -> &BTreeMap<String, String> {
        &self.definition.executables
    }

    /// CMake variables with `{{placeholder}}` interpolation against `vars`.
    ///
    /// `cmake.variables` is used when non-empty, otherwise `cmake_variables`.
    /// Lists are rendered in CMake list syntax (`a;b`).
    pub fn cmake_variables(&self, vars: &Vars) -> BTreeMap<String, String> {
        let templates = if self.definition.cmake.variables.is_empty() {
            &self.definition.cmake_variables
        } else {
            &self.definition.cmake.variables
        };

        templates
            .iter()
            .map(|(key, template)| (key.clone(), render_cmake_value(&interpolate(template, vars))))
            .collect()
    }

    /// Every query answered for `build_type`, as one document.
    ///
    /// `version` is bound from the definition unless `vars` supplies it.
    pub fn report(&self, build_type: &str, vars: &Vars) -> Result<Value, ResolveError> {
        let mut bound = Vars::new();
        if let Some(version) = self.version() {
            bound.insert("version".to_string(), version.to_string());
        }
        bound.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut linkers = BTreeMap::new();
        for id in self.definition.linker.keys() {
            if let Some(flag) = self.linker_flag(id)? {
                linkers.insert(id.clone(), flag);
            }
        }

        let default_standards: BTreeMap<&str, Option<&str>> = self
            .definition
            .standards
            .keys()
            .map(|language| (language.as_str(), self.default_standard(language)))
            .collect();

        Ok(json!({
            "name": self.name(),
            "display_name": self.display_name(),
            "compiler_family": self.compiler_family(),
            "version": self.version(),
            "platform": self.platform(),
            "build_type": build_type,
            "common_flags": self.common_flags(),
            "build_type_flags": self.flags_for_build_type(build_type),
            "warning_levels": self.definition.warning_levels,
            "language_standards": self.definition.language_standards,
            "default_standards": default_standards,
            "stdlib": self.definition.stdlib,
            "linkers": linkers,
            "sanitizers": self.definition.features.sanitizers,
            "lto": self.definition.features.lto,
            "coverage": self.definition.features.coverage,
            "executables": self.executables(),
            "cmake_variables": self.cmake_variables(&bound),
        }))
    }
}

fn render_cmake_value(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(render_cmake_value)
            .collect::<Vec<_>>()
            .join(";"),
        other => render_scalar(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(doc: Value) -> ResolvedCompilerConfig {
        ResolvedCompilerConfig::from_document(
            "test",
            None,
            doc,
            Arc::new(DefinitionStore::new("/nonexistent/cfgstack")),
        )
        .unwrap()
    }

    #[test]
    fn test_platform_override_exact_beats_os() {
        let doc = json!({
            "flags": {"common": ["-Wall"]},
            "platform_overrides": {
                "linux": {"flags": {"common": ["-DLINUX"]}},
                "linux-x64": {"flags": {"common": ["-DLINUX_X64"]}}
            }
        });
        let result = apply_platform_override(doc, "linux-x64");
        assert_eq!(result["flags"]["common"], json!(["-DLINUX_X64"]));
    }

    #[test]
    fn test_platform_override_os_fallback() {
        let doc = json!({
            "flags": {"common": ["-Wall"]},
            "platform_overrides": {"linux": {"flags": {"common": ["-DLINUX"]}}}
        });
        let result = apply_platform_override(doc, "linux-arm64");
        assert_eq!(result["flags"]["common"], json!(["-DLINUX"]));
    }

    #[test]
    fn test_platform_override_no_match() {
        let doc = json!({
            "flags": {"common": ["-Wall"]},
            "platform_overrides": {"windows": {"flags": {"common": ["/W4"]}}}
        });
        let result = apply_platform_override(doc, "macos-arm64");
        assert_eq!(result["flags"]["common"], json!(["-Wall"]));
    }

    #[test]
    fn test_missing_required_fields_error() {
        let err = ResolvedCompilerConfig::from_document(
            "broken",
            None,
            json!({"name": "broken"}),
            Arc::new(DefinitionStore::new("/nonexistent/cfgstack")),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_document");
        assert!(err.to_string().contains("compiler_family"));
    }

    #[test]
    fn test_wrong_field_type_is_invalid() {
        let err = ResolvedCompilerConfig::from_document(
            "broken",
            None,
            json!({"name": "broken", "compiler_family": "gcc", "flags": {"common": "-Wall"}}),
            Arc::new(DefinitionStore::new("/nonexistent/cfgstack")),
        )
        .unwrap_err();
        assert!(matches!(err, ResolveError::Invalid { .. }));
    }

    #[test]
    fn test_build_type_lookup_is_case_insensitive() {
        let config = resolved(json!({
            "name": "gcc",
            "compiler_family": "gcc",
            "flags": {"release": ["-O3", "-DNDEBUG"]}
        }));
        assert_eq!(config.flags_for_build_type("Release"), ["-O3", "-DNDEBUG"]);
        assert!(config.flags_for_build_type("profile").is_empty());
    }

    #[test]
    fn test_cmake_variables_prefers_nested_section() {
        let config = resolved(json!({
            "name": "gcc",
            "compiler_family": "gcc",
            "cmake": {"variables": {"CMAKE_C_COMPILER": "{{toolchain_root}}/bin/gcc"}},
            "cmake_variables": {"CMAKE_C_COMPILER": "ignored"}
        }));
        let vars: Vars = [("toolchain_root".to_string(), "/opt/gcc".to_string())].into();
        assert_eq!(
            config.cmake_variables(&vars)["CMAKE_C_COMPILER"],
            "/opt/gcc/bin/gcc"
        );
    }

    #[test]
    fn test_cmake_variables_render_lists_and_scalars() {
        let config = resolved(json!({
            "name": "gcc",
            "compiler_family": "gcc",
            "cmake_variables": {
                "CMAKE_FIND_ROOT_PATH": ["{{sysroot}}", "/opt/extra"],
                "CMAKE_CXX_STANDARD": 20,
                "CMAKE_POSITION_INDEPENDENT_CODE": true
            }
        }));
        let vars: Vars = [("sysroot".to_string(), "/sysroot".to_string())].into();
        let result = config.cmake_variables(&vars);
        assert_eq!(result["CMAKE_FIND_ROOT_PATH"], "/sysroot;/opt/extra");
        assert_eq!(result["CMAKE_CXX_STANDARD"], "20");
        assert_eq!(result["CMAKE_POSITION_INDEPENDENT_CODE"], "true");
    }

    #[test]
    fn test_linker_without_section_is_none() {
        let config = resolved(json!({"name": "gcc", "compiler_family": "gcc"}));
        assert_eq!(config.linker_flag("lld").unwrap(), None);
    }

    #[test]
    fn test_display_name_falls_back_to_name() {
        let config = resolved(json!({"name": "gcc", "compiler_family": "gcc"}));
        assert_eq!(config.display_name(), "test");
    }
}
