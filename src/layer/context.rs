//! Per-composition accumulator
//!
//! Scalars are last-write-wins. Flag and define sequences keep insertion order
//! and never hold duplicates. Maps are last-write-wins per key.

use std::collections::{BTreeMap, BTreeSet};

use cfgstack_doc::{interpolate_str, Vars};
use serde::Serialize;

use super::{LayerId, LayerType};

/// Mutable state threaded through every layer of one composition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayerContext {
    pub compiler: Option<String>,
    pub compiler_version: Option<String>,
    pub platform: Option<String>,
    pub stdlib: Option<String>,
    pub build_type: Option<String>,

    compile_flags: Vec<String>,
    link_flags: Vec<String>,
    defines: Vec<String>,
    cmake_variables: BTreeMap<String, String>,
    runtime_env: BTreeMap<String, String>,
    sanitizers: BTreeSet<String>,

    #[serde(skip)]
    applied: Vec<LayerId>,
}

impl LayerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile_flags(&self) -> &[String] {
        &self.compile_flags
    }

    pub fn link_flags(&self) -> &[String] {
        &self.link_flags
    }

    pub fn defines(&self) -> &[String] {
        &self.defines
    }

    pub fn cmake_variables(&self) -> &BTreeMap<String, String> {
        &self.cmake_variables
    }

    pub fn runtime_env(&self) -> &BTreeMap<String, String> {
        &self.runtime_env
    }

    pub fn sanitizers(&self) -> &BTreeSet<String> {
        &self.sanitizers
    }

    /// Identities of the layers applied so far, in application order
    pub fn applied(&self) -> &[LayerId] {
        &self.applied
    }

    /// Append a compile flag unless already present. Returns whether it was added.
    pub fn add_compile_flag(&mut self, flag: impl Into<String>) -> bool {
        push_unique(&mut self.compile_flags, flag.into())
    }

    /// Append a link flag unless already present. Returns whether it was added.
    pub fn add_link_flag(&mut self, flag: impl Into<String>) -> bool {
        push_unique(&mut self.link_flags, flag.into())
    }

    /// Add flags; `common` flags go to both compile and link sequences
    pub fn add_flags(&mut self, compile: &[String], link: &[String], common: &[String]) {
        for flag in common {
            self.add_compile_flag(flag.as_str());
            self.add_link_flag(flag.as_str());
        }
        for flag in compile {
            self.add_compile_flag(flag.as_str());
        }
        for flag in link {
            self.add_link_flag(flag.as_str());
        }
    }

    /// Add a preprocessor define.
    ///
    /// Defines are keyed by the name before `=`. An identical define is a
    /// no-op; a new value for an existing name replaces it in place.
    pub fn add_define(&mut self, define: impl Into<String>) {
        let define = define.into();
        let name = define_name(&define);
        match self.defines.iter_mut().find(|d| define_name(d) == name) {
            Some(existing) => *existing = define,
            None => self.defines.push(define),
        }
    }

    pub fn add_defines(&mut self, defines: &[String]) {
        for define in defines {
            self.add_define(define.as_str());
        }
    }

    pub fn set_cmake_variable(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.cmake_variables.insert(key.into(), value.into());
    }

    pub fn add_cmake_variables(&mut self, variables: &BTreeMap<String, String>) {
        for (key, value) in variables {
            self.set_cmake_variable(key.as_str(), value.as_str());
        }
    }

    pub fn set_runtime_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.runtime_env.insert(key.into(), value.into());
    }

    pub fn add_runtime_env(&mut self, env: &BTreeMap<String, String>) {
        for (key, value) in env {
            self.set_runtime_env(key.as_str(), value.as_str());
        }
    }

    pub fn add_sanitizer(&mut self, sanitizer: impl Into<String>) {
        self.sanitizers.insert(sanitizer.into());
    }

    pub fn has_sanitizer(&self, sanitizer: &str) -> bool {
        self.sanitizers.contains(sanitizer)
    }

    /// Whether any `-O*` (or MSVC `/O*`) flag is already present
    pub fn has_optimization_flag(&self) -> bool {
        self.compile_flags
            .iter()
            .any(|f| f.starts_with("-O") || f.starts_with("/O"))
    }

    /// Whether any `-g*` debug-info flag is already present
    pub fn has_debug_info_flag(&self) -> bool {
        self.compile_flags.iter().any(|f| f.starts_with("-g"))
    }

    pub fn compile_flags_contain(&self, needle: &str) -> bool {
        self.compile_flags.iter().any(|f| f.contains(needle))
    }

    pub fn link_flags_contain(&self, needle: &str) -> bool {
        self.link_flags.iter().any(|f| f.contains(needle))
    }

    /// Linker selected through the first `-fuse-ld=<name>` link flag
    pub fn linker(&self) -> Option<&str> {
        self.link_flags
            .iter()
            .find_map(|f| f.strip_prefix("-fuse-ld="))
    }

    pub fn has_layer_type(&self, layer_type: LayerType) -> bool {
        self.applied.iter().any(|id| id.layer_type == layer_type)
    }

    pub fn has_layer(&self, layer_type: LayerType, name: &str) -> bool {
        self.applied
            .iter()
            .any(|id| id.layer_type == layer_type && id.name == name)
    }

    pub(crate) fn record_applied(&mut self, id: LayerId) {
        self.applied.push(id);
    }

    /// Interpolate `{{placeholder}}` tokens in CMake variables and runtime env.
    ///
    /// `compiler_version` and `platform` are bound from the context; `extra`
    /// entries take precedence over them.
    pub fn interpolate(&mut self, extra: &Vars) {
        let mut vars = Vars::new();
        vars.insert(
            "compiler_version".to_string(),
            self.compiler_version.clone().unwrap_or_default(),
        );
        vars.insert("platform".to_string(), self.platform.clone().unwrap_or_default());
        vars.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        for value in self.cmake_variables.values_mut() {
            *value = interpolate_str(value, &vars);
        }
        for value in self.runtime_env.values_mut() {
            *value = interpolate_str(value, &vars);
        }
    }
}

fn push_unique(target: &mut Vec<String>, item: String) -> bool {
    if target.contains(&item) {
        false
    } else {
        target.push(item);
        true
    }
}

fn define_name(define: &str) -> &str {
    define.split('=').next().unwrap_or(define)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_deduplicated() {
        let mut ctx = LayerContext::new();
        assert!(ctx.add_compile_flag("-fPIE"));
        assert!(!ctx.add_compile_flag("-fPIE"));
        assert_eq!(ctx.compile_flags(), ["-fPIE"]);
    }

    #[test]
    fn test_common_flags_go_to_both() {
        let mut ctx = LayerContext::new();
        ctx.add_flags(
            &["-O3".to_string()],
            &["-s".to_string()],
            &["-pthread".to_string()],
        );
        assert_eq!(ctx.compile_flags(), ["-pthread", "-O3"]);
        assert_eq!(ctx.link_flags(), ["-pthread", "-s"]);
    }

    #[test]
    fn test_define_identical_is_noop() {
        let mut ctx = LayerContext::new();
        ctx.add_define("NDEBUG");
        ctx.add_define("PLATFORM_LINUX");
        ctx.add_define("NDEBUG");
        assert_eq!(ctx.defines(), ["NDEBUG", "PLATFORM_LINUX"]);
    }

    #[test]
    fn test_define_value_replaced_in_place() {
        let mut ctx = LayerContext::new();
        ctx.add_define("LOG_LEVEL=1");
        ctx.add_define("NDEBUG");
        ctx.add_define("LOG_LEVEL=3");
        assert_eq!(ctx.defines(), ["LOG_LEVEL=3", "NDEBUG"]);
    }

    #[test]
    fn test_define_prefix_is_not_a_match() {
        let mut ctx = LayerContext::new();
        ctx.add_define("DEBUG");
        ctx.add_define("DEBUG_LEVEL=2");
        assert_eq!(ctx.defines(), ["DEBUG", "DEBUG_LEVEL=2"]);
    }

    #[test]
    fn test_optimization_detection() {
        let mut ctx = LayerContext::new();
        ctx.add_compile_flag("-fno-omit-frame-pointer");
        assert!(!ctx.has_optimization_flag());
        ctx.add_compile_flag("-O3");
        assert!(ctx.has_optimization_flag());
    }

    #[test]
    fn test_linker_first_match_wins() {
        let mut ctx = LayerContext::new();
        ctx.add_link_flag("-pthread");
        assert_eq!(ctx.linker(), None);
        ctx.add_link_flag("-fuse-ld=lld");
        ctx.add_link_flag("-fuse-ld=gold");
        assert_eq!(ctx.linker(), Some("lld"));
    }

    #[test]
    fn test_interpolate_binds_context_values() {
        let mut ctx = LayerContext::new();
        ctx.compiler_version = Some("18.1.8".into());
        ctx.platform = Some("linux-x64".into());
        ctx.set_cmake_variable("CMAKE_C_COMPILER", "{{toolchain_root}}/bin/clang");
        ctx.set_cmake_variable("TK_TRIPLE", "{{platform}}-{{compiler_version}}");
        ctx.set_runtime_env("ASAN_SYMBOLIZER_PATH", "{{toolchain_root}}/bin/llvm-symbolizer");

        let extra: Vars = [("toolchain_root".to_string(), "/opt/llvm".to_string())].into();
        ctx.interpolate(&extra);

        assert_eq!(ctx.cmake_variables()["CMAKE_C_COMPILER"], "/opt/llvm/bin/clang");
        assert_eq!(ctx.cmake_variables()["TK_TRIPLE"], "linux-x64-18.1.8");
        assert_eq!(
            ctx.runtime_env()["ASAN_SYMBOLIZER_PATH"],
            "/opt/llvm/bin/llvm-symbolizer"
        );
    }
}
