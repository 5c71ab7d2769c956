//! Layers
//!
//! A layer is one named, typed configuration fragment (`buildtype/release`,
//! `sanitizer/address`, ...). Applying a layer mutates a [`LayerContext`]:
//! 1. `requires` / `conflicts_with` are checked against the context
//! 2. The kind-specific policy runs (set compiler, add sanitizer, harden, ...)
//! 3. The generic settings (flags, defines, CMake variables, runtime env) are added
//!
//! Layers are immutable once built and can be shared across compositions.

mod allocator;
mod context;
mod document;
mod profiling;
mod security;

pub use allocator::{AllocatorSpec, IntegrationMethod, LibraryProbe, SystemLibraryProbe};
pub use context::LayerContext;
pub use document::DocumentError;
pub use profiling::ProfilingMode;
pub use security::{FortifyLevel, RelroMode, SecurityFeature, StackProtectorLevel};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Layer type, in canonical application order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Base,
    Platform,
    Stdlib,
    #[serde(alias = "build_type")]
    BuildType,
    Optimization,
    Sanitizer,
    Security,
    Profiling,
    Allocator,
}

impl LayerType {
    /// All layer types in canonical application order
    pub const ALL: [LayerType; 9] = [
        LayerType::Base,
        LayerType::Platform,
        LayerType::Stdlib,
        LayerType::BuildType,
        LayerType::Optimization,
        LayerType::Sanitizer,
        LayerType::Security,
        LayerType::Profiling,
        LayerType::Allocator,
    ];

    /// Types every composition must include
    pub const REQUIRED: [LayerType; 3] = [LayerType::Base, LayerType::Platform, LayerType::BuildType];

    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Base => "base",
            LayerType::Platform => "platform",
            LayerType::Stdlib => "stdlib",
            LayerType::BuildType => "buildtype",
            LayerType::Optimization => "optimization",
            LayerType::Sanitizer => "sanitizer",
            LayerType::Security => "security",
            LayerType::Profiling => "profiling",
            LayerType::Allocator => "allocator",
        }
    }

    /// Whether at most one layer of this type may be composed
    pub fn is_single_instance(&self) -> bool {
        matches!(
            self,
            LayerType::Base | LayerType::Platform | LayerType::Stdlib | LayerType::BuildType
        )
    }
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unrecognized layer type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown layer type '{0}' (expected one of base, platform, stdlib, buildtype, optimization, sanitizer, security, profiling, allocator)")]
pub struct UnknownLayerType(pub String);

impl FromStr for LayerType {
    type Err = UnknownLayerType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(LayerType::Base),
            "platform" => Ok(LayerType::Platform),
            "stdlib" => Ok(LayerType::Stdlib),
            "buildtype" | "build_type" => Ok(LayerType::BuildType),
            "optimization" => Ok(LayerType::Optimization),
            "sanitizer" => Ok(LayerType::Sanitizer),
            "security" => Ok(LayerType::Security),
            "profiling" => Ok(LayerType::Profiling),
            "allocator" => Ok(LayerType::Allocator),
            other => Err(UnknownLayerType(other.to_string())),
        }
    }
}

/// Layer identity: `type/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId {
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    pub name: String,
}

impl LayerId {
    pub fn new(layer_type: LayerType, name: impl Into<String>) -> Self {
        Self {
            layer_type,
            name: name.into(),
        }
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.layer_type, self.name)
    }
}

/// Out-of-range or missing layer sub-parameter
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {parameter}: {reason}")]
pub struct ParameterError {
    pub parameter: &'static str,
    pub reason: String,
}

impl ParameterError {
    pub fn new(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Errors raised while validating or applying a layer
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("layer {layer} requirement not met: {reason}")]
    Requirement { layer: LayerId, reason: String },

    #[error("layer {layer} conflicts with {other}: {reason}")]
    Conflict {
        layer: LayerId,
        other: String,
        reason: String,
    },

    #[error("layer {layer}: {source}")]
    Parameter {
        layer: LayerId,
        #[source]
        source: ParameterError,
    },
}

impl LayerError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            LayerError::Requirement { .. } => "requirement_violation",
            LayerError::Conflict { .. } => "layer_conflict",
            LayerError::Parameter { .. } => "parameter_validation",
        }
    }

    /// Layer the error was raised for
    pub fn layer(&self) -> &LayerId {
        match self {
            LayerError::Requirement { layer, .. }
            | LayerError::Conflict { layer, .. }
            | LayerError::Parameter { layer, .. } => layer,
        }
    }
}

/// Kind-level failure, attributed to a layer by [`Layer::apply_with`]
#[derive(Debug)]
pub(crate) enum Violation {
    Requirement(String),
    Conflict { other: String, reason: String },
}

/// Kind-specific policy and its validated parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerKind {
    Base {
        compiler: String,
        version: Option<String>,
    },
    Platform {
        platform: String,
    },
    Stdlib {
        stdlib: String,
    },
    BuildType {
        build_type: String,
    },
    Optimization {
        optimization: String,
    },
    Sanitizer {
        sanitizer: String,
    },
    Security(SecurityFeature),
    Profiling(ProfilingMode),
    Allocator(AllocatorSpec),
}

impl LayerKind {
    pub fn layer_type(&self) -> LayerType {
        match self {
            LayerKind::Base { .. } => LayerType::Base,
            LayerKind::Platform { .. } => LayerType::Platform,
            LayerKind::Stdlib { .. } => LayerType::Stdlib,
            LayerKind::BuildType { .. } => LayerType::BuildType,
            LayerKind::Optimization { .. } => LayerType::Optimization,
            LayerKind::Sanitizer { .. } => LayerType::Sanitizer,
            LayerKind::Security(_) => LayerType::Security,
            LayerKind::Profiling(_) => LayerType::Profiling,
            LayerKind::Allocator(_) => LayerType::Allocator,
        }
    }

    fn default_description(&self) -> String {
        match self {
            LayerKind::Security(feature) => format!("Security hardening: {}", feature),
            LayerKind::Profiling(mode) => format!("Profiling: {}", mode),
            LayerKind::Allocator(spec) => format!("Memory allocator: {}", spec.name()),
            _ => String::new(),
        }
    }
}

/// Settings every layer kind contributes after its own policy
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerSettings {
    /// Added to both compile and link flags
    pub common_flags: Vec<String>,
    pub compile_flags: Vec<String>,
    pub link_flags: Vec<String>,
    pub defines: Vec<String>,
    pub cmake_variables: BTreeMap<String, String>,
    pub runtime_env: BTreeMap<String, String>,
}

impl LayerSettings {
    fn apply(&self, ctx: &mut LayerContext) {
        ctx.add_flags(&self.compile_flags, &self.link_flags, &self.common_flags);
        ctx.add_defines(&self.defines);
        ctx.add_cmake_variables(&self.cmake_variables);
        ctx.add_runtime_env(&self.runtime_env);
    }
}

/// Preconditions over the context a layer is applied to.
///
/// An empty list places no constraint. A constraint on a value the context
/// has not set yet is satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Requirements {
    #[serde(default, deserialize_with = "crate::de::one_or_many")]
    pub compiler: Vec<String>,

    #[serde(default, deserialize_with = "crate::de::one_or_many")]
    pub platform: Vec<String>,

    #[serde(default, deserialize_with = "crate::de::one_or_many")]
    pub linker: Vec<String>,
}

impl Requirements {
    pub fn is_empty(&self) -> bool {
        self.compiler.is_empty() && self.platform.is_empty() && self.linker.is_empty()
    }

    fn check(&self, ctx: &LayerContext) -> Result<(), String> {
        check_one("compiler", &self.compiler, ctx.compiler.as_deref())?;
        check_one("platform", &self.platform, ctx.platform.as_deref())?;
        check_one("linker", &self.linker, ctx.linker())
    }
}

fn check_one(what: &str, allowed: &[String], actual: Option<&str>) -> Result<(), String> {
    match actual {
        Some(actual) if !allowed.is_empty() && !allowed.iter().any(|a| a == actual) => Err(format!(
            "requires {} {}, but got '{}'",
            what,
            allowed.join(" or "),
            actual
        )),
        _ => Ok(()),
    }
}

/// A named, typed configuration fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    id: LayerId,
    description: String,
    kind: LayerKind,
    settings: LayerSettings,
    requires: Requirements,
    conflicts_with: BTreeMap<LayerType, Vec<String>>,
}

impl Layer {
    pub fn new(name: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id: LayerId::new(kind.layer_type(), name),
            description: kind.default_description(),
            kind,
            settings: LayerSettings::default(),
            requires: Requirements::default(),
            conflicts_with: BTreeMap::new(),
        }
    }

    /// Override the description; an empty string keeps the default
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        if !description.is_empty() {
            self.description = description;
        }
        self
    }

    pub fn with_settings(mut self, settings: LayerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_requires(mut self, requires: Requirements) -> Self {
        self.requires = requires;
        self
    }

    /// Declare that this layer cannot coexist with `layer_type/name`
    pub fn with_conflict(mut self, layer_type: LayerType, name: impl Into<String>) -> Self {
        self.conflicts_with
            .entry(layer_type)
            .or_default()
            .push(name.into());
        self
    }

    pub fn id(&self) -> &LayerId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.id.name
    }

    pub fn layer_type(&self) -> LayerType {
        self.id.layer_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    pub fn requires(&self) -> &Requirements {
        &self.requires
    }

    pub fn conflicts_with(&self) -> &BTreeMap<LayerType, Vec<String>> {
        &self.conflicts_with
    }

    /// Whether this layer declares a conflict with `other`
    pub fn declares_conflict(&self, other: &LayerId) -> bool {
        self.conflicts_with
            .get(&other.layer_type)
            .is_some_and(|names| names.iter().any(|n| *n == other.name))
    }

    /// Check `requires` and `conflicts_with` against the context
    pub fn validate(&self, ctx: &LayerContext) -> Result<(), LayerError> {
        self.requires
            .check(ctx)
            .map_err(|reason| LayerError::Requirement {
                layer: self.id.clone(),
                reason,
            })?;

        for (layer_type, names) in &self.conflicts_with {
            for name in names {
                let active = ctx.has_layer(*layer_type, name)
                    || (*layer_type == LayerType::Sanitizer && ctx.has_sanitizer(name));
                if active {
                    return Err(LayerError::Conflict {
                        layer: self.id.clone(),
                        other: format!("{}/{}", layer_type, name),
                        reason: "the two layers are mutually exclusive".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate and apply, probing the host for allocator libraries
    pub fn apply(&self, ctx: &mut LayerContext) -> Result<(), LayerError> {
        self.apply_with(ctx, &SystemLibraryProbe)
    }

    /// Validate and apply using `probe` for allocator detection
    pub fn apply_with(
        &self,
        ctx: &mut LayerContext,
        probe: &dyn LibraryProbe,
    ) -> Result<(), LayerError> {
        self.validate(ctx)?;
        tracing::debug!(layer = %self.id, "applying layer");

        let mut apply_settings = true;
        match &self.kind {
            LayerKind::Base { compiler, version } => {
                ctx.compiler = Some(compiler.clone());
                ctx.compiler_version = version.clone();
            }
            LayerKind::Platform { platform } => ctx.platform = Some(platform.clone()),
            LayerKind::Stdlib { stdlib } => ctx.stdlib = Some(stdlib.clone()),
            LayerKind::BuildType { build_type } => ctx.build_type = Some(build_type.clone()),
            LayerKind::Optimization { .. } => {}
            LayerKind::Sanitizer { sanitizer } => ctx.add_sanitizer(sanitizer.as_str()),
            LayerKind::Security(feature) => feature.apply(ctx),
            LayerKind::Profiling(mode) => {
                mode.apply(ctx).map_err(|v| self.attribute(v))?;
            }
            LayerKind::Allocator(spec) => {
                spec.apply(ctx, probe).map_err(|v| self.attribute(v))?;
                apply_settings = !spec.is_default();
            }
        }

        if apply_settings {
            self.settings.apply(ctx);
        }
        ctx.record_applied(self.id.clone());
        Ok(())
    }

    fn attribute(&self, violation: Violation) -> LayerError {
        match violation {
            Violation::Requirement(reason) => LayerError::Requirement {
                layer: self.id.clone(),
                reason,
            },
            Violation::Conflict { other, reason } => LayerError::Conflict {
                layer: self.id.clone(),
                other,
                reason,
            },
        }
    }
}
