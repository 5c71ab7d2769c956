//! cfgstack - declarative C/C++ build configuration composition
//!
//! Two engines over a tree of YAML/JSON definitions:
//!
//! - [`CompilerResolver`] flattens a compiler definition (`extends` chain,
//!   platform overrides) and answers flag queries against it.
//! - [`LayerComposer`] stacks typed layers (`base`, `platform`, `stdlib`,
//!   `buildtype`, ...) into an immutable [`ComposedConfig`].

pub mod compiler;
pub mod composer;
mod de;
pub mod layer;
pub mod settings;
pub mod store;

pub use cfgstack_doc::{interpolate, interpolate_str, Vars};
pub use compiler::{CompilerResolver, FlagBundle, ResolveError, ResolvedCompilerConfig};
pub use composer::{ComposeError, ComposedConfig, LayerComposer, LayerInfo, LayerSpec};
pub use layer::{Layer, LayerContext, LayerError, LayerId, LayerKind, LayerType};
pub use settings::{Settings, SettingsError, SettingsOverrides};
pub use store::{DefinitionStore, StoreError};
