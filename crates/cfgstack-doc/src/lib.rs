//! Document algebra for declarative build definitions.
//!
//! Definitions are parsed from YAML or JSON into a generic
//! [`serde_json::Value`] tree. This crate knows nothing about compilers or
//! layers; it only provides the operations the higher levels compose:
//!
//! - [`parse_document`]: text to a mapping document
//! - [`deep_merge`]: overlay one document on another
//! - [`interpolate`]: substitute `{{placeholder}}` tokens

mod interpolate;
mod merge;
mod parse;

pub use interpolate::{interpolate, interpolate_str, placeholders, Vars};
pub use merge::{deep_merge, merge_layers, ListMerge};
pub use parse::{parse_document, DocError, Format};
