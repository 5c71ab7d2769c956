//! Deep merge of definition documents
//!
//! - Objects: deep-merge by key
//! - Arrays: APPEND for inheritance, REPLACE for corrective overrides
//! - Scalars: override (last wins)

use serde_json::Value;

/// How arrays present on both sides of a merge are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMerge {
    /// Overlay items are appended after base items (`extends` chains).
    Append,
    /// Overlay array replaces the base array entirely (platform overrides).
    Replace,
}

/// Deep merge `overlay` on top of `base`.
///
/// Merge semantics:
/// - Objects: deep-merge by key (recursive, same list mode throughout)
/// - Arrays: append or replace according to `lists`
/// - Scalars and mismatched shapes: overlay wins
/// - Keys missing from the overlay are inherited unchanged
///
/// List replacement only happens where both sides hold an array at the same
/// key. Arrays of maps are never merged element-wise.
pub fn deep_merge(base: Value, overlay: Value, lists: ListMerge) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = if let Some(base_value) = base_map.remove(&key) {
                    deep_merge(base_value, overlay_value, lists)
                } else {
                    overlay_value
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }

        (Value::Array(mut base_items), Value::Array(overlay_items)) => match lists {
            ListMerge::Append => {
                base_items.extend(overlay_items);
                Value::Array(base_items)
            }
            ListMerge::Replace => Value::Array(overlay_items),
        },

        (_, overlay) => overlay,
    }
}

/// Merge multiple documents in order (first is base, last has highest precedence)
pub fn merge_layers(layers: Vec<Value>, lists: ListMerge) -> Value {
    layers
        .into_iter()
        .fold(Value::Null, |acc, layer| deep_merge(acc, layer, lists))
}
