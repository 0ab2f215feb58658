//! Config Merge Engine: base configuration + job override → effective
//! configuration.
//!
//! The merge is a pure function of its two inputs. Whichever worker ends up
//! starting or resuming a job recomputes the effective configuration from
//! its own base and the override it receives, so two workers with the same
//! base must always arrive at the same result.
//!
//! Rules:
//! - Keys present only in the base are kept unchanged.
//! - Keys present only in the override are added.
//! - When both sides hold an object, they are merged recursively.
//! - Otherwise the override value replaces the base value wholesale. This
//!   includes arrays and explicit `null`.
//!
//! The one documented exception is [`MergeOptions::append_paths`]: arrays at
//! those dotted paths are concatenated base-then-override.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::error::CoreError;

/// Separator between segments of a key path (`llm.stop_sequences`).
pub const PATH_SEPARATOR: &str = ".";

/// Knobs for [`merge_with`]. The default is the plain override-wins merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Dotted key paths whose array values are concatenated instead of
    /// replaced. Non-array values at these paths still follow the normal
    /// rules.
    pub append_paths: BTreeSet<String>,
}

impl MergeOptions {
    /// Build options that append arrays at the given dotted paths.
    pub fn appending<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            append_paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

/// Merge `override_doc` on top of `base` with override-wins semantics.
///
/// Neither input is modified; a new value is returned.
pub fn merge(base: &Value, override_doc: &Value) -> Value {
    merge_with(base, override_doc, &MergeOptions::default())
}

/// Merge `override_doc` on top of `base`, honouring `options`.
pub fn merge_with(base: &Value, override_doc: &Value, options: &MergeOptions) -> Value {
    let mut path = Vec::new();
    merge_at(base, override_doc, options, &mut path)
}

fn merge_at<'a>(
    base: &'a Value,
    override_doc: &'a Value,
    options: &MergeOptions,
    path: &mut Vec<&'a str>,
) -> Value {
    match (base, override_doc) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, override_value) in override_map {
                path.push(key.as_str());
                let value = match base_map.get(key) {
                    Some(base_value) => merge_at(base_value, override_value, options, path),
                    None => override_value.clone(),
                };
                path.pop();
                merged.insert(key.clone(), value);
            }
            Value::Object(merged)
        }
        (Value::Array(base_items), Value::Array(override_items))
            if options.append_paths.contains(&path.join(PATH_SEPARATOR)) =>
        {
            let mut items = base_items.clone();
            items.extend(override_items.iter().cloned());
            Value::Array(items)
        }
        (_, other) => other.clone(),
    }
}

/// Check that a job override is usable as a partial configuration.
///
/// The override must be a JSON object (possibly empty); scalars and arrays
/// at the root would replace the whole base configuration.
pub fn validate_override(override_doc: &Value) -> Result<(), CoreError> {
    if override_doc.is_object() {
        Ok(())
    } else {
        Err(CoreError::Validation(
            "config_override must be a JSON object".to_string(),
        ))
    }
}
