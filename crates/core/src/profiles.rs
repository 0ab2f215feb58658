//! Named profile → override document resolution.
//!
//! A profile is a named, reusable override document (an "expert" setup for
//! a class of jobs). How profiles are authored is not the controller's
//! concern: it only asks a [`ProfileResolver`] for the document and stores
//! the result on the job.

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;

use crate::config_merge::validate_override;
use crate::error::CoreError;

/// Capability: turn a profile name into an override document.
pub trait ProfileResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Value, CoreError>;
}

/// Profiles held in memory, usually loaded from a JSON file shaped as
/// `{ "<name>": { ...override... }, ... }`.
#[derive(Debug, Clone, Default)]
pub struct StaticProfiles {
    profiles: HashMap<String, Value>,
}

impl StaticProfiles {
    pub fn new(profiles: HashMap<String, Value>) -> Result<Self, CoreError> {
        for (name, doc) in &profiles {
            validate_override(doc).map_err(|_| {
                CoreError::Validation(format!("Profile '{name}' must be a JSON object"))
            })?;
        }
        Ok(Self { profiles })
    }

    /// Parse a JSON document mapping profile names to override documents.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let profiles: HashMap<String, Value> = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Invalid profiles document: {e}")))?;
        Self::new(profiles)
    }

    /// Load profiles from a JSON file on disk.
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Internal(format!("Failed to read profiles file {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl ProfileResolver for StaticProfiles {
    fn resolve(&self, name: &str) -> Result<Value, CoreError> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::Validation(format!("Unknown profile '{name}'")))
    }
}

/// Decide the override document a new job carries.
///
/// Exactly one of `profile` and `raw_override` may be given; with neither
/// the job runs on the workers' base configuration (`{}`).
pub fn resolve_job_override(
    resolver: &dyn ProfileResolver,
    profile: Option<&str>,
    raw_override: Option<Value>,
) -> Result<Value, CoreError> {
    match (profile, raw_override) {
        (Some(_), Some(_)) => Err(CoreError::Validation(
            "Specify either profile or config_override, not both".to_string(),
        )),
        (Some(name), None) => resolver.resolve(name),
        (None, Some(doc)) => {
            validate_override(&doc)?;
            Ok(doc)
        }
        (None, None) => Ok(Value::Object(Default::default())),
    }
}
