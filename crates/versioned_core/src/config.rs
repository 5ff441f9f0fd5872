//! Configuration types for versioning.
//!
//! This module provides the [`VersioningConfig`] struct which holds the
//! per-type versioning settings: retention limits and the attribute schema
//! used to validate rollbacks. Configuration is an explicit value owned by a
//! [`Versioner`](crate::Versioner); nothing is stored in global state.
//! It can be persisted as TOML.
//!
//! # Example
//!
//! ```toml
//! [default]
//! max_versions = 50
//!
//! [types.user]
//! keep_versions_for = 300
//! fields = ["name", "email"]
//! ```

use std::path::Path;

use chrono::Duration;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::document::{Attributes, is_reserved_field};
use crate::error::Result;
use crate::retention::RetentionPolicy;

/// Versioning settings for one document type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypePolicy {
    /// Keep at most this many versions per document (0 or unset: unlimited)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_versions: Option<usize>,

    /// Keep versions for this many seconds. Takes priority over `max_versions`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_versions_for: Option<u64>,

    /// Attribute names this type accepts. Unset means any attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

impl TypePolicy {
    /// Policy keeping the newest `max` versions.
    pub fn max_versions(max: usize) -> Self {
        Self {
            max_versions: Some(max),
            ..Self::default()
        }
    }

    /// Policy keeping versions younger than `seconds`.
    pub fn keep_versions_for(seconds: u64) -> Self {
        Self {
            keep_versions_for: Some(seconds),
            ..Self::default()
        }
    }

    /// Restrict the attributes this type accepts.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Resolve the retention policy; the age limit wins.
    pub fn retention(&self) -> RetentionPolicy {
        let age = self.keep_versions_for.map(|secs| {
            i64::try_from(secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX)
        });
        RetentionPolicy::resolve(self.max_versions, age)
    }

    /// Attributes in `attributes` this type does not accept, in order.
    pub fn unsupported_fields(&self, attributes: &Attributes) -> Vec<String> {
        match &self.fields {
            Some(fields) => attributes
                .keys()
                .filter(|key| !is_reserved_field(key) && !fields.iter().any(|f| f == *key))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Versioning configuration for all document types.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersioningConfig {
    /// Settings for types without their own entry
    #[serde(default)]
    pub default: TypePolicy,

    /// Per-type settings keyed by type tag
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub types: IndexMap<String, TypePolicy>,
}

impl VersioningConfig {
    /// Create an empty config: no limits, no schemas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style per-type policy.
    pub fn with_policy(mut self, doc_type: impl Into<String>, policy: TypePolicy) -> Self {
        self.types.insert(doc_type.into(), policy);
        self
    }

    /// Set the policy for a type.
    pub fn set_policy(&mut self, doc_type: impl Into<String>, policy: TypePolicy) {
        self.types.insert(doc_type.into(), policy);
    }

    /// Settings for a type, falling back to the default.
    pub fn policy_for(&self, doc_type: &str) -> &TypePolicy {
        self.types.get(doc_type).unwrap_or(&self.default)
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize the config to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load a config file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Write the config to a file, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_toml() {
        let config = VersioningConfig::from_toml_str(
            r#"
            [default]
            max_versions = 50

            [types.user]
            keep_versions_for = 300
            max_versions = 5
            fields = ["name", "email"]
            "#,
        )
        .unwrap();

        assert_eq!(config.default.max_versions, Some(50));
        assert_eq!(
            config.policy_for("user").retention(),
            RetentionPolicy::MaxAge(Duration::minutes(5))
        );
        assert_eq!(
            config.policy_for("post").retention(),
            RetentionPolicy::MaxCount(50)
        );
    }

    #[test]
    fn test_empty_config_keeps_everything() {
        let config = VersioningConfig::from_toml_str("").unwrap();
        assert_eq!(config, VersioningConfig::new());
        assert_eq!(config.policy_for("user").retention(), RetentionPolicy::KeepAll);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(VersioningConfig::from_toml_str("[default]\nmax_versions = \"many\"").is_err());
    }

    #[test]
    fn test_round_trip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("versioning.toml");

        let config = VersioningConfig::new()
            .with_policy("user", TypePolicy::max_versions(5).with_fields(["name"]));
        config.save_to(&path).unwrap();

        let loaded = VersioningConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(VersioningConfig::load_from(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_unsupported_fields() {
        let policy = TypePolicy::default().with_fields(["name", "email"]);
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), json!("x"));
        attributes.insert("nickname".to_string(), json!("y"));
        attributes.insert("age".to_string(), json!(3));

        assert_eq!(policy.unsupported_fields(&attributes), vec!["nickname", "age"]);
        assert!(TypePolicy::default().unsupported_fields(&attributes).is_empty());
    }
}
