//! Plugin manifest model
//!
//! One JSON manifest per plugin directory declares identity, entry point,
//! scheduling defaults, and dependencies.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Manifest file name expected in each plugin directory.
pub const MANIFEST_FILE: &str = "plugin.json";

fn default_priority() -> u8 {
    50
}

fn default_timeout_ms() -> u64 {
    5000
}

/// Declared plugin capability category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    /// Contributes a custom detector
    Filter,

    /// Contributes an output formatter
    Formatter,

    /// Contributes an alert channel
    Channel,

    /// Pure pipeline hooks
    Hook,
}

/// Plugin manifest (`plugin.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Unique plugin name
    pub name: String,

    /// Plugin version string
    pub version: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Capability category
    #[serde(rename = "type")]
    pub plugin_type: PluginType,

    /// Entry point name resolved against the factory registry
    pub main: String,

    /// Hook scheduling priority, 0-99; lower runs earlier
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Hook timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Names of plugins that must load before this one
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Opaque plugin-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginManifest {
    /// Validate manifest fields.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Plugin("manifest is missing a name".to_string()));
        }
        if self.main.is_empty() {
            return Err(Error::Plugin(format!(
                "plugin '{}' is missing an entry point",
                self.name
            )));
        }
        if self.priority > 99 {
            return Err(Error::Plugin(format!(
                "plugin '{}' priority {} exceeds 99",
                self.name, self.priority
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_defaults() {
        let json = r#"{
            "name": "audit-trail",
            "version": "1.0.0",
            "type": "hook",
            "main": "audit_trail"
        }"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.priority, 50);
        assert_eq!(manifest.timeout_ms, 5000);
        assert!(manifest.dependencies.is_empty());
        assert!(manifest.config.is_null());
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_manifest_full() {
        let json = r#"{
            "name": "alert-hipaa",
            "version": "0.3.1",
            "description": "Pages compliance on critical findings",
            "type": "channel",
            "main": "alert_hipaa",
            "priority": 10,
            "timeoutMs": 250,
            "dependencies": ["audit-trail"],
            "config": {"pager": "compliance"}
        }"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.plugin_type, PluginType::Channel);
        assert_eq!(manifest.priority, 10);
        assert_eq!(manifest.timeout_ms, 250);
        assert_eq!(manifest.dependencies, vec!["audit-trail"]);
        assert_eq!(manifest.config["pager"], "compliance");
    }

    #[test]
    fn test_manifest_validation() {
        let mut manifest: PluginManifest = serde_json::from_str(
            r#"{"name": "p", "version": "1.0", "type": "hook", "main": "p"}"#,
        )
        .unwrap();
        assert!(manifest.validate().is_ok());

        manifest.priority = 100;
        assert!(manifest.validate().is_err());

        manifest.priority = 50;
        manifest.main = String::new();
        assert!(manifest.validate().is_err());
    }
}
