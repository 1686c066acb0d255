//! Data models for Environment and Service specs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::value::{string_map, Value};

/// Source marker forcing a module to resolve from the custom modules root.
pub const CUSTOM_SOURCE: &str = "custom";

/// Kind of a spec document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpecKind {
    Environment,
    Service,
}

impl SpecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Environment => "Environment",
            Self::Service => "Service",
        }
    }
}

impl fmt::Display for SpecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to resolve a secret value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretRef {
    /// Kept for compatibility; secrets are always supplied as terraform variables.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    /// Logical secret name; defaults to the map key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

/// Remote state backend settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Backend {
    /// s3, gcs or azurerm. Defaults from the provider when empty.
    #[serde(rename = "type", default)]
    pub backend_type: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: String,
    /// Azure blob container.
    #[serde(default)]
    pub container: String,
    /// Azure resource group.
    #[serde(default)]
    pub resource_group: String,
    #[serde(default)]
    pub profile: String,
}

/// Access level to target module ids, e.g. `readwrite -> [bucket, logs]`.
///
/// Each level accepts either a single id or a list of ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AccessLinks(BTreeMap<String, Vec<String>>);

impl AccessLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(mut self, access: impl Into<String>, target: impl Into<String>) -> Self {
        self.0.entry(access.into()).or_default().push(target.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(access level, targets)` in access-level order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Every `(access level, target)` pair.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(k, targets)| targets.iter().map(move |t| (k.as_str(), t.as_str())))
    }
}

impl<'de> Deserialize<'de> for AccessLinks {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Targets {
            One(String),
            Many(Vec<String>),
        }

        let raw = Option::<BTreeMap<String, Targets>>::deserialize(deserializer)?;
        let links = raw
            .unwrap_or_default()
            .into_iter()
            .map(|(access, targets)| {
                let targets = match targets {
                    Targets::One(t) => vec![t],
                    Targets::Many(ts) => ts,
                };
                (access, targets)
            })
            .collect();
        Ok(AccessLinks(links))
    }
}

/// A declared module instance in an Environment or Service spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Module {
    pub id: String,
    #[serde(rename = "type")]
    pub module_type: String,
    /// `custom` forces resolution from the custom modules root.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "AccessLinks::is_empty")]
    pub links: AccessLinks,
}

impl Module {
    pub fn new(id: impl Into<String>, module_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            module_type: module_type.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_link(mut self, access: impl Into<String>, target: impl Into<String>) -> Self {
        self.links = self.links.with_link(access, target);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn is_custom(&self) -> bool {
        self.source.trim() == CUSTOM_SOURCE
    }
}

/// Root of a `kind: Environment` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentConfig {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: EnvironmentMetadata,
    #[serde(default)]
    pub backend: Backend,
    /// Environment entries keyed by environment key (dev, prod, ...).
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentEntry>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub org: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default, deserialize_with = "string_map")]
    pub labels: BTreeMap<String, String>,
}

/// Per-environment-key parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvironmentEntry {
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, deserialize_with = "string_map")]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretRef>,
}

/// Root of a `kind: Service` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default)]
    pub metadata: ServiceMetadata,
    #[serde(default)]
    pub modules: Vec<Module>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceMetadata {
    #[serde(default)]
    pub name: String,
    /// Path to the Environment spec, relative to the service file.
    #[serde(rename = "ref", default)]
    pub env_file: String,
    /// Per-environment-key overrides.
    #[serde(rename = "envRef", default)]
    pub env_ref: BTreeMap<String, ServiceEnvRefEntry>,
    #[serde(default, deserialize_with = "string_map")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceEnvRefEntry {
    #[serde(default, deserialize_with = "string_map")]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretRef>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_scalar_or_list() {
        let module: Module = serde_yaml::from_str(
            r#"
id: bucket
type: aws_s3
links:
  read: reader
  readwrite: [app, worker]
"#,
        )
        .unwrap();

        let pairs: Vec<_> = module.links.pairs().collect();
        assert_eq!(
            pairs,
            vec![("read", "reader"), ("readwrite", "app"), ("readwrite", "worker")]
        );
    }

    #[test]
    fn test_module_rejects_unknown_fields() {
        let result = serde_yaml::from_str::<Module>("id: a\ntype: b\ninptus: {}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_is_custom() {
        assert!(Module::new("a", "t").with_source("custom").is_custom());
        assert!(!Module::new("a", "t").is_custom());
    }

    #[test]
    fn test_environment_entry_variables_stringified() {
        let entry: EnvironmentEntry = serde_yaml::from_str(
            r#"
account: "111111111111"
region: us-east-1
variables:
  node_count: 3
secrets:
  db_password: {}
"#,
        )
        .unwrap();
        assert_eq!(entry.variables["node_count"], "3");
        assert!(entry.secrets.contains_key("db_password"));
    }
}
