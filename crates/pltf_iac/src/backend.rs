//! Remote state backend resolution.

use hcl::Block;
use pltf_spec::{Backend, EnvironmentConfig, EnvironmentEntry};

use crate::error::{IacError, IacResult};
use crate::expr::REMOTE_STATE_NAME;
use crate::hclgen::{object, string};
use crate::provider::CloudProvider;

const DEFAULT_AZURE_CONTAINER: &str = "tfstate";

/// Supported Terraform backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    S3,
    Gcs,
    Azurerm,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::S3 => "s3",
            BackendKind::Gcs => "gcs",
            BackendKind::Azurerm => "azurerm",
        }
    }

    pub fn parse(s: &str) -> IacResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "s3" => Ok(BackendKind::S3),
            "gcs" => Ok(BackendKind::Gcs),
            "azurerm" => Ok(BackendKind::Azurerm),
            _ => Err(IacError::UnsupportedBackend(s.to_string())),
        }
    }

    /// Backend used when a spec does not name one.
    pub fn default_for(provider: &str) -> IacResult<Self> {
        if provider.trim().is_empty() {
            return Ok(BackendKind::S3);
        }
        Ok(match CloudProvider::parse(provider)? {
            CloudProvider::Aws => BackendKind::S3,
            CloudProvider::Gcp => BackendKind::Gcs,
            CloudProvider::Azure => BackendKind::Azurerm,
        })
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fully resolved backend settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Bucket, or storage account name for `azurerm`.
    pub bucket: String,
    pub region: String,
    pub container: String,
    pub resource_group: String,
    pub profile: String,
}

impl BackendConfig {
    /// Resolve the environment's backend, filling defaults.
    pub fn resolve(env: &EnvironmentConfig, entry: &EnvironmentEntry) -> IacResult<Self> {
        let backend = &env.backend;
        let kind = match backend.backend_type.trim() {
            "" => BackendKind::default_for(&env.metadata.provider)?,
            explicit => BackendKind::parse(explicit)?,
        };

        let bucket = match backend.bucket.trim() {
            "" => default_bucket(kind, &env.metadata.org, &env.metadata.name),
            explicit => explicit.to_string(),
        };

        let mut config = Self {
            kind,
            bucket,
            region: backend.region.trim().to_string(),
            container: backend.container.trim().to_string(),
            resource_group: backend.resource_group.trim().to_string(),
            profile: backend.profile.trim().to_string(),
        };
        config.fill_region(entry);
        Ok(config)
    }

    /// Overlay the non-empty fields of a service's own backend section.
    pub fn with_overrides(mut self, backend: &Backend, entry: &EnvironmentEntry) -> IacResult<Self> {
        if !backend.backend_type.trim().is_empty() {
            self.kind = BackendKind::parse(&backend.backend_type)?;
        }
        let overlay = |target: &mut String, value: &str| {
            if !value.trim().is_empty() {
                *target = value.trim().to_string();
            }
        };
        overlay(&mut self.bucket, &backend.bucket);
        overlay(&mut self.region, &backend.region);
        overlay(&mut self.container, &backend.container);
        overlay(&mut self.resource_group, &backend.resource_group);
        overlay(&mut self.profile, &backend.profile);
        self.fill_region(entry);
        Ok(self)
    }

    fn fill_region(&mut self, entry: &EnvironmentEntry) {
        if self.region.is_empty() && self.kind == BackendKind::S3 {
            self.region = entry.region.clone();
        }
    }

    /// Backend settings for a given state key, in emission order.
    fn settings(&self, key: &str) -> Vec<(&'static str, String)> {
        match self.kind {
            BackendKind::S3 => {
                let mut settings = vec![
                    ("bucket", self.bucket.clone()),
                    ("key", key.to_string()),
                    ("region", self.region.clone()),
                ];
                if !self.profile.is_empty() {
                    settings.push(("profile", self.profile.clone()));
                }
                settings
            }
            BackendKind::Gcs => vec![("bucket", self.bucket.clone()), ("prefix", key.to_string())],
            BackendKind::Azurerm => {
                let container = if self.container.is_empty() {
                    DEFAULT_AZURE_CONTAINER.to_string()
                } else {
                    self.container.clone()
                };
                let mut settings = vec![
                    ("storage_account_name", self.bucket.clone()),
                    ("container_name", container),
                    ("key", key.to_string()),
                ];
                if !self.resource_group.is_empty() {
                    settings.push(("resource_group_name", self.resource_group.clone()));
                }
                settings
            }
        }
    }

    /// `backend "<kind>" { ... }` for the `terraform` block.
    pub fn backend_block(&self, key: &str) -> Block {
        self.settings(key)
            .into_iter()
            .fold(Block::builder("backend").add_label(self.kind.as_str()), |block, setting| {
                block.add_attribute(setting)
            })
            .build()
    }

    /// `data "terraform_remote_state" "env"` reading the given state key.
    pub fn remote_state_block(&self, key: &str) -> Block {
        let config = object(
            self.settings(key)
                .into_iter()
                .map(|(name, value)| (name, string(value))),
        );
        Block::builder("data")
            .add_label("terraform_remote_state")
            .add_label(REMOTE_STATE_NAME)
            .add_attribute(("backend", self.kind.as_str()))
            .add_attribute(("config", config))
            .build()
    }
}

/// State key of an environment stack.
pub fn env_state_key(env_name: &str, env_key: &str) -> String {
    format!("env/{}/{}/terraform.tfstate", env_name, env_key)
}

/// State key of a service stack.
pub fn service_state_key(service_name: &str, env_key: &str) -> String {
    format!("service/{}/{}/terraform.tfstate", service_name, env_key)
}

fn default_bucket(kind: BackendKind, org: &str, env_name: &str) -> String {
    let mut parts = Vec::new();
    match org.trim() {
        "" => parts.push("pltf".to_string()),
        org => parts.push(org.to_lowercase()),
    }
    if !env_name.trim().is_empty() {
        parts.push(env_name.trim().to_lowercase());
    }
    parts.push("tfstate".to_string());
    let base = parts.join("-");

    match kind {
        BackendKind::Azurerm => sanitize_storage_account_name(&base),
        _ => sanitize_bucket_name(&base),
    }
}

/// Lowercase alphanumerics joined by single dashes, 3 to 63 characters.
pub fn sanitize_bucket_name(name: &str) -> String {
    let mut out = String::new();
    let mut prev_dash = false;
    for c in name.trim().to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            prev_dash = false;
        } else if !prev_dash && !out.is_empty() {
            out.push('-');
            prev_dash = true;
        }
    }

    let mut out = out.trim_matches('-').to_string();
    if out.is_empty() {
        out = "pltf-tfstate".to_string();
    }
    while out.len() < 3 {
        out.push('0');
    }
    if out.len() > 63 {
        out = out[..63].trim_matches('-').to_string();
    }
    if out.len() < 3 {
        out = "pltf-tfstate".to_string();
    }
    out
}

/// Lowercase alphanumerics only, 3 to 24 characters.
pub fn sanitize_storage_account_name(name: &str) -> String {
    let mut out: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    if out.is_empty() {
        out = "pltftfstate".to_string();
    }
    while out.len() < 3 {
        out.push('0');
    }
    out.truncate(24);
    out
}
