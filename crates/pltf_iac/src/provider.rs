//! Cloud provider definitions.

use serde::{Deserialize, Serialize};

use crate::error::{IacError, IacResult};

pub const AWS_PROVIDER_VERSION: &str = "~> 6.0";
pub const GOOGLE_PROVIDER_VERSION: &str = ">= 5.0.0";
pub const AZURERM_PROVIDER_VERSION: &str = ">= 4.0.0";
pub const KUBERNETES_PROVIDER_VERSION: &str = ">= 2.30.0";
pub const HELM_PROVIDER_VERSION: &str = ">= 2.13.2";
pub const TERRAFORM_REQUIRED_VERSION: &str = ">= 1.5.7";

/// Supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Azure,
    Gcp,
}

impl CloudProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::Gcp => "gcp",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "aws" => Some(CloudProvider::Aws),
            "azure" | "azurerm" => Some(CloudProvider::Azure),
            "gcp" | "google" => Some(CloudProvider::Gcp),
            _ => None,
        }
    }

    /// Parse a spec's `metadata.provider`, failing on unknown names.
    pub fn parse(s: &str) -> IacResult<Self> {
        Self::from_str(s).ok_or_else(|| IacError::UnsupportedProvider(s.to_string()))
    }

    /// Get the Terraform provider name.
    pub fn provider_name(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azurerm",
            CloudProvider::Gcp => "google",
        }
    }

    /// Registry source address for `required_providers`.
    pub fn provider_source(&self) -> &'static str {
        match self {
            CloudProvider::Aws => "hashicorp/aws",
            CloudProvider::Azure => "hashicorp/azurerm",
            CloudProvider::Gcp => "hashicorp/google",
        }
    }

    pub fn provider_version(&self) -> &'static str {
        match self {
            CloudProvider::Aws => AWS_PROVIDER_VERSION,
            CloudProvider::Azure => AZURERM_PROVIDER_VERSION,
            CloudProvider::Gcp => GOOGLE_PROVIDER_VERSION,
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
