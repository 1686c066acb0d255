//! Version command - Show the pltf, terraform and provider versions.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use pltf_iac::provider::{AWS_PROVIDER_VERSION, AZURERM_PROVIDER_VERSION, GOOGLE_PROVIDER_VERSION};
use pltf_iac::{TerraformRunner, TerraformVersion};

use crate::ExitCodes;

/// Overrides the reported pltf version, e.g. in release builds.
pub const VERSION_ENV: &str = "PLTF_VERSION";

const HASHICORP_REGISTRY: &str = "registry.terraform.io/hashicorp/";

/// Providers always listed, with the constraint generated stacks pin.
const KEY_PROVIDERS: [(&str, &str); 3] = [
    ("aws", AWS_PROVIDER_VERSION),
    ("google", GOOGLE_PROVIDER_VERSION),
    ("azurerm", AZURERM_PROVIDER_VERSION),
];

#[derive(Args)]
pub struct VersionArgs {}

pub async fn execute(_args: VersionArgs) -> Result<u8> {
    let cwd = std::env::current_dir().context("Failed to resolve the current directory")?;
    let terraform = TerraformRunner::local()
        .with_timeout(Duration::from_secs(30))
        .version(&cwd)
        .await;
    if let Err(e) = &terraform {
        debug!("terraform version lookup failed: {}", e);
    }

    let cli = std::env::var(VERSION_ENV).ok();
    print!(
        "{}",
        report(cli_version(cli.as_deref()), terraform.as_ref().map_err(|e| e.to_string()))
    );
    Ok(ExitCodes::SUCCESS)
}

fn cli_version(env_override: Option<&str>) -> &str {
    env_override
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(env!("CARGO_PKG_VERSION"))
}

fn report(cli: &str, terraform: std::result::Result<&TerraformVersion, String>) -> String {
    let mut out = format!("pltf version: {}\n", cli);

    let selections: BTreeMap<String, String> = match &terraform {
        Ok(version) => {
            out.push_str(&format!("terraform: {}\n", version.terraform_version));
            version.provider_selections.clone()
        }
        Err(reason) => {
            out.push_str(&format!("terraform: not available ({})\n", reason));
            BTreeMap::new()
        }
    };

    out.push_str("providers:\n");
    for (name, pinned) in KEY_PROVIDERS {
        let selected = selections
            .get(&format!("{}{}", HASHICORP_REGISTRY, name))
            .filter(|v| !v.is_empty())
            .map(String::as_str)
            .unwrap_or(pinned);
        out.push_str(&format!("  - {}: {}\n", name, selected));
    }
    for (source, version) in &selections {
        let is_key = KEY_PROVIDERS
            .iter()
            .any(|(name, _)| source.strip_prefix(HASHICORP_REGISTRY) == Some(*name));
        if !is_key {
            out.push_str(&format!("  - {}: {}\n", source, version));
        }
    }
    out
}
