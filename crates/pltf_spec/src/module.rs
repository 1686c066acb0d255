//! Module contracts read from `module.yaml` descriptors.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{SpecError, SpecResult};
use crate::value::Value;

/// File name of a module descriptor inside a module directory.
pub const MODULE_DESCRIPTOR: &str = "module.yaml";

/// Capability tag marking an output as sensitive.
pub const SECRET_CAPABILITY: &str = "secret";

/// The contract of a reusable infrastructure module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    #[serde(default)]
    pub name: String,
    /// Stable identifier matching `modules[].type` in specs.
    #[serde(rename = "type", default)]
    pub module_type: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    /// Informational only.
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub capability: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(rename = "type", default)]
    pub output_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub capability: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl OutputSpec {
    pub fn is_secret(&self) -> bool {
        self.capability.eq_ignore_ascii_case(SECRET_CAPABILITY)
    }
}

impl ModuleMetadata {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }

    pub fn declares_input(&self, name: &str) -> bool {
        self.input(name).is_some()
    }

    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }

    /// Check structural invariants. Inputs without a type are normalized to `any`.
    pub fn validate(&mut self) -> SpecResult<()> {
        let invalid = |message: String| Err(SpecError::InvalidMetadata(message));

        if self.name.is_empty() {
            return invalid("name is required".into());
        }
        if self.module_type.is_empty() {
            return invalid(format!("module {:?}: type is required", self.name));
        }
        if self.provider.is_empty() {
            return invalid(format!("module {:?}: provider is required", self.module_type));
        }
        if self.version.is_empty() {
            return invalid(format!("module {:?}: version is required", self.module_type));
        }

        let mut inputs = HashSet::new();
        for input in &mut self.inputs {
            if input.name.is_empty() {
                return invalid(format!("module {:?}: input name is required", self.module_type));
            }
            if input.input_type.is_empty() {
                input.input_type = "any".to_string();
            }
            if !inputs.insert(input.name.clone()) {
                return invalid(format!(
                    "module {:?}: duplicate input name {:?}",
                    self.module_type, input.name
                ));
            }
        }

        let mut outputs = HashSet::new();
        for output in &self.outputs {
            if output.name.is_empty() {
                return invalid(format!("module {:?}: output name is required", self.module_type));
            }
            if !outputs.insert(output.name.as_str()) {
                return invalid(format!(
                    "module {:?}: duplicate output name {:?}",
                    self.module_type, output.name
                ));
            }
            if output.output_type.is_empty() {
                return invalid(format!(
                    "module {:?}: output {:?} type is required",
                    self.module_type, output.name
                ));
            }
        }

        let provides = unique_capabilities(&self.module_type, "provides", &self.capabilities.provides)?;
        unique_capabilities(&self.module_type, "accepts", &self.capabilities.accepts)?;

        for output in &self.outputs {
            if !output.capability.is_empty() && !provides.contains(output.capability.as_str()) {
                return invalid(format!(
                    "module {:?}: output {:?} declares capability {:?} but it is not listed in capabilities.provides",
                    self.module_type, output.name, output.capability
                ));
            }
        }

        Ok(())
    }
}

fn unique_capabilities<'a>(
    module_type: &str,
    field: &str,
    caps: &'a [String],
) -> SpecResult<HashSet<&'a str>> {
    let mut seen = HashSet::new();
    for cap in caps {
        if cap.is_empty() {
            return Err(SpecError::InvalidMetadata(format!(
                "module {:?}: empty capability in capabilities.{}",
                module_type, field
            )));
        }
        if !seen.insert(cap.as_str()) {
            return Err(SpecError::InvalidMetadata(format!(
                "module {:?}: duplicate capability {:?} in capabilities.{}",
                module_type, cap, field
            )));
        }
    }
    Ok(seen)
}
