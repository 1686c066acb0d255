//! Advisory checks over a loaded spec.
//!
//! Lint findings never block generation. They point at spec content that
//! is probably a mistake: variables nothing reads, links to modules that do
//! not exist, inputs a module type does not declare.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use pltf_spec::{EnvironmentConfig, Module, ServiceConfig};

use crate::expr::referenced_var_names;
use crate::registry::ModuleRegistry;

/// The check that produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LintRule {
    MissingLabels,
    UnusedVariable,
    UnknownLinkTarget,
    UnknownModuleType,
    UndeclaredInput,
}

impl LintRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            LintRule::MissingLabels => "missing_labels",
            LintRule::UnusedVariable => "unused_variable",
            LintRule::UnknownLinkTarget => "unknown_link_target",
            LintRule::UnknownModuleType => "unknown_module_type",
            LintRule::UndeclaredInput => "undeclared_input",
        }
    }
}

impl fmt::Display for LintRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintFinding {
    pub rule: LintRule,
    pub message: String,
}

impl LintFinding {
    fn new(rule: LintRule, message: impl Into<String>) -> Self {
        Self {
            rule,
            message: message.into(),
        }
    }
}

/// Lints the modules of one layer: the environment's own modules, or the
/// service's modules when a service is given.
pub struct Linter<'a> {
    env: &'a EnvironmentConfig,
    service: Option<&'a ServiceConfig>,
    env_key: &'a str,
    registry: Option<&'a ModuleRegistry>,
}

impl<'a> Linter<'a> {
    pub fn new(env: &'a EnvironmentConfig, service: Option<&'a ServiceConfig>, env_key: &'a str) -> Self {
        Self {
            env,
            service,
            env_key,
            registry: None,
        }
    }

    /// Enable the checks that need module contracts.
    pub fn with_registry(mut self, registry: &'a ModuleRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    fn modules(&self) -> &'a [Module] {
        match self.service {
            Some(svc) => &svc.modules,
            None => &self.env.modules,
        }
    }

    fn layer(&self) -> &'static str {
        if self.service.is_some() {
            "service"
        } else {
            "environment"
        }
    }

    pub fn run(&self) -> Vec<LintFinding> {
        let mut findings = Vec::new();
        self.check_labels(&mut findings);
        self.check_variables(&mut findings);
        self.check_links(&mut findings);
        if let Some(registry) = self.registry {
            self.check_module_types(registry, &mut findings);
        }
        findings
    }

    fn check_labels(&self, findings: &mut Vec<LintFinding>) {
        match self.service {
            Some(svc) if svc.metadata.labels.is_empty() && self.env.metadata.labels.is_empty() => {
                findings.push(LintFinding::new(
                    LintRule::MissingLabels,
                    "add labels on the service or environment for tagging (team, cost_center)",
                ));
            }
            None if self.env.metadata.labels.is_empty() => {
                findings.push(LintFinding::new(
                    LintRule::MissingLabels,
                    "add metadata.labels for tagging (team, cost_center)",
                ));
            }
            _ => {}
        }
    }

    /// Variables defined for the selected key that no module references,
    /// either as `var.<name>` or by declaring an unset input of that name.
    fn check_variables(&self, findings: &mut Vec<LintFinding>) {
        let mut defined: BTreeSet<&str> = self
            .env
            .environments
            .get(self.env_key)
            .map(|entry| entry.variables.keys().map(String::as_str).collect())
            .unwrap_or_default();
        if let Some(svc) = self.service {
            if let Some(entry) = svc.metadata.env_ref.get(self.env_key) {
                defined.extend(entry.variables.keys().map(String::as_str));
            }
        }

        let mut used = BTreeSet::new();
        for module in self.modules() {
            for value in module.inputs.values() {
                used.extend(referenced_var_names(value));
            }
            let declared = self.registry.and_then(|r| r.metadata(&module.module_type));
            for input in declared.iter().flat_map(|meta| meta.inputs.iter()) {
                if !module.inputs.contains_key(&input.name) {
                    used.insert(input.name.clone());
                }
            }
        }

        for name in defined.into_iter().filter(|name| !used.contains(*name)) {
            findings.push(LintFinding::new(
                LintRule::UnusedVariable,
                format!(
                    "variable {:?} is defined for env {:?} but no {} module references it",
                    name,
                    self.env_key,
                    self.layer()
                ),
            ));
        }
    }

    fn check_links(&self, findings: &mut Vec<LintFinding>) {
        let mut known: BTreeSet<&str> = self.env.modules.iter().map(|m| m.id.as_str()).collect();
        if let Some(svc) = self.service {
            known.extend(svc.modules.iter().map(|m| m.id.as_str()));
        }

        for module in self.modules() {
            for (access, target) in module.links.pairs() {
                if !known.contains(target) {
                    findings.push(LintFinding::new(
                        LintRule::UnknownLinkTarget,
                        format!(
                            "module {:?} links.{} refers to unknown module {:?}",
                            module.id, access, target
                        ),
                    ));
                }
            }
        }
    }

    fn check_module_types(&self, registry: &ModuleRegistry, findings: &mut Vec<LintFinding>) {
        for module in self.modules() {
            let Some(meta) = registry.metadata(&module.module_type) else {
                findings.push(LintFinding::new(
                    LintRule::UnknownModuleType,
                    format!(
                        "module {:?} has type {:?} which no module root provides",
                        module.id, module.module_type
                    ),
                ));
                continue;
            };
            for name in module.inputs.keys().filter(|name| !meta.declares_input(name)) {
                findings.push(LintFinding::new(
                    LintRule::UndeclaredInput,
                    format!(
                        "module {:?} input {:?} is not declared by type {:?} and is passed through unchecked",
                        module.id, name, module.module_type
                    ),
                ));
            }
        }
    }
}
