//! Structural validation of Environment and Service specs.

use std::collections::BTreeSet;

use crate::models::{EnvironmentConfig, Module, ServiceConfig, SpecKind, CUSTOM_SOURCE};

/// Validation result with details.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// Validator for spec documents.
pub struct SpecValidator;

impl SpecValidator {
    /// Validate an Environment spec on its own.
    pub fn validate_environment(env: &EnvironmentConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        if env.api_version.is_empty() {
            result.add_error("apiVersion is required");
        }
        if env.kind != SpecKind::Environment.as_str() {
            result.add_error(format!("kind must be 'Environment', got {:?}", env.kind));
        }
        if env.metadata.name.is_empty() {
            result.add_error("metadata.name is required");
        }
        if env.metadata.org.is_empty() {
            result.add_error("metadata.org is required");
        }
        if env.metadata.provider.is_empty() {
            result.add_error("metadata.provider is required");
        }

        if env.environments.is_empty() {
            result.add_error("at least one environment entry is required");
        }
        for (key, entry) in &env.environments {
            if entry.account.is_empty() {
                result.add_error(format!("environments.{}.account is required", key));
            }
            if entry.region.is_empty() {
                result.add_error(format!("environments.{}.region is required", key));
            }
        }

        result.merge(Self::validate_modules(&env.modules, "environment", &BTreeSet::new()));
        result
    }

    /// Validate a Service spec. With the referenced Environment available,
    /// envRef keys and the combined module set are checked as well.
    pub fn validate_service(svc: &ServiceConfig, env: Option<&EnvironmentConfig>) -> ValidationResult {
        let mut result = ValidationResult::new();

        if svc.api_version.is_empty() {
            result.add_error("apiVersion is required");
        }
        if svc.kind != SpecKind::Service.as_str() {
            result.add_error(format!("kind must be 'Service', got {:?}", svc.kind));
        }
        if svc.metadata.name.is_empty() {
            result.add_error("metadata.name is required");
        }
        if svc.metadata.env_file.is_empty() {
            result.add_error("metadata.ref (path to environment) is required");
        }
        if svc.metadata.env_ref.is_empty() {
            result.add_error("metadata.envRef must define at least one environment (dev/prod, etc.)");
        }

        let mut env_ids = BTreeSet::new();
        if let Some(env) = env {
            for key in svc.metadata.env_ref.keys() {
                if !env.environments.contains_key(key) {
                    result.add_error(format!(
                        "service envRef.{} has no matching environment in {}",
                        key, env.metadata.name
                    ));
                }
            }

            env_ids = env.modules.iter().map(|m| m.id.as_str()).collect();
            for module in &svc.modules {
                if env_ids.contains(module.id.as_str()) {
                    result.add_error(format!(
                        "service module id {:?} collides with an environment module",
                        module.id
                    ));
                }
            }
        }

        result.merge(Self::validate_modules(&svc.modules, "service", &env_ids));
        result
    }

    /// Enforce id/type presence, id uniqueness and link targets. `known`
    /// holds ids declared outside this module list that links may target.
    pub fn validate_modules(mods: &[Module], context: &str, known: &BTreeSet<&str>) -> ValidationResult {
        let mut result = ValidationResult::new();

        if mods.is_empty() {
            result.add_error(format!("at least one module is required in {}", context));
            return result;
        }

        let mut ids = BTreeSet::new();
        for module in mods {
            if module.id.is_empty() {
                result.add_error(format!("module id is required in {}", context));
                continue;
            }
            if module.module_type.is_empty() {
                result.add_error(format!("module {:?} type is required in {}", module.id, context));
            }
            if !ids.insert(module.id.as_str()) {
                result.add_error(format!("duplicate module id {:?} in {}", module.id, context));
            }
            let source = module.source.trim();
            if !source.is_empty() && source != CUSTOM_SOURCE {
                result.add_warning(format!(
                    "module {:?} has unrecognized source {:?}; only {:?} changes resolution",
                    module.id, source, CUSTOM_SOURCE
                ));
            }
        }

        for module in mods {
            for (access, targets) in module.links.iter() {
                if targets.is_empty() {
                    result.add_error(format!(
                        "module {:?} links.{} has no targets in {}",
                        module.id, access, context
                    ));
                }
                for target in targets {
                    if !ids.contains(target.as_str()) && !known.contains(target.as_str()) {
                        result.add_error(format!(
                            "module {:?} links.{} refers to unknown module {:?} in {}",
                            module.id, access, target, context
                        ));
                    }
                }
            }
        }

        result
    }
}
