//! Augmentation engine.
//!
//! Builders derive extra inputs (IAM policies, Kubernetes trust bindings)
//! from the access links declared between modules. The builder set is an
//! explicit ordered list handed to [`AugmentEngine::new`].

pub mod aws;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use pltf_spec::{Module, Value};

use crate::outputs::ParentOutputs;
use crate::provider::CloudProvider;

/// Reserved input key receiving the synthesized policy.
pub const IAM_POLICY_INPUT: &str = "iam_policy";
/// Reserved input key receiving trust bindings.
pub const KUBERNETES_TRUSTS_INPUT: &str = "kubernetes_trusts";

pub const POLICY_VERSION: &str = "2012-10-17";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
}

impl PolicyStatement {
    pub fn allow(actions: Vec<String>, resources: Vec<String>) -> Self {
        Self {
            effect: "Allow".to_string(),
            actions,
            resources,
        }
    }

    pub fn to_value(&self) -> Value {
        let strings = |items: &[String]| Value::List(items.iter().map(|s| Value::from(s.as_str())).collect());
        Value::Map(BTreeMap::from([
            ("Action".to_string(), strings(&self.actions)),
            ("Effect".to_string(), Value::from(self.effect.as_str())),
            ("Resource".to_string(), strings(&self.resources)),
        ]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDocument {
    pub version: String,
    pub statements: Vec<PolicyStatement>,
}

impl PolicyDocument {
    pub fn new(statements: Vec<PolicyStatement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statements,
        }
    }

    pub fn statement_values(&self) -> Vec<Value> {
        self.statements.iter().map(PolicyStatement::to_value).collect()
    }

    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("Statement".to_string(), Value::List(self.statement_values())),
            ("Version".to_string(), Value::from(self.version.as_str())),
        ]))
    }
}

/// A federated-identity trust for a Kubernetes service account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesTrust {
    pub open_id_url: String,
    pub open_id_arn: String,
    pub service_name: String,
    pub namespace: String,
}

impl KubernetesTrust {
    pub fn to_value(&self) -> Value {
        Value::Map(BTreeMap::from([
            ("namespace".to_string(), Value::from(self.namespace.as_str())),
            ("open_id_arn".to_string(), Value::from(self.open_id_arn.as_str())),
            ("open_id_url".to_string(), Value::from(self.open_id_url.as_str())),
            ("service_name".to_string(), Value::from(self.service_name.as_str())),
        ]))
    }
}

/// Extra inputs synthesized for one module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Augmentation {
    pub iam_policy: Option<PolicyDocument>,
    pub kubernetes_trusts: Vec<KubernetesTrust>,
    /// Module the augmentation was derived for.
    pub source_module: Option<String>,
}

impl Augmentation {
    /// Combine with another builder's result for the same module.
    pub fn merge(mut self, next: Augmentation) -> Self {
        self.iam_policy = match (self.iam_policy, next.iam_policy) {
            (Some(mut base), Some(extra)) => {
                base.statements.extend(extra.statements);
                Some(base)
            }
            (base, extra) => base.or(extra),
        };
        self.kubernetes_trusts.extend(next.kubernetes_trusts);
        if self.source_module.is_none() {
            self.source_module = next.source_module;
        }
        self
    }

    /// Merge into a module's inputs, appending to user-authored values.
    pub fn apply_to(&self, module_id: &str, inputs: &mut BTreeMap<String, Value>) {
        if let Some(policy) = &self.iam_policy {
            let appended = match inputs.get_mut(IAM_POLICY_INPUT) {
                Some(Value::Map(existing)) => match existing.get_mut("Statement") {
                    Some(Value::List(statements)) if !statements.is_empty() => {
                        statements.extend(policy.statement_values());
                        true
                    }
                    _ => false,
                },
                _ => false,
            };
            if !appended {
                inputs.insert(IAM_POLICY_INPUT.to_string(), policy.to_value());
            }
        }

        if self.kubernetes_trusts.is_empty() {
            return;
        }
        let trusts = self.kubernetes_trusts.iter().map(KubernetesTrust::to_value);
        match inputs.get_mut(KUBERNETES_TRUSTS_INPUT) {
            Some(Value::List(existing)) => existing.extend(trusts),
            Some(Value::Null) | None => {
                inputs.insert(KUBERNETES_TRUSTS_INPUT.to_string(), Value::List(trusts.collect()));
            }
            Some(_) => warn!(
                "Module {:?} sets {} to a non-list value; generated trusts not applied",
                module_id, KUBERNETES_TRUSTS_INPUT
            ),
        }
    }
}

/// Everything a builder may look at. Builders never mutate the stack.
#[derive(Debug, Clone, Copy)]
pub struct AugmentContext<'a> {
    pub provider: CloudProvider,
    pub env_name: &'a str,
    pub service_name: Option<&'a str>,
    /// Every module of the stack, environment modules first.
    pub modules: &'a [Module],
    pub vars: &'a BTreeMap<String, Value>,
    /// Set for service runs.
    pub parent: Option<&'a ParentOutputs>,
}

impl<'a> AugmentContext<'a> {
    /// Reference to a module output, routed through remote state when the
    /// module lives in the parent environment stack.
    pub fn output_ref(&self, module_id: &str, output: &str) -> String {
        match self.parent {
            Some(parent) if parent.contains(module_id) => {
                format!("parent.{}", parent.output_name(module_id, output))
            }
            _ => format!("module.{}.{}", module_id, output),
        }
    }

    pub fn module(&self, id: &str) -> Option<&'a Module> {
        self.modules.iter().find(|m| m.id == id)
    }

    pub fn first_of_type(&self, module_type: &str) -> Option<&'a Module> {
        self.modules.iter().find(|m| m.module_type == module_type)
    }

    /// A non-blank string variable, or `fallback`.
    pub fn string_var(&self, name: &str, fallback: &str) -> String {
        match self.vars.get(name).and_then(Value::as_str) {
            Some(s) if !s.trim().is_empty() => s.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// A pure augmentation builder.
pub type Builder = fn(&AugmentContext<'_>) -> BTreeMap<String, Augmentation>;

/// Runs builders in order and merges their results per module id.
#[derive(Debug, Clone)]
pub struct AugmentEngine {
    builders: Vec<Builder>,
}

impl AugmentEngine {
    pub fn new(builders: Vec<Builder>) -> Self {
        Self { builders }
    }

    /// The builders shipped with pltf.
    pub fn standard() -> Self {
        Self::new(vec![aws::build as Builder])
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn build(&self, ctx: &AugmentContext<'_>) -> BTreeMap<String, Augmentation> {
        let mut result: BTreeMap<String, Augmentation> = BTreeMap::new();
        for builder in &self.builders {
            for (module_id, aug) in builder(ctx) {
                let merged = result.remove(&module_id).unwrap_or_default().merge(aug);
                result.insert(module_id, merged);
            }
        }
        debug!("Augmentations built for {} modules", result.len());
        result
    }
}

impl Default for AugmentEngine {
    fn default() -> Self {
        Self::standard()
    }
}
