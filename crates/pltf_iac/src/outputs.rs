//! Stack output planning and `outputs.tf` rendering.

use std::collections::{BTreeMap, BTreeSet};

use hcl::{Block, Body};
use pltf_spec::ModuleMetadata;

use crate::error::IacResult;
use crate::hclgen::{render, traversal};

/// One `output` block of a generated stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub name: String,
    pub module_id: String,
    pub output: String,
    pub description: String,
    pub sensitive: bool,
}

impl PlannedOutput {
    pub fn value_ref(&self) -> String {
        format!("module.{}.{}", self.module_id, self.output)
    }
}

/// Make an output name a valid Terraform identifier.
pub fn sanitize_output_name(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    let trimmed = replaced.trim_matches('_');
    if trimmed.is_empty() {
        return "output".to_string();
    }
    if trimmed.starts_with(|c: char| c.is_ascii_digit()) {
        return format!("o_{}", trimmed);
    }
    trimmed.to_string()
}

/// Name every declared output of the given modules.
///
/// Bare names are kept when only one module declares them; colliding names
/// become `<module>_<output>`. Any remaining clash gets a numeric suffix.
pub fn plan_outputs<'a>(
    modules: impl IntoIterator<Item = (&'a str, &'a ModuleMetadata)>,
) -> Vec<PlannedOutput> {
    let modules: Vec<(&str, &ModuleMetadata)> = modules.into_iter().collect();

    let mut base_counts: BTreeMap<String, usize> = BTreeMap::new();
    for (_, meta) in &modules {
        for output in &meta.outputs {
            *base_counts.entry(sanitize_output_name(&output.name)).or_default() += 1;
        }
    }

    let mut used = BTreeSet::new();
    let mut planned = Vec::new();
    for (id, meta) in &modules {
        for output in &meta.outputs {
            let base = sanitize_output_name(&output.name);
            let candidate = if base_counts.get(&base).copied().unwrap_or(0) > 1 {
                sanitize_output_name(&format!("{}_{}", id, output.name))
            } else {
                base
            };

            let mut name = candidate.clone();
            let mut suffix = 2;
            while used.contains(&name) {
                name = format!("{}_{}", candidate, suffix);
                suffix += 1;
            }
            used.insert(name.clone());

            planned.push(PlannedOutput {
                name,
                module_id: id.to_string(),
                output: output.name.clone(),
                description: output.description.clone(),
                sensitive: output.is_secret(),
            });
        }
    }
    planned
}

/// Render `outputs.tf`.
pub fn render_outputs(outputs: &[PlannedOutput]) -> IacResult<String> {
    let mut body = Body::builder();
    for out in outputs {
        let mut block = Block::builder("output")
            .add_label(out.name.as_str())
            .add_attribute(("value", traversal(&out.value_ref())?));
        if !out.description.is_empty() {
            block = block.add_attribute(("description", out.description.as_str()));
        }
        if out.sensitive {
            block = block.add_attribute(("sensitive", true));
        }
        body = body.add_block(block.build());
    }
    render(&body.build())
}

/// Output names the parent environment stack publishes, used to route
/// references to environment-scope modules through remote state.
#[derive(Debug, Clone, Default)]
pub struct ParentOutputs {
    names: BTreeMap<(String, String), String>,
    ids: BTreeSet<String>,
}

impl ParentOutputs {
    /// `ids` are every environment module id; `outputs` is what the
    /// environment stack emits.
    pub fn new<I, S>(ids: I, outputs: &[PlannedOutput]) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names = outputs
            .iter()
            .map(|o| ((o.module_id.clone(), o.output.clone()), o.name.clone()))
            .collect();
        Self {
            names,
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, module_id: &str) -> bool {
        self.ids.contains(module_id)
    }

    /// Name under which the environment stack exports `module_id.output`.
    /// Undeclared outputs fall back to the sanitized bare name.
    pub fn output_name(&self, module_id: &str, output: &str) -> String {
        self.names
            .get(&(module_id.to_string(), output.to_string()))
            .cloned()
            .unwrap_or_else(|| sanitize_output_name(output))
    }
}
