//! Module commands - Inspect the module contracts available to specs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand, ValueEnum};

use pltf_iac::{ModuleRegistry, RegisteredModule, RootKind};
use pltf_spec::{InputSpec, ModuleMetadata};

use crate::stack::module_roots;
use crate::ExitCodes;

#[derive(Subcommand)]
pub enum ModuleAction {
    /// List the module types found in the module roots
    List(ModuleListArgs),

    /// Show the inputs and outputs of one module type
    Get(ModuleGetArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

#[derive(Args)]
pub struct ModuleListArgs {
    /// Custom modules root, searched before the builtin modules
    #[arg(short, long, env = "PLTF_MODULES_ROOT")]
    pub modules: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

#[derive(Args)]
pub struct ModuleGetArgs {
    /// Module type, e.g. aws_postgres
    pub module_type: String,

    /// Custom modules root, searched before the builtin modules
    #[arg(short, long, env = "PLTF_MODULES_ROOT")]
    pub modules: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

fn load_registry(custom: Option<&Path>) -> Result<ModuleRegistry> {
    ModuleRegistry::scan(&module_roots(custom)).context("Failed to scan module roots")
}

pub async fn list(args: ModuleListArgs) -> Result<u8> {
    let registry = load_registry(args.modules.as_deref())?;
    print!("{}", render_list(&registry, args.output)?);
    Ok(ExitCodes::SUCCESS)
}

pub async fn get(args: ModuleGetArgs) -> Result<u8> {
    let registry = load_registry(args.modules.as_deref())?;
    let module = find(&registry, &args.module_type)?;
    print!("{}", render_detail(module, args.output)?);
    Ok(ExitCodes::SUCCESS)
}

fn find<'a>(registry: &'a ModuleRegistry, module_type: &str) -> Result<&'a RegisteredModule> {
    match registry.get(module_type.trim()) {
        Some(module) => Ok(module),
        None => bail!(
            "invalid argument: module type {:?} not found; available: {}",
            module_type,
            registry.types().collect::<Vec<_>>().join(", ")
        ),
    }
}

fn root_label(kind: RootKind) -> &'static str {
    match kind {
        RootKind::Custom => "custom",
        RootKind::Builtin => "builtin",
    }
}

fn serialize<T: serde::Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).context("Failed to serialize JSON")? + "\n",
        OutputFormat::Yaml => serde_yaml::to_string(value).context("Failed to serialize YAML")?,
        OutputFormat::Table => String::new(),
    })
}

fn render_list(registry: &ModuleRegistry, format: OutputFormat) -> Result<String> {
    if format != OutputFormat::Table {
        let metas: Vec<&ModuleMetadata> = registry.iter().map(|(_, m)| &m.metadata).collect();
        return serialize(&metas, format);
    }
    if registry.is_empty() {
        return Ok("No modules found.\n".to_string());
    }

    let width = registry.types().map(str::len).max().unwrap_or(0).max("TYPE".len());
    let mut out = format!(
        "{:<width$}  {:<8}  {:<8}  {:<7}  {}\n",
        "TYPE",
        "PROVIDER",
        "VERSION",
        "ROOT",
        "DESCRIPTION",
        width = width
    );
    for (module_type, module) in registry.iter() {
        let meta = &module.metadata;
        let line = format!(
            "{:<width$}  {:<8}  {:<8}  {:<7}  {}",
            module_type,
            meta.provider,
            meta.version,
            root_label(module.kind),
            meta.description,
            width = width
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    Ok(out)
}

fn describe_input(input: &InputSpec) -> String {
    let mut line = format!("  - {} ({}", input.name, input.input_type);
    if input.required {
        line.push_str(", required");
    }
    line.push(')');
    if let Some(default) = input.default.as_ref().filter(|v| !v.is_null()) {
        line.push_str(&format!(" default: {}", default));
    }
    if !input.description.is_empty() {
        line.push_str(&format!(": {}", input.description));
    }
    line
}

fn render_detail(module: &RegisteredModule, format: OutputFormat) -> Result<String> {
    let meta = &module.metadata;
    if format != OutputFormat::Table {
        return serialize(meta, format);
    }

    let or_dash = |items: &[String]| {
        if items.is_empty() {
            "-".to_string()
        } else {
            items.join(", ")
        }
    };

    let mut lines = vec![
        format!("type:        {}", meta.module_type),
        format!("name:        {}", meta.name),
        format!("provider:    {}", meta.provider),
        format!("version:     {}", meta.version),
    ];
    if !meta.description.is_empty() {
        lines.push(format!("description: {}", meta.description));
    }
    lines.push(format!("source:      {} ({})", module.dir.display(), root_label(module.kind)));
    lines.push(format!("provides:    {}", or_dash(&meta.capabilities.provides)));
    lines.push(format!("accepts:     {}", or_dash(&meta.capabilities.accepts)));

    lines.push("inputs:".to_string());
    if meta.inputs.is_empty() {
        lines.push("  (none)".to_string());
    }
    lines.extend(meta.inputs.iter().map(describe_input));

    lines.push("outputs:".to_string());
    if meta.outputs.is_empty() {
        lines.push("  (none)".to_string());
    }
    for output in &meta.outputs {
        let mut line = format!("  - {} ({}", output.name, output.output_type);
        if output.is_secret() {
            line.push_str(", secret");
        }
        line.push(')');
        if !output.description.is_empty() {
            line.push_str(&format!(": {}", output.description));
        }
        lines.push(line);
    }

    Ok(lines.join("\n") + "\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use pltf_iac::ModuleRoot;
    use tempfile::{tempdir, TempDir};

    fn registry() -> (TempDir, ModuleRegistry) {
        let root = tempdir().unwrap();
        let postgres = root.path().join("aws_postgres");
        fs::create_dir_all(&postgres).unwrap();
        fs::write(
            postgres.join("module.yaml"),
            r#"name: postgres
type: aws_postgres
provider: aws
version: 1.2.0
description: Managed Postgres
capabilities:
  provides: [secret]
inputs:
  - name: vpc_id
    type: string
    required: true
  - name: instance_class
    type: string
    default: db.t3.micro
    description: Instance size
outputs:
  - name: db_password
    type: string
    capability: secret
"#,
        )
        .unwrap();
        let sqs = root.path().join("aws_sqs");
        fs::create_dir_all(&sqs).unwrap();
        fs::write(sqs.join("module.yaml"), "name: aws_sqs\ntype: aws_sqs\nprovider: aws\nversion: 1.0.0\n").unwrap();

        let registry = ModuleRegistry::scan(&[ModuleRoot::builtin(root.path())]).unwrap();
        (root, registry)
    }

    #[test]
    fn test_list_table() {
        let (_root, registry) = registry();
        let table = render_list(&registry, OutputFormat::Table).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("TYPE          PROVIDER"));
        assert_eq!(lines[1], "aws_postgres  aws       1.2.0     builtin  Managed Postgres");
        assert_eq!(lines[2], "aws_sqs       aws       1.0.0     builtin");
    }

    #[test]
    fn test_list_json() {
        let (_root, registry) = registry();
        let json = render_list(&registry, OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let types: Vec<&str> = parsed
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["type"].as_str().unwrap())
            .collect();
        assert_eq!(types, vec!["aws_postgres", "aws_sqs"]);
    }

    #[test]
    fn test_get_detail() {
        let (_root, registry) = registry();
        let module = find(&registry, "aws_postgres").unwrap();
        let detail = render_detail(module, OutputFormat::Table).unwrap();
        assert!(detail.starts_with("type:        aws_postgres\nname:        postgres\n"));
        assert!(detail.contains("provides:    secret\naccepts:     -\n"));
        assert!(detail.contains("  - vpc_id (string, required)\n"));
        assert!(detail.contains("  - instance_class (string) default: db.t3.micro: Instance size\n"));
        assert!(detail.contains("outputs:\n  - db_password (string, secret)\n"));

        let yaml = render_detail(module, OutputFormat::Yaml).unwrap();
        let meta: ModuleMetadata = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(&meta, &module.metadata);
    }

    #[test]
    fn test_get_unknown_type() {
        let (_root, registry) = registry();
        let err = find(&registry, "aws_nothing").unwrap_err();
        assert!(err.to_string().contains("available: aws_postgres, aws_sqs"));
    }
}
