//! CLI command definitions.
//!
//! Every stack command loads an Environment or Service spec, resolves the
//! environment key and module roots, and works on the generated stack.

use clap::{Parser, Subcommand};

pub mod generate;
pub mod graph;
pub mod lint;
pub mod module;
pub mod terraform;
pub mod validate;
pub mod version;

/// pltf - Terraform stacks from Environment and Service specs
#[derive(Parser)]
#[command(name = "pltf")]
#[command(version, about = "pltf - Terraform stacks from Environment and Service specs")]
#[command(long_about = r#"
pltf turns declarative Environment and Service YAML specs into a complete
Terraform root module and drives the Terraform lifecycle against it.

COMMANDS:
  generate      → Render the Terraform stack for a spec
  validate      → Validate a spec (auto-detects Environment or Service)
  lint          → Report unused variables, missing labels and unknown references
  graph         → Print the module dependency graph (DOT)
  module        → List module types or show one module's contract
  terraform     → Generate, init and run init/plan/apply/destroy/output/force-unlock
  version       → Show pltf, terraform and provider versions

ENVIRONMENT:
  PLTF_DEFAULT_ENV       Default environment key
  PLTF_MODULES_ROOT      Custom modules root
  PLTF_BUILTIN_MODULES   Builtin modules root
  PLTF_PROFILE           Profile file (default ~/.pltf/profile.yaml)

EXIT CODES:
  0 - Success (plan: no changes)
  1 - General error
  2 - Invalid arguments (plan --detailed-exitcode: changes present)
  3 - Validation failure
  5 - IaC error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate the Terraform stack for an Environment or Service spec
    Generate(generate::GenerateArgs),

    /// Validate an Environment or Service spec
    Validate(validate::ValidateArgs),

    /// Lint a spec for unused variables, missing labels and unknown references
    Lint(lint::LintArgs),

    /// Print the module dependency graph in DOT format
    Graph(graph::GraphArgs),

    /// Inspect module types available in the module roots
    #[command(subcommand)]
    Module(module::ModuleAction),

    /// Terraform helpers (generate + init + terraform command)
    #[command(subcommand)]
    Terraform(TerraformAction),

    /// Show pltf, terraform and provider versions
    Version(version::VersionArgs),
}

#[derive(Subcommand)]
pub enum TerraformAction {
    /// Generate the stack and run terraform init
    Init(terraform::InitArgs),

    /// Generate the stack and run terraform plan
    Plan(terraform::PlanArgs),

    /// Generate the stack and run terraform apply
    Apply(terraform::ApplyArgs),

    /// Generate the stack and run terraform destroy
    Destroy(terraform::ApplyArgs),

    /// Show terraform outputs for the generated stack
    Output(terraform::OutputArgs),

    /// Force unlock terraform state for the generated stack
    #[command(name = "force-unlock")]
    ForceUnlock(terraform::ForceUnlockArgs),
}
