//! # pltf_iac
//!
//! Terraform stack generation and lifecycle orchestration for pltf.
//!
//! This crate turns an environment or service spec plus a set of module
//! roots into a self-contained Terraform directory, and drives the
//! terraform binary against it.
//!
//! ## Features
//!
//! - Module registry over custom and builtin roots
//! - Input resolution with auto-wiring, remote state and placeholders
//! - IAM policy and trust augmentation from module links
//! - Backend, provider, secrets and outputs scaffolding
//! - Deterministic HCL rendering and module dependency graphs
//! - Advisory spec linting against module contracts
//! - Terraform lifecycle runner with plan summaries
//!
//! ## Example
//!
//! ```rust,no_run
//! use pltf_iac::{GeneratorOptions, ModuleRoot, StackGenerator};
//! use pltf_spec::SpecReader;
//!
//! let env = SpecReader::load_environment("env.yaml").unwrap();
//! let options = GeneratorOptions::new("dev", ".pltf/demo/env/dev")
//!     .with_spec_dir(".")
//!     .with_root(ModuleRoot::builtin("./modules"));
//!
//! let summary = StackGenerator::new(&env, None, options).generate().unwrap();
//! println!("wrote {} files to {:?}", summary.files_written, summary.out_dir);
//! ```

pub mod augment;
pub mod backend;
pub mod error;
pub mod expr;
pub mod files;
pub mod generator;
pub mod graph;
pub mod hclgen;
pub mod lint;
pub mod outputs;
pub mod provider;
pub mod registry;
pub mod scaffold;
pub mod terraform;

pub use augment::{AugmentContext, AugmentEngine, Augmentation, PolicyDocument, PolicyStatement};
pub use backend::{env_state_key, service_state_key, BackendConfig, BackendKind};
pub use error::{IacError, IacResult};
pub use expr::{parse_override_value, parse_var_flags, ExprCompiler, Placeholders};
pub use files::{copy_module_tree, FileCopy, FileMaterializer};
pub use generator::{
    assert_safe_out_dir, GenerateSummary, GeneratorOptions, StackGenerator, StackPlan, MODULES_DIR,
};
pub use graph::{find_cycle, spec_edges, spec_graph};
pub use lint::{LintFinding, LintRule, Linter};
pub use outputs::{plan_outputs, render_outputs, PlannedOutput};
pub use provider::CloudProvider;
pub use registry::{ModuleRegistry, ModuleRoot, RegisteredModule, RootKind};
pub use terraform::{
    CommandExecutor, CommandOutput, ExecRequest, PlanOutcome, PlanRequest, PlanSummary,
    ProcessExecutor, TerraformResult, TerraformRunner, TerraformVersion, TfExecOptions,
};
