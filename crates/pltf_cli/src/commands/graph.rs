//! Graph command - Print the module dependency graph.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use pltf_iac::{spec_graph, TerraformRunner};

use crate::stack::{self, SpecArgs, Stack};
use crate::ExitCodes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum GraphMode {
    /// `terraform graph` on the generated stack
    Terraform,
    /// Module links and references declared in the spec
    Spec,
}

#[derive(Args)]
pub struct GraphArgs {
    #[command(flatten)]
    pub spec: SpecArgs,

    /// Graph source
    #[arg(long, value_enum, default_value_t = GraphMode::Terraform)]
    pub mode: GraphMode,

    /// Write the DOT output to a file instead of stdout
    #[arg(long)]
    pub out_file: Option<PathBuf>,

    /// Saved plan to graph (terraform mode)
    #[arg(short = 'P', long)]
    pub plan_file: Option<String>,
}

pub async fn execute(args: GraphArgs) -> Result<u8> {
    let dot = match args.mode {
        GraphMode::Spec => {
            let stack = Stack::load(&args.spec.file, args.spec.env.as_deref())?;
            spec_graph(&stack.modules())
        }
        GraphMode::Terraform => {
            let (_, summary) = stack::generate(&args.spec)?;
            TerraformRunner::local()
                .graph(&summary.out_dir, args.plan_file.as_deref())
                .await
                .context("terraform graph failed")?
        }
    };

    match &args.out_file {
        Some(path) => {
            std::fs::write(path, &dot).with_context(|| format!("Failed to write graph to {:?}", path))?;
            println!("Wrote graph to {}", path.display());
        }
        None => print!("{}", dot),
    }

    Ok(ExitCodes::SUCCESS)
}
