//! Generate command - Render the Terraform stack for a spec.

use anyhow::Result;
use clap::Args;

use crate::stack::{self, SpecArgs};
use crate::ExitCodes;

#[derive(Args)]
pub struct GenerateArgs {
    #[command(flatten)]
    pub spec: SpecArgs,
}

pub async fn execute(args: GenerateArgs) -> Result<u8> {
    let (stack, summary) = stack::generate(&args.spec)?;

    println!(
        "Generated {} Terraform for {:?} (env={}) into {}",
        stack.kind,
        stack.name(),
        stack.env_key,
        summary.out_dir.display()
    );
    if !summary.module_types.is_empty() {
        println!("   modules: {}", summary.module_types.join(", "));
    }

    Ok(ExitCodes::SUCCESS)
}
