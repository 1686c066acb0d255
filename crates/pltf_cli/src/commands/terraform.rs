//! Terraform commands - Generate the stack, init it, then run an action.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args};
use tracing::info;

use pltf_iac::{PlanRequest, TerraformRunner, TfExecOptions};

use crate::stack::{self, SpecArgs};
use crate::ExitCodes;

/// Terraform flags shared by plan, apply and destroy.
#[derive(Args, Debug, Clone)]
pub struct TfFlags {
    /// Disable color output
    #[arg(short = 'C', long)]
    pub no_color: bool,

    /// Allow interactive input
    #[arg(short = 'i', long)]
    pub input: bool,

    /// Lock the state file
    #[arg(short = 'l', long, default_value_t = true, action = ArgAction::Set)]
    pub lock: bool,

    /// Duration to retry a state lock (e.g. 30s)
    #[arg(short = 'T', long)]
    pub lock_timeout: Option<String>,

    /// Limit the number of concurrent operations
    #[arg(short = 'p', long)]
    pub parallelism: Option<u32>,

    /// Resource address to target, repeatable
    #[arg(short = 't', long = "target")]
    pub targets: Vec<String>,

    /// Refresh state before the operation
    #[arg(short = 'r', long, default_value_t = true, action = ArgAction::Set)]
    pub refresh: bool,
}

impl TfFlags {
    pub fn to_options(&self) -> TfExecOptions {
        let mut opts = TfExecOptions {
            no_color: self.no_color,
            input: self.input,
            lock: self.lock,
            ..Default::default()
        }
        .with_refresh(self.refresh);
        if let Some(timeout) = &self.lock_timeout {
            opts = opts.with_lock_timeout(timeout.as_str());
        }
        if let Some(parallelism) = self.parallelism {
            opts = opts.with_parallelism(parallelism);
        }
        for target in &self.targets {
            opts = opts.with_target(target.as_str());
        }
        opts
    }
}

#[derive(Args)]
pub struct InitArgs {
    #[command(flatten)]
    pub spec: SpecArgs,
}

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub spec: SpecArgs,

    #[command(flatten)]
    pub tf: TfFlags,

    /// Return exit code 2 when the plan has changes
    #[arg(short = 'd', long)]
    pub detailed_exitcode: bool,

    /// Keep the plan in this file (relative to the stack directory)
    #[arg(short = 'P', long)]
    pub plan_file: Option<String>,
}

#[derive(Args)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub spec: SpecArgs,

    #[command(flatten)]
    pub tf: TfFlags,

    /// Skip interactive approval
    #[arg(long)]
    pub auto_approve: bool,
}

#[derive(Args)]
pub struct OutputArgs {
    #[command(flatten)]
    pub spec: SpecArgs,

    /// Single output to print
    #[arg(long)]
    pub name: Option<String>,

    /// Print outputs as JSON
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Disable color output
    #[arg(short = 'C', long)]
    pub no_color: bool,
}

#[derive(Args)]
pub struct ForceUnlockArgs {
    #[command(flatten)]
    pub spec: SpecArgs,

    /// Lock ID to release
    #[arg(long)]
    pub lock_id: String,

    /// Disable color output
    #[arg(short = 'C', long)]
    pub no_color: bool,
}

/// Regenerate the stack and run `terraform init` in it.
async fn prepare(spec: &SpecArgs) -> Result<(TerraformRunner, PathBuf)> {
    let (stack, summary) = stack::generate(spec)?;
    info!(
        "Generated {} stack {:?} (env={}) into {:?}",
        stack.kind,
        stack.name(),
        stack.env_key,
        summary.out_dir
    );
    let runner = TerraformRunner::local();
    runner.init(&summary.out_dir, false).await.context("terraform init failed")?;
    Ok((runner, summary.out_dir))
}

pub async fn init(args: InitArgs) -> Result<u8> {
    prepare(&args.spec).await?;
    Ok(ExitCodes::SUCCESS)
}

pub async fn plan(args: PlanArgs) -> Result<u8> {
    let (runner, dir) = prepare(&args.spec).await?;
    let request = PlanRequest {
        plan_file: args.plan_file.clone(),
        detailed_exitcode: args.detailed_exitcode,
    };
    let outcome = runner
        .plan(&dir, &args.tf.to_options(), &request)
        .await
        .context("terraform plan failed")?;

    if let Some(summary) = &outcome.summary {
        println!("{}", summary);
    }
    if outcome.has_changes == Some(true) {
        return Ok(ExitCodes::PLAN_CHANGES);
    }
    Ok(ExitCodes::SUCCESS)
}

pub async fn apply(args: ApplyArgs) -> Result<u8> {
    let (runner, dir) = prepare(&args.spec).await?;
    runner
        .apply(&dir, &args.tf.to_options(), args.auto_approve)
        .await
        .context("terraform apply failed")?;
    Ok(ExitCodes::SUCCESS)
}

pub async fn destroy(args: ApplyArgs) -> Result<u8> {
    let (runner, dir) = prepare(&args.spec).await?;
    runner
        .destroy(&dir, &args.tf.to_options(), args.auto_approve)
        .await
        .context("terraform destroy failed")?;
    Ok(ExitCodes::SUCCESS)
}

pub async fn output(args: OutputArgs) -> Result<u8> {
    let (runner, dir) = prepare(&args.spec).await?;
    let opts = TfExecOptions {
        no_color: args.no_color,
        ..Default::default()
    };
    runner
        .output(&dir, &opts, args.name.as_deref(), args.json)
        .await
        .context("terraform output failed")?;
    Ok(ExitCodes::SUCCESS)
}

pub async fn force_unlock(args: ForceUnlockArgs) -> Result<u8> {
    let lock_id = args.lock_id.trim();
    if lock_id.is_empty() {
        anyhow::bail!("invalid argument: --lock-id must not be empty");
    }
    let (runner, dir) = prepare(&args.spec).await?;
    let opts = TfExecOptions {
        no_color: args.no_color,
        ..Default::default()
    };
    runner
        .force_unlock(&dir, &opts, lock_id)
        .await
        .context("terraform force-unlock failed")?;
    Ok(ExitCodes::SUCCESS)
}
