//! pltf CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments
//! - 3: Validation failure
//! - 5: IaC error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;
mod profile;
mod stack;

use commands::module::ModuleAction;
use commands::{Cli, Commands, TerraformAction};
use pltf_iac::IacError;
use pltf_spec::SpecError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    /// `terraform plan --detailed-exitcode` found changes.
    pub const PLAN_CHANGES: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const IAC_ERROR: u8 = 5;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose, cli.quiet) {
        eprintln!("warning: logging disabled: {}", e);
    }

    let result = match cli.command {
        Commands::Generate(args) => commands::generate::execute(args).await,
        Commands::Validate(args) => commands::validate::execute(args).await,
        Commands::Lint(args) => commands::lint::execute(args).await,
        Commands::Graph(args) => commands::graph::execute(args).await,
        Commands::Module(action) => match action {
            ModuleAction::List(args) => commands::module::list(args).await,
            ModuleAction::Get(args) => commands::module::get(args).await,
        },
        Commands::Terraform(action) => match action {
            TerraformAction::Init(args) => commands::terraform::init(args).await,
            TerraformAction::Plan(args) => commands::terraform::plan(args).await,
            TerraformAction::Apply(args) => commands::terraform::apply(args).await,
            TerraformAction::Destroy(args) => commands::terraform::destroy(args).await,
            TerraformAction::Output(args) => commands::terraform::output(args).await,
            TerraformAction::ForceUnlock(args) => commands::terraform::force_unlock(args).await,
        },
        Commands::Version(args) => commands::version::execute(args).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Install the stderr subscriber. Fails when a global subscriber is
/// already set.
fn init_logging(verbose: bool, quiet: bool) -> Result<(), TryInitError> {
    let default_level = if verbose {
        "pltf=debug"
    } else if quiet {
        "pltf=warn"
    } else {
        "pltf=info"
    };
    let mut filter = EnvFilter::from_default_env();
    for directive in [default_level, "warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init()
}

/// Map an error chain to an exit code.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if let Some(err) = cause.downcast_ref::<IacError>() {
            return match err {
                IacError::TerraformFailed { .. }
                | IacError::TerraformTimeout { .. }
                | IacError::TerraformNotAvailable(_) => ExitCodes::IAC_ERROR,
                IacError::InvalidVarOverride(_)
                | IacError::UnknownEnvironment { .. }
                | IacError::UnknownServiceEnv { .. }
                | IacError::UnsafeOutputDir(_) => ExitCodes::INVALID_ARGS,
                IacError::Spec(_)
                | IacError::InvalidVariableName(_)
                | IacError::FileInputCollision { .. } => ExitCodes::VALIDATION_FAILURE,
                IacError::FileInput { source, .. } if matches!(**source, IacError::FileInputCollision { .. }) => {
                    ExitCodes::VALIDATION_FAILURE
                }
                IacError::Io { .. } => ExitCodes::GENERAL_ERROR,
                _ => ExitCodes::IAC_ERROR,
            };
        }
        if let Some(err) = cause.downcast_ref::<SpecError>() {
            return match err {
                SpecError::NotFound(_) => ExitCodes::INVALID_ARGS,
                SpecError::Io { .. } => ExitCodes::GENERAL_ERROR,
                _ => ExitCodes::VALIDATION_FAILURE,
            };
        }
    }

    let msg = e.to_string().to_lowercase();
    if msg.contains("validation") {
        ExitCodes::VALIDATION_FAILURE
    } else if msg.contains("terraform") {
        ExitCodes::IAC_ERROR
    } else if msg.contains("argument") || msg.contains("environment key") {
        ExitCodes::INVALID_ARGS
    } else {
        ExitCodes::GENERAL_ERROR
    }
}
