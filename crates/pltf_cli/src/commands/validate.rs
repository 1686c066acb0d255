//! Validate command - Validate an Environment or Service spec.

use anyhow::Result;
use clap::Args;
use tracing::info;

use pltf_iac::StackGenerator;
use pltf_spec::{SpecError, SpecKind, SpecReader, SpecValidator};

use crate::profile::profile;
use crate::stack::{select_env_key, spec_dir, SpecArgs, Stack};
use crate::ExitCodes;

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub spec: SpecArgs,

    /// Also resolve modules and render the stack in memory
    #[arg(long)]
    pub render: bool,
}

pub async fn execute(args: ValidateArgs) -> Result<u8> {
    let file = &args.spec.file;
    if !file.is_file() {
        return Err(SpecError::NotFound(file.clone()).into());
    }
    info!("Validating spec: {:?}", file);

    let kind = SpecReader::detect_kind(file)?;
    let (env, service) = match kind {
        SpecKind::Environment => (SpecReader::read_environment(file)?, None),
        SpecKind::Service => {
            let svc = SpecReader::read_service(file)?;
            let env = SpecReader::read_environment(SpecReader::environment_path(file, &svc))?;
            (env, Some(svc))
        }
    };

    let mut result = SpecValidator::validate_environment(&env);
    if let Some(svc) = &service {
        result.merge(SpecValidator::validate_service(svc, Some(&env)));
    }

    for warning in &result.warnings {
        println!("   ⚠️  {}", warning);
    }
    if !result.valid {
        println!("❌ {:?} is invalid:", file);
        for error in &result.errors {
            println!("   - {}", error);
        }
        return Ok(ExitCodes::VALIDATION_FAILURE);
    }

    // A requested key must exist; without one any key set is acceptable
    // unless the stack is rendered.
    let requested = args
        .spec
        .env
        .as_deref()
        .or_else(|| profile().and_then(|p| p.default_env()));
    let env_key = if requested.is_some() || args.render {
        Some(select_env_key(requested, None, &env, service.as_ref())?)
    } else {
        None
    };

    match &service {
        Some(svc) => println!(
            "✅ Service {:?} is valid and uses Environment {:?} (provider={})",
            svc.metadata.name, env.metadata.name, env.metadata.provider
        ),
        None => println!(
            "✅ Environment {:?} is valid (provider={}, org={})",
            env.metadata.name, env.metadata.provider, env.metadata.org
        ),
    }

    if let Some(env_key) = env_key {
        let stack = Stack {
            kind,
            env,
            service,
            env_key,
            spec_dir: spec_dir(file)?,
        };
        if args.render {
            let options = stack.generator_options(&args.spec)?;
            let plan = StackGenerator::new(&stack.env, stack.service.as_ref(), options).plan()?;
            println!(
                "✅ Stack renders {} files and {} modules for env={}",
                plan.files.len(),
                plan.module_ids.len(),
                stack.env_key
            );
        } else {
            println!("   environment {:?} is defined", stack.env_key);
        }
    }

    Ok(ExitCodes::SUCCESS)
}
