//! Lint command - Advisory checks for an Environment or Service spec.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use pltf_iac::{LintFinding, Linter, ModuleRegistry};
use pltf_spec::{SpecError, SpecKind, SpecReader};

use crate::profile::profile;
use crate::stack::{module_roots, select_env_key};
use crate::ExitCodes;

#[derive(Args)]
pub struct LintArgs {
    /// Path to the Environment or Service YAML file
    #[arg(short, long, default_value = "env.yaml")]
    pub file: PathBuf,

    /// Environment key to lint (dev, prod, ...)
    #[arg(short, long, env = "PLTF_DEFAULT_ENV")]
    pub env: Option<String>,

    /// Custom modules root, searched before the builtin modules
    #[arg(short, long, env = "PLTF_MODULES_ROOT")]
    pub modules: Option<PathBuf>,

    /// Exit with the validation failure code when anything is reported
    #[arg(long)]
    pub strict: bool,
}

pub async fn execute(args: LintArgs) -> Result<u8> {
    let file = &args.file;
    if !file.is_file() {
        return Err(SpecError::NotFound(file.clone()).into());
    }
    info!("Linting spec: {:?}", file);

    let kind = SpecReader::detect_kind(file)?;
    let (env, service) = match kind {
        SpecKind::Environment => (SpecReader::read_environment(file)?, None),
        SpecKind::Service => {
            let svc = SpecReader::read_service(file)?;
            let env = SpecReader::read_environment(SpecReader::environment_path(file, &svc))?;
            (env, Some(svc))
        }
    };

    let profile_env = profile().and_then(|p| p.default_env());
    let env_key = select_env_key(args.env.as_deref(), profile_env, &env, service.as_ref())?;

    let roots = module_roots(args.modules.as_deref());
    let registry = if roots.is_empty() {
        None
    } else {
        match ModuleRegistry::scan(&roots) {
            Ok(registry) => Some(registry),
            Err(e) => {
                warn!("Skipping module contract checks: {}", e);
                None
            }
        }
    };

    let mut linter = Linter::new(&env, service.as_ref(), &env_key);
    if let Some(registry) = &registry {
        linter = linter.with_registry(registry);
    }
    let findings = linter.run();
    print!("{}", report(kind, &env_key, &findings));

    if args.strict && !findings.is_empty() {
        return Ok(ExitCodes::VALIDATION_FAILURE);
    }
    Ok(ExitCodes::SUCCESS)
}

fn report(kind: SpecKind, env_key: &str, findings: &[LintFinding]) -> String {
    let mut out = format!("{} lint for env {}:\n", kind, env_key);
    if findings.is_empty() {
        out.push_str("  No lint issues found.\n");
    }
    for finding in findings {
        out.push_str(&format!("  - [{}] {}\n", finding.rule, finding.message));
    }
    out
}
