//! Spec loading and stack resolution shared by the commands.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{debug, info};

use pltf_iac::{parse_var_flags, GenerateSummary, GeneratorOptions, IacError, ModuleRoot, StackGenerator};
use pltf_spec::{EnvironmentConfig, Module, ServiceConfig, SpecError, SpecKind, SpecReader};

use crate::profile::profile;

/// Environment variable pointing at the builtin module root.
pub const BUILTIN_MODULES_ENV: &str = "PLTF_BUILTIN_MODULES";

/// Base directory for generated stacks when neither `--out` nor the profile
/// says otherwise.
pub const DEFAULT_OUT_BASE: &str = ".pltf";

/// Spec selection flags shared by every stack command.
#[derive(Args, Debug, Clone)]
pub struct SpecArgs {
    /// Path to the Environment or Service YAML file
    #[arg(short, long, default_value = "env.yaml")]
    pub file: PathBuf,

    /// Environment key (dev, prod, ...)
    #[arg(short, long, env = "PLTF_DEFAULT_ENV")]
    pub env: Option<String>,

    /// Custom modules root, searched before the builtin modules
    #[arg(short, long, env = "PLTF_MODULES_ROOT")]
    pub modules: Option<PathBuf>,

    /// Output directory for the generated stack
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Variable override (key=value), repeatable
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,
}

/// A loaded spec with its environment key resolved.
#[derive(Debug, Clone)]
pub struct Stack {
    pub kind: SpecKind,
    pub env: EnvironmentConfig,
    pub service: Option<ServiceConfig>,
    pub env_key: String,
    /// Directory relative file inputs resolve against.
    pub spec_dir: PathBuf,
}

impl Stack {
    /// Detect the spec kind, load and validate it, then pick the
    /// environment key.
    pub fn load(file: &Path, requested_env: Option<&str>) -> Result<Self> {
        if !file.is_file() {
            return Err(SpecError::NotFound(file.to_path_buf()).into());
        }
        let kind = SpecReader::detect_kind(file)?;
        let (env, service) = match kind {
            SpecKind::Environment => (SpecReader::load_environment(file)?, None),
            SpecKind::Service => {
                let (svc, env) = SpecReader::load_service(file)?;
                (env, Some(svc))
            }
        };

        let profile_env = profile().and_then(|p| p.default_env());
        let env_key = select_env_key(requested_env, profile_env, &env, service.as_ref())?;
        debug!("Selected environment {:?} for {:?}", env_key, file);

        Ok(Self {
            kind,
            env,
            service,
            env_key,
            spec_dir: spec_dir(file)?,
        })
    }

    /// Service name for service stacks, environment name otherwise.
    pub fn name(&self) -> &str {
        match &self.service {
            Some(svc) => &svc.metadata.name,
            None => &self.env.metadata.name,
        }
    }

    /// Environment modules followed by the service's own modules.
    pub fn modules(&self) -> Vec<Module> {
        let mut modules = self.env.modules.clone();
        if let Some(svc) = &self.service {
            modules.extend(svc.modules.iter().cloned());
        }
        modules
    }

    /// `<base>/<envName>/env/<key>` or `<base>/<envName>/<service>/env/<key>`.
    pub fn default_out_dir(&self, base: &Path) -> PathBuf {
        let mut dir = base.join(&self.env.metadata.name);
        if let Some(svc) = &self.service {
            dir.push(&svc.metadata.name);
        }
        dir.join("env").join(&self.env_key)
    }

    /// Output directory: the flag, else the default layout under the
    /// profile's `default_out` or `.pltf`.
    pub fn out_dir(&self, requested: Option<&Path>) -> PathBuf {
        match requested {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => {
                let base = profile()
                    .and_then(|p| p.default_out())
                    .unwrap_or(DEFAULT_OUT_BASE);
                self.default_out_dir(Path::new(base))
            }
        }
    }

    pub fn generator_options(&self, args: &SpecArgs) -> Result<GeneratorOptions> {
        let vars = parse_var_flags(&args.vars)?;
        Ok(GeneratorOptions::new(&self.env_key, self.out_dir(args.out.as_deref()))
            .with_spec_dir(&self.spec_dir)
            .with_roots(module_roots(args.modules.as_deref()))
            .with_vars(vars))
    }

    /// Render the stack and write it to its output directory.
    pub fn generate(&self, args: &SpecArgs) -> Result<GenerateSummary> {
        let options = self.generator_options(args)?;
        info!("Generating {} stack {:?} (env={})", self.kind, self.name(), self.env_key);
        let summary = StackGenerator::new(&self.env, self.service.as_ref(), options)
            .generate()
            .with_context(|| format!("Failed to generate stack for {:?}", self.name()))?;
        Ok(summary)
    }
}

/// Parent directory of the absolute spec path.
pub fn spec_dir(file: &Path) -> Result<PathBuf> {
    let absolute = if file.is_absolute() {
        file.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to resolve the current directory")?
            .join(file)
    };
    Ok(absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".")))
}

/// Load the spec named by `args` and generate its stack.
pub fn generate(args: &SpecArgs) -> Result<(Stack, GenerateSummary)> {
    let stack = Stack::load(&args.file, args.env.as_deref())?;
    let summary = stack.generate(args)?;
    Ok((stack, summary))
}

/// Pick the environment key: requested, then the profile default, then the
/// only available key.
pub fn select_env_key(
    requested: Option<&str>,
    profile_default: Option<&str>,
    env: &EnvironmentConfig,
    service: Option<&ServiceConfig>,
) -> Result<String> {
    let candidate = requested
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .or(profile_default);

    if let Some(key) = candidate {
        if !env.environments.contains_key(key) {
            return Err(IacError::UnknownEnvironment {
                key: key.to_string(),
                available: join_keys(env.environments.keys()),
            }
            .into());
        }
        if let Some(svc) = service {
            if !svc.metadata.env_ref.contains_key(key) {
                return Err(IacError::UnknownServiceEnv {
                    service: svc.metadata.name.clone(),
                    key: key.to_string(),
                }
                .into());
            }
        }
        return Ok(key.to_string());
    }

    let available: Vec<&String> = match service {
        Some(svc) => svc.metadata.env_ref.keys().collect(),
        None => env.environments.keys().collect(),
    };
    match available.as_slice() {
        [only] => Ok(only.to_string()),
        _ => bail!(
            "environment key is required (set --env or PLTF_DEFAULT_ENV); available: {}",
            join_keys(available.into_iter())
        ),
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a String>) -> String {
    keys.map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Custom root (flag, else profile) followed by the builtin root.
pub fn module_roots(custom: Option<&Path>) -> Vec<ModuleRoot> {
    let custom = custom
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .or_else(|| profile().and_then(|p| p.modules_root()).map(PathBuf::from));

    let mut roots = Vec::new();
    if let Some(path) = custom {
        roots.push(ModuleRoot::custom(path));
    }
    if let Some(path) = builtin_root() {
        roots.push(ModuleRoot::builtin(path));
    }
    roots
}

/// `$PLTF_BUILTIN_MODULES`, else a `modules/` directory beside the
/// executable when one exists.
fn builtin_root() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(BUILTIN_MODULES_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path.trim()));
        }
    }
    let exe = std::env::current_exe().ok()?;
    let candidate = exe.parent()?.join("modules");
    candidate.is_dir().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const ENVIRONMENT: &str = r#"
apiVersion: platform.io/v1
kind: Environment
metadata:
  name: example
  org: acme
  provider: aws
environments:
  dev:
    account: "111111111111"
    region: us-east-1
  prod:
    account: "222222222222"
    region: eu-west-1
modules:
  - id: base
    type: aws_base
"#;

    const SERVICE: &str = r#"
apiVersion: platform.io/v1
kind: Service
metadata:
  name: payments
  ref: ../env/env.yaml
  envRef:
    prod: {}
modules:
  - id: queue
    type: aws_sqs
"#;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_select_env_key_precedence() {
        let temp = tempdir().unwrap();
        let env = SpecReader::load_environment(write(temp.path(), "env.yaml", ENVIRONMENT)).unwrap();

        assert_eq!(select_env_key(Some(" prod "), Some("dev"), &env, None).unwrap(), "prod");
        assert_eq!(select_env_key(None, Some("dev"), &env, None).unwrap(), "dev");
        assert_eq!(select_env_key(Some(""), Some("dev"), &env, None).unwrap(), "dev");

        let err = select_env_key(None, None, &env, None).unwrap_err();
        assert!(err.to_string().contains("available: dev, prod"));

        let err = select_env_key(Some("qa"), None, &env, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IacError>(),
            Some(IacError::UnknownEnvironment { .. })
        ));
    }

    #[test]
    fn test_select_env_key_for_service() {
        let temp = tempdir().unwrap();
        write(temp.path(), "env/env.yaml", ENVIRONMENT);
        let svc_path = write(temp.path(), "svc/service.yaml", SERVICE);
        let (svc, env) = SpecReader::load_service(&svc_path).unwrap();

        assert_eq!(select_env_key(None, None, &env, Some(&svc)).unwrap(), "prod");
        let err = select_env_key(Some("dev"), None, &env, Some(&svc)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IacError>(),
            Some(IacError::UnknownServiceEnv { .. })
        ));
    }

    #[test]
    fn test_default_out_dir_layout() {
        let temp = tempdir().unwrap();
        write(temp.path(), "env/env.yaml", ENVIRONMENT);
        let svc_path = write(temp.path(), "svc/service.yaml", SERVICE);

        let stack = Stack::load(&svc_path, None).unwrap();
        assert_eq!(stack.kind, SpecKind::Service);
        assert_eq!(stack.name(), "payments");
        assert_eq!(
            stack.default_out_dir(Path::new(".pltf")),
            PathBuf::from(".pltf/example/payments/env/prod")
        );
        assert!(stack.spec_dir.ends_with("svc"));
        assert_eq!(
            stack.modules().iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["base", "queue"]
        );

        let env_stack = Stack::load(&temp.path().join("env/env.yaml"), Some("dev")).unwrap();
        assert_eq!(
            env_stack.default_out_dir(Path::new(".pltf")),
            PathBuf::from(".pltf/example/env/dev")
        );
        assert_eq!(
            env_stack.out_dir(Some(Path::new("custom/out"))),
            PathBuf::from("custom/out")
        );
    }

    #[test]
    fn test_missing_spec_file() {
        let temp = tempdir().unwrap();
        let err = Stack::load(&temp.path().join("absent.yaml"), None).unwrap_err();
        assert!(matches!(err.downcast_ref::<SpecError>(), Some(SpecError::NotFound(_))));
    }
}
