//! Spec file reading utilities.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::error::{SpecError, SpecResult};
use crate::models::{EnvironmentConfig, ServiceConfig, SpecKind};
use crate::module::ModuleMetadata;
use crate::validator::{SpecValidator, ValidationResult};

/// Reader for spec documents and module descriptors.
pub struct SpecReader;

impl SpecReader {
    /// Peek at the `kind` field of a spec file.
    pub fn detect_kind(path: impl AsRef<Path>) -> SpecResult<SpecKind> {
        #[derive(Deserialize)]
        struct KindProbe {
            #[serde(default)]
            kind: String,
        }

        let path = path.as_ref();
        let content = read_to_string(path)?;
        let probe: KindProbe = serde_yaml::from_str(&content).map_err(|e| SpecError::InvalidFormat {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        match probe.kind.as_str() {
            "Environment" => Ok(SpecKind::Environment),
            "Service" => Ok(SpecKind::Service),
            other => Err(SpecError::UnknownKind {
                path: path.to_path_buf(),
                kind: other.to_string(),
            }),
        }
    }

    /// Read and strictly decode an Environment spec without validating it.
    pub fn read_environment(path: impl AsRef<Path>) -> SpecResult<EnvironmentConfig> {
        decode_strict(path.as_ref())
    }

    /// Read and strictly decode a Service spec without validating it.
    pub fn read_service(path: impl AsRef<Path>) -> SpecResult<ServiceConfig> {
        decode_strict(path.as_ref())
    }

    /// Load and validate an Environment spec.
    pub fn load_environment(path: impl AsRef<Path>) -> SpecResult<EnvironmentConfig> {
        let path = path.as_ref();
        let env = Self::read_environment(path)?;
        into_result(path, SpecValidator::validate_environment(&env))?;
        debug!("Loaded environment {:?} from {:?}", env.metadata.name, path);
        Ok(env)
    }

    /// Load a Service spec together with the Environment it references,
    /// validating both.
    pub fn load_service(path: impl AsRef<Path>) -> SpecResult<(ServiceConfig, EnvironmentConfig)> {
        let path = path.as_ref();
        let svc = Self::read_service(path)?;
        if svc.metadata.env_file.trim().is_empty() {
            return Err(SpecError::ValidationFailed(format!(
                "{}: metadata.ref (path to environment) is required",
                path.display()
            )));
        }

        let env_path = Self::environment_path(path, &svc);
        let env = Self::load_environment(&env_path)?;
        into_result(path, SpecValidator::validate_service(&svc, Some(&env)))?;
        debug!(
            "Loaded service {:?} from {:?} (environment {:?})",
            svc.metadata.name, path, env_path
        );
        Ok((svc, env))
    }

    /// Resolve a service's `metadata.ref` relative to the service file.
    pub fn environment_path(service_path: &Path, svc: &ServiceConfig) -> PathBuf {
        let reference = Path::new(svc.metadata.env_file.trim());
        if reference.is_absolute() {
            return reference.to_path_buf();
        }
        service_path
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(reference)
    }

    /// Load a module descriptor and check its invariants.
    pub fn load_module_metadata(path: impl AsRef<Path>) -> SpecResult<ModuleMetadata> {
        let path = path.as_ref();
        let content = read_to_string(path)?;
        let mut meta: ModuleMetadata =
            serde_yaml::from_str(&content).map_err(|e| SpecError::InvalidFormat {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        meta.validate()?;
        Ok(meta)
    }
}

fn read_to_string(path: &Path) -> SpecResult<String> {
    if !path.exists() {
        return Err(SpecError::NotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Decode a single YAML document, rejecting unknown fields.
fn decode_strict<T: DeserializeOwned>(path: &Path) -> SpecResult<T> {
    let content = read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| SpecError::InvalidFormat {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn into_result(path: &Path, result: ValidationResult) -> SpecResult<()> {
    if result.valid {
        return Ok(());
    }
    Err(SpecError::ValidationFailed(format!(
        "{}: {}",
        path.display(),
        result.errors.join("; ")
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const ENV: &str = r#"
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
    dev: {}
modules:
  - id: queue
    type: aws_sqs
"#;

    #[test]
    fn test_detect_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, ENV).unwrap();
        assert_eq!(SpecReader::detect_kind(&path).unwrap(), SpecKind::Environment);

        std::fs::write(&path, "kind: Pipeline\n").unwrap();
        assert!(matches!(
            SpecReader::detect_kind(&path),
            Err(SpecError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = SpecReader::load_environment("/nonexistent/env.yaml");
        assert!(matches!(result, Err(SpecError::NotFound(_))));
    }

    #[test]
    fn test_load_service_resolves_ref() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("env")).unwrap();
        std::fs::create_dir_all(dir.path().join("svc")).unwrap();
        std::fs::write(dir.path().join("env/env.yaml"), ENV).unwrap();
        let svc_path = dir.path().join("svc/service.yaml");
        std::fs::write(&svc_path, SERVICE).unwrap();

        let (svc, env) = SpecReader::load_service(&svc_path).unwrap();
        assert_eq!(svc.metadata.name, "payments");
        assert_eq!(env.metadata.name, "example");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, format!("{}\nextra: true\n", ENV)).unwrap();
        assert!(matches!(
            SpecReader::load_environment(&path),
            Err(SpecError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_multiple_documents_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, format!("{}\n---\n{}", ENV, ENV)).unwrap();
        assert!(SpecReader::load_environment(&path).is_err());
    }

    #[test]
    fn test_validation_failure_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.yaml");
        std::fs::write(&path, ENV.replace("org: acme", "org: \"\"")).unwrap();
        let err = SpecReader::load_environment(&path).unwrap_err();
        assert!(err.to_string().contains("metadata.org is required"));
    }
}
