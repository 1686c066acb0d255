//! Error types for stack generation and terraform execution.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type alias for IaC operations.
pub type IacResult<T> = Result<T, IacError>;

/// Errors that can occur while generating or running a stack.
#[derive(Error, Debug)]
pub enum IacError {
    #[error("environment {key:?} not found in spec; available: {available}")]
    UnknownEnvironment { key: String, available: String },

    #[error("environment {0:?} region is required")]
    MissingRegion(String),

    #[error("service {service:?} has no envRef entry for environment {key:?}")]
    UnknownServiceEnv { service: String, key: String },

    #[error("no modules root configured (set --modules or provide builtin modules)")]
    NoModuleRoots,

    #[error("modules root {0} does not exist or is not a directory")]
    ModuleRootMissing(PathBuf),

    #[error("module type {module_type:?} (id={id}) not found in module roots")]
    ModuleTypeNotFound { id: String, module_type: String },

    #[error("module {id:?} is marked source=custom but no custom modules root is configured")]
    CustomRootRequired { id: String },

    #[error("module type {module_type:?} (id={id}) is marked source=custom but not found in custom root {root}")]
    CustomModuleNotInCustomRoot {
        id: String,
        module_type: String,
        root: PathBuf,
    },

    #[error("invalid module metadata in {path}: {message}")]
    InvalidMetadata { path: PathBuf, message: String },

    #[error("duplicate module id {0:?} across environment and service")]
    DuplicateModuleId(String),

    #[error("module {id:?} links.{access} refers to unknown module {target:?}")]
    UnknownLinkTarget {
        id: String,
        access: String,
        target: String,
    },

    #[error("module {id:?} (type={module_type}) missing required input {input:?}")]
    MissingInput {
        id: String,
        module_type: String,
        input: String,
    },

    #[error("module {id:?} input {input:?} can be satisfied by multiple {scope}modules: {candidates:?}. Please specify which to use in your YAML.")]
    AmbiguousInput {
        id: String,
        input: String,
        scope: String,
        candidates: Vec<String>,
    },

    #[error("module dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("refusing to operate on unsafe output directory {0:?}")]
    UnsafeOutputDir(String),

    #[error("unsupported provider {0:?}")]
    UnsupportedProvider(String),

    #[error("unsupported backend type {0:?}")]
    UnsupportedBackend(String),

    #[error("kubernetes or helm provider requested but no cluster module found")]
    MissingCluster,

    #[error("invalid --var {0:?}, expected key=value")]
    InvalidVarOverride(String),

    #[error("module {id:?} input {input:?}: {source}")]
    FileInput {
        id: String,
        input: String,
        #[source]
        source: Box<IacError>,
    },

    #[error("{0:?} is not a valid HCL identifier")]
    InvalidIdentifier(String),

    #[error("variable {0:?} is not a valid HCL identifier and cannot be emitted as a local")]
    InvalidVariableName(String),

    #[error("file input {rel:?} collides with {other}")]
    FileInputCollision { rel: String, other: String },

    #[error("failed to render HCL: {0}")]
    Hcl(#[from] hcl::Error),

    #[error("terraform {action} failed with exit code {code}")]
    TerraformFailed { action: String, code: i32 },

    #[error("terraform {action} timed out after {seconds}s")]
    TerraformTimeout { action: String, seconds: u64 },

    #[error("Terraform not available: {0}")]
    TerraformNotAvailable(String),

    #[error("invalid terraform JSON output: {0}")]
    TerraformJson(#[from] serde_json::Error),

    #[error(transparent)]
    Spec(#[from] pltf_spec::SpecError),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl IacError {
    /// Wrap an I/O error with the path involved.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        IacError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
