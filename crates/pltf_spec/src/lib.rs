//! # pltf_spec
//!
//! Typed models for pltf specs and module contracts.
//!
//! ## Features
//!
//! - `Environment` and `Service` spec models with strict YAML decoding
//! - Module contracts (`module.yaml`) with structural validation
//! - A closed [`Value`] type for loosely-typed module inputs
//! - Cross-document validation of module ids and links
//!
//! ## Example
//!
//! ```rust,no_run
//! use pltf_spec::{SpecKind, SpecReader};
//!
//! match SpecReader::detect_kind("service.yaml").unwrap() {
//!     SpecKind::Service => {
//!         let (svc, env) = SpecReader::load_service("service.yaml").unwrap();
//!         println!("{} on {}", svc.metadata.name, env.metadata.name);
//!     }
//!     SpecKind::Environment => {
//!         let env = SpecReader::load_environment("service.yaml").unwrap();
//!         println!("{}", env.metadata.name);
//!     }
//! }
//! ```

pub mod error;
pub mod models;
pub mod module;
pub mod reader;
pub mod validator;
pub mod value;

pub use error::{SpecError, SpecResult};
pub use models::{
    AccessLinks, Backend, EnvironmentConfig, EnvironmentEntry, EnvironmentMetadata, Module,
    SecretRef, ServiceConfig, ServiceEnvRefEntry, ServiceMetadata, SpecKind, CUSTOM_SOURCE,
};
pub use module::{
    Capabilities, InputSpec, ModuleMetadata, OutputSpec, MODULE_DESCRIPTOR, SECRET_CAPABILITY,
};
pub use reader::SpecReader;
pub use validator::{SpecValidator, ValidationResult};
pub use value::Value;
