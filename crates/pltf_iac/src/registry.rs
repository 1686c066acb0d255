//! Module metadata registry.
//!
//! Scans module roots for `module.yaml` descriptors. Roots are searched in
//! priority order (custom first, builtin last) and the first root that
//! defines a type wins.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use pltf_spec::{Module, ModuleMetadata, SpecError, SpecReader, MODULE_DESCRIPTOR};

use crate::error::{IacError, IacResult};

/// Where a module root came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    Custom,
    Builtin,
}

/// A directory whose immediate subdirectories are modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRoot {
    pub path: PathBuf,
    pub kind: RootKind,
}

impl ModuleRoot {
    pub fn custom(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: RootKind::Custom,
        }
    }

    pub fn builtin(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: RootKind::Builtin,
        }
    }
}

/// A module type resolved from a root.
#[derive(Debug, Clone)]
pub struct RegisteredModule {
    pub metadata: ModuleMetadata,
    /// Module source directory, copied into the generated stack.
    pub dir: PathBuf,
    pub root: PathBuf,
    pub kind: RootKind,
}

/// Index of module types to their contracts and source directories.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, RegisteredModule>,
    custom_root: Option<PathBuf>,
}

impl ModuleRegistry {
    /// Scan every root. Unparseable descriptors are skipped; descriptors that
    /// parse but break their own invariants are errors.
    pub fn scan(roots: &[ModuleRoot]) -> IacResult<Self> {
        if roots.is_empty() {
            return Err(IacError::NoModuleRoots);
        }

        let mut registry = Self::default();
        for root in roots {
            if !root.path.is_dir() {
                return Err(IacError::ModuleRootMissing(root.path.clone()));
            }
            if root.kind == RootKind::Custom && registry.custom_root.is_none() {
                registry.custom_root = Some(root.path.clone());
            }
            registry.scan_root(root)?;
        }

        debug!("Module registry holds {} types", registry.modules.len());
        Ok(registry)
    }

    /// Scan roots and check that every module instance resolves.
    pub fn load(roots: &[ModuleRoot], modules: &[Module]) -> IacResult<Self> {
        let registry = Self::scan(roots)?;
        for module in modules {
            registry.resolve(module)?;
        }
        Ok(registry)
    }

    fn scan_root(&mut self, root: &ModuleRoot) -> IacResult<()> {
        for entry in WalkDir::new(&root.path)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let dir = entry.path();
            let descriptor = dir.join(MODULE_DESCRIPTOR);
            if !dir.is_dir() || !descriptor.is_file() {
                continue;
            }

            let metadata = match SpecReader::load_module_metadata(&descriptor) {
                Ok(metadata) => metadata,
                Err(SpecError::InvalidMetadata(message)) => {
                    return Err(IacError::InvalidMetadata {
                        path: descriptor,
                        message,
                    });
                }
                Err(e) => {
                    warn!("Skipping module directory {:?}: {}", dir, e);
                    continue;
                }
            };

            if let Some(existing) = self.modules.get(&metadata.module_type) {
                debug!(
                    "Module type {} in {:?} shadowed by {:?}",
                    metadata.module_type, dir, existing.dir
                );
                continue;
            }

            debug!("Registered module type {} from {:?}", metadata.module_type, root.path);
            self.modules.insert(
                metadata.module_type.clone(),
                RegisteredModule {
                    metadata,
                    dir: dir.to_path_buf(),
                    root: root.path.clone(),
                    kind: root.kind,
                },
            );
        }
        Ok(())
    }

    /// Look up the registered type for a module instance, enforcing the
    /// `source: custom` rule.
    pub fn resolve(&self, module: &Module) -> IacResult<&RegisteredModule> {
        if module.is_custom() && self.custom_root.is_none() {
            return Err(IacError::CustomRootRequired {
                id: module.id.clone(),
            });
        }

        let registered = self
            .modules
            .get(&module.module_type)
            .ok_or_else(|| IacError::ModuleTypeNotFound {
                id: module.id.clone(),
                module_type: module.module_type.clone(),
            })?;

        if module.is_custom() && registered.kind != RootKind::Custom {
            return Err(IacError::CustomModuleNotInCustomRoot {
                id: module.id.clone(),
                module_type: module.module_type.clone(),
                root: self.custom_root.clone().unwrap_or_default(),
            });
        }

        Ok(registered)
    }

    pub fn get(&self, module_type: &str) -> Option<&RegisteredModule> {
        self.modules.get(module_type)
    }

    pub fn metadata(&self, module_type: &str) -> Option<&ModuleMetadata> {
        self.get(module_type).map(|m| &m.metadata)
    }

    /// Registered types in sorted order.
    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RegisteredModule)> {
        self.modules.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn custom_root(&self) -> Option<&Path> {
        self.custom_root.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_module(root: &Path, dir: &str, module_type: &str, version: &str) {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join(MODULE_DESCRIPTOR),
            format!(
                "name: {t}\ntype: {t}\nprovider: aws\nversion: {v}\noutputs:\n  - name: arn\n    type: string\n",
                t = module_type,
                v = version
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_first_root_wins() {
        let custom = tempdir().unwrap();
        let builtin = tempdir().unwrap();
        write_module(custom.path(), "sns", "aws_sns", "2.0.0");
        write_module(builtin.path(), "sns", "aws_sns", "1.0.0");
        write_module(builtin.path(), "sqs", "aws_sqs", "1.0.0");

        let registry = ModuleRegistry::scan(&[
            ModuleRoot::custom(custom.path()),
            ModuleRoot::builtin(builtin.path()),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        let sns = registry.get("aws_sns").unwrap();
        assert_eq!(sns.metadata.version, "2.0.0");
        assert_eq!(sns.kind, RootKind::Custom);
        assert_eq!(registry.get("aws_sqs").unwrap().kind, RootKind::Builtin);
    }

    #[test]
    fn test_missing_type() {
        let builtin = tempdir().unwrap();
        write_module(builtin.path(), "sns", "aws_sns", "1.0.0");
        let err = ModuleRegistry::load(
            &[ModuleRoot::builtin(builtin.path())],
            &[Module::new("queue", "aws_sqs")],
        )
        .unwrap_err();
        assert!(matches!(err, IacError::ModuleTypeNotFound { ref id, .. } if id == "queue"));
    }

    #[test]
    fn test_unparseable_descriptor_skipped() {
        let builtin = tempdir().unwrap();
        write_module(builtin.path(), "sns", "aws_sns", "1.0.0");
        let broken = builtin.path().join("broken");
        std::fs::create_dir_all(&broken).unwrap();
        std::fs::write(broken.join(MODULE_DESCRIPTOR), "inputs: {not: [a list").unwrap();

        let registry = ModuleRegistry::scan(&[ModuleRoot::builtin(builtin.path())]).unwrap();
        assert_eq!(registry.types().collect::<Vec<_>>(), vec!["aws_sns"]);
    }

    #[test]
    fn test_invalid_descriptor_is_error() {
        let builtin = tempdir().unwrap();
        let dir = builtin.path().join("bad");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(MODULE_DESCRIPTOR),
            "name: bad\ntype: bad\nprovider: aws\nversion: '1'\ninputs: [{name: a}, {name: a}]\n",
        )
        .unwrap();

        let err = ModuleRegistry::scan(&[ModuleRoot::builtin(builtin.path())]).unwrap_err();
        assert!(matches!(err, IacError::InvalidMetadata { .. }));
    }

    #[test]
    fn test_custom_source_rules() {
        let custom = tempdir().unwrap();
        let builtin = tempdir().unwrap();
        write_module(custom.path(), "mine", "acme_thing", "1.0.0");
        write_module(builtin.path(), "sns", "aws_sns", "1.0.0");

        let only_builtin = ModuleRegistry::scan(&[ModuleRoot::builtin(builtin.path())]).unwrap();
        let err = only_builtin
            .resolve(&Module::new("topic", "aws_sns").with_source("custom"))
            .unwrap_err();
        assert!(matches!(err, IacError::CustomRootRequired { .. }));

        let both = ModuleRegistry::scan(&[
            ModuleRoot::custom(custom.path()),
            ModuleRoot::builtin(builtin.path()),
        ])
        .unwrap();
        assert!(both
            .resolve(&Module::new("thing", "acme_thing").with_source("custom"))
            .is_ok());
        let err = both
            .resolve(&Module::new("topic", "aws_sns").with_source("custom"))
            .unwrap_err();
        assert!(matches!(err, IacError::CustomModuleNotInCustomRoot { .. }));
    }

    #[test]
    fn test_no_roots() {
        assert!(matches!(ModuleRegistry::scan(&[]), Err(IacError::NoModuleRoots)));
    }
}
