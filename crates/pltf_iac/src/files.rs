//! Local files pulled into a generated stack: file-path inputs and module
//! source trees.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use pltf_spec::Value;

use crate::error::{IacError, IacResult};

const SKIPPED_DIRS: &[&str] = &[".git", ".terraform"];
const SKIPPED_SUFFIXES: &[&str] = &[".tfstate", ".tfstate.backup"];

/// A file-path input copied into the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCopy {
    /// Forward-slash path relative to the output directory.
    pub rel: String,
    pub source: PathBuf,
    pub bytes: Vec<u8>,
}

/// Rewrites input strings that name existing local files into paths
/// relative to the generated stack, collecting the file contents.
#[derive(Debug, Default)]
pub struct FileMaterializer {
    spec_dir: Option<PathBuf>,
    copies: BTreeMap<String, FileCopy>,
}

impl FileMaterializer {
    /// Relative paths resolve against `spec_dir`; without one only
    /// absolute paths are considered.
    pub fn new(spec_dir: Option<&Path>) -> Self {
        Self {
            spec_dir: spec_dir.map(Path::to_path_buf),
            copies: BTreeMap::new(),
        }
    }

    /// Rewrite every file-path string in the value tree.
    pub fn materialize(&mut self, value: &Value) -> IacResult<Value> {
        Ok(match value {
            Value::String(s) => match self.materialize_str(s)? {
                Some(rel) => Value::String(rel),
                None => value.clone(),
            },
            Value::List(items) => Value::List(
                items
                    .iter()
                    .map(|v| self.materialize(v))
                    .collect::<IacResult<_>>()?,
            ),
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.materialize(v)?)))
                    .collect::<IacResult<_>>()?,
            ),
            other => other.clone(),
        })
    }

    /// The stack-relative path for `raw` when it names an existing file.
    fn materialize_str(&mut self, raw: &str) -> IacResult<Option<String>> {
        let trimmed = raw.trim();
        if !looks_like_path(trimmed) {
            return Ok(None);
        }

        let candidate = Path::new(trimmed);
        let source = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            match &self.spec_dir {
                Some(dir) => dir.join(candidate),
                None => return Ok(None),
            }
        };
        if !source.is_file() {
            return Ok(None);
        }

        let rel = self.relative_path(&source);
        if let Some(existing) = self.copies.get(&rel) {
            if lexical_clean(&existing.source) != lexical_clean(&source) {
                return Err(IacError::FileInputCollision {
                    rel,
                    other: format!("file input {}", existing.source.display()),
                });
            }
        } else {
            let bytes = fs::read(&source).map_err(|e| IacError::io(&source, e))?;
            debug!("Materializing file input {:?} as {}", source, rel);
            self.copies.insert(
                rel.clone(),
                FileCopy {
                    rel: rel.clone(),
                    source,
                    bytes,
                },
            );
        }
        Ok(Some(rel))
    }

    /// Path under the spec directory, or the bare file name when the file
    /// lives outside it.
    fn relative_path(&self, source: &Path) -> String {
        let cleaned = lexical_clean(source);
        let relative = self
            .spec_dir
            .as_ref()
            .and_then(|dir| cleaned.strip_prefix(lexical_clean(dir)).ok().map(Path::to_path_buf));

        match relative {
            Some(rel) if !rel.as_os_str().is_empty() => to_slash(&rel),
            _ => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    pub fn copies(&self) -> impl Iterator<Item = &FileCopy> {
        self.copies.values()
    }

    pub fn into_copies(self) -> Vec<FileCopy> {
        self.copies.into_values().collect()
    }
}

/// Strings that can never be local paths: references, templates, URLs.
fn looks_like_path(s: &str) -> bool {
    if s.is_empty() || s.contains("${") || s.contains("{{") || s.contains("://") {
        return false;
    }
    !["module.", "parent.", "var."].iter().any(|p| s.starts_with(p))
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn lexical_clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(out.components().next_back(), Some(Component::Normal(_)))
                    && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write collected file inputs below `out_dir`.
pub fn write_file_copies(out_dir: &Path, copies: &[FileCopy]) -> IacResult<()> {
    for copy in copies {
        let dest = out_dir.join(&copy.rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| IacError::io(parent, e))?;
        }
        fs::write(&dest, &copy.bytes).map_err(|e| IacError::io(&dest, e))?;
    }
    Ok(())
}

fn is_skipped(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir() {
        SKIPPED_DIRS.contains(&name.as_ref())
    } else {
        SKIPPED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
    }
}

/// Copy a module source tree, leaving out VCS metadata, provider caches and
/// state files. Returns the number of files copied.
pub fn copy_module_tree(src: &Path, dst: &Path) -> IacResult<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e))
    {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            IacError::io(path, e.into())
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| IacError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| IacError::io(entry.path(), e))?;
            copied += 1;
        }
    }
    debug!("Copied {} files from {:?} to {:?}", copied, src, dst);
    Ok(copied)
}
