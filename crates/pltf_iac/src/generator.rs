//! Stack generation: turns an Environment (and optionally a Service) spec
//! into a self-contained Terraform root module.
//!
//! Generation runs in two phases. [`StackGenerator::plan`] resolves and
//! renders everything in memory and fails before the output directory is
//! touched; [`StackPlan::write`] then clears and repopulates the directory.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use hcl::expr::Expression;
use hcl::{Block, Body};
use tracing::{debug, info, warn};

use pltf_spec::{EnvironmentConfig, EnvironmentEntry, InputSpec, Module, ServiceConfig, ServiceEnvRefEntry, Value};

use crate::augment::{AugmentContext, AugmentEngine};
use crate::backend::{env_state_key, service_state_key, BackendConfig};
use crate::error::{IacError, IacResult};
use crate::expr::{
    parse_override_value, referenced_module_ids, remote_state_output, ExprCompiler, Placeholders, Reference,
};
use crate::files::{copy_module_tree, lexical_clean, write_file_copies, FileCopy, FileMaterializer};
use crate::graph::find_cycle;
use crate::hclgen::{attr, is_identifier, render, string, traversal};
use crate::outputs::{plan_outputs, render_outputs, ParentOutputs};
use crate::provider::CloudProvider;
use crate::registry::{ModuleRegistry, ModuleRoot};
use crate::scaffold::{providers_tf, secrets_tf, state_tf, versions_tf, ClusterKind, ClusterRef, ProviderNeeds};

/// Directory inside the stack holding copied module sources.
pub const MODULES_DIR: &str = "modules";

/// Options for one generation run.
#[derive(Debug, Clone, Default)]
pub struct GeneratorOptions {
    /// Environment key (`dev`, `prod`, ...).
    pub env_key: String,
    pub out_dir: PathBuf,
    /// Directory relative file inputs resolve against.
    pub spec_dir: Option<PathBuf>,
    /// Module roots in priority order.
    pub roots: Vec<ModuleRoot>,
    /// Raw `--var` overrides.
    pub vars: BTreeMap<String, String>,
}

impl GeneratorOptions {
    pub fn new(env_key: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            env_key: env_key.into(),
            out_dir: out_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_spec_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spec_dir = Some(dir.into());
        self
    }

    pub fn with_root(mut self, root: ModuleRoot) -> Self {
        self.roots.push(root);
        self
    }

    pub fn with_roots(mut self, roots: impl IntoIterator<Item = ModuleRoot>) -> Self {
        self.roots.extend(roots);
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars.extend(vars);
        self
    }
}

/// Rendered stack, ready to be written.
#[derive(Debug, Clone)]
pub struct StackPlan {
    pub out_dir: PathBuf,
    /// File contents keyed by name relative to `out_dir`.
    pub files: BTreeMap<String, String>,
    pub file_copies: Vec<FileCopy>,
    /// Module source directory per used module type.
    pub module_dirs: BTreeMap<String, PathBuf>,
    /// Emitted module ids in declaration order.
    pub module_ids: Vec<String>,
}

/// What a write produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateSummary {
    pub out_dir: PathBuf,
    pub files_written: usize,
    pub file_inputs: usize,
    pub module_types: Vec<String>,
}

impl StackPlan {
    pub fn file(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(String::as_str)
    }

    /// Clear the output directory and write the stack into it.
    pub fn write(&self) -> IacResult<GenerateSummary> {
        assert_safe_out_dir(&self.out_dir)?;

        if self.out_dir.exists() {
            debug!("Clearing output directory {:?}", self.out_dir);
            fs::remove_dir_all(&self.out_dir).map_err(|e| IacError::io(&self.out_dir, e))?;
        }
        fs::create_dir_all(&self.out_dir).map_err(|e| IacError::io(&self.out_dir, e))?;

        for (name, content) in &self.files {
            let path = self.out_dir.join(name);
            fs::write(&path, content).map_err(|e| IacError::io(&path, e))?;
            debug!("Wrote {:?}", path);
        }

        write_file_copies(&self.out_dir, &self.file_copies)?;

        for (module_type, src) in &self.module_dirs {
            let dst = self.out_dir.join(MODULES_DIR).join(module_type);
            copy_module_tree(src, &dst)?;
        }

        info!(
            "Generated {} modules into {:?} ({} files, {} module types)",
            self.module_ids.len(),
            self.out_dir,
            self.files.len(),
            self.module_dirs.len()
        );

        Ok(GenerateSummary {
            out_dir: self.out_dir.clone(),
            files_written: self.files.len(),
            file_inputs: self.file_copies.len(),
            module_types: self.module_dirs.keys().cloned().collect(),
        })
    }
}

/// Refuse output directories whose clearing would be destructive: the
/// filesystem root, the current directory and any of its ancestors.
pub fn assert_safe_out_dir(out_dir: &Path) -> IacResult<()> {
    let raw = out_dir.to_string_lossy();
    let trimmed = raw.trim();
    let refuse = || Err(IacError::UnsafeOutputDir(raw.to_string()));
    if trimmed.is_empty() || trimmed == "." || trimmed == "/" {
        return refuse();
    }

    let cwd = std::env::current_dir().map_err(|e| IacError::io(".", e))?;
    let cwd = cwd.canonicalize().unwrap_or(cwd);
    let absolute = lexical_clean(&cwd.join(out_dir));
    let resolved = absolute.canonicalize().unwrap_or(absolute);
    if resolved.parent().is_none() || cwd.starts_with(&resolved) {
        return refuse();
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Env,
    Service,
}

/// A resolved `module` block.
#[derive(Debug, Clone)]
struct ModuleBlock {
    id: String,
    module_type: String,
    attrs: Vec<(String, Expression)>,
    deps: BTreeSet<String>,
}

impl ModuleBlock {
    fn render(&self) -> IacResult<String> {
        let mut block = Block::builder("module")
            .add_label(self.id.as_str())
            .add_attribute(("source", string(format!("./{}/{}", MODULES_DIR, self.module_type))));
        for (name, expr) in &self.attrs {
            block = block.add_attribute(attr(name, expr.clone())?);
        }
        if !self.deps.is_empty() {
            let deps = self
                .deps
                .iter()
                .map(|d| traversal(&format!("module.{}", d)))
                .collect::<IacResult<Vec<_>>>()?;
            block = block.add_attribute(("depends_on", Expression::Array(deps)));
        }
        render(&Body::builder().add_block(block.build()).build())
    }
}

/// Generates the Terraform stack for an environment or a service.
pub struct StackGenerator<'a> {
    env: &'a EnvironmentConfig,
    service: Option<&'a ServiceConfig>,
    options: GeneratorOptions,
    engine: AugmentEngine,
}

impl<'a> StackGenerator<'a> {
    /// With `service` set, the service stack is generated on top of `env`.
    pub fn new(env: &'a EnvironmentConfig, service: Option<&'a ServiceConfig>, options: GeneratorOptions) -> Self {
        Self {
            env,
            service,
            options,
            engine: AugmentEngine::standard(),
        }
    }

    pub fn with_engine(mut self, engine: AugmentEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Plan then write.
    pub fn generate(&self) -> IacResult<GenerateSummary> {
        self.plan()?.write()
    }

    /// Resolve and render the whole stack without touching the filesystem
    /// beyond reading module sources and file inputs.
    pub fn plan(&self) -> IacResult<StackPlan> {
        assert_safe_out_dir(&self.options.out_dir)?;

        let run = Run::prepare(self.env, self.service, &self.options)?;
        let emitted: Vec<&Module> = run.emitted().collect();

        let ctx = AugmentContext {
            provider: run.provider,
            env_name: &self.env.metadata.name,
            service_name: self.service.map(|s| s.metadata.name.as_str()),
            modules: &run.modules,
            vars: &run.vars,
            parent: run.parent.as_ref(),
        };
        let augmentations = self.engine.build(&ctx);

        let mut materializer = FileMaterializer::new(self.options.spec_dir.as_deref());
        let mut blocks = Vec::with_capacity(emitted.len());
        for module in &emitted {
            let mut inputs = module.inputs.clone();
            if let Some(aug) = augmentations.get(&module.id) {
                aug.apply_to(&module.id, &mut inputs);
            }

            let mut materialized = BTreeMap::new();
            for (name, value) in inputs {
                let value = materializer.materialize(&value).map_err(|e| IacError::FileInput {
                    id: module.id.clone(),
                    input: name.clone(),
                    source: Box::new(e),
                })?;
                materialized.insert(name, value);
            }

            blocks.push(run.resolve_module(module, &materialized)?);
        }

        check_cycles(&blocks)?;

        let mut files = BTreeMap::new();
        for block in &blocks {
            files.insert(format!("{}.tf", block.id), block.render()?);
        }
        run.scaffold(&emitted, &mut files)?;

        let mut emitted_meta = Vec::with_capacity(emitted.len());
        let mut module_dirs = BTreeMap::new();
        for module in &emitted {
            let registered = run.registry.resolve(module)?;
            emitted_meta.push((module.id.as_str(), &registered.metadata));
            module_dirs.insert(module.module_type.clone(), registered.dir.clone());
        }
        files.insert("outputs.tf".to_string(), render_outputs(&plan_outputs(emitted_meta))?);

        let file_copies = materializer.into_copies();
        check_file_copies(&files, &file_copies)?;

        Ok(StackPlan {
            out_dir: self.options.out_dir.clone(),
            files,
            file_copies,
            module_dirs,
            module_ids: emitted.iter().map(|m| m.id.clone()).collect(),
        })
    }
}

/// File inputs must not land on a generated file or inside `modules/`.
fn check_file_copies(files: &BTreeMap<String, String>, copies: &[FileCopy]) -> IacResult<()> {
    for copy in copies {
        let under_modules = copy.rel == MODULES_DIR || copy.rel.starts_with(&format!("{}/", MODULES_DIR));
        if under_modules || files.contains_key(&copy.rel) {
            return Err(IacError::FileInputCollision {
                rel: copy.rel.clone(),
                other: "a generated stack file".to_string(),
            });
        }
    }
    Ok(())
}

fn check_cycles(blocks: &[ModuleBlock]) -> IacResult<()> {
    let ids: BTreeSet<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
    let edges: BTreeMap<String, BTreeSet<String>> = blocks
        .iter()
        .map(|b| {
            let deps = b.deps.iter().filter(|d| ids.contains(d.as_str())).cloned().collect();
            (b.id.clone(), deps)
        })
        .collect();
    match find_cycle(&edges) {
        Some(cycle) => Err(IacError::DependencyCycle(cycle.join(" -> "))),
        None => Ok(()),
    }
}

/// Everything resolved once per run.
struct Run<'a> {
    env: &'a EnvironmentConfig,
    service: Option<&'a ServiceConfig>,
    env_key: String,
    entry: &'a EnvironmentEntry,
    provider: CloudProvider,
    /// Environment modules first, then service modules.
    modules: Vec<Module>,
    scopes: BTreeMap<String, Scope>,
    registry: ModuleRegistry,
    /// Output name to providing module ids, in declaration order.
    output_index: BTreeMap<String, Vec<String>>,
    vars: BTreeMap<String, Value>,
    secrets: BTreeSet<String>,
    placeholders: Placeholders,
    parent: Option<ParentOutputs>,
}

impl<'a> Run<'a> {
    fn prepare(
        env: &'a EnvironmentConfig,
        service: Option<&'a ServiceConfig>,
        options: &GeneratorOptions,
    ) -> IacResult<Self> {
        let env_key = options.env_key.trim().to_string();
        let entry = env
            .environments
            .get(&env_key)
            .ok_or_else(|| IacError::UnknownEnvironment {
                key: env_key.clone(),
                available: env.environments.keys().cloned().collect::<Vec<_>>().join(", "),
            })?;
        if entry.region.trim().is_empty() {
            return Err(IacError::MissingRegion(env_key));
        }

        let service_entry: Option<&ServiceEnvRefEntry> = match service {
            Some(svc) => Some(svc.metadata.env_ref.get(&env_key).ok_or_else(|| {
                IacError::UnknownServiceEnv {
                    service: svc.metadata.name.clone(),
                    key: env_key.clone(),
                }
            })?),
            None => None,
        };

        let provider = CloudProvider::parse(&env.metadata.provider)?;

        let mut modules = Vec::new();
        let mut scopes = BTreeMap::new();
        let scoped = env
            .modules
            .iter()
            .map(|m| (m, Scope::Env))
            .chain(service.into_iter().flat_map(|s| s.modules.iter().map(|m| (m, Scope::Service))));
        for (module, scope) in scoped {
            if scopes.insert(module.id.clone(), scope).is_some() {
                return Err(IacError::DuplicateModuleId(module.id.clone()));
            }
            modules.push(module.clone());
        }
        for module in &modules {
            for (access, target) in module.links.pairs() {
                if !scopes.contains_key(target) {
                    return Err(IacError::UnknownLinkTarget {
                        id: module.id.clone(),
                        access: access.to_string(),
                        target: target.to_string(),
                    });
                }
            }
        }

        let registry = ModuleRegistry::load(&options.roots, &modules)?;

        let mut output_index: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for module in &modules {
            for output in &registry.resolve(module)?.metadata.outputs {
                output_index
                    .entry(output.name.clone())
                    .or_default()
                    .push(module.id.clone());
            }
        }

        let parent = match service {
            Some(_) => {
                let mut env_meta = Vec::with_capacity(env.modules.len());
                for module in &env.modules {
                    env_meta.push((module.id.as_str(), &registry.resolve(module)?.metadata));
                }
                let planned = plan_outputs(env_meta);
                Some(ParentOutputs::new(env.modules.iter().map(|m| m.id.clone()), &planned))
            }
            None => None,
        };

        let vars = merged_vars(env, service, entry, service_entry, &options.vars)?;
        let secrets = entry
            .secrets
            .keys()
            .chain(service_entry.into_iter().flat_map(|s| s.secrets.keys()))
            .cloned()
            .collect();

        let layer_name = service
            .map(|s| s.metadata.name.as_str())
            .unwrap_or(env.metadata.name.as_str());
        let placeholders = Placeholders::new(&env.metadata.name, layer_name, &entry.account, &entry.region);

        debug!(
            "Prepared {} run for {:?}/{} with {} modules",
            if service.is_some() { "service" } else { "environment" },
            env.metadata.name,
            env_key,
            modules.len()
        );

        Ok(Self {
            env,
            service,
            env_key,
            entry,
            provider,
            modules,
            scopes,
            registry,
            output_index,
            vars,
            secrets,
            placeholders,
            parent,
        })
    }

    /// Modules written in this run: service modules for a service stack,
    /// environment modules otherwise.
    fn emitted(&self) -> impl Iterator<Item = &Module> {
        let wanted = if self.service.is_some() { Scope::Service } else { Scope::Env };
        self.modules
            .iter()
            .filter(move |m| self.scopes.get(&m.id) == Some(&wanted))
    }

    fn is_service_run(&self) -> bool {
        self.service.is_some()
    }

    fn layer_name(&self) -> &str {
        self.service
            .map(|s| s.metadata.name.as_str())
            .unwrap_or(self.env.metadata.name.as_str())
    }

    fn resolve_module(&self, module: &Module, inputs: &BTreeMap<String, Value>) -> IacResult<ModuleBlock> {
        let metadata = &self.registry.resolve(module)?.metadata;
        let compiler = ExprCompiler::new(&self.placeholders, &self.secrets);
        let mut block = ModuleBlock {
            id: module.id.clone(),
            module_type: module.module_type.clone(),
            attrs: Vec::new(),
            deps: BTreeSet::new(),
        };

        for spec in &metadata.inputs {
            if let Some(expr) = self.resolve_input(module, spec, inputs, &compiler, &mut block.deps)? {
                block.attrs.push((spec.name.clone(), expr));
            }
        }

        // Undeclared inputs pass through.
        for (name, value) in inputs.iter().filter(|(name, _)| !metadata.declares_input(name)) {
            if let Some(expr) = self.compile_value(&module.id, value, &compiler, &mut block.deps)? {
                block.attrs.push((name.clone(), expr));
            }
        }

        Ok(block)
    }

    fn resolve_input(
        &self,
        module: &Module,
        spec: &InputSpec,
        inputs: &BTreeMap<String, Value>,
        compiler: &ExprCompiler<'_>,
        deps: &mut BTreeSet<String>,
    ) -> IacResult<Option<Expression>> {
        if let Some(value) = inputs.get(&spec.name) {
            return self.compile_value(&module.id, value, compiler, deps);
        }

        match spec.name.as_str() {
            "env_name" => return Ok(Some(string(self.env.metadata.name.as_str()))),
            "layer_name" => return Ok(Some(string(self.layer_name()))),
            "module_name" => return Ok(Some(string(module.id.as_str()))),
            _ => {}
        }

        if let Some(expr) = self.auto_wire(module, &spec.name, deps)? {
            return Ok(Some(expr));
        }

        if self.vars.contains_key(&spec.name) || self.secrets.contains(&spec.name) {
            let reference = Reference::Var(&spec.name);
            return compiler.reference_expr(&reference).map(Some);
        }

        match spec.default.as_ref().filter(|v| !v.is_null()) {
            Some(default) => self.compile_value(&module.id, default, compiler, deps),
            None if spec.required => Err(IacError::MissingInput {
                id: module.id.clone(),
                module_type: module.module_type.clone(),
                input: spec.name.clone(),
            }),
            None => Ok(None),
        }
    }

    /// Wire an input to the single other module exporting an output of the
    /// same name.
    fn auto_wire(
        &self,
        module: &Module,
        input: &str,
        deps: &mut BTreeSet<String>,
    ) -> IacResult<Option<Expression>> {
        let Some(providers) = self.output_index.get(input) else {
            return Ok(None);
        };
        let candidates: Vec<&str> = providers
            .iter()
            .map(String::as_str)
            .filter(|id| *id != module.id)
            .collect();

        let ambiguous = |scope: &str, ids: &[&str]| IacError::AmbiguousInput {
            id: module.id.clone(),
            input: input.to_string(),
            scope: scope.to_string(),
            candidates: ids.iter().map(|s| s.to_string()).collect(),
        };
        let direct = |id: &str, deps: &mut BTreeSet<String>| {
            deps.insert(id.to_string());
            traversal(&format!("module.{}.{}", id, input)).map(Some)
        };

        if !self.is_service_run() {
            return match candidates.as_slice() {
                [] => Ok(None),
                [only] => direct(*only, deps),
                many => Err(ambiguous("", many)),
            };
        }

        let (service_ids, env_ids): (Vec<&str>, Vec<&str>) = candidates
            .iter()
            .copied()
            .partition(|id| self.scopes.get(*id) == Some(&Scope::Service));

        match (service_ids.as_slice(), env_ids.as_slice()) {
            ([only], _) => direct(*only, deps),
            ([], [only]) => {
                let name = self
                    .parent
                    .as_ref()
                    .map(|p| p.output_name(*only, input))
                    .unwrap_or_else(|| input.to_string());
                traversal(&remote_state_output(&name)).map(Some)
            }
            ([], []) => Ok(None),
            ([], many) => Err(ambiguous("environment ", many)),
            (many, _) => Err(ambiguous("service ", many)),
        }
    }

    fn compile_value(
        &self,
        module_id: &str,
        value: &Value,
        compiler: &ExprCompiler<'_>,
        deps: &mut BTreeSet<String>,
    ) -> IacResult<Option<Expression>> {
        let expanded = compiler.expand(value);
        self.record_references(module_id, &expanded, deps);
        compiler.to_expr(&expanded)
    }

    fn record_references(&self, module_id: &str, value: &Value, deps: &mut BTreeSet<String>) {
        for target in referenced_module_ids(value) {
            if target == module_id {
                continue;
            }
            match self.scopes.get(&target) {
                None => warn!(
                    "Module {:?} references unknown module {:?}; no dependency recorded",
                    module_id, target
                ),
                Some(Scope::Env) if self.is_service_run() => {
                    warn!(
                        "Module {:?} references environment module {:?} directly; it is not part of this stack",
                        module_id, target
                    );
                    deps.insert(target);
                }
                Some(_) => {
                    deps.insert(target);
                }
            }
        }
    }

    /// Traversal to a module output, through remote state when the module
    /// belongs to the parent environment stack.
    fn output_ref(&self, module_id: &str, output: &str) -> String {
        match &self.parent {
            Some(parent) if parent.contains(module_id) => remote_state_output(&parent.output_name(module_id, output)),
            _ => format!("module.{}.{}", module_id, output),
        }
    }

    fn cluster(&self) -> Option<ClusterRef> {
        ClusterKind::ALL.iter().find_map(|kind| {
            self.modules
                .iter()
                .find(|m| m.module_type == kind.module_type())
                .map(|m| ClusterRef::new(*kind, |out| self.output_ref(&m.id, out)))
        })
    }

    /// Render the shared scaffolding files.
    fn scaffold(&self, emitted: &[&Module], files: &mut BTreeMap<String, String>) -> IacResult<()> {
        let needs = ProviderNeeds::for_types(emitted.iter().map(|m| m.module_type.as_str()));
        let cluster = if needs.any() { self.cluster() } else { None };

        let env_name = &self.env.metadata.name;
        let env_backend = BackendConfig::resolve(self.env, self.entry)?;
        let (backend, state_key) = match self.service {
            Some(svc) => (
                env_backend.clone().with_overrides(&svc.backend, self.entry)?,
                service_state_key(&svc.metadata.name, &self.env_key),
            ),
            None => (env_backend.clone(), env_state_key(env_name, &self.env_key)),
        };

        files.insert(
            "versions.tf".to_string(),
            versions_tf(self.provider, needs, &backend, &state_key, &self.vars)?,
        );
        files.insert(
            "providers.tf".to_string(),
            providers_tf(
                self.provider,
                &self.entry.region,
                &self.entry.account,
                needs,
                cluster.as_ref(),
            )?,
        );
        if let Some(secrets) = secrets_tf(&self.secrets)? {
            files.insert("secrets.tf".to_string(), secrets);
        }
        if self.is_service_run() {
            files.insert(
                "state.tf".to_string(),
                state_tf(&env_backend, &env_state_key(env_name, &self.env_key))?,
            );
        }
        Ok(())
    }
}

/// Variables visible to every module, lowest precedence first: platform
/// values, environment variables, service variables, CLI overrides.
///
/// Variables become `locals`, so every name must be an HCL identifier.
fn merged_vars(
    env: &EnvironmentConfig,
    service: Option<&ServiceConfig>,
    entry: &EnvironmentEntry,
    service_entry: Option<&ServiceEnvRefEntry>,
    overrides: &BTreeMap<String, String>,
) -> IacResult<BTreeMap<String, Value>> {
    let mut tags: BTreeMap<String, Value> = env
        .metadata
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), Value::from(v.as_str())))
        .collect();
    if let Some(svc) = service {
        tags.extend(svc.metadata.labels.iter().map(|(k, v)| (k.clone(), Value::from(v.as_str()))));
    }

    let mut vars = BTreeMap::from([
        ("account_id".to_string(), Value::from(entry.account.as_str())),
        ("region".to_string(), Value::from(entry.region.as_str())),
        ("environment".to_string(), Value::from(env.metadata.name.as_str())),
        ("global_tags".to_string(), Value::Map(tags)),
    ]);

    let layered = entry
        .variables
        .iter()
        .chain(service_entry.into_iter().flat_map(|s| s.variables.iter()))
        .chain(overrides.iter());
    for (key, raw) in layered {
        if !is_identifier(key) {
            return Err(IacError::InvalidVariableName(key.clone()));
        }
        vars.insert(key.clone(), parse_override_value(raw));
    }
    Ok(vars)
}
