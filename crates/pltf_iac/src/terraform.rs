//! Terraform lifecycle runner for generated stacks.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{IacError, IacResult};

/// Default bound on a single terraform invocation.
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;
/// Plan file written inside the stack when none is requested.
pub const DEFAULT_PLAN_FILE: &str = ".pltf-plan.tfplan";

/// One process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Capture stdout/stderr instead of passing them through.
    pub capture: bool,
}

/// Exit status and captured output of a process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Process boundary of the runner.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: &ExecRequest) -> IacResult<CommandOutput>;
}

/// Runs commands as local child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(&self, request: &ExecRequest) -> IacResult<CommandOutput> {
        let mut command = Command::new(&request.program);
        command
            .args(&request.args)
            .current_dir(&request.working_dir)
            .kill_on_drop(true);
        if request.capture {
            command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdin(Stdio::inherit()).stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let action = request.args.first().cloned().unwrap_or_default();
        let output = match tokio::time::timeout(request.timeout, command.output()).await {
            Err(_) => {
                return Err(IacError::TerraformTimeout {
                    action,
                    seconds: request.timeout.as_secs(),
                })
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IacError::TerraformNotAvailable(format!(
                    "{} not found in PATH",
                    request.program
                )))
            }
            Ok(Err(e)) => return Err(IacError::io(&request.working_dir, e)),
            Ok(Ok(output)) => output,
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Flags shared by the terraform subcommands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TfExecOptions {
    pub no_color: bool,
    pub input: bool,
    pub lock: bool,
    pub lock_timeout: Option<String>,
    pub parallelism: Option<u32>,
    pub targets: Vec<String>,
    /// `None` leaves terraform's default.
    pub refresh: Option<bool>,
}

impl Default for TfExecOptions {
    fn default() -> Self {
        Self {
            no_color: false,
            input: false,
            lock: true,
            lock_timeout: None,
            parallelism: None,
            targets: Vec::new(),
            refresh: None,
        }
    }
}

impl TfExecOptions {
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_lock_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.lock_timeout = Some(timeout.into());
        self
    }

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = Some(refresh);
        self
    }

    pub fn without_lock(mut self) -> Self {
        self.lock = false;
        self
    }

    pub fn no_color(mut self) -> Self {
        self.no_color = true;
        self
    }

    /// Append the common flags to `args`.
    pub fn append_to(&self, args: &mut Vec<String>) {
        if self.no_color {
            args.push("-no-color".to_string());
        }
        if !self.input {
            args.push("-input=false".to_string());
        }
        if !self.lock {
            args.push("-lock=false".to_string());
        }
        if let Some(timeout) = self.lock_timeout.as_deref().filter(|t| !t.trim().is_empty()) {
            args.push(format!("-lock-timeout={}", timeout));
        }
        if let Some(parallelism) = self.parallelism.filter(|p| *p > 0) {
            args.push(format!("-parallelism={}", parallelism));
        }
        for target in &self.targets {
            args.push(format!("-target={}", target));
        }
        if let Some(refresh) = self.refresh {
            args.push(format!("-refresh={}", refresh));
        }
    }
}

/// Result of a Terraform operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerraformResult {
    pub success: bool,
    pub output: String,
    pub exit_code: i32,
}

impl From<CommandOutput> for TerraformResult {
    fn from(out: CommandOutput) -> Self {
        let output = if out.stdout.is_empty() {
            out.stderr
        } else if out.stderr.is_empty() {
            out.stdout
        } else {
            format!("{}\n{}", out.stdout, out.stderr)
        };
        Self {
            success: out.exit_code == 0,
            output,
            exit_code: out.exit_code,
        }
    }
}

/// `terraform version -json` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerraformVersion {
    pub terraform_version: String,
    /// Provider source address to selected version.
    #[serde(default)]
    pub provider_selections: BTreeMap<String, String>,
}

impl TerraformVersion {
    pub fn from_json(json: &str) -> IacResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Resource counts from a saved plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub added: usize,
    pub changed: usize,
    pub destroyed: usize,
    pub adds: Vec<String>,
    pub changes: Vec<String>,
    pub deletes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlanJson {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    #[serde(default)]
    address: String,
    change: Change,
}

#[derive(Debug, Deserialize)]
struct Change {
    #[serde(default)]
    actions: Vec<String>,
}

impl PlanSummary {
    /// Classify the `resource_changes` of `terraform show -json` output.
    pub fn from_plan_json(json: &str) -> IacResult<Self> {
        let plan: PlanJson = serde_json::from_str(json)?;
        let mut summary = Self::default();
        for rc in plan.resource_changes {
            let has = |action: &str| rc.change.actions.iter().any(|a| a == action);
            if (has("create") && has("delete")) || has("update") {
                summary.changed += 1;
                summary.changes.push(rc.address);
            } else if has("create") {
                summary.added += 1;
                summary.adds.push(rc.address);
            } else if has("delete") {
                summary.destroyed += 1;
                summary.deletes.push(rc.address);
            }
        }
        Ok(summary)
    }

    pub fn has_changes(&self) -> bool {
        self.added + self.changed + self.destroyed > 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.added, self.changed, self.destroyed
        )
    }
}

/// Outcome of `terraform plan`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub exit_code: i32,
    /// Known only with `-detailed-exitcode`.
    pub has_changes: Option<bool>,
    pub summary: Option<PlanSummary>,
}

/// Plan request settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanRequest {
    /// Relative to the stack directory unless absolute. Defaults to a
    /// temporary file removed after the summary is collected.
    pub plan_file: Option<String>,
    pub detailed_exitcode: bool,
}

/// Drives the terraform binary in a generated stack directory.
#[derive(Clone)]
pub struct TerraformRunner {
    executor: Arc<dyn CommandExecutor>,
    binary: String,
    timeout: Duration,
}

impl TerraformRunner {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            executor,
            binary: "terraform".to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Runner backed by local processes.
    pub fn local() -> Self {
        Self::new(Arc::new(ProcessExecutor))
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exec(&self, working_dir: &Path, args: Vec<String>, capture: bool) -> IacResult<CommandOutput> {
        debug!("Executing {} {:?} in {:?}", self.binary, args, working_dir);
        let request = ExecRequest {
            program: self.binary.clone(),
            args,
            working_dir: working_dir.to_path_buf(),
            timeout: self.timeout,
            capture,
        };
        self.executor.execute(&request).await
    }

    async fn run(&self, working_dir: &Path, args: Vec<String>, capture: bool) -> IacResult<TerraformResult> {
        Ok(self.exec(working_dir, args, capture).await?.into())
    }

    async fn run_checked(
        &self,
        action: &str,
        working_dir: &Path,
        args: Vec<String>,
        capture: bool,
    ) -> IacResult<TerraformResult> {
        let result = self.run(working_dir, args, capture).await?;
        if !result.success {
            return Err(IacError::TerraformFailed {
                action: action.to_string(),
                code: result.exit_code,
            });
        }
        Ok(result)
    }

    /// Run terraform init. `quiet` captures the output.
    pub async fn init(&self, working_dir: &Path, quiet: bool) -> IacResult<TerraformResult> {
        info!("Running terraform init in {:?}", working_dir);
        let args = vec!["init".to_string(), "-input=false".to_string()];
        self.run_checked("init", working_dir, args, quiet).await
    }

    /// Run terraform plan, then summarize the saved plan.
    pub async fn plan(
        &self,
        working_dir: &Path,
        opts: &TfExecOptions,
        request: &PlanRequest,
    ) -> IacResult<PlanOutcome> {
        info!("Running terraform plan in {:?}", working_dir);

        let (plan_arg, temporary) = match request.plan_file.as_deref().map(str::trim) {
            Some(file) if !file.is_empty() => (file.to_string(), false),
            _ => (DEFAULT_PLAN_FILE.to_string(), true),
        };
        let plan_path = if Path::new(&plan_arg).is_absolute() {
            PathBuf::from(&plan_arg)
        } else {
            working_dir.join(&plan_arg)
        };

        let mut args = vec!["plan".to_string()];
        if request.detailed_exitcode {
            args.push("-detailed-exitcode".to_string());
        }
        args.push(format!("-out={}", plan_arg));
        opts.append_to(&mut args);

        let result = self.run(working_dir, args, false).await?;
        let changes_exit = request.detailed_exitcode && result.exit_code == 2;
        if !result.success && !changes_exit {
            return Err(IacError::TerraformFailed {
                action: "plan".to_string(),
                code: result.exit_code,
            });
        }

        let summary = match self.plan_summary(working_dir, &plan_path).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!("Failed to collect plan summary: {}", e);
                None
            }
        };
        if temporary {
            if let Err(e) = std::fs::remove_file(&plan_path) {
                debug!("Could not remove plan file {:?}: {}", plan_path, e);
            }
        }

        Ok(PlanOutcome {
            exit_code: result.exit_code,
            has_changes: request.detailed_exitcode.then_some(changes_exit),
            summary,
        })
    }

    /// Summarize a saved plan with `terraform show -json`.
    pub async fn plan_summary(&self, working_dir: &Path, plan_file: &Path) -> IacResult<PlanSummary> {
        let args = vec![
            "show".to_string(),
            "-json".to_string(),
            plan_file.to_string_lossy().into_owned(),
        ];
        let output = self.exec(working_dir, args, true).await?;
        if !output.success() {
            return Err(IacError::TerraformFailed {
                action: "show".to_string(),
                code: output.exit_code,
            });
        }
        PlanSummary::from_plan_json(&output.stdout)
    }

    pub async fn apply(&self, working_dir: &Path, opts: &TfExecOptions, auto_approve: bool) -> IacResult<TerraformResult> {
        info!("Running terraform apply in {:?}", working_dir);
        self.run_checked("apply", working_dir, Self::mutating_args("apply", opts, auto_approve), false)
            .await
    }

    pub async fn destroy(&self, working_dir: &Path, opts: &TfExecOptions, auto_approve: bool) -> IacResult<TerraformResult> {
        info!("Running terraform destroy in {:?}", working_dir);
        self.run_checked("destroy", working_dir, Self::mutating_args("destroy", opts, auto_approve), false)
            .await
    }

    fn mutating_args(action: &str, opts: &TfExecOptions, auto_approve: bool) -> Vec<String> {
        let mut args = vec![action.to_string()];
        if auto_approve {
            args.push("-auto-approve".to_string());
        }
        opts.append_to(&mut args);
        args
    }

    /// Print stack outputs, optionally a single one.
    pub async fn output(
        &self,
        working_dir: &Path,
        opts: &TfExecOptions,
        name: Option<&str>,
        json: bool,
    ) -> IacResult<TerraformResult> {
        let mut args = vec!["output".to_string()];
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            args.push(name.to_string());
        }
        if json {
            args.push("-json".to_string());
        }
        // output and force-unlock reject the plan/apply flags.
        if opts.no_color {
            args.push("-no-color".to_string());
        }
        self.run_checked("output", working_dir, args, false).await
    }

    pub async fn force_unlock(&self, working_dir: &Path, opts: &TfExecOptions, lock_id: &str) -> IacResult<TerraformResult> {
        info!("Running terraform force-unlock {} in {:?}", lock_id, working_dir);
        let mut args = vec!["force-unlock".to_string(), "-force".to_string()];
        if opts.no_color {
            args.push("-no-color".to_string());
        }
        args.push(lock_id.to_string());
        self.run_checked("force-unlock", working_dir, args, false).await
    }

    /// Installed terraform version and provider selections for `working_dir`.
    pub async fn version(&self, working_dir: &Path) -> IacResult<TerraformVersion> {
        let args = vec!["version".to_string(), "-json".to_string()];
        let result = self.run_checked("version", working_dir, args, true).await?;
        TerraformVersion::from_json(&result.output)
    }

    /// Initialize quietly, then return the `terraform graph` DOT output,
    /// optionally for a saved plan.
    pub async fn graph(&self, working_dir: &Path, plan_file: Option<&str>) -> IacResult<String> {
        self.init(working_dir, true).await?;
        let mut args = vec!["graph".to_string()];
        if let Some(plan) = plan_file.map(str::trim).filter(|p| !p.is_empty()) {
            args.push(format!("-plan={}", plan));
        }
        let result = self.run_checked("graph", working_dir, args, true).await?;
        Ok(result.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records requests and replays canned outputs in order.
    #[derive(Default)]
    struct MockExecutor {
        responses: Mutex<VecDeque<CommandOutput>>,
        calls: Mutex<Vec<ExecRequest>>,
    }

    impl MockExecutor {
        fn with_responses(responses: Vec<CommandOutput>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().iter().map(|r| r.args.clone()).collect()
        }
    }

    #[async_trait]
    impl CommandExecutor for MockExecutor {
        async fn execute(&self, request: &ExecRequest) -> IacResult<CommandOutput> {
            self.calls.lock().unwrap().push(request.clone());
            Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
        }
    }

    fn exit(code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            exit_code: code,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    const PLAN_JSON: &str = r#"{"resource_changes":[
        {"address":"module.a.x","change":{"actions":["create"]}},
        {"address":"module.a.y","change":{"actions":["delete","create"]}},
        {"address":"module.b.z","change":{"actions":["update"]}},
        {"address":"module.b.w","change":{"actions":["delete"]}},
        {"address":"module.b.v","change":{"actions":["no-op"]}}
    ]}"#;

    #[test]
    fn test_common_args() {
        let opts = TfExecOptions::default()
            .no_color()
            .without_lock()
            .with_lock_timeout("30s")
            .with_parallelism(4)
            .with_target("module.a")
            .with_target("module.b")
            .with_refresh(false);
        let mut args = Vec::new();
        opts.append_to(&mut args);
        assert_eq!(
            args,
            vec![
                "-no-color",
                "-input=false",
                "-lock=false",
                "-lock-timeout=30s",
                "-parallelism=4",
                "-target=module.a",
                "-target=module.b",
                "-refresh=false",
            ]
        );
    }

    #[test]
    fn test_plan_summary_classification() {
        let summary = PlanSummary::from_plan_json(PLAN_JSON).unwrap();
        assert_eq!((summary.added, summary.changed, summary.destroyed), (1, 2, 1));
        assert_eq!(summary.changes, vec!["module.a.y", "module.b.z"]);
        assert!(summary.has_changes());
        assert_eq!(summary.to_string(), "Plan: 1 to add, 2 to change, 1 to destroy.");
        assert!(PlanSummary::from_plan_json("not json").is_err());
        assert!(!PlanSummary::from_plan_json("{}").unwrap().has_changes());
    }

    #[tokio::test]
    async fn test_plan_detailed_exitcode_changes() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::with_responses(vec![exit(2, ""), exit(0, &PLAN_JSON.replace('\n', ""))]);
        let runner = TerraformRunner::new(mock.clone());

        let outcome = runner
            .plan(
                dir.path(),
                &TfExecOptions::default(),
                &PlanRequest {
                    plan_file: None,
                    detailed_exitcode: true,
                },
            )
            .await
            .unwrap();

        assert_eq!(outcome.has_changes, Some(true));
        assert_eq!(outcome.summary.unwrap().added, 1);
        let calls = mock.calls();
        assert_eq!(
            calls[0],
            vec!["plan", "-detailed-exitcode", "-out=.pltf-plan.tfplan", "-input=false"]
        );
        assert_eq!(calls[1][..2], ["show".to_string(), "-json".to_string()]);
    }

    #[tokio::test]
    async fn test_plan_failure() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::with_responses(vec![exit(1, "")]);
        let runner = TerraformRunner::new(mock);
        let err = runner
            .plan(dir.path(), &TfExecOptions::default(), &PlanRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IacError::TerraformFailed { ref action, code: 1 } if action == "plan"));
    }

    #[tokio::test]
    async fn test_summary_failure_is_not_fatal() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::with_responses(vec![exit(0, ""), exit(0, "garbage")]);
        let runner = TerraformRunner::new(mock);
        let outcome = runner
            .plan(dir.path(), &TfExecOptions::default(), &PlanRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.has_changes, None);
        assert!(outcome.summary.is_none());
    }

    #[tokio::test]
    async fn test_apply_output_and_unlock_args() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::with_responses(Vec::new());
        let runner = TerraformRunner::new(mock.clone());
        let opts = TfExecOptions::default().no_color();

        runner.apply(dir.path(), &opts, true).await.unwrap();
        runner.destroy(dir.path(), &opts, false).await.unwrap();
        runner.output(dir.path(), &opts, Some("vpc_id"), true).await.unwrap();
        runner.force_unlock(dir.path(), &opts, "1234").await.unwrap();

        let calls = mock.calls();
        assert_eq!(calls[0], vec!["apply", "-auto-approve", "-no-color", "-input=false"]);
        assert_eq!(calls[1], vec!["destroy", "-no-color", "-input=false"]);
        assert_eq!(calls[2], vec!["output", "vpc_id", "-json", "-no-color"]);
        assert_eq!(calls[3], vec!["force-unlock", "-force", "-no-color", "1234"]);
    }

    #[tokio::test]
    async fn test_graph_runs_init_quietly() {
        let dir = tempdir().unwrap();
        let mock = MockExecutor::with_responses(vec![exit(0, "Initialized"), exit(0, "digraph {}")]);
        let runner = TerraformRunner::new(mock.clone());
        assert_eq!(runner.graph(dir.path(), Some("plan.out")).await.unwrap(), "digraph {}");

        let calls = mock.calls.lock().unwrap();
        assert!(calls.iter().all(|r| r.capture));
        assert_eq!(calls[0].args, vec!["init", "-input=false"]);
        assert_eq!(calls[1].args, vec!["graph", "-plan=plan.out"]);
    }

    #[tokio::test]
    async fn test_version_json() {
        let dir = tempdir().unwrap();
        let json = r#"{"terraform_version":"1.9.5","platform":"linux_amd64",
            "provider_selections":{"registry.terraform.io/hashicorp/aws":"6.2.0"},"terraform_outdated":false}"#;
        let mock = MockExecutor::with_responses(vec![exit(0, json), exit(0, "Terraform v1.9.5")]);
        let runner = TerraformRunner::new(mock.clone());

        let version = runner.version(dir.path()).await.unwrap();
        assert_eq!(version.terraform_version, "1.9.5");
        assert_eq!(
            version.provider_selections.get("registry.terraform.io/hashicorp/aws").map(String::as_str),
            Some("6.2.0")
        );
        assert_eq!(mock.calls()[0], vec!["version", "-json"]);

        assert!(matches!(
            runner.version(dir.path()).await.unwrap_err(),
            IacError::TerraformJson(_)
        ));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempdir().unwrap();
        let runner = TerraformRunner::local().with_binary("pltf-no-such-terraform-binary");
        let err = runner.init(dir.path(), true).await.unwrap_err();
        assert!(matches!(err, IacError::TerraformNotAvailable(_)));
    }
}
