//! Integration tests for stack generation.

use std::fs;
use std::path::{Path, PathBuf};

use pltf_iac::{GeneratorOptions, IacError, ModuleRoot, StackGenerator, StackPlan};
use pltf_spec::{EnvironmentConfig, EnvironmentEntry, Module, SecretRef, ServiceConfig, ServiceEnvRefEntry, Value};
use tempfile::{tempdir, TempDir};

/// Write a module directory with a descriptor and a `main.tf`.
fn write_module(root: &Path, module_type: &str, descriptor_body: &str) {
    let dir = root.join(module_type);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("module.yaml"),
        format!(
            "name: {t}\ntype: {t}\nprovider: aws\nversion: 1.0.0\n{body}",
            t = module_type,
            body = descriptor_body
        ),
    )
    .unwrap();
    fs::write(dir.join("main.tf"), format!("# {}\n", module_type)).unwrap();
}

/// A module root with the types used across these tests.
fn module_root() -> TempDir {
    let root = tempdir().unwrap();
    write_module(
        root.path(),
        "aws_base",
        r#"inputs:
  - name: env_name
    type: string
    required: true
  - name: cidr
    type: string
    default: 10.0.0.0/16
outputs:
  - name: vpc_id
    type: string
  - name: kms_account_key_arn
    type: string
"#,
    );
    write_module(
        root.path(),
        "aws_postgres",
        r#"capabilities:
  provides: [secret]
inputs:
  - name: vpc_id
    type: string
    required: true
  - name: instance_class
    type: string
  - name: db_password
    type: string
outputs:
  - name: db_host
    type: string
  - name: db_password
    type: string
    capability: secret
"#,
    );
    write_module(
        root.path(),
        "aws_sns",
        r#"inputs:
  - name: name
    type: string
outputs:
  - name: topic_arn
    type: string
  - name: topic_kms_arn
    type: string
"#,
    );
    write_module(
        root.path(),
        "aws_sqs",
        r#"inputs:
  - name: name
    type: string
  - name: topic_kms_arn
    type: string
outputs:
  - name: queue_arn
    type: string
  - name: queue_kms_arn
    type: string
"#,
    );
    write_module(
        root.path(),
        "aws_iam_role",
        r#"inputs:
  - name: iam_policy
    type: any
  - name: kubernetes_trusts
    type: list
outputs:
  - name: role_arn
    type: string
"#,
    );
    let extra = root.path().join("aws_base");
    fs::write(extra.join("terraform.tfstate"), "{}").unwrap();
    fs::create_dir_all(extra.join(".terraform")).unwrap();
    fs::write(extra.join(".terraform/lock"), "x").unwrap();
    root
}

fn environment(modules: Vec<Module>) -> EnvironmentConfig {
    let mut env = EnvironmentConfig {
        api_version: "platform.io/v1".into(),
        kind: "Environment".into(),
        modules,
        ..Default::default()
    };
    env.metadata.name = "example".into();
    env.metadata.org = "acme".into();
    env.metadata.provider = "aws".into();
    env.environments.insert(
        "dev".into(),
        EnvironmentEntry {
            account: "111111111111".into(),
            region: "us-east-1".into(),
            ..Default::default()
        },
    );
    env
}

fn service(modules: Vec<Module>) -> ServiceConfig {
    let mut svc = ServiceConfig {
        api_version: "platform.io/v1".into(),
        kind: "Service".into(),
        modules,
        ..Default::default()
    };
    svc.metadata.name = "payments".into();
    svc.metadata.env_file = "../env/env.yaml".into();
    svc.metadata.env_ref.insert("dev".into(), ServiceEnvRefEntry::default());
    svc
}

fn options(root: &Path, out: &Path) -> GeneratorOptions {
    GeneratorOptions::new("dev", out).with_root(ModuleRoot::builtin(root))
}

fn out_dir(work: &TempDir) -> PathBuf {
    work.path().join(".pltf/example/env/dev")
}

/// Collapse whitespace runs so assertions ignore alignment.
fn flat(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn plan_file(plan: &StackPlan, name: &str) -> String {
    flat(plan.file(name).unwrap_or_else(|| panic!("missing {}", name)))
}

fn read_flat(path: PathBuf) -> String {
    flat(&fs::read_to_string(path).unwrap())
}

#[test]
fn test_environment_stack() {
    let root = module_root();
    let work = tempdir().unwrap();
    let out = out_dir(&work);
    let env = environment(vec![Module::new("base", "aws_base"), Module::new("db", "aws_postgres")]);

    let summary = StackGenerator::new(&env, None, options(root.path(), &out))
        .generate()
        .unwrap();

    assert_eq!(summary.module_types, vec!["aws_base", "aws_postgres"]);
    assert_eq!(
        read_flat(out.join("base.tf")),
        "module \"base\" { source = \"./modules/aws_base\" env_name = \"example\" cidr = \"10.0.0.0/16\" }"
    );
    let db = read_flat(out.join("db.tf"));
    assert!(db.starts_with(
        "module \"db\" { source = \"./modules/aws_postgres\" vpc_id = module.base.vpc_id depends_on = ["
    ));
    assert!(hcl::parse(&fs::read_to_string(out.join("db.tf")).unwrap()).is_ok());

    for file in ["versions.tf", "providers.tf", "outputs.tf", "modules/aws_base/main.tf"] {
        assert!(out.join(file).is_file(), "missing {}", file);
    }
    assert!(!out.join("state.tf").exists());
    assert!(!out.join("secrets.tf").exists());
    assert!(!out.join("modules/aws_base/terraform.tfstate").exists());
    assert!(!out.join("modules/aws_base/.terraform").exists());

    let versions = read_flat(out.join("versions.tf"));
    assert!(versions.contains("key = \"env/example/dev/terraform.tfstate\""));
    assert!(versions.contains("bucket = \"acme-example-tfstate\""));

    let outputs = read_flat(out.join("outputs.tf"));
    assert!(outputs.contains("output \"vpc_id\" { value = module.base.vpc_id }"));
    assert!(outputs.contains("output \"db_password\" { value = module.db.db_password sensitive = true }"));
}

#[test]
fn test_generation_is_deterministic() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![
        Module::new("base", "aws_base"),
        Module::new("db", "aws_postgres").with_input("instance_class", "db.t3.micro"),
        Module::new("topic", "aws_sns").with_input("name", "{env_name}-events"),
    ]);

    let first = StackGenerator::new(&env, None, options(root.path(), &work.path().join("a")))
        .plan()
        .unwrap();
    let second = StackGenerator::new(&env, None, options(root.path(), &work.path().join("b")))
        .plan()
        .unwrap();
    assert_eq!(first.files, second.files);
    assert_eq!(first.module_ids, vec!["base", "db", "topic"]);
}

#[test]
fn test_placeholders_and_vars() {
    let root = module_root();
    let work = tempdir().unwrap();
    let mut env = environment(vec![
        Module::new("base", "aws_base").with_input("cidr", "${var.vpc_cidr}"),
        Module::new("topic", "aws_sns").with_input("name", "{{env_name}}-{region}-events"),
    ]);
    env.environments
        .get_mut("dev")
        .unwrap()
        .variables
        .insert("vpc_cidr".into(), "10.1.0.0/16".into());

    let plan = StackGenerator::new(
        &env,
        None,
        options(root.path(), &out_dir(&work)).with_var("vpc_cidr", "10.9.0.0/16"),
    )
    .plan()
    .unwrap();

    assert!(plan_file(&plan, "base.tf").contains("cidr = local.vpc_cidr"));
    assert!(plan_file(&plan, "topic.tf").contains("name = \"example-us-east-1-events\""));
    assert!(plan_file(&plan, "versions.tf").contains("vpc_cidr = \"10.9.0.0/16\""));
}

#[test]
fn test_exact_output_name_matching() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![
        Module::new("base", "aws_base"),
        Module::new("topic", "aws_sns"),
        Module::new("queue", "aws_sqs"),
    ]);

    let plan = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap();
    let queue = plan_file(&plan, "queue.tf");
    assert!(queue.contains("topic_kms_arn = module.topic.topic_kms_arn"));
    assert!(!queue.contains("queue_kms_arn"));
}

#[test]
fn test_ambiguous_auto_wire() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![
        Module::new("base", "aws_base"),
        Module::new("base2", "aws_base"),
        Module::new("db", "aws_postgres"),
    ]);

    let err = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap_err();
    match err {
        IacError::AmbiguousInput { id, input, candidates, .. } => {
            assert_eq!(id, "db");
            assert_eq!(input, "vpc_id");
            assert_eq!(candidates, vec!["base", "base2"]);
        }
        other => panic!("unexpected error: {}", other),
    }

    let env = environment(vec![
        Module::new("base", "aws_base"),
        Module::new("base2", "aws_base"),
        Module::new("db", "aws_postgres").with_input("vpc_id", "module.base2.vpc_id"),
    ]);
    let plan = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap();
    assert!(plan_file(&plan, "db.tf").contains("vpc_id = module.base2.vpc_id"));
}

#[test]
fn test_missing_required_input() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("db", "aws_postgres")]);

    let err = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap_err();
    assert!(matches!(err, IacError::MissingInput { ref input, .. } if input == "vpc_id"));
}

#[test]
fn test_service_stack_uses_remote_state() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("base", "aws_base")]);
    let svc = service(vec![Module::new("db", "aws_postgres")]);

    let out = work.path().join(".pltf/example/payments/env/dev");
    StackGenerator::new(&env, Some(&svc), options(root.path(), &out))
        .generate()
        .unwrap();

    let db = read_flat(out.join("db.tf"));
    assert!(db.contains("vpc_id = data.terraform_remote_state.env.outputs.vpc_id"));
    assert!(!db.contains("depends_on"));
    assert!(!out.join("base.tf").exists());

    let state = read_flat(out.join("state.tf"));
    assert!(state.starts_with("data \"terraform_remote_state\" \"env\" {"));
    assert!(state.contains("key = \"env/example/dev/terraform.tfstate\""));

    let versions = read_flat(out.join("versions.tf"));
    assert!(versions.contains("key = \"service/payments/dev/terraform.tfstate\""));
}

#[test]
fn test_service_explicit_env_reference() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("base", "aws_base")]);
    let svc = service(vec![Module::new("db", "aws_postgres").with_input("vpc_id", "${module.base.vpc_id}")]);

    let plan = StackGenerator::new(
        &env,
        Some(&svc),
        options(root.path(), &work.path().join("svc")),
    )
    .plan()
    .unwrap();
    let db = plan_file(&plan, "db.tf");
    assert!(db.contains("vpc_id = module.base.vpc_id"));
    assert!(db.contains("depends_on = ["));
}

#[test]
fn test_service_without_env_entry() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("base", "aws_base")]);
    let mut svc = service(vec![Module::new("topic", "aws_sns")]);
    svc.metadata.env_ref.clear();

    let err = StackGenerator::new(&env, Some(&svc), options(root.path(), &work.path().join("svc")))
        .plan()
        .unwrap_err();
    assert!(matches!(err, IacError::UnknownServiceEnv { .. }));
}

#[test]
fn test_secrets_become_variables() {
    let root = module_root();
    let work = tempdir().unwrap();
    let mut env = environment(vec![Module::new("base", "aws_base"), Module::new("db", "aws_postgres")]);
    env.environments
        .get_mut("dev")
        .unwrap()
        .secrets
        .insert("db_password".into(), SecretRef::default());

    let plan = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap();
    assert_eq!(
        plan_file(&plan, "secrets.tf"),
        "variable \"db_password\" { sensitive = true }"
    );
    assert!(plan_file(&plan, "db.tf").contains("db_password = var.db_password"));
}

#[test]
fn test_links_generate_iam_policy() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![
        Module::new("role", "aws_iam_role"),
        Module::new("queue", "aws_sqs")
            .with_input("topic_kms_arn", Value::Null)
            .with_link("write", "role"),
    ]);

    let plan = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap();
    let role = plan_file(&plan, "role.tf");
    assert!(role.contains("\"sqs:SendMessage\""));
    assert!(role.contains("module.queue.queue_arn"));
    assert!(role.contains("depends_on = ["));
    assert!(!role.contains("kubernetes_trusts"));
}

#[test]
fn test_unknown_link_target() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("topic", "aws_sns").with_link("read", "ghost")]);

    let err = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap_err();
    assert!(matches!(err, IacError::UnknownLinkTarget { ref target, .. } if target == "ghost"));
}

#[test]
fn test_file_inputs_are_copied() {
    let root = module_root();
    let work = tempdir().unwrap();
    let spec_dir = work.path().join("spec");
    fs::create_dir_all(spec_dir.join("files")).unwrap();
    fs::write(spec_dir.join("files/policy.json"), "{\"Version\":\"2012-10-17\"}").unwrap();

    let env = environment(vec![Module::new("role", "aws_iam_role").with_input("iam_policy", "./files/policy.json")]);
    let out = out_dir(&work);
    let summary = StackGenerator::new(&env, None, options(root.path(), &out).with_spec_dir(&spec_dir))
        .generate()
        .unwrap();

    assert_eq!(summary.file_inputs, 1);
    assert!(read_flat(out.join("role.tf")).contains("iam_policy = \"files/policy.json\""));
    assert_eq!(
        fs::read_to_string(out.join("files/policy.json")).unwrap(),
        "{\"Version\":\"2012-10-17\"}"
    );
}

#[test]
fn test_regeneration_clears_stale_files() {
    let root = module_root();
    let work = tempdir().unwrap();
    let out = out_dir(&work);
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("stale.tf"), "# old").unwrap();

    let env = environment(vec![Module::new("base", "aws_base")]);
    StackGenerator::new(&env, None, options(root.path(), &out))
        .generate()
        .unwrap();
    assert!(!out.join("stale.tf").exists());
    assert!(out.join("base.tf").exists());
}

#[test]
fn test_failed_plan_leaves_output_untouched() {
    let root = module_root();
    let work = tempdir().unwrap();
    let out = out_dir(&work);
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("keep.tf"), "# keep").unwrap();

    let env = environment(vec![Module::new("db", "aws_postgres")]);
    assert!(StackGenerator::new(&env, None, options(root.path(), &out))
        .generate()
        .is_err());
    assert!(out.join("keep.tf").exists());
}

#[test]
fn test_unknown_environment_key() {
    let root = module_root();
    let env = environment(vec![Module::new("base", "aws_base")]);
    let opts = GeneratorOptions::new("prod", "/tmp/pltf-unused/out").with_root(ModuleRoot::builtin(root.path()));

    let err = StackGenerator::new(&env, None, opts).plan().unwrap_err();
    match err {
        IacError::UnknownEnvironment { key, available } => {
            assert_eq!(key, "prod");
            assert_eq!(available, "dev");
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_custom_root_shadows_builtin() {
    let builtin = module_root();
    let custom = tempdir().unwrap();
    write_module(
        custom.path(),
        "aws_sns",
        "inputs:\n  - name: display_name\n    type: string\n    default: custom\noutputs:\n  - name: topic_arn\n    type: string\n",
    );
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("topic", "aws_sns").with_source("custom")]);

    let opts = GeneratorOptions::new("dev", out_dir(&work))
        .with_root(ModuleRoot::custom(custom.path()))
        .with_root(ModuleRoot::builtin(builtin.path()));
    let plan = StackGenerator::new(&env, None, opts).plan().unwrap();

    assert!(plan_file(&plan, "topic.tf").contains("display_name = \"custom\""));
    assert_eq!(plan.module_dirs["aws_sns"], custom.path().join("aws_sns"));
}

#[test]
fn test_colliding_output_names_are_prefixed() {
    let root = module_root();
    for module_type in ["aws_kms", "aws_kms_replica"] {
        write_module(
            root.path(),
            module_type,
            "outputs:\n  - name: kms_arn\n    type: string\n  - name: alias\n    type: string\n",
        );
    }
    write_module(root.path(), "aws_kms_single", "outputs:\n  - name: key_id\n    type: string\n");
    let work = tempdir().unwrap();
    let env = environment(vec![
        Module::new("primary", "aws_kms"),
        Module::new("replica", "aws_kms_replica"),
        Module::new("single", "aws_kms_single"),
    ]);

    let plan = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap();
    let outputs = plan_file(&plan, "outputs.tf");
    assert!(outputs.contains("output \"primary_kms_arn\" { value = module.primary.kms_arn }"));
    assert!(outputs.contains("output \"replica_kms_arn\" { value = module.replica.kms_arn }"));
    assert!(outputs.contains("output \"primary_alias\" { value = module.primary.alias }"));
    assert!(outputs.contains("output \"key_id\" { value = module.single.key_id }"));
    assert!(!outputs.contains("output \"kms_arn\""));
}

#[test]
fn test_service_candidate_wins_over_environment() {
    let root = module_root();
    let work = tempdir().unwrap();
    let env = environment(vec![Module::new("base", "aws_base")]);
    let svc = service(vec![Module::new("svcnet", "aws_base"), Module::new("db", "aws_postgres")]);

    let plan = StackGenerator::new(&env, Some(&svc), options(root.path(), &work.path().join("svc")))
        .plan()
        .unwrap();
    let db = plan_file(&plan, "db.tf");
    assert!(db.contains("vpc_id = module.svcnet.vpc_id"));
    assert!(!db.contains("terraform_remote_state"));
    assert!(db.contains("depends_on = ["));
    assert_eq!(plan.module_ids, vec!["svcnet", "db"]);
}

#[test]
fn test_dotted_variable_name_rejected() {
    let root = module_root();
    let work = tempdir().unwrap();
    let mut env = environment(vec![Module::new("base", "aws_base")]);
    env.environments
        .get_mut("dev")
        .unwrap()
        .variables
        .insert("app.name".into(), "web".into());

    let err = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)))
        .plan()
        .unwrap_err();
    assert!(matches!(err, IacError::InvalidVariableName(ref name) if name == "app.name"));
    assert!(err.to_string().contains("app.name"));
}

#[test]
fn test_parent_out_dir_refused() {
    let root = module_root();
    let env = environment(vec![Module::new("base", "aws_base")]);

    let err = StackGenerator::new(&env, None, options(root.path(), Path::new("..")))
        .generate()
        .unwrap_err();
    assert!(matches!(err, IacError::UnsafeOutputDir(_)));
}

#[test]
fn test_file_input_cannot_replace_generated_file() {
    let root = module_root();
    let work = tempdir().unwrap();
    let spec_dir = work.path().join("spec");
    fs::create_dir_all(spec_dir.join("modules/aws_base")).unwrap();
    fs::write(spec_dir.join("outputs.tf"), "USER FILE").unwrap();
    fs::write(spec_dir.join("base.tf"), "USER FILE").unwrap();
    fs::write(spec_dir.join("modules/aws_base/main.tf"), "USER FILE").unwrap();

    for input in ["outputs.tf", "./base.tf", "modules/aws_base/main.tf"] {
        let env = environment(vec![Module::new("base", "aws_base").with_input("notes", input)]);
        let out = out_dir(&work);
        let err = StackGenerator::new(&env, None, options(root.path(), &out).with_spec_dir(&spec_dir))
            .generate()
            .unwrap_err();
        assert!(
            matches!(err, IacError::FileInputCollision { .. }),
            "{} should collide, got {}",
            input,
            err
        );
        assert!(!out.exists());
    }
}

#[test]
fn test_file_inputs_with_same_name_from_different_dirs() {
    let root = module_root();
    let work = tempdir().unwrap();
    let spec_dir = work.path().join("spec");
    fs::create_dir_all(&spec_dir).unwrap();
    for dir in ["a", "b"] {
        fs::create_dir_all(work.path().join(dir)).unwrap();
        fs::write(work.path().join(dir).join("values.yaml"), dir).unwrap();
    }

    let env = environment(vec![
        Module::new("base", "aws_base").with_input("values", "../a/values.yaml"),
        Module::new("topic", "aws_sns").with_input("values", "../b/values.yaml"),
    ]);
    let err = StackGenerator::new(&env, None, options(root.path(), &out_dir(&work)).with_spec_dir(&spec_dir))
        .plan()
        .unwrap_err();
    match err {
        IacError::FileInput { id, source, .. } => {
            assert_eq!(id, "topic");
            assert!(matches!(*source, IacError::FileInputCollision { ref rel, .. } if rel == "values.yaml"));
        }
        other => panic!("unexpected error: {}", other),
    }
}
