//! AWS IAM augmentations.
//!
//! Modules linking to an `aws_iam_role` or `aws_iam_user` grant that
//! principal access to themselves; the access level picks the actions.

use std::collections::BTreeMap;

use super::{AugmentContext, Augmentation, KubernetesTrust, PolicyDocument, PolicyStatement};
use crate::provider::CloudProvider;

pub const IAM_ROLE: &str = "aws_iam_role";
pub const IAM_USER: &str = "aws_iam_user";
pub const EKS: &str = "aws_eks";

const ALLOWED_SERVICES_INPUT: &str = "allowed_k8s_services";
const IRSA_NAMESPACE_VAR: &str = "irsa_namespace";
const WILDCARD: &str = "*";

/// A link from a resource module to a principal.
#[derive(Debug, Clone)]
struct Binding<'a> {
    access: String,
    module_id: &'a str,
    module_type: &'a str,
}

pub fn build(ctx: &AugmentContext<'_>) -> BTreeMap<String, Augmentation> {
    let mut result = BTreeMap::new();
    if ctx.provider != CloudProvider::Aws {
        return result;
    }

    let eks = ctx.first_of_type(EKS);

    for principal in ctx
        .modules
        .iter()
        .filter(|m| m.module_type == IAM_ROLE || m.module_type == IAM_USER)
    {
        let bindings = collect_bindings(ctx, &principal.id);
        if bindings.is_empty() {
            continue;
        }

        let statements: Vec<PolicyStatement> =
            bindings.iter().filter_map(|b| statement_for(ctx, b)).collect();

        let trusts = match eks {
            Some(eks) if principal.module_type == IAM_ROLE => {
                let allowed = principal
                    .inputs
                    .get(ALLOWED_SERVICES_INPUT)
                    .map(|v| v.string_items())
                    .unwrap_or_default();
                build_trusts(ctx, &eks.id, &allowed)
            }
            _ => Vec::new(),
        };

        if statements.is_empty() && trusts.is_empty() {
            continue;
        }

        result.insert(
            principal.id.clone(),
            Augmentation {
                iam_policy: (!statements.is_empty()).then(|| PolicyDocument::new(statements)),
                kubernetes_trusts: trusts,
                source_module: Some(principal.id.clone()),
            },
        );
    }

    result
}

fn collect_bindings<'a>(ctx: &AugmentContext<'a>, principal_id: &str) -> Vec<Binding<'a>> {
    let mut bindings = Vec::new();
    for module in ctx.modules {
        for (access, target) in module.links.pairs() {
            if target == principal_id {
                bindings.push(Binding {
                    access: access.to_lowercase(),
                    module_id: &module.id,
                    module_type: &module.module_type,
                });
            }
        }
    }
    bindings
}

fn statement_for(ctx: &AugmentContext<'_>, binding: &Binding<'_>) -> Option<PolicyStatement> {
    let (actions, output, child) = match binding.module_type {
        "aws_s3" => (s3_actions(&binding.access), "bucket_arn", Some("/*")),
        "aws_sqs" => (sqs_actions(&binding.access), "queue_arn", None),
        "aws_sns" => (sns_actions(&binding.access), "topic_arn", None),
        "aws_dynamodb" => (dynamodb_actions(&binding.access), "table_arn", Some("/index/*")),
        "aws_ses" => (ses_actions(&binding.access), "identity_arn", None),
        _ => return None,
    };
    if actions.is_empty() {
        return None;
    }

    let arn = format!("${{{}}}", ctx.output_ref(binding.module_id, output));
    let mut resources = vec![arn.clone()];
    if let Some(suffix) = child {
        resources.push(format!("{}{}", arn, suffix));
    }

    Some(PolicyStatement::allow(
        actions.iter().map(|a| a.to_string()).collect(),
        resources,
    ))
}

fn read_write(access: &str, read: &[&'static str], write: &[&'static str]) -> Vec<&'static str> {
    match access {
        "read" => read.to_vec(),
        "write" | "readwrite" | "rw" | "admin" => read.iter().chain(write).copied().collect(),
        _ => Vec::new(),
    }
}

fn s3_actions(access: &str) -> Vec<&'static str> {
    read_write(
        access,
        &["s3:GetObject", "s3:ListBucket"],
        &["s3:PutObject", "s3:DeleteObject"],
    )
}

fn sqs_actions(access: &str) -> Vec<&'static str> {
    read_write(
        access,
        &[
            "sqs:ReceiveMessage",
            "sqs:GetQueueAttributes",
            "sqs:ListQueueTags",
            "sqs:ChangeMessageVisibility",
        ],
        &["sqs:SendMessage", "sqs:DeleteMessage"],
    )
}

fn sns_actions(access: &str) -> Vec<&'static str> {
    match access {
        "read" | "write" | "readwrite" | "rw" | "publish" | "admin" => vec!["sns:Publish"],
        _ => Vec::new(),
    }
}

fn dynamodb_actions(access: &str) -> Vec<&'static str> {
    read_write(
        access,
        &[
            "dynamodb:BatchGetItem",
            "dynamodb:DescribeTable",
            "dynamodb:GetItem",
            "dynamodb:Query",
            "dynamodb:Scan",
        ],
        &[
            "dynamodb:BatchWriteItem",
            "dynamodb:DeleteItem",
            "dynamodb:PutItem",
            "dynamodb:UpdateItem",
        ],
    )
}

fn ses_actions(access: &str) -> Vec<&'static str> {
    match access {
        "write" | "readwrite" | "rw" | "send" | "admin" => vec!["ses:SendEmail", "ses:SendRawEmail"],
        _ => Vec::new(),
    }
}

fn build_trusts(ctx: &AugmentContext<'_>, eks_id: &str, allowed: &[&str]) -> Vec<KubernetesTrust> {
    let open_id_url = ctx.output_ref(eks_id, "k8s_openid_provider_url");
    let open_id_arn = ctx.output_ref(eks_id, "k8s_openid_provider_arn");
    let trust = |namespace: &str, service_name: &str| KubernetesTrust {
        open_id_url: open_id_url.clone(),
        open_id_arn: open_id_arn.clone(),
        service_name: service_name.to_string(),
        namespace: namespace.to_string(),
    };

    let default_namespace = ctx.string_var(IRSA_NAMESPACE_VAR, "default");
    let trusts: Vec<KubernetesTrust> = allowed
        .iter()
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('/') {
            Some((ns, sa)) if !ns.trim().is_empty() && !sa.trim().is_empty() && !sa.contains('/') => {
                trust(ns, sa)
            }
            _ => trust(&default_namespace, entry),
        })
        .collect();

    if trusts.is_empty() {
        return vec![trust(WILDCARD, WILDCARD)];
    }
    trusts
}
