//! Shared stack scaffolding: `versions.tf`, `providers.tf`, `secrets.tf`
//! and `state.tf`.

use std::collections::{BTreeMap, BTreeSet};

use hcl::expr::Expression;
use hcl::{Block, Body};
use pltf_spec::Value;

use crate::backend::BackendConfig;
use crate::error::{IacError, IacResult};
use crate::expr::literal_expr;
use crate::hclgen::{attr, call, ident, object, render, string, traversal};
use crate::provider::{
    CloudProvider, HELM_PROVIDER_VERSION, KUBERNETES_PROVIDER_VERSION, TERRAFORM_REQUIRED_VERSION,
};

/// Module types that need the kubernetes provider.
pub const KUBERNETES_MODULE_TYPES: &[&str] = &["aws_k8s_service", "gcp_k8s_service"];
/// Module types that need the helm provider.
pub const HELM_MODULE_TYPES: &[&str] = &["aws_k8s_base", "gcp_k8s_base", "helm_chart"];

/// Optional providers a stack requires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderNeeds {
    pub kubernetes: bool,
    pub helm: bool,
}

impl ProviderNeeds {
    pub fn for_types<'a>(types: impl IntoIterator<Item = &'a str>) -> Self {
        let mut needs = Self::default();
        for module_type in types {
            needs.kubernetes |= KUBERNETES_MODULE_TYPES.contains(&module_type);
            needs.helm |= HELM_MODULE_TYPES.contains(&module_type);
        }
        needs
    }

    pub fn any(&self) -> bool {
        self.kubernetes || self.helm
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterKind {
    Eks,
    Gke,
}

impl ClusterKind {
    /// Cluster module types in lookup priority order.
    pub const ALL: [ClusterKind; 2] = [ClusterKind::Eks, ClusterKind::Gke];

    pub fn module_type(&self) -> &'static str {
        match self {
            ClusterKind::Eks => "aws_eks",
            ClusterKind::Gke => "gcp_gke",
        }
    }
}

/// Connection details for the kubernetes and helm providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRef {
    pub kind: ClusterKind,
    pub cluster_name: String,
    pub host: String,
    pub ca_data: String,
}

impl ClusterRef {
    /// `output_ref` maps a cluster output name to a traversal.
    pub fn new(kind: ClusterKind, output_ref: impl Fn(&str) -> String) -> Self {
        match kind {
            ClusterKind::Eks => Self {
                kind,
                cluster_name: output_ref("k8s_cluster_name"),
                host: output_ref("k8s_endpoint"),
                ca_data: output_ref("k8s_ca_data"),
            },
            ClusterKind::Gke => Self {
                kind,
                cluster_name: output_ref("cluster_name"),
                host: output_ref("endpoint"),
                ca_data: output_ref("cluster_ca_certificate"),
            },
        }
    }

    fn auth_block(&self) -> IacResult<Block> {
        Ok(match self.kind {
            ClusterKind::Eks => Block::builder("data")
                .add_label("aws_eks_cluster_auth")
                .add_label("this")
                .add_attribute(("name", traversal(&self.cluster_name)?))
                .build(),
            ClusterKind::Gke => Block::builder("data")
                .add_label("google_client_config")
                .add_label("default")
                .build(),
        })
    }

    fn token(&self) -> &'static str {
        match self.kind {
            ClusterKind::Eks => "data.aws_eks_cluster_auth.this.token",
            ClusterKind::Gke => "data.google_client_config.default.access_token",
        }
    }

    fn connection(&self) -> IacResult<Vec<(&'static str, Expression)>> {
        Ok(vec![
            ("host", traversal(&self.host)?),
            (
                "cluster_ca_certificate",
                call("base64decode", vec![traversal(&self.ca_data)?])?,
            ),
            ("token", traversal(self.token())?),
        ])
    }
}

fn provider_requirement(source: &str, version: &str) -> Expression {
    object([("source", string(source)), ("version", string(version))])
}

/// Render `versions.tf`: terraform settings, backend and merged locals.
///
/// Every local name must be an HCL identifier.
pub fn versions_tf(
    provider: CloudProvider,
    needs: ProviderNeeds,
    backend: &BackendConfig,
    state_key: &str,
    locals: &BTreeMap<String, Value>,
) -> IacResult<String> {
    let mut required = Block::builder("required_providers").add_attribute((
        provider.provider_name(),
        provider_requirement(provider.provider_source(), provider.provider_version()),
    ));
    if needs.kubernetes {
        required = required.add_attribute((
            "kubernetes",
            provider_requirement("hashicorp/kubernetes", KUBERNETES_PROVIDER_VERSION),
        ));
    }
    if needs.helm {
        required = required.add_attribute(("helm", provider_requirement("hashicorp/helm", HELM_PROVIDER_VERSION)));
    }

    let terraform = Block::builder("terraform")
        .add_attribute(("required_version", TERRAFORM_REQUIRED_VERSION))
        .add_block(required.build())
        .add_block(backend.backend_block(state_key))
        .build();

    let mut local_block = Block::builder("locals");
    for (name, value) in locals {
        let local = attr(name, literal_expr(value)).map_err(|_| IacError::InvalidVariableName(name.clone()))?;
        local_block = local_block.add_attribute(local);
    }

    render(&Body::builder().add_block(terraform).add_block(local_block.build()).build())
}

/// Render `providers.tf`. Kubernetes and helm providers need a cluster.
pub fn providers_tf(
    provider: CloudProvider,
    region: &str,
    account: &str,
    needs: ProviderNeeds,
    cluster: Option<&ClusterRef>,
) -> IacResult<String> {
    let cluster = match (needs.any(), cluster) {
        (true, None) => return Err(IacError::MissingCluster),
        (true, Some(cluster)) => Some(cluster),
        (false, _) => None,
    };

    let core = Block::builder("provider").add_label(provider.provider_name());
    let core = match provider {
        CloudProvider::Aws => {
            let tags = call(
                "merge",
                vec![
                    object([
                        ("Environment", traversal("local.environment")?),
                        ("Owner", string("PlatformTeam")),
                        ("terraform", string("true")),
                    ]),
                    traversal("local.global_tags")?,
                ],
            )?;
            core.add_attribute(("region", region))
                .add_block(Block::builder("default_tags").add_attribute(("tags", tags)).build())
        }
        CloudProvider::Gcp => core.add_attribute(("project", account)).add_attribute(("region", region)),
        CloudProvider::Azure => core
            .add_attribute(("subscription_id", account))
            .add_block(Block::builder("features").build()),
    };

    let mut body = Body::builder().add_block(core.build());

    if let Some(cluster) = cluster {
        body = body.add_block(cluster.auth_block()?);
        if needs.kubernetes {
            let kubernetes = cluster
                .connection()?
                .into_iter()
                .fold(Block::builder("provider").add_label("kubernetes"), |block, setting| {
                    block.add_attribute(setting)
                });
            body = body.add_block(kubernetes.build());
        }
        if needs.helm {
            body = body.add_block(
                Block::builder("provider")
                    .add_label("helm")
                    .add_attribute(("kubernetes", object(cluster.connection()?)))
                    .build(),
            );
        }
    }

    render(&body.build())
}

/// Render `secrets.tf`, or `None` when there are no secrets.
pub fn secrets_tf(secrets: &BTreeSet<String>) -> IacResult<Option<String>> {
    if secrets.is_empty() {
        return Ok(None);
    }
    let mut body = Body::builder();
    for name in secrets {
        ident(name).map_err(|_| IacError::InvalidVariableName(name.clone()))?;
        body = body.add_block(
            Block::builder("variable")
                .add_label(name.as_str())
                .add_attribute(("sensitive", true))
                .build(),
        );
    }
    render(&body.build()).map(Some)
}

/// Render `state.tf` pointing at the parent environment's state.
pub fn state_tf(backend: &BackendConfig, env_state_key: &str) -> IacResult<String> {
    render(&Body::builder().add_block(backend.remote_state_block(env_state_key)).build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendKind;
    use crate::hclgen::squash;

    fn s3() -> BackendConfig {
        BackendConfig {
            kind: BackendKind::S3,
            bucket: "acme-example-tfstate".into(),
            region: "us-east-1".into(),
            container: String::new(),
            resource_group: String::new(),
            profile: String::new(),
        }
    }

    fn versions(locals: &BTreeMap<String, Value>) -> IacResult<String> {
        versions_tf(
            CloudProvider::Aws,
            ProviderNeeds::default(),
            &s3(),
            "env/example/dev/terraform.tfstate",
            locals,
        )
    }

    #[test]
    fn test_provider_needs() {
        let needs = ProviderNeeds::for_types(["aws_base", "helm_chart"]);
        assert!(needs.helm && !needs.kubernetes);
        assert!(!ProviderNeeds::for_types(["aws_eks"]).any());
    }

    #[test]
    fn test_versions_tf() {
        let locals = BTreeMap::from([
            ("region".to_string(), Value::from("us-east-1")),
            ("cluster_name".to_string(), Value::from("dev-cluster")),
        ]);
        let rendered = versions(&locals).unwrap();
        assert!(hcl::parse(&rendered).is_ok());
        let flat = squash(&rendered);
        assert!(flat.starts_with(
            "terraform { required_version = \">= 1.5.7\" required_providers { aws = {"
        ));
        assert!(flat.contains("source = \"hashicorp/aws\""));
        assert!(flat.contains("version = \"~> 6.0\""));
        assert!(flat.contains(
            "backend \"s3\" { bucket = \"acme-example-tfstate\" key = \"env/example/dev/terraform.tfstate\" region = \"us-east-1\" } }"
        ));
        assert!(flat.ends_with("locals { cluster_name = \"dev-cluster\" region = \"us-east-1\" }"));
    }

    #[test]
    fn test_versions_tf_rejects_dotted_local() {
        let locals = BTreeMap::from([
            ("app.name".to_string(), Value::from("web")),
            ("region".to_string(), Value::from("us-east-1")),
        ]);
        let err = versions(&locals).unwrap_err();
        assert!(matches!(err, IacError::InvalidVariableName(ref name) if name == "app.name"));
        assert!(err.to_string().contains("\"app.name\""));
    }

    #[test]
    fn test_aws_default_tags() {
        let rendered =
            providers_tf(CloudProvider::Aws, "us-east-1", "1111", ProviderNeeds::default(), None).unwrap();
        assert!(hcl::parse(&rendered).is_ok());
        let flat = squash(&rendered);
        assert!(flat.starts_with("provider \"aws\" { region = \"us-east-1\" default_tags { tags = merge("));
        assert!(flat.contains("Environment = local.environment"));
        assert!(flat.contains("Owner = \"PlatformTeam\""));
        assert!(flat.contains("local.global_tags)"));
    }

    #[test]
    fn test_cluster_required() {
        let needs = ProviderNeeds {
            kubernetes: true,
            helm: false,
        };
        let err = providers_tf(CloudProvider::Aws, "us-east-1", "1111", needs, None).unwrap_err();
        assert!(matches!(err, IacError::MissingCluster));
    }

    #[test]
    fn test_eks_providers() {
        let cluster = ClusterRef::new(ClusterKind::Eks, |out| format!("module.eks.{}", out));
        let needs = ProviderNeeds {
            kubernetes: true,
            helm: true,
        };
        let rendered = providers_tf(CloudProvider::Aws, "us-east-1", "1111", needs, Some(&cluster)).unwrap();
        assert!(hcl::parse(&rendered).is_ok());
        let flat = squash(&rendered);
        assert!(flat.contains("data \"aws_eks_cluster_auth\" \"this\" { name = module.eks.k8s_cluster_name }"));
        assert!(flat.contains(
            "provider \"kubernetes\" { host = module.eks.k8s_endpoint cluster_ca_certificate = base64decode(module.eks.k8s_ca_data) token = data.aws_eks_cluster_auth.this.token }"
        ));
        assert!(flat.contains("provider \"helm\" { kubernetes = { host = module.eks.k8s_endpoint"));
    }

    #[test]
    fn test_gke_and_azure() {
        let cluster = ClusterRef::new(ClusterKind::Gke, |out| {
            format!("data.terraform_remote_state.env.outputs.{}", out)
        });
        let needs = ProviderNeeds {
            kubernetes: false,
            helm: true,
        };
        let rendered = providers_tf(CloudProvider::Gcp, "europe-west1", "proj", needs, Some(&cluster)).unwrap();
        let flat = squash(&rendered);
        assert!(flat.contains("project = \"proj\""));
        assert!(flat.contains("data \"google_client_config\" \"default\" {"));
        assert!(flat.contains("token = data.google_client_config.default.access_token"));

        let azure =
            providers_tf(CloudProvider::Azure, "westeurope", "sub-1", ProviderNeeds::default(), None).unwrap();
        let flat = squash(&azure);
        assert!(flat.starts_with("provider \"azurerm\" { subscription_id = \"sub-1\" features {"));
    }

    #[test]
    fn test_secrets_tf() {
        assert!(secrets_tf(&BTreeSet::new()).unwrap().is_none());
        let secrets = BTreeSet::from(["db_password".to_string(), "api_key".to_string()]);
        let rendered = secrets_tf(&secrets).unwrap().unwrap();
        assert_eq!(
            squash(&rendered),
            "variable \"api_key\" { sensitive = true } variable \"db_password\" { sensitive = true }"
        );

        let bad = BTreeSet::from(["9lives".to_string()]);
        assert!(matches!(secrets_tf(&bad), Err(IacError::InvalidVariableName(_))));
    }
}
