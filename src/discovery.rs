//! Platform discovery
//!
//! Identifies the Kubernetes distribution and which optional APIs the API
//! server serves. Each probe is split into a query and a pure decision so the
//! heuristics can be exercised without a cluster.

use crate::crd::Provider;
use crate::error::{is_kube_not_found, OperatorError, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{APIGroupList, APIResourceList};
use kube::api::{Api, ListParams};
use kube::Client;
use tracing::{debug, info};

/// Kinds whose presence in `operator.tigera.io/v1` means the enterprise CRDs are installed
const ENTERPRISE_KINDS: [&str; 9] = [
    "LogCollector",
    "LogStorage",
    "AmazonCloudIntegration",
    "Compliance",
    "IntrusionDetection",
    "ApplicationLayer",
    "Monitor",
    "ManagementCluster",
    "ManagementClusterConnection",
];

const DOCKER_UCP_LABEL_PREFIX: &str = "com.docker.ucp";
const MASTER_NODE_LABEL: &str = "node-role.kubernetes.io/master";
const EKS_CONFIGMAP: &str = "eks-certificates-controller";
const RKE2_CONFIGMAP: &str = "rke2";

/// Detect the platform from API groups, node labels and well-known ConfigMaps.
pub async fn auto_discover_provider(client: &Client) -> Result<Provider> {
    let mut detected = Vec::new();

    let groups = client.list_api_groups().await.map_err(|e| {
        OperatorError::Discovery(format!("Failed to check provider based on API groups: {e}"))
    })?;
    detected.extend(providers_from_groups(&groups));

    if is_docker_ee(client).await.map_err(|e| {
        OperatorError::Discovery(format!("Failed to check if Docker EE is the provider: {e}"))
    })? {
        detected.push(Provider::DockerEe);
    }

    if kube_system_configmap_exists(client, EKS_CONFIGMAP)
        .await
        .map_err(|e| {
            OperatorError::Discovery(format!("Failed to check if EKS is the provider: {e}"))
        })?
    {
        detected.push(Provider::Eks);
    }

    if kube_system_configmap_exists(client, RKE2_CONFIGMAP)
        .await
        .map_err(|e| {
            OperatorError::Discovery(format!("Failed to check if RKE2 is the provider: {e}"))
        })?
    {
        detected.push(Provider::Rke2);
    }

    let provider = select_provider(detected)?;
    info!(provider = %provider, "Auto-discovered provider");
    Ok(provider)
}

/// True when any enterprise kind is served under `operator.tigera.io/v1`.
pub async fn requires_enterprise_crds(client: &Client) -> Result<bool> {
    let resources = client
        .list_api_group_resources("operator.tigera.io/v1")
        .await?;
    Ok(has_enterprise_kind(&resources))
}

/// True when `policy/v1beta1` serves PodSecurityPolicy. A missing group version is `false`.
pub async fn supports_pod_security_policies(client: &Client) -> Result<bool> {
    match client.list_api_group_resources("policy/v1beta1").await {
        Ok(resources) => Ok(serves_kind(&resources, "PodSecurityPolicy")),
        Err(e) if is_kube_not_found(&e) => {
            debug!("policy/v1beta1 is not served");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// True when the given group version serves `kind`. A missing group version is `false`.
pub async fn api_kind_served(client: &Client, group_version: &str, kind: &str) -> Result<bool> {
    match client.list_api_group_resources(group_version).await {
        Ok(resources) => Ok(serves_kind(&resources, kind)),
        Err(e) if is_kube_not_found(&e) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

async fn is_docker_ee(client: &Client) -> Result<bool> {
    let nodes: Api<Node> = Api::all(client.clone());
    let masters = nodes
        .list(&ListParams::default().labels(MASTER_NODE_LABEL))
        .await?;
    Ok(masters.items.iter().any(|n| {
        n.metadata
            .labels
            .as_ref()
            .is_some_and(|labels| has_docker_ucp_label(labels.keys()))
    }))
}

async fn kube_system_configmap_exists(client: &Client, name: &str) -> Result<bool> {
    let cms: Api<ConfigMap> = Api::namespaced(client.clone(), "kube-system");
    Ok(cms.get_opt(name).await?.is_some())
}

fn providers_from_groups(groups: &APIGroupList) -> Vec<Provider> {
    groups
        .groups
        .iter()
        .filter_map(|g| match g.name.as_str() {
            "config.openshift.io" => Some(Provider::OpenShift),
            "networking.gke.io" => Some(Provider::Gke),
            _ => None,
        })
        .collect()
}

fn has_docker_ucp_label<'a>(mut keys: impl Iterator<Item = &'a String>) -> bool {
    keys.any(|k| k.starts_with(DOCKER_UCP_LABEL_PREFIX))
}

fn select_provider(detected: Vec<Provider>) -> Result<Provider> {
    match detected.as_slice() {
        [] => Ok(Provider::None),
        [one] => Ok(*one),
        many => {
            let names: Vec<String> = many.iter().map(ToString::to_string).collect();
            Err(OperatorError::Discovery(format!(
                "Failed to assert provider caused by detection of more than one. Detected providers: [{}]",
                names.join(" ")
            )))
        }
    }
}

fn serves_kind(resources: &APIResourceList, kind: &str) -> bool {
    resources.resources.iter().any(|r| r.kind == kind)
}

fn has_enterprise_kind(resources: &APIResourceList) -> bool {
    resources
        .resources
        .iter()
        .any(|r| ENTERPRISE_KINDS.contains(&r.kind.as_str()))
}
