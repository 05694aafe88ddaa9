//! Lookups and gates shared by the controllers

use crate::crd::calico::LicenseKey;
use crate::crd::{
    APIServer, Installation, InstallationSpec, ManagementCluster, ManagementClusterConnection,
    ProductVariant, Provider, DEFAULT_INSTANCE_KEY, INSTALLATION_NAME,
};
use crate::discovery::api_kind_served;
use crate::error::{OperatorError, Result};
use crate::render::elasticsearch::{ClusterConfig, CLUSTER_CONFIG_CONFIGMAP_NAME};
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{Api, ListParams};
use kube::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Name of the singleton LicenseKey
pub const LICENSE_KEY_NAME: &str = "default";
/// License feature gating additional log stores
pub const EXPORT_LOGS_FEATURE: &str = "export-logs";
/// Tier that every component policy lives in
pub const ALLOW_TIGERA_TIER_NAME: &str = "allow-tigera";

const CALICO_GROUP_VERSION: &str = "projectcalico.org/v3";
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Set once a background dependency becomes usable
#[derive(Debug, Default)]
pub struct ReadyFlag(AtomicBool);

impl ReadyFlag {
    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn mark_as_ready(&self) {
        self.0.store(true, Ordering::Release);
    }
}

async fn wait_for_kind(client: Client, kind: &'static str, flag: Arc<ReadyFlag>) {
    loop {
        match api_kind_served(&client, CALICO_GROUP_VERSION, kind).await {
            Ok(true) => {
                info!(kind, "API is served, enabling dependent reconciliation");
                flag.mark_as_ready();
                return;
            }
            Ok(false) => debug!(kind, "API not served yet"),
            Err(e) => warn!(kind, error = %e, "Failed to check if API is served"),
        }
        tokio::time::sleep(WATCH_POLL_INTERVAL).await;
    }
}

/// Poll until LicenseKeys are served, then mark `flag` ready.
pub async fn wait_to_add_license_key_watch(client: Client, flag: Arc<ReadyFlag>) {
    wait_for_kind(client, "LicenseKey", flag).await
}

/// Poll until Tiers are served, then mark `flag` ready.
pub async fn wait_to_add_tier_watch(client: Client, flag: Arc<ReadyFlag>) {
    wait_for_kind(client, "Tier", flag).await
}

/// The variant installed so far and the effective Installation spec.
///
/// The computed spec from status is preferred since it has every default applied.
pub async fn get_installation(client: &Client) -> Result<(Option<ProductVariant>, InstallationSpec)> {
    let api: Api<Installation> = Api::all(client.clone());
    let installation = api
        .get_opt(INSTALLATION_NAME)
        .await?
        .ok_or_else(|| OperatorError::not_found("Installation"))?;
    Ok(effective_installation(installation))
}

fn effective_installation(installation: Installation) -> (Option<ProductVariant>, InstallationSpec) {
    let status = installation.status.unwrap_or_default();
    let spec = status.computed.unwrap_or(installation.spec);
    (status.variant, spec)
}

pub async fn fetch_license_key(client: &Client) -> Result<Option<LicenseKey>> {
    let api: Api<LicenseKey> = Api::all(client.clone());
    Ok(api.get_opt(LICENSE_KEY_NAME).await?)
}

pub fn is_feature_active(license: &LicenseKey, feature: &str) -> bool {
    license
        .status
        .as_ref()
        .is_some_and(|s| s.features.iter().any(|f| f == feature))
}

/// True when the APIServer CR exists and reports ready.
pub async fn is_api_server_ready(client: &Client) -> Result<bool> {
    let api: Api<APIServer> = Api::all(client.clone());
    for name in ["default", DEFAULT_INSTANCE_KEY] {
        if let Some(server) = api.get_opt(name).await? {
            return Ok(server.is_ready());
        }
    }
    Ok(false)
}

pub async fn get_elasticsearch_cluster_config(client: &Client, operator_namespace: &str) -> Result<ClusterConfig> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), operator_namespace);
    let cm = api.get_opt(CLUSTER_CONFIG_CONFIGMAP_NAME).await?.ok_or_else(|| {
        OperatorError::not_found(format!("ConfigMap {operator_namespace}/{CLUSTER_CONFIG_CONFIGMAP_NAME}"))
    })?;
    ClusterConfig::from_config_map(&cm)
}

/// The Installation's image pull secrets, read from the operator namespace.
pub async fn get_networking_pull_secrets(
    installation: &InstallationSpec,
    client: &Client,
    operator_namespace: &str,
) -> Result<Vec<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), operator_namespace);
    let mut secrets = Vec::with_capacity(installation.image_pull_secrets.len());
    for reference in &installation.image_pull_secrets {
        let secret = api.get_opt(&reference.name).await?.ok_or_else(|| {
            OperatorError::not_found(format!("pull secret {operator_namespace}/{}", reference.name))
        })?;
        secrets.push(secret);
    }
    Ok(secrets)
}

/// Elasticsearch user secrets by name. Any missing secret is a NotFound error.
pub async fn elasticsearch_secrets(
    client: &Client,
    names: &[&str],
    operator_namespace: &str,
) -> Result<Vec<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), operator_namespace);
    let mut secrets = Vec::with_capacity(names.len());
    for name in names {
        let secret = api
            .get_opt(name)
            .await?
            .ok_or_else(|| OperatorError::not_found(format!("secret {operator_namespace}/{name}")))?;
        secrets.push(secret);
    }
    Ok(secrets)
}

pub async fn get_secret(client: &Client, name: &str, namespace: &str) -> Result<Option<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    Ok(api.get_opt(name).await?)
}

pub async fn get_management_cluster_connection(client: &Client) -> Result<Option<ManagementClusterConnection>> {
    let api: Api<ManagementClusterConnection> = Api::all(client.clone());
    Ok(api.get_opt(DEFAULT_INSTANCE_KEY).await?)
}

pub async fn get_management_cluster(client: &Client) -> Result<Option<ManagementCluster>> {
    let api: Api<ManagementCluster> = Api::all(client.clone());
    Ok(api.get_opt(DEFAULT_INSTANCE_KEY).await?)
}

/// Whether any node is labelled `kubernetes.io/os=windows`.
pub async fn has_windows_nodes(client: &Client) -> Result<bool> {
    let api: Api<Node> = Api::all(client.clone());
    let nodes = api
        .list(&ListParams::default().labels("kubernetes.io/os=windows").limit(1))
        .await?;
    Ok(!nodes.items.is_empty())
}

/// A `proto://host:port` endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub protocol: String,
    pub host: String,
    pub port: String,
}

/// Split `proto://host:port`. The port must be given explicitly.
pub fn parse_endpoint(endpoint: &str) -> Result<Endpoint> {
    let invalid = |reason: String| OperatorError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };
    let url = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    let authority = endpoint
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or_default())
        .unwrap_or_default();

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid(format!("Invalid host: {authority}")))?;
    let has_port = authority
        .rsplit_once(':')
        .is_some_and(|(_, p)| !p.is_empty() && !p.ends_with(']'));
    let port = match url.port_or_known_default() {
        Some(port) if has_port => port,
        _ => return Err(invalid(format!("Invalid host: {authority}"))),
    };

    Ok(Endpoint {
        protocol: url.scheme().to_string(),
        host: host.to_string(),
        port: port.to_string(),
    })
}

/// Disagreement between the provider found at startup and the one the Installation names.
///
/// Either side being unset is not a mismatch.
pub fn provider_mismatch(detected: Provider, installation: &InstallationSpec) -> Option<String> {
    let configured = installation.kubernetes_provider;
    if detected == Provider::None || configured == Provider::None || detected == configured {
        return None;
    }
    Some(format!(
        "Installation spec.kubernetesProvider '{configured}' does not match auto-detected value '{detected}'"
    ))
}
