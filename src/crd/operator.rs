//! Other `operator.tigera.io/v1` resources the log controllers read or write

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// APIServer, ready once `status.state` is `Ready`
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "APIServer",
    status = "ApiServerStatus",
    schema = "disabled"
)]
pub struct ApiServerSpec {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiServerStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// Present on clusters that other clusters connect to
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "ManagementCluster",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagementClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Present on managed clusters. Logs are shipped through guardian instead of a local store.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "ManagementClusterConnection",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ManagementClusterConnectionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub management_cluster_addr: Option<String>,
}

/// Per-component health reported by the operator
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "TigeraStatus",
    status = "TigeraStatusStatus",
    schema = "disabled"
)]
pub struct TigeraStatusSpec {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TigeraStatusStatus {
    #[serde(default)]
    pub conditions: Vec<TigeraStatusCondition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TigeraStatusCondition {
    pub r#type: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `status.state` value written once a component is fully available
pub const TIGERA_STATUS_READY: &str = "Ready";

impl APIServer {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.state.as_deref())
            == Some(TIGERA_STATUS_READY)
    }
}
