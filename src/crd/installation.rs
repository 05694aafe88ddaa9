//! Installation resource (read-only input)
//!
//! Only the subset of the core networking installation that log components
//! depend on is modelled here. The operator never writes this object.

use k8s_openapi::api::core::v1::{LocalObjectReference, Toleration};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the singleton Installation
pub const INSTALLATION_NAME: &str = "default";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "Installation",
    status = "InstallationStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct InstallationSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<ProductVariant>,

    /// Registry prefix for component images, e.g. `quay.io/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    #[serde(default)]
    pub kubernetes_provider: Provider,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub control_plane_node_selector: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub control_plane_tolerations: Vec<Toleration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_replicas: Option<i32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_pull_secrets: Vec<LocalObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fips_mode: Option<FipsMode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationStatus {
    /// Variant that has been fully installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<ProductVariant>,

    /// Fully defaulted spec as computed by the core controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<InstallationSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductVariant {
    Calico,
    TigeraSecureEnterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FipsMode {
    Enabled,
    Disabled,
}

/// Managed Kubernetes platform the cluster runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Provider {
    #[default]
    #[serde(rename = "")]
    None,
    #[serde(rename = "AKS")]
    Aks,
    #[serde(rename = "DockerEnterprise")]
    DockerEe,
    #[serde(rename = "EKS")]
    Eks,
    #[serde(rename = "GKE")]
    Gke,
    OpenShift,
    #[serde(rename = "RKE2")]
    Rke2,
}

impl Provider {
    pub fn is_openshift(self) -> bool {
        self == Provider::OpenShift
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Provider::None => "",
            Provider::Aks => "AKS",
            Provider::DockerEe => "DockerEnterprise",
            Provider::Eks => "EKS",
            Provider::Gke => "GKE",
            Provider::OpenShift => "OpenShift",
            Provider::Rke2 => "RKE2",
        };
        f.write_str(name)
    }
}

impl InstallationSpec {
    pub fn is_fips_enabled(&self) -> bool {
        self.fips_mode == Some(FipsMode::Enabled)
    }

    pub fn is_openshift(&self) -> bool {
        self.kubernetes_provider.is_openshift()
    }

    pub fn registry(&self) -> &str {
        self.registry.as_deref().unwrap_or_default()
    }
}
