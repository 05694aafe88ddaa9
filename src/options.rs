//! Operator-wide settings shared by every controller
//!
//! Built once in `main` from command-line flags and platform discovery.

use crate::crd::Provider;

/// Namespace the operator runs in when none is configured
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "tigera-operator";
/// Default DNS domain of the cluster
pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";
/// Field manager used for every server-side apply
pub const FIELD_MANAGER: &str = "tigera-operator";

/// Settings that do not change over the life of the process.
#[derive(Debug, Clone)]
pub struct OperatorOptions {
    /// Namespace holding user-supplied secrets and the operator CA
    pub operator_namespace: String,

    /// Cluster DNS domain, used for service FQDNs in certificates and URLs
    pub cluster_domain: String,

    /// Platform detected at startup
    pub detected_provider: Provider,

    /// Whether `policy/v1beta1` PodSecurityPolicy is served
    pub use_psp: bool,

    /// Whether the enterprise CRDs are installed
    pub enterprise_crds_exist: bool,
}

impl Default for OperatorOptions {
    fn default() -> Self {
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
            detected_provider: Provider::None,
            use_psp: false,
            enterprise_crds_exist: false,
        }
    }
}
