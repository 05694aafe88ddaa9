//! `policy/v1beta1` PodSecurityPolicy
//!
//! The type was removed from the Kubernetes API, so it is declared here for
//! clusters that still serve it.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "policy",
    version = "v1beta1",
    kind = "PodSecurityPolicy",
    plural = "podsecuritypolicies",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PodSecurityPolicySpec {
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_privilege_escalation: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_drop_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_ports: Vec<HostPortRange>,
    #[serde(default)]
    pub host_ipc: bool,
    #[serde(default)]
    pub host_pid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_host_paths: Vec<AllowedHostPath>,
    pub run_as_user: StrategyOptions,
    pub se_linux: StrategyOptions,
    pub supplemental_groups: StrategyOptions,
    pub fs_group: StrategyOptions,
    #[serde(default)]
    pub read_only_root_filesystem: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostPortRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedHostPath {
    pub path_prefix: String,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
}

/// Rule plus optional ID ranges, shared by the user, group and SELinux strategies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyOptions {
    pub rule: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranges: Vec<IdRange>,
}

impl StrategyOptions {
    pub fn rule(rule: &str) -> Self {
        Self {
            rule: rule.to_string(),
            ranges: Vec::new(),
        }
    }

    pub fn must_run_as(min: i64, max: i64) -> Self {
        Self {
            rule: "MustRunAs".to_string(),
            ranges: vec![IdRange { min, max }],
        }
    }
}

impl PodSecurityPolicySpec {
    /// Restricted baseline that components loosen as needed.
    pub fn base() -> Self {
        Self {
            privileged: false,
            allow_privilege_escalation: Some(false),
            required_drop_capabilities: vec!["ALL".to_string()],
            volumes: [
                "configMap",
                "emptyDir",
                "projected",
                "secret",
                "downwardAPI",
                "persistentVolumeClaim",
            ]
            .map(String::from)
            .to_vec(),
            host_ports: vec![HostPortRange { min: 0, max: 65535 }],
            run_as_user: StrategyOptions::rule("MustRunAsNonRoot"),
            se_linux: StrategyOptions::rule("RunAsAny"),
            supplemental_groups: StrategyOptions::must_run_as(1, 65535),
            fs_group: StrategyOptions::must_run_as(1, 65535),
            ..Default::default()
        }
    }
}
