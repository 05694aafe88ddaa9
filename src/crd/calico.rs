//! `projectcalico.org/v3` resources
//!
//! Tiers and license keys are read to gate reconciliation; network policies
//! are rendered into the `allow-tigera` tier for every log component.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Policy tier. Log policies wait for `allow-tigera` before rendering.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "Tier",
    schema = "disabled"
)]
pub struct TierSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
}

/// Product license. Only the status is consulted.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "LicenseKey",
    status = "LicenseKeyStatus",
    schema = "disabled"
)]
pub struct LicenseKeySpec {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub certificate: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseKeyStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nodes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    /// Features unlocked by the license, e.g. `export-logs`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

/// Namespaced Calico network policy
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "NetworkPolicy",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPolicySpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub types: Vec<PolicyType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ingress: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub egress: Vec<Rule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyType {
    Ingress,
    Egress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Action {
    #[default]
    Allow,
    Deny,
    Log,
    Pass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<Protocol>,
    #[serde(default, skip_serializing_if = "EntityRule::is_empty")]
    pub source: EntityRule,
    #[serde(default, skip_serializing_if = "EntityRule::is_empty")]
    pub destination: EntityRule,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nets: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace_selector: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_ports: Vec<Port>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub services: Option<ServiceMatch>,
}

impl EntityRule {
    pub fn is_empty(&self) -> bool {
        self == &EntityRule::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMatch {
    pub name: String,
    pub namespace: String,
}

/// A single port or a named port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Port {
    Number(u16),
    Named(String),
}

impl From<u16> for Port {
    fn from(p: u16) -> Self {
        Port::Number(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_omits_empty_entities() {
        let rule = Rule {
            action: Action::Deny,
            protocol: Some(Protocol::Tcp),
            destination: EntityRule {
                selector: "k8s-app == 'tigera-guardian'".to_string(),
                not_ports: vec![8080.into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["action"], "Deny");
        assert_eq!(json["protocol"], "TCP");
        assert!(json.get("source").is_none());
        assert_eq!(json["destination"]["notPorts"][0], 8080);
    }

    #[test]
    fn test_license_status_features() {
        let status: LicenseKeyStatus =
            serde_json::from_str(r#"{"features": ["export-logs", "egress-access-control"]}"#)
                .unwrap();
        assert!(status.features.iter().any(|f| f == "export-logs"));
    }

    #[test]
    fn test_port_accepts_numbers_and_names() {
        let ports: Vec<Port> = serde_json::from_str(r#"[53, "dns"]"#).unwrap();
        assert_eq!(ports, vec![Port::Number(53), Port::Named("dns".to_string())]);
    }
}
