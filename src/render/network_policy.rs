//! Shared building blocks for `allow-tigera` tier policies

use crate::crd::calico::{
    Action, EntityRule, NetworkPolicy, NetworkPolicySpec, PolicyType, Port, Protocol, Rule,
    ServiceMatch,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Tier holding every policy the operator renders
pub const TIGERA_COMPONENT_TIER: &str = "allow-tigera";
/// Name prefix for policies in the component tier
pub const TIGERA_COMPONENT_POLICY_PREFIX: &str = "allow-tigera.";
/// Order given to component policies
pub const HIGH_PRECEDENCE_ORDER: f64 = 1.0;
/// Order of the per-namespace default deny policy
pub const DEFAULT_DENY_ORDER: f64 = 100.0;

pub const ES_GATEWAY_NAMESPACE: &str = "tigera-elasticsearch";
pub const ES_GATEWAY_NAME: &str = "tigera-secure-es-gateway";
pub const ES_GATEWAY_PORT: u16 = 5554;
pub const GUARDIAN_NAMESPACE: &str = "tigera-guardian";
pub const GUARDIAN_NAME: &str = "tigera-guardian";
pub const GUARDIAN_PORT: u16 = 8080;

/// `k8s-app in { 'a', 'b' }`
pub fn kubernetes_app_selector(apps: &[&str]) -> String {
    let quoted: Vec<String> = apps.iter().map(|a| format!("'{a}'")).collect();
    format!("k8s-app in {{ {} }}", quoted.join(", "))
}

/// Pods labelled `k8s-app == name` in the namespace `ns`, on the given ports.
pub fn create_entity_rule(namespace: &str, app: &str, ports: &[u16]) -> EntityRule {
    EntityRule {
        namespace_selector: format!("projectcalico.org/name == '{namespace}'"),
        selector: format!("k8s-app == '{app}'"),
        ports: ports.iter().copied().map(Port::from).collect(),
        ..Default::default()
    }
}

/// Source selector for pods labelled `k8s-app == name` in the namespace `ns`.
pub fn create_source_entity_rule(namespace: &str, app: &str) -> EntityRule {
    create_entity_rule(namespace, app, &[])
}

pub fn es_gateway_entity_rule() -> EntityRule {
    create_entity_rule(ES_GATEWAY_NAMESPACE, ES_GATEWAY_NAME, &[ES_GATEWAY_PORT])
}

pub fn es_gateway_source_entity_rule() -> EntityRule {
    create_source_entity_rule(ES_GATEWAY_NAMESPACE, ES_GATEWAY_NAME)
}

pub fn dex_entity_rule() -> EntityRule {
    create_entity_rule("tigera-dex", "tigera-dex", &[5556])
}

pub fn prometheus_source_entity_rule() -> EntityRule {
    create_source_entity_rule("tigera-prometheus", "calico-node-prometheus")
}

/// The API server reached through the `default/kubernetes` service.
pub fn kube_api_server_service_entity_rule() -> EntityRule {
    EntityRule {
        services: Some(ServiceMatch {
            name: "kubernetes".to_string(),
            namespace: "default".to_string(),
        }),
        ..Default::default()
    }
}

/// The API server by its well-known ports, for hosts where the service VIP is not used.
pub fn kube_api_server_entity_rule() -> EntityRule {
    EntityRule {
        selector: "(component == 'apiserver' && endpoints.projectcalico.org/serviceName == 'kubernetes')".to_string(),
        ports: vec![443.into(), 6443.into(), 12388.into()],
        ..Default::default()
    }
}

pub fn allow_tcp_to(destination: EntityRule) -> Rule {
    Rule {
        action: Action::Allow,
        protocol: Some(Protocol::Tcp),
        destination,
        ..Default::default()
    }
}

pub fn allow_tcp_from(source: EntityRule, ports: &[u16]) -> Rule {
    Rule {
        action: Action::Allow,
        protocol: Some(Protocol::Tcp),
        source,
        destination: EntityRule {
            ports: ports.iter().copied().map(Port::from).collect(),
            ..Default::default()
        },
    }
}

pub fn allow_all() -> Rule {
    Rule {
        action: Action::Allow,
        ..Default::default()
    }
}

/// Append rules allowing DNS lookups through the platform's resolver.
pub fn append_dns_egress_rules(mut rules: Vec<Rule>, openshift: bool) -> Vec<Rule> {
    if openshift {
        let dest = EntityRule {
            namespace_selector: "projectcalico.org/name == 'openshift-dns'".to_string(),
            selector: "dns.operator.openshift.io/daemonset-dns == 'default'".to_string(),
            ports: vec![5353.into()],
            ..Default::default()
        };
        rules.push(Rule {
            action: Action::Allow,
            protocol: Some(Protocol::Udp),
            destination: dest.clone(),
            ..Default::default()
        });
        rules.push(Rule {
            action: Action::Allow,
            protocol: Some(Protocol::Tcp),
            destination: dest,
            ..Default::default()
        });
    } else {
        rules.push(Rule {
            action: Action::Allow,
            protocol: Some(Protocol::Udp),
            destination: EntityRule {
                namespace_selector: "projectcalico.org/name == 'kube-system'".to_string(),
                selector: "k8s-app == 'kube-dns'".to_string(),
                ports: vec![53.into()],
                ..Default::default()
            },
            ..Default::default()
        });
    }
    rules
}

/// A high precedence policy in the component tier.
pub fn component_policy(
    name: &str,
    namespace: &str,
    selector: String,
    ingress: Vec<Rule>,
    egress: Vec<Rule>,
) -> NetworkPolicy {
    let mut types = Vec::new();
    if !ingress.is_empty() {
        types.push(PolicyType::Ingress);
    }
    if !egress.is_empty() {
        types.push(PolicyType::Egress);
    }
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: NetworkPolicySpec {
            tier: TIGERA_COMPONENT_TIER.to_string(),
            order: Some(HIGH_PRECEDENCE_ORDER),
            selector,
            types,
            ingress,
            egress,
            ..Default::default()
        },
    }
}

/// Deny everything not allowed by an earlier policy in the tier.
pub fn allow_tigera_default_deny(namespace: &str) -> NetworkPolicy {
    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(format!("{TIGERA_COMPONENT_POLICY_PREFIX}default-deny")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: NetworkPolicySpec {
            tier: TIGERA_COMPONENT_TIER.to_string(),
            order: Some(DEFAULT_DENY_ORDER),
            selector: "all()".to_string(),
            types: vec![PolicyType::Ingress, PolicyType::Egress],
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubernetes_app_selector() {
        assert_eq!(
            kubernetes_app_selector(&["fluentd-node", "fluentd-node-windows"]),
            "k8s-app in { 'fluentd-node', 'fluentd-node-windows' }"
        );
    }

    #[test]
    fn test_entity_rules() {
        let rule = es_gateway_entity_rule();
        assert_eq!(
            rule.namespace_selector,
            "projectcalico.org/name == 'tigera-elasticsearch'"
        );
        assert_eq!(rule.selector, "k8s-app == 'tigera-secure-es-gateway'");
        assert_eq!(rule.ports, vec![Port::Number(5554)]);
        assert!(es_gateway_source_entity_rule().ports.is_empty());
    }

    #[test]
    fn test_dns_egress_rules() {
        let rules = append_dns_egress_rules(vec![], false);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].protocol, Some(Protocol::Udp));
        assert_eq!(rules[0].destination.ports, vec![Port::Number(53)]);

        let rules = append_dns_egress_rules(vec![allow_all()], true);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[1].destination.ports, vec![Port::Number(5353)]);
        assert_eq!(rules[2].protocol, Some(Protocol::Tcp));
    }

    #[test]
    fn test_component_policy_types_follow_rules() {
        let policy = component_policy(
            "allow-tigera.test",
            "ns",
            "all()".to_string(),
            vec![],
            vec![allow_all()],
        );
        assert_eq!(policy.spec.types, vec![PolicyType::Egress]);
        assert_eq!(policy.spec.tier, TIGERA_COMPONENT_TIER);
        assert_eq!(policy.spec.order, Some(HIGH_PRECEDENCE_ORDER));
    }

    #[test]
    fn test_default_deny() {
        let policy = allow_tigera_default_deny("tigera-kibana");
        assert_eq!(policy.metadata.name.as_deref(), Some("allow-tigera.default-deny"));
        assert!(policy.spec.ingress.is_empty());
        assert_eq!(policy.spec.types.len(), 2);
    }
}
