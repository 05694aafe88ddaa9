//! Component rendering
//!
//! A [`Component`] turns configuration into the set of Kubernetes objects
//! that should exist (and the set that should not). Renderers are pure: all
//! cluster reads happen in the controllers before a component is built, so
//! every renderer can be tested by inspecting its output.

pub mod certificate_management;
pub mod elasticsearch;
pub mod fluentd;
pub mod log_storage;
pub mod network_policy;

use crate::error::Result;
use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, LocalObjectReference, Namespace, ObjectFieldSelector, ResourceQuota,
    ResourceQuotaSpec, ScopeSelector, ScopedResourceSelectorRequirement, Secret,
    SecretKeySelector, ServiceAccount,
};
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::{ApiResource, GroupVersionKind};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

use crate::crd::Provider;

/// Priority class for per-node agents
pub const NODE_PRIORITY_CLASS_NAME: &str = "system-node-critical";
/// Resource quota allowing critical pods on platforms that restrict them
pub const TIGERA_CRITICAL_RESOURCE_QUOTA_NAME: &str = "tigera-critical-pods";

/// Operating system a component's workloads are scheduled onto
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Linux,
    Windows,
    Any,
}

impl OsType {
    /// Value of the `kubernetes.io/os` node label, `None` when any OS is fine.
    pub fn node_label(self) -> Option<&'static str> {
        match self {
            OsType::Linux => Some("linux"),
            OsType::Windows => Some("windows"),
            OsType::Any => None,
        }
    }
}

/// Host path as seen by a container on the given OS.
pub fn os_path(os: OsType, path: &str) -> String {
    match os {
        OsType::Windows => format!("c:{path}"),
        _ => path.to_string(),
    }
}

/// Pod Security Standard enforced on a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodSecurityStandard {
    Baseline,
    Privileged,
    Restricted,
}

impl fmt::Display for PodSecurityStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PodSecurityStandard::Baseline => "baseline",
            PodSecurityStandard::Privileged => "privileged",
            PodSecurityStandard::Restricted => "restricted",
        })
    }
}

/// A rendered object of any kind: its API coordinates plus the JSON body to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedObject {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: Option<String>,
    pub data: serde_json::Value,
}

impl RenderedObject {
    /// Erase the type of a statically-known Kubernetes object.
    pub fn new<K>(obj: &K) -> Result<Self>
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let api_resource = ApiResource::erase::<K>(&());
        let mut data = serde_json::to_value(obj)?;
        if let Some(map) = data.as_object_mut() {
            map.insert(
                "apiVersion".to_string(),
                serde_json::Value::String(api_resource.api_version.clone()),
            );
            map.insert(
                "kind".to_string(),
                serde_json::Value::String(api_resource.kind.clone()),
            );
        }
        Ok(Self {
            name: obj.meta().name.clone().unwrap_or_default(),
            namespace: obj.meta().namespace.clone(),
            api_resource,
            data,
        })
    }

    /// Object reference for a kind known only by group/version/kind, used for deletions.
    pub fn reference(gvk: &GroupVersionKind, plural: &str, name: &str, namespace: Option<&str>) -> Self {
        let api_resource = ApiResource::from_gvk_with_plural(gvk, plural);
        let data = serde_json::json!({
            "apiVersion": api_resource.api_version,
            "kind": api_resource.kind,
            "metadata": {"name": name, "namespace": namespace},
        });
        Self {
            api_resource,
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            data,
        }
    }

    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    /// Decode the body back into a typed object.
    pub fn decode<K: DeserializeOwned>(&self) -> Result<K> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects.
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Objects to create or update, then objects to delete.
pub type RenderedObjects = (Vec<RenderedObject>, Vec<RenderedObject>);

/// A renderable unit of the product.
pub trait Component: Send + Sync {
    /// Resolve the images this component deploys.
    fn resolve_images(&mut self) -> Result<()>;

    /// Objects to create or update, and objects to delete.
    fn objects(&self) -> Result<RenderedObjects>;

    /// Whether the component's prerequisites are in place.
    fn ready(&self) -> bool;

    /// OS the component's workloads must be scheduled onto.
    fn supported_os(&self) -> OsType;
}

/// Namespace labelled with a Pod Security Standard, plus platform specific metadata.
pub fn create_namespace(name: &str, provider: Provider, pss: PodSecurityStandard) -> Namespace {
    let mut labels = BTreeMap::from([
        ("name".to_string(), name.to_string()),
        (
            "pod-security.kubernetes.io/enforce".to_string(),
            pss.to_string(),
        ),
        (
            "pod-security.kubernetes.io/enforce-version".to_string(),
            "latest".to_string(),
        ),
    ]);
    let mut annotations = BTreeMap::new();

    match provider {
        Provider::OpenShift => {
            labels.insert("openshift.io/run-level".to_string(), "0".to_string());
            annotations.insert("openshift.io/node-selector".to_string(), String::new());
            annotations.insert(
                "security.openshift.io/scc.podSecurityLabelSync".to_string(),
                "false".to_string(),
            );
        }
        Provider::Aks => {
            labels.insert("control-plane".to_string(), "true".to_string());
        }
        _ => {}
    }

    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Copies of the given secrets placed into `namespace`, stripped of server-set metadata.
pub fn copy_secrets_to_namespace(namespace: &str, secrets: &[Secret]) -> Vec<Secret> {
    secrets
        .iter()
        .map(|s| Secret {
            metadata: ObjectMeta {
                name: s.metadata.name.clone(),
                namespace: Some(namespace.to_string()),
                labels: s.metadata.labels.clone(),
                ..Default::default()
            },
            data: s.data.clone(),
            string_data: s.string_data.clone(),
            type_: s.type_.clone(),
            ..Default::default()
        })
        .collect()
}

/// `imagePullSecrets` entries for the given secrets.
pub fn pull_secret_references(secrets: &[Secret]) -> Option<Vec<LocalObjectReference>> {
    if secrets.is_empty() {
        return None;
    }
    Some(
        secrets
            .iter()
            .map(|s| LocalObjectReference {
                name: s.metadata.name.clone().unwrap_or_default(),
            })
            .collect(),
    )
}

/// Erase each object in turn.
pub fn render_all<K>(objs: &[K]) -> Result<Vec<RenderedObject>>
where
    K: Resource<DynamicType = ()> + Serialize,
{
    objs.iter().map(RenderedObject::new).collect()
}

/// Hex SHA-256 of the JSON encoding of `value`, for pod template annotations.
pub fn annotation_hash<T: Serialize + ?Sized>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Hash over the data of a set of secrets, stable across map ordering.
pub fn secrets_annotation_hash(secrets: &[&Secret]) -> String {
    let data: Vec<_> = secrets.iter().map(|s| &s.data).collect();
    annotation_hash(&data)
}

/// Quota admitting node-critical pods into a namespace.
pub fn critical_pods_resource_quota(namespace: &str) -> ResourceQuota {
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(TIGERA_CRITICAL_RESOURCE_QUOTA_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(BTreeMap::from([(
                "pods".to_string(),
                Quantity("1000".to_string()),
            )])),
            scope_selector: Some(ScopeSelector {
                match_expressions: Some(vec![ScopedResourceSelectorRequirement {
                    scope_name: "PriorityClass".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![NODE_PRIORITY_CLASS_NAME.to_string()]),
                }]),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

/// Env var read from a key of a Secret.
pub fn secret_env_var(name: &str, secret: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Env var taken from the pod's own fields, e.g. `spec.nodeName`.
pub fn field_env_var(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                api_version: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service_account(name: &str, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn policy_rule(api_groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(strings(api_groups)),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..Default::default()
    }
}

/// Permission to use the named PodSecurityPolicy.
pub fn psp_use_rule(psp_name: &str) -> PolicyRule {
    PolicyRule {
        resource_names: Some(vec![psp_name.to_string()]),
        ..policy_rule(&["policy"], &["podsecuritypolicies"], &["use"])
    }
}

pub fn cluster_role(name: &str, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
        ..Default::default()
    }
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
        api_group: None,
    }
}

/// Bind a ClusterRole to a service account.
pub fn cluster_role_binding(name: &str, role: &str, sa_name: &str, sa_namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(sa_name, sa_namespace)]),
    }
}

pub fn role(name: &str, namespace: &str, rules: Vec<PolicyRule>) -> Role {
    Role {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        rules: Some(rules),
    }
}

/// Bind a Role in `namespace` to a service account that may live elsewhere.
pub fn role_binding(
    name: &str,
    namespace: &str,
    role: &str,
    sa_name: &str,
    sa_namespace: &str,
) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: role.to_string(),
        },
        subjects: Some(vec![service_account_subject(sa_name, sa_namespace)]),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    #[test]
    fn test_rendered_object_carries_type_information() {
        let ns = create_namespace("tigera-fluentd", Provider::None, PodSecurityStandard::Privileged);
        let obj = RenderedObject::new(&ns).unwrap();
        assert_eq!(obj.kind(), "Namespace");
        assert_eq!(obj.name, "tigera-fluentd");
        assert!(obj.namespace.is_none());
        assert_eq!(obj.data["apiVersion"], "v1");
        assert_eq!(
            obj.data["metadata"]["labels"]["pod-security.kubernetes.io/enforce"],
            "privileged"
        );
        let back: Namespace = obj.decode().unwrap();
        assert_eq!(back, ns);
    }

    #[test]
    fn test_openshift_namespace_metadata() {
        let ns = create_namespace("tigera-kibana", Provider::OpenShift, PodSecurityStandard::Baseline);
        let labels = ns.metadata.labels.unwrap();
        assert_eq!(labels["openshift.io/run-level"], "0");
        let annotations = ns.metadata.annotations.unwrap();
        assert_eq!(annotations["openshift.io/node-selector"], "");
    }

    #[test]
    fn test_copy_secrets_to_namespace() {
        let original = Secret {
            metadata: ObjectMeta {
                name: Some("pull-secret".to_string()),
                namespace: Some("tigera-operator".to_string()),
                resource_version: Some("42".to_string()),
                uid: Some("abc".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                ".dockerconfigjson".to_string(),
                ByteString(b"{}".to_vec()),
            )])),
            type_: Some("kubernetes.io/dockerconfigjson".to_string()),
            ..Default::default()
        };
        let copies = copy_secrets_to_namespace("tigera-fluentd", &[original.clone()]);
        assert_eq!(copies.len(), 1);
        let copy = &copies[0];
        assert_eq!(copy.metadata.namespace.as_deref(), Some("tigera-fluentd"));
        assert!(copy.metadata.resource_version.is_none());
        assert!(copy.metadata.uid.is_none());
        assert_eq!(copy.data, original.data);
        assert_eq!(copy.type_, original.type_);

        let refs = pull_secret_references(&copies).unwrap();
        assert_eq!(refs[0].name, "pull-secret");
        assert!(pull_secret_references(&[]).is_none());
    }

    #[test]
    fn test_annotation_hash_is_stable() {
        let a = annotation_hash(&BTreeMap::from([("flow", "x"), ("dns", "y")]));
        let b = annotation_hash(&BTreeMap::from([("dns", "y"), ("flow", "x")]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, annotation_hash(&BTreeMap::from([("flow", "z")])));
    }

    #[test]
    fn test_critical_pods_quota() {
        let rq = critical_pods_resource_quota("tigera-fluentd");
        let spec = rq.spec.unwrap();
        let expr = &spec.scope_selector.unwrap().match_expressions.unwrap()[0];
        assert_eq!(expr.values.as_ref().unwrap(), &vec!["system-node-critical".to_string()]);
    }

    #[test]
    fn test_psp_use_rule() {
        let rule = psp_use_rule("tigera-fluentd");
        assert_eq!(rule.verbs, vec!["use"]);
        assert_eq!(rule.resource_names.unwrap(), vec!["tigera-fluentd"]);
        assert_eq!(rule.api_groups.unwrap(), vec!["policy"]);
    }

    #[test]
    fn test_role_binding_crosses_namespaces() {
        let rb = role_binding(
            "packetcapture-api-role-binding",
            "tigera-fluentd",
            "packetcapture-api-role",
            "tigera-manager",
            "tigera-manager",
        );
        let subject = &rb.subjects.unwrap()[0];
        assert_eq!(subject.namespace.as_deref(), Some("tigera-manager"));
        assert_eq!(rb.metadata.namespace.as_deref(), Some("tigera-fluentd"));
        assert_eq!(rb.role_ref.kind, "Role");
    }

    #[test]
    fn test_reference_for_deletion() {
        let gvk = GroupVersionKind::gvk("kibana.k8s.elastic.co", "v1", "Kibana");
        let obj = RenderedObject::reference(&gvk, "kibanas", "tigera-secure", Some("tigera-kibana"));
        assert_eq!(obj.key(), "tigera-kibana/tigera-secure");
        assert_eq!(obj.data["apiVersion"], "kibana.k8s.elastic.co/v1");
    }
}
