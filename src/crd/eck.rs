//! Elastic Cloud on Kubernetes resources
//!
//! The operator renders these for the ECK operator to act on and reads back
//! their health to surface in LogStorage status.

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PodTemplateSpec};
use kube::CustomResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Annotation ECK uses to pin the operator version managing a resource
pub const CONTROLLER_VERSION_ANNOTATION: &str = "common.k8s.elastic.co/controller-version";

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "elasticsearch.k8s.elastic.co",
    version = "v1",
    kind = "Elasticsearch",
    namespaced,
    status = "ElasticsearchStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchSpec {
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub node_sets: Vec<NodeSet>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElasticsearchStatus {
    /// green, yellow, red or unknown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    /// Ready, ApplyingChanges, MigratingData, Invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSet {
    pub name: String,
    pub count: i32,
    /// Contents of `elasticsearch.yml` for the nodes in this set
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_claim_templates: Vec<PersistentVolumeClaim>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    #[serde(default)]
    pub tls: TlsOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsOptions {
    #[serde(default)]
    pub certificate: SecretRef,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
}

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[kube(
    group = "kibana.k8s.elastic.co",
    version = "v1",
    kind = "Kibana",
    namespaced,
    status = "KibanaStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KibanaSpec {
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    pub count: i32,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub elasticsearch_ref: ObjectSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_template: Option<PodTemplateSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KibanaStatus {
    /// green or red
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association_status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSelector {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

pub const ELASTICSEARCH_HEALTH_GREEN: &str = "green";
pub const ELASTICSEARCH_READY_PHASE: &str = "Ready";
pub const KIBANA_HEALTH_GREEN: &str = "green";
pub const ASSOCIATION_ESTABLISHED: &str = "Established";

impl Elasticsearch {
    pub fn is_green(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.health.as_deref())
            == Some(ELASTICSEARCH_HEALTH_GREEN)
    }

    /// ECK has finished applying the current spec
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(ELASTICSEARCH_READY_PHASE)
    }
}

impl Kibana {
    pub fn is_green(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.health.as_deref())
            == Some(KIBANA_HEALTH_GREEN)
    }

    /// Kibana is connected to its Elasticsearch cluster
    pub fn is_associated(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.association_status.as_deref())
            == Some(ASSOCIATION_ESTABLISHED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::Resource;

    #[test]
    fn test_elasticsearch_api_metadata() {
        assert_eq!(Elasticsearch::api_version(&()), "elasticsearch.k8s.elastic.co/v1");
        assert_eq!(Elasticsearch::plural(&()), "elasticsearches");
        assert_eq!(Kibana::kind(&()), "Kibana");
    }

    #[test]
    fn test_health_from_status() {
        let es: Elasticsearch = serde_json::from_value(serde_json::json!({
            "apiVersion": "elasticsearch.k8s.elastic.co/v1",
            "kind": "Elasticsearch",
            "metadata": {"name": "tigera-secure", "namespace": "tigera-elasticsearch"},
            "spec": {"version": "7.17.0", "nodeSets": []},
            "status": {"health": "green", "phase": "Ready"}
        }))
        .unwrap();
        assert!(es.is_green());
        assert!(es.is_ready());

        let kb = Kibana::new("tigera-secure", KibanaSpec::default());
        assert!(!kb.is_green());
        assert!(!kb.is_associated());
    }

    #[test]
    fn test_node_set_config_serializes_inline() {
        let mut config = Map::new();
        config.insert("node.data".to_string(), Value::from("true"));
        let ns = NodeSet {
            name: "es".to_string(),
            count: 1,
            config,
            ..Default::default()
        };
        let json = serde_json::to_value(&ns).unwrap();
        assert_eq!(json["config"]["node.data"], "true");
        assert!(json.get("podTemplate").is_none());
    }
}
