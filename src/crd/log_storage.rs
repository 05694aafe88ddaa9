//! LogStorage Custom Resource Definition
//!
//! Describes the Elasticsearch cluster (and its Kibana and curator
//! companions) that stores flow, DNS, audit and compliance data.

use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default StorageClass used for Elasticsearch volumes
pub const DEFAULT_STORAGE_CLASS_NAME: &str = "tigera-elasticsearch";

/// LogStorage is the Schema for the logstorages API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "LogStorage",
    status = "LogStorageStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogStorageSpec {
    /// Number and layout of Elasticsearch nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Nodes>,

    /// Index settings applied to every index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Indices>,

    /// Per-type retention, in days
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<Retention>,

    /// StorageClass for the Elasticsearch data volumes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_class_name: String,

    /// Node selector applied to Elasticsearch data nodes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_node_selector: BTreeMap<String, String>,

    /// Resource overrides for individual LogStorage components
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub component_resources: Vec<LogStorageComponentResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Nodes {
    /// Total number of Elasticsearch nodes
    #[serde(default)]
    pub count: i64,

    /// Node sets spreading `count` across distinct node groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_sets: Vec<NodeSet>,

    /// Resources for every Elasticsearch node, including `storage`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_requirements: Option<ResourceRequirements>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSet {
    /// Node label matches used for placement and shard allocation awareness
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub selection_attributes: Vec<NodeSetSelectionAttribute>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeSetSelectionAttribute {
    /// Elasticsearch node attribute name
    #[serde(default)]
    pub name: String,
    /// Kubernetes node label key
    #[serde(default)]
    pub node_label: String,
    /// Label value that nodes in this set must carry
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Indices {
    /// Number of replicas for each index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flows: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_reports: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_reports: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_logs: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bgp_logs: Option<i32>,
}

/// Components whose resources can be overridden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum LogStorageComponentName {
    #[serde(rename = "ECKOperator")]
    EckOperator,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogStorageComponentResource {
    pub component_name: LogStorageComponentName,
    pub resource_requirements: ResourceRequirements,
}

/// Compute resources, as quantity strings keyed by resource name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
}

impl ResourceRequirements {
    /// Convert into the core/v1 representation.
    pub fn to_k8s(&self) -> corev1::ResourceRequirements {
        let convert = |m: &BTreeMap<String, String>| {
            if m.is_empty() {
                None
            } else {
                Some(
                    m.iter()
                        .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                        .collect(),
                )
            }
        };
        corev1::ResourceRequirements {
            limits: convert(&self.limits),
            requests: convert(&self.requests),
            ..Default::default()
        }
    }
}

/// Status of the LogStorage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogStorageStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// Hash of the Elasticsearch CR's `status`, changes whenever ECK reports a transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elasticsearch_hash: Option<String>,

    /// Hash of the Kibana CR's `status`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kibana_hash: Option<String>,
}

impl LogStorageSpec {
    /// Fill unset fields with their defaults, returning the names of the fields changed.
    pub fn fill_defaults(&mut self) -> Vec<String> {
        let mut modified = Vec::new();

        let retention = self.retention.get_or_insert_with(Retention::default);
        let retention_defaults: [(&mut Option<i32>, i32, &str); 6] = [
            (&mut retention.flows, 8, "Retention.Flows"),
            (&mut retention.audit_reports, 91, "Retention.AuditReports"),
            (&mut retention.snapshots, 91, "Retention.Snapshots"),
            (
                &mut retention.compliance_reports,
                91,
                "Retention.ComplianceReports",
            ),
            (&mut retention.dns_logs, 8, "Retention.DNSLogs"),
            (&mut retention.bgp_logs, 8, "Retention.BGPLogs"),
        ];
        for (field, default, name) in retention_defaults {
            if field.is_none() {
                *field = Some(default);
                modified.push(name.to_string());
            }
        }

        let indices = self.indices.get_or_insert_with(Indices::default);
        if indices.replicas.is_none() {
            indices.replicas = Some(0);
            modified.push("Indices.Replicas".to_string());
        }

        if self.storage_class_name.is_empty() {
            self.storage_class_name = DEFAULT_STORAGE_CLASS_NAME.to_string();
            modified.push("StorageClassName".to_string());
        }

        let nodes = self.nodes.get_or_insert_with(Nodes::default);
        if nodes.count == 0 {
            nodes.count = 1;
            modified.push("Nodes.Count".to_string());
        }

        modified
    }

    /// Check the node count is positive and node set selection attributes are fully specified.
    pub fn validate(&self) -> Result<(), String> {
        let Some(nodes) = &self.nodes else {
            return Ok(());
        };
        if nodes.count < 1 {
            return Err(format!("nodes.count must be at least 1, got {}", nodes.count));
        }
        for node_set in &nodes.node_sets {
            for attr in &node_set.selection_attributes {
                if attr.name.is_empty() {
                    return Err("node set selection attribute was given without a name".into());
                }
                if attr.node_label.is_empty() {
                    return Err(format!(
                        "node set selection attribute {:?} was given without a node label",
                        attr.name
                    ));
                }
                if attr.value.is_empty() {
                    return Err(format!(
                        "node set selection attribute {:?} was given without a value",
                        attr.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Number of replicas per index, zero when unset.
    pub fn replicas(&self) -> i32 {
        self.indices
            .as_ref()
            .and_then(|i| i.replicas)
            .unwrap_or_default()
    }

    /// User resource overrides for Elasticsearch nodes.
    pub fn node_resources(&self) -> Option<&ResourceRequirements> {
        self.nodes
            .as_ref()
            .and_then(|n| n.resource_requirements.as_ref())
    }

    /// Resource override for a single component.
    pub fn component_resources(
        &self,
        name: LogStorageComponentName,
    ) -> Option<&ResourceRequirements> {
        self.component_resources
            .iter()
            .find(|c| c.component_name == name)
            .map(|c| &c.resource_requirements)
    }
}
