//! Elasticsearch client settings shared by components that ship or read logs

use crate::certificates::TRUSTED_CERT_BUNDLE_MOUNT_PATH;
use crate::error::{OperatorError, Result};
use crate::render::{
    annotation_hash, env_var, os_path, secret_env_var, secrets_annotation_hash, OsType,
};
use k8s_openapi::api::core::v1::{ConfigMap, Container, EnvVar, PodTemplateSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// ConfigMap in the operator namespace describing the Elasticsearch cluster
pub const CLUSTER_CONFIG_CONFIGMAP_NAME: &str = "tigera-secure-elasticsearch";
/// Public certificate of the Elasticsearch gateway
pub const PUBLIC_CERT_SECRET: &str = "tigera-secure-es-gateway-http-certs-public";

pub const ELASTICSEARCH_NAMESPACE: &str = "tigera-elasticsearch";
pub const ES_GATEWAY_SERVICE_NAME: &str = "tigera-secure-es-gateway-http";
pub const ELASTICSEARCH_DEFAULT_PORT: u16 = 9200;

const CLUSTER_NAME_KEY: &str = "clusterName";
const REPLICAS_KEY: &str = "replicas";
const SHARDS_KEY: &str = "shards";
const FLOW_SHARDS_KEY: &str = "flowShards";

const CONFIG_HASH_ANNOTATION: &str = "hash.operator.tigera.io/elasticsearch-configmap";
const SECRETS_HASH_ANNOTATION: &str = "hash.operator.tigera.io/elasticsearch-secrets";

/// Name and index layout of the Elasticsearch cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    cluster_name: String,
    replicas: i32,
    shards: i32,
    flow_shards: i32,
}

impl ClusterConfig {
    pub fn new(cluster_name: &str, replicas: i32, shards: i32, flow_shards: i32) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            replicas,
            shards,
            flow_shards,
        }
    }

    /// Parse the cluster ConfigMap. `flowShards` falls back to `shards`.
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self> {
        let name = cm.metadata.name.clone().unwrap_or_default();
        let data = cm.data.clone().unwrap_or_default();
        let field = |key: &str| {
            data.get(key).cloned().ok_or_else(|| OperatorError::MissingField {
                kind: "ConfigMap",
                name: name.clone(),
                field: key.to_string(),
            })
        };
        let number = |key: &str, raw: String| {
            raw.parse::<i32>().map_err(|_| {
                OperatorError::config(format!(
                    "ConfigMap {name:?} field {key:?} is not an integer: {raw:?}"
                ))
            })
        };

        let cluster_name = field(CLUSTER_NAME_KEY)?;
        let replicas = number(REPLICAS_KEY, field(REPLICAS_KEY)?)?;
        let shards = number(SHARDS_KEY, field(SHARDS_KEY)?)?;
        let flow_shards = match data.get(FLOW_SHARDS_KEY) {
            Some(raw) => number(FLOW_SHARDS_KEY, raw.clone())?,
            None => shards,
        };
        Ok(Self::new(&cluster_name, replicas, shards, flow_shards))
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn replicas(&self) -> i32 {
        self.replicas
    }

    pub fn shards(&self) -> i32 {
        self.shards
    }

    pub fn flow_shards(&self) -> i32 {
        self.flow_shards
    }

    fn data(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CLUSTER_NAME_KEY.to_string(), self.cluster_name.clone()),
            (REPLICAS_KEY.to_string(), self.replicas.to_string()),
            (SHARDS_KEY.to_string(), self.shards.to_string()),
            (FLOW_SHARDS_KEY.to_string(), self.flow_shards.to_string()),
        ])
    }

    pub fn config_map(&self, namespace: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(CLUSTER_CONFIG_CONFIGMAP_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(self.data()),
            ..Default::default()
        }
    }

    pub fn annotation_hash(&self) -> String {
        annotation_hash(&self.data())
    }
}

/// Environment telling a client how to reach and authenticate to Elasticsearch.
pub fn decorate_env_vars(
    cluster_name: &str,
    user_secret: &str,
    cluster_domain: &str,
    os: OsType,
) -> Vec<EnvVar> {
    vec![
        env_var(
            "ELASTIC_HOST",
            format!("{ES_GATEWAY_SERVICE_NAME}.{ELASTICSEARCH_NAMESPACE}.svc.{cluster_domain}"),
        ),
        env_var("ELASTIC_PORT", ELASTICSEARCH_DEFAULT_PORT.to_string()),
        env_var("ELASTIC_ACCESS_MODE", "serviceuser".to_string()),
        env_var("ELASTIC_SSL_VERIFY", "true".to_string()),
        env_var("ELASTIC_INDEX_SUFFIX", cluster_name.to_string()),
        secret_env_var("ELASTIC_USER", user_secret, "username"),
        secret_env_var("ELASTIC_USERNAME", user_secret, "username"),
        secret_env_var("ELASTIC_PASSWORD", user_secret, "password"),
        env_var("ELASTIC_CA", os_path(os, TRUSTED_CERT_BUNDLE_MOUNT_PATH)),
    ]
}

/// Append the Elasticsearch client environment to a container.
pub fn container_decorate(
    mut container: Container,
    cluster_name: &str,
    user_secret: &str,
    cluster_domain: &str,
    os: OsType,
) -> Container {
    container
        .env
        .get_or_insert_with(Vec::new)
        .extend(decorate_env_vars(cluster_name, user_secret, cluster_domain, os));
    container
}

/// Annotate a pod template with hashes of the cluster config and user secrets.
pub fn decorate_annotations(
    mut template: PodTemplateSpec,
    config: &ClusterConfig,
    secrets: &[Secret],
) -> PodTemplateSpec {
    let annotations = template
        .metadata
        .get_or_insert_with(ObjectMeta::default)
        .annotations
        .get_or_insert_with(BTreeMap::new);
    annotations.insert(CONFIG_HASH_ANNOTATION.to_string(), config.annotation_hash());
    let refs: Vec<&Secret> = secrets.iter().collect();
    annotations.insert(SECRETS_HASH_ANNOTATION.to_string(), secrets_annotation_hash(&refs));
    template
}
