//! Elasticsearch, Kibana and curator
//!
//! The operator does not run Elasticsearch itself. It deploys the ECK
//! operator and hands it `Elasticsearch` and `Kibana` resources, then runs
//! the curator as a CronJob that trims indices by age and disk usage.
//!
//! Three rendering modes exist:
//! - LogStorage being deleted: only the ECK resources are removed, so the
//!   finalizer can be released once ECK has cleaned up after them.
//! - managed cluster: logs leave through guardian, so only the gateway
//!   service is rendered, as an ExternalName pointing at guardian.
//! - otherwise the full stack is rendered.

use crate::certificates::{KeyPair, TrustedBundle};
use crate::crd::calico::{EntityRule, NetworkPolicy};
use crate::crd::eck::{
    Elasticsearch, ElasticsearchSpec, HttpConfig, Kibana, KibanaSpec, NodeSet, ObjectSelector,
    SecretRef, TlsOptions, CONTROLLER_VERSION_ANNOTATION,
};
use crate::crd::policy::{PodSecurityPolicy, PodSecurityPolicySpec, StrategyOptions};
use crate::crd::{InstallationSpec, LogStorage, LogStorageComponentName, Provider};
use crate::error::{OperatorError, Result};
use crate::images;
use crate::quantity::{
    memory_quantity_to_jvm_heap_size, override_pvc_requirements, override_resource_requirements,
};
use crate::render::elasticsearch::{
    container_decorate, ClusterConfig, ELASTICSEARCH_DEFAULT_PORT, ELASTICSEARCH_NAMESPACE,
    ES_GATEWAY_SERVICE_NAME,
};
use crate::render::network_policy::{
    allow_tcp_from, allow_tcp_to, append_dns_egress_rules, component_policy, create_source_entity_rule,
    dex_entity_rule, es_gateway_entity_rule, es_gateway_source_entity_rule,
    kube_api_server_entity_rule, kube_api_server_service_entity_rule, kubernetes_app_selector,
    allow_tigera_default_deny, GUARDIAN_NAME, GUARDIAN_NAMESPACE,
};
use crate::render::{
    cluster_role, cluster_role_binding, copy_secrets_to_namespace, create_namespace, env_var,
    field_env_var, policy_rule, psp_use_rule, pull_secret_references, render_all, role,
    role_binding, secret_env_var, secrets_annotation_hash, service_account, Component, OsType,
    PodSecurityStandard, RenderedObject, RenderedObjects,
};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{
    Affinity, ConfigMap, Container, EnvVar, ExecAction, HTTPGetAction, NodeAffinity,
    NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodAffinityTerm, PodAntiAffinity, PodSecurityContext, PodSpec,
    PodTemplateSpec, Probe, ResourceRequirements, Secret, SecurityContext, Service, ServiceSpec,
    VolumeResourceRequirements, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

pub const ECK_OPERATOR_NAME: &str = "elastic-operator";
pub const ECK_OPERATOR_NAMESPACE: &str = "tigera-eck-operator";
/// ConfigMap in which ECK reports the license level it runs under
pub const ECK_LICENSE_CONFIG_MAP_NAME: &str = "elastic-licensing";
pub const ECK_OPERATOR_POLICY_NAME: &str = "allow-tigera.elastic-operator-access";
pub const ECK_ENTERPRISE_TRIAL: &str = "eck-trial-license";

/// Key pair served by the Elasticsearch HTTP endpoint
pub const TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET: &str = "tigera-secure-internal-elasticsearch-cert";
/// Key pair served by Kibana
pub const TIGERA_KIBANA_CERT_SECRET: &str = "tigera-secure-kibana-cert";

pub const ELASTICSEARCH_NAME: &str = "tigera-secure";
pub const ELASTICSEARCH_SERVICE_NAME: &str = "tigera-secure-es-http";
pub const ELASTICSEARCH_INTERNAL_PORT: u16 = 9300;
/// Credentials of the built-in `elastic` user, generated by ECK
pub const ELASTICSEARCH_ADMIN_USER_SECRET: &str = "tigera-secure-es-elastic-user";
pub const ELASTICSEARCH_CURATOR_USER_SECRET: &str = "tigera-ee-curator-elasticsearch-access";
pub const ELASTICSEARCH_POLICY_NAME: &str = "allow-tigera.elasticsearch-access";
pub const ELASTICSEARCH_INTERNAL_POLICY_NAME: &str = "allow-tigera.elasticsearch-internal";

pub const KIBANA_NAME: &str = "tigera-secure";
pub const KIBANA_NAMESPACE: &str = "tigera-kibana";
pub const KIBANA_BASE_PATH: &str = "tigera-kibana";
pub const KIBANA_SERVICE_NAME: &str = "tigera-secure-kb-http";
pub const KIBANA_POLICY_NAME: &str = "allow-tigera.kibana-access";
pub const KIBANA_PORT: u16 = 5601;

pub const DEFAULT_ELASTICSEARCH_CLUSTER_NAME: &str = "cluster";
pub const DEFAULT_ELASTIC_STORAGE_GI: u32 = 10;

pub const ES_CURATOR_NAME: &str = "elastic-curator";
pub const ES_CURATOR_SERVICE_ACCOUNT: &str = "tigera-elastic-curator";

pub const OIDC_USERS_CONFIG_MAP_NAME: &str = "tigera-known-oidc-users";
pub const OIDC_USERS_ES_SECRET_NAME: &str = "tigera-oidc-users-elasticsearch-credentials";
pub const ES_MANAGER_ROLE: &str = "es-manager";
pub const ES_MANAGER_ROLE_BINDING: &str = "es-manager";

/// Keystore password, only used in FIPS mode
pub const ELASTICSEARCH_KEYSTORE_SECRET: &str = "tigera-secure-elasticsearch-keystore";
pub const ELASTICSEARCH_KEYSTORE_ENV_NAME: &str = "KEYSTORE_PASSWORD";

const ES_CURATOR_POLICY_NAME: &str = "allow-tigera.allow-elastic-curator";
const ELASTICSEARCH_SERVICE_ACCOUNT: &str = "tigera-elasticsearch";
const KIBANA_SERVICE_ACCOUNT: &str = "tigera-kibana";
const MANAGER_NAMESPACE: &str = "tigera-manager";
const MANAGER_SERVICE_ACCOUNT: &str = "tigera-manager";

const KIBANA_TLS_HASH_ANNOTATION: &str = "hash.operator.tigera.io/kb-secrets";
const ELASTICSEARCH_TLS_HASH_ANNOTATION: &str = "hash.operator.tigera.io/es-secrets";
const ELASTICSEARCH_KEYSTORE_HASH_ANNOTATION: &str = "hash.operator.tigera.io/keystore-password";
const ECK_LICENSE_LEVEL_KEY: &str = "eck_license_level";

const TIME_FILTER: &str = "_g=(time:(from:now-24h,to:now))";
const FLOWS_DASHBOARD_NAME: &str = "Tigera Secure EE Flow Logs";

/// Disk usage after which the curator removes the oldest indices
const MAX_TOTAL_STORAGE_PERCENT: i32 = 80;
/// Share of the disk flow and DNS indices may use before the curator trims them
const MAX_LOGS_STORAGE_PERCENT: i32 = 70;

const RUN_AS_USER_ID: i64 = 10001;
const RUN_AS_GROUP_ID: i64 = 10001;

const DEFAULT_JAVA_OPTS: &str = "-Xms2G -Xmx2G";
const PVC_TEMPLATE_NAME: &str = "elasticsearch-data";

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// License level ECK reports in its licensing ConfigMap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElasticsearchLicenseType {
    Basic,
    Enterprise,
    EnterpriseTrial,
    Unknown,
}

impl ElasticsearchLicenseType {
    pub fn from_config_map(cm: Option<&ConfigMap>) -> Self {
        let level = cm
            .and_then(|cm| cm.data.as_ref())
            .and_then(|data| data.get(ECK_LICENSE_LEVEL_KEY));
        match level.map(String::as_str) {
            Some("basic") => Self::Basic,
            Some("enterprise") => Self::Enterprise,
            Some("enterprise_trial") => Self::EnterpriseTrial,
            _ => Self::Unknown,
        }
    }

    /// Whether the enterprise trial secret should be (re)applied.
    pub fn wants_trial(self) -> bool {
        matches!(self, Self::EnterpriseTrial | Self::Unknown)
    }
}

/// Inputs for a LogStorage render
#[derive(Debug, Clone)]
pub struct ElasticsearchConfiguration {
    /// Absent when only the managed-cluster objects are rendered
    pub log_storage: Option<LogStorage>,
    pub installation: InstallationSpec,
    /// A ManagementClusterConnection exists
    pub managed_cluster: bool,
    /// Current ECK resources, targets of deletion
    pub elasticsearch: Option<Elasticsearch>,
    pub kibana: Option<Kibana>,
    pub cluster_config: Option<ClusterConfig>,
    /// ECK generated `elastic` user credentials, copied to the operator namespace
    pub elasticsearch_user_secret: Option<Secret>,
    pub elasticsearch_key_pair: Option<KeyPair>,
    pub kibana_key_pair: Option<KeyPair>,
    pub pull_secrets: Vec<Secret>,
    pub curator_secrets: Vec<Secret>,
    /// Existing gateway and Kibana services, removed when left over from managed mode
    pub es_service: Option<Service>,
    pub kb_service: Option<Service>,
    pub cluster_domain: String,
    pub operator_namespace: String,
    pub trusted_bundle: Option<TrustedBundle>,
    pub apply_trial: bool,
    pub keystore_secret: Option<Secret>,
    pub use_psp: bool,
}

pub struct ElasticsearchComponent {
    cfg: ElasticsearchConfiguration,
    es_image: String,
    eck_operator_image: String,
    kibana_image: String,
    curator_image: String,
}

pub fn log_storage(cfg: ElasticsearchConfiguration) -> ElasticsearchComponent {
    ElasticsearchComponent {
        cfg,
        es_image: String::new(),
        eck_operator_image: String::new(),
        kibana_image: String::new(),
        curator_image: String::new(),
    }
}

impl Component for ElasticsearchComponent {
    fn resolve_images(&mut self) -> Result<()> {
        let install = &self.cfg.installation;
        let es = if install.is_fips_enabled() {
            images::ELASTICSEARCH_FIPS
        } else {
            images::ELASTICSEARCH
        };
        self.es_image = images::reference(es, install);
        self.eck_operator_image = images::reference(images::ECK_OPERATOR, install);
        self.kibana_image = images::reference(images::KIBANA, install);
        self.curator_image = images::reference(images::ES_CURATOR, install);
        Ok(())
    }

    fn objects(&self) -> Result<RenderedObjects> {
        if self
            .cfg
            .log_storage
            .as_ref()
            .is_some_and(|ls| ls.metadata.deletion_timestamp.is_some())
        {
            return Ok((Vec::new(), self.teardown_objects()?));
        }

        if self.cfg.managed_cluster {
            let create = vec![
                RenderedObject::new(&create_namespace(
                    ELASTICSEARCH_NAMESPACE,
                    self.provider(),
                    PodSecurityStandard::Privileged,
                ))?,
                RenderedObject::new(&self.elasticsearch_external_service())?,
            ];
            return Ok((create, Vec::new()));
        }

        self.standalone_objects()
    }

    fn ready(&self) -> bool {
        true
    }

    fn supported_os(&self) -> OsType {
        OsType::Linux
    }
}

fn require<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| OperatorError::config(format!("{what} is required to render LogStorage")))
}

impl ElasticsearchComponent {
    fn provider(&self) -> Provider {
        self.cfg.installation.kubernetes_provider
    }

    fn openshift(&self) -> bool {
        self.provider().is_openshift()
    }

    fn fips(&self) -> bool {
        self.cfg.installation.is_fips_enabled()
    }

    fn log_storage(&self) -> Result<&LogStorage> {
        require(&self.cfg.log_storage, "LogStorage")
    }

    /// ECK resources that still need deleting while LogStorage is terminating.
    fn teardown_objects(&self) -> Result<Vec<RenderedObject>> {
        let mut delete = Vec::new();
        if let Some(es) = &self.cfg.elasticsearch {
            if es.metadata.deletion_timestamp.is_none() {
                delete.push(RenderedObject::new(es)?);
            }
        }
        if let Some(kb) = &self.cfg.kibana {
            if kb.metadata.deletion_timestamp.is_none() {
                delete.push(RenderedObject::new(kb)?);
            }
        }
        Ok(delete)
    }

    fn standalone_objects(&self) -> Result<RenderedObjects> {
        let provider = self.provider();
        let openshift = self.openshift();
        let mut create = Vec::new();
        let mut delete = Vec::new();

        // ECK operator
        create.push(RenderedObject::new(&create_namespace(
            ECK_OPERATOR_NAMESPACE,
            provider,
            PodSecurityStandard::Baseline,
        ))?);
        create.push(RenderedObject::new(&self.eck_operator_policy())?);
        create.extend(render_all(&copy_secrets_to_namespace(
            ECK_OPERATOR_NAMESPACE,
            &self.cfg.pull_secrets,
        ))?);
        create.push(RenderedObject::new(&self.eck_operator_cluster_role())?);
        create.push(RenderedObject::new(&cluster_role_binding(
            ECK_OPERATOR_NAME,
            ECK_OPERATOR_NAME,
            ECK_OPERATOR_NAME,
            ECK_OPERATOR_NAMESPACE,
        ))?);
        create.push(RenderedObject::new(&service_account(
            ECK_OPERATOR_NAME,
            ECK_OPERATOR_NAMESPACE,
        ))?);
        if provider == Provider::DockerEe {
            // Docker EE only lets cluster admins create privileged pods
            create.push(RenderedObject::new(&cluster_role_binding(
                "elastic-operator-docker-enterprise",
                "cluster-admin",
                ECK_OPERATOR_NAME,
                ECK_OPERATOR_NAMESPACE,
            ))?);
        }

        if !openshift {
            create.push(RenderedObject::new(&cluster_role_binding(
                ELASTICSEARCH_SERVICE_ACCOUNT,
                ELASTICSEARCH_SERVICE_ACCOUNT,
                ELASTICSEARCH_SERVICE_ACCOUNT,
                ELASTICSEARCH_NAMESPACE,
            ))?);
            create.push(RenderedObject::new(&cluster_role(
                ELASTICSEARCH_SERVICE_ACCOUNT,
                vec![psp_use_rule(ELASTICSEARCH_SERVICE_ACCOUNT)],
            ))?);
            if self.cfg.use_psp {
                create.push(RenderedObject::new(&base_pod_security_policy(ECK_OPERATOR_NAME))?);
                create.push(RenderedObject::new(&elasticsearch_pod_security_policy())?);
            }
            if !self.fips() {
                create.push(RenderedObject::new(&cluster_role_binding(
                    KIBANA_SERVICE_ACCOUNT,
                    KIBANA_SERVICE_ACCOUNT,
                    KIBANA_SERVICE_ACCOUNT,
                    KIBANA_NAMESPACE,
                ))?);
                create.push(RenderedObject::new(&cluster_role(
                    KIBANA_SERVICE_ACCOUNT,
                    vec![psp_use_rule(KIBANA_SERVICE_ACCOUNT)],
                ))?);
                // Gated like every other PSP: clusters without policy/v1beta1 reject the object.
                if self.cfg.use_psp {
                    create.push(RenderedObject::new(&base_pod_security_policy(
                        KIBANA_SERVICE_ACCOUNT,
                    ))?);
                }
            }
        }

        if self.cfg.apply_trial {
            create.push(RenderedObject::new(&elastic_enterprise_trial())?);
        }
        create.push(RenderedObject::new(&self.eck_operator_stateful_set()?)?);

        // Elasticsearch
        create.push(RenderedObject::new(&create_namespace(
            ELASTICSEARCH_NAMESPACE,
            provider,
            PodSecurityStandard::Privileged,
        ))?);
        create.push(RenderedObject::new(&self.elasticsearch_policy())?);
        create.push(RenderedObject::new(&elasticsearch_internal_policy())?);
        create.push(RenderedObject::new(&allow_tigera_default_deny(ELASTICSEARCH_NAMESPACE))?);
        create.extend(render_all(&copy_secrets_to_namespace(
            ELASTICSEARCH_NAMESPACE,
            &self.cfg.pull_secrets,
        ))?);
        if let Some(user) = &self.cfg.elasticsearch_user_secret {
            create.extend(render_all(&copy_secrets_to_namespace(
                &self.cfg.operator_namespace,
                std::slice::from_ref(user),
            ))?);
        }
        create.push(RenderedObject::new(&service_account(
            ELASTICSEARCH_SERVICE_ACCOUNT,
            ELASTICSEARCH_NAMESPACE,
        ))?);
        create.push(RenderedObject::new(
            &require(&self.cfg.cluster_config, "Elasticsearch cluster config")?
                .config_map(&self.cfg.operator_namespace),
        )?);
        create.push(RenderedObject::new(&self.elasticsearch_cluster()?)?);

        if !self.fips() {
            create.push(RenderedObject::new(&create_namespace(
                KIBANA_NAMESPACE,
                provider,
                PodSecurityStandard::Baseline,
            ))?);
            create.push(RenderedObject::new(&self.kibana_policy())?);
            create.push(RenderedObject::new(&allow_tigera_default_deny(KIBANA_NAMESPACE))?);
            create.push(RenderedObject::new(&service_account(
                KIBANA_SERVICE_ACCOUNT,
                KIBANA_NAMESPACE,
            ))?);
            create.extend(render_all(&copy_secrets_to_namespace(
                KIBANA_NAMESPACE,
                &self.cfg.pull_secrets,
            ))?);
            create.push(RenderedObject::new(&self.kibana_cr())?);

            if !self.cfg.curator_secrets.is_empty() {
                create.push(RenderedObject::new(&self.curator_policy())?);
                create.extend(render_all(&copy_secrets_to_namespace(
                    ELASTICSEARCH_NAMESPACE,
                    &self.cfg.curator_secrets,
                ))?);
                create.push(RenderedObject::new(&service_account(
                    ES_CURATOR_SERVICE_ACCOUNT,
                    ELASTICSEARCH_NAMESPACE,
                ))?);
                if !openshift {
                    create.push(RenderedObject::new(&cluster_role(
                        ES_CURATOR_NAME,
                        vec![psp_use_rule(ES_CURATOR_NAME)],
                    ))?);
                    create.push(RenderedObject::new(&cluster_role_binding(
                        ES_CURATOR_NAME,
                        ES_CURATOR_NAME,
                        ES_CURATOR_SERVICE_ACCOUNT,
                        ELASTICSEARCH_NAMESPACE,
                    ))?);
                    if self.cfg.use_psp {
                        create.push(RenderedObject::new(&base_pod_security_policy(
                            ES_CURATOR_NAME,
                        ))?);
                    }
                }
                create.push(RenderedObject::new(&self.curator_cron_job()?)?);
            }
        } else {
            if let Some(keystore) = &self.cfg.keystore_secret {
                let mut keystore = keystore.clone();
                keystore
                    .data
                    .get_or_insert_with(BTreeMap::new)
                    .insert("ES_JAVA_OPTS".to_string(), ByteString(self.java_opts()?.into_bytes()));
                create.extend(render_all(&copy_secrets_to_namespace(
                    &self.cfg.operator_namespace,
                    std::slice::from_ref(&keystore),
                ))?);
                create.extend(render_all(&copy_secrets_to_namespace(
                    ELASTICSEARCH_NAMESPACE,
                    std::slice::from_ref(&keystore),
                ))?);
            }
            // Kibana and the curator are not FIPS compliant
            delete.push(RenderedObject::new(&self.kibana_cr())?);
            delete.push(RenderedObject::new(&self.curator_cron_job()?)?);
        }

        create.push(RenderedObject::new(&role(
            ES_MANAGER_ROLE,
            ELASTICSEARCH_NAMESPACE,
            vec![
                named_rule("configmaps", OIDC_USERS_CONFIG_MAP_NAME, &["update", "patch"]),
                named_rule("secrets", OIDC_USERS_ES_SECRET_NAME, &["get", "list"]),
            ],
        ))?);
        create.push(RenderedObject::new(&role_binding(
            ES_MANAGER_ROLE_BINDING,
            ELASTICSEARCH_NAMESPACE,
            ES_MANAGER_ROLE,
            MANAGER_SERVICE_ACCOUNT,
            MANAGER_NAMESPACE,
        ))?);

        // Services from an earlier managed-cluster install have a different type
        for svc in [&self.cfg.es_service, &self.cfg.kb_service].into_iter().flatten() {
            if is_external_name(svc) {
                delete.push(RenderedObject::new(svc)?);
            }
        }

        Ok((create, delete))
    }

    fn elasticsearch_external_service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(ES_GATEWAY_SERVICE_NAME.to_string()),
                namespace: Some(ELASTICSEARCH_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ExternalName".to_string()),
                external_name: Some(format!(
                    "{GUARDIAN_NAME}.{GUARDIAN_NAMESPACE}.svc.{}",
                    self.cfg.cluster_domain
                )),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn node_resource_overrides(&self) -> Result<Option<ResourceRequirements>> {
        Ok(self.log_storage()?.spec.node_resources().map(|r| r.to_k8s()))
    }

    /// Requests and limits of each Elasticsearch container.
    fn resource_requirements(&self) -> Result<ResourceRequirements> {
        let defaults = ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("1".to_string())),
                ("memory".to_string(), Quantity("4Gi".to_string())),
            ])),
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("250m".to_string())),
                ("memory".to_string(), Quantity("4Gi".to_string())),
            ])),
            ..Default::default()
        };
        Ok(match self.node_resource_overrides()? {
            Some(user) => override_resource_requirements(defaults, &user),
            None => defaults,
        })
    }

    /// Volume claim template for the Elasticsearch data directory.
    fn pvc_template(&self) -> Result<PersistentVolumeClaim> {
        let defaults = VolumeResourceRequirements {
            requests: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(format!("{DEFAULT_ELASTIC_STORAGE_GI}Gi")),
            )])),
            limits: None,
        };
        let resources = match self.node_resource_overrides()? {
            Some(user) => override_pvc_requirements(defaults, &user),
            None => defaults,
        };
        Ok(PersistentVolumeClaim {
            metadata: ObjectMeta {
                // ECK requires this name
                name: Some(PVC_TEMPLATE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(resources),
                storage_class_name: Some(self.log_storage()?.spec.storage_class_name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// `ES_JAVA_OPTS`, with the heap sized from the memory request when the user set resources.
    fn java_opts(&self) -> Result<String> {
        let mut opts = match self.node_resource_overrides()? {
            Some(_) => {
                let resources = self.resource_requirements()?;
                let memory = resources
                    .requests
                    .as_ref()
                    .and_then(|r| r.get("memory"))
                    .cloned()
                    .unwrap_or_else(|| Quantity("4Gi".to_string()));
                let heap = memory_quantity_to_jvm_heap_size(&memory)?;
                format!("-Xms{heap} -Xmx{heap}")
            }
            None => DEFAULT_JAVA_OPTS.to_string(),
        };
        if self.fips() {
            let password = self
                .cfg
                .keystore_secret
                .as_ref()
                .and_then(|s| s.data.as_ref())
                .and_then(|d| d.get(ELASTICSEARCH_KEYSTORE_ENV_NAME))
                .map(|b| String::from_utf8_lossy(&b.0).into_owned())
                .unwrap_or_default();
            opts = format!(
                "{opts} --module-path /usr/share/bc-fips/ \
                 -Djavax.net.ssl.trustStore=/usr/share/elasticsearch/config/cacerts.bcfks \
                 -Djavax.net.ssl.trustStoreType=BCFKS \
                 -Djavax.net.ssl.trustStorePassword={password} \
                 -Dorg.bouncycastle.fips.approved_only=true"
            );
        }
        Ok(opts)
    }

    fn elasticsearch_pod_template(&self) -> Result<PodTemplateSpec> {
        let fips = self.fips();
        let env = if fips {
            vec![
                secret_env_var(
                    ELASTICSEARCH_KEYSTORE_ENV_NAME,
                    ELASTICSEARCH_KEYSTORE_SECRET,
                    ELASTICSEARCH_KEYSTORE_ENV_NAME,
                ),
                secret_env_var("ES_JAVA_OPTS", ELASTICSEARCH_KEYSTORE_SECRET, "ES_JAVA_OPTS"),
            ]
        } else {
            vec![env_var("ES_JAVA_OPTS", self.java_opts()?)]
        };

        let es_container = Container {
            name: "elasticsearch".to_string(),
            readiness_probe: Some(Probe {
                exec: Some(ExecAction {
                    command: Some(vec!["/usr/bin/readiness-probe".to_string()]),
                }),
                failure_threshold: Some(3),
                initial_delay_seconds: Some(10),
                period_seconds: Some(5),
                success_threshold: Some(1),
                timeout_seconds: Some(5),
                ..Default::default()
            }),
            resources: Some(self.resource_requirements()?),
            env: Some(env),
            // The image needs CHROOT as root, which OpenShift does not grant
            security_context: self.openshift().then(|| SecurityContext {
                run_as_user: Some(1000),
                ..Default::default()
            }),
            ..Default::default()
        };

        let mut init_containers = vec![Container {
            name: "elastic-internal-init-os-settings".to_string(),
            image: Some(self.es_image.clone()),
            command: Some(vec!["/bin/sh".to_string()]),
            args: Some(vec![
                "-c".to_string(),
                "echo 262144 > /proc/sys/vm/max_map_count".to_string(),
            ]),
            security_context: Some(SecurityContext {
                privileged: Some(true),
                run_as_user: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        }];

        let key_pair = require(&self.cfg.elasticsearch_key_pair, "Elasticsearch key pair")?;
        let mut annotations = require(&self.cfg.trusted_bundle, "trusted bundle")?.hash_annotations();
        let user_secrets: Vec<&Secret> = self.cfg.elasticsearch_user_secret.iter().collect();
        annotations.insert(
            ELASTICSEARCH_TLS_HASH_ANNOTATION.to_string(),
            secrets_annotation_hash(&user_secrets),
        );
        annotations.insert(key_pair.hash_annotation_key(), key_pair.hash_annotation_value());

        if fips {
            init_containers.push(Container {
                name: "elastic-internal-init-keystore".to_string(),
                image: Some(self.es_image.clone()),
                env: Some(vec![
                    secret_env_var(
                        ELASTICSEARCH_KEYSTORE_ENV_NAME,
                        ELASTICSEARCH_KEYSTORE_SECRET,
                        ELASTICSEARCH_KEYSTORE_ENV_NAME,
                    ),
                    env_var("ES_JAVA_OPTS", "--module-path /usr/share/bc-fips/"),
                ]),
                command: Some(vec!["/bin/sh".to_string()]),
                args: Some(vec![
                    "-c".to_string(),
                    "/usr/bin/initialize_keystore.sh".to_string(),
                ]),
                security_context: Some(SecurityContext {
                    privileged: Some(false),
                    ..Default::default()
                }),
                ..Default::default()
            });
            let keystore: Vec<&Secret> = self.cfg.keystore_secret.iter().collect();
            annotations.insert(
                ELASTICSEARCH_KEYSTORE_HASH_ANNOTATION.to_string(),
                secrets_annotation_hash(&keystore),
            );
        }

        // Runs after the privileged init container so that volume mounts are
        // relabelled with the pod's SELinux context before Elasticsearch starts
        init_containers.push(Container {
            name: "elastic-internal-init-log-selinux-context".to_string(),
            image: Some(self.es_image.clone()),
            command: Some(vec!["/bin/sh".to_string()]),
            args: Some(vec!["-c".to_string(), "ls -ldZ /usr/share/elasticsearch".to_string()]),
            security_context: Some(SecurityContext {
                privileged: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });

        let data_node_selector = &self.log_storage()?.spec.data_node_selector;
        let node_selector = if data_node_selector.is_empty() {
            self.cfg.installation.control_plane_node_selector.clone()
        } else {
            data_node_selector.clone()
        };

        Ok(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                annotations: Some(annotations),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                init_containers: Some(init_containers),
                containers: vec![es_container],
                image_pull_secrets: pull_secret_references(&self.cfg.pull_secrets),
                node_selector: non_empty_map(node_selector),
                tolerations: non_empty_vec(self.cfg.installation.control_plane_tolerations.clone()),
                service_account_name: Some(ELASTICSEARCH_SERVICE_ACCOUNT.to_string()),
                automount_service_account_token: Some(false),
                ..Default::default()
            }),
        })
    }

    fn elasticsearch_cluster(&self) -> Result<Elasticsearch> {
        let mut es = Elasticsearch::new(
            ELASTICSEARCH_NAME,
            ElasticsearchSpec {
                version: images::ECK_ELASTICSEARCH_VERSION.to_string(),
                image: self.es_image.clone(),
                http: tls_http_config(TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET),
                node_sets: self.node_sets()?,
            },
        );
        es.metadata.namespace = Some(ELASTICSEARCH_NAMESPACE.to_string());
        es.metadata.annotations = Some(controller_version_annotations());
        Ok(es)
    }

    /// Spread `nodes.count` Elasticsearch nodes over the configured node sets.
    fn node_sets(&self) -> Result<Vec<NodeSet>> {
        let nodes = self
            .log_storage()?
            .spec
            .nodes
            .as_ref()
            .ok_or_else(|| OperatorError::config("LogStorage spec.nodes must be set"))?;
        let pvc = self.pvc_template()?;
        let base_name = node_set_name(&pvc);

        if nodes.node_sets.is_empty() {
            let mut set = self.node_set_template(&pvc);
            set.name = base_name;
            set.count = i32::try_from(nodes.count)
                .map_err(|_| OperatorError::config(format!("node count {} is too large", nodes.count)))?;
            set.pod_template = Some(self.elasticsearch_pod_template()?);
            return Ok(vec![set]);
        }

        let set_counts = distribute_nodes(nodes.count, nodes.node_sets.len());
        let mut sets = Vec::with_capacity(set_counts.len());
        for (index, (count, config)) in set_counts.into_iter().zip(&nodes.node_sets).enumerate() {
            let mut set = self.node_set_template(&pvc);
            set.name = format!("{base_name}-{index}");
            set.count = count;

            let mut pod_template = self.elasticsearch_pod_template()?;
            if !config.selection_attributes.is_empty() {
                let mut awareness = Vec::new();
                let mut requirements = Vec::new();
                for attr in &config.selection_attributes {
                    set.config
                        .insert(format!("node.attr.{}", attr.name), Value::from(attr.value.clone()));
                    awareness.push(attr.name.clone());
                    requirements.push(NodeSelectorRequirement {
                        key: attr.node_label.clone(),
                        operator: "In".to_string(),
                        values: Some(vec![attr.value.clone()]),
                    });
                }
                set.config.insert(
                    "cluster.routing.allocation.awareness.attributes".to_string(),
                    Value::from(awareness.join(",")),
                );
                if let Some(spec) = pod_template.spec.as_mut() {
                    spec.affinity = Some(Affinity {
                        node_affinity: Some(NodeAffinity {
                            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                                node_selector_terms: vec![NodeSelectorTerm {
                                    match_expressions: Some(requirements),
                                    match_fields: None,
                                }],
                            }),
                            ..Default::default()
                        }),
                        ..Default::default()
                    });
                }
            }
            set.pod_template = Some(pod_template);
            sets.push(set);
        }
        Ok(sets)
    }

    fn node_set_template(&self, pvc: &PersistentVolumeClaim) -> NodeSet {
        let mut config = Map::new();
        config.insert("node.master".to_string(), Value::from("true"));
        config.insert("node.data".to_string(), Value::from("true"));
        config.insert("node.ingest".to_string(), Value::from("true"));
        config.insert("cluster.max_shards_per_node".to_string(), Value::from(10000));
        if self.fips() {
            config.insert("xpack.security.fips_mode.enabled".to_string(), Value::from("true"));
            config.insert(
                "xpack.security.authc.password_hashing.algorithm".to_string(),
                Value::from("pbkdf2_stretch"),
            );
        }
        NodeSet {
            config,
            volume_claim_templates: vec![pvc.clone()],
            ..Default::default()
        }
    }

    fn eck_operator_cluster_role(&self) -> k8s_openapi::api::rbac::v1::ClusterRole {
        const ALL: &[&str] = &["get", "list", "watch", "create", "update", "patch", "delete"];
        let mut rules = vec![
            policy_rule(&["authorization.k8s.io"], &["subjectaccessreviews"], &["create"]),
            policy_rule(
                &[""],
                &[
                    "pods",
                    "endpoints",
                    "events",
                    "persistentvolumeclaims",
                    "secrets",
                    "services",
                    "configmaps",
                    "serviceaccounts",
                ],
                ALL,
            ),
            policy_rule(&["apps"], &["deployments", "statefulsets", "daemonsets"], ALL),
            policy_rule(&["batch"], &["cronjobs"], ALL),
            policy_rule(&["policy"], &["poddisruptionbudgets"], ALL),
            policy_rule(
                &["elasticsearch.k8s.elastic.co"],
                &[
                    "elasticsearches",
                    "elasticsearches/status",
                    "elasticsearches/finalizers",
                    "enterpriselicenses",
                    "enterpriselicenses/status",
                ],
                ALL,
            ),
            policy_rule(
                &["kibana.k8s.elastic.co"],
                &["kibanas", "kibanas/status", "kibanas/finalizers"],
                ALL,
            ),
            policy_rule(
                &["apm.k8s.elastic.co"],
                &["apmservers", "apmservers/status", "apmservers/finalizers"],
                ALL,
            ),
            policy_rule(
                &["enterprisesearch.k8s.elastic.co"],
                &[
                    "enterprisesearches",
                    "enterprisesearches/status",
                    "enterprisesearches/finalizers",
                ],
                ALL,
            ),
            policy_rule(&["beat.k8s.elastic.co"], &["beats", "beats/status", "beats/finalizers"], ALL),
            policy_rule(
                &["agent.k8s.elastic.co"],
                &["agents", "agents/status", "agents/finalizers"],
                ALL,
            ),
            policy_rule(
                &["maps.k8s.elastic.co"],
                &[
                    "elasticmapsservers",
                    "elasticmapsservers/status",
                    "elasticmapsservers/finalizers",
                ],
                ALL,
            ),
            policy_rule(
                &["associations.k8s.elastic.co"],
                &[
                    "apmserverelasticsearchassociations",
                    "apmserverelasticsearchassociations/status",
                ],
                ALL,
            ),
        ];
        if !self.openshift() {
            rules.push(psp_use_rule(ECK_OPERATOR_NAME));
        }
        cluster_role(ECK_OPERATOR_NAME, rules)
    }

    fn eck_operator_stateful_set(&self) -> Result<StatefulSet> {
        let labels = BTreeMap::from([
            ("control-plane".to_string(), ECK_OPERATOR_NAME.to_string()),
            ("k8s-app".to_string(), ECK_OPERATOR_NAME.to_string()),
        ]);

        let mut limits = BTreeMap::from([("cpu".to_string(), Quantity("1".to_string()))]);
        let mut requests = BTreeMap::from([("cpu".to_string(), Quantity("100m".to_string()))]);
        if let Some(res) = self
            .log_storage()?
            .spec
            .component_resources(LogStorageComponentName::EckOperator)
        {
            if let Some(memory) = res.limits.get("memory") {
                limits.insert("memory".to_string(), Quantity(memory.clone()));
            }
            if let Some(memory) = res.requests.get("memory") {
                requests.insert("memory".to_string(), Quantity(memory.clone()));
            }
        }

        let args = [
            "manager".to_string(),
            "--namespaces=tigera-elasticsearch,tigera-kibana".to_string(),
            "--log-verbosity=0".to_string(),
            "--metrics-port=0".to_string(),
            format!("--container-registry={}", self.cfg.installation.registry()),
            "--max-concurrent-reconciles=3".to_string(),
            "--ca-cert-validity=8760h".to_string(),
            "--ca-cert-rotate-before=24h".to_string(),
            "--cert-validity=8760h".to_string(),
            "--cert-rotate-before=24h".to_string(),
            "--enable-webhook=false".to_string(),
            "--manage-webhook-certs=false".to_string(),
        ];

        let container = Container {
            name: "manager".to_string(),
            image: Some(self.eck_operator_image.clone()),
            args: Some(args.to_vec()),
            env: Some(vec![
                field_env_var("OPERATOR_NAMESPACE", "metadata.namespace"),
                env_var("OPERATOR_IMAGE", self.eck_operator_image.clone()),
            ]),
            resources: Some(ResourceRequirements {
                limits: Some(limits),
                requests: Some(requests),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(StatefulSet {
            metadata: ObjectMeta {
                name: Some(ECK_OPERATOR_NAME.to_string()),
                namespace: Some(ECK_OPERATOR_NAMESPACE.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(StatefulSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                service_name: ECK_OPERATOR_NAME.to_string().into(),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        annotations: Some(BTreeMap::from([(
                            "co.elastic.logs/raw".to_string(),
                            eck_log_processors(),
                        )])),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        dns_policy: Some("ClusterFirst".to_string()),
                        service_account_name: Some(ECK_OPERATOR_NAME.to_string()),
                        image_pull_secrets: pull_secret_references(&self.cfg.pull_secrets),
                        host_network: Some(false),
                        node_selector: non_empty_map(
                            self.cfg.installation.control_plane_node_selector.clone(),
                        ),
                        tolerations: non_empty_vec(
                            self.cfg.installation.control_plane_tolerations.clone(),
                        ),
                        containers: vec![container],
                        termination_grace_period_seconds: Some(10),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn kibana_cr(&self) -> Kibana {
        let default_route = format!(
            "/app/kibana#/dashboards?{TIME_FILTER}&title={}",
            FLOWS_DASHBOARD_NAME.replace(' ', "%20")
        );
        let config = json!({
            "elasticsearch.ssl.certificateAuthorities": ["/usr/share/kibana/config/elasticsearch-certs/tls.crt"],
            "server": {
                "basePath": format!("/{KIBANA_BASE_PATH}"),
                "rewriteBasePath": true,
                "defaultRoute": default_route,
            },
            "xpack.security.session.lifespan": "24h",
            "tigera": {
                "enabled": true,
                "licenseEdition": "enterpriseEdition",
            },
        });
        let config = match config {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let count = self.cfg.installation.control_plane_replicas.unwrap_or(1);
        let labels = BTreeMap::from([
            ("name".to_string(), KIBANA_NAME.to_string()),
            ("k8s-app".to_string(), KIBANA_NAME.to_string()),
        ]);
        let tls_hash = self
            .cfg
            .kibana_key_pair
            .as_ref()
            .map(|kp| kp.hash_annotation_value())
            .unwrap_or_default();

        let pod_spec = PodSpec {
            image_pull_secrets: pull_secret_references(&self.cfg.pull_secrets),
            service_account_name: Some(KIBANA_SERVICE_ACCOUNT.to_string()),
            node_selector: non_empty_map(self.cfg.installation.control_plane_node_selector.clone()),
            tolerations: non_empty_vec(self.cfg.installation.control_plane_tolerations.clone()),
            automount_service_account_token: Some(false),
            containers: vec![Container {
                name: "kibana".to_string(),
                readiness_probe: Some(Probe {
                    http_get: Some(HTTPGetAction {
                        path: Some(format!("/{KIBANA_BASE_PATH}/login")),
                        port: IntOrString::Int(i32::from(KIBANA_PORT)),
                        scheme: Some("HTTPS".to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            security_context: Some(PodSecurityContext {
                run_as_group: Some(RUN_AS_GROUP_ID),
                run_as_non_root: Some(true),
                run_as_user: Some(RUN_AS_USER_ID),
                ..Default::default()
            }),
            affinity: (count > 1).then(|| pod_anti_affinity(KIBANA_NAME, KIBANA_NAMESPACE)),
            ..Default::default()
        };

        let mut kibana = Kibana::new(
            KIBANA_NAME,
            KibanaSpec {
                version: images::ECK_KIBANA_VERSION.to_string(),
                image: self.kibana_image.clone(),
                count,
                config,
                http: tls_http_config(TIGERA_KIBANA_CERT_SECRET),
                elasticsearch_ref: ObjectSelector {
                    name: ELASTICSEARCH_NAME.to_string(),
                    namespace: ELASTICSEARCH_NAMESPACE.to_string(),
                },
                pod_template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        namespace: Some(KIBANA_NAMESPACE.to_string()),
                        labels: Some(labels),
                        annotations: Some(BTreeMap::from([(
                            KIBANA_TLS_HASH_ANNOTATION.to_string(),
                            tls_hash,
                        )])),
                        ..Default::default()
                    }),
                    spec: Some(pod_spec),
                }),
            },
        );
        kibana.metadata.namespace = Some(KIBANA_NAMESPACE.to_string());
        kibana.metadata.labels = Some(BTreeMap::from([(
            "k8s-app".to_string(),
            KIBANA_NAME.to_string(),
        )]));
        kibana.metadata.annotations = Some(controller_version_annotations());
        kibana
    }

    fn curator_env_vars(&self) -> Result<Vec<EnvVar>> {
        let retention = self
            .log_storage()?
            .spec
            .retention
            .clone()
            .unwrap_or_default();
        let days = |value: Option<i32>, default: i32| value.unwrap_or(default).to_string();
        Ok(vec![
            env_var("EE_FLOWS_INDEX_RETENTION_PERIOD", days(retention.flows, 8)),
            env_var("EE_AUDIT_INDEX_RETENTION_PERIOD", days(retention.audit_reports, 91)),
            env_var("EE_SNAPSHOT_INDEX_RETENTION_PERIOD", days(retention.snapshots, 91)),
            env_var(
                "EE_COMPLIANCE_REPORT_INDEX_RETENTION_PERIOD",
                days(retention.compliance_reports, 91),
            ),
            env_var("EE_DNS_INDEX_RETENTION_PERIOD", days(retention.dns_logs, 8)),
            env_var("EE_BGP_INDEX_RETENTION_PERIOD", days(retention.bgp_logs, 8)),
            env_var("EE_MAX_TOTAL_STORAGE_PCT", MAX_TOTAL_STORAGE_PERCENT.to_string()),
            env_var("EE_MAX_LOGS_STORAGE_PCT", MAX_LOGS_STORAGE_PERCENT.to_string()),
        ])
    }

    fn curator_cron_job(&self) -> Result<CronJob> {
        let labels = BTreeMap::from([("k8s-app".to_string(), ES_CURATOR_NAME.to_string())]);
        let bundle = require(&self.cfg.trusted_bundle, "trusted bundle")?;
        let os = self.supported_os();

        let container = container_decorate(
            Container {
                name: ES_CURATOR_NAME.to_string(),
                image: Some(self.curator_image.clone()),
                env: Some(self.curator_env_vars()?),
                liveness_probe: Some(Probe {
                    exec: Some(ExecAction {
                        command: Some(
                            [
                                "/usr/bin/curator",
                                "--config",
                                "/curator/curator_config.yaml",
                                "--dry-run",
                                "/curator/curator_action.yaml",
                            ]
                            .map(String::from)
                            .to_vec(),
                        ),
                    }),
                    ..Default::default()
                }),
                security_context: Some(SecurityContext {
                    run_as_non_root: Some(true),
                    allow_privilege_escalation: Some(false),
                    ..Default::default()
                }),
                volume_mounts: Some(vec![bundle.volume_mount(os)]),
                ..Default::default()
            },
            DEFAULT_ELASTICSEARCH_CLUSTER_NAME,
            ELASTICSEARCH_CURATOR_USER_SECRET,
            &self.cfg.cluster_domain,
            os,
        );

        Ok(CronJob {
            metadata: ObjectMeta {
                name: Some(ES_CURATOR_NAME.to_string()),
                namespace: Some(ELASTICSEARCH_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: Some(CronJobSpec {
                schedule: "@hourly".to_string(),
                job_template: JobTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(ES_CURATOR_NAME.to_string()),
                        labels: Some(labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(JobSpec {
                        template: PodTemplateSpec {
                            metadata: Some(ObjectMeta {
                                labels: Some(labels),
                                ..Default::default()
                            }),
                            spec: Some(PodSpec {
                                node_selector: non_empty_map(
                                    self.cfg.installation.control_plane_node_selector.clone(),
                                ),
                                tolerations: non_empty_vec(
                                    self.cfg.installation.control_plane_tolerations.clone(),
                                ),
                                containers: vec![container],
                                image_pull_secrets: pull_secret_references(&self.cfg.pull_secrets),
                                restart_policy: Some("OnFailure".to_string()),
                                service_account_name: Some(ES_CURATOR_SERVICE_ACCOUNT.to_string()),
                                volumes: Some(vec![bundle.volume()]),
                                ..Default::default()
                            }),
                        },
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn eck_operator_policy(&self) -> NetworkPolicy {
        let mut egress = append_dns_egress_rules(Vec::new(), self.openshift());
        egress.push(allow_tcp_to(kube_api_server_entity_rule()));
        egress.push(allow_tcp_to(elasticsearch_entity_rule(ELASTICSEARCH_DEFAULT_PORT)));
        component_policy(
            ECK_OPERATOR_POLICY_NAME,
            ECK_OPERATOR_NAMESPACE,
            kubernetes_app_selector(&[ECK_OPERATOR_NAME]),
            Vec::new(),
            egress,
        )
    }

    /// Clients reach Elasticsearch on 9200. Node CIDRs are unknown, so any source is allowed.
    fn elasticsearch_policy(&self) -> NetworkPolicy {
        let mut egress = append_dns_egress_rules(Vec::new(), self.openshift());
        egress.push(allow_tcp_to(dex_entity_rule()));
        egress.push(allow_tcp_to(es_gateway_entity_rule()));
        egress.push(allow_tcp_to(kube_api_server_service_entity_rule()));

        let port = [ELASTICSEARCH_DEFAULT_PORT];
        let ingress = vec![
            allow_tcp_from(kibana_source_entity_rule(), &port),
            allow_tcp_from(es_gateway_source_entity_rule(), &port),
            allow_tcp_from(eck_operator_source_entity_rule(), &port),
            allow_tcp_from(EntityRule::default(), &port),
        ];
        component_policy(
            ELASTICSEARCH_POLICY_NAME,
            ELASTICSEARCH_NAMESPACE,
            elasticsearch_selector(),
            ingress,
            egress,
        )
    }

    fn kibana_policy(&self) -> NetworkPolicy {
        let mut egress = vec![allow_tcp_to(elasticsearch_entity_rule(ELASTICSEARCH_DEFAULT_PORT))];
        egress = append_dns_egress_rules(egress, self.openshift());
        egress.push(allow_tcp_to(kube_api_server_service_entity_rule()));
        egress.push(allow_tcp_to(es_gateway_entity_rule()));

        let port = [KIBANA_PORT];
        let anywhere = |net: &str| EntityRule {
            nets: vec![net.to_string()],
            ..Default::default()
        };
        let ingress = vec![
            allow_tcp_from(anywhere("0.0.0.0/0"), &port),
            allow_tcp_from(anywhere("::/0"), &port),
            allow_tcp_from(es_gateway_source_entity_rule(), &port),
            allow_tcp_from(eck_operator_source_entity_rule(), &port),
        ];
        component_policy(
            KIBANA_POLICY_NAME,
            KIBANA_NAMESPACE,
            kubernetes_app_selector(&[KIBANA_NAME]),
            ingress,
            egress,
        )
    }

    fn curator_policy(&self) -> NetworkPolicy {
        let mut egress = append_dns_egress_rules(Vec::new(), self.openshift());
        egress.push(allow_tcp_to(es_gateway_entity_rule()));
        component_policy(
            ES_CURATOR_POLICY_NAME,
            ELASTICSEARCH_NAMESPACE,
            kubernetes_app_selector(&[ES_CURATOR_NAME]),
            Vec::new(),
            egress,
        )
    }
}

fn elasticsearch_internal_policy() -> NetworkPolicy {
    let ingress = vec![allow_tcp_from(
        EntityRule {
            selector: elasticsearch_selector(),
            ..Default::default()
        },
        &[ELASTICSEARCH_INTERNAL_PORT],
    )];
    let egress = vec![allow_tcp_to(elasticsearch_entity_rule(ELASTICSEARCH_INTERNAL_PORT))];
    component_policy(
        ELASTICSEARCH_INTERNAL_POLICY_NAME,
        ELASTICSEARCH_NAMESPACE,
        elasticsearch_selector(),
        ingress,
        egress,
    )
}

fn elasticsearch_selector() -> String {
    format!("elasticsearch.k8s.elastic.co/cluster-name == '{ELASTICSEARCH_NAME}'")
}

/// Elasticsearch pods on the given port.
pub fn elasticsearch_entity_rule(port: u16) -> EntityRule {
    EntityRule {
        namespace_selector: format!("projectcalico.org/name == '{ELASTICSEARCH_NAMESPACE}'"),
        selector: elasticsearch_selector(),
        ports: vec![port.into()],
        ..Default::default()
    }
}

fn kibana_source_entity_rule() -> EntityRule {
    create_source_entity_rule(KIBANA_NAMESPACE, KIBANA_NAME)
}

fn eck_operator_source_entity_rule() -> EntityRule {
    create_source_entity_rule(ECK_OPERATOR_NAMESPACE, ECK_OPERATOR_NAME)
}

fn tls_http_config(secret_name: &str) -> HttpConfig {
    HttpConfig {
        tls: TlsOptions {
            certificate: SecretRef {
                secret_name: secret_name.to_string(),
            },
        },
    }
}

fn controller_version_annotations() -> BTreeMap<String, String> {
    BTreeMap::from([(
        CONTROLLER_VERSION_ANNOTATION.to_string(),
        images::ECK_OPERATOR_VERSION.to_string(),
    )])
}

fn named_rule(resource: &str, name: &str, verbs: &[&str]) -> k8s_openapi::api::rbac::v1::PolicyRule {
    k8s_openapi::api::rbac::v1::PolicyRule {
        resource_names: Some(vec![name.to_string()]),
        ..policy_rule(&[""], &[resource], verbs)
    }
}

fn is_external_name(svc: &Service) -> bool {
    svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("ExternalName")
}

fn non_empty_map(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

fn non_empty_vec<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Prefer spreading replicas of `app` across hosts.
fn pod_anti_affinity(app: &str, namespace: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![WeightedPodAffinityTerm {
                weight: 100,
                pod_affinity_term: PodAffinityTerm {
                    label_selector: Some(LabelSelector {
                        match_expressions: Some(vec![LabelSelectorRequirement {
                            key: "k8s-app".to_string(),
                            operator: "In".to_string(),
                            values: Some(vec![app.to_string()]),
                        }]),
                        ..Default::default()
                    }),
                    namespaces: Some(vec![namespace.to_string()]),
                    topology_key: "kubernetes.io/hostname".to_string(),
                    ..Default::default()
                },
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ECK log processors renaming `error` and `source`, which clash with ECS fields.
fn eck_log_processors() -> String {
    let rename = |from: &str, to: &str| {
        json!({"convert": {"mode": "rename", "ignore_missing": true, "fields": [{"from": from, "to": to}]}})
    };
    json!([{
        "type": "container",
        "json.keys_under_root": true,
        "paths": ["/var/log/containers/*${data.kubernetes.container.id}.log"],
        "processors": [
            rename("error", "_error"),
            rename("_error", "error.message"),
            rename("source", "_source"),
            rename("_source", "event.source"),
        ],
    }])
    .to_string()
}

fn base_pod_security_policy(name: &str) -> PodSecurityPolicy {
    PodSecurityPolicy::new(name, PodSecurityPolicySpec::base())
}

fn elasticsearch_pod_security_policy() -> PodSecurityPolicy {
    let mut spec = PodSecurityPolicySpec::base();
    spec.privileged = true;
    spec.allow_privilege_escalation = Some(true);
    spec.required_drop_capabilities = Vec::new();
    spec.allowed_capabilities = vec!["CAP_CHOWN".to_string()];
    spec.run_as_user = StrategyOptions::rule("RunAsAny");
    PodSecurityPolicy::new(ELASTICSEARCH_SERVICE_ACCOUNT, spec)
}

/// Placing this secret in the ECK namespace starts an enterprise trial.
fn elastic_enterprise_trial() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(ECK_ENTERPRISE_TRIAL.to_string()),
            namespace: Some(ECK_OPERATOR_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                "license.k8s.elastic.co/type".to_string(),
                "enterprise-trial".to_string(),
            )])),
            annotations: Some(BTreeMap::from([(
                "elastic.co/eula".to_string(),
                "accepted".to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Node counts per node set: `count / sets` each, the first `count % sets`
/// sets get one more, and sets that would be empty are dropped.
fn distribute_nodes(count: i64, sets: usize) -> Vec<i32> {
    if sets == 0 || count < 1 {
        return Vec::new();
    }
    let sets_i64 = sets as i64;
    let base = count / sets_i64;
    let remainder = count % sets_i64;
    (0..sets_i64)
        .map(|i| base + i64::from(i < remainder))
        .take_while(|n| *n > 0)
        .map(|n| i32::try_from(n).unwrap_or(i32::MAX))
        .collect()
}

/// Name derived from the volume claim template.
///
/// Storage settings of a node set are immutable, so changing them must
/// rename the set, which makes ECK roll over to a new StatefulSet.
pub fn node_set_name(pvc: &PersistentVolumeClaim) -> String {
    match serde_json::to_vec(pvc) {
        Ok(bytes) => format!("{:016x}", fnv1a_64(&bytes)),
        Err(e) => {
            debug!(error = %e, "Failed to serialize volume claim template, using default node set name");
            "es".to_string()
        }
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::CertificateManager;
    use crate::crd::calico::Port;
    use crate::crd::{FipsMode, LogStorageSpec};
    use crate::render::test_helpers::{find, kinds_and_names};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn log_storage_cr(spec_json: serde_json::Value) -> LogStorage {
        let mut spec: LogStorageSpec = serde_json::from_value(spec_json).unwrap();
        spec.fill_defaults();
        LogStorage::new("tigera-secure", spec)
    }

    fn user_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(ELASTICSEARCH_ADMIN_USER_SECRET.to_string()),
                namespace: Some(ELASTICSEARCH_NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "elastic".to_string(),
                ByteString(b"password".to_vec()),
            )])),
            ..Default::default()
        }
    }

    fn base_cfg() -> ElasticsearchConfiguration {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let es_kp = cm
            .issue_key_pair(
                TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET,
                &["tigera-secure-es-http".to_string()],
            )
            .unwrap();
        let kb_kp = cm
            .issue_key_pair(TIGERA_KIBANA_CERT_SECRET, &["tigera-secure-kb-http".to_string()])
            .unwrap();
        ElasticsearchConfiguration {
            log_storage: Some(log_storage_cr(json!({}))),
            installation: InstallationSpec::default(),
            managed_cluster: false,
            elasticsearch: None,
            kibana: None,
            cluster_config: Some(ClusterConfig::new(DEFAULT_ELASTICSEARCH_CLUSTER_NAME, 0, 1, 1)),
            elasticsearch_user_secret: Some(user_secret()),
            elasticsearch_key_pair: Some(es_kp),
            kibana_key_pair: Some(kb_kp),
            pull_secrets: Vec::new(),
            curator_secrets: Vec::new(),
            es_service: None,
            kb_service: None,
            cluster_domain: "cluster.local".to_string(),
            operator_namespace: "tigera-operator".to_string(),
            trusted_bundle: Some(cm.create_trusted_bundle([])),
            apply_trial: false,
            keystore_secret: None,
            use_psp: false,
        }
    }

    fn render(cfg: ElasticsearchConfiguration) -> RenderedObjects {
        let mut component = log_storage(cfg);
        component.resolve_images().unwrap();
        component.objects().unwrap()
    }

    fn elasticsearch(objs: &[RenderedObject]) -> Elasticsearch {
        find(objs, "Elasticsearch", ELASTICSEARCH_NAME)
            .unwrap()
            .decode()
            .unwrap()
    }

    fn es_env(es: &Elasticsearch) -> Vec<EnvVar> {
        es.spec.node_sets[0]
            .pod_template
            .as_ref()
            .unwrap()
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
            .env
            .clone()
            .unwrap()
    }

    fn curator_secret() -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(ELASTICSEARCH_CURATOR_USER_SECRET.to_string()),
                namespace: Some("tigera-operator".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_standalone_objects() {
        let (create, delete) = render(base_cfg());
        assert!(delete.is_empty());
        assert_eq!(
            kinds_and_names(&create),
            vec![
                "Namespace/tigera-eck-operator",
                "NetworkPolicy/allow-tigera.elastic-operator-access",
                "ClusterRole/elastic-operator",
                "ClusterRoleBinding/elastic-operator",
                "ServiceAccount/elastic-operator",
                "ClusterRoleBinding/tigera-elasticsearch",
                "ClusterRole/tigera-elasticsearch",
                "ClusterRoleBinding/tigera-kibana",
                "ClusterRole/tigera-kibana",
                "StatefulSet/elastic-operator",
                "Namespace/tigera-elasticsearch",
                "NetworkPolicy/allow-tigera.elasticsearch-access",
                "NetworkPolicy/allow-tigera.elasticsearch-internal",
                "NetworkPolicy/allow-tigera.default-deny",
                "Secret/tigera-secure-es-elastic-user",
                "ServiceAccount/tigera-elasticsearch",
                "ConfigMap/tigera-secure-elasticsearch",
                "Elasticsearch/tigera-secure",
                "Namespace/tigera-kibana",
                "NetworkPolicy/allow-tigera.kibana-access",
                "NetworkPolicy/allow-tigera.default-deny",
                "ServiceAccount/tigera-kibana",
                "Kibana/tigera-secure",
                "Role/es-manager",
                "RoleBinding/es-manager",
            ]
        );

        let user = find(&create, "Secret", ELASTICSEARCH_ADMIN_USER_SECRET).unwrap();
        assert_eq!(user.namespace.as_deref(), Some("tigera-operator"));
        let cm = find(&create, "ConfigMap", "tigera-secure-elasticsearch").unwrap();
        assert_eq!(cm.namespace.as_deref(), Some("tigera-operator"));

        let es = elasticsearch(&create);
        assert_eq!(es.spec.version, images::ECK_ELASTICSEARCH_VERSION);
        assert_eq!(es.spec.image, "quay.io/tigera/elasticsearch:v3.15.0");
        assert_eq!(
            es.spec.http.tls.certificate.secret_name,
            TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET
        );
        assert_eq!(es.spec.node_sets.len(), 1);
        let set = &es.spec.node_sets[0];
        assert_eq!(set.count, 1);
        assert_eq!(set.config["cluster.max_shards_per_node"], 10000);
        let pvc = &set.volume_claim_templates[0];
        let pvc_spec = pvc.spec.as_ref().unwrap();
        assert_eq!(pvc_spec.storage_class_name.as_deref(), Some("tigera-elasticsearch"));
        assert_eq!(
            pvc_spec.resources.as_ref().unwrap().requests.as_ref().unwrap()["storage"],
            Quantity("10Gi".to_string())
        );
        assert_eq!(set.name, node_set_name(pvc));

        let env = es_env(&es);
        assert_eq!(env[0].name, "ES_JAVA_OPTS");
        assert_eq!(env[0].value.as_deref(), Some("-Xms2G -Xmx2G"));

        let template = set.pod_template.as_ref().unwrap();
        let init: Vec<_> = template.spec.as_ref().unwrap().init_containers.as_ref().unwrap().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            init,
            vec!["elastic-internal-init-os-settings", "elastic-internal-init-log-selinux-context"]
        );
        let annotations = template.metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert!(annotations.contains_key(ELASTICSEARCH_TLS_HASH_ANNOTATION));
        assert!(annotations.contains_key("hash.operator.tigera.io/tigera-secure-internal-elasticsearch-cert"));
    }

    #[test]
    fn test_kibana_cr() {
        let mut cfg = base_cfg();
        cfg.installation.control_plane_replicas = Some(2);
        let (create, _) = render(cfg);
        let kb: Kibana = find(&create, "Kibana", KIBANA_NAME).unwrap().decode().unwrap();
        assert_eq!(kb.metadata.namespace.as_deref(), Some(KIBANA_NAMESPACE));
        assert_eq!(kb.spec.count, 2);
        assert_eq!(kb.spec.elasticsearch_ref.namespace, ELASTICSEARCH_NAMESPACE);
        assert_eq!(kb.spec.config["server"]["basePath"], "/tigera-kibana");
        assert_eq!(
            kb.spec.config["server"]["defaultRoute"],
            "/app/kibana#/dashboards?_g=(time:(from:now-24h,to:now))&title=Tigera%20Secure%20EE%20Flow%20Logs"
        );
        let spec = kb.spec.pod_template.unwrap().spec.unwrap();
        assert!(spec.affinity.unwrap().pod_anti_affinity.is_some());
        let probe = spec.containers[0].readiness_probe.as_ref().unwrap();
        assert_eq!(
            probe.http_get.as_ref().unwrap().path.as_deref(),
            Some("/tigera-kibana/login")
        );
    }

    #[test]
    fn test_deletion_only_removes_eck_resources() {
        let mut cfg = base_cfg();
        let mut ls = cfg.log_storage.take().unwrap();
        ls.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        cfg.log_storage = Some(ls);

        let mut es = Elasticsearch::new(ELASTICSEARCH_NAME, ElasticsearchSpec::default());
        es.metadata.namespace = Some(ELASTICSEARCH_NAMESPACE.to_string());
        cfg.elasticsearch = Some(es);
        let mut kb = Kibana::new(KIBANA_NAME, KibanaSpec::default());
        kb.metadata.namespace = Some(KIBANA_NAMESPACE.to_string());
        cfg.kibana = Some(kb.clone());

        let (create, delete) = render(cfg.clone());
        assert!(create.is_empty());
        assert_eq!(
            kinds_and_names(&delete),
            vec!["Elasticsearch/tigera-secure", "Kibana/tigera-secure"]
        );

        // Already terminating resources are left alone
        kb.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        cfg.kibana = Some(kb);
        let (_, delete) = render(cfg);
        assert_eq!(kinds_and_names(&delete), vec!["Elasticsearch/tigera-secure"]);
    }

    #[test]
    fn test_managed_cluster() {
        let mut cfg = base_cfg();
        cfg.log_storage = None;
        cfg.managed_cluster = true;
        let (create, delete) = render(cfg);
        assert!(delete.is_empty());
        assert_eq!(
            kinds_and_names(&create),
            vec![
                "Namespace/tigera-elasticsearch",
                "Service/tigera-secure-es-gateway-http"
            ]
        );
        let svc: Service = create[1].decode().unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ExternalName"));
        assert_eq!(
            spec.external_name.as_deref(),
            Some("tigera-guardian.tigera-guardian.svc.cluster.local")
        );
    }

    #[test]
    fn test_external_name_services_removed_after_managed_mode() {
        let mut cfg = base_cfg();
        let external = |name: &str, ns: &str| Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("ExternalName".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        cfg.es_service = Some(external(ES_GATEWAY_SERVICE_NAME, ELASTICSEARCH_NAMESPACE));
        let mut kb_svc = external(KIBANA_SERVICE_NAME, KIBANA_NAMESPACE);
        kb_svc.spec.as_mut().unwrap().type_ = Some("ClusterIP".to_string());
        cfg.kb_service = Some(kb_svc);

        let (_, delete) = render(cfg);
        assert_eq!(
            kinds_and_names(&delete),
            vec!["Service/tigera-secure-es-gateway-http"]
        );
    }

    #[test]
    fn test_fips_mode() {
        let mut cfg = base_cfg();
        cfg.installation.fips_mode = Some(FipsMode::Enabled);
        cfg.keystore_secret = Some(Secret {
            metadata: ObjectMeta {
                name: Some(ELASTICSEARCH_KEYSTORE_SECRET.to_string()),
                namespace: Some("tigera-operator".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                ELASTICSEARCH_KEYSTORE_ENV_NAME.to_string(),
                ByteString(b"s3cret".to_vec()),
            )])),
            ..Default::default()
        });
        let (create, delete) = render(cfg);

        assert!(find(&create, "Kibana", KIBANA_NAME).is_none());
        assert!(find(&create, "Namespace", KIBANA_NAMESPACE).is_none());
        assert!(find(&create, "ClusterRole", "tigera-kibana").is_none());
        assert_eq!(
            kinds_and_names(&delete),
            vec!["Kibana/tigera-secure", "CronJob/elastic-curator"]
        );

        let keystores: Vec<_> = create
            .iter()
            .filter(|o| o.kind() == "Secret" && o.name == ELASTICSEARCH_KEYSTORE_SECRET)
            .collect();
        assert_eq!(keystores.len(), 2);
        assert_eq!(keystores[0].namespace.as_deref(), Some("tigera-operator"));
        assert_eq!(keystores[1].namespace.as_deref(), Some(ELASTICSEARCH_NAMESPACE));
        let keystore: Secret = keystores[1].decode().unwrap();
        let opts = String::from_utf8(keystore.data.unwrap()["ES_JAVA_OPTS"].0.clone()).unwrap();
        assert!(opts.starts_with("-Xms2G -Xmx2G --module-path /usr/share/bc-fips/"));
        assert!(opts.contains("-Djavax.net.ssl.trustStorePassword=s3cret"));

        let es = elasticsearch(&create);
        assert_eq!(es.spec.image, "quay.io/tigera/elasticsearch:v3.15.0-fips");
        assert_eq!(es.spec.node_sets[0].config["xpack.security.fips_mode.enabled"], "true");
        let env = es_env(&es);
        assert!(env.iter().all(|e| e.value.is_none()));
        assert_eq!(env[1].name, "ES_JAVA_OPTS");
        let template = es.spec.node_sets[0].pod_template.as_ref().unwrap();
        let init = template.spec.as_ref().unwrap().init_containers.as_ref().unwrap();
        assert_eq!(init[1].name, "elastic-internal-init-keystore");
        assert!(template
            .metadata
            .as_ref()
            .unwrap()
            .annotations
            .as_ref()
            .unwrap()
            .contains_key(ELASTICSEARCH_KEYSTORE_HASH_ANNOTATION));
    }

    #[test]
    fn test_user_resources_size_jvm_heap_and_storage() {
        let mut cfg = base_cfg();
        cfg.log_storage = Some(log_storage_cr(json!({
            "nodes": {
                "count": 1,
                "resourceRequirements": {
                    "limits": {"memory": "10Gi", "storage": "50Gi"},
                    "requests": {"memory": "10Gi", "storage": "50Gi"}
                }
            }
        })));
        let (create, _) = render(cfg);
        let es = elasticsearch(&create);
        assert_eq!(es_env(&es)[0].value.as_deref(), Some("-Xms5G -Xmx5G"));

        let set = &es.spec.node_sets[0];
        let resources = set.pod_template.as_ref().unwrap().spec.as_ref().unwrap().containers[0]
            .resources
            .clone()
            .unwrap();
        assert_eq!(resources.limits.as_ref().unwrap()["cpu"], Quantity("1".to_string()));
        assert_eq!(resources.requests.as_ref().unwrap()["memory"], Quantity("10Gi".to_string()));

        let pvc = &set.volume_claim_templates[0];
        let storage = pvc.spec.as_ref().unwrap().resources.as_ref().unwrap();
        assert_eq!(storage.requests.as_ref().unwrap()["storage"], Quantity("50Gi".to_string()));

        // A different storage size yields a different node set name
        let (default_create, _) = render(base_cfg());
        assert_ne!(set.name, elasticsearch(&default_create).spec.node_sets[0].name);
    }

    #[test]
    fn test_node_sets_with_selection_attributes() {
        let mut cfg = base_cfg();
        let zone = |value: &str| {
            json!({"selectionAttributes": [
                {"name": "zone", "nodeLabel": "topology.kubernetes.io/zone", "value": value}
            ]})
        };
        cfg.log_storage = Some(log_storage_cr(json!({
            "nodes": {"count": 5, "nodeSets": [zone("us-west-2a"), zone("us-west-2b"), zone("us-west-2c")]}
        })));
        let (create, _) = render(cfg);
        let es = elasticsearch(&create);
        let sets = &es.spec.node_sets;
        assert_eq!(sets.iter().map(|s| s.count).collect::<Vec<_>>(), vec![2, 2, 1]);

        let base = node_set_name(&sets[0].volume_claim_templates[0]);
        assert_eq!(sets[0].name, format!("{base}-0"));
        assert_eq!(sets[2].name, format!("{base}-2"));

        assert_eq!(sets[1].config["node.attr.zone"], "us-west-2b");
        assert_eq!(
            sets[1].config["cluster.routing.allocation.awareness.attributes"],
            "zone"
        );
        let affinity = sets[1]
            .pod_template
            .as_ref()
            .unwrap()
            .spec
            .as_ref()
            .unwrap()
            .affinity
            .clone()
            .unwrap();
        let term = &affinity
            .node_affinity
            .unwrap()
            .required_during_scheduling_ignored_during_execution
            .unwrap()
            .node_selector_terms[0];
        let req = &term.match_expressions.as_ref().unwrap()[0];
        assert_eq!(req.key, "topology.kubernetes.io/zone");
        assert_eq!(req.values.as_ref().unwrap(), &vec!["us-west-2b".to_string()]);
    }

    #[test]
    fn test_distribute_nodes() {
        assert_eq!(distribute_nodes(5, 3), vec![2, 2, 1]);
        assert_eq!(distribute_nodes(6, 3), vec![2, 2, 2]);
        assert_eq!(distribute_nodes(2, 3), vec![1, 1]);
        assert_eq!(distribute_nodes(1, 1), vec![1]);
        assert!(distribute_nodes(0, 2).is_empty());
    }

    #[test]
    fn test_fnv1a_64() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
        let name = node_set_name(&PersistentVolumeClaim::default());
        assert_eq!(name.len(), 16);
        assert!(name.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_curator() {
        let mut cfg = base_cfg();
        cfg.curator_secrets = vec![curator_secret()];
        let (create, _) = render(cfg);
        let names = kinds_and_names(&create);
        let kibana = names.iter().position(|n| n == "Kibana/tigera-secure").unwrap();
        assert_eq!(
            names[kibana + 1..kibana + 7].to_vec(),
            vec![
                "NetworkPolicy/allow-tigera.allow-elastic-curator",
                "Secret/tigera-ee-curator-elasticsearch-access",
                "ServiceAccount/tigera-elastic-curator",
                "ClusterRole/elastic-curator",
                "ClusterRoleBinding/elastic-curator",
                "CronJob/elastic-curator",
            ]
        );
        let copied = find(&create, "Secret", ELASTICSEARCH_CURATOR_USER_SECRET).unwrap();
        assert_eq!(copied.namespace.as_deref(), Some(ELASTICSEARCH_NAMESPACE));

        let cj: CronJob = find(&create, "CronJob", ES_CURATOR_NAME).unwrap().decode().unwrap();
        let spec = cj.spec.unwrap();
        assert_eq!(spec.schedule, "@hourly");
        let pod = spec.job_template.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.service_account_name.as_deref(), Some(ES_CURATOR_SERVICE_ACCOUNT));
        let env = pod.containers[0].env.clone().unwrap();
        let value = |name: &str| {
            env.iter()
                .find(|e| e.name == name)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(value("EE_FLOWS_INDEX_RETENTION_PERIOD").as_deref(), Some("8"));
        assert_eq!(value("EE_AUDIT_INDEX_RETENTION_PERIOD").as_deref(), Some("91"));
        assert_eq!(value("EE_MAX_TOTAL_STORAGE_PCT").as_deref(), Some("80"));
        assert_eq!(value("EE_MAX_LOGS_STORAGE_PCT").as_deref(), Some("70"));
        assert_eq!(value("ELASTIC_INDEX_SUFFIX").as_deref(), Some("cluster"));
    }

    #[test]
    fn test_psp_and_provider_variants() {
        let (create, _) = render(base_cfg());
        assert!(find(&create, "PodSecurityPolicy", "tigera-kibana").is_none());
        assert!(find(&create, "ClusterRole", "tigera-kibana").is_some());

        let mut cfg = base_cfg();
        cfg.use_psp = true;
        cfg.apply_trial = true;
        cfg.installation.kubernetes_provider = Provider::DockerEe;
        let (create, _) = render(cfg);
        for name in [ECK_OPERATOR_NAME, "tigera-elasticsearch", "tigera-kibana"] {
            assert!(find(&create, "PodSecurityPolicy", name).is_some(), "{name}");
        }
        assert!(find(&create, "ClusterRoleBinding", "elastic-operator-docker-enterprise").is_some());
        let trial: Secret = find(&create, "Secret", ECK_ENTERPRISE_TRIAL).unwrap().decode().unwrap();
        assert_eq!(trial.metadata.namespace.as_deref(), Some(ECK_OPERATOR_NAMESPACE));

        let psp: PodSecurityPolicy = find(&create, "PodSecurityPolicy", "tigera-elasticsearch")
            .unwrap()
            .decode()
            .unwrap();
        assert!(psp.spec.privileged);
        assert_eq!(psp.spec.run_as_user.rule, "RunAsAny");

        let mut cfg = base_cfg();
        cfg.use_psp = true;
        cfg.installation.kubernetes_provider = Provider::OpenShift;
        let (create, _) = render(cfg);
        assert!(find(&create, "PodSecurityPolicy", ECK_OPERATOR_NAME).is_none());
        assert!(find(&create, "ClusterRole", "tigera-elasticsearch").is_none());
        let es = elasticsearch(&create);
        let container = &es.spec.node_sets[0].pod_template.as_ref().unwrap().spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.security_context.as_ref().unwrap().run_as_user,
            Some(1000)
        );
    }

    #[test]
    fn test_eck_operator_stateful_set() {
        let mut cfg = base_cfg();
        cfg.log_storage = Some(log_storage_cr(json!({
            "componentResources": [{
                "componentName": "ECKOperator",
                "resourceRequirements": {"limits": {"memory": "512Mi"}, "requests": {"memory": "256Mi"}}
            }]
        })));
        let (create, _) = render(cfg);
        let sts: StatefulSet = find(&create, "StatefulSet", ECK_OPERATOR_NAME)
            .unwrap()
            .decode()
            .unwrap();
        let pod = sts.spec.unwrap().template.spec.unwrap();
        let container = &pod.containers[0];
        let resources = container.resources.as_ref().unwrap();
        assert_eq!(resources.limits.as_ref().unwrap()["memory"], Quantity("512Mi".to_string()));
        assert_eq!(resources.requests.as_ref().unwrap()["cpu"], Quantity("100m".to_string()));
        assert!(container
            .args
            .as_ref()
            .unwrap()
            .contains(&"--namespaces=tigera-elasticsearch,tigera-kibana".to_string()));
        assert_eq!(pod.termination_grace_period_seconds, Some(10));
    }

    #[test]
    fn test_elasticsearch_policy() {
        let (create, _) = render(base_cfg());
        let policy: NetworkPolicy = find(&create, "NetworkPolicy", ELASTICSEARCH_POLICY_NAME)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(policy.spec.selector, elasticsearch_selector());
        assert_eq!(policy.spec.ingress.len(), 4);
        assert!(policy
            .spec
            .ingress
            .iter()
            .all(|r| r.destination.ports == vec![Port::Number(9200)]));
        assert!(policy.spec.ingress[3].source.is_empty());

        let internal: NetworkPolicy = find(&create, "NetworkPolicy", ELASTICSEARCH_INTERNAL_POLICY_NAME)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(internal.spec.egress[0].destination.ports, vec![Port::Number(9300)]);
    }

    #[test]
    fn test_license_type_from_config_map() {
        let cm = |level: &str| ConfigMap {
            data: Some(BTreeMap::from([(ECK_LICENSE_LEVEL_KEY.to_string(), level.to_string())])),
            ..Default::default()
        };
        assert_eq!(
            ElasticsearchLicenseType::from_config_map(Some(&cm("basic"))),
            ElasticsearchLicenseType::Basic
        );
        assert_eq!(
            ElasticsearchLicenseType::from_config_map(Some(&cm("enterprise_trial"))),
            ElasticsearchLicenseType::EnterpriseTrial
        );
        assert_eq!(
            ElasticsearchLicenseType::from_config_map(None),
            ElasticsearchLicenseType::Unknown
        );
        assert!(ElasticsearchLicenseType::Unknown.wants_trial());
        assert!(!ElasticsearchLicenseType::Enterprise.wants_trial());
    }

    #[test]
    fn test_missing_inputs_are_configuration_errors() {
        let mut cfg = base_cfg();
        cfg.cluster_config = None;
        let mut component = log_storage(cfg);
        component.resolve_images().unwrap();
        let err = component.objects().unwrap_err();
        assert!(err.to_string().contains("cluster config"));
    }
}
