//! Fluentd log collector
//!
//! Renders the per-node fluentd DaemonSet that ships flow, DNS and audit logs
//! to Elasticsearch and, when configured, to S3, Syslog and Splunk. On EKS an
//! extra Deployment forwards the cluster's Cloudwatch audit logs.
//!
//! The Linux and Windows DaemonSets are rendered by separate component
//! instances that share the namespace, policy and configuration objects.

use crate::certificates::{
    KeyPair, TrustedBundle, TRUSTED_BUNDLE_KEY, TRUSTED_BUNDLE_NAME, TRUSTED_CERT_BUNDLE_MOUNT_PATH,
};
use crate::crd::calico::{Action, EntityRule, NetworkPolicy, Protocol, Rule};
use crate::crd::policy::{AllowedHostPath, PodSecurityPolicy, PodSecurityPolicySpec, StrategyOptions};
use crate::crd::{InstallationSpec, LogCollector, Provider, SyslogLogType};
use crate::error::Result;
use crate::images;
use crate::render::elasticsearch::{container_decorate, decorate_annotations, ClusterConfig};
use crate::render::network_policy::{
    allow_all, allow_tcp_from, append_dns_egress_rules, component_policy, kubernetes_app_selector,
    prometheus_source_entity_rule, ES_GATEWAY_NAME, ES_GATEWAY_NAMESPACE, ES_GATEWAY_PORT,
    GUARDIAN_NAME, GUARDIAN_NAMESPACE, GUARDIAN_PORT,
};
use crate::render::{
    annotation_hash, cluster_role, cluster_role_binding, copy_secrets_to_namespace,
    create_namespace, critical_pods_resource_quota, env_var, field_env_var, os_path,
    policy_rule, psp_use_rule, pull_secret_references, render_all, role, role_binding,
    secret_env_var, service_account, Component, OsType, PodSecurityStandard, RenderedObject,
    RenderedObjects, NODE_PRIORITY_CLASS_NAME,
};
use crate::utils::parse_endpoint;
use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, Deployment, DeploymentSpec,
    DeploymentStrategy, RollingUpdateDaemonSet,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    ExecAction, HostPathVolumeSource, KeyToPath, PodSpec, PodTemplateSpec, Probe, Secret,
    SecretVolumeSource, SecurityContext, Service, ServicePort, ServiceSpec, Toleration, Volume,
    VolumeMount,
};
use k8s_openapi::api::rbac::v1::PolicyRule;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use serde::Serialize;
use std::collections::BTreeMap;

pub const LOG_COLLECTOR_NAMESPACE: &str = "tigera-fluentd";
pub const FLUENTD_FILTER_CONFIG_MAP_NAME: &str = "fluentd-filters";
pub const FLUENTD_FILTER_FLOW_NAME: &str = "flow";
pub const FLUENTD_FILTER_DNS_NAME: &str = "dns";
pub const S3_FLUENTD_SECRET_NAME: &str = "log-collector-s3-credentials";
pub const S3_KEY_ID_NAME: &str = "key-id";
pub const S3_KEY_SECRET_NAME: &str = "key-secret";
pub const FLUENTD_PROMETHEUS_TLS_SECRET_NAME: &str = "tigera-fluentd-prometheus-tls";
pub const FLUENTD_METRICS_SERVICE: &str = "fluentd-metrics";
pub const FLUENTD_METRICS_SERVICE_WINDOWS: &str = "fluentd-metrics-windows";
pub const FLUENTD_METRICS_PORT_NAME: &str = "fluentd-metrics-port";
pub const FLUENTD_METRICS_PORT: u16 = 9081;
pub const FLUENTD_POLICY_NAME: &str = "allow-tigera.allow-fluentd-node";
pub const FLUENTD_NODE_NAME: &str = "fluentd-node";
pub const FLUENTD_NODE_WINDOWS_NAME: &str = "fluentd-node-windows";
pub const ELASTICSEARCH_LOG_COLLECTOR_USER_SECRET: &str = "tigera-fluentd-elasticsearch-access";
pub const ELASTICSEARCH_EKS_LOG_FORWARDER_USER_SECRET: &str =
    "tigera-eks-log-forwarder-elasticsearch-access";
pub const EKS_LOG_FORWARDER_NAME: &str = "eks-log-forwarder";
pub const EKS_LOG_FORWARDER_SECRET: &str = "tigera-eks-log-forwarder-secret";
pub const EKS_LOG_FORWARDER_AWS_ID: &str = "aws-id";
pub const EKS_LOG_FORWARDER_AWS_KEY: &str = "aws-key";
pub const SPLUNK_FLUENTD_TOKEN_SECRET_NAME: &str = "logcollector-splunk-credentials";
pub const SPLUNK_FLUENTD_SECRET_TOKEN_KEY: &str = "token";
pub const SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME: &str = "logcollector-splunk-public-certificate";
pub const SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY: &str = "ca.pem";
pub const PACKET_CAPTURE_API_ROLE: &str = "packetcapture-api-role";
pub const PACKET_CAPTURE_API_ROLE_BINDING: &str = "packetcapture-api-role-binding";

const FLUENTD_NAME: &str = "tigera-fluentd";
const SPLUNK_CERTIFICATES_VOLUME: &str = "splunk-certificates";
const SPLUNK_CERT_DIR: &str = "/etc/ssl/splunk/";
const FLUSH_INTERVAL: &str = "5s";
const MANAGER_NAMESPACE: &str = "tigera-manager";
const MANAGER_SERVICE_ACCOUNT: &str = "tigera-manager";

const FILTER_HASH_ANNOTATION: &str = "hash.operator.tigera.io/fluentd-filters";
const S3_CREDENTIAL_HASH_ANNOTATION: &str = "hash.operator.tigera.io/s3-credentials";
const SPLUNK_CREDENTIAL_HASH_ANNOTATION: &str = "hash.operator.tigera.io/splunk-credentials";
const EKS_CLOUDWATCH_LOG_CREDENTIAL_HASH_ANNOTATION: &str =
    "hash.operator.tigera.io/eks-cloudwatch-log-credentials";

const PROBE_TIMEOUT_SECONDS: i32 = 5;
const PROBE_PERIOD_SECONDS: i32 = 5;
const PROBE_WINDOWS_TIMEOUT_SECONDS: i32 = 10;
const PROBE_WINDOWS_PERIOD_SECONDS: i32 = 10;
const PROBE_FAILURE_THRESHOLD: i32 = 3;
const STARTUP_PROBE_FAILURE_THRESHOLD: i32 = 10;

/// AWS credentials for S3 export
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct S3Credential {
    pub key_id: Vec<u8>,
    pub key_secret: Vec<u8>,
}

/// Splunk HEC token and optional CA certificate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplunkCredential {
    pub token: Vec<u8>,
    pub certificate: Vec<u8>,
}

/// User supplied fluentd filter snippets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FluentdFilters {
    pub flow: String,
    pub dns: String,
}

/// Everything the EKS Cloudwatch forwarder needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EksCloudwatchLogConfig {
    pub aws_id: Vec<u8>,
    pub aws_key: Vec<u8>,
    pub aws_region: String,
    pub group_name: String,
    pub stream_prefix: String,
    pub fetch_interval: i32,
}

/// Inputs for one fluentd render
#[derive(Debug, Clone)]
pub struct FluentdConfiguration {
    pub log_collector: LogCollector,
    pub es_secrets: Vec<Secret>,
    pub es_cluster_config: ClusterConfig,
    pub s3_credential: Option<S3Credential>,
    pub splunk_credential: Option<SplunkCredential>,
    pub filters: Option<FluentdFilters>,
    pub eks_config: Option<EksCloudwatchLogConfig>,
    pub pull_secrets: Vec<Secret>,
    pub installation: InstallationSpec,
    pub cluster_domain: String,
    pub os_type: OsType,
    /// Serving certificate for the metrics endpoint. Linux only.
    pub metrics_server_tls: Option<KeyPair>,
    pub trusted_bundle: TrustedBundle,
    pub managed_cluster: bool,
    pub use_psp: bool,
}

pub struct FluentdComponent {
    cfg: FluentdConfiguration,
    image: String,
}

pub fn fluentd(cfg: FluentdConfiguration) -> FluentdComponent {
    FluentdComponent {
        cfg,
        image: String::new(),
    }
}

impl Component for FluentdComponent {
    fn resolve_images(&mut self) -> Result<()> {
        let component = match self.cfg.os_type {
            OsType::Windows => images::FLUENTD_WINDOWS,
            _ => images::FLUENTD,
        };
        self.image = images::reference(component, &self.cfg.installation);
        Ok(())
    }

    fn objects(&self) -> Result<RenderedObjects> {
        let provider = self.cfg.installation.kubernetes_provider;
        let openshift = provider.is_openshift();
        let linux = self.cfg.os_type == OsType::Linux;

        let mut objs = vec![
            RenderedObject::new(&create_namespace(
                LOG_COLLECTOR_NAMESPACE,
                provider,
                PodSecurityStandard::Privileged,
            ))?,
            RenderedObject::new(&self.allow_tigera_policy())?,
        ];
        objs.extend(render_all(&copy_secrets_to_namespace(
            LOG_COLLECTOR_NAMESPACE,
            &self.cfg.pull_secrets,
        ))?);
        objs.push(RenderedObject::new(&self.metrics_service())?);

        if provider == Provider::Gke {
            // GKE only admits node-critical pods into namespaces with this quota
            objs.push(RenderedObject::new(&critical_pods_resource_quota(
                LOG_COLLECTOR_NAMESPACE,
            ))?);
        }
        if let Some(s3) = &self.cfg.s3_credential {
            objs.push(RenderedObject::new(&s3_credential_secret(s3))?);
        }
        if let Some(splunk) = &self.cfg.splunk_credential {
            objs.extend(render_all(&splunk_credential_secrets(splunk))?);
        }
        if let Some(filters) = &self.cfg.filters {
            objs.push(RenderedObject::new(&filters_config_map(filters))?);
        }

        if linux {
            if let Some(eks) = &self.cfg.eks_config {
                if !openshift {
                    objs.push(RenderedObject::new(&cluster_role(
                        EKS_LOG_FORWARDER_NAME,
                        self.psp_rules(EKS_LOG_FORWARDER_NAME),
                    ))?);
                    objs.push(RenderedObject::new(&cluster_role_binding(
                        EKS_LOG_FORWARDER_NAME,
                        EKS_LOG_FORWARDER_NAME,
                        EKS_LOG_FORWARDER_NAME,
                        LOG_COLLECTOR_NAMESPACE,
                    ))?);
                    if self.cfg.use_psp {
                        objs.push(RenderedObject::new(&eks_log_forwarder_pod_security_policy())?);
                    }
                }
                objs.push(RenderedObject::new(&service_account(
                    EKS_LOG_FORWARDER_NAME,
                    LOG_COLLECTOR_NAMESPACE,
                ))?);
                objs.push(RenderedObject::new(&eks_log_forwarder_secret(eks))?);
                objs.push(RenderedObject::new(&self.eks_log_forwarder_deployment(eks))?);
            }

            if !openshift {
                objs.push(RenderedObject::new(&cluster_role(
                    FLUENTD_NAME,
                    self.psp_rules(FLUENTD_NAME),
                ))?);
                objs.push(RenderedObject::new(&cluster_role_binding(
                    FLUENTD_NAME,
                    FLUENTD_NAME,
                    FLUENTD_NODE_NAME,
                    LOG_COLLECTOR_NAMESPACE,
                ))?);
                if self.cfg.use_psp {
                    objs.push(RenderedObject::new(&fluentd_pod_security_policy())?);
                }
            }
        }

        objs.extend(render_all(&copy_secrets_to_namespace(
            LOG_COLLECTOR_NAMESPACE,
            &self.cfg.es_secrets,
        ))?);
        objs.push(RenderedObject::new(&service_account(
            self.fluentd_node_name(),
            LOG_COLLECTOR_NAMESPACE,
        ))?);
        objs.push(RenderedObject::new(&role(
            PACKET_CAPTURE_API_ROLE,
            LOG_COLLECTOR_NAMESPACE,
            vec![
                policy_rule(&[""], &["pods/exec"], &["create"]),
                policy_rule(&[""], &["pods"], &["list"]),
            ],
        ))?);
        objs.push(RenderedObject::new(&role_binding(
            PACKET_CAPTURE_API_ROLE_BINDING,
            LOG_COLLECTOR_NAMESPACE,
            PACKET_CAPTURE_API_ROLE,
            MANAGER_SERVICE_ACCOUNT,
            MANAGER_NAMESPACE,
        ))?);
        objs.push(RenderedObject::new(&self.daemon_set()?)?);

        Ok((objs, Vec::new()))
    }

    fn ready(&self) -> bool {
        true
    }

    fn supported_os(&self) -> OsType {
        self.cfg.os_type
    }
}

impl FluentdComponent {
    fn windows(&self) -> bool {
        self.cfg.os_type == OsType::Windows
    }

    fn path(&self, path: &str) -> String {
        os_path(self.cfg.os_type, path)
    }

    fn fluentd_node_name(&self) -> &'static str {
        if self.windows() {
            FLUENTD_NODE_WINDOWS_NAME
        } else {
            FLUENTD_NODE_NAME
        }
    }

    fn metrics_service_name(&self) -> &'static str {
        if self.windows() {
            FLUENTD_METRICS_SERVICE_WINDOWS
        } else {
            FLUENTD_METRICS_SERVICE
        }
    }

    fn psp_rules(&self, psp_name: &str) -> Vec<PolicyRule> {
        if self.cfg.use_psp {
            vec![psp_use_rule(psp_name)]
        } else {
            Vec::new()
        }
    }

    fn allow_tigera_policy(&self) -> NetworkPolicy {
        let mut egress = Vec::new();
        if self.cfg.managed_cluster {
            egress.push(Rule {
                action: Action::Deny,
                protocol: Some(Protocol::Tcp),
                destination: EntityRule {
                    namespace_selector: format!("projectcalico.org/name == '{GUARDIAN_NAMESPACE}'"),
                    selector: kubernetes_app_selector(&[GUARDIAN_NAME]),
                    not_ports: vec![GUARDIAN_PORT.into()],
                    ..Default::default()
                },
                ..Default::default()
            });
        } else {
            egress.push(Rule {
                action: Action::Deny,
                protocol: Some(Protocol::Tcp),
                destination: EntityRule {
                    namespace_selector: format!("projectcalico.org/name == '{ES_GATEWAY_NAMESPACE}'"),
                    selector: format!("k8s-app == '{ES_GATEWAY_NAME}'"),
                    not_ports: vec![ES_GATEWAY_PORT.into()],
                    ..Default::default()
                },
                ..Default::default()
            });
            egress = append_dns_egress_rules(
                egress,
                self.cfg.installation.kubernetes_provider.is_openshift(),
            );
        }
        egress.push(allow_all());

        let ingress = vec![allow_tcp_from(
            prometheus_source_entity_rule(),
            &[FLUENTD_METRICS_PORT],
        )];

        component_policy(
            FLUENTD_POLICY_NAME,
            LOG_COLLECTOR_NAMESPACE,
            kubernetes_app_selector(&[FLUENTD_NODE_NAME, FLUENTD_NODE_WINDOWS_NAME]),
            ingress,
            egress,
        )
    }

    fn metrics_service(&self) -> Service {
        let labels = BTreeMap::from([("k8s-app".to_string(), self.fluentd_node_name().to_string())]);
        Service {
            metadata: ObjectMeta {
                name: Some(self.metrics_service_name().to_string()),
                namespace: Some(LOG_COLLECTOR_NAMESPACE.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(labels),
                // Headless so each node's collector is scraped individually
                cluster_ip: Some("None".to_string()),
                ports: Some(vec![ServicePort {
                    name: Some(FLUENTD_METRICS_PORT_NAME.to_string()),
                    port: i32::from(FLUENTD_METRICS_PORT),
                    target_port: Some(IntOrString::Int(i32::from(FLUENTD_METRICS_PORT))),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn daemon_set(&self) -> Result<DaemonSet> {
        let name = self.fluentd_node_name();
        let labels = BTreeMap::from([("k8s-app".to_string(), name.to_string())]);

        let mut annotations = self.cfg.trusted_bundle.hash_annotations();
        if let Some(tls) = &self.cfg.metrics_server_tls {
            annotations.insert(tls.hash_annotation_key(), tls.hash_annotation_value());
        }
        if let Some(s3) = &self.cfg.s3_credential {
            annotations.insert(S3_CREDENTIAL_HASH_ANNOTATION.to_string(), annotation_hash(s3));
        }
        if let Some(splunk) = &self.cfg.splunk_credential {
            annotations.insert(
                SPLUNK_CREDENTIAL_HASH_ANNOTATION.to_string(),
                annotation_hash(splunk),
            );
        }
        if let Some(filters) = &self.cfg.filters {
            annotations.insert(FILTER_HASH_ANNOTATION.to_string(), annotation_hash(filters));
        }

        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: Some(labels.clone()),
                annotations: Some(annotations),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                node_selector: Some(BTreeMap::new()),
                tolerations: Some(vec![
                    Toleration {
                        operator: Some("Exists".to_string()),
                        effect: Some("NoSchedule".to_string()),
                        ..Default::default()
                    },
                    Toleration {
                        operator: Some("Exists".to_string()),
                        effect: Some("NoExecute".to_string()),
                        ..Default::default()
                    },
                ]),
                image_pull_secrets: pull_secret_references(&self.cfg.pull_secrets),
                termination_grace_period_seconds: Some(0),
                containers: vec![self.container()?],
                volumes: Some(self.volumes()),
                service_account_name: Some(name.to_string()),
                priority_class_name: Some(NODE_PRIORITY_CLASS_NAME.to_string()),
                ..Default::default()
            }),
        };
        let template = decorate_annotations(template, &self.cfg.es_cluster_config, &self.cfg.es_secrets);

        Ok(DaemonSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(LOG_COLLECTOR_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: Some(DaemonSetSpec {
                selector: LabelSelector {
                    match_labels: Some(labels),
                    ..Default::default()
                },
                template,
                update_strategy: Some(DaemonSetUpdateStrategy {
                    type_: Some("RollingUpdate".to_string()),
                    rolling_update: Some(RollingUpdateDaemonSet {
                        max_unavailable: Some(IntOrString::Int(1)),
                        ..Default::default()
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    fn container(&self) -> Result<Container> {
        let (timeout, period) = if self.windows() {
            (PROBE_WINDOWS_TIMEOUT_SECONDS, PROBE_WINDOWS_PERIOD_SECONDS)
        } else {
            (PROBE_TIMEOUT_SECONDS, PROBE_PERIOD_SECONDS)
        };
        let probe = |script: &str, failure_threshold: i32, scale: i32| Probe {
            exec: Some(ExecAction {
                command: Some(self.probe_command(script)),
            }),
            timeout_seconds: Some(timeout * scale),
            period_seconds: Some(period * scale),
            failure_threshold: Some(failure_threshold),
            ..Default::default()
        };

        let container = Container {
            name: "fluentd".to_string(),
            image: Some(self.image.clone()),
            env: Some(self.env_vars()?),
            security_context: Some(SecurityContext {
                privileged: Some(self.cfg.installation.kubernetes_provider.is_openshift()),
                ..Default::default()
            }),
            volume_mounts: Some(self.volume_mounts()),
            startup_probe: Some(probe("liveness.sh", STARTUP_PROBE_FAILURE_THRESHOLD, 2)),
            readiness_probe: Some(probe("readiness.sh", PROBE_FAILURE_THRESHOLD, 1)),
            liveness_probe: Some(probe("liveness.sh", PROBE_FAILURE_THRESHOLD, 1)),
            ports: Some(vec![ContainerPort {
                name: Some("metrics-port".to_string()),
                container_port: i32::from(FLUENTD_METRICS_PORT),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Ok(container_decorate(
            container,
            self.cfg.es_cluster_config.cluster_name(),
            ELASTICSEARCH_LOG_COLLECTOR_USER_SECRET,
            &self.cfg.cluster_domain,
            self.cfg.os_type,
        ))
    }

    fn probe_command(&self, script: &str) -> Vec<String> {
        if self.windows() {
            vec![
                r"c:\ruby\msys64\usr\bin\bash.exe".to_string(),
                "-lc".to_string(),
                format!("/c/bin/{script}"),
            ]
        } else {
            vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("/bin/{script}"),
            ]
        }
    }

    fn env_vars(&self) -> Result<Vec<EnvVar>> {
        let mut envs = vec![
            env_var("FLUENT_UID", "0"),
            env_var("FLOW_LOG_FILE", self.path("/var/log/calico/flowlogs/flows.log")),
            env_var("DNS_LOG_FILE", self.path("/var/log/calico/dnslogs/dns.log")),
            env_var("FLUENTD_ES_SECURE", "true"),
            field_env_var("NODENAME", "spec.nodeName"),
        ];

        let spec = &self.cfg.log_collector.spec;
        if let (Some(s3), Some(_)) = (spec.s3(), &self.cfg.s3_credential) {
            envs.extend([
                secret_env_var("AWS_KEY_ID", S3_FLUENTD_SECRET_NAME, S3_KEY_ID_NAME),
                secret_env_var("AWS_SECRET_KEY", S3_FLUENTD_SECRET_NAME, S3_KEY_SECRET_NAME),
                env_var("S3_STORAGE", "true"),
                env_var("S3_BUCKET_NAME", s3.bucket_name.clone()),
                env_var("AWS_REGION", s3.region.clone()),
                env_var("S3_BUCKET_PATH", s3.bucket_path.clone()),
                env_var("S3_FLUSH_INTERVAL", FLUSH_INTERVAL),
            ]);
        }

        if let Some(syslog) = spec.syslog() {
            let endpoint = parse_endpoint(&syslog.endpoint)?;
            envs.extend([
                env_var("SYSLOG_HOST", endpoint.host),
                env_var("SYSLOG_PORT", endpoint.port),
                env_var("SYSLOG_PROTOCOL", endpoint.protocol),
                env_var("SYSLOG_FLUSH_INTERVAL", FLUSH_INTERVAL),
                field_env_var("SYSLOG_HOSTNAME", "spec.nodeName"),
            ]);
            if let Some(size) = syslog.packet_size {
                envs.push(env_var("SYSLOG_PACKET_SIZE", size.to_string()));
            }
            for log_type in &syslog.log_types {
                match log_type {
                    SyslogLogType::Audit => envs.extend([
                        env_var("SYSLOG_AUDIT_EE_LOG", "true"),
                        env_var("SYSLOG_AUDIT_KUBE_LOG", "true"),
                    ]),
                    SyslogLogType::Dns => envs.push(env_var("SYSLOG_DNS_LOG", "true")),
                    SyslogLogType::Flows => envs.push(env_var("SYSLOG_FLOW_LOG", "true")),
                    SyslogLogType::IdsEvents => {
                        envs.push(env_var("SYSLOG_IDS_EVENT_LOG", "true"))
                    }
                }
            }
        }

        if let (Some(splunk), Some(credential)) = (spec.splunk(), &self.cfg.splunk_credential) {
            let endpoint = parse_endpoint(&splunk.endpoint)?;
            envs.extend([
                secret_env_var(
                    "SPLUNK_HEC_TOKEN",
                    SPLUNK_FLUENTD_TOKEN_SECRET_NAME,
                    SPLUNK_FLUENTD_SECRET_TOKEN_KEY,
                ),
                env_var("SPLUNK_FLOW_LOG", "true"),
                env_var("SPLUNK_AUDIT_LOG", "true"),
                env_var("SPLUNK_DNS_LOG", "true"),
                env_var("SPLUNK_HEC_HOST", endpoint.host),
                env_var("SPLUNK_HEC_PORT", endpoint.port),
                env_var("SPLUNK_PROTOCOL", endpoint.protocol),
                env_var("SPLUNK_FLUSH_INTERVAL", FLUSH_INTERVAL),
            ]);
            if !credential.certificate.is_empty() {
                envs.push(env_var(
                    "SPLUNK_CA_FILE",
                    format!("{SPLUNK_CERT_DIR}{SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY}"),
                ));
            }
        }

        if let Some(filters) = &self.cfg.filters {
            if !filters.flow.is_empty() {
                envs.push(env_var("FLUENTD_FLOW_FILTERS", "true"));
            }
            if !filters.dns.is_empty() {
                envs.push(env_var("FLUENTD_DNS_FILTERS", "true"));
            }
        }

        let es = &self.cfg.es_cluster_config;
        let replicas = es.replicas().to_string();
        let shards = es.shards().to_string();
        envs.extend([
            env_var("ELASTIC_FLOWS_INDEX_REPLICAS", replicas.clone()),
            env_var("ELASTIC_DNS_INDEX_REPLICAS", replicas.clone()),
            env_var("ELASTIC_AUDIT_INDEX_REPLICAS", replicas.clone()),
            env_var("ELASTIC_BGP_INDEX_REPLICAS", replicas),
            env_var("ELASTIC_FLOWS_INDEX_SHARDS", es.flow_shards().to_string()),
            env_var("ELASTIC_DNS_INDEX_SHARDS", shards.clone()),
            env_var("ELASTIC_AUDIT_INDEX_SHARDS", shards.clone()),
            env_var("ELASTIC_BGP_INDEX_SHARDS", shards),
        ]);

        if !self.windows() {
            if let Some(tls) = &self.cfg.metrics_server_tls {
                envs.extend([
                    env_var("CA_CRT_PATH", TRUSTED_CERT_BUNDLE_MOUNT_PATH),
                    env_var("TLS_KEY_PATH", tls.volume_mount_key_file_path(OsType::Linux)),
                    env_var("TLS_CRT_PATH", tls.volume_mount_certificate_file_path(OsType::Linux)),
                ]);
            }
        }

        Ok(envs)
    }

    fn volume_mounts(&self) -> Vec<VolumeMount> {
        let mut mounts = vec![
            VolumeMount {
                name: "var-log-calico".to_string(),
                mount_path: self.path("/var/log/calico"),
                ..Default::default()
            },
            VolumeMount {
                name: TRUSTED_BUNDLE_NAME.to_string(),
                mount_path: self.path("/etc/fluentd/elastic"),
                ..Default::default()
            },
        ];
        if let Some(filters) = &self.cfg.filters {
            if !filters.flow.is_empty() {
                mounts.push(VolumeMount {
                    name: FLUENTD_FILTER_CONFIG_MAP_NAME.to_string(),
                    mount_path: self.path("/etc/fluentd/flow-filters.conf"),
                    sub_path: Some(FLUENTD_FILTER_FLOW_NAME.to_string()),
                    ..Default::default()
                });
            }
            if !filters.dns.is_empty() {
                mounts.push(VolumeMount {
                    name: FLUENTD_FILTER_CONFIG_MAP_NAME.to_string(),
                    mount_path: self.path("/etc/fluentd/dns-filters.conf"),
                    sub_path: Some(FLUENTD_FILTER_DNS_NAME.to_string()),
                    ..Default::default()
                });
            }
        }
        if self.has_splunk_certificate() {
            mounts.push(VolumeMount {
                name: SPLUNK_CERTIFICATES_VOLUME.to_string(),
                mount_path: self.path(SPLUNK_CERT_DIR),
                ..Default::default()
            });
        }
        mounts.push(self.cfg.trusted_bundle.volume_mount(self.cfg.os_type));
        if let Some(tls) = &self.cfg.metrics_server_tls {
            mounts.push(tls.volume_mount(self.cfg.os_type));
        }
        mounts
    }

    fn has_splunk_certificate(&self) -> bool {
        self.cfg
            .splunk_credential
            .as_ref()
            .is_some_and(|c| !c.certificate.is_empty())
    }

    fn volumes(&self) -> Vec<Volume> {
        let log_dir = if self.windows() {
            "c:/TigeraCalico"
        } else {
            "/var/log/calico"
        };
        let mut volumes = vec![Volume {
            name: "var-log-calico".to_string(),
            host_path: Some(HostPathVolumeSource {
                path: log_dir.to_string(),
                type_: Some("DirectoryOrCreate".to_string()),
            }),
            ..Default::default()
        }];
        if self.cfg.filters.is_some() {
            volumes.push(Volume {
                name: FLUENTD_FILTER_CONFIG_MAP_NAME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: FLUENTD_FILTER_CONFIG_MAP_NAME.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        if self.has_splunk_certificate() {
            volumes.push(Volume {
                name: SPLUNK_CERTIFICATES_VOLUME.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: Some(SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME.to_string()),
                    items: Some(vec![KeyToPath {
                        key: SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY.to_string(),
                        path: SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY.to_string(),
                        mode: None,
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            });
        }
        if let Some(tls) = &self.cfg.metrics_server_tls {
            volumes.push(tls.volume());
        }
        volumes.push(trusted_bundle_volume_with_ca_alias());
        volumes
    }

    fn eks_log_forwarder_deployment(&self, eks: &EksCloudwatchLogConfig) -> Deployment {
        let labels = BTreeMap::from([(
            "k8s-app".to_string(),
            EKS_LOG_FORWARDER_NAME.to_string(),
        )]);
        let mut annotations = self.cfg.trusted_bundle.hash_annotations();
        annotations.insert(
            EKS_CLOUDWATCH_LOG_CREDENTIAL_HASH_ANNOTATION.to_string(),
            annotation_hash(eks),
        );

        let env = vec![
            env_var("LOG_LEVEL", "info"),
            env_var("FLUENT_UID", "0"),
            env_var("MANAGED_K8S", "true"),
            env_var("K8S_PLATFORM", "eks"),
            env_var("FLUENTD_ES_SECURE", "true"),
            env_var("EKS_CLOUDWATCH_LOG_GROUP", eks.group_name.clone()),
            env_var("EKS_CLOUDWATCH_LOG_STREAM_PREFIX", eks.stream_prefix.clone()),
            env_var(
                "EKS_CLOUDWATCH_LOG_FETCH_INTERVAL",
                eks.fetch_interval.to_string(),
            ),
            env_var("AWS_REGION", eks.aws_region.clone()),
            secret_env_var("AWS_ACCESS_KEY_ID", EKS_LOG_FORWARDER_SECRET, EKS_LOG_FORWARDER_AWS_ID),
            secret_env_var(
                "AWS_SECRET_ACCESS_KEY",
                EKS_LOG_FORWARDER_SECRET,
                EKS_LOG_FORWARDER_AWS_KEY,
            ),
        ];
        let mounts = vec![
            self.cfg.trusted_bundle.volume_mount(OsType::Linux),
            VolumeMount {
                name: "plugin-statefile-dir".to_string(),
                mount_path: "/fluentd/cloudwatch-logs/".to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: TRUSTED_BUNDLE_NAME.to_string(),
                mount_path: "/etc/fluentd/elastic/".to_string(),
                ..Default::default()
            },
        ];
        let decorate = |c: Container| {
            container_decorate(
                c,
                self.cfg.es_cluster_config.cluster_name(),
                ELASTICSEARCH_EKS_LOG_FORWARDER_USER_SECRET,
                &self.cfg.cluster_domain,
                OsType::Linux,
            )
        };
        let init = decorate(Container {
            name: format!("{EKS_LOG_FORWARDER_NAME}-startup"),
            image: Some(self.image.clone()),
            command: Some(vec!["/bin/eks-log-forwarder-startup".to_string()]),
            env: Some(env.clone()),
            volume_mounts: Some(mounts.clone()),
            ..Default::default()
        });
        let main = decorate(Container {
            name: EKS_LOG_FORWARDER_NAME.to_string(),
            image: Some(self.image.clone()),
            env: Some(env),
            volume_mounts: Some(mounts),
            ..Default::default()
        });

        let installation = &self.cfg.installation;
        Deployment {
            metadata: ObjectMeta {
                name: Some(EKS_LOG_FORWARDER_NAME.to_string()),
                namespace: Some(LOG_COLLECTOR_NAMESPACE.to_string()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                strategy: Some(DeploymentStrategy {
                    type_: Some("Recreate".to_string()),
                    ..Default::default()
                }),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        name: Some(EKS_LOG_FORWARDER_NAME.to_string()),
                        namespace: Some(LOG_COLLECTOR_NAMESPACE.to_string()),
                        labels: Some(labels),
                        annotations: Some(annotations),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        node_selector: Some(installation.control_plane_node_selector.clone()),
                        tolerations: Some(installation.control_plane_tolerations.clone()),
                        service_account_name: Some(EKS_LOG_FORWARDER_NAME.to_string()),
                        image_pull_secrets: pull_secret_references(&self.cfg.pull_secrets),
                        init_containers: Some(vec![init]),
                        containers: vec![main],
                        volumes: Some(vec![
                            trusted_bundle_volume_with_ca_alias(),
                            Volume {
                                name: "plugin-statefile-dir".to_string(),
                                empty_dir: Some(EmptyDirVolumeSource::default()),
                                ..Default::default()
                            },
                        ]),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// The trusted bundle, also exposed as `ca.pem` for fluentd's Elasticsearch output.
fn trusted_bundle_volume_with_ca_alias() -> Volume {
    Volume {
        name: TRUSTED_BUNDLE_NAME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: TRUSTED_BUNDLE_NAME.to_string(),
            items: Some(vec![
                KeyToPath {
                    key: TRUSTED_BUNDLE_KEY.to_string(),
                    path: TRUSTED_BUNDLE_KEY.to_string(),
                    mode: None,
                },
                KeyToPath {
                    key: TRUSTED_BUNDLE_KEY.to_string(),
                    path: "ca.pem".to_string(),
                    mode: None,
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn opaque_secret(name: &str, data: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(LOG_COLLECTOR_NAMESPACE.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.to_vec())))
                .collect(),
        ),
        ..Default::default()
    }
}

fn s3_credential_secret(s3: &S3Credential) -> Secret {
    opaque_secret(
        S3_FLUENTD_SECRET_NAME,
        &[
            (S3_KEY_ID_NAME, &s3.key_id),
            (S3_KEY_SECRET_NAME, &s3.key_secret),
        ],
    )
}

fn splunk_credential_secrets(splunk: &SplunkCredential) -> Vec<Secret> {
    let mut secrets = vec![opaque_secret(
        SPLUNK_FLUENTD_TOKEN_SECRET_NAME,
        &[(SPLUNK_FLUENTD_SECRET_TOKEN_KEY, &splunk.token)],
    )];
    if !splunk.certificate.is_empty() {
        secrets.push(opaque_secret(
            SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME,
            &[(SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY, &splunk.certificate)],
        ));
    }
    secrets
}

fn eks_log_forwarder_secret(eks: &EksCloudwatchLogConfig) -> Secret {
    opaque_secret(
        EKS_LOG_FORWARDER_SECRET,
        &[
            (EKS_LOG_FORWARDER_AWS_ID, &eks.aws_id),
            (EKS_LOG_FORWARDER_AWS_KEY, &eks.aws_key),
        ],
    )
}

fn filters_config_map(filters: &FluentdFilters) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(FLUENTD_FILTER_CONFIG_MAP_NAME.to_string()),
            namespace: Some(LOG_COLLECTOR_NAMESPACE.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([
            (FLUENTD_FILTER_FLOW_NAME.to_string(), filters.flow.clone()),
            (FLUENTD_FILTER_DNS_NAME.to_string(), filters.dns.clone()),
        ])),
        ..Default::default()
    }
}

fn fluentd_pod_security_policy() -> PodSecurityPolicy {
    let mut spec = PodSecurityPolicySpec::base();
    spec.required_drop_capabilities = Vec::new();
    spec.allowed_capabilities = vec!["CAP_CHOWN".to_string()];
    spec.volumes.push("hostPath".to_string());
    spec.allowed_host_paths = vec![AllowedHostPath {
        path_prefix: "/var/log/calico".to_string(),
        read_only: false,
    }];
    spec.run_as_user = StrategyOptions::rule("RunAsAny");
    PodSecurityPolicy::new(FLUENTD_NAME, spec)
}

fn eks_log_forwarder_pod_security_policy() -> PodSecurityPolicy {
    let mut spec = PodSecurityPolicySpec::base();
    spec.run_as_user = StrategyOptions::rule("RunAsAny");
    PodSecurityPolicy::new(EKS_LOG_FORWARDER_NAME, spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::{Certificate, CertificateManager};
    use crate::crd::calico::Port;
    use crate::crd::{AdditionalLogStoreSpec, LogCollectorSpec, S3StoreSpec, SplunkStoreSpec, SyslogStoreSpec};
    use crate::render::test_helpers::{find, kinds_and_names};

    fn base_cfg() -> FluentdConfiguration {
        let ca = Certificate {
            name: "tigera-ca-private".to_string(),
            cert_pem: "CA".to_string(),
        };
        FluentdConfiguration {
            log_collector: LogCollector::new("tigera-secure", LogCollectorSpec::default()),
            es_secrets: Vec::new(),
            es_cluster_config: ClusterConfig::new("clusterTestName", 1, 5, 5),
            s3_credential: None,
            splunk_credential: None,
            filters: None,
            eks_config: None,
            pull_secrets: Vec::new(),
            installation: InstallationSpec::default(),
            cluster_domain: "cluster.local".to_string(),
            os_type: OsType::Linux,
            metrics_server_tls: None,
            trusted_bundle: TrustedBundle::new(ca),
            managed_cluster: false,
            use_psp: false,
        }
    }

    fn render(cfg: FluentdConfiguration) -> Vec<RenderedObject> {
        let mut component = fluentd(cfg);
        component.resolve_images().unwrap();
        let (create, delete) = component.objects().unwrap();
        assert!(delete.is_empty());
        create
    }

    fn daemon_set(objs: &[RenderedObject], name: &str) -> DaemonSet {
        find(objs, "DaemonSet", name).unwrap().decode().unwrap()
    }

    fn env_of(ds: &DaemonSet) -> Vec<EnvVar> {
        ds.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
            .env
            .clone()
            .unwrap()
    }

    fn env_value<'a>(envs: &'a [EnvVar], name: &str) -> Option<&'a str> {
        envs.iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.as_deref())
    }

    #[test]
    fn test_default_objects() {
        let objs = render(base_cfg());
        assert_eq!(
            kinds_and_names(&objs),
            vec![
                "Namespace/tigera-fluentd",
                "NetworkPolicy/allow-tigera.allow-fluentd-node",
                "Service/fluentd-metrics",
                "ClusterRole/tigera-fluentd",
                "ClusterRoleBinding/tigera-fluentd",
                "ServiceAccount/fluentd-node",
                "Role/packetcapture-api-role",
                "RoleBinding/packetcapture-api-role-binding",
                "DaemonSet/fluentd-node",
            ]
        );

        let ds = daemon_set(&objs, "fluentd-node");
        let spec = ds.spec.as_ref().unwrap();
        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.termination_grace_period_seconds, Some(0));
        assert_eq!(pod.priority_class_name.as_deref(), Some("system-node-critical"));
        assert_eq!(pod.tolerations.as_ref().unwrap().len(), 2);
        assert_eq!(
            spec.update_strategy.as_ref().unwrap().rolling_update.as_ref().unwrap().max_unavailable,
            Some(IntOrString::Int(1))
        );

        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("quay.io/tigera/fluentd:v3.15.0"));
        assert_eq!(c.security_context.as_ref().unwrap().privileged, Some(false));
        let readiness = c.readiness_probe.as_ref().unwrap();
        assert_eq!(
            readiness.exec.as_ref().unwrap().command.as_ref().unwrap(),
            &vec!["sh".to_string(), "-c".to_string(), "/bin/readiness.sh".to_string()]
        );
        assert_eq!(readiness.timeout_seconds, Some(5));
        let startup = c.startup_probe.as_ref().unwrap();
        assert_eq!(startup.failure_threshold, Some(10));
        assert_eq!(startup.period_seconds, Some(10));

        let envs = env_of(&ds);
        assert_eq!(env_value(&envs, "FLUENT_UID"), Some("0"));
        assert_eq!(
            env_value(&envs, "FLOW_LOG_FILE"),
            Some("/var/log/calico/flowlogs/flows.log")
        );
        assert_eq!(env_value(&envs, "ELASTIC_FLOWS_INDEX_REPLICAS"), Some("1"));
        assert_eq!(env_value(&envs, "ELASTIC_FLOWS_INDEX_SHARDS"), Some("5"));
        assert_eq!(env_value(&envs, "ELASTIC_INDEX_SUFFIX"), Some("clusterTestName"));
        assert!(env_value(&envs, "S3_STORAGE").is_none());
    }

    #[test]
    fn test_policy_for_standalone_and_managed() {
        let objs = render(base_cfg());
        let policy: NetworkPolicy = find(&objs, "NetworkPolicy", FLUENTD_POLICY_NAME)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(
            policy.spec.selector,
            "k8s-app in { 'fluentd-node', 'fluentd-node-windows' }"
        );
        assert_eq!(policy.spec.egress[0].action, Action::Deny);
        assert_eq!(policy.spec.egress[0].destination.not_ports, vec![Port::Number(5554)]);
        assert_eq!(policy.spec.egress.last().unwrap(), &allow_all());
        assert_eq!(policy.spec.ingress[0].destination.ports, vec![Port::Number(9081)]);

        let mut cfg = base_cfg();
        cfg.managed_cluster = true;
        let objs = render(cfg);
        let policy: NetworkPolicy = find(&objs, "NetworkPolicy", FLUENTD_POLICY_NAME)
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(policy.spec.egress.len(), 2);
        assert_eq!(policy.spec.egress[0].destination.not_ports, vec![Port::Number(8080)]);
    }

    #[test]
    fn test_s3_export() {
        let mut cfg = base_cfg();
        cfg.log_collector.spec.additional_stores = Some(AdditionalLogStoreSpec {
            s3: Some(S3StoreSpec {
                region: "anyplace".to_string(),
                bucket_name: "thebucket".to_string(),
                bucket_path: "bucketpath".to_string(),
            }),
            ..Default::default()
        });
        cfg.s3_credential = Some(S3Credential {
            key_id: b"IdForTheKey".to_vec(),
            key_secret: b"SecretForTheKey".to_vec(),
        });
        let objs = render(cfg);
        assert!(find(&objs, "Secret", S3_FLUENTD_SECRET_NAME).is_some());

        let ds = daemon_set(&objs, "fluentd-node");
        let envs = env_of(&ds);
        assert_eq!(env_value(&envs, "S3_STORAGE"), Some("true"));
        assert_eq!(env_value(&envs, "S3_BUCKET_NAME"), Some("thebucket"));
        assert_eq!(env_value(&envs, "AWS_REGION"), Some("anyplace"));
        assert_eq!(env_value(&envs, "S3_FLUSH_INTERVAL"), Some("5s"));
        let annotations = ds.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
        assert!(annotations.contains_key(S3_CREDENTIAL_HASH_ANNOTATION));
    }

    #[test]
    fn test_syslog_export() {
        let mut cfg = base_cfg();
        cfg.log_collector.spec.additional_stores = Some(AdditionalLogStoreSpec {
            syslog: Some(SyslogStoreSpec {
                endpoint: "udp://1.2.3.4:80".to_string(),
                packet_size: Some(1024),
                log_types: vec![SyslogLogType::Audit, SyslogLogType::Dns, SyslogLogType::Flows],
            }),
            ..Default::default()
        });
        let objs = render(cfg);
        let envs = env_of(&daemon_set(&objs, "fluentd-node"));
        assert_eq!(env_value(&envs, "SYSLOG_HOST"), Some("1.2.3.4"));
        assert_eq!(env_value(&envs, "SYSLOG_PORT"), Some("80"));
        assert_eq!(env_value(&envs, "SYSLOG_PROTOCOL"), Some("udp"));
        assert_eq!(env_value(&envs, "SYSLOG_PACKET_SIZE"), Some("1024"));
        assert_eq!(env_value(&envs, "SYSLOG_AUDIT_EE_LOG"), Some("true"));
        assert_eq!(env_value(&envs, "SYSLOG_AUDIT_KUBE_LOG"), Some("true"));
        assert_eq!(env_value(&envs, "SYSLOG_DNS_LOG"), Some("true"));
        assert_eq!(env_value(&envs, "SYSLOG_FLOW_LOG"), Some("true"));
        assert!(env_value(&envs, "SYSLOG_IDS_EVENT_LOG").is_none());
        let hostname = envs.iter().find(|e| e.name == "SYSLOG_HOSTNAME").unwrap();
        assert_eq!(
            hostname.value_from.as_ref().unwrap().field_ref.as_ref().unwrap().field_path,
            "spec.nodeName"
        );
    }

    #[test]
    fn test_splunk_export_with_certificate() {
        let mut cfg = base_cfg();
        cfg.log_collector.spec.additional_stores = Some(AdditionalLogStoreSpec {
            splunk: Some(SplunkStoreSpec {
                endpoint: "https://1.2.3.4:8088".to_string(),
            }),
            ..Default::default()
        });
        cfg.splunk_credential = Some(SplunkCredential {
            token: b"TokenForHEC".to_vec(),
            certificate: b"Certificates".to_vec(),
        });
        let objs = render(cfg);
        assert!(find(&objs, "Secret", SPLUNK_FLUENTD_TOKEN_SECRET_NAME).is_some());
        assert!(find(&objs, "Secret", SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME).is_some());

        let ds = daemon_set(&objs, "fluentd-node");
        let envs = env_of(&ds);
        assert_eq!(env_value(&envs, "SPLUNK_HEC_HOST"), Some("1.2.3.4"));
        assert_eq!(env_value(&envs, "SPLUNK_HEC_PORT"), Some("8088"));
        assert_eq!(env_value(&envs, "SPLUNK_PROTOCOL"), Some("https"));
        assert_eq!(env_value(&envs, "SPLUNK_CA_FILE"), Some("/etc/ssl/splunk/ca.pem"));

        let pod = ds.spec.unwrap().template.spec.unwrap();
        assert!(pod
            .volumes
            .unwrap()
            .iter()
            .any(|v| v.name == SPLUNK_CERTIFICATES_VOLUME));
        assert!(pod.containers[0]
            .volume_mounts
            .as_ref()
            .unwrap()
            .iter()
            .any(|m| m.mount_path == "/etc/ssl/splunk/"));
    }

    #[test]
    fn test_filters() {
        let mut cfg = base_cfg();
        cfg.filters = Some(FluentdFilters {
            flow: "flow-filter".to_string(),
            dns: String::new(),
        });
        let objs = render(cfg);
        assert!(find(&objs, "ConfigMap", FLUENTD_FILTER_CONFIG_MAP_NAME).is_some());
        let envs = env_of(&daemon_set(&objs, "fluentd-node"));
        assert_eq!(env_value(&envs, "FLUENTD_FLOW_FILTERS"), Some("true"));
        assert!(env_value(&envs, "FLUENTD_DNS_FILTERS").is_none());
    }

    #[test]
    fn test_eks_log_forwarder() {
        let mut cfg = base_cfg();
        cfg.installation.kubernetes_provider = Provider::Eks;
        cfg.use_psp = true;
        cfg.eks_config = Some(EksCloudwatchLogConfig {
            aws_id: b"aws-id".to_vec(),
            aws_key: b"aws-key".to_vec(),
            aws_region: "us-west-1".to_string(),
            group_name: "dummy-eks-cluster-cloudwatch-log-group".to_string(),
            stream_prefix: "kube-apiserver-audit-".to_string(),
            fetch_interval: 900,
        });
        let objs = render(cfg);
        let names = kinds_and_names(&objs);
        for expected in [
            "ClusterRole/eks-log-forwarder",
            "ClusterRoleBinding/eks-log-forwarder",
            "PodSecurityPolicy/eks-log-forwarder",
            "ServiceAccount/eks-log-forwarder",
            "Secret/tigera-eks-log-forwarder-secret",
            "Deployment/eks-log-forwarder",
            "PodSecurityPolicy/tigera-fluentd",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }

        let deploy: Deployment = find(&objs, "Deployment", EKS_LOG_FORWARDER_NAME)
            .unwrap()
            .decode()
            .unwrap();
        let spec = deploy.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(spec.strategy.unwrap().type_.as_deref(), Some("Recreate"));
        let pod = spec.template.spec.unwrap();
        let init = &pod.init_containers.unwrap()[0];
        assert_eq!(init.command.as_ref().unwrap()[0], "/bin/eks-log-forwarder-startup");
        let envs = pod.containers[0].env.clone().unwrap();
        assert_eq!(env_value(&envs, "EKS_CLOUDWATCH_LOG_FETCH_INTERVAL"), Some("900"));
        assert_eq!(env_value(&envs, "K8S_PLATFORM"), Some("eks"));
    }

    #[test]
    fn test_gke_resource_quota() {
        let mut cfg = base_cfg();
        cfg.installation.kubernetes_provider = Provider::Gke;
        let objs = render(cfg);
        assert!(find(&objs, "ResourceQuota", "tigera-critical-pods").is_some());
    }

    #[test]
    fn test_openshift_is_privileged_without_rbac() {
        let mut cfg = base_cfg();
        cfg.installation.kubernetes_provider = Provider::OpenShift;
        let objs = render(cfg);
        assert!(find(&objs, "ClusterRole", "tigera-fluentd").is_none());
        let ds = daemon_set(&objs, "fluentd-node");
        let c = &ds.spec.unwrap().template.spec.unwrap().containers[0];
        assert_eq!(c.security_context.as_ref().unwrap().privileged, Some(true));
    }

    #[test]
    fn test_windows_variant() {
        let mut cfg = base_cfg();
        cfg.os_type = OsType::Windows;
        let objs = render(cfg);
        assert!(find(&objs, "ClusterRole", "tigera-fluentd").is_none());
        assert!(find(&objs, "Service", FLUENTD_METRICS_SERVICE_WINDOWS).is_some());

        let ds = daemon_set(&objs, FLUENTD_NODE_WINDOWS_NAME);
        let pod = ds.spec.as_ref().unwrap().template.spec.clone().unwrap();
        let c = &pod.containers[0];
        assert_eq!(c.image.as_deref(), Some("quay.io/tigera/fluentd-windows:v3.15.0"));
        let liveness = c.liveness_probe.as_ref().unwrap();
        assert_eq!(
            liveness.exec.as_ref().unwrap().command.as_ref().unwrap()[2],
            "/c/bin/liveness.sh"
        );
        assert_eq!(liveness.timeout_seconds, Some(10));

        let log_volume = &pod.volumes.unwrap()[0];
        assert_eq!(log_volume.host_path.as_ref().unwrap().path, "c:/TigeraCalico");

        let envs = env_of(&ds);
        assert_eq!(
            env_value(&envs, "FLOW_LOG_FILE"),
            Some("c:/var/log/calico/flowlogs/flows.log")
        );
        assert!(env_value(&envs, "TLS_KEY_PATH").is_none());
    }

    #[test]
    fn test_metrics_tls() {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let mut cfg = base_cfg();
        cfg.metrics_server_tls = Some(
            cm.issue_key_pair(FLUENTD_PROMETHEUS_TLS_SECRET_NAME, &["fluentd-metrics".to_string()])
                .unwrap(),
        );
        cfg.trusted_bundle = cm.create_trusted_bundle([]);
        let objs = render(cfg);
        let ds = daemon_set(&objs, "fluentd-node");
        let envs = env_of(&ds);
        assert_eq!(
            env_value(&envs, "TLS_KEY_PATH"),
            Some("/tigera-fluentd-prometheus-tls/tls.key")
        );
        assert_eq!(
            env_value(&envs, "CA_CRT_PATH"),
            Some("/etc/pki/tls/certs/tigera-ca-bundle.crt")
        );
        let annotations = ds.spec.unwrap().template.metadata.unwrap().annotations.unwrap();
        assert!(annotations.contains_key("hash.operator.tigera.io/tigera-fluentd-prometheus-tls"));
        assert!(annotations.contains_key("hash.operator.tigera.io/tigera-ca-private"));
    }
}
