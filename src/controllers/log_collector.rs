//! LogCollector Controller
//!
//! Reconciles the `tigera-secure` LogCollector into the fluentd DaemonSets
//! (Linux, plus Windows when the cluster has Windows nodes), the EKS log
//! forwarder and the certificates they mount.

use crate::certificates::{Certificate, CertificateManager};
use crate::conditions::{
    REASON_CERTIFICATE_ERROR, REASON_INVALID_CONFIGURATION, REASON_RESOURCE_CREATE_ERROR,
    REASON_RESOURCE_NOT_FOUND, REASON_RESOURCE_NOT_READY, REASON_RESOURCE_READ_ERROR,
    REASON_RESOURCE_UPDATE_ERROR, REASON_RESOURCE_VALIDATION_ERROR,
};
use crate::controllers::{
    error_policy, is_named, owner_reference, singleton, REQUEUE_ROLLOUT, REQUEUE_SHORT,
    REQUEUE_WAIT,
};
use crate::crd::calico::Tier;
use crate::crd::{
    APIServer, EksCloudwatchLogsSpec, Installation, LogCollector, LogCollectorSpec, Provider,
    SyslogLogType, DEFAULT_INSTANCE_KEY, TIGERA_STATUS_READY,
};
use crate::error::{OperatorError, Result};
use crate::handler::ComponentHandler;
use crate::metrics::Metrics;
use crate::options::OperatorOptions;
use crate::render::certificate_management::{
    certificate_management, CertificateManagementConfig, KeyPairOption,
};
use crate::render::elasticsearch::{CLUSTER_CONFIG_CONFIGMAP_NAME, PUBLIC_CERT_SECRET};
use crate::render::fluentd::{
    fluentd, EksCloudwatchLogConfig, FluentdConfiguration, FluentdFilters, S3Credential,
    SplunkCredential, ELASTICSEARCH_EKS_LOG_FORWARDER_USER_SECRET,
    ELASTICSEARCH_LOG_COLLECTOR_USER_SECRET, EKS_LOG_FORWARDER_AWS_ID, EKS_LOG_FORWARDER_AWS_KEY,
    EKS_LOG_FORWARDER_SECRET, FLUENTD_FILTER_CONFIG_MAP_NAME, FLUENTD_FILTER_DNS_NAME,
    FLUENTD_FILTER_FLOW_NAME, FLUENTD_PROMETHEUS_TLS_SECRET_NAME, LOG_COLLECTOR_NAMESPACE,
    S3_FLUENTD_SECRET_NAME, S3_KEY_ID_NAME, S3_KEY_SECRET_NAME,
    SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME, SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY,
    SPLUNK_FLUENTD_SECRET_TOKEN_KEY, SPLUNK_FLUENTD_TOKEN_SECRET_NAME,
};
use crate::render::{Component, OsType};
use crate::status::StatusManager;
use crate::utils::{
    elasticsearch_secrets, fetch_license_key, get_elasticsearch_cluster_config, get_installation,
    get_management_cluster_connection, get_networking_pull_secrets, get_secret, has_windows_nodes,
    is_api_server_ready, is_feature_active, parse_endpoint, provider_mismatch,
    wait_to_add_license_key_watch, wait_to_add_tier_watch, ReadyFlag, ALLOW_TIGERA_TIER_NAME,
    EXPORT_LOGS_FEATURE,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Node, Secret};
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Client certificate Prometheus presents when scraping fluentd
pub const PROMETHEUS_CLIENT_TLS_SECRET_NAME: &str = "calico-node-prometheus-client-tls";

const DEFAULT_EKS_STREAM_PREFIX: &str = "kube-apiserver-audit-";
const DEFAULT_EKS_FETCH_INTERVAL: i32 = 60;

/// Secrets in the operator namespace that feed the render
const WATCHED_SECRETS: &[&str] = &[
    ELASTICSEARCH_LOG_COLLECTOR_USER_SECRET,
    ELASTICSEARCH_EKS_LOG_FORWARDER_USER_SECRET,
    PUBLIC_CERT_SECRET,
    S3_FLUENTD_SECRET_NAME,
    EKS_LOG_FORWARDER_SECRET,
    SPLUNK_FLUENTD_TOKEN_SECRET_NAME,
    SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME,
    PROMETHEUS_CLIENT_TLS_SECRET_NAME,
    FLUENTD_PROMETHEUS_TLS_SECRET_NAME,
];

const WATCHED_CONFIG_MAPS: &[&str] = &[FLUENTD_FILTER_CONFIG_MAP_NAME, CLUSTER_CONFIG_CONFIGMAP_NAME];

/// Context for the LogCollector controller
pub struct LogCollectorController {
    client: Client,
    options: OperatorOptions,
    status: Arc<StatusManager>,
    metrics: Arc<Metrics>,
    tier_watch_ready: Arc<ReadyFlag>,
    license_api_ready: Arc<ReadyFlag>,
}

impl LogCollectorController {
    /// Create a new LogCollector controller
    pub fn new(client: Client, options: OperatorOptions, metrics: Arc<Metrics>) -> Self {
        Self {
            status: StatusManager::new(client.clone(), "log-collector"),
            client,
            options,
            metrics,
            tier_watch_ready: Arc::new(ReadyFlag::default()),
            license_api_ready: Arc::new(ReadyFlag::default()),
        }
    }

    /// Run the LogCollector controller
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tokio::spawn(Arc::clone(&self.status).run());
        tokio::spawn(wait_to_add_tier_watch(
            self.client.clone(),
            Arc::clone(&self.tier_watch_ready),
        ));
        tokio::spawn(wait_to_add_license_key_watch(
            self.client.clone(),
            Arc::clone(&self.license_api_ready),
        ));

        let client = self.client.clone();
        let ns = self.options.operator_namespace.as_str();
        let collectors: Api<LogCollector> = Api::all(client.clone());

        info!("Starting LogCollector controller");

        let status = Arc::clone(&self.status);
        Controller::new(collectors, Config::default())
            .watches(
                Api::<Installation>::all(client.clone()),
                Config::default(),
                |_| singleton::<LogCollector>(),
            )
            .watches(
                Api::<APIServer>::all(client.clone()),
                Config::default(),
                |_| singleton::<LogCollector>(),
            )
            .watches(
                Api::<Node>::all(client.clone()),
                Config::default().labels("kubernetes.io/os=windows"),
                |_| singleton::<LogCollector>(),
            )
            .watches(
                Api::<Secret>::namespaced(client.clone(), ns),
                Config::default(),
                |s| singleton::<LogCollector>().filter(|_| is_named(&s, WATCHED_SECRETS)),
            )
            .watches(
                Api::<ConfigMap>::namespaced(client, ns),
                Config::default(),
                |cm| singleton::<LogCollector>().filter(|_| is_named(&cm, WATCHED_CONFIG_MAPS)),
            )
            .shutdown_on_signal()
            .run(
                |lc, ctx| async move {
                    let start = Instant::now();
                    let result = ctx.reconcile(lc).await;
                    ctx.metrics
                        .record_reconciliation("log-collector", result.is_ok(), start.elapsed());
                    result
                },
                |lc, error, ctx| error_policy(lc, error, ctx),
                Arc::clone(&self),
            )
            .for_each(|result| {
                let status = Arc::clone(&status);
                async move {
                    match result {
                        Ok((obj, _action)) => {
                            info!("Reconciled LogCollector: {}", obj.name);
                        }
                        Err(controller::Error::ObjectNotFound(obj)) => {
                            debug!("LogCollector {} not found", obj.name);
                            status.on_cr_not_found().await;
                        }
                        Err(e) => {
                            error!("Reconciliation failed: {:?}", e);
                        }
                    }
                }
            })
            .await;

        Ok(())
    }

    async fn degraded(&self, reason: &str, message: impl Into<String>, action: Action) -> Action {
        self.status.set_degraded(reason, message).await;
        action
    }

    /// Reconcile the LogCollector
    async fn reconcile(&self, lc: Arc<LogCollector>) -> std::result::Result<Action, OperatorError> {
        let name = lc.name_any();
        if name != DEFAULT_INSTANCE_KEY {
            warn!("Ignoring LogCollector {}, only {} is reconciled", name, DEFAULT_INSTANCE_KEY);
            return Ok(Action::await_change());
        }
        info!("Reconciling LogCollector {}", name);

        if let Err(e) = validate(&lc.spec) {
            self.status
                .set_degraded(REASON_RESOURCE_VALIDATION_ERROR, e.to_string())
                .await;
            return Err(e);
        }
        self.status.on_cr_found().await;

        let mut instance = (*lc).clone();
        let modified = instance.spec.fill_defaults();
        if !modified.is_empty() {
            let api: Api<LogCollector> = Api::all(self.client.clone());
            let patch = json!({ "spec": instance.spec });
            match api
                .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
            {
                Ok(updated) => instance = updated,
                Err(e) => {
                    self.status
                        .set_degraded(
                            REASON_RESOURCE_UPDATE_ERROR,
                            format!(
                                "Failed to set defaults for LogCollector fields: [{}]: {e}",
                                modified.join(", ")
                            ),
                        )
                        .await;
                    return Err(e.into());
                }
            }
        }

        if !is_api_server_ready(&self.client).await? {
            return Ok(self
                .degraded(
                    REASON_RESOURCE_NOT_READY,
                    "Waiting for Tigera API server to be ready",
                    Action::await_change(),
                )
                .await);
        }
        if !self.tier_watch_ready.is_ready() {
            return Ok(self
                .degraded(REASON_RESOURCE_NOT_READY, "Waiting for Tier watch to be established", Action::requeue(REQUEUE_WAIT))
                .await);
        }
        let tiers: Api<Tier> = Api::all(self.client.clone());
        match tiers.get_opt(ALLOW_TIGERA_TIER_NAME).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return Ok(self
                    .degraded(
                        REASON_RESOURCE_NOT_READY,
                        format!("Waiting for {ALLOW_TIGERA_TIER_NAME} tier to be created"),
                        Action::requeue(REQUEUE_WAIT),
                    )
                    .await);
            }
            Err(e) => {
                self.status
                    .set_degraded(REASON_RESOURCE_READ_ERROR, format!("Error querying allow-tigera tier: {e}"))
                    .await;
                return Err(e.into());
            }
        }
        if !self.license_api_ready.is_ready() {
            return Ok(self
                .degraded(REASON_RESOURCE_NOT_READY, "Waiting for LicenseKeyAPI to be ready", Action::requeue(REQUEUE_WAIT))
                .await);
        }
        let Some(license) = fetch_license_key(&self.client).await? else {
            return Ok(self
                .degraded(REASON_RESOURCE_NOT_FOUND, "License not found", Action::requeue(REQUEUE_WAIT))
                .await);
        };

        let (_variant, installation) = match get_installation(&self.client).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                return Ok(self
                    .degraded(REASON_RESOURCE_NOT_FOUND, "Installation not found", Action::await_change())
                    .await);
            }
            Err(e) => {
                self.status
                    .set_degraded(REASON_RESOURCE_READ_ERROR, format!("Error querying installation: {e}"))
                    .await;
                return Err(e);
            }
        };

        if let Some(msg) = provider_mismatch(self.options.detected_provider, &installation) {
            return Ok(self
                .degraded(REASON_RESOURCE_VALIDATION_ERROR, msg, Action::await_change())
                .await);
        }

        let ns = self.options.operator_namespace.as_str();
        let es_cluster_config = match get_elasticsearch_cluster_config(&self.client, ns).await {
            Ok(cfg) => cfg,
            Err(e) if e.is_not_found() => {
                return Ok(self
                    .degraded(
                        REASON_RESOURCE_NOT_FOUND,
                        "Elasticsearch cluster configuration is not available, waiting for it to become available",
                        Action::await_change(),
                    )
                    .await);
            }
            Err(e) => {
                self.status
                    .set_degraded(
                        REASON_RESOURCE_READ_ERROR,
                        format!("Failed to get the elasticsearch cluster configuration: {e}"),
                    )
                    .await;
                return Err(e);
            }
        };

        let pull_secrets = match get_networking_pull_secrets(&installation, &self.client, ns).await {
            Ok(secrets) => secrets,
            Err(e) => {
                self.status
                    .set_degraded(REASON_RESOURCE_READ_ERROR, format!("Error retrieving pull secrets: {e}"))
                    .await;
                return Err(e);
            }
        };

        let es_secrets = match elasticsearch_secrets(
            &self.client,
            &[
                ELASTICSEARCH_LOG_COLLECTOR_USER_SECRET,
                ELASTICSEARCH_EKS_LOG_FORWARDER_USER_SECRET,
            ],
            ns,
        )
        .await
        {
            Ok(secrets) => secrets,
            Err(e) if e.is_not_found() => {
                return Ok(self
                    .degraded(
                        REASON_RESOURCE_NOT_FOUND,
                        format!("Elasticsearch secrets are not available yet, waiting until they become available: {e}"),
                        Action::requeue(REQUEUE_SHORT),
                    )
                    .await);
            }
            Err(e) => {
                self.status
                    .set_degraded(REASON_RESOURCE_READ_ERROR, format!("Failed to get Elasticsearch credentials: {e}"))
                    .await;
                return Err(e);
            }
        };

        let certificate_manager = match CertificateManager::create(&self.client, ns).await {
            Ok(cm) => cm,
            Err(e) => {
                self.status
                    .set_degraded(REASON_CERTIFICATE_ERROR, format!("Unable to create the Tigera CA: {e}"))
                    .await;
                return Err(e);
            }
        };
        let prometheus_tls = match certificate_manager
            .get_or_create_key_pair(
                &self.client,
                FLUENTD_PROMETHEUS_TLS_SECRET_NAME,
                &[FLUENTD_PROMETHEUS_TLS_SECRET_NAME.to_string()],
            )
            .await
        {
            Ok(kp) => kp,
            Err(e) => {
                self.status
                    .set_degraded(REASON_CERTIFICATE_ERROR, format!("Error creating TLS certificate: {e}"))
                    .await;
                return Err(e);
            }
        };

        let Some(prometheus_certificate) = self
            .certificate(&certificate_manager, PROMETHEUS_CLIENT_TLS_SECRET_NAME)
            .await?
        else {
            return Ok(self
                .degraded(
                    REASON_RESOURCE_NOT_FOUND,
                    "Prometheus secrets are not available yet, waiting until they become available",
                    Action::requeue(REQUEUE_SHORT),
                )
                .await);
        };
        let Some(es_gateway_certificate) = self.certificate(&certificate_manager, PUBLIC_CERT_SECRET).await? else {
            return Ok(self
                .degraded(
                    REASON_RESOURCE_NOT_FOUND,
                    "Elasticsearch gateway certificate are not available yet, waiting until they become available",
                    Action::await_change(),
                )
                .await);
        };
        let trusted_bundle =
            certificate_manager.create_trusted_bundle([prometheus_certificate, es_gateway_certificate]);

        if instance.spec.additional_stores.is_some() && !is_feature_active(&license, EXPORT_LOGS_FEATURE) {
            return Ok(self
                .degraded(
                    REASON_INVALID_CONFIGURATION,
                    format!("Feature is not active: License does not support feature: {EXPORT_LOGS_FEATURE}"),
                    Action::await_change(),
                )
                .await);
        }

        let mut s3_credential = None;
        if instance.spec.s3().is_some() {
            let secret = get_secret(&self.client, S3_FLUENTD_SECRET_NAME, ns).await?;
            match s3_credential_from(secret.as_ref()) {
                Ok(Some(cred)) => s3_credential = Some(cred),
                Ok(None) => {
                    return Ok(self
                        .degraded(REASON_RESOURCE_NOT_FOUND, "S3 credential secret does not exist", Action::await_change())
                        .await);
                }
                Err(e) => {
                    self.status
                        .set_degraded(REASON_INVALID_CONFIGURATION, format!("Error with S3 credential secret: {e}"))
                        .await;
                    return Err(e);
                }
            }
        }

        let mut splunk_credential = None;
        if instance.spec.splunk().is_some() {
            let token = get_secret(&self.client, SPLUNK_FLUENTD_TOKEN_SECRET_NAME, ns).await?;
            let certificate = get_secret(&self.client, SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME, ns).await?;
            if certificate.is_none() {
                info!(
                    "Splunk certificate secret {} not provided. Assuming http protocol or trusted CA certificate.",
                    SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME
                );
            }
            match splunk_credential_from(token.as_ref(), certificate.as_ref()) {
                Ok(Some(cred)) => splunk_credential = Some(cred),
                Ok(None) => {
                    return Ok(self
                        .degraded(REASON_RESOURCE_NOT_FOUND, "Splunk credential secret does not exist", Action::await_change())
                        .await);
                }
                Err(e) => {
                    self.status
                        .set_degraded(REASON_INVALID_CONFIGURATION, format!("Error with Splunk credential secret: {e}"))
                        .await;
                    return Err(e);
                }
            }
        }

        let managed_cluster = match get_management_cluster_connection(&self.client).await {
            Ok(mcc) => mcc.is_some(),
            Err(e) => {
                self.status
                    .set_degraded(
                        REASON_RESOURCE_READ_ERROR,
                        format!("An error occurred while looking for a ManagementClusterConnection: {e}"),
                    )
                    .await;
                return Err(e);
            }
        };
        if managed_cluster && forwards_ids_events(&instance.spec) {
            return Ok(self
                .degraded(
                    REASON_INVALID_CONFIGURATION,
                    "IDSEvents option is not supported for Syslog config in a managed cluster",
                    Action::await_change(),
                )
                .await);
        }

        let filters_cm = match self.config_map(FLUENTD_FILTER_CONFIG_MAP_NAME).await {
            Ok(cm) => cm,
            Err(e) => {
                self.status
                    .set_degraded(REASON_RESOURCE_READ_ERROR, format!("Error retrieving Fluentd filters: {e}"))
                    .await;
                return Err(e);
            }
        };
        let filters = fluentd_filters_from(filters_cm.as_ref());

        let mut eks_config = None;
        if installation.kubernetes_provider == Provider::Eks {
            if let Some(eks) = instance.spec.eks_cloudwatch_log() {
                info!("Managed kubernetes EKS found, getting necessary credentials and config");
                let secret = get_secret(&self.client, EKS_LOG_FORWARDER_SECRET, ns).await?;
                match eks_cloudwatch_log_config_from(eks, secret.as_ref()) {
                    Ok(cfg) => eks_config = cfg,
                    Err(e) => {
                        self.status
                            .set_degraded(
                                REASON_INVALID_CONFIGURATION,
                                format!("Error retrieving EKS Cloudwatch Logs configuration: {e}"),
                            )
                            .await;
                        return Err(e);
                    }
                }
            }
        }

        let handler = ComponentHandler::new(
            self.client.clone(),
            owner_reference(&instance),
            Arc::clone(&self.status),
        );

        let linux_cfg = FluentdConfiguration {
            log_collector: instance.clone(),
            es_secrets,
            es_cluster_config,
            s3_credential,
            splunk_credential,
            filters,
            eks_config,
            pull_secrets,
            installation,
            cluster_domain: self.options.cluster_domain.clone(),
            os_type: OsType::Linux,
            metrics_server_tls: Some(prometheus_tls.clone()),
            trusted_bundle: trusted_bundle.clone(),
            managed_cluster,
            use_psp: self.options.use_psp,
        };
        let windows_cfg = FluentdConfiguration {
            os_type: OsType::Windows,
            metrics_server_tls: None,
            ..linux_cfg.clone()
        };

        let mut components: Vec<Box<dyn Component>> = vec![
            Box::new(fluentd(linux_cfg)),
            Box::new(certificate_management(CertificateManagementConfig {
                namespace: LOG_COLLECTOR_NAMESPACE.to_string(),
                operator_namespace: ns.to_string(),
                key_pairs: vec![KeyPairOption::new(prometheus_tls)],
                trusted_bundle: Some(trusted_bundle),
            })),
        ];
        if has_windows_nodes(&self.client).await? {
            components.push(Box::new(fluentd(windows_cfg)));
        }

        for component in &mut components {
            if let Err(e) = component.resolve_images() {
                self.status
                    .set_degraded(REASON_RESOURCE_CREATE_ERROR, format!("Error with images: {e}"))
                    .await;
                return Err(e);
            }
            if let Err(e) = handler.create_or_update_or_delete(&**component).await {
                self.status
                    .set_degraded(REASON_RESOURCE_CREATE_ERROR, format!("Error creating / updating resource: {e}"))
                    .await;
                return Err(e);
            }
        }

        if self.status.is_degraded().await {
            info!("Clearing degraded status");
            self.status.clear_degraded().await;
        }

        if !self.status.is_available().await {
            return Ok(Action::requeue(REQUEUE_ROLLOUT));
        }

        let api: Api<LogCollector> = Api::all(self.client.clone());
        api.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": { "state": TIGERA_STATUS_READY } })),
        )
        .await?;

        Ok(Action::await_change())
    }

    async fn certificate(&self, manager: &CertificateManager, name: &str) -> Result<Option<Certificate>> {
        match manager
            .get_certificate(&self.client, name, &self.options.operator_namespace)
            .await
        {
            Ok(cert) => Ok(cert),
            Err(e) => {
                self.status
                    .set_degraded(REASON_CERTIFICATE_ERROR, format!("Failed to retrieve / validate {name}: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    async fn config_map(&self, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.options.operator_namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Reject a syslog store whose endpoint is not `proto://host:port`.
fn validate(spec: &LogCollectorSpec) -> Result<()> {
    if let Some(syslog) = spec.syslog() {
        parse_endpoint(&syslog.endpoint)
            .map_err(|e| OperatorError::config(format!("Syslog config has invalid Endpoint: {e}")))?;
    }
    Ok(())
}

fn forwards_ids_events(spec: &LogCollectorSpec) -> bool {
    spec.syslog()
        .is_some_and(|s| s.log_types.contains(&SyslogLogType::IdsEvents))
}

fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
        .filter(|v| !v.is_empty())
}

fn required_secret_value(secret: &Secret, key: &str) -> Result<Vec<u8>> {
    secret_value(secret, key).ok_or_else(|| OperatorError::MissingField {
        kind: "Secret",
        name: secret.name_any(),
        field: key.to_string(),
    })
}

/// S3 access keys, `None` when the credential secret does not exist.
fn s3_credential_from(secret: Option<&Secret>) -> Result<Option<S3Credential>> {
    let Some(secret) = secret else {
        return Ok(None);
    };
    Ok(Some(S3Credential {
        key_id: required_secret_value(secret, S3_KEY_ID_NAME)?,
        key_secret: required_secret_value(secret, S3_KEY_SECRET_NAME)?,
    }))
}

/// Splunk HEC token plus the optional CA certificate for a private endpoint.
fn splunk_credential_from(token: Option<&Secret>, certificate: Option<&Secret>) -> Result<Option<SplunkCredential>> {
    let Some(token) = token else {
        return Ok(None);
    };
    let certificate = match certificate {
        Some(secret) => required_secret_value(secret, SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY)?,
        None => Vec::new(),
    };
    Ok(Some(SplunkCredential {
        token: required_secret_value(token, SPLUNK_FLUENTD_SECRET_TOKEN_KEY)?,
        certificate,
    }))
}

fn fluentd_filters_from(cm: Option<&ConfigMap>) -> Option<FluentdFilters> {
    let data = cm?.data.clone().unwrap_or_default();
    Some(FluentdFilters {
        flow: data.get(FLUENTD_FILTER_FLOW_NAME).cloned().unwrap_or_default(),
        dns: data.get(FLUENTD_FILTER_DNS_NAME).cloned().unwrap_or_default(),
    })
}

/// Cloudwatch source settings with defaults applied.
///
/// `None` when the AWS credential secret has not been created yet.
fn eks_cloudwatch_log_config_from(
    spec: &EksCloudwatchLogsSpec,
    secret: Option<&Secret>,
) -> Result<Option<EksCloudwatchLogConfig>> {
    if spec.region.is_empty() {
        return Err(OperatorError::config("Missing AWS region info"));
    }
    if spec.group_name.is_empty() {
        return Err(OperatorError::config("Missing Cloudwatch log group name"));
    }
    let stream_prefix = spec
        .stream_prefix
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_EKS_STREAM_PREFIX.to_string());
    let fetch_interval = spec
        .fetch_interval
        .filter(|i| *i != 0)
        .unwrap_or(DEFAULT_EKS_FETCH_INTERVAL);

    let Some(secret) = secret else {
        return Ok(None);
    };
    let (Some(aws_id), Some(aws_key)) = (
        secret_value(secret, EKS_LOG_FORWARDER_AWS_ID),
        secret_value(secret, EKS_LOG_FORWARDER_AWS_KEY),
    ) else {
        return Err(OperatorError::config("Incomplete Cloudwatch credentials"));
    };

    Ok(Some(EksCloudwatchLogConfig {
        aws_id,
        aws_key,
        aws_region: spec.region.clone(),
        group_name: spec.group_name.clone(),
        stream_prefix,
        fetch_interval,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    fn secret(name: &str, data: &[(&str, &str)]) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("tigera-operator".to_string()),
                ..Default::default()
            },
            data: Some(
                data.iter()
                    .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn spec(json: &str) -> LogCollectorSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_validate_syslog_endpoint() {
        assert!(validate(&spec("{}")).is_ok());
        assert!(validate(&spec(r#"{"additionalStores": {"syslog": {"endpoint": "tcp://1.2.3.4:514"}}}"#)).is_ok());

        let err = validate(&spec(r#"{"additionalStores": {"syslog": {"endpoint": "tcp://1.2.3.4"}}}"#)).unwrap_err();
        assert!(err.to_string().contains("Syslog config has invalid Endpoint"));
    }

    #[test]
    fn test_forwards_ids_events() {
        assert!(!forwards_ids_events(&spec("{}")));
        assert!(!forwards_ids_events(&spec(
            r#"{"additionalStores": {"syslog": {"endpoint": "udp://h:514", "logTypes": ["Flows"]}}}"#
        )));
        assert!(forwards_ids_events(&spec(
            r#"{"additionalStores": {"syslog": {"endpoint": "udp://h:514", "logTypes": ["Audit", "IDSEvents"]}}}"#
        )));
    }

    #[test]
    fn test_s3_credential() {
        assert!(s3_credential_from(None).unwrap().is_none());

        let full = secret(S3_FLUENTD_SECRET_NAME, &[(S3_KEY_ID_NAME, "id"), (S3_KEY_SECRET_NAME, "secret")]);
        let cred = s3_credential_from(Some(&full)).unwrap().unwrap();
        assert_eq!(cred.key_id, b"id");
        assert_eq!(cred.key_secret, b"secret");

        let partial = secret(S3_FLUENTD_SECRET_NAME, &[(S3_KEY_ID_NAME, "id"), (S3_KEY_SECRET_NAME, "")]);
        let err = s3_credential_from(Some(&partial)).unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"Expected Secret "log-collector-s3-credentials" to have a field named "key-secret""#
        );
    }

    #[test]
    fn test_splunk_credential() {
        assert!(splunk_credential_from(None, None).unwrap().is_none());

        let token = secret(SPLUNK_FLUENTD_TOKEN_SECRET_NAME, &[(SPLUNK_FLUENTD_SECRET_TOKEN_KEY, "hec")]);
        let cred = splunk_credential_from(Some(&token), None).unwrap().unwrap();
        assert_eq!(cred.token, b"hec");
        assert!(cred.certificate.is_empty());

        let cert = secret(SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME, &[(SPLUNK_FLUENTD_SECRET_CERTIFICATE_KEY, "PEM")]);
        let cred = splunk_credential_from(Some(&token), Some(&cert)).unwrap().unwrap();
        assert_eq!(cred.certificate, b"PEM");

        let empty_cert = secret(SPLUNK_FLUENTD_CERTIFICATE_SECRET_NAME, &[]);
        assert!(splunk_credential_from(Some(&token), Some(&empty_cert)).is_err());
        let empty_token = secret(SPLUNK_FLUENTD_TOKEN_SECRET_NAME, &[]);
        assert!(splunk_credential_from(Some(&empty_token), None).is_err());
    }

    #[test]
    fn test_fluentd_filters() {
        assert!(fluentd_filters_from(None).is_none());

        let cm = ConfigMap {
            data: Some(BTreeMap::from([(
                FLUENTD_FILTER_FLOW_NAME.to_string(),
                "<filter flows>".to_string(),
            )])),
            ..Default::default()
        };
        let filters = fluentd_filters_from(Some(&cm)).unwrap();
        assert_eq!(filters.flow, "<filter flows>");
        assert!(filters.dns.is_empty());
    }

    #[test]
    fn test_eks_config_defaults() {
        let eks: EksCloudwatchLogsSpec =
            serde_json::from_str(r#"{"region": "us-west-2", "groupName": "/aws/eks/demo/cluster"}"#).unwrap();
        let creds = secret(
            EKS_LOG_FORWARDER_SECRET,
            &[(EKS_LOG_FORWARDER_AWS_ID, "id"), (EKS_LOG_FORWARDER_AWS_KEY, "key")],
        );
        let cfg = eks_cloudwatch_log_config_from(&eks, Some(&creds)).unwrap().unwrap();
        assert_eq!(cfg.stream_prefix, "kube-apiserver-audit-");
        assert_eq!(cfg.fetch_interval, 60);
        assert_eq!(cfg.aws_region, "us-west-2");
        assert_eq!(cfg.aws_id, b"id");

        assert!(eks_cloudwatch_log_config_from(&eks, None).unwrap().is_none());
    }

    #[test]
    fn test_eks_config_errors() {
        let no_region: EksCloudwatchLogsSpec =
            serde_json::from_str(r#"{"region": "", "groupName": "g"}"#).unwrap();
        assert!(eks_cloudwatch_log_config_from(&no_region, None)
            .unwrap_err()
            .to_string()
            .contains("Missing AWS region info"));

        let no_group: EksCloudwatchLogsSpec =
            serde_json::from_str(r#"{"region": "us-east-1", "groupName": ""}"#).unwrap();
        assert!(eks_cloudwatch_log_config_from(&no_group, None).is_err());

        let eks: EksCloudwatchLogsSpec = serde_json::from_str(
            r#"{"region": "us-east-1", "groupName": "g", "streamPrefix": "audit-", "fetchInterval": 15}"#,
        )
        .unwrap();
        let incomplete = secret(EKS_LOG_FORWARDER_SECRET, &[(EKS_LOG_FORWARDER_AWS_ID, "id")]);
        let err = eks_cloudwatch_log_config_from(&eks, Some(&incomplete)).unwrap_err();
        assert!(err.to_string().contains("Incomplete Cloudwatch credentials"));
    }
}
