//! LogStorage Controller
//!
//! Reconciles the `tigera-secure` LogStorage into the ECK operator, the
//! Elasticsearch and Kibana resources it manages, and the curator. On a
//! managed cluster there is no LogStorage; the controller instead points the
//! Elasticsearch gateway service at the management cluster tunnel.

use crate::certificates::{service_dns_names, CertificateManager, KeyPair, TrustedBundle};
use crate::conditions::{
    REASON_CERTIFICATE_ERROR, REASON_INVALID_CONFIGURATION, REASON_RESOURCE_CREATE_ERROR,
    REASON_RESOURCE_NOT_FOUND, REASON_RESOURCE_NOT_READY, REASON_RESOURCE_READ_ERROR,
    REASON_RESOURCE_UPDATE_ERROR, REASON_RESOURCE_VALIDATION_ERROR,
};
use crate::controllers::{
    error_policy, is_named, owner_reference, singleton, REQUEUE_ROLLOUT, REQUEUE_WAIT,
};
use crate::crd::eck::{Elasticsearch, Kibana};
use crate::crd::{
    Installation, InstallationSpec, LogStorage, LogStorageSpec, ManagementCluster,
    ManagementClusterConnection, DEFAULT_INSTANCE_KEY, TIGERA_STATUS_READY,
};
use crate::error::{OperatorError, Result};
use crate::handler::ComponentHandler;
use crate::metrics::Metrics;
use crate::options::OperatorOptions;
use crate::quantity::ParsedQuantity;
use crate::render::certificate_management::{
    certificate_management, CertificateManagementConfig, KeyPairOption,
};
use crate::render::elasticsearch::{ClusterConfig, ELASTICSEARCH_NAMESPACE, ES_GATEWAY_SERVICE_NAME};
use crate::render::log_storage::{
    log_storage, ElasticsearchConfiguration, ElasticsearchLicenseType,
    DEFAULT_ELASTICSEARCH_CLUSTER_NAME, ECK_LICENSE_CONFIG_MAP_NAME, ECK_OPERATOR_NAMESPACE,
    ELASTICSEARCH_ADMIN_USER_SECRET, ELASTICSEARCH_CURATOR_USER_SECRET,
    ELASTICSEARCH_KEYSTORE_ENV_NAME, ELASTICSEARCH_KEYSTORE_SECRET, ELASTICSEARCH_NAME,
    ELASTICSEARCH_SERVICE_NAME, KIBANA_NAME, KIBANA_NAMESPACE, KIBANA_SERVICE_NAME,
    TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET, TIGERA_KIBANA_CERT_SECRET,
};
use crate::render::{annotation_hash, Component};
use crate::status::StatusManager;
use crate::utils::{
    fetch_license_key, get_installation, get_management_cluster, get_management_cluster_connection,
    get_networking_pull_secrets, get_secret, provider_mismatch, wait_to_add_license_key_watch,
    ReadyFlag,
};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use rand::distributions::{Alphanumeric, DistString};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Finalizer holding the LogStorage until ECK has torn down Elasticsearch and Kibana
pub const LOG_STORAGE_FINALIZER: &str = "tigera.io/eck-cleanup";

const DEFAULT_ELASTICSEARCH_SHARDS: i32 = 1;
const CORES_PER_FLOW_SHARD: i64 = 4;
const KEYSTORE_PASSWORD_LENGTH: usize = 32;

const WATCHED_SECRETS: &[&str] = &[
    ELASTICSEARCH_CURATOR_USER_SECRET,
    ELASTICSEARCH_KEYSTORE_SECRET,
    TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET,
    TIGERA_KIBANA_CERT_SECRET,
];

/// Context for the LogStorage controller
pub struct LogStorageController {
    client: Client,
    options: OperatorOptions,
    status: Arc<StatusManager>,
    metrics: Arc<Metrics>,
    license_api_ready: Arc<ReadyFlag>,
}

impl LogStorageController {
    /// Create a new LogStorage controller
    pub fn new(client: Client, options: OperatorOptions, metrics: Arc<Metrics>) -> Self {
        Self {
            status: StatusManager::new(client.clone(), "log-storage"),
            client,
            options,
            metrics,
            license_api_ready: Arc::new(ReadyFlag::default()),
        }
    }

    /// Run the LogStorage controller
    pub async fn run(self: Arc<Self>) -> Result<()> {
        tokio::spawn(Arc::clone(&self.status).run());
        tokio::spawn(wait_to_add_license_key_watch(
            self.client.clone(),
            Arc::clone(&self.license_api_ready),
        ));

        let client = self.client.clone();
        let storages: Api<LogStorage> = Api::all(client.clone());

        info!("Starting LogStorage controller");

        let ctx = Arc::clone(&self);
        Controller::new(storages, Config::default())
            .watches(
                Api::<Installation>::all(client.clone()),
                Config::default(),
                |_| singleton::<LogStorage>(),
            )
            .watches(
                Api::<ManagementCluster>::all(client.clone()),
                Config::default(),
                |_| singleton::<LogStorage>(),
            )
            .watches(
                Api::<ManagementClusterConnection>::all(client.clone()),
                Config::default(),
                |_| singleton::<LogStorage>(),
            )
            .watches(
                Api::<Elasticsearch>::namespaced(client.clone(), ELASTICSEARCH_NAMESPACE),
                Config::default(),
                |_| singleton::<LogStorage>(),
            )
            .watches(
                Api::<Kibana>::namespaced(client.clone(), KIBANA_NAMESPACE),
                Config::default(),
                |_| singleton::<LogStorage>(),
            )
            .watches(
                Api::<Secret>::namespaced(client.clone(), &self.options.operator_namespace),
                Config::default(),
                |s| singleton::<LogStorage>().filter(|_| is_named(&s, WATCHED_SECRETS)),
            )
            .watches(
                Api::<ConfigMap>::namespaced(client, ECK_OPERATOR_NAMESPACE),
                Config::default(),
                |cm| singleton::<LogStorage>().filter(|_| is_named(&cm, &[ECK_LICENSE_CONFIG_MAP_NAME])),
            )
            .shutdown_on_signal()
            .run(
                |ls, ctx| async move {
                    let start = Instant::now();
                    let result = ctx.reconcile(ls).await;
                    ctx.metrics
                        .record_reconciliation("log-storage", result.is_ok(), start.elapsed());
                    result
                },
                |ls, error, ctx| error_policy(ls, error, ctx),
                Arc::clone(&self),
            )
            .for_each(|result| {
                let ctx = Arc::clone(&ctx);
                async move {
                    match result {
                        Ok((obj, _action)) => {
                            info!("Reconciled LogStorage: {}", obj.name);
                        }
                        Err(controller::Error::ObjectNotFound(obj)) => {
                            debug!("LogStorage {} not found", obj.name);
                            if let Err(e) = ctx.reconcile_absent().await {
                                error!("Failed to reconcile missing LogStorage: {:?}", e);
                            }
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

    /// No LogStorage exists. A managed cluster still needs its gateway service.
    async fn reconcile_absent(&self) -> Result<()> {
        let managed = get_management_cluster_connection(&self.client).await?.is_some();
        if !managed {
            self.status.on_cr_not_found().await;
            return Ok(());
        }
        if get_management_cluster(&self.client).await?.is_some() {
            self.status
                .set_degraded(
                    REASON_INVALID_CONFIGURATION,
                    "Only one of ManagementCluster and ManagementClusterConnection may be specified",
                )
                .await;
            return Ok(());
        }
        self.status.on_cr_found().await;

        let (_variant, installation) = match get_installation(&self.client).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                self.status
                    .set_degraded(REASON_RESOURCE_NOT_FOUND, "Installation not found")
                    .await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        info!("Rendering managed cluster Elasticsearch gateway");
        let mut component = log_storage(self.base_configuration(None, installation, true));
        component.resolve_images()?;
        let handler = ComponentHandler::new(self.client.clone(), None, Arc::clone(&self.status));
        if let Err(e) = handler.create_or_update_or_delete(&component).await {
            self.status
                .set_degraded(REASON_RESOURCE_CREATE_ERROR, format!("Error creating / updating resource: {e}"))
                .await;
            return Err(e);
        }
        if self.status.is_degraded().await {
            info!("Clearing degraded status");
            self.status.clear_degraded().await;
        }
        Ok(())
    }

    /// Reconcile the LogStorage
    async fn reconcile(&self, ls: Arc<LogStorage>) -> std::result::Result<Action, OperatorError> {
        let name = ls.name_any();
        if name != DEFAULT_INSTANCE_KEY {
            warn!("Ignoring LogStorage {}, only {} is reconciled", name, DEFAULT_INSTANCE_KEY);
            return Ok(Action::await_change());
        }
        info!("Reconciling LogStorage {}", name);
        self.status.on_cr_found().await;

        if ls.metadata.deletion_timestamp.is_some() {
            return self.handle_deletion(&ls).await;
        }

        if get_management_cluster_connection(&self.client).await?.is_some() {
            return Ok(self
                .degraded(
                    REASON_INVALID_CONFIGURATION,
                    "LogStorage is not supported on a managed cluster",
                    Action::await_change(),
                )
                .await);
        }

        self.ensure_finalizer(&ls).await?;

        let mut instance = (*ls).clone();
        let modified = instance.spec.fill_defaults();
        if !modified.is_empty() {
            let api: Api<LogStorage> = Api::all(self.client.clone());
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
                                "Failed to set defaults for LogStorage fields: [{}]: {e}",
                                modified.join(", ")
                            ),
                        )
                        .await;
                    return Err(e.into());
                }
            }
        }
        if let Err(reason) = instance.spec.validate() {
            return Ok(self
                .degraded(
                    REASON_RESOURCE_VALIDATION_ERROR,
                    format!("Invalid LogStorage: {reason}"),
                    Action::await_change(),
                )
                .await);
        }

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

        if !self.license_api_ready.is_ready() {
            return Ok(self
                .degraded(REASON_RESOURCE_NOT_READY, "Waiting for LicenseKeyAPI to be ready", Action::requeue(REQUEUE_WAIT))
                .await);
        }
        if fetch_license_key(&self.client).await?.is_none() {
            return Ok(self
                .degraded(REASON_RESOURCE_NOT_FOUND, "License not found", Action::requeue(REQUEUE_WAIT))
                .await);
        }

        let ns = self.options.operator_namespace.as_str();
        let fips = installation.is_fips_enabled();

        let pull_secrets = match get_networking_pull_secrets(&installation, &self.client, ns).await {
            Ok(secrets) => secrets,
            Err(e) => {
                self.status
                    .set_degraded(REASON_RESOURCE_READ_ERROR, format!("Error retrieving pull secrets: {e}"))
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
        let domain = self.options.cluster_domain.as_str();
        let es_key_pair = self
            .key_pair(
                &certificate_manager,
                TIGERA_ELASTICSEARCH_INTERNAL_CERT_SECRET,
                service_dns_names(ELASTICSEARCH_SERVICE_NAME, ELASTICSEARCH_NAMESPACE, domain),
            )
            .await?;
        let kb_key_pair = if fips {
            None
        } else {
            Some(
                self.key_pair(
                    &certificate_manager,
                    TIGERA_KIBANA_CERT_SECRET,
                    service_dns_names(KIBANA_SERVICE_NAME, KIBANA_NAMESPACE, domain),
                )
                .await?,
            )
        };
        let trusted_bundle = certificate_manager.create_trusted_bundle([]);

        let curator_secrets: Vec<Secret> = get_secret(&self.client, ELASTICSEARCH_CURATOR_USER_SECRET, ns)
            .await?
            .into_iter()
            .collect();
        let elasticsearch_user_secret =
            get_secret(&self.client, ELASTICSEARCH_ADMIN_USER_SECRET, ELASTICSEARCH_NAMESPACE).await?;

        let license_cm = Api::<ConfigMap>::namespaced(self.client.clone(), ECK_OPERATOR_NAMESPACE)
            .get_opt(ECK_LICENSE_CONFIG_MAP_NAME)
            .await?;
        let apply_trial = ElasticsearchLicenseType::from_config_map(license_cm.as_ref()).wants_trial();

        let keystore_secret = if fips {
            match get_secret(&self.client, ELASTICSEARCH_KEYSTORE_SECRET, ns).await? {
                Some(secret) => Some(secret),
                None => Some(keystore_secret(ns, &generate_keystore_password())),
            }
        } else {
            None
        };

        let cluster_config = ClusterConfig::new(
            DEFAULT_ELASTICSEARCH_CLUSTER_NAME,
            instance.spec.replicas(),
            DEFAULT_ELASTICSEARCH_SHARDS,
            flow_shards(&instance.spec),
        );

        let mut cfg = self.base_configuration(Some(instance.clone()), installation, false);
        cfg.elasticsearch = self.elasticsearch().await?;
        cfg.kibana = self.kibana().await?;
        cfg.cluster_config = Some(cluster_config);
        cfg.elasticsearch_user_secret = elasticsearch_user_secret;
        cfg.elasticsearch_key_pair = Some(es_key_pair.clone());
        cfg.kibana_key_pair = kb_key_pair.clone();
        cfg.pull_secrets = pull_secrets;
        cfg.curator_secrets = curator_secrets;
        cfg.trusted_bundle = Some(trusted_bundle.clone());
        cfg.apply_trial = apply_trial;
        cfg.keystore_secret = keystore_secret;
        cfg.es_service = self.service(ES_GATEWAY_SERVICE_NAME, ELASTICSEARCH_NAMESPACE).await?;
        cfg.kb_service = self.service(KIBANA_SERVICE_NAME, KIBANA_NAMESPACE).await?;

        let mut components: Vec<Box<dyn Component>> = vec![
            Box::new(log_storage(cfg)),
            Box::new(key_pair_placement(ELASTICSEARCH_NAMESPACE, ns, es_key_pair, &trusted_bundle)),
        ];
        if let Some(kb_key_pair) = kb_key_pair {
            components.push(Box::new(key_pair_placement(KIBANA_NAMESPACE, ns, kb_key_pair, &trusted_bundle)));
        }

        let handler = ComponentHandler::new(
            self.client.clone(),
            owner_reference(&instance),
            Arc::clone(&self.status),
        );
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

        let elasticsearch = self.elasticsearch().await?;
        let kibana = self.kibana().await?;
        if let Err(waiting) = readiness(elasticsearch.as_ref(), kibana.as_ref(), fips) {
            return Ok(self
                .degraded(REASON_RESOURCE_NOT_READY, waiting, Action::requeue(REQUEUE_WAIT))
                .await);
        }

        if self.status.is_degraded().await {
            info!("Clearing degraded status");
            self.status.clear_degraded().await;
        }

        if !self.status.is_available().await {
            return Ok(Action::requeue(REQUEUE_ROLLOUT));
        }

        let status = json!({
            "status": {
                "state": TIGERA_STATUS_READY,
                "elasticsearchHash": elasticsearch.as_ref().and_then(|es| es.status.as_ref()).map(annotation_hash),
                "kibanaHash": kibana.as_ref().and_then(|kb| kb.status.as_ref()).map(annotation_hash),
            }
        });
        let api: Api<LogStorage> = Api::all(self.client.clone());
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
            .await?;

        Ok(Action::await_change())
    }

    /// Delete Elasticsearch and Kibana, then release the LogStorage once ECK has removed them.
    async fn handle_deletion(&self, ls: &LogStorage) -> std::result::Result<Action, OperatorError> {
        let name = ls.name_any();
        info!("Handling deletion of LogStorage {}", name);

        let (_variant, installation) = match get_installation(&self.client).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => (None, InstallationSpec::default()),
            Err(e) => return Err(e),
        };
        let mut cfg = self.base_configuration(Some(ls.clone()), installation, false);
        cfg.elasticsearch = self.elasticsearch().await?;
        cfg.kibana = self.kibana().await?;
        let remaining = cfg.elasticsearch.is_some() || cfg.kibana.is_some();

        if remaining {
            let mut component = log_storage(cfg);
            component.resolve_images()?;
            let handler = ComponentHandler::new(self.client.clone(), None, Arc::clone(&self.status));
            handler.create_or_update_or_delete(&component).await?;
            info!("Waiting for Elasticsearch and Kibana to be removed");
            return Ok(Action::requeue(REQUEUE_WAIT));
        }

        let finalizers = without_finalizer(ls.finalizers());
        if finalizers.len() != ls.finalizers().len() {
            let api: Api<LogStorage> = Api::all(self.client.clone());
            let patch = json!({ "metadata": { "finalizers": finalizers } });
            api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            info!("Finalizer removed for LogStorage {}", name);
        }
        Ok(Action::await_change())
    }

    /// Ensure the finalizer is present on the resource
    async fn ensure_finalizer(&self, ls: &LogStorage) -> Result<()> {
        let Some(finalizers) = with_finalizer(ls.finalizers()) else {
            return Ok(());
        };
        let api: Api<LogStorage> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        api.patch(&ls.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn key_pair(&self, manager: &CertificateManager, name: &str, dns_names: Vec<String>) -> Result<KeyPair> {
        match manager.get_or_create_key_pair(&self.client, name, &dns_names).await {
            Ok(kp) => Ok(kp),
            Err(e) => {
                self.status
                    .set_degraded(REASON_CERTIFICATE_ERROR, format!("Failed to create {name} TLS certificate: {e}"))
                    .await;
                Err(e)
            }
        }
    }

    async fn elasticsearch(&self) -> Result<Option<Elasticsearch>> {
        let api: Api<Elasticsearch> = Api::namespaced(self.client.clone(), ELASTICSEARCH_NAMESPACE);
        Ok(api.get_opt(ELASTICSEARCH_NAME).await?)
    }

    async fn kibana(&self) -> Result<Option<Kibana>> {
        let api: Api<Kibana> = Api::namespaced(self.client.clone(), KIBANA_NAMESPACE);
        Ok(api.get_opt(KIBANA_NAME).await?)
    }

    async fn service(&self, name: &str, namespace: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    /// Render inputs every mode shares; the standalone path fills in the rest.
    fn base_configuration(
        &self,
        log_storage: Option<LogStorage>,
        installation: InstallationSpec,
        managed_cluster: bool,
    ) -> ElasticsearchConfiguration {
        ElasticsearchConfiguration {
            log_storage,
            installation,
            managed_cluster,
            elasticsearch: None,
            kibana: None,
            cluster_config: None,
            elasticsearch_user_secret: None,
            elasticsearch_key_pair: None,
            kibana_key_pair: None,
            pull_secrets: Vec::new(),
            curator_secrets: Vec::new(),
            es_service: None,
            kb_service: None,
            cluster_domain: self.options.cluster_domain.clone(),
            operator_namespace: self.options.operator_namespace.clone(),
            trusted_bundle: None,
            apply_trial: false,
            keystore_secret: None,
            use_psp: self.options.use_psp,
        }
    }
}

fn key_pair_placement(
    namespace: &str,
    operator_namespace: &str,
    key_pair: KeyPair,
    bundle: &TrustedBundle,
) -> impl Component {
    certificate_management(CertificateManagementConfig {
        namespace: namespace.to_string(),
        operator_namespace: operator_namespace.to_string(),
        key_pairs: vec![KeyPairOption::new(key_pair)],
        trusted_bundle: Some(bundle.clone()),
    })
}

/// Shards for flow indices: one per four requested cores per node.
fn flow_shards(spec: &LogStorageSpec) -> i32 {
    let Some(nodes) = &spec.nodes else {
        return DEFAULT_ELASTICSEARCH_SHARDS;
    };
    let cores = nodes
        .resource_requirements
        .as_ref()
        .and_then(|r| r.requests.get("cpu"))
        .and_then(|cpu| ParsedQuantity::parse(cpu).ok())
        .map(|q| q.value())
        .unwrap_or_default();
    let shards_per_node = cores / CORES_PER_FLOW_SHARD;
    if nodes.count <= 0 || shards_per_node <= 0 {
        return DEFAULT_ELASTICSEARCH_SHARDS;
    }
    i32::try_from(nodes.count * shards_per_node).unwrap_or(i32::MAX)
}

/// Finalizers with ours appended, `None` when it is already present.
fn with_finalizer(current: &[String]) -> Option<Vec<String>> {
    if current.iter().any(|f| f == LOG_STORAGE_FINALIZER) {
        return None;
    }
    let mut finalizers = current.to_vec();
    finalizers.push(LOG_STORAGE_FINALIZER.to_string());
    Some(finalizers)
}

fn without_finalizer(current: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|f| f.as_str() != LOG_STORAGE_FINALIZER)
        .cloned()
        .collect()
}

fn generate_keystore_password() -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), KEYSTORE_PASSWORD_LENGTH)
}

/// Keystore password secret for a FIPS Elasticsearch.
fn keystore_secret(namespace: &str, password: &str) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(ELASTICSEARCH_KEYSTORE_SECRET.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            ELASTICSEARCH_KEYSTORE_ENV_NAME.to_string(),
            ByteString(password.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

/// `Err` with a waiting message until ECK reports the cluster operational.
fn readiness(elasticsearch: Option<&Elasticsearch>, kibana: Option<&Kibana>, fips: bool) -> std::result::Result<(), String> {
    if !elasticsearch.is_some_and(Elasticsearch::is_ready) {
        return Err("Waiting for Elasticsearch cluster to be operational".to_string());
    }
    if !fips && !kibana.is_some_and(Kibana::is_associated) {
        return Err("Waiting for Kibana cluster to be operational".to_string());
    }
    Ok(())
}
