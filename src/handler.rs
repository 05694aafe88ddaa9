//! Applying rendered components to the cluster

use crate::error::{is_kube_not_found, Result};
use crate::options::FIELD_MANAGER;
use crate::render::{Component, OsType, RenderedObject};
use crate::status::{StatusManager, Workload, WorkloadKind};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::Client;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

const OS_NODE_LABEL: &str = "kubernetes.io/os";

/// Applies components on behalf of one controller.
///
/// Every created object is owned by the reconciled CR, so deleting the CR
/// garbage collects the component.
pub struct ComponentHandler {
    client: Client,
    owner: Option<OwnerReference>,
    status: Arc<StatusManager>,
}

impl ComponentHandler {
    pub fn new(client: Client, owner: Option<OwnerReference>, status: Arc<StatusManager>) -> Self {
        Self {
            client,
            owner,
            status,
        }
    }

    /// Server-side apply the component's objects, then delete the obsolete ones.
    pub async fn create_or_update_or_delete(&self, component: &dyn Component) -> Result<()> {
        if !component.ready() {
            debug!("Component is not ready, skipping");
            return Ok(());
        }
        let (create, delete) = component.objects()?;
        let os = component.supported_os();

        for obj in &create {
            let body = prepare_object(obj, self.owner.as_ref(), os);
            self.api_for(obj)
                .patch(
                    &obj.name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&body),
                )
                .await?;
            debug!(kind = obj.kind(), key = %obj.key(), "Applied object");
        }
        self.status.add_workloads(workloads(&create)).await;

        for obj in &delete {
            match self.api_for(obj).delete(&obj.name, &DeleteParams::background()).await {
                Ok(_) => info!(kind = obj.kind(), key = %obj.key(), "Deleted object"),
                Err(e) if is_kube_not_found(&e) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.status.remove_workloads(&workloads(&delete)).await;

        Ok(())
    }

    fn api_for(&self, obj: &RenderedObject) -> Api<DynamicObject> {
        match &obj.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &obj.api_resource),
            None => Api::all_with(self.client.clone(), &obj.api_resource),
        }
    }
}

/// The apply body: owner reference set and pods pinned to the component's OS.
pub fn prepare_object(obj: &RenderedObject, owner: Option<&OwnerReference>, os: OsType) -> Value {
    let mut body = obj.data.clone();
    if let Some(owner) = owner {
        if let Ok(owner) = serde_json::to_value(owner) {
            if let Some(metadata) = object_at(&mut body, &["metadata"]) {
                metadata.insert("ownerReferences".to_string(), Value::Array(vec![owner]));
            }
        }
    }

    let pod_spec_path: &[&str] = match obj.kind() {
        "DaemonSet" | "Deployment" | "StatefulSet" => &["spec", "template", "spec"],
        "CronJob" => &["spec", "jobTemplate", "spec", "template", "spec"],
        _ => &[],
    };
    if let Some(label) = os.node_label() {
        if !pod_spec_path.is_empty() {
            if let Some(pod_spec) = object_at(&mut body, pod_spec_path) {
                if let Some(selector) = object_entry(pod_spec, "nodeSelector") {
                    selector.insert(OS_NODE_LABEL.to_string(), Value::from(label));
                }
            }
        }
    }
    body
}

/// Workloads whose rollout the status manager should follow.
pub fn workloads(objs: &[RenderedObject]) -> Vec<Workload> {
    objs.iter()
        .filter_map(|o| {
            let kind = match o.kind() {
                "DaemonSet" => WorkloadKind::DaemonSet,
                "Deployment" => WorkloadKind::Deployment,
                "StatefulSet" => WorkloadKind::StatefulSet,
                _ => return None,
            };
            let ns = o.namespace.as_deref().unwrap_or_default();
            Some(Workload::new(kind, ns, &o.name))
        })
        .collect()
}

/// Walk `path`, creating empty objects along the way.
fn object_at<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Map<String, Value>> {
    let mut current = value.as_object_mut()?;
    for key in path {
        current = object_entry(current, key)?;
    }
    Some(current)
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> Option<&'a mut Map<String, Value>> {
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if entry.is_null() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DaemonSet;
    use k8s_openapi::api::batch::v1::CronJob;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "operator.tigera.io/v1".to_string(),
            kind: "LogCollector".to_string(),
            name: "tigera-secure".to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    fn meta(name: &str, ns: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(ns.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_owner_reference_is_set() {
        let cm = ConfigMap {
            metadata: meta("fluentd-filters", "tigera-fluentd"),
            ..Default::default()
        };
        let obj = RenderedObject::new(&cm).unwrap();
        let body = prepare_object(&obj, Some(&owner()), OsType::Linux);
        assert_eq!(body["metadata"]["ownerReferences"][0]["kind"], "LogCollector");
        assert_eq!(body["metadata"]["ownerReferences"][0]["controller"], true);
        assert!(body.get("spec").is_none());

        let body = prepare_object(&obj, None, OsType::Linux);
        assert!(body["metadata"].get("ownerReferences").is_none());
    }

    #[test]
    fn test_os_node_selector_on_workloads() {
        let ds: DaemonSet = serde_json::from_value(json!({
            "metadata": {"name": "fluentd-node", "namespace": "tigera-fluentd"},
            "spec": {
                "selector": {},
                "template": {"spec": {"containers": [], "nodeSelector": {"pool": "a"}}}
            }
        }))
        .unwrap();
        let obj = RenderedObject::new(&ds).unwrap();
        let body = prepare_object(&obj, None, OsType::Windows);
        let selector = &body["spec"]["template"]["spec"]["nodeSelector"];
        assert_eq!(selector["kubernetes.io/os"], "windows");
        assert_eq!(selector["pool"], "a");

        let body = prepare_object(&obj, None, OsType::Any);
        assert!(body["spec"]["template"]["spec"]["nodeSelector"]
            .get("kubernetes.io/os")
            .is_none());
    }

    #[test]
    fn test_os_node_selector_on_cron_jobs() {
        let cj: CronJob = serde_json::from_value(json!({
            "metadata": {"name": "elastic-curator", "namespace": "tigera-elasticsearch"},
            "spec": {
                "schedule": "@hourly",
                "jobTemplate": {"spec": {"template": {"spec": {"containers": []}}}}
            }
        }))
        .unwrap();
        let obj = RenderedObject::new(&cj).unwrap();
        let body = prepare_object(&obj, None, OsType::Linux);
        assert_eq!(
            body["spec"]["jobTemplate"]["spec"]["template"]["spec"]["nodeSelector"]["kubernetes.io/os"],
            "linux"
        );
    }

    #[test]
    fn test_workloads() {
        let ds = DaemonSet {
            metadata: meta("fluentd-node", "tigera-fluentd"),
            ..Default::default()
        };
        let cm = ConfigMap {
            metadata: meta("fluentd-filters", "tigera-fluentd"),
            ..Default::default()
        };
        let objs = vec![
            RenderedObject::new(&cm).unwrap(),
            RenderedObject::new(&ds).unwrap(),
        ];
        assert_eq!(
            workloads(&objs),
            vec![Workload::new(WorkloadKind::DaemonSet, "tigera-fluentd", "fluentd-node")]
        );
    }
}
