//! Per-component health reporting through `TigeraStatus`
//!
//! Controllers record what they know (CR present, degraded reason) and the
//! workloads they applied. A background loop turns that into the
//! `Available`/`Progressing`/`Degraded` conditions of a TigeraStatus named
//! after the component.

use crate::conditions::{
    build_condition, set_condition, ConditionFields, CONDITION_AVAILABLE, CONDITION_DEGRADED,
    CONDITION_FALSE, CONDITION_PROGRESSING, CONDITION_TRUE, REASON_ALL_OBJECTS_AVAILABLE,
    REASON_RESOURCE_NOT_READY,
};
use crate::crd::TigeraStatus;
use crate::error::{is_kube_not_found, Result};
use crate::options::FIELD_MANAGER;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Interval between TigeraStatus refreshes
const STATUS_SYNC_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkloadKind {
    DaemonSet,
    Deployment,
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Deployment => "Deployment",
            WorkloadKind::StatefulSet => "StatefulSet",
        };
        f.write_str(kind)
    }
}

/// A workload whose rollout decides whether the component is available
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub namespace: String,
    pub name: String,
}

impl Workload {
    pub fn new(kind: WorkloadKind, namespace: &str, name: &str) -> Self {
        Self {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}/{}\"", self.kind, self.namespace, self.name)
    }
}

#[derive(Debug, Default)]
struct State {
    cr_found: bool,
    /// Reason and message
    degraded: Option<(String, String)>,
    workloads: BTreeSet<Workload>,
}

pub struct StatusManager {
    client: Client,
    component: String,
    state: RwLock<State>,
}

impl StatusManager {
    pub fn new(client: Client, component: &str) -> Arc<Self> {
        Arc::new(Self {
            client,
            component: component.to_string(),
            state: RwLock::new(State::default()),
        })
    }

    pub async fn on_cr_found(&self) {
        self.state.write().await.cr_found = true;
    }

    /// Forget everything about the component and remove its TigeraStatus.
    pub async fn on_cr_not_found(&self) {
        *self.state.write().await = State::default();
        let api: Api<TigeraStatus> = Api::all(self.client.clone());
        match api.delete(&self.component, &DeleteParams::default()).await {
            Ok(_) => info!(component = %self.component, "Removed TigeraStatus"),
            Err(e) if is_kube_not_found(&e) => {}
            Err(e) => warn!(component = %self.component, error = %e, "Failed to remove TigeraStatus"),
        }
    }

    pub async fn set_degraded(&self, reason: &str, message: impl Into<String>) {
        let message = message.into();
        warn!(component = %self.component, reason, message = %message, "Component degraded");
        self.state.write().await.degraded = Some((reason.to_string(), message));
    }

    pub async fn clear_degraded(&self) {
        self.state.write().await.degraded = None;
    }

    pub async fn is_degraded(&self) -> bool {
        self.state.read().await.degraded.is_some()
    }

    pub async fn add_workloads(&self, workloads: impl IntoIterator<Item = Workload>) {
        self.state.write().await.workloads.extend(workloads);
    }

    pub async fn remove_workloads(&self, workloads: &[Workload]) {
        let mut state = self.state.write().await;
        for w in workloads {
            state.workloads.remove(w);
        }
    }

    /// True once every registered workload is fully rolled out.
    pub async fn is_available(&self) -> bool {
        {
            let state = self.state.read().await;
            if !state.cr_found || state.degraded.is_some() {
                return false;
            }
        }
        !self.is_progressing().await
    }

    /// True while any registered workload is still rolling out.
    pub async fn is_progressing(&self) -> bool {
        let registered = self.state.read().await.workloads.clone();
        !self.progressing_messages(&registered).await.is_empty()
    }

    /// Refresh the TigeraStatus every few seconds until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        info!(component = %self.component, "Starting status manager");
        let mut interval = tokio::time::interval(STATUS_SYNC_PERIOD);
        loop {
            interval.tick().await;
            if let Err(e) = self.update().await {
                warn!(component = %self.component, error = %e, "Failed to update TigeraStatus");
            }
        }
    }

    async fn update(&self) -> Result<()> {
        let (degraded, workloads) = {
            let state = self.state.read().await;
            if !state.cr_found {
                return Ok(());
            }
            (state.degraded.clone(), state.workloads.clone())
        };
        let progressing = self.progressing_messages(&workloads).await;

        let api: Api<TigeraStatus> = Api::all(self.client.clone());
        let desired = json!({
            "apiVersion": "operator.tigera.io/v1",
            "kind": "TigeraStatus",
            "metadata": { "name": self.component },
            "spec": {},
        });
        let current = api
            .patch(
                &self.component,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await?;

        let mut conditions: Vec<ConditionFields> = current
            .status
            .map(|s| s.conditions.into_iter().map(ConditionFields::from).collect())
            .unwrap_or_default();
        for condition in compute_conditions(degraded.as_ref(), &progressing) {
            set_condition(&mut conditions, condition);
        }
        let conditions: Vec<_> = conditions
            .into_iter()
            .map(ConditionFields::into_tigera_status_condition)
            .collect();

        api.patch_status(
            &self.component,
            &PatchParams::default(),
            &Patch::Merge(&json!({ "status": { "conditions": conditions } })),
        )
        .await?;
        debug!(component = %self.component, "Updated TigeraStatus");
        Ok(())
    }

    /// A message per workload that is missing or not yet rolled out.
    async fn progressing_messages(&self, workloads: &BTreeSet<Workload>) -> Vec<String> {
        let mut messages = Vec::new();
        for w in workloads {
            let outcome = match w.kind {
                WorkloadKind::DaemonSet => {
                    let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), &w.namespace);
                    api.get_opt(&w.name).await.map(|ds| ds.map(|ds| daemonset_rolled_out(&ds)))
                }
                WorkloadKind::Deployment => {
                    let api: Api<Deployment> = Api::namespaced(self.client.clone(), &w.namespace);
                    api.get_opt(&w.name).await.map(|d| d.map(|d| deployment_rolled_out(&d)))
                }
                WorkloadKind::StatefulSet => {
                    let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), &w.namespace);
                    api.get_opt(&w.name).await.map(|s| s.map(|s| stateful_set_rolled_out(&s)))
                }
            };
            match outcome {
                Ok(Some(true)) => {}
                Ok(Some(false)) => messages.push(format!("{w} is not available")),
                Ok(None) => messages.push(format!("Waiting for {w} to exist")),
                Err(e) => messages.push(format!("Failed to query {w}: {e}")),
            }
        }
        messages
    }
}

/// Conditions for the current state. Degraded takes precedence over progressing.
pub fn compute_conditions(
    degraded: Option<&(String, String)>,
    progressing: &[String],
) -> Vec<ConditionFields> {
    if let Some((reason, message)) = degraded {
        return vec![
            build_condition(CONDITION_DEGRADED, CONDITION_TRUE, reason, message),
            build_condition(CONDITION_PROGRESSING, CONDITION_FALSE, reason, ""),
            build_condition(CONDITION_AVAILABLE, CONDITION_FALSE, reason, ""),
        ];
    }
    if !progressing.is_empty() {
        let message = progressing.join("\n");
        return vec![
            build_condition(CONDITION_PROGRESSING, CONDITION_TRUE, REASON_RESOURCE_NOT_READY, &message),
            build_condition(CONDITION_DEGRADED, CONDITION_FALSE, REASON_RESOURCE_NOT_READY, ""),
            build_condition(CONDITION_AVAILABLE, CONDITION_FALSE, REASON_RESOURCE_NOT_READY, ""),
        ];
    }
    vec![
        build_condition(
            CONDITION_AVAILABLE,
            CONDITION_TRUE,
            REASON_ALL_OBJECTS_AVAILABLE,
            "All objects are available",
        ),
        build_condition(CONDITION_PROGRESSING, CONDITION_FALSE, REASON_ALL_OBJECTS_AVAILABLE, ""),
        build_condition(CONDITION_DEGRADED, CONDITION_FALSE, REASON_ALL_OBJECTS_AVAILABLE, ""),
    ]
}

pub fn daemonset_rolled_out(ds: &DaemonSet) -> bool {
    ds.status.as_ref().is_some_and(|s| {
        s.number_available.unwrap_or_default() == s.desired_number_scheduled
            && s.updated_number_scheduled.unwrap_or_default() == s.desired_number_scheduled
    })
}

pub fn deployment_rolled_out(d: &Deployment) -> bool {
    let desired = d.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    d.status.as_ref().is_some_and(|s| {
        s.available_replicas.unwrap_or_default() == desired
            && s.updated_replicas.unwrap_or_default() == desired
    })
}

pub fn stateful_set_rolled_out(s: &StatefulSet) -> bool {
    s.status.as_ref().is_some_and(|st| {
        st.ready_replicas.unwrap_or_default() == st.replicas
            && st.updated_replicas.unwrap_or_default() == st.replicas
    })
}
