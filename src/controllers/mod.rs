//! Controllers for the log operator
//!
//! Each controller watches its CR plus the objects its render depends on,
//! funnelling every event into a reconcile of the singleton `tigera-secure`
//! instance.

mod log_collector;
mod log_storage;

pub use log_collector::LogCollectorController;
pub use log_storage::LogStorageController;

use crate::crd::DEFAULT_INSTANCE_KEY;
use crate::error::OperatorError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Requeue after a transient dependency (secret, certificate) was missing
pub const REQUEUE_SHORT: Duration = Duration::from_secs(5);
/// Requeue while waiting on licensing, tiers or another operator
pub const REQUEUE_WAIT: Duration = Duration::from_secs(10);
/// Requeue while rendered workloads roll out
pub const REQUEUE_ROLLOUT: Duration = Duration::from_secs(30);
/// Back-off after a failed reconcile
pub const REQUEUE_ERROR: Duration = Duration::from_secs(60);

/// Error policy shared by the controllers.
pub fn error_policy<K>(obj: Arc<K>, error: &OperatorError, _ctx: Arc<impl Send + Sync>) -> Action
where
    K: ResourceExt,
{
    error!(name = %obj.name_any(), error = %error, "Reconciliation error");
    Action::requeue(REQUEUE_ERROR)
}

/// Every watched dependency maps to the one instance being reconciled.
pub(crate) fn singleton<K>() -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    Some(ObjectRef::new(DEFAULT_INSTANCE_KEY))
}

/// Controller reference to `obj`, so its rendered objects are garbage collected with it.
pub fn owner_reference<K>(obj: &K) -> Option<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    obj.controller_owner_ref(&())
}

/// Whether `obj` is one of the named objects a controller cares about.
pub(crate) fn is_named<K: ResourceExt>(obj: &K, names: &[&str]) -> bool {
    let name = obj.name_any();
    names.iter().any(|n| *n == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LogCollector, LogCollectorSpec};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_owner_reference() {
        let mut lc = LogCollector::new(DEFAULT_INSTANCE_KEY, LogCollectorSpec::default());
        assert!(owner_reference(&lc).is_none());

        lc.metadata.uid = Some("abcd".to_string());
        let owner = owner_reference(&lc).unwrap();
        assert_eq!(owner.kind, "LogCollector");
        assert_eq!(owner.api_version, "operator.tigera.io/v1");
        assert_eq!(owner.name, DEFAULT_INSTANCE_KEY);
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_singleton_and_is_named() {
        let r = singleton::<LogCollector>().unwrap();
        assert_eq!(r.name, DEFAULT_INSTANCE_KEY);
        assert!(r.namespace.is_none());

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some("log-collector-s3-credentials".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(is_named(&secret, &["log-collector-s3-credentials"]));
        assert!(!is_named(&secret, &["other"]));
    }
}
