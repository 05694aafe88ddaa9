//! Lease-based leader election
//!
//! Only the replica holding the `log-operator-leader` Lease runs controllers.
//! Standby replicas block in [`LeaderElector::acquire`] until the lease
//! expires or is released.

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LEASE_NAME: &str = "log-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);
const SERVICE_ACCOUNT_NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Explicit namespace, else the pod's own namespace, else `fallback`.
pub fn detect_namespace(explicit: &str, fallback: &str) -> String {
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE_FILE)
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

pub struct LeaderElector {
    lease_api: Api<Lease>,
    identity: String,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str) -> Self {
        let identity = std::env::var("POD_NAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| format!("log-operator-{:08x}", rand::random::<u32>()));
        info!(identity = %identity, namespace, "Initialized leader elector");
        Self {
            lease_api: Api::namespaced(client, namespace),
            identity,
        }
    }

    /// Block until this replica holds the lease.
    pub async fn acquire(&self) -> anyhow::Result<()> {
        info!(identity = %self.identity, lease = LEASE_NAME, "Waiting to acquire leader lease");
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(identity = %self.identity, "Acquired leader lease");
                    return Ok(());
                }
                Ok(false) => debug!("Lease held by another replica"),
                Err(e) => warn!(error = %e, "Lease acquisition failed"),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Keep renewing the lease. Returns once leadership is lost.
    pub async fn hold(&self) {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.renew().await {
                Ok(true) => {}
                Ok(false) => {
                    error!("Lost leader lease");
                    return;
                }
                Err(e) => {
                    error!(error = %e, "Failed to renew leader lease");
                    return;
                }
            }
        }
    }

    /// `Ok(false)` when another replica took the lease.
    async fn renew(&self) -> anyhow::Result<bool> {
        let lease = self.lease_api.get(LEASE_NAME).await?;
        if holder(&lease) != Some(self.identity.as_str()) {
            return Ok(false);
        }
        let mut updated = lease;
        if let Some(spec) = updated.spec.as_mut() {
            spec.renew_time = Some(MicroTime(Utc::now()));
        }
        match self.lease_api.replace(LEASE_NAME, &PostParams::default(), &updated).await {
            Ok(_) => {
                debug!("Renewed leader lease");
                Ok(true)
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Clear the holder so a standby replica can take over without waiting for expiry.
    pub async fn release(&self) {
        let mut lease = match self.lease_api.get(LEASE_NAME).await {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "Failed to read lease for release");
                return;
            }
        };
        if holder(&lease) != Some(self.identity.as_str()) {
            return;
        }
        if let Some(spec) = lease.spec.as_mut() {
            spec.holder_identity = None;
        }
        match self.lease_api.replace(LEASE_NAME, &PostParams::default(), &lease).await {
            Ok(_) => info!("Released leader lease"),
            Err(e) => warn!(error = %e, "Failed to release leader lease"),
        }
    }

    async fn try_acquire(&self) -> anyhow::Result<bool> {
        let now = Utc::now();
        let existing = match self.lease_api.get_opt(LEASE_NAME).await? {
            Some(existing) => existing,
            None => return self.create_lease(now).await,
        };
        let ours = holder(&existing) == Some(self.identity.as_str());
        if !ours && !is_expired(existing.spec.as_ref(), now) {
            return Ok(false);
        }

        let prev = existing.spec.clone().unwrap_or_default();
        let transitions = prev.lease_transitions.unwrap_or_default();
        let mut updated = existing;
        updated.spec = Some(LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            acquire_time: if ours { prev.acquire_time } else { Some(MicroTime(now)) },
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(if ours { transitions } else { transitions + 1 }),
            ..Default::default()
        });
        match self.lease_api.replace(LEASE_NAME, &PostParams::default(), &updated).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_lease(&self, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        match self.lease_api.create(&PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn holder(lease: &Lease) -> Option<&str> {
    lease.spec.as_ref().and_then(|s| s.holder_identity.as_deref())
}

/// A lease with no holder or no renewal inside its duration is free to take.
fn is_expired(spec: Option<&LeaseSpec>, now: DateTime<Utc>) -> bool {
    let Some(spec) = spec else {
        return true;
    };
    if spec.holder_identity.is_none() {
        return true;
    }
    let duration = i64::from(spec.lease_duration_seconds.unwrap_or(LEASE_DURATION_SECS));
    match &spec.renew_time {
        Some(MicroTime(t)) => now.signed_duration_since(*t).num_seconds() > duration,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn spec(holder: Option<&str>, renewed_secs_ago: i64) -> LeaseSpec {
        LeaseSpec {
            holder_identity: holder.map(str::to_string),
            lease_duration_seconds: Some(LEASE_DURATION_SECS),
            renew_time: Some(MicroTime(Utc::now() - ChronoDuration::seconds(renewed_secs_ago))),
            ..Default::default()
        }
    }

    #[test]
    fn test_fresh_lease_is_held() {
        assert!(!is_expired(Some(&spec(Some("log-operator-0"), 2)), Utc::now()));
    }

    #[test]
    fn test_stale_lease_is_expired() {
        assert!(is_expired(Some(&spec(Some("log-operator-0"), 60)), Utc::now()));
    }

    #[test]
    fn test_released_or_missing_lease_is_expired() {
        assert!(is_expired(Some(&spec(None, 1)), Utc::now()));
        assert!(is_expired(None, Utc::now()));
    }

    #[test]
    fn test_detect_namespace_prefers_explicit() {
        assert_eq!(detect_namespace("tigera-operator", "default"), "tigera-operator");
    }
}
