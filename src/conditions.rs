//! Status condition helpers for `TigeraStatus` objects
//!
//! Provides constants and builder functions for managing status conditions
//! following the Kubernetes API conventions.

use crate::crd::TigeraStatusCondition;
use chrono::Utc;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";
pub const CONDITION_UNKNOWN: &str = "Unknown";

// TigeraStatus condition types
pub const CONDITION_AVAILABLE: &str = "Available";
pub const CONDITION_PROGRESSING: &str = "Progressing";
pub const CONDITION_DEGRADED: &str = "Degraded";

// Condition reasons
pub const REASON_ALL_OBJECTS_AVAILABLE: &str = "AllObjectsAvailable";
pub const REASON_RESOURCE_NOT_READY: &str = "ResourceNotReady";
pub const REASON_RESOURCE_DEGRADED: &str = "ResourceDegraded";
pub const REASON_UNKNOWN: &str = "Unknown";
pub const REASON_RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
pub const REASON_RESOURCE_READ_ERROR: &str = "ResourceReadError";
pub const REASON_RESOURCE_CREATE_ERROR: &str = "ResourceCreateError";
pub const REASON_RESOURCE_UPDATE_ERROR: &str = "ResourceUpdateError";
pub const REASON_RESOURCE_VALIDATION_ERROR: &str = "ResourceValidationError";
pub const REASON_INVALID_CONFIGURATION: &str = "InvalidConfigurationError";
pub const REASON_CERTIFICATE_ERROR: &str = "CertificateError";

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> ConditionFields {
    ConditionFields {
        condition_type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Generic condition fields, convertible into the CRD condition type.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionFields {
    pub condition_type: String,
    pub status: String,
    pub last_transition_time: Option<String>,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl ConditionFields {
    pub fn into_tigera_status_condition(self) -> TigeraStatusCondition {
        TigeraStatusCondition {
            r#type: self.condition_type,
            status: self.status,
            last_transition_time: self.last_transition_time,
            reason: self.reason,
            message: self.message,
        }
    }
}

impl From<TigeraStatusCondition> for ConditionFields {
    fn from(c: TigeraStatusCondition) -> Self {
        ConditionFields {
            condition_type: c.r#type,
            status: c.status,
            last_transition_time: c.last_transition_time,
            reason: c.reason,
            message: c.message,
        }
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<ConditionFields>, new: ConditionFields) {
    if let Some(existing) = conditions
        .iter_mut()
        .find(|c| c.condition_type == new.condition_type)
    {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_condition() {
        let cond = build_condition(
            CONDITION_AVAILABLE,
            CONDITION_TRUE,
            REASON_ALL_OBJECTS_AVAILABLE,
            "All objects are available",
        );
        assert_eq!(cond.condition_type, "Available");
        assert_eq!(cond.status, "True");
        assert!(cond.last_transition_time.is_some());
        assert_eq!(cond.reason.as_deref(), Some("AllObjectsAvailable"));
    }

    #[test]
    fn test_set_condition_adds_new() {
        let mut conditions = Vec::new();
        set_condition(
            &mut conditions,
            build_condition(CONDITION_DEGRADED, CONDITION_FALSE, REASON_UNKNOWN, ""),
        );
        assert_eq!(conditions.len(), 1);
    }

    #[test]
    fn test_set_condition_preserves_transition_time_on_same_status() {
        let mut conditions = vec![ConditionFields {
            condition_type: CONDITION_PROGRESSING.to_string(),
            status: CONDITION_TRUE.to_string(),
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
            reason: Some(REASON_RESOURCE_NOT_READY.to_string()),
            message: Some("DaemonSet \"tigera-fluentd/fluentd-node\" is not available".to_string()),
        }];

        set_condition(
            &mut conditions,
            build_condition(
                CONDITION_PROGRESSING,
                CONDITION_TRUE,
                REASON_RESOURCE_NOT_READY,
                "Deployment \"tigera-fluentd/eks-log-forwarder\" is not available",
            ),
        );

        assert_eq!(conditions.len(), 1);
        assert_eq!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
        assert!(conditions[0]
            .message
            .as_deref()
            .unwrap()
            .contains("eks-log-forwarder"));
    }

    #[test]
    fn test_set_condition_updates_transition_time_on_status_change() {
        let mut conditions = vec![ConditionFields {
            condition_type: CONDITION_AVAILABLE.to_string(),
            status: CONDITION_FALSE.to_string(),
            last_transition_time: Some("2024-01-01T00:00:00Z".to_string()),
            reason: Some(REASON_RESOURCE_NOT_READY.to_string()),
            message: None,
        }];

        set_condition(
            &mut conditions,
            build_condition(
                CONDITION_AVAILABLE,
                CONDITION_TRUE,
                REASON_ALL_OBJECTS_AVAILABLE,
                "",
            ),
        );

        assert_eq!(conditions.len(), 1);
        assert_ne!(
            conditions[0].last_transition_time.as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn test_round_trip_through_crd_condition() {
        let cond = build_condition(CONDITION_DEGRADED, CONDITION_TRUE, REASON_RESOURCE_DEGRADED, "x");
        let crd = cond.clone().into_tigera_status_condition();
        assert_eq!(crd.r#type, "Degraded");
        assert_eq!(ConditionFields::from(crd), cond);
    }
}
