//! Places key pairs and the trusted bundle into an application namespace

use crate::certificates::{KeyPair, TrustedBundle};
use crate::error::Result;
use crate::render::{Component, OsType, RenderedObject, RenderedObjects};

/// Key pair plus where it should be materialised.
#[derive(Debug, Clone)]
pub struct KeyPairOption {
    pub key_pair: KeyPair,
    /// Render a copy into the application namespace
    pub render_in_app_namespace: bool,
}

impl KeyPairOption {
    pub fn new(key_pair: KeyPair) -> Self {
        Self {
            key_pair,
            render_in_app_namespace: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CertificateManagementConfig {
    /// Application namespace receiving the copies
    pub namespace: String,
    /// Namespace the operator keeps its own copy of each issued key pair in
    pub operator_namespace: String,
    pub key_pairs: Vec<KeyPairOption>,
    pub trusted_bundle: Option<TrustedBundle>,
}

pub struct CertificateManagementComponent {
    cfg: CertificateManagementConfig,
}

pub fn certificate_management(cfg: CertificateManagementConfig) -> CertificateManagementComponent {
    CertificateManagementComponent { cfg }
}

impl Component for CertificateManagementComponent {
    fn resolve_images(&mut self) -> Result<()> {
        Ok(())
    }

    fn objects(&self) -> Result<RenderedObjects> {
        let mut to_create = Vec::new();
        for opt in &self.cfg.key_pairs {
            let kp = &opt.key_pair;
            // Persist newly issued pairs so the next reconcile reuses them
            if kp.issued_by_operator() {
                to_create.push(RenderedObject::new(&kp.secret(&self.cfg.operator_namespace))?);
            }
            if opt.render_in_app_namespace && self.cfg.namespace != self.cfg.operator_namespace {
                to_create.push(RenderedObject::new(&kp.secret(&self.cfg.namespace))?);
            }
        }
        if let Some(bundle) = &self.cfg.trusted_bundle {
            to_create.push(RenderedObject::new(&bundle.config_map(&self.cfg.namespace))?);
        }
        Ok((to_create, Vec::new()))
    }

    fn ready(&self) -> bool {
        true
    }

    fn supported_os(&self) -> OsType {
        OsType::Any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificates::CertificateManager;
    use crate::render::test_helpers::kinds_and_names;

    #[test]
    fn test_renders_operator_and_app_copies() {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let issued = cm
            .issue_key_pair("tigera-fluentd-prometheus-tls", &["fluentd-metrics".to_string()])
            .unwrap();
        let byo = KeyPair::user_provided("custom-cert", "C".into(), "K".into());
        let component = certificate_management(CertificateManagementConfig {
            namespace: "tigera-fluentd".to_string(),
            operator_namespace: "tigera-operator".to_string(),
            key_pairs: vec![KeyPairOption::new(issued), KeyPairOption::new(byo)],
            trusted_bundle: Some(cm.create_trusted_bundle([])),
        });

        let (create, delete) = component.objects().unwrap();
        assert!(delete.is_empty());
        assert_eq!(
            kinds_and_names(&create),
            vec![
                "Secret/tigera-fluentd-prometheus-tls",
                "Secret/tigera-fluentd-prometheus-tls",
                "Secret/custom-cert",
                "ConfigMap/tigera-ca-bundle",
            ]
        );
        assert_eq!(create[0].namespace.as_deref(), Some("tigera-operator"));
        assert_eq!(create[1].namespace.as_deref(), Some("tigera-fluentd"));
        assert_eq!(create[3].namespace.as_deref(), Some("tigera-fluentd"));
    }
}
