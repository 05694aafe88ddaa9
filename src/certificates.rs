//! Operator certificate authority and TLS key pairs
//!
//! The operator keeps a private CA in its own namespace and issues server
//! key pairs for the components it renders. Key pairs are stored as
//! `kubernetes.io/tls` Secrets; ones the operator issued carry annotations
//! recording the issuer and DNS names so a change to either triggers a
//! reissue. Secrets without those annotations are treated as user-provided
//! and used unchanged.
//!
//! Every certificate a component needs to trust is collected into a
//! [`TrustedBundle`] ConfigMap mounted at a fixed path.

use crate::error::{OperatorError, Result};
use crate::options::FIELD_MANAGER;
use crate::render::{os_path, OsType};
use chrono::{Datelike, Duration, Utc};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Secret, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyUsagePurpose,
};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Secret holding the operator CA
pub const CA_SECRET_NAME: &str = "tigera-ca-private";
const CA_COMMON_NAME: &str = "tigera-operator-signer";
const CA_VALIDITY_DAYS: i64 = 5 * 365;
const KEY_PAIR_VALIDITY_DAYS: i64 = 825;

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// ConfigMap holding every certificate a component should trust
pub const TRUSTED_BUNDLE_NAME: &str = "tigera-ca-bundle";
pub const TRUSTED_BUNDLE_KEY: &str = "tigera-ca-bundle.crt";
pub const TRUSTED_CERT_VOLUME_MOUNT_PATH: &str = "/etc/pki/tls/certs/";
pub const TRUSTED_CERT_BUNDLE_MOUNT_PATH: &str = "/etc/pki/tls/certs/tigera-ca-bundle.crt";

const ISSUER_ANNOTATION: &str = "certificates.operator.tigera.io/issuer";
const DNS_NAMES_ANNOTATION: &str = "certificates.operator.tigera.io/dns-names";
const HASH_ANNOTATION_PREFIX: &str = "hash.operator.tigera.io/";

/// DNS names a service answers to, from shortest to fully qualified.
pub fn service_dns_names(service: &str, namespace: &str, cluster_domain: &str) -> Vec<String> {
    vec![
        service.to_string(),
        format!("{service}.{namespace}"),
        format!("{service}.{namespace}.svc"),
        format!("{service}.{namespace}.svc.{cluster_domain}"),
    ]
}

fn pem_hash(pem: &str) -> String {
    hex::encode(Sha256::digest(pem.as_bytes()))
}

fn ymd(days_from_now: i64) -> (i32, u8, u8) {
    let date = (Utc::now() + Duration::days(days_from_now)).date_naive();
    (date.year(), date.month() as u8, date.day() as u8)
}

fn set_validity(params: &mut CertificateParams, days: i64) {
    let (y, m, d) = ymd(-1);
    params.not_before = rcgen::date_time_ymd(y, m, d);
    let (y, m, d) = ymd(days);
    params.not_after = rcgen::date_time_ymd(y, m, d);
}

fn secret_field(secret: &Secret, field: &str) -> Result<String> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(field))
        .ok_or_else(|| OperatorError::MissingField {
            kind: "Secret",
            name: name.clone(),
            field: field.to_string(),
        })?;
    String::from_utf8(bytes.0.clone()).map_err(|_| {
        OperatorError::Certificate(format!("field {field:?} of secret {name:?} is not UTF-8"))
    })
}

/// A public certificate a component may need to trust.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub name: String,
    pub cert_pem: String,
}

impl Certificate {
    pub fn hash_annotation_key(&self) -> String {
        format!("{HASH_ANNOTATION_PREFIX}{}", self.name)
    }

    pub fn hash_annotation_value(&self) -> String {
        pem_hash(&self.cert_pem)
    }
}

/// A TLS certificate and its private key, stored as a Secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub name: String,
    pub cert_pem: String,
    pub key_pem: String,
    /// Issuer id and DNS names, present when the operator issued the pair
    issued: Option<(String, Vec<String>)>,
}

impl KeyPair {
    /// Key pair supplied by the user rather than issued by the operator.
    pub fn user_provided(name: &str, cert_pem: String, key_pem: String) -> Self {
        Self {
            name: name.to_string(),
            cert_pem,
            key_pem,
            issued: None,
        }
    }

    pub fn issued_by_operator(&self) -> bool {
        self.issued.is_some()
    }

    /// The key pair as a TLS Secret in `namespace`.
    pub fn secret(&self, namespace: &str) -> Secret {
        let annotations = self.issued.as_ref().map(|(issuer, dns_names)| {
            BTreeMap::from([
                (ISSUER_ANNOTATION.to_string(), issuer.clone()),
                (DNS_NAMES_ANNOTATION.to_string(), dns_names.join(",")),
            ])
        });
        Secret {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace.to_string()),
                annotations,
                ..Default::default()
            },
            type_: Some("kubernetes.io/tls".to_string()),
            data: Some(BTreeMap::from([
                (
                    TLS_CERT_KEY.to_string(),
                    ByteString(self.cert_pem.clone().into_bytes()),
                ),
                (
                    TLS_PRIVATE_KEY_KEY.to_string(),
                    ByteString(self.key_pem.clone().into_bytes()),
                ),
            ])),
            ..Default::default()
        }
    }

    pub fn certificate(&self) -> Certificate {
        Certificate {
            name: self.name.clone(),
            cert_pem: self.cert_pem.clone(),
        }
    }

    pub fn hash_annotation_key(&self) -> String {
        format!("{HASH_ANNOTATION_PREFIX}{}", self.name)
    }

    pub fn hash_annotation_value(&self) -> String {
        pem_hash(&self.cert_pem)
    }

    pub fn volume(&self) -> Volume {
        Volume {
            name: self.name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(self.name.clone()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn volume_mount(&self, os: OsType) -> VolumeMount {
        VolumeMount {
            name: self.name.clone(),
            mount_path: os_path(os, &format!("/{}", self.name)),
            read_only: Some(true),
            ..Default::default()
        }
    }

    pub fn volume_mount_certificate_file_path(&self, os: OsType) -> String {
        os_path(os, &format!("/{}/{TLS_CERT_KEY}", self.name))
    }

    pub fn volume_mount_key_file_path(&self, os: OsType) -> String {
        os_path(os, &format!("/{}/{TLS_PRIVATE_KEY_KEY}", self.name))
    }
}

/// Certificates trusted by a component, rendered as one ConfigMap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedBundle {
    certificates: Vec<Certificate>,
}

impl TrustedBundle {
    pub fn new(ca: Certificate) -> Self {
        Self {
            certificates: vec![ca],
        }
    }

    /// Add certificates, skipping any already present.
    pub fn add_certificates(&mut self, certs: impl IntoIterator<Item = Certificate>) {
        for cert in certs {
            if !self.certificates.iter().any(|c| c.cert_pem == cert.cert_pem) {
                self.certificates.push(cert);
            }
        }
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn config_map(&self, namespace: &str) -> ConfigMap {
        let bundle: Vec<&str> = self
            .certificates
            .iter()
            .map(|c| c.cert_pem.trim_end())
            .collect();
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(TRUSTED_BUNDLE_NAME.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                TRUSTED_BUNDLE_KEY.to_string(),
                format!("{}\n", bundle.join("\n")),
            )])),
            ..Default::default()
        }
    }

    /// One annotation per certificate so pods restart when any of them changes.
    pub fn hash_annotations(&self) -> BTreeMap<String, String> {
        self.certificates
            .iter()
            .map(|c| (c.hash_annotation_key(), c.hash_annotation_value()))
            .collect()
    }

    pub fn volume(&self) -> Volume {
        Volume {
            name: TRUSTED_BUNDLE_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: TRUSTED_BUNDLE_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn volume_mount(&self, os: OsType) -> VolumeMount {
        VolumeMount {
            name: TRUSTED_BUNDLE_NAME.to_string(),
            mount_path: os_path(os, TRUSTED_CERT_VOLUME_MOUNT_PATH),
            read_only: Some(true),
            ..Default::default()
        }
    }
}

/// Issues key pairs signed by the operator CA.
#[derive(Clone)]
pub struct CertificateManager {
    ca_cert_pem: String,
    ca_key_pem: String,
    operator_namespace: String,
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("operator_namespace", &self.operator_namespace)
            .field("issuer", &self.issuer_id())
            .finish()
    }
}

impl CertificateManager {
    /// Load the CA from the operator namespace, creating it on first use.
    pub async fn create(client: &Client, operator_namespace: &str) -> Result<Self> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), operator_namespace);
        if let Some(secret) = secrets.get_opt(CA_SECRET_NAME).await? {
            return Self::from_secret(&secret, operator_namespace);
        }

        let manager = Self::generate(operator_namespace)?;
        info!(namespace = %operator_namespace, "Creating operator CA");
        secrets
            .patch(
                CA_SECRET_NAME,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(&manager.ca_secret()),
            )
            .await?;
        Ok(manager)
    }

    /// A fresh self-signed CA.
    pub fn generate(operator_namespace: &str) -> Result<Self> {
        let key = rcgen::KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        set_validity(&mut params, CA_VALIDITY_DAYS);
        let cert = params.self_signed(&key)?;
        Ok(Self {
            ca_cert_pem: cert.pem(),
            ca_key_pem: key.serialize_pem(),
            operator_namespace: operator_namespace.to_string(),
        })
    }

    /// Rebuild the manager from a stored CA secret.
    pub fn from_secret(secret: &Secret, operator_namespace: &str) -> Result<Self> {
        let ca_cert_pem = secret_field(secret, TLS_CERT_KEY)?;
        let ca_key_pem = secret_field(secret, TLS_PRIVATE_KEY_KEY)?;
        // Fail early on a corrupt CA rather than on first issuance
        let key = rcgen::KeyPair::from_pem(&ca_key_pem)?;
        Issuer::from_ca_cert_pem(&ca_cert_pem, key)?;
        Ok(Self {
            ca_cert_pem,
            ca_key_pem,
            operator_namespace: operator_namespace.to_string(),
        })
    }

    pub fn ca_secret(&self) -> Secret {
        KeyPair::user_provided(CA_SECRET_NAME, self.ca_cert_pem.clone(), self.ca_key_pem.clone())
            .secret(&self.operator_namespace)
    }

    pub fn ca_certificate(&self) -> Certificate {
        Certificate {
            name: CA_SECRET_NAME.to_string(),
            cert_pem: self.ca_cert_pem.clone(),
        }
    }

    /// Short stable identifier of this CA, recorded on issued key pairs.
    pub fn issuer_id(&self) -> String {
        pem_hash(&self.ca_cert_pem)[..16].to_string()
    }

    /// Issue a new key pair for the given DNS names.
    pub fn issue_key_pair(&self, name: &str, dns_names: &[String]) -> Result<KeyPair> {
        let key = rcgen::KeyPair::generate()?;
        let mut params = CertificateParams::new(dns_names.to_vec())?;
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            dns_names.first().map(String::as_str).unwrap_or(name),
        );
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        set_validity(&mut params, KEY_PAIR_VALIDITY_DAYS);

        let ca_key = rcgen::KeyPair::from_pem(&self.ca_key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, ca_key)?;
        let cert = params.signed_by(&key, &issuer)?;

        Ok(KeyPair {
            name: name.to_string(),
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
            issued: Some((self.issuer_id(), dns_names.to_vec())),
        })
    }

    /// Reuse the key pair stored in `existing` when it is still valid for `dns_names`.
    ///
    /// Returns `None` when a new key pair must be issued.
    pub fn reusable_key_pair(&self, existing: &Secret, dns_names: &[String]) -> Result<Option<KeyPair>> {
        let name = existing.metadata.name.clone().unwrap_or_default();
        let cert_pem = secret_field(existing, TLS_CERT_KEY)?;
        let key_pem = secret_field(existing, TLS_PRIVATE_KEY_KEY)?;
        let annotations = existing.metadata.annotations.clone().unwrap_or_default();

        let Some(issuer) = annotations.get(ISSUER_ANNOTATION) else {
            debug!(secret = %name, "Using user-provided key pair");
            return Ok(Some(KeyPair::user_provided(&name, cert_pem, key_pem)));
        };
        let recorded_names = annotations
            .get(DNS_NAMES_ANNOTATION)
            .map(String::as_str)
            .unwrap_or_default();
        if *issuer != self.issuer_id() || recorded_names != dns_names.join(",") {
            debug!(secret = %name, "Key pair issuer or DNS names changed, reissuing");
            return Ok(None);
        }
        Ok(Some(KeyPair {
            name,
            cert_pem,
            key_pem,
            issued: Some((issuer.clone(), dns_names.to_vec())),
        }))
    }

    /// Fetch the key pair `name` from the operator namespace, issuing one when
    /// it is missing or stale. The caller renders the returned pair.
    pub async fn get_or_create_key_pair(
        &self,
        client: &Client,
        name: &str,
        dns_names: &[String],
    ) -> Result<KeyPair> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), &self.operator_namespace);
        if let Some(existing) = secrets.get_opt(name).await? {
            if let Some(kp) = self.reusable_key_pair(&existing, dns_names)? {
                return Ok(kp);
            }
        }
        self.issue_key_pair(name, dns_names)
    }

    /// Public certificate stored in secret `name`, `None` when the secret does not exist.
    pub async fn get_certificate(
        &self,
        client: &Client,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Certificate>> {
        let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
        match secrets.get_opt(name).await? {
            Some(secret) => Ok(Some(Certificate {
                name: name.to_string(),
                cert_pem: secret_field(&secret, TLS_CERT_KEY)?,
            })),
            None => Ok(None),
        }
    }

    /// Bundle of the CA plus any extra certificates.
    pub fn create_trusted_bundle(&self, certs: impl IntoIterator<Item = Certificate>) -> TrustedBundle {
        let mut bundle = TrustedBundle::new(self.ca_certificate());
        bundle.add_certificates(certs);
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        service_dns_names("fluentd-metrics", "tigera-fluentd", "cluster.local")
    }

    #[test]
    fn test_service_dns_names() {
        assert_eq!(
            names(),
            vec![
                "fluentd-metrics",
                "fluentd-metrics.tigera-fluentd",
                "fluentd-metrics.tigera-fluentd.svc",
                "fluentd-metrics.tigera-fluentd.svc.cluster.local",
            ]
        );
    }

    #[test]
    fn test_ca_round_trips_through_secret() {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let secret = cm.ca_secret();
        assert_eq!(secret.metadata.name.as_deref(), Some(CA_SECRET_NAME));
        let restored = CertificateManager::from_secret(&secret, "tigera-operator").unwrap();
        assert_eq!(restored.issuer_id(), cm.issuer_id());
    }

    #[test]
    fn test_issued_key_pair_is_reused_until_names_change() {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let kp = cm.issue_key_pair("tigera-fluentd-prometheus-tls", &names()).unwrap();
        assert!(kp.issued_by_operator());
        assert!(kp.cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));

        let secret = kp.secret("tigera-operator");
        let reused = cm.reusable_key_pair(&secret, &names()).unwrap().unwrap();
        assert_eq!(reused, kp);

        let other = vec!["other".to_string()];
        assert!(cm.reusable_key_pair(&secret, &other).unwrap().is_none());

        let other_ca = CertificateManager::generate("tigera-operator").unwrap();
        assert!(other_ca.reusable_key_pair(&secret, &names()).unwrap().is_none());
    }

    #[test]
    fn test_user_provided_key_pair_is_kept() {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let byo = KeyPair::user_provided("custom", "CERT".to_string(), "KEY".to_string());
        let secret = byo.secret("tigera-operator");
        assert!(secret.metadata.annotations.is_none());
        let kp = cm.reusable_key_pair(&secret, &names()).unwrap().unwrap();
        assert!(!kp.issued_by_operator());
        assert_eq!(kp.cert_pem, "CERT");
    }

    #[test]
    fn test_secret_without_key_is_an_error() {
        let cm = CertificateManager::generate("tigera-operator").unwrap();
        let mut secret = KeyPair::user_provided("broken", "C".into(), "K".into()).secret("ns");
        secret.data.as_mut().unwrap().remove(TLS_PRIVATE_KEY_KEY);
        let err = cm.reusable_key_pair(&secret, &names()).unwrap_err();
        assert!(err.to_string().contains("tls.key"));
    }

    #[test]
    fn test_trusted_bundle() {
        let ca = Certificate {
            name: "ca".to_string(),
            cert_pem: "CA\n".to_string(),
        };
        let mut bundle = TrustedBundle::new(ca.clone());
        bundle.add_certificates([
            ca.clone(),
            Certificate {
                name: "gateway".to_string(),
                cert_pem: "GW\n".to_string(),
            },
        ]);
        assert_eq!(bundle.certificates().len(), 2);

        let cm = bundle.config_map("tigera-fluentd");
        assert_eq!(cm.data.unwrap()[TRUSTED_BUNDLE_KEY], "CA\nGW\n");

        let annotations = bundle.hash_annotations();
        assert!(annotations.contains_key("hash.operator.tigera.io/gateway"));
        assert_eq!(
            bundle.volume_mount(OsType::Windows).mount_path,
            "c:/etc/pki/tls/certs/"
        );
    }

    #[test]
    fn test_key_pair_paths() {
        let kp = KeyPair::user_provided("tigera-fluentd-prometheus-tls", String::new(), String::new());
        assert_eq!(
            kp.volume_mount_key_file_path(OsType::Linux),
            "/tigera-fluentd-prometheus-tls/tls.key"
        );
        assert_eq!(
            kp.volume_mount_certificate_file_path(OsType::Windows),
            "c:/tigera-fluentd-prometheus-tls/tls.crt"
        );
    }
}
