//! Component image references
//!
//! Images are the installation registry joined with a fixed `image:tag`.

use crate::crd::InstallationSpec;

/// Registry used when the Installation does not name one
pub const DEFAULT_REGISTRY: &str = "quay.io/";

/// A container image and the tag the operator deploys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Component {
    pub image: &'static str,
    pub version: &'static str,
}

pub const FLUENTD: Component = Component {
    image: "tigera/fluentd",
    version: "v3.15.0",
};

pub const FLUENTD_WINDOWS: Component = Component {
    image: "tigera/fluentd-windows",
    version: "v3.15.0",
};

pub const ELASTICSEARCH: Component = Component {
    image: "tigera/elasticsearch",
    version: "v3.15.0",
};

pub const ELASTICSEARCH_FIPS: Component = Component {
    image: "tigera/elasticsearch",
    version: "v3.15.0-fips",
};

pub const ECK_OPERATOR: Component = Component {
    image: "tigera/eck-operator",
    version: "v3.15.0",
};

pub const KIBANA: Component = Component {
    image: "tigera/kibana",
    version: "v3.15.0",
};

pub const ES_CURATOR: Component = Component {
    image: "tigera/es-curator",
    version: "v3.15.0",
};

/// Elastic stack version the ECK resources declare
pub const ECK_ELASTICSEARCH_VERSION: &str = "7.17.7";
pub const ECK_KIBANA_VERSION: &str = "7.17.7";
/// ECK operator version recorded on managed resources
pub const ECK_OPERATOR_VERSION: &str = "2.5.0";

/// Normalise a registry so it always ends with `/`.
pub fn registry(installation: &InstallationSpec) -> String {
    match installation.registry.as_deref() {
        None | Some("") => DEFAULT_REGISTRY.to_string(),
        Some(r) if r.ends_with('/') => r.to_string(),
        Some(r) => format!("{r}/"),
    }
}

/// Full image reference for a component.
pub fn reference(component: Component, installation: &InstallationSpec) -> String {
    format!(
        "{}{}:{}",
        registry(installation),
        component.image,
        component.version
    )
}
