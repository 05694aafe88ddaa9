//! Custom Resource Definitions for the log operator
//!
//! Defines the CRDs that the operator manages:
//! - LogCollector: fluentd log collection and forwarding
//! - LogStorage: Elasticsearch, Kibana and curator
//!
//! and the third-party kinds it reads or renders (Installation, Calico
//! policy and licensing, ECK, PodSecurityPolicy).

pub mod calico;
pub mod eck;
mod installation;
mod log_collector;
mod log_storage;
mod operator;
pub mod policy;

pub use installation::{
    FipsMode, Installation, InstallationSpec, InstallationStatus, ProductVariant, Provider,
    INSTALLATION_NAME,
};
pub use log_collector::{
    AdditionalLogSourceSpec, AdditionalLogStoreSpec, CollectProcessPathOption,
    EksCloudwatchLogsSpec, LogCollector, LogCollectorSpec, LogCollectorStatus, S3StoreSpec,
    SplunkStoreSpec, SyslogLogType, SyslogStoreSpec,
};
pub use log_storage::{
    Indices, LogStorage, LogStorageComponentName, LogStorageComponentResource, LogStorageSpec,
    LogStorageStatus, NodeSet, NodeSetSelectionAttribute, Nodes, ResourceRequirements, Retention,
    DEFAULT_STORAGE_CLASS_NAME,
};
pub use operator::{
    ApiServerSpec, ApiServerStatus, ManagementCluster, ManagementClusterConnection,
    ManagementClusterConnectionSpec, ManagementClusterSpec, TigeraStatus, TigeraStatusCondition,
    TigeraStatusSpec, TigeraStatusStatus, APIServer, TIGERA_STATUS_READY,
};

/// Name of the singleton LogCollector, LogStorage and APIServer objects
pub const DEFAULT_INSTANCE_KEY: &str = "tigera-secure";
