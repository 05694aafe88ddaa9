//! Log Kubernetes Operator
//!
//! A Kubernetes operator for the log collection and log storage parts of a
//! Calico Enterprise style installation.
//!
//! ## Custom Resources
//!
//! - `LogCollector`: fluentd on every node, forwarding flow, DNS, audit and
//!   IDS logs to Elasticsearch and optional S3, syslog and Splunk stores
//! - `LogStorage`: an ECK-managed Elasticsearch cluster with Kibana and the
//!   index curator
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: operator.tigera.io/v1
//! kind: LogStorage
//! metadata:
//!   name: tigera-secure
//! spec:
//!   nodes:
//!     count: 3
//!   retention:
//!     flows: 8
//! ```

pub mod certificates;
pub mod conditions;
pub mod controllers;
pub mod crd;
pub mod discovery;
pub mod error;
pub mod handler;
pub mod images;
pub mod leader_election;
pub mod metrics;
pub mod options;
pub mod quantity;
pub mod render;
pub mod status;
pub mod utils;

pub use controllers::{LogCollectorController, LogStorageController};
pub use crd::{
    LogCollector, LogCollectorSpec, LogCollectorStatus, LogStorage, LogStorageSpec,
    LogStorageStatus,
};
pub use error::{OperatorError, Result};
pub use options::OperatorOptions;
