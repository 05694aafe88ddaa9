//! LogCollector Custom Resource Definition
//!
//! Installs and configures log collection (fluentd) on every node, with
//! optional forwarding to S3, Syslog and Splunk and an optional EKS
//! Cloudwatch audit log source.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// LogCollector is the Schema for the logcollectors API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "operator.tigera.io",
    version = "v1",
    kind = "LogCollector",
    status = "LogCollectorStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogCollectorSpec {
    /// Configuration for exporting flow, audit and DNS logs to external storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_stores: Option<AdditionalLogStoreSpec>,

    /// Configuration for importing audit logs from managed kubernetes offerings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_sources: Option<AdditionalLogSourceSpec>,

    /// Whether the process path is recorded in flow logs. Defaults to Enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collect_process_path: Option<CollectProcessPathOption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalLogStoreSpec {
    /// Archive logs to an S3 bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3StoreSpec>,

    /// Forward logs to a syslog endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syslog: Option<SyslogStoreSpec>,

    /// Forward logs to a Splunk HTTP event collector
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splunk: Option<SplunkStoreSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalLogSourceSpec {
    /// Import EKS API server audit logs from Cloudwatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eks_cloudwatch_log: Option<EksCloudwatchLogsSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct S3StoreSpec {
    /// AWS region of the bucket
    pub region: String,
    pub bucket_name: String,
    /// Path inside the bucket to write to
    pub bucket_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyslogStoreSpec {
    /// Location of the syslog server, e.g. `tcp://1.2.3.4:601`
    pub endpoint: String,

    /// Maximum size of a syslog packet in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packet_size: Option<i32>,

    /// Log types forwarded to syslog. Empty means Audit, DNS and Flows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_types: Vec<SyslogLogType>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SplunkStoreSpec {
    /// Location of the Splunk HEC, e.g. `https://1.2.3.4:8088`
    pub endpoint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EksCloudwatchLogsSpec {
    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub group_name: String,

    /// Prefix of the log streams to read. Defaults to `kube-apiserver-audit-`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_prefix: Option<String>,

    /// Cloudwatch poll interval in seconds. Defaults to 60.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_interval: Option<i32>,
}

/// Log types that can be forwarded to syslog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SyslogLogType {
    Audit,
    #[serde(rename = "DNS")]
    Dns,
    Flows,
    #[serde(rename = "IDSEvents")]
    IdsEvents,
}

impl SyslogLogType {
    /// Log types used when a syslog store omits `logTypes`.
    pub fn defaults() -> Vec<SyslogLogType> {
        vec![SyslogLogType::Audit, SyslogLogType::Dns, SyslogLogType::Flows]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CollectProcessPathOption {
    Enabled,
    Disabled,
}

/// Status of the LogCollector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogCollectorStatus {
    /// `Ready` once every collector workload is available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl LogCollectorSpec {
    pub fn s3(&self) -> Option<&S3StoreSpec> {
        self.additional_stores.as_ref().and_then(|s| s.s3.as_ref())
    }

    pub fn syslog(&self) -> Option<&SyslogStoreSpec> {
        self.additional_stores.as_ref().and_then(|s| s.syslog.as_ref())
    }

    pub fn splunk(&self) -> Option<&SplunkStoreSpec> {
        self.additional_stores.as_ref().and_then(|s| s.splunk.as_ref())
    }

    pub fn eks_cloudwatch_log(&self) -> Option<&EksCloudwatchLogsSpec> {
        self.additional_sources
            .as_ref()
            .and_then(|s| s.eks_cloudwatch_log.as_ref())
    }

    /// Fill unset fields with their defaults, returning the names of the fields changed.
    pub fn fill_defaults(&mut self) -> Vec<String> {
        let mut modified = Vec::new();

        if self.collect_process_path.is_none() {
            self.collect_process_path = Some(CollectProcessPathOption::Enabled);
            modified.push("CollectProcessPath".to_string());
        }

        if let Some(syslog) = self
            .additional_stores
            .as_mut()
            .and_then(|s| s.syslog.as_mut())
        {
            // Stores created before logTypes existed keep their previous behaviour
            if syslog.log_types.is_empty() {
                syslog.log_types = SyslogLogType::defaults();
                modified.push("AdditionalStores.Syslog.LogTypes".to_string());
            }
        }

        modified
    }
}
