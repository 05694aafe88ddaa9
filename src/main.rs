//! Log Kubernetes Operator
//!
//! Reconciles LogCollector and LogStorage resources.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! log-operator
//!
//! # Run with custom log level
//! RUST_LOG=debug log-operator
//! ```

use clap::Parser;
use kube::Client;
use log_operator::discovery::{
    auto_discover_provider, requires_enterprise_crds, supports_pod_security_policies,
};
use log_operator::leader_election::{self, LeaderElector};
use log_operator::metrics::{self, Endpoints, Metrics};
use log_operator::options::{DEFAULT_CLUSTER_DOMAIN, DEFAULT_OPERATOR_NAMESPACE};
use log_operator::{LogCollectorController, LogStorageController, OperatorOptions};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "log-operator")]
#[command(version, about = "Kubernetes Operator for log collection and storage")]
struct Args {
    /// Enable leader election for HA deployments
    #[arg(long, env = "LEADER_ELECTION", default_value = "false")]
    leader_election: bool,

    /// Namespace for the leader election Lease (auto-detected if empty)
    #[arg(long, env = "LEADER_ELECTION_NAMESPACE", default_value = "")]
    leader_election_namespace: String,

    /// Namespace holding the operator CA and user supplied secrets
    #[arg(long, env = "OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    operator_namespace: String,

    /// Cluster DNS domain
    #[arg(long, env = "CLUSTER_DOMAIN", default_value = DEFAULT_CLUSTER_DOMAIN)]
    cluster_domain: String,

    /// Metrics bind address
    #[arg(long, default_value = "0.0.0.0:8080")]
    metrics_bind_address: String,

    /// Health probe bind address
    #[arg(long, default_value = "0.0.0.0:8081")]
    health_probe_bind_address: String,
}

/// Platform facts gathered once at startup.
async fn discover(client: &Client, args: &Args) -> anyhow::Result<OperatorOptions> {
    let detected_provider = auto_discover_provider(client).await?;
    let enterprise_crds_exist = requires_enterprise_crds(client).await?;
    let use_psp = match supports_pod_security_policies(client).await {
        Ok(supported) => supported,
        Err(e) => {
            warn!("Failed to check PodSecurityPolicy support, assuming none: {}", e);
            false
        }
    };
    Ok(OperatorOptions {
        operator_namespace: args.operator_namespace.clone(),
        cluster_domain: args.cluster_domain.clone(),
        detected_provider,
        use_psp,
        enterprise_crds_exist,
    })
}

/// Serve probes or metrics in the background. A bind failure is logged, not fatal.
fn spawn_listener(addr: String, endpoints: Endpoints) {
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(addr.clone(), endpoints).await {
            error!("Failed to serve on {}: {}", addr, e);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args = Args::parse();

    info!("Starting Log Kubernetes Operator");
    info!("Leader election: {}", args.leader_election);
    info!("Operator namespace: {}", args.operator_namespace);

    let metrics = Arc::new(Metrics::new()?);
    spawn_listener(
        args.metrics_bind_address.clone(),
        Endpoints::Metrics(Arc::clone(&metrics)),
    );
    spawn_listener(args.health_probe_bind_address.clone(), Endpoints::Health);

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let options = discover(&client, &args).await?;
    info!(
        provider = ?options.detected_provider,
        use_psp = options.use_psp,
        enterprise_crds = options.enterprise_crds_exist,
        "Discovered platform"
    );

    // Leader election: acquire lease before starting controllers
    let elector = if args.leader_election {
        let ns = leader_election::detect_namespace(&args.leader_election_namespace, &args.operator_namespace);
        info!("Leader election namespace: {}", ns);
        let elector = LeaderElector::new(client.clone(), &ns);
        elector.acquire().await?;
        Some(Arc::new(elector))
    } else {
        None
    };
    metrics.set_leader(true);

    let (log_storage_handle, log_collector_handle) = if options.enterprise_crds_exist {
        let log_storage = Arc::new(LogStorageController::new(
            client.clone(),
            options.clone(),
            Arc::clone(&metrics),
        ));
        let log_collector = Arc::new(LogCollectorController::new(
            client.clone(),
            options.clone(),
            Arc::clone(&metrics),
        ));
        let log_storage_handle: JoinHandle<()> = tokio::spawn(async move {
            if let Err(e) = log_storage.run().await {
                error!("LogStorage controller error: {}", e);
            }
        });
        let log_collector_handle: JoinHandle<()> = tokio::spawn(async move {
            if let Err(e) = log_collector.run().await {
                error!("LogCollector controller error: {}", e);
            }
        });
        (log_storage_handle, log_collector_handle)
    } else {
        warn!("Enterprise CRDs not installed, log controllers disabled");
        (
            tokio::spawn(std::future::pending::<()>()),
            tokio::spawn(std::future::pending::<()>()),
        )
    };

    // Lease renewal (never completes when leader election is disabled)
    let elector_for_renew = elector.clone();
    let renew_handle = tokio::spawn(async move {
        match elector_for_renew {
            Some(e) => e.hold().await,
            None => std::future::pending::<()>().await,
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = log_storage_handle => {
            if let Err(e) = result {
                error!("LogStorage controller task failed: {}", e);
            }
        }
        result = log_collector_handle => {
            if let Err(e) = result {
                error!("LogCollector controller task failed: {}", e);
            }
        }
        _ = renew_handle => {
            error!("Leader lease lost, initiating shutdown");
        }
    }

    // Release the lease before exiting so a standby replica can take over immediately
    metrics.set_leader(false);
    if let Some(e) = &elector {
        e.release().await;
    }

    info!("Log Operator shutting down");
    Ok(())
}
