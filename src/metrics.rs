//! Prometheus metrics and health probes
//!
//! Two small HTTP listeners run next to the controllers:
//! - the metrics address serves `GET /metrics`
//! - the health address serves `GET /healthz` and `GET /readyz`

use crate::error::Result;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_ERROR: &str = "error";

/// Counters and gauges exported by the operator
pub struct Metrics {
    registry: Registry,
    reconciliations: IntCounterVec,
    reconcile_duration: HistogramVec,
    leader: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconciliations = IntCounterVec::new(
            Opts::new(
                "log_operator_reconciliations_total",
                "Total number of reconciliations",
            ),
            &["controller", "result"],
        )?;
        let reconcile_duration = HistogramVec::new(
            HistogramOpts::new(
                "log_operator_reconciliation_duration_seconds",
                "Duration of reconciliation in seconds",
            ),
            &["controller"],
        )?;
        let leader = IntGauge::new(
            "log_operator_leader",
            "Whether this instance is the leader (1=leader, 0=standby)",
        )?;

        registry.register(Box::new(reconciliations.clone()))?;
        registry.register(Box::new(reconcile_duration.clone()))?;
        registry.register(Box::new(leader.clone()))?;

        Ok(Self {
            registry,
            reconciliations,
            reconcile_duration,
            leader,
        })
    }

    /// Record one finished reconcile of `controller`.
    pub fn record_reconciliation(&self, controller: &str, success: bool, duration: Duration) {
        let result = if success { RESULT_SUCCESS } else { RESULT_ERROR };
        self.reconciliations
            .with_label_values(&[controller, result])
            .inc();
        self.reconcile_duration
            .with_label_values(&[controller])
            .observe(duration.as_secs_f64());
    }

    pub fn set_leader(&self, is_leader: bool) {
        self.leader.set(i64::from(is_leader));
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

/// Which endpoints a listener answers
#[derive(Clone)]
pub enum Endpoints {
    Metrics(Arc<Metrics>),
    Health,
}

struct Response {
    status: &'static str,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn text(status: &'static str, body: &[u8]) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.to_vec(),
        }
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.content_type,
            self.body.len()
        )
        .into_bytes();
        out.extend(self.body);
        out
    }
}

/// Path of the first request line, `/` when it cannot be read.
fn request_path(request: &str) -> &str {
    request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
}

fn respond(endpoints: &Endpoints, path: &str) -> Response {
    match (endpoints, path) {
        (Endpoints::Metrics(metrics), "/metrics") => match metrics.encode() {
            Ok(body) => Response {
                status: "200 OK",
                content_type: "text/plain; version=0.0.4; charset=utf-8",
                body,
            },
            Err(e) => Response::text("500 Internal Server Error", e.to_string().as_bytes()),
        },
        (Endpoints::Health, "/healthz" | "/readyz") => Response::text("200 OK", b"ok"),
        _ => Response::text("404 Not Found", b"not found"),
    }
}

async fn handle(mut stream: TcpStream, endpoints: Endpoints) {
    let mut buf = vec![0u8; 4096];
    let n = match stream.read(&mut buf).await {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read probe request: {e}");
            return;
        }
    };
    let request = String::from_utf8_lossy(&buf[..n]);
    let response = respond(&endpoints, request_path(&request));
    if let Err(e) = stream.write_all(&response.into_bytes()).await {
        debug!("Failed to write probe response: {e}");
    }
}

/// Serve `endpoints` on `addr` until the task is dropped.
pub async fn serve(addr: String, endpoints: Endpoints) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle(stream, endpoints.clone()));
            }
            Err(e) => {
                error!("Failed to accept connection on {addr}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(response: Response) -> String {
        String::from_utf8(response.body).unwrap()
    }

    #[test]
    fn test_record_reconciliation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_reconciliation("log-collector", true, Duration::from_millis(20));
        metrics.record_reconciliation("log-collector", false, Duration::from_millis(5));
        metrics.record_reconciliation("log-storage", true, Duration::from_secs(1));

        assert_eq!(
            metrics
                .reconciliations
                .with_label_values(&["log-collector", RESULT_SUCCESS])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .reconcile_duration
                .with_label_values(&["log-collector"])
                .get_sample_count(),
            2
        );
    }

    #[test]
    fn test_leader_gauge() {
        let metrics = Metrics::new().unwrap();
        metrics.set_leader(true);
        assert_eq!(metrics.leader.get(), 1);
        metrics.set_leader(false);
        assert_eq!(metrics.leader.get(), 0);
    }

    #[test]
    fn test_request_path() {
        assert_eq!(request_path("GET /healthz HTTP/1.1\r\nHost: x\r\n\r\n"), "/healthz");
        assert_eq!(request_path(""), "/");
    }

    #[test]
    fn test_metrics_endpoint() {
        let metrics = Arc::new(Metrics::new().unwrap());
        metrics.record_reconciliation("log-storage", true, Duration::from_millis(1));
        let endpoints = Endpoints::Metrics(metrics);

        let response = respond(&endpoints, "/metrics");
        assert_eq!(response.status, "200 OK");
        assert!(body(response).contains("log_operator_reconciliations_total"));

        assert_eq!(respond(&endpoints, "/healthz").status, "404 Not Found");
    }

    #[test]
    fn test_health_endpoints() {
        assert_eq!(respond(&Endpoints::Health, "/healthz").status, "200 OK");
        assert_eq!(body(respond(&Endpoints::Health, "/readyz")), "ok");
        assert_eq!(respond(&Endpoints::Health, "/metrics").status, "404 Not Found");

        let raw = String::from_utf8(Response::text("200 OK", b"ok").into_bytes()).unwrap();
        assert!(raw.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(raw.contains("Content-Length: 2\r\n"));
        assert!(raw.ends_with("\r\n\r\nok"));
    }
}
