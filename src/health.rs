// Health + metrics surface (§6): `/health`, `/health/live`, `/health/ready`,
// `/metrics`. Hand-rolled raw-HTTP server over a bound `TcpListener`,
// grounded directly on the pack's `otel.rs` `MetricsServer` — no web
// framework dependency, since the teacher's stack doesn't carry one.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::guards::ResourceGuards;
use crate::metrics::Metrics;

pub struct Readiness {
    pub consumer_attached: AtomicBool,
    pub memory_reachable: AtomicBool,
    pub kb_reachable: AtomicBool,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            consumer_attached: AtomicBool::new(false),
            memory_reachable: AtomicBool::new(true),
            kb_reachable: AtomicBool::new(true),
        }
    }
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.consumer_attached.load(Ordering::Relaxed)
            && self.memory_reachable.load(Ordering::Relaxed)
            && self.kb_reachable.load(Ordering::Relaxed)
    }
}

pub struct HealthServer {
    addr: SocketAddr,
    metrics: Arc<Metrics>,
    guards: Arc<ResourceGuards>,
    readiness: Arc<Readiness>,
}

impl HealthServer {
    pub fn new(addr: SocketAddr, metrics: Arc<Metrics>, guards: Arc<ResourceGuards>, readiness: Arc<Readiness>) -> Self {
        Self { addr, metrics, guards, readiness }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!("health/metrics surface listening on {}", self.addr);
        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle(stream).await {
                    warn!("health surface connection error from {}: {}", peer, e);
                }
            });
        }
    }

    async fn handle(&self, mut stream: tokio::net::TcpStream) -> Result<()> {
        let mut buf = [0u8; 1024];
        let n = stream.read(&mut buf).await?;
        let request = String::from_utf8_lossy(&buf[..n]);
        let path = request.lines().next().and_then(|l| l.split_whitespace().nth(1)).unwrap_or("/");

        let (status, body) = match path {
            "/health" => {
                if self.guards.all_closed_or_half_open() {
                    (200, "ok".to_string())
                } else {
                    (503, "circuit open".to_string())
                }
            }
            "/health/live" => (200, "ok".to_string()),
            "/health/ready" => {
                if self.readiness.is_ready() {
                    (200, "ok".to_string())
                } else {
                    (503, "not ready".to_string())
                }
            }
            "/metrics" => (200, self.metrics.prometheus_text(&self.guards)),
            _ => (404, "not found".to_string()),
        };

        let reason = if status == 200 { "OK" } else if status == 503 { "Service Unavailable" } else { "Not Found" };
        let response = format!(
            "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).await?;
        Ok(())
    }
}
