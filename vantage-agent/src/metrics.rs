//! Process-local Prometheus registry exposed over `GET /metrics`.

use std::sync::Arc;

use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tracing::info;

pub struct AgentMetrics {
    registry: Registry,
    pub trace_events: IntCounter,
    pub invalid_frames: IntCounter,
    pub ring_overwrites: IntCounter,
    pub identity_misses: IntCounter,
    pub grpc_calls_served: IntCounter,
}

impl AgentMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let trace_events =
            IntCounter::new("vantage_agent_trace_events_total", "Flow records decoded and ringed")?;
        let invalid_frames = IntCounter::new(
            "vantage_agent_invalid_frames_total",
            "Raw frames discarded for a too-short metadata prefix",
        )?;
        let ring_overwrites = IntCounter::new(
            "vantage_agent_ring_overwrites_total",
            "Flow ring slots overwritten before being read",
        )?;
        let identity_misses = IntCounter::new(
            "vantage_agent_identity_cache_misses_total",
            "Flow records where source or destination identity could not be resolved locally",
        )?;
        let grpc_calls_served = IntCounter::new(
            "vantage_agent_grpc_calls_served_total",
            "Tracer gRPC calls served",
        )?;

        registry.register(Box::new(trace_events.clone()))?;
        registry.register(Box::new(invalid_frames.clone()))?;
        registry.register(Box::new(ring_overwrites.clone()))?;
        registry.register(Box::new(identity_misses.clone()))?;
        registry.register(Box::new(grpc_calls_served.clone()))?;

        Ok(AgentMetrics {
            registry,
            trace_events,
            invalid_frames,
            ring_overwrites,
            identity_misses,
            grpc_calls_served,
        })
    }

    fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

async fn metrics_handler(AxumState(metrics): AxumState<Arc<AgentMetrics>>) -> impl IntoResponse {
    (StatusCode::OK, metrics.render())
}

pub fn router(metrics: Arc<AgentMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics)
}

pub async fn serve(metrics: Arc<AgentMetrics>, port: u16) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics endpoint listening");
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}
