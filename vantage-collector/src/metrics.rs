//! Process-local Prometheus registry plus the `/metrics` and `/graph.dot`
//! operator endpoints.

use std::sync::Arc;

use axum::extract::State as AxumState;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use tracing::info;
use vantage_core::graph::ServiceGraph;

pub struct CollectorMetrics {
    registry: Registry,
    pub traces_received: IntCounter,
    pub traces_graphed: IntCounter,
    pub dropped_no_identity: IntCounter,
    pub dropped_missing_l4: IntCounter,
    pub dropped_ephemere: IntCounter,
    pub identity_misses: IntCounter,
    pub grpc_calls_received: IntCounter,
    pub graph_nodes: IntGauge,
    pub graph_edges: IntGauge,
}

impl CollectorMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let traces_received = IntCounter::new(
            "vantage_collector_traces_received_total",
            "Traces received from agent gateway streams",
        )?;
        let traces_graphed = IntCounter::new(
            "vantage_collector_traces_graphed_total",
            "Traces that produced a graph edge",
        )?;
        let dropped_no_identity = IntCounter::new(
            "vantage_collector_dropped_no_identity_total",
            "Traces dropped for unresolved source or destination identity",
        )?;
        let dropped_missing_l4 = IntCounter::new(
            "vantage_collector_dropped_missing_l4_total",
            "Traces dropped for a missing or zero layer-4 port",
        )?;
        let dropped_ephemere = IntCounter::new(
            "vantage_collector_dropped_ephemere_total",
            "Traces dropped as carrying no identity signal on either side",
        )?;
        let identity_misses = IntCounter::new(
            "vantage_collector_identity_cache_misses_total",
            "Endpoint identity lookups that missed the cache",
        )?;
        let grpc_calls_received = IntCounter::new(
            "vantage_collector_grpc_calls_received_total",
            "get_traces responses received from agent gateways",
        )?;
        let graph_nodes = IntGauge::new("vantage_collector_graph_nodes", "Service graph node count")?;
        let graph_edges = IntGauge::new("vantage_collector_graph_edges", "Service graph edge count")?;

        registry.register(Box::new(traces_received.clone()))?;
        registry.register(Box::new(traces_graphed.clone()))?;
        registry.register(Box::new(dropped_no_identity.clone()))?;
        registry.register(Box::new(dropped_missing_l4.clone()))?;
        registry.register(Box::new(dropped_ephemere.clone()))?;
        registry.register(Box::new(identity_misses.clone()))?;
        registry.register(Box::new(grpc_calls_received.clone()))?;
        registry.register(Box::new(graph_nodes.clone()))?;
        registry.register(Box::new(graph_edges.clone()))?;

        Ok(CollectorMetrics {
            registry,
            traces_received,
            traces_graphed,
            dropped_no_identity,
            dropped_missing_l4,
            dropped_ephemere,
            identity_misses,
            grpc_calls_received,
            graph_nodes,
            graph_edges,
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

struct AppState {
    metrics: Arc<CollectorMetrics>,
    graph: Arc<ServiceGraph>,
}

async fn metrics_handler(AxumState(state): AxumState<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.graph_nodes.set(state.graph.node_count() as i64);
    state.metrics.graph_edges.set(state.graph.edge_count() as i64);
    (StatusCode::OK, state.metrics.render())
}

async fn graph_dot_handler(AxumState(state): AxumState<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, state.graph.to_dot())
}

pub fn router(metrics: Arc<CollectorMetrics>, graph: Arc<ServiceGraph>) -> Router {
    let state = Arc::new(AppState { metrics, graph });
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/graph.dot", get(graph_dot_handler))
        .with_state(state)
}

pub async fn serve(
    metrics: Arc<CollectorMetrics>,
    graph: Arc<ServiceGraph>,
    port: u16,
) -> anyhow::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics endpoint listening");
    axum::serve(listener, router(metrics, graph)).await?;
    Ok(())
}
