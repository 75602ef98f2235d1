use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vantage_collector::metrics::CollectorMetrics;
use vantage_collector::spawn_ingest;
use vantage_config::CollectorArgs;
use vantage_core::graph::ServiceGraph;
use vantage_core::identity::{ApiServerWatcher, State, Watcher};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CollectorArgs::parse_with_dotenv();
    vantage_config::init_tracing(&args.tracing_directive());

    info!(target = %args.target, "starting vantage-collector");

    let shutdown = CancellationToken::new();

    // Production control-plane client is a thin, deployment-wired placeholder
    // (see vantage_core::identity::ApiServerWatcher), mirroring the agent's
    // own cache wiring; it has no resource client implemented yet, so every
    // list call misses rather than blocking collector startup on a live
    // cluster.
    let watcher: Arc<dyn Watcher> = Arc::new(ApiServerWatcher::new(
        args.apiserver_address.clone(),
        args.kubeconfig.clone(),
    ));
    let state = Arc::new(State::new(args.cache_buffer_size));
    if let Err(e) = state.run(Arc::clone(&watcher), shutdown.clone()).await {
        warn!(error = %e, "identity cache initial sync failed, continuing with an empty cache");
    }

    let graph = Arc::new(ServiceGraph::new());
    let metrics = Arc::new(CollectorMetrics::new()?);

    let ingest = spawn_ingest(
        args.target.clone(),
        Arc::clone(&state),
        Arc::clone(&graph),
        Arc::clone(&metrics),
    );

    let metrics_task = tokio::spawn(vantage_collector::metrics::serve(
        Arc::clone(&metrics),
        Arc::clone(&graph),
        args.metrics_port,
    ));

    // Reserved operator-facing gRPC listener; no service is registered on it
    // yet (kept for deployment-compatibility parity with the upstream
    // collector, which stands up the same bare listener).
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.listen));
    info!(%addr, "collector gRPC listener bound (no services registered)");
    let grpc_task = tokio::spawn(tonic::transport::Server::builder().serve(addr));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = ingest => {
            if let Err(e) = result {
                error!(error = %e, "ingest task panicked");
            }
        }
        result = metrics_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "metrics server exited"),
                Err(e) => error!(error = %e, "metrics task panicked"),
                Ok(Ok(())) => {}
            }
        }
        result = grpc_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "collector gRPC listener exited"),
                Err(e) => error!(error = %e, "collector gRPC listener task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    shutdown.cancel();
    Ok(())
}
