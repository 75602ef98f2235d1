use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vantage_agent::metrics::{self, AgentMetrics};
use vantage_agent::{pipeline, server::TracerService};
#[cfg(feature = "kernel")]
use vantage_agent::tracer::LiveKernelRing;
use vantage_config::AgentArgs;
use vantage_core::identity::{ApiServerWatcher, State, Watcher};
use vantage_core::ifindex::IfindexMap;
use vantage_core::kernel::KernelRing;
use vantage_core::ring::FlowRing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = AgentArgs::parse_with_dotenv();
    vantage_config::init_tracing(&args.tracing_directive());

    info!(node = %args.k8s_node, iface = %args.iface, "starting vantage-agent");

    let shutdown = CancellationToken::new();
    let ifindex_map = Arc::new(IfindexMap::new());

    #[cfg(feature = "kernel")]
    let tracer: Arc<dyn KernelRing> =
        Arc::new(LiveKernelRing::new(Arc::clone(&ifindex_map), args.perf_poll_interval));
    #[cfg(not(feature = "kernel"))]
    let tracer: Arc<dyn KernelRing> = Arc::new(vantage_core::kernel::FakeKernelRing::new().0);

    tracer.open(&args.iface).await?;

    // Production control-plane client is a thin, deployment-wired placeholder
    // (see vantage_core::identity::ApiServerWatcher); it has no resource
    // client implemented yet, so every list call misses and the pipeline
    // degrades to unresolved source/destination identity rather than
    // failing to start.
    let watcher: Arc<dyn Watcher> = Arc::new(ApiServerWatcher::new(
        args.apiserver_address.clone(),
        args.kubeconfig.clone(),
    ));
    let identity = Arc::new(State::new(args.cache_buffer_size));
    if let Err(e) = identity.run(Arc::clone(&watcher), shutdown.clone()).await {
        warn!(error = %e, "identity cache initial sync failed, continuing with an empty cache");
    }

    {
        let identity = Arc::clone(&identity);
        let watcher = Arc::clone(&watcher);
        let shutdown = shutdown.clone();
        let sync_interval = args.sync_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sync_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = identity.resync(&watcher).await {
                            warn!(error = %e, "periodic identity resync failed");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        });
    }

    let ring = Arc::new(FlowRing::new(args.ring_capacity));
    let metrics = Arc::new(AgentMetrics::new()?);

    let poller = tokio::spawn(pipeline::run_poller(
        Arc::clone(&tracer),
        Arc::clone(&ifindex_map),
        Arc::clone(&identity),
        Arc::clone(&ring),
        args.k8s_node.clone(),
        Arc::clone(&metrics),
        shutdown.clone(),
    ));

    let metrics_task = tokio::spawn(metrics::serve(Arc::clone(&metrics), args.metrics_port));

    let grpc_service = TracerService::new(Arc::clone(&ring), Arc::clone(&metrics), shutdown.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], args.listen_port));
    info!(%addr, "tracer gRPC server listening");
    let grpc_task = tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(grpc_service.into_server())
            .serve(addr),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = poller => {
            if let Err(e) = result {
                error!(error = %e, "poller task panicked");
            }
        }
        result = grpc_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "gRPC server exited"),
                Err(e) => error!(error = %e, "gRPC server task panicked"),
                Ok(Ok(())) => {}
            }
        }
        result = metrics_task => {
            match result {
                Ok(Err(e)) => error!(error = %e, "metrics server exited"),
                Err(e) => error!(error = %e, "metrics task panicked"),
                Ok(Ok(())) => {}
            }
        }
    }

    shutdown.cancel();
    tracer.close().await?;
    Ok(())
}
