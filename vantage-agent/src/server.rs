//! The agent's gRPC `Tracer` server: one `get_traces` subscriber per
//! connected collector, each following the flow ring from its own cursor.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::info;
use vantage_core::ring::{FlowRing, RingReader};
use vantage_proto::pb::{GetTracesRequest, GetTracesResponse, ServerStatusRequest, ServerStatusResponse};
use vantage_proto::{Tracer, TracerServer};

use crate::metrics::AgentMetrics;

pub struct TracerService {
    ring: Arc<FlowRing>,
    metrics: Arc<AgentMetrics>,
    shutdown: CancellationToken,
}

impl TracerService {
    pub fn new(ring: Arc<FlowRing>, metrics: Arc<AgentMetrics>, shutdown: CancellationToken) -> Self {
        TracerService {
            ring,
            metrics,
            shutdown,
        }
    }

    pub fn into_server(self) -> TracerServer<Self> {
        TracerServer::new(self)
    }
}

#[tonic::async_trait]
impl Tracer for TracerService {
    type GetTracesStream =
        Pin<Box<dyn Stream<Item = Result<GetTracesResponse, Status>> + Send + 'static>>;

    async fn get_traces(
        &self,
        _request: Request<GetTracesRequest>,
    ) -> Result<Response<Self::GetTracesStream>, Status> {
        self.metrics.grpc_calls_served.inc();
        info!("collector subscribed to get_traces");

        let reader = RingReader::new(Arc::clone(&self.ring), self.ring.tail());
        let stream = reader.next_follow(self.shutdown.clone()).map(|record| {
            Ok(GetTracesResponse {
                trace: Some((&record).into()),
            })
        });
        Ok(Response::new(Box::pin(stream)))
    }

    async fn server_status(
        &self,
        _request: Request<ServerStatusRequest>,
    ) -> Result<Response<ServerStatusResponse>, Status> {
        self.metrics.grpc_calls_served.inc();
        Ok(Response::new(ServerStatusResponse {
            num_flows: self.ring.len() as u64,
            max_flows: self.ring.cap() as u64,
        }))
    }
}
