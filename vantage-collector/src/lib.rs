//! Library surface behind the `vantage-collector` binary.

pub mod gateway;
pub mod metrics;

use std::sync::Arc;

use tracing::debug;
use vantage_core::collector::{process_trace, DropReason, TraceOutcome};
use vantage_core::graph::ServiceGraph;
use vantage_core::identity::State;
use vantage_model::FlowRecord;

use crate::metrics::CollectorMetrics;

/// Runs one received trace through identity resolution, direction
/// inference, and the graph update, recording the outcome in `metrics`.
pub fn handle_trace(
    state: &State,
    graph: &ServiceGraph,
    metrics: &CollectorMetrics,
    record: FlowRecord,
) {
    metrics.traces_received.inc();
    match process_trace(state, graph, &record) {
        TraceOutcome::Graphed { src_id, dst_id } => {
            metrics.traces_graphed.inc();
            debug!(src = %src_id, dst = %dst_id, "graphed trace");
        }
        TraceOutcome::Dropped(DropReason::NoIdentity) => {
            metrics.dropped_no_identity.inc();
            metrics.identity_misses.inc();
        }
        TraceOutcome::Dropped(DropReason::MissingL4) => {
            metrics.dropped_missing_l4.inc();
        }
        TraceOutcome::Dropped(DropReason::Ephemere) => {
            metrics.dropped_ephemere.inc();
        }
    }
}

/// Wires a gateway subscription's incoming traces into `handle_trace`.
pub fn spawn_ingest(
    target: String,
    state: Arc<State>,
    graph: Arc<ServiceGraph>,
    metrics: Arc<CollectorMetrics>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        gateway::run(target, move |record| {
            metrics.grpc_calls_received.inc();
            handle_trace(&state, &graph, &metrics, record);
        })
        .await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use vantage_core::identity::object::PodObject;
    use vantage_core::identity::watch::FakeWatcher;
    use vantage_model::{FlowTime, IpHeader, IpVersion, L4, TcpFlags, TcpInfo};
    use std::collections::BTreeMap;

    fn pod(name: &str, ip: &str, ports: Vec<vantage_model::EndpointPort>) -> PodObject {
        PodObject {
            namespace: "default".into(),
            name: name.into(),
            labels: BTreeMap::from([("app".to_string(), name.to_string())]),
            ports,
            pod_ip: Some(ip.parse::<IpAddr>().unwrap()),
        }
    }

    fn tcp_record(src: &str, src_port: u16, dst: &str, dst_port: u16) -> FlowRecord {
        FlowRecord {
            time: FlowTime { secs: 1, nanos: 0 },
            iface: "veth0".into(),
            skb_len: 60,
            node_name: "node-a".into(),
            ip: IpHeader {
                src: src.parse().unwrap(),
                dst: dst.parse().unwrap(),
                version: IpVersion::V4,
            },
            l4: Some(L4::Tcp(TcpInfo {
                src_port,
                dst_port,
                flags: TcpFlags::default(),
            })),
            l7: None,
            source: None,
            destination: None,
        }
    }

    #[tokio::test]
    async fn graphed_trace_increments_counters_and_adds_edge() {
        let watcher = Arc::new(FakeWatcher::new());
        watcher.seed_pods(vec![
            pod("sauce", "10.0.3.11", vec![]),
            pod(
                "dest",
                "10.0.3.22",
                vec![vantage_model::EndpointPort {
                    name: "http".into(),
                    port: 8080,
                    protocol: "TCP".into(),
                }],
            ),
        ]);
        let state = State::new(16);
        state.run(watcher, CancellationToken::new()).await.unwrap();
        let graph = ServiceGraph::new();
        let metrics = CollectorMetrics::new().unwrap();

        handle_trace(
            &state,
            &graph,
            &metrics,
            tcp_record("10.0.3.11", 39198, "10.0.3.22", 8080),
        );

        assert_eq!(metrics.traces_graphed.get(), 1);
        assert!(graph.has_edge("sauce", "dest:8080"));
    }
}
