//! End-to-end exercise of decode -> ring -> identity resolution -> graph,
//! the path a real agent-to-collector flow takes, driven entirely through
//! `vantage-core`'s public surface.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vantage_core::identity::{FakeWatcher, PodObject, State};
use vantage_core::{decode, process_trace, FlowRing, RingReader, ServiceGraph, TraceOutcome};
use vantage_model::EndpointPort;

fn raw_frame(ifindex: u32, src: [u8; 4], dst: [u8; 4], src_port: u16, dst_port: u16) -> Vec<u8> {
    let mut frame = Vec::new();
    frame.extend_from_slice(&ifindex.to_le_bytes());
    frame.extend_from_slice(&60u16.to_le_bytes());
    frame.extend_from_slice(&[0u8; 12]);
    frame.extend_from_slice(&[0x08, 0x00]);
    frame.extend_from_slice(&[
        0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, src[0], src[1],
        src[2], src[3], dst[0], dst[1], dst[2], dst[3],
    ]);
    let sp = src_port.to_be_bytes();
    let dp = dst_port.to_be_bytes();
    frame.extend_from_slice(&[
        sp[0], sp[1], dp[0], dp[1], 0, 0, 0, 0, 0, 0, 0, 0, 0x50, 0x02, 0x00, 0x00, 0, 0, 0, 0,
    ]);
    frame
}

fn pod(name: &str, ip: &str, ports: Vec<EndpointPort>) -> PodObject {
    PodObject {
        namespace: "default".into(),
        name: name.into(),
        labels: Default::default(),
        ports,
        pod_ip: Some(ip.parse().unwrap()),
    }
}

#[tokio::test]
async fn decoded_trace_resolves_identity_and_graphs_an_edge() {
    let watcher = Arc::new(FakeWatcher::new());
    watcher.seed_pods(vec![
        pod("sauce", "10.0.3.11", vec![]),
        pod(
            "dest",
            "10.0.3.22",
            vec![EndpointPort {
                name: "http".into(),
                port: 8080,
                protocol: "TCP".into(),
            }],
        ),
    ]);
    let state = State::new(16);
    state.run(watcher, CancellationToken::new()).await.unwrap();

    let ring = Arc::new(FlowRing::new(4));
    let raw = raw_frame(3, [10, 0, 3, 11], [10, 0, 3, 22], 39198, 8080);
    let record = decode(&raw, "node-a", "veth0").unwrap();
    ring.write(record);

    let mut reader = RingReader::new(Arc::clone(&ring), 0);
    let replayed = reader.next().expect("ring should yield the written record");

    let graph = ServiceGraph::new();
    let outcome = process_trace(&state, &graph, &replayed);
    assert!(matches!(outcome, TraceOutcome::Graphed { .. }));
    assert!(graph.has_edge("sauce", "dest:8080"));
}

#[test]
fn ring_retains_exactly_capacity_decoded_records_after_wraparound() {
    let ring = FlowRing::new(8);
    for i in 0..20u16 {
        let raw = raw_frame(1, [10, 0, 0, 1], [10, 0, 0, 2], 1000 + i, 80);
        let record = decode(&raw, "node-a", "veth0").unwrap();
        ring.write(record);
    }
    assert_eq!(ring.len(), 8);
    assert!(!ring.read(11).ok);
    assert!(ring.read(12).ok);
}
