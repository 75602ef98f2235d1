//! Glues the kernel ring, decoder, identity cache, and flow ring into the
//! agent's poller task.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vantage_core::error::DecodeError;
use vantage_core::identity::State;
use vantage_core::ifindex::IfindexMap;
use vantage_core::kernel::KernelRing;
use vantage_core::ring::FlowRing;

use crate::metrics::AgentMetrics;

/// Drains the tracer's raw-frame sequence, decodes each frame, best-effort
/// enriches it with locally-known endpoint identity, and publishes it to the
/// flow ring. Runs until the tracer's `read()` returns `None` (closed) or
/// `shutdown` is cancelled.
pub async fn run_poller(
    tracer: Arc<dyn KernelRing>,
    ifindex_map: Arc<IfindexMap>,
    identity: Arc<State>,
    ring: Arc<FlowRing>,
    node_name: String,
    metrics: Arc<AgentMetrics>,
    shutdown: CancellationToken,
) {
    loop {
        let raw = tokio::select! {
            raw = tracer.read() => raw,
            _ = shutdown.cancelled() => break,
        };
        let Some(raw) = raw else {
            debug!("kernel ring closed, poller exiting");
            break;
        };

        let ifindex = match raw.get(0..4) {
            Some(bytes) => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            None => {
                metrics.invalid_frames.inc();
                continue;
            }
        };
        let ifname = ifindex_map.name(ifindex);

        let mut record = match vantage_core::decoder::decode(&raw, &node_name, &ifname) {
            Ok(record) => record,
            Err(DecodeError::InvalidFrame) => {
                metrics.invalid_frames.inc();
                continue;
            }
            Err(DecodeError::NotIp | DecodeError::EmptyAddress) => continue,
            Err(err) => {
                warn!(error = %err, "decode error");
                continue;
            }
        };

        record.source = identity.get_endpoint_by_ip(record.ip.src).ok();
        record.destination = identity.get_endpoint_by_ip(record.ip.dst).ok();
        if record.source.is_none() || record.destination.is_none() {
            metrics.identity_misses.inc();
        }

        if ring.len() == ring.cap() {
            metrics.ring_overwrites.inc();
        }
        ring.write(record);
        metrics.trace_events.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use vantage_core::kernel::FakeKernelRing;

    fn sample_frame(ifindex: u32) -> Vec<u8> {
        // ifindex (LE u32) + skb_len (LE u16) + a minimal ethernet/IPv4/TCP frame.
        let mut frame = Vec::new();
        frame.extend_from_slice(&ifindex.to_le_bytes());
        frame.extend_from_slice(&60u16.to_le_bytes());
        // destination MAC, source MAC, ethertype IPv4
        frame.extend_from_slice(&[0u8; 12]);
        frame.extend_from_slice(&[0x08, 0x00]);
        // minimal IPv4 header (20 bytes), protocol TCP, src 10.0.0.1 dst 10.0.0.2
        frame.extend_from_slice(&[
            0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x40, 0x00, 0x40, 0x06, 0x00, 0x00, 10, 0, 0, 1,
            10, 0, 0, 2,
        ]);
        // minimal TCP header (20 bytes): src 1234 dst 80
        frame.extend_from_slice(&[
            0x04, 0xd2, 0x00, 0x50, 0, 0, 0, 0, 0, 0, 0, 0, 0x50, 0x02, 0x00, 0x00, 0, 0, 0, 0,
        ]);
        frame
    }

    #[tokio::test]
    async fn poller_stops_when_ring_closes() {
        let (ring, tx) = FakeKernelRing::new();
        let tracer: StdArc<dyn KernelRing> = StdArc::new(ring);
        let ifindex_map = StdArc::new(IfindexMap::new());
        ifindex_map.rebuild([(7, "veth0".to_string())]);
        let identity = StdArc::new(State::new(16));
        let flow_ring = StdArc::new(FlowRing::new(4));
        let metrics = StdArc::new(AgentMetrics::new().unwrap());
        let shutdown = CancellationToken::new();

        tx.send(sample_frame(7)).unwrap();
        drop(tx);

        run_poller(
            tracer,
            ifindex_map,
            identity,
            StdArc::clone(&flow_ring),
            "node-a".to_string(),
            metrics.clone(),
            shutdown,
        )
        .await;

        assert_eq!(flow_ring.len(), 1);
        assert_eq!(metrics.trace_events.get(), 1);
    }
}
