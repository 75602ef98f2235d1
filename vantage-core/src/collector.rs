//! Collector-side identity resolution, direction inference, and graph
//! update — the state machine a received trace runs through:
//! `received -> (enriched | dropped:no-identity) -> (directed |
//! dropped:missing-l4 | dropped:ephemere) -> graph-updated`.

use std::net::IpAddr;

use tracing::debug;
use vantage_model::{is_public, EndpointIdentity, FlowRecord};

use crate::graph::ServiceGraph;
use crate::identity::State;

const EPHEMERAL_THRESHOLD: u16 = 32768;

fn is_ephemeral(port: u16) -> bool {
    port > EPHEMERAL_THRESHOLD
}

/// Why a trace never reached the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NoIdentity,
    MissingL4,
    Ephemere,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    Dropped(DropReason),
    Graphed { src_id: String, dst_id: String },
}

/// `ip`'s endpoint identity: a synthetic `www` identity for public
/// addresses (the collector never expects these to show up in the
/// control-plane caches), the aggregate cache resolution otherwise.
fn resolve_side(state: &State, ip: IpAddr) -> Option<EndpointIdentity> {
    if is_public(ip) {
        return Some(EndpointIdentity {
            name: "www".to_string(),
            ..Default::default()
        });
    }
    state.get_endpoint_by_ip(ip).ok()
}

/// `name:port` when the port means something for this endpoint — it's
/// non-ephemeral, or it's ephemeral but still shows up in the endpoint's
/// own known ports — otherwise just `name`. Public (`www`) addresses never
/// get a port suffix.
fn service_id(ip: IpAddr, identity: &EndpointIdentity, port: u16) -> String {
    if is_public(ip) {
        return identity.name.clone();
    }
    let name = identity
        .label("app")
        .or_else(|| identity.label("k8s-app"))
        .unwrap_or(identity.name.as_str());
    let include_port = port != 0 && (!is_ephemeral(port) || identity.exposes_port(port));
    if include_port {
        format!("{name}:{port}")
    } else {
        name.to_string()
    }
}

/// Run one received trace through resolution, direction inference, and
/// graph update.
pub fn process_trace(state: &State, graph: &ServiceGraph, record: &FlowRecord) -> TraceOutcome {
    let Some(src_identity) = resolve_side(state, record.ip.src) else {
        debug!(ip = %record.ip.src, "dropping trace: no identity for source");
        return TraceOutcome::Dropped(DropReason::NoIdentity);
    };
    let Some(dst_identity) = resolve_side(state, record.ip.dst) else {
        debug!(ip = %record.ip.dst, "dropping trace: no identity for destination");
        return TraceOutcome::Dropped(DropReason::NoIdentity);
    };

    let Some((src_port, dst_port)) = record.l4_ports() else {
        debug!("dropping trace: no l4 header");
        return TraceOutcome::Dropped(DropReason::MissingL4);
    };
    if src_port == 0 || dst_port == 0 {
        debug!("dropping trace: zero l4 port");
        return TraceOutcome::Dropped(DropReason::MissingL4);
    }

    let src_matches = src_identity.exposes_port(src_port);
    let dst_matches = dst_identity.exposes_port(dst_port);

    if is_ephemeral(src_port) && is_ephemeral(dst_port) && !src_matches && !dst_matches {
        debug!("dropping trace: both ports ephemeral with no identity signal");
        return TraceOutcome::Dropped(DropReason::Ephemere);
    }

    let swap = is_ephemeral(dst_port) && !dst_matches;
    let (src_ip, src_identity, src_port, dst_ip, dst_identity, dst_port) = if swap {
        (
            record.ip.dst,
            dst_identity,
            dst_port,
            record.ip.src,
            src_identity,
            src_port,
        )
    } else {
        (
            record.ip.src,
            src_identity,
            src_port,
            record.ip.dst,
            dst_identity,
            dst_port,
        )
    };

    let src_id = service_id(src_ip, &src_identity, src_port);
    let dst_id = service_id(dst_ip, &dst_identity, dst_port);
    graph.ensure_edge(&src_id, &dst_id);

    TraceOutcome::Graphed { src_id, dst_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::FakeWatcher;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use vantage_model::{EndpointPort, FlowTime, IpHeader, IpVersion, TcpFlags, TcpInfo, L4};

    fn endpoint(name: &str, app: &str, ports: Vec<(&str, u16)>) -> EndpointIdentity {
        EndpointIdentity {
            name: name.to_string(),
            namespace: "default".to_string(),
            labels: BTreeMap::from([("app".to_string(), app.to_string())]),
            ports: ports
                .into_iter()
                .map(|(n, p)| EndpointPort {
                    name: n.to_string(),
                    port: p,
                    protocol: "TCP".to_string(),
                })
                .collect(),
        }
    }

    async fn seeded_state(
        pairs: &[(&str, &str, Vec<(&str, u16)>, &str)],
    ) -> State {
        let state = State::new(64);
        let watcher = Arc::new(FakeWatcher::new());
        let pods = pairs
            .iter()
            .map(|(name, app, ports, ip)| crate::identity::PodObject {
                namespace: "default".into(),
                name: name.to_string(),
                labels: endpoint(name, app, ports.clone()).labels,
                ports: endpoint(name, app, ports.clone()).ports,
                pod_ip: Some(ip.parse().unwrap()),
            })
            .collect();
        watcher.seed_pods(pods);
        state.run(watcher, CancellationToken::new()).await.unwrap();
        state
    }

    fn tcp_record(src_ip: &str, src_port: u16, dst_ip: &str, dst_port: u16) -> FlowRecord {
        FlowRecord {
            time: FlowTime::now(),
            iface: "veth0".into(),
            skb_len: 0,
            node_name: "node-a".into(),
            ip: IpHeader {
                src: src_ip.parse().unwrap(),
                dst: dst_ip.parse().unwrap(),
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
    async fn request_response_direction_is_stable_either_way() {
        let state = seeded_state(&[
            ("sauce", "sauce-app", vec![("http", 3000)], "10.0.3.11"),
            ("dest", "dest-app", vec![("http", 8080)], "10.0.3.22"),
        ])
        .await;
        let graph = ServiceGraph::new();

        let forward = tcp_record("10.0.3.11", 39198, "10.0.3.22", 8080);
        let out = process_trace(&state, &graph, &forward);
        assert_eq!(
            out,
            TraceOutcome::Graphed {
                src_id: "sauce-app".into(),
                dst_id: "dest-app:8080".into()
            }
        );

        let reverse = tcp_record("10.0.3.22", 8080, "10.0.3.11", 39198);
        let out = process_trace(&state, &graph, &reverse);
        assert_eq!(
            out,
            TraceOutcome::Graphed {
                src_id: "sauce-app".into(),
                dst_id: "dest-app:8080".into()
            }
        );
        assert_eq!(graph.edge_count(), 1);
    }

    #[tokio::test]
    async fn both_ephemeral_with_one_match_suffixes_the_matching_side() {
        let state = seeded_state(&[
            ("dest", "dest-app", vec![], "10.0.3.22"),
            ("sauce", "sauce-app", vec![("x", 33333)], "10.0.3.11"),
        ])
        .await;
        let graph = ServiceGraph::new();

        let out = process_trace(&state, &graph, &tcp_record("10.0.3.22", 33333, "10.0.3.11", 33333));
        assert_eq!(
            out,
            TraceOutcome::Graphed {
                src_id: "dest-app".into(),
                dst_id: "sauce-app:33333".into(),
            }
        );
    }

    #[tokio::test]
    async fn missing_l4_port_is_dropped() {
        let state = seeded_state(&[]).await;
        let graph = ServiceGraph::new();
        let out = process_trace(&state, &graph, &tcp_record("10.0.3.11", 0, "10.0.3.22", 8080));
        assert_eq!(out, TraceOutcome::Dropped(DropReason::MissingL4));
        assert_eq!(graph.edge_count(), 0);
    }

    #[tokio::test]
    async fn public_address_resolves_to_www() {
        let state = seeded_state(&[("api", "api", vec![("https", 443)], "10.0.1.1")]).await;
        let graph = ServiceGraph::new();
        let out = process_trace(&state, &graph, &tcp_record("8.8.8.8", 54321, "10.0.1.1", 443));
        assert_eq!(
            out,
            TraceOutcome::Graphed {
                src_id: "www".into(),
                dst_id: "api:443".into(),
            }
        );
    }

    #[tokio::test]
    async fn cache_miss_on_either_side_drops_the_trace() {
        let state = seeded_state(&[("dest", "dest-app", vec![], "10.0.3.22")]).await;
        let graph = ServiceGraph::new();
        let out = process_trace(&state, &graph, &tcp_record("10.0.3.99", 39198, "10.0.3.22", 8080));
        assert_eq!(out, TraceOutcome::Dropped(DropReason::NoIdentity));
        assert_eq!(graph.edge_count(), 0);
    }
}
