//! Generated `Tracer` gRPC bindings plus the conversions between the wire
//! message and [`vantage_model`]'s in-process flow record.
#![allow(missing_docs)]

use std::net::IpAddr;
use std::str::FromStr;

use vantage_model::{
    DnsMetadata, EndpointIdentity, EndpointPort as ModelEndpointPort, FlowRecord, FlowTime,
    HttpMetadata, IpHeader, IpVersion, TcpFlags as ModelTcpFlags, TcpInfo, UdpInfo, L4, L7,
};

/// Generated protobuf/gRPC types, kept in their own module so names like
/// `FlowTime` and `IpHeader` don't collide with [`vantage_model`]'s types.
pub mod pb {
    tonic::include_proto!("vantage.tracer.v1");
}

pub use pb::tracer_client::TracerClient;
pub use pb::tracer_server::{Tracer, TracerServer};
pub use pb::{GetTracesRequest, GetTracesResponse, ServerStatusRequest, ServerStatusResponse};

/// Failure converting between the wire `Trace` message and [`FlowRecord`].
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("trace is missing its ip header")]
    MissingIp,
    #[error("invalid ip address: {0}")]
    InvalidAddr(String),
}

impl From<&FlowRecord> for pb::Trace {
    fn from(rec: &FlowRecord) -> Self {
        let l4 = match &rec.l4 {
            Some(L4::Tcp(t)) => Some(pb::trace::L4::Tcp(pb::Tcp {
                src_port: t.src_port as u32,
                dst_port: t.dst_port as u32,
                flags: Some(pb::TcpFlags {
                    syn: t.flags.syn,
                    ack: t.flags.ack,
                    psh: t.flags.psh,
                    fin: t.flags.fin,
                    rst: t.flags.rst,
                    cwr: t.flags.cwr,
                    ece: t.flags.ece,
                    ns: t.flags.ns,
                    urg: t.flags.urg,
                }),
            })),
            Some(L4::Udp(u)) => Some(pb::trace::L4::Udp(pb::Udp {
                src_port: u.src_port as u32,
                dst_port: u.dst_port as u32,
            })),
            None => None,
        };
        let l7 = match &rec.l7 {
            Some(L7::Http(h)) => Some(pb::trace::L7::Http(pb::Http {
                method: h.method.clone(),
                url: h.url.clone(),
                protocol: h.protocol.clone(),
                code: h.code as u32,
            })),
            Some(L7::Dns(d)) => Some(pb::trace::L7::Dns(pb::Dns {
                opcode: d.opcode.clone(),
                qr: d.qr,
            })),
            None => None,
        };

        pb::Trace {
            time: Some(pb::FlowTime {
                secs: rec.time.secs,
                nanos: rec.time.nanos,
            }),
            node_name: rec.node_name.clone(),
            iface: rec.iface.clone(),
            skb_len: rec.skb_len as u32,
            ip: Some(pb::IpHeader {
                src: rec.ip.src.to_string(),
                dst: rec.ip.dst.to_string(),
                version: match rec.ip.version {
                    IpVersion::V4 => pb::IpVersion::V4,
                    IpVersion::V6 => pb::IpVersion::V6,
                } as i32,
            }),
            l4,
            l7,
            source: rec.source.as_ref().map(endpoint_to_msg),
            destination: rec.destination.as_ref().map(endpoint_to_msg),
        }
    }
}

fn endpoint_to_msg(ep: &EndpointIdentity) -> pb::Endpoint {
    pb::Endpoint {
        name: ep.name.clone(),
        namespace: ep.namespace.clone(),
        labels: ep.labels.clone().into_iter().collect(),
        ports: ep
            .ports
            .iter()
            .map(|p| pb::EndpointPort {
                name: p.name.clone(),
                port: p.port as u32,
                protocol: p.protocol.clone(),
            })
            .collect(),
    }
}

fn endpoint_from_msg(msg: pb::Endpoint) -> EndpointIdentity {
    EndpointIdentity {
        name: msg.name,
        namespace: msg.namespace,
        labels: msg.labels.into_iter().collect(),
        ports: msg
            .ports
            .into_iter()
            .map(|p| ModelEndpointPort {
                name: p.name,
                port: p.port as u16,
                protocol: p.protocol,
            })
            .collect(),
    }
}

impl TryFrom<pb::Trace> for FlowRecord {
    type Error = ConversionError;

    fn try_from(msg: pb::Trace) -> Result<Self, Self::Error> {
        let ip_msg = msg.ip.ok_or(ConversionError::MissingIp)?;
        let src = IpAddr::from_str(&ip_msg.src)
            .map_err(|_| ConversionError::InvalidAddr(ip_msg.src.clone()))?;
        let dst = IpAddr::from_str(&ip_msg.dst)
            .map_err(|_| ConversionError::InvalidAddr(ip_msg.dst.clone()))?;
        let version = if ip_msg.version == pb::IpVersion::V6 as i32 {
            IpVersion::V6
        } else {
            IpVersion::V4
        };

        let l4 = match msg.l4 {
            Some(pb::trace::L4::Tcp(t)) => Some(L4::Tcp(TcpInfo {
                src_port: t.src_port as u16,
                dst_port: t.dst_port as u16,
                flags: t
                    .flags
                    .map(|f| ModelTcpFlags {
                        syn: f.syn,
                        ack: f.ack,
                        psh: f.psh,
                        fin: f.fin,
                        rst: f.rst,
                        cwr: f.cwr,
                        ece: f.ece,
                        ns: f.ns,
                        urg: f.urg,
                    })
                    .unwrap_or_default(),
            })),
            Some(pb::trace::L4::Udp(u)) => Some(L4::Udp(UdpInfo {
                src_port: u.src_port as u16,
                dst_port: u.dst_port as u16,
            })),
            None => None,
        };

        let l7 = match msg.l7 {
            Some(pb::trace::L7::Http(h)) => Some(L7::Http(HttpMetadata {
                method: h.method,
                url: h.url,
                protocol: h.protocol,
                code: h.code as u16,
            })),
            Some(pb::trace::L7::Dns(d)) => Some(L7::Dns(DnsMetadata {
                opcode: d.opcode,
                qr: d.qr,
            })),
            None => None,
        };

        Ok(FlowRecord {
            time: msg
                .time
                .map(|t| FlowTime {
                    secs: t.secs,
                    nanos: t.nanos,
                })
                .unwrap_or(FlowTime { secs: 0, nanos: 0 }),
            iface: msg.iface,
            skb_len: msg.skb_len as u16,
            node_name: msg.node_name,
            ip: IpHeader { src, dst, version },
            l4,
            l7,
            source: msg.source.map(endpoint_from_msg),
            destination: msg.destination.map(endpoint_from_msg),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn sample() -> FlowRecord {
        FlowRecord {
            time: FlowTime { secs: 42, nanos: 7 },
            iface: "veth0".into(),
            skb_len: 128,
            node_name: "node-a".into(),
            ip: IpHeader {
                src: "10.0.3.11".parse().unwrap(),
                dst: "10.0.3.22".parse().unwrap(),
                version: IpVersion::V4,
            },
            l4: Some(L4::Tcp(TcpInfo {
                src_port: 39198,
                dst_port: 8080,
                flags: ModelTcpFlags {
                    syn: true,
                    ack: false,
                    psh: false,
                    fin: false,
                    rst: false,
                    cwr: false,
                    ece: false,
                    ns: false,
                    urg: false,
                },
            })),
            l7: None,
            source: Some(EndpointIdentity {
                name: "sauce".into(),
                namespace: "default".into(),
                labels: BTreeMap::from([("app".into(), "sauce-app".into())]),
                ports: vec![],
            }),
            destination: None,
        }
    }

    #[test]
    fn round_trips_through_the_wire_message() {
        let original = sample();
        let msg = pb::Trace::from(&original);
        let decoded = FlowRecord::try_from(msg).unwrap();
        assert_eq!(original, decoded);
    }
}
