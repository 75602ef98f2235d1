use std::net::IpAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::identity::EndpointIdentity;
use crate::ip::IpVersion;

/// Wall-clock instant as full seconds and nanoseconds since the Unix epoch.
///
/// Never a truncated "seconds of the current minute" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowTime {
    pub secs: u64,
    pub nanos: u32,
}

impl FlowTime {
    pub fn now() -> Self {
        Self::from_duration(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or(Duration::ZERO),
        )
    }

    pub fn from_duration(d: Duration) -> Self {
        FlowTime {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }
}

/// The nine TCP control bits, decoded verbatim from the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub psh: bool,
    pub fin: bool,
    pub rst: bool,
    pub cwr: bool,
    pub ece: bool,
    pub ns: bool,
    pub urg: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TcpInfo {
    pub src_port: u16,
    pub dst_port: u16,
    pub flags: TcpFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UdpInfo {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Layer-4 header, when one was present and understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum L4 {
    Tcp(TcpInfo),
    Udp(UdpInfo),
}

impl L4 {
    /// `(src_port, dst_port)` regardless of which transport carried them.
    pub fn ports(&self) -> (u16, u16) {
        match self {
            L4::Tcp(t) => (t.src_port, t.dst_port),
            L4::Udp(u) => (u.src_port, u.dst_port),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HttpMetadata {
    pub method: String,
    pub url: String,
    pub protocol: String,
    pub code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DnsMetadata {
    pub opcode: String,
    pub qr: bool,
}

/// Best-effort application-layer metadata.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum L7 {
    Http(HttpMetadata),
    Dns(DnsMetadata),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IpHeader {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub version: IpVersion,
}

/// One observed network interaction with decoded headers, the unit that
/// flows through the ring, the wire, and the collector's enrichment stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowRecord {
    pub time: FlowTime,
    pub iface: String,
    pub skb_len: u16,
    pub node_name: String,
    pub ip: IpHeader,
    pub l4: Option<L4>,
    pub l7: Option<L7>,
    pub source: Option<EndpointIdentity>,
    pub destination: Option<EndpointIdentity>,
}

impl FlowRecord {
    /// `(src_port, dst_port)` from whichever of TCP/UDP is present.
    pub fn l4_ports(&self) -> Option<(u16, u16)> {
        self.l4.as_ref().map(L4::ports)
    }
}
