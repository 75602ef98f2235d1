//! Convenience re-export of the types most call sites need.

pub use super::flow::{
    DnsMetadata, FlowRecord, FlowTime, HttpMetadata, IpHeader, L4, L7, TcpFlags, TcpInfo, UdpInfo,
};
pub use super::identity::{EndpointIdentity, EndpointPort};
pub use super::ip::{is_public, IpVersion};
