//! Turns a raw kernel-ring frame into a [`FlowRecord`].
//!
//! The decoder is pure and stateless: it is the only place in the crate that
//! materializes a flow record.

use std::net::IpAddr;

use etherparse::{IpHeader, PacketHeaders, TransportHeader};
use vantage_model::{
    DnsMetadata, FlowRecord, FlowTime, HttpMetadata, IpHeader as FlowIpHeader, IpVersion,
    TcpFlags, TcpInfo, UdpInfo, L4, L7,
};

use crate::error::DecodeError;

/// Interface index and original length prefixed by the kernel before the
/// ethernet frame: `[u32 ifindex LE][u16 skb_len LE][ethernet frame...]`.
const PREFIX_LEN: usize = 6;

/// Decode one raw frame read off the kernel ring.
///
/// `ifname` resolves the interface index embedded in the frame's prefix;
/// the caller is expected to look it up via the adapter's `ifindex -> name`
/// map and hand in the resolved name (or a stringified index as fallback).
pub fn decode(raw: &[u8], node_name: &str, ifname: &str) -> Result<FlowRecord, DecodeError> {
    if raw.len() < PREFIX_LEN {
        return Err(DecodeError::InvalidFrame);
    }
    let skb_len = u16::from_le_bytes([raw[4], raw[5]]);
    let ethernet = &raw[PREFIX_LEN..];

    let headers = PacketHeaders::from_ethernet_slice(ethernet).map_err(|_| DecodeError::NotIp)?;

    let ip_header = headers.ip.ok_or(DecodeError::NotIp)?;
    let ipv4 = match ip_header {
        IpHeader::Version4(hdr, _) => hdr,
        IpHeader::Version6(_, _) => return Err(DecodeError::NotIp),
    };
    if ipv4.source == [0, 0, 0, 0] || ipv4.destination == [0, 0, 0, 0] {
        return Err(DecodeError::EmptyAddress);
    }
    let src = IpAddr::from(ipv4.source);
    let dst = IpAddr::from(ipv4.destination);

    let mut l4 = None;
    let mut l7 = None;

    match headers.transport {
        Some(TransportHeader::Tcp(tcp)) => {
            l4 = Some(L4::Tcp(TcpInfo {
                src_port: tcp.source_port,
                dst_port: tcp.destination_port,
                flags: TcpFlags {
                    syn: tcp.syn,
                    ack: tcp.ack,
                    psh: tcp.psh,
                    fin: tcp.fin,
                    rst: tcp.rst,
                    cwr: tcp.cwr,
                    ece: tcp.ece,
                    ns: tcp.ns,
                    urg: tcp.urg,
                },
            }));
            if !headers.payload.is_empty() {
                l7 = parse_http(headers.payload).ok().map(L7::Http);
            }
        }
        Some(TransportHeader::Udp(udp)) => {
            l4 = Some(L4::Udp(UdpInfo {
                src_port: udp.source_port,
                dst_port: udp.destination_port,
            }));
            if !headers.payload.is_empty() {
                l7 = parse_dns(headers.payload).map(L7::Dns);
            }
        }
        _ => {}
    }

    Ok(FlowRecord {
        time: FlowTime::now(),
        iface: ifname.to_string(),
        skb_len,
        node_name: node_name.to_string(),
        ip: FlowIpHeader {
            src,
            dst,
            version: IpVersion::V4,
        },
        l4,
        l7,
        source: None,
        destination: None,
    })
}

/// Read the first logical text line (CR/LF terminated, or end of payload)
/// and parse either an HTTP request line or a response status line.
fn parse_http(payload: &[u8]) -> Result<HttpMetadata, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(|_| DecodeError::InvalidUtf8)?;
    let line = text
        .lines()
        .next()
        .ok_or_else(|| DecodeError::UnsupportedHttp(String::new()))?;
    let tokens: Vec<&str> = line.splitn(3, ' ').collect();
    if tokens.len() != 3 {
        return Err(DecodeError::UnsupportedHttp(line.to_string()));
    }

    if tokens[0] == "HTTP/1.1" {
        let code = tokens[1].parse().unwrap_or(0);
        Ok(HttpMetadata {
            method: String::new(),
            url: String::new(),
            protocol: "HTTP/1.1".to_string(),
            code,
        })
    } else if tokens[2] == "HTTP/1.1" {
        Ok(HttpMetadata {
            method: tokens[0].to_string(),
            url: tokens[1].to_string(),
            protocol: "HTTP/1.1".to_string(),
            code: 0,
        })
    } else {
        Err(DecodeError::UnsupportedHttp(line.to_string()))
    }
}

/// Best-effort DNS flag extraction: the opcode nibble and the QR bit from
/// byte 2 of the DNS header (after the 2-byte transaction id). No
/// question/answer parsing in this revision.
fn parse_dns(payload: &[u8]) -> Option<DnsMetadata> {
    let flags_byte = *payload.get(2)?;
    let qr = flags_byte & 0b1000_0000 != 0;
    let opcode = (flags_byte >> 3) & 0b0000_1111;
    Some(DnsMetadata {
        opcode: opcode.to_string(),
        qr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_frames_shorter_than_the_prefix() {
        let raw = [0u8; 4];
        assert_eq!(decode(&raw, "node-a", "veth0"), Err(DecodeError::InvalidFrame));
    }

    #[test]
    fn http_response_status_line_parses() {
        let got = parse_http(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(got.code, 200);
        assert_eq!(got.method, "");
        assert_eq!(got.url, "");
        assert_eq!(got.protocol, "HTTP/1.1");
    }

    #[test]
    fn http_request_line_parses() {
        let got = parse_http(b"GET /healthz HTTP/1.1\r\n").unwrap();
        assert_eq!(got.method, "GET");
        assert_eq!(got.url, "/healthz");
        assert_eq!(got.code, 0);
    }

    #[test]
    fn unsupported_start_line_is_rejected() {
        let err = parse_http(b"not an http line at all\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedHttp(_)));
    }
}
