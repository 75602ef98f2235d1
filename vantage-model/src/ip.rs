use std::fmt;
use std::net::IpAddr;

/// IP version tag carried alongside the decoded addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IpVersion {
    V4,
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "v4"),
            IpVersion::V6 => write!(f, "v6"),
        }
    }
}

/// `true` if `addr` falls in the ranges the collector treats as belonging to
/// the public internet rather than the cluster's own address space: not
/// loopback, not link-local, and not one of the RFC1918 private ranges.
pub fn is_public(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !v4.is_loopback()
                && !v4.is_link_local()
                && !v4.is_private()
                && !v4.is_unspecified()
                && !v4.is_broadcast()
        }
        IpAddr::V6(v6) => !v6.is_loopback() && !v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_private_ranges() {
        assert!(!is_public("10.0.3.11".parse().unwrap()));
        assert!(!is_public("172.16.0.5".parse().unwrap()));
        assert!(!is_public("192.168.1.1".parse().unwrap()));
        assert!(!is_public("127.0.0.1".parse().unwrap()));
    }

    #[test]
    fn classifies_public_address() {
        assert!(is_public("8.8.8.8".parse().unwrap()));
    }
}
