use std::collections::BTreeMap;

/// A named port an endpoint exposes, e.g. `{name: "http", port: 8080, protocol: "TCP"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointPort {
    pub name: String,
    pub port: u16,
    pub protocol: String,
}

/// Workload-level identity attributed to an IP by the identity cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EndpointIdentity {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<EndpointPort>,
}

impl EndpointIdentity {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// `true` if `port` appears (as `port` or `port==0` sentinel is excluded)
    /// in this endpoint's exposed port list.
    pub fn exposes_port(&self, port: u16) -> bool {
        port != 0 && self.ports.iter().any(|p| p.port == port)
    }
}
