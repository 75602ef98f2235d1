use std::collections::BTreeMap;
use std::net::IpAddr;

use vantage_model::EndpointPort;

/// Shared shape every control-plane object resolves to before being turned
/// into an [`vantage_model::EndpointIdentity`].
pub trait ControlObject: Clone + Send + Sync + 'static {
    /// `namespace/name`, the primary index key.
    fn key(&self) -> String;
    /// Every IP currently associated with this object.
    fn ips(&self) -> Vec<IpAddr>;
    fn name(&self) -> &str;
    fn namespace(&self) -> &str;
    fn labels(&self) -> &BTreeMap<String, String>;
    fn ports(&self) -> &[EndpointPort];
}

macro_rules! impl_control_object {
    ($ty:ident, $ips_fn:expr) => {
        impl ControlObject for $ty {
            fn key(&self) -> String {
                format!("{}/{}", self.namespace, self.name)
            }
            fn ips(&self) -> Vec<IpAddr> {
                ($ips_fn)(self)
            }
            fn name(&self) -> &str {
                &self.name
            }
            fn namespace(&self) -> &str {
                &self.namespace
            }
            fn labels(&self) -> &BTreeMap<String, String> {
                &self.labels
            }
            fn ports(&self) -> &[EndpointPort] {
                &self.ports
            }
        }
    };
}

/// A Kubernetes Pod, indexed by `status.pod_ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodObject {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<EndpointPort>,
    pub pod_ip: Option<IpAddr>,
}
impl_control_object!(PodObject, |o: &PodObject| o.pod_ip.into_iter().collect());

/// A Kubernetes Service, indexed by `spec.cluster_ip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceObject {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<EndpointPort>,
    pub cluster_ip: Option<IpAddr>,
}
impl_control_object!(ServiceObject, |o: &ServiceObject| o
    .cluster_ip
    .into_iter()
    .collect());

/// Kubernetes Endpoints, indexed by every subset address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointsObject {
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<EndpointPort>,
    pub addresses: Vec<IpAddr>,
}
impl_control_object!(EndpointsObject, |o: &EndpointsObject| o.addresses.clone());

/// A cluster Node, indexed by every status address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub addresses: Vec<IpAddr>,
}
impl ControlObject for NodeObject {
    fn key(&self) -> String {
        self.name.clone()
    }
    fn ips(&self) -> Vec<IpAddr> {
        self.addresses.clone()
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn namespace(&self) -> &str {
        ""
    }
    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
    fn ports(&self) -> &[EndpointPort] {
        &[]
    }
}
