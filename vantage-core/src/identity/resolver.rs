//! Aggregate resolver composing the four identity caches into a single
//! `ip -> endpoint identity` lookup.

use std::net::IpAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;
use vantage_model::EndpointIdentity;

use super::cache::IdentityCache;
use super::object::{ControlObject, EndpointsObject, NodeObject, PodObject, ServiceObject};
use super::watch::Watcher;
use crate::error::CacheError;

/// Wraps the endpoints/pods/services/nodes caches and resolves IPs against
/// them in a fixed priority order: the first cache with a hit wins.
pub struct State {
    pub endpoints: Arc<IdentityCache<EndpointsObject>>,
    pub pods: Arc<IdentityCache<PodObject>>,
    pub services: Arc<IdentityCache<ServiceObject>>,
    pub nodes: Arc<IdentityCache<NodeObject>>,
}

impl State {
    pub fn new(buffer_size: usize) -> Self {
        State {
            endpoints: Arc::new(IdentityCache::new(buffer_size)),
            pods: Arc::new(IdentityCache::new(buffer_size)),
            services: Arc::new(IdentityCache::new(buffer_size)),
            nodes: Arc::new(IdentityCache::new(buffer_size)),
        }
    }

    /// Sync all four caches against their initial snapshots, then spawn
    /// background reflectors for each watch stream. Returns once every
    /// cache reflects its initial list (subsequent updates apply async).
    pub async fn run(
        &self,
        watcher: Arc<dyn Watcher>,
        ctx: CancellationToken,
    ) -> Result<(), CacheError> {
        self.endpoints.sync_initial(watcher.list_endpoints().await?);
        self.pods.sync_initial(watcher.list_pods().await?);
        self.services.sync_initial(watcher.list_services().await?);
        self.nodes.sync_initial(watcher.list_nodes().await?);
        info!("identity cache initial snapshot synced");

        let endpoints = Arc::clone(&self.endpoints);
        let w = Arc::clone(&watcher);
        let c = ctx.clone();
        tokio::spawn(async move { endpoints.reflect(w.watch_endpoints(), c).await });

        let pods = Arc::clone(&self.pods);
        let w = Arc::clone(&watcher);
        let c = ctx.clone();
        tokio::spawn(async move { pods.reflect(w.watch_pods(), c).await });

        let services = Arc::clone(&self.services);
        let w = Arc::clone(&watcher);
        let c = ctx.clone();
        tokio::spawn(async move { services.reflect(w.watch_services(), c).await });

        let nodes = Arc::clone(&self.nodes);
        let w = Arc::clone(&watcher);
        let c = ctx.clone();
        tokio::spawn(async move { nodes.reflect(w.watch_nodes(), c).await });

        Ok(())
    }

    /// Re-list all four resources and replace each cache's snapshot.
    /// Used on a fixed interval to paper over watch streams that never
    /// emit (e.g. a control-plane client not yet wired to a live watch).
    pub async fn resync(&self, watcher: &Arc<dyn Watcher>) -> Result<(), CacheError> {
        self.endpoints.sync_initial(watcher.list_endpoints().await?);
        self.pods.sync_initial(watcher.list_pods().await?);
        self.services.sync_initial(watcher.list_services().await?);
        self.nodes.sync_initial(watcher.list_nodes().await?);
        Ok(())
    }

    /// Resolve `ip` in priority order: endpoints, pods, services, nodes.
    /// The first hit is composed into a unified identity.
    pub fn get_endpoint_by_ip(&self, ip: IpAddr) -> Result<EndpointIdentity, CacheError> {
        if let Ok(o) = self.endpoints.get_by_ip(ip) {
            return Ok(compose(&o));
        }
        if let Ok(o) = self.pods.get_by_ip(ip) {
            return Ok(compose(&o));
        }
        if let Ok(o) = self.services.get_by_ip(ip) {
            return Ok(compose(&o));
        }
        if let Ok(o) = self.nodes.get_by_ip(ip) {
            return Ok(compose(&o));
        }
        Err(CacheError::NotFound(ip.to_string()))
    }
}

fn compose<T: ControlObject>(obj: &T) -> EndpointIdentity {
    let mut labels = obj.labels().clone();
    labels.insert(
        "k8s:io.kubernetes.pod.name".to_string(),
        obj.name().to_string(),
    );
    labels.insert(
        "k8s:io.kubernetes.pod.namespace".to_string(),
        obj.namespace().to_string(),
    );
    EndpointIdentity {
        name: obj.name().to_string(),
        namespace: obj.namespace().to_string(),
        labels,
        ports: obj.ports().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::watch::FakeWatcher;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn endpoints_take_priority_over_pods() {
        let state = State::new(16);
        let watcher = Arc::new(FakeWatcher::new());
        watcher.seed_pods(vec![PodObject {
            namespace: "default".into(),
            name: "from-pod".into(),
            labels: BTreeMap::new(),
            ports: vec![],
            pod_ip: Some("10.0.0.5".parse().unwrap()),
        }]);
        watcher.seed_endpoints(vec![EndpointsObject {
            namespace: "default".into(),
            name: "from-endpoints".into(),
            labels: BTreeMap::new(),
            ports: vec![],
            addresses: vec!["10.0.0.5".parse().unwrap()],
        }]);

        state
            .run(watcher.clone(), CancellationToken::new())
            .await
            .unwrap();

        let resolved = state.get_endpoint_by_ip("10.0.0.5".parse().unwrap()).unwrap();
        assert_eq!(resolved.name, "from-endpoints");
    }

    #[tokio::test]
    async fn unresolved_ip_errors() {
        let state = State::new(16);
        let watcher = Arc::new(FakeWatcher::new());
        state
            .run(watcher, CancellationToken::new())
            .await
            .unwrap();
        assert!(state
            .get_endpoint_by_ip("10.0.0.9".parse().unwrap())
            .is_err());
    }
}
