//! The list+watch contract consumed from the control plane: an initial
//! snapshot followed by a stream of typed change events.

use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::object::{EndpointsObject, NodeObject, PodObject, ServiceObject};
use crate::error::CacheError;

/// Tombstone deletions carry the last-known object so the index can still
/// locate and remove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent<T> {
    Add(T),
    Update(T, T),
    Delete(T),
}

pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// List+watch contract, one pair of methods per resource kind (mirroring
/// how the control plane itself separates Pods, Services, Endpoints, and
/// Nodes into independent watches).
#[async_trait]
pub trait Watcher: Send + Sync {
    async fn list_pods(&self) -> Result<Vec<PodObject>, CacheError>;
    fn watch_pods(&self) -> BoxStream<WatchEvent<PodObject>>;

    async fn list_services(&self) -> Result<Vec<ServiceObject>, CacheError>;
    fn watch_services(&self) -> BoxStream<WatchEvent<ServiceObject>>;

    async fn list_endpoints(&self) -> Result<Vec<EndpointsObject>, CacheError>;
    fn watch_endpoints(&self) -> BoxStream<WatchEvent<EndpointsObject>>;

    async fn list_nodes(&self) -> Result<Vec<NodeObject>, CacheError>;
    fn watch_nodes(&self) -> BoxStream<WatchEvent<NodeObject>>;
}

/// Production placeholder wired to the real control plane: holds the
/// connection parameters the deployment passes in (`--apiserver-address`,
/// `--kubeconfig`) but has no resource client implemented yet. Every list
/// call reports [`CacheError::NotConnected`] so callers degrade to an
/// empty cache instead of failing to start.
pub struct ApiServerWatcher {
    apiserver_address: String,
}

impl ApiServerWatcher {
    pub fn new(apiserver_address: String, kubeconfig: Option<String>) -> Self {
        match &kubeconfig {
            Some(path) => tracing::info!(path = %path, "using external kubeconfig for control-plane auth"),
            None => tracing::info!("no kubeconfig given, falling back to in-cluster config"),
        }
        ApiServerWatcher { apiserver_address }
    }

    fn not_connected(&self) -> CacheError {
        CacheError::NotConnected(self.apiserver_address.clone())
    }
}

#[async_trait]
impl Watcher for ApiServerWatcher {
    async fn list_pods(&self) -> Result<Vec<PodObject>, CacheError> {
        Err(self.not_connected())
    }
    fn watch_pods(&self) -> BoxStream<WatchEvent<PodObject>> {
        Box::pin(futures::stream::empty())
    }

    async fn list_services(&self) -> Result<Vec<ServiceObject>, CacheError> {
        Err(self.not_connected())
    }
    fn watch_services(&self) -> BoxStream<WatchEvent<ServiceObject>> {
        Box::pin(futures::stream::empty())
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointsObject>, CacheError> {
        Err(self.not_connected())
    }
    fn watch_endpoints(&self) -> BoxStream<WatchEvent<EndpointsObject>> {
        Box::pin(futures::stream::empty())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeObject>, CacheError> {
        Err(self.not_connected())
    }
    fn watch_nodes(&self) -> BoxStream<WatchEvent<NodeObject>> {
        Box::pin(futures::stream::empty())
    }
}

/// Deterministic in-memory [`Watcher`] for tests: seed the initial list,
/// then push `Add`/`Update`/`Delete` events on demand.
#[derive(Default)]
pub struct FakeWatcher {
    pods: FakeResource<PodObject>,
    services: FakeResource<ServiceObject>,
    endpoints: FakeResource<EndpointsObject>,
    nodes: FakeResource<NodeObject>,
}

struct FakeResource<T> {
    initial: Mutex<Vec<T>>,
    tx: mpsc::UnboundedSender<WatchEvent<T>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WatchEvent<T>>>>,
}

impl<T> Default for FakeResource<T> {
    fn default() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        FakeResource {
            initial: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

impl<T: Clone> FakeResource<T> {
    fn seed(&self, items: Vec<T>) {
        *self.initial.lock().unwrap() = items;
    }

    fn push(&self, event: WatchEvent<T>) {
        // The receiver may already be gone in a test that never called
        // watch(); that's fine, there's nothing left to observe it.
        let _ = self.tx.send(event);
    }

    fn list(&self) -> Vec<T> {
        self.initial.lock().unwrap().clone()
    }

    fn watch(&self) -> BoxStream<WatchEvent<T>>
    where
        T: Send + 'static,
    {
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("FakeWatcher: watch() called more than once for the same resource");
        Box::pin(UnboundedReceiverStream::new(rx))
    }
}

impl FakeWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_pods(&self, items: Vec<PodObject>) {
        self.pods.seed(items);
    }
    pub fn push_pod_event(&self, event: WatchEvent<PodObject>) {
        self.pods.push(event);
    }

    pub fn seed_services(&self, items: Vec<ServiceObject>) {
        self.services.seed(items);
    }
    pub fn push_service_event(&self, event: WatchEvent<ServiceObject>) {
        self.services.push(event);
    }

    pub fn seed_endpoints(&self, items: Vec<EndpointsObject>) {
        self.endpoints.seed(items);
    }
    pub fn push_endpoints_event(&self, event: WatchEvent<EndpointsObject>) {
        self.endpoints.push(event);
    }

    pub fn seed_nodes(&self, items: Vec<NodeObject>) {
        self.nodes.seed(items);
    }
    pub fn push_node_event(&self, event: WatchEvent<NodeObject>) {
        self.nodes.push(event);
    }
}

#[async_trait]
impl Watcher for FakeWatcher {
    async fn list_pods(&self) -> Result<Vec<PodObject>, CacheError> {
        Ok(self.pods.list())
    }
    fn watch_pods(&self) -> BoxStream<WatchEvent<PodObject>> {
        self.pods.watch()
    }

    async fn list_services(&self) -> Result<Vec<ServiceObject>, CacheError> {
        Ok(self.services.list())
    }
    fn watch_services(&self) -> BoxStream<WatchEvent<ServiceObject>> {
        self.services.watch()
    }

    async fn list_endpoints(&self) -> Result<Vec<EndpointsObject>, CacheError> {
        Ok(self.endpoints.list())
    }
    fn watch_endpoints(&self) -> BoxStream<WatchEvent<EndpointsObject>> {
        self.endpoints.watch()
    }

    async fn list_nodes(&self) -> Result<Vec<NodeObject>, CacheError> {
        Ok(self.nodes.list())
    }
    fn watch_nodes(&self) -> BoxStream<WatchEvent<NodeObject>> {
        self.nodes.watch()
    }
}
