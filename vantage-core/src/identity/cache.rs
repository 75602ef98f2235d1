//! A single indexed cache over one control-plane resource kind.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vantage_model::EndpointIdentity;

use super::object::ControlObject;
use super::watch::WatchEvent;
use crate::error::CacheError;

/// Family of four homogeneous caches (endpoints, pods, services, nodes),
/// each keeping a primary index by object key and a secondary index by IP.
pub struct IdentityCache<T: ControlObject> {
    by_key: DashMap<String, T>,
    by_ip: DashMap<IpAddr, String>,
    announce_tx: mpsc::Sender<T>,
    announce_rx: parking_lot::Mutex<Option<mpsc::Receiver<T>>>,
}

impl<T: ControlObject> IdentityCache<T> {
    /// `buffer_size` bounds the advisory announcement channel (the cache's
    /// indexes are authoritative regardless of whether anyone drains it).
    pub fn new(buffer_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        IdentityCache {
            by_key: DashMap::new(),
            by_ip: DashMap::new(),
            announce_tx: tx,
            announce_rx: parking_lot::Mutex::new(Some(rx)),
        }
    }

    /// Take the receiving half of the announcement channel. Callable once.
    pub fn take_announcements(&self) -> Option<mpsc::Receiver<T>> {
        self.announce_rx.lock().take()
    }

    pub fn get_by_ip(&self, ip: IpAddr) -> Result<T, CacheError> {
        let key = self
            .by_ip
            .get(&ip)
            .ok_or_else(|| CacheError::NotFound(ip.to_string()))?;
        self.by_key
            .get(key.value())
            .map(|e| e.value().clone())
            .ok_or_else(|| CacheError::NotFound(ip.to_string()))
    }

    pub fn get_metadata_by_ip(&self, ip: IpAddr) -> Result<std::collections::BTreeMap<String, String>, CacheError> {
        self.get_by_ip(ip).map(|o| o.labels().clone())
    }

    fn index(&self, obj: &T) {
        for ip in obj.ips() {
            self.by_ip.insert(ip, obj.key());
        }
    }

    fn deindex(&self, obj: &T) {
        for ip in obj.ips() {
            // Only remove the mapping if it still points at this object;
            // a concurrent re-Add may have already replaced it.
            self.by_ip.remove_if(&ip, |_, k| k == &obj.key());
        }
    }

    fn apply(&self, event: WatchEvent<T>) {
        match event {
            WatchEvent::Add(obj) => {
                self.index(&obj);
                self.by_key.insert(obj.key(), obj.clone());
                let key = obj.key();
                if self.announce_tx.try_send(obj).is_err() {
                    tracing::warn!(key = %key, "announcement channel full, dropping notification");
                }
            }
            WatchEvent::Update(old, new) => {
                self.deindex(&old);
                self.index(&new);
                self.by_key.insert(new.key(), new);
            }
            WatchEvent::Delete(obj) => {
                self.deindex(&obj);
                self.by_key.remove(&obj.key());
            }
        }
    }

    /// Apply `initial` as the snapshot, returning once the cache reflects it.
    pub fn sync_initial(&self, initial: Vec<T>) {
        for obj in initial {
            self.index(&obj);
            self.by_key.insert(obj.key(), obj);
        }
    }

    /// Drive an already-synced cache from a watch stream until `ctx` is
    /// cancelled or the stream ends.
    pub async fn reflect(
        self: Arc<Self>,
        mut events: super::watch::BoxStream<WatchEvent<T>>,
        ctx: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                event = events.next() => {
                    match event {
                        Some(event) => self.apply(event),
                        None => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::object::PodObject;
    use super::*;
    use std::collections::BTreeMap;

    fn pod(name: &str, ip: &str) -> PodObject {
        PodObject {
            namespace: "default".into(),
            name: name.into(),
            labels: BTreeMap::from([("app".into(), name.into())]),
            ports: vec![],
            pod_ip: Some(ip.parse().unwrap()),
        }
    }

    #[test]
    fn add_then_get_by_ip_hits() {
        let cache = IdentityCache::<PodObject>::new(16);
        cache.apply(WatchEvent::Add(pod("a", "10.0.0.1")));
        let got = cache.get_by_ip("10.0.0.1".parse().unwrap()).unwrap();
        assert_eq!(got.name, "a");
    }

    #[test]
    fn update_rewrites_the_ip_index() {
        let cache = IdentityCache::<PodObject>::new(16);
        let before = pod("a", "10.0.0.1");
        cache.apply(WatchEvent::Add(before.clone()));
        let after = pod("a", "10.0.0.2");
        cache.apply(WatchEvent::Update(before, after));
        assert!(cache.get_by_ip("10.0.0.1".parse().unwrap()).is_err());
        assert_eq!(
            cache.get_by_ip("10.0.0.2".parse().unwrap()).unwrap().name,
            "a"
        );
    }

    #[test]
    fn delete_removes_both_indexes() {
        let cache = IdentityCache::<PodObject>::new(16);
        let obj = pod("a", "10.0.0.1");
        cache.apply(WatchEvent::Add(obj.clone()));
        cache.apply(WatchEvent::Delete(obj));
        assert!(cache.get_by_ip("10.0.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn reapplying_the_same_add_is_idempotent() {
        let cache = IdentityCache::<PodObject>::new(16);
        let obj = pod("a", "10.0.0.1");
        cache.apply(WatchEvent::Add(obj.clone()));
        cache.apply(WatchEvent::Add(obj));
        assert_eq!(
            cache.get_by_ip("10.0.0.1".parse().unwrap()).unwrap().name,
            "a"
        );
    }
}
