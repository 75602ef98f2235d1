//! `ifindex -> ifname` map consulted when decoding the metadata prefix.
//!
//! Link names and indexes can change out from under a long-running agent,
//! so the map is rebuilt wholesale on a background cadence rather than
//! incrementally maintained.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Thread-safe `ifindex -> ifname` lookup, rebuilt atomically under a
/// single write lock.
#[derive(Default)]
pub struct IfindexMap {
    inner: RwLock<HashMap<u32, String>>,
}

impl IfindexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `ifindex` to a name, falling back to the stringified index
    /// when the map hasn't observed it (yet, or anymore).
    pub fn name(&self, ifindex: u32) -> String {
        self.inner
            .read()
            .get(&ifindex)
            .cloned()
            .unwrap_or_else(|| ifindex.to_string())
    }

    /// Replace the whole map atomically.
    pub fn rebuild(&self, links: impl IntoIterator<Item = (u32, String)>) {
        let mut guard = self.inner.write();
        guard.clear();
        guard.extend(links);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_stringified_index_when_unknown() {
        let map = IfindexMap::new();
        assert_eq!(map.name(7), "7");
    }

    #[test]
    fn resolves_after_rebuild() {
        let map = IfindexMap::new();
        map.rebuild([(2, "eth0".to_string()), (3, "veth1".to_string())]);
        assert_eq!(map.name(2), "eth0");
        assert_eq!(map.name(3), "veth1");
        assert_eq!(map.name(99), "99");
    }
}
