//! The collector's live, deduplicated service-interaction graph.

use parking_lot::RwLock;
use petgraph::dot::Dot;
use petgraph::graphmap::DiGraphMap;

/// `DiGraphMap` keyed directly by `service_id`, guarded by a single
/// reader-writer lock as both lookups and insertions are cheap relative to
/// the trace arrival rate.
#[derive(Default)]
pub struct ServiceGraph {
    inner: RwLock<DiGraphMap<String, ()>>,
}

impl ServiceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the directed edge `src -> dst` if it is not already present,
    /// creating either endpoint's node first if needed.
    pub fn ensure_edge(&self, src: &str, dst: &str) {
        let mut g = self.inner.write();
        if !g.contains_node(src) {
            g.add_node(src.to_string());
        }
        if !g.contains_node(dst) {
            g.add_node(dst.to_string());
        }
        if !g.contains_edge(src, dst) {
            g.add_edge(src.to_string(), dst.to_string(), ());
        }
    }

    pub fn node_count(&self) -> usize {
        self.inner.read().node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.read().edge_count()
    }

    pub fn has_edge(&self, src: &str, dst: &str) -> bool {
        self.inner.read().contains_edge(src, dst)
    }

    /// Render the current graph as Graphviz `dot` text.
    pub fn to_dot(&self) -> String {
        format!("{:?}", Dot::with_config(&*self.inner.read(), &[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_edge_is_idempotent() {
        let graph = ServiceGraph::new();
        graph.ensure_edge("a", "b");
        graph.ensure_edge("a", "b");
        graph.ensure_edge("a", "b");
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.node_count(), 2);
        assert!(graph.has_edge("a", "b"));
        assert!(!graph.has_edge("b", "a"));
    }

    #[test]
    fn to_dot_mentions_both_nodes() {
        let graph = ServiceGraph::new();
        graph.ensure_edge("sauce-app", "dest-app:8080");
        let dot = graph.to_dot();
        assert!(dot.contains("sauce-app"));
        assert!(dot.contains("dest-app:8080"));
    }
}
