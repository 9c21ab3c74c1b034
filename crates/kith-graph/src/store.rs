//! The authoritative node/edge collection.
//!
//! [`GraphStore`] is the only place graph data lives. Its merge methods
//! are the sole mutation entry points and are commutative enough that
//! completions from independent pipelines can land in any order:
//!
//! - a node merge only overwrites fields the update actually carries
//! - an edge merge never creates a second edge for the same pair
//! - pruning computes the surviving set first and swaps it in whole

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::edge::{Edge, EdgeId};
use crate::identity::IdentityKey;
use crate::node::{Node, NodeUpdate, Position};

/// Read-only copy of the store handed to renderers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn node(&self, id: &IdentityKey) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn contains(&self, id: &IdentityKey) -> bool {
        self.node(id).is_some()
    }
}

/// Result of [`GraphStore::merge_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeMerge {
    Inserted,
    Updated,
    Unchanged,
}

impl NodeMerge {
    pub fn changed(self) -> bool {
        self != Self::Unchanged
    }
}

/// Result of [`GraphStore::merge_edge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMerge {
    Inserted,
    /// The reverse direction was already stored; it is now mutual.
    MarkedMutual,
    Unchanged,
    /// An endpoint is missing from the store, so the edge was dropped.
    Dangling,
    /// Source and target are the same identity.
    SelfLoop,
}

impl EdgeMerge {
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::MarkedMutual)
    }
}

/// Counts removed by a prune.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub nodes_removed: usize,
    pub edges_removed: usize,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        self.nodes_removed == 0 && self.edges_removed == 0
    }
}

/// Mutable node/edge set keyed by id.
#[derive(Debug, Default, Clone)]
pub struct GraphStore {
    nodes: BTreeMap<IdentityKey, Node>,
    edges: BTreeMap<EdgeId, Edge>,
    /// Bumped on every observable change.
    revision: u64,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn node(&self, id: &IdentityKey) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn contains_node(&self, id: &IdentityKey) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Insert a node, or fold the update over the stored one.
    pub fn merge_node(&mut self, update: impl Into<NodeUpdate>) -> NodeMerge {
        let update = update.into();
        match self.nodes.get_mut(&update.id) {
            Some(existing) => {
                if update.apply_to(existing) {
                    self.revision += 1;
                    NodeMerge::Updated
                } else {
                    NodeMerge::Unchanged
                }
            }
            None => {
                let node = update.into_node();
                trace!(identity = %node.id, "Inserted node");
                self.nodes.insert(node.id.clone(), node);
                self.revision += 1;
                NodeMerge::Inserted
            }
        }
    }

    /// Merge an update only if the node is already present.
    ///
    /// Used by enrichment so a late completion never resurrects a node
    /// that pruning removed.
    pub fn merge_existing(&mut self, update: impl Into<NodeUpdate>) -> Option<NodeMerge> {
        let update = update.into();
        if self.nodes.contains_key(&update.id) {
            Some(self.merge_node(update))
        } else {
            None
        }
    }

    /// Merge many updates, returning how many changed the store.
    pub fn merge_nodes<I, U>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = U>,
        U: Into<NodeUpdate>,
    {
        updates
            .into_iter()
            .map(|u| self.merge_node(u))
            .filter(|m| *m != NodeMerge::Unchanged)
            .count()
    }

    /// Insert an edge unless one already exists for the same pair.
    ///
    /// Both endpoints must already be nodes; the store never holds an
    /// edge without its endpoints.
    pub fn merge_edge(&mut self, edge: Edge) -> EdgeMerge {
        if edge.is_self_loop() {
            return EdgeMerge::SelfLoop;
        }
        if !self.nodes.contains_key(&edge.source) || !self.nodes.contains_key(&edge.target) {
            debug!(edge = %edge.id, "Dropped edge with missing endpoint");
            return EdgeMerge::Dangling;
        }
        match self.edges.get_mut(&edge.id) {
            Some(existing) => {
                let reversed = existing.source == edge.target && existing.target == edge.source;
                if reversed && !existing.mutual {
                    existing.mutual = true;
                    self.revision += 1;
                    EdgeMerge::MarkedMutual
                } else {
                    EdgeMerge::Unchanged
                }
            }
            None => {
                self.edges.insert(edge.id.clone(), edge);
                self.revision += 1;
                EdgeMerge::Inserted
            }
        }
    }

    /// Record a layout position. Renderer-facing; merges never call this.
    pub fn set_position(&mut self, id: &IdentityKey, position: Position) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.position = Some(position);
                self.revision += 1;
                true
            }
            None => false,
        }
    }

    /// Swap the contents for exactly `nodes` and `edges`.
    ///
    /// The replacement is built aside and swapped in one assignment.
    /// Edges whose endpoints are not among `nodes` are dropped.
    pub fn replace_subset(&mut self, nodes: Vec<Node>, edges: Vec<Edge>) {
        let mut next = GraphStore::new();
        for node in nodes {
            next.merge_node(node);
        }
        for edge in edges {
            let mutual = edge.mutual;
            let id = edge.id.clone();
            if next.merge_edge(edge) == EdgeMerge::Inserted && mutual {
                if let Some(stored) = next.edges.get_mut(&id) {
                    stored.mutual = true;
                }
            }
        }
        next.revision = self.revision + 1;
        *self = next;
    }

    /// Drop every node outside `keep` and every edge touching a dropped node.
    pub fn remove_unreachable(&mut self, keep: &HashSet<IdentityKey>) -> PruneReport {
        let nodes: Vec<Node> = self
            .nodes
            .values()
            .filter(|n| keep.contains(&n.id))
            .cloned()
            .collect();
        let edges: Vec<Edge> = self
            .edges
            .values()
            .filter(|e| keep.contains(&e.source) && keep.contains(&e.target))
            .cloned()
            .collect();

        let report = PruneReport {
            nodes_removed: self.nodes.len() - nodes.len(),
            edges_removed: self.edges.len() - edges.len(),
        };
        self.replace_subset(nodes, edges);
        report
    }

    /// Identities sharing an edge with `id`, in either direction.
    pub fn neighbors(&self, id: &IdentityKey) -> BTreeSet<IdentityKey> {
        self.edges
            .values()
            .filter_map(|e| e.other(id))
            .cloned()
            .collect()
    }

    /// `roots` plus every node directly connected to any of them.
    pub fn neighborhood<'a, I>(&self, roots: I) -> HashSet<IdentityKey>
    where
        I: IntoIterator<Item = &'a IdentityKey>,
    {
        let roots: HashSet<&IdentityKey> = roots.into_iter().collect();
        let mut keep: HashSet<IdentityKey> = roots.iter().map(|r| (*r).clone()).collect();
        for edge in self.edges.values() {
            if roots.contains(&edge.source) {
                keep.insert(edge.target.clone());
            }
            if roots.contains(&edge.target) {
                keep.insert(edge.source.clone());
            }
        }
        keep
    }

    /// Prune to the one-hop neighbourhood of `roots`.
    pub fn retain_neighborhood<'a, I>(&mut self, roots: I) -> PruneReport
    where
        I: IntoIterator<Item = &'a IdentityKey>,
    {
        let keep = self.neighborhood(roots);
        self.remove_unreachable(&keep)
    }

    /// Whether the follow list of `id` has contributed any edge yet.
    pub fn has_outgoing_edges(&self, id: &IdentityKey) -> bool {
        self.edges.values().any(|e| e.is_outgoing_from(id))
    }

    pub fn snapshot(&self) -> Graph {
        Graph {
            nodes: self.nodes.values().cloned().collect(),
            edges: self.edges.values().cloned().collect(),
        }
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::PLACEHOLDER_LABEL;
    use crate::Profile;
    use proptest::prelude::*;

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s)
    }

    fn store_with(ids: &[&str]) -> GraphStore {
        let mut store = GraphStore::new();
        for id in ids {
            store.merge_node(Node::fallback(key(id)));
        }
        store
    }

    #[test]
    fn merge_node_is_idempotent() {
        let mut store = GraphStore::new();
        let node = Node::fallback(key("a"));

        assert_eq!(store.merge_node(node.clone()), NodeMerge::Inserted);
        let once = store.snapshot();
        assert_eq!(store.merge_node(node), NodeMerge::Unchanged);
        assert_eq!(store.snapshot(), once);
    }

    #[test]
    fn merge_preserves_position() {
        let mut store = store_with(&["a"]);
        store.set_position(&key("a"), Position::new(3.0, 4.0));

        let mut enriched = Node::from_profile(
            key("a"),
            Profile {
                name: Some("alice".into()),
                ..Default::default()
            },
        );
        enriched.position = Some(Position::new(0.0, 0.0));
        store.merge_node(enriched);

        let node = store.node(&key("a")).unwrap();
        assert_eq!(node.label, "alice");
        assert_eq!(node.position, Some(Position::new(3.0, 4.0)));
    }

    #[test]
    fn trust_update_leaves_other_fields() {
        let mut store = GraphStore::new();
        store.merge_node(Node::placeholder(key("a")));
        store.merge_node(NodeUpdate::trust_score(key("a"), 0.4));

        let node = store.node(&key("a")).unwrap();
        assert_eq!(node.label, PLACEHOLDER_LABEL);
        assert_eq!(node.trust_score, Some(0.4));
    }

    #[test]
    fn merge_existing_skips_absent_nodes() {
        let mut store = store_with(&["a"]);
        let before = store.revision();

        assert_eq!(store.merge_existing(NodeUpdate::trust_score(key("gone"), 0.5)), None);
        assert!(!store.contains_node(&key("gone")));
        assert_eq!(store.revision(), before);

        assert_eq!(
            store.merge_existing(NodeUpdate::trust_score(key("a"), 0.5)),
            Some(NodeMerge::Updated)
        );
        assert!(store.revision() > before);
    }

    #[test]
    fn reverse_edge_marks_mutual() {
        let mut store = store_with(&["a", "b"]);

        assert_eq!(store.merge_edge(Edge::follows(key("a"), key("b"))), EdgeMerge::Inserted);
        assert_eq!(store.merge_edge(Edge::follows(key("a"), key("b"))), EdgeMerge::Unchanged);
        assert_eq!(
            store.merge_edge(Edge::follows(key("b"), key("a"))),
            EdgeMerge::MarkedMutual
        );
        assert_eq!(store.merge_edge(Edge::follows(key("b"), key("a"))), EdgeMerge::Unchanged);
        assert_eq!(store.edge_count(), 1);

        let edge = store.edges().next().unwrap();
        assert_eq!(edge.source, key("a"));
        assert!(edge.mutual);
        assert!(store.has_outgoing_edges(&key("b")));
    }

    #[test]
    fn keys_containing_separator_keep_distinct_edges() {
        let mut store = store_with(&["a|b", "c", "a", "b|c"]);

        assert_eq!(store.merge_edge(Edge::follows(key("a|b"), key("c"))), EdgeMerge::Inserted);
        assert_eq!(store.merge_edge(Edge::follows(key("a"), key("b|c"))), EdgeMerge::Inserted);
        assert_eq!(store.edge_count(), 2);
    }

    #[test]
    fn dangling_and_self_edges_are_dropped() {
        let mut store = store_with(&["a"]);
        assert_eq!(store.merge_edge(Edge::follows(key("a"), key("z"))), EdgeMerge::Dangling);
        assert_eq!(store.merge_edge(Edge::follows(key("a"), key("a"))), EdgeMerge::SelfLoop);
        assert_eq!(store.edge_count(), 0);
    }

    #[test]
    fn remove_unreachable_drops_touching_edges() {
        let mut store = store_with(&["a", "b", "c"]);
        store.merge_edge(Edge::follows(key("a"), key("b")));
        store.merge_edge(Edge::follows(key("b"), key("c")));

        let keep: HashSet<_> = [key("a"), key("b")].into_iter().collect();
        let report = store.remove_unreachable(&keep);

        assert_eq!(report, PruneReport { nodes_removed: 1, edges_removed: 1 });
        assert!(!store.contains_node(&key("c")));
        assert_eq!(store.edge_count(), 1);
    }

    #[test]
    fn replace_subset_drops_orphan_edges() {
        let mut store = GraphStore::new();
        let mut edge = Edge::follows(key("a"), key("b"));
        edge.mutual = true;
        store.replace_subset(
            vec![Node::fallback(key("a")), Node::fallback(key("b"))],
            vec![edge, Edge::follows(key("a"), key("c"))],
        );

        assert_eq!(store.node_count(), 2);
        assert_eq!(store.edge_count(), 1);
        assert!(store.edges().next().unwrap().mutual);
    }

    #[test]
    fn neighborhood_is_undirected_one_hop() {
        let mut store = store_with(&["a", "b", "c", "d"]);
        store.merge_edge(Edge::follows(key("a"), key("b")));
        store.merge_edge(Edge::follows(key("c"), key("a")));
        store.merge_edge(Edge::follows(key("b"), key("d")));

        let hood = store.neighborhood([&key("a")]);
        assert_eq!(hood.len(), 3);
        assert!(!hood.contains(&key("d")));
    }

    fn arb_edge() -> impl Strategy<Value = (u8, u8)> {
        (0u8..8, 0u8..8)
    }

    proptest! {
        #[test]
        fn one_edge_per_pair(pairs in proptest::collection::vec(arb_edge(), 0..40)) {
            let mut store = GraphStore::new();
            for i in 0..8u8 {
                store.merge_node(Node::fallback(key(&i.to_string())));
            }
            for (a, b) in &pairs {
                store.merge_edge(Edge::follows(key(&a.to_string()), key(&b.to_string())));
            }

            let distinct: HashSet<(u8, u8)> = pairs
                .iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| (*a.min(b), *a.max(b)))
                .collect();
            prop_assert_eq!(store.edge_count(), distinct.len());
        }

        #[test]
        fn merge_twice_equals_merge_once(label in "[a-z]{0,6}", score in proptest::option::of(0.0f64..1.0)) {
            let node = Node::new(key("n"), label).with_trust_score(score);

            let mut once = store_with(&["m"]);
            once.merge_node(node.clone());

            let mut twice = once.clone();
            twice.merge_node(node);

            prop_assert_eq!(once.snapshot(), twice.snapshot());
        }
    }
}
