//! Navigation stack: the path of explicitly selected identities.
//!
//! Selecting a node moves the stack through one of four transitions:
//!
//! ```text
//! selected == top of stack             -> Noop
//! selected is the focus identity       -> Reset     stack = [selected]
//! selected already at index k          -> Truncate  stack = stack[..=k]
//! anything else                        -> Push      stack = stack + [selected]
//! ```
//!
//! Only Reset and Truncate prune the graph. A Push is forward exploration
//! and never shrinks it.

use std::collections::HashSet;

use crate::identity::IdentityKey;
use crate::node::Node;
use crate::store::{GraphStore, PruneReport};

/// Outcome of [`NavigationStack::select`].
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The selection was already on top.
    Noop,
    /// A new identity was appended.
    Push,
    /// The stack was cut back to an earlier entry; `removed` were popped.
    Truncate { removed: Vec<Node> },
    /// The stack was reset to the focus identity.
    Reset { removed: Vec<Node> },
}

impl Transition {
    pub fn prunes(&self) -> bool {
        matches!(self, Self::Truncate { .. } | Self::Reset { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Push => "push",
            Self::Truncate { .. } => "truncate",
            Self::Reset { .. } => "reset",
        }
    }
}

/// Ordered selection path. Never holds the same identity twice.
#[derive(Debug, Clone, Default)]
pub struct NavigationStack {
    entries: Vec<Node>,
}

impl NavigationStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stack seeded with the session's focus identity.
    pub fn seeded(focus: Node) -> Self {
        Self {
            entries: vec![focus],
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Node] {
        &self.entries
    }

    pub fn root(&self) -> Option<&Node> {
        self.entries.first()
    }

    pub fn top(&self) -> Option<&Node> {
        self.entries.last()
    }

    pub fn ids(&self) -> impl Iterator<Item = &IdentityKey> {
        self.entries.iter().map(|n| &n.id)
    }

    pub fn position(&self, id: &IdentityKey) -> Option<usize> {
        self.entries.iter().position(|n| &n.id == id)
    }

    pub fn contains(&self, id: &IdentityKey) -> bool {
        self.position(id).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply a selection and report which transition it caused.
    pub fn select(&mut self, node: Node) -> Transition {
        if self.top().is_some_and(|top| top.id == node.id) {
            return Transition::Noop;
        }

        let is_root = self.root().is_some_and(|root| root.id == node.id);
        if node.is_focus_identity || is_root {
            let removed = std::mem::take(&mut self.entries);
            let removed = removed.into_iter().filter(|n| n.id != node.id).collect();
            self.entries.push(node);
            return Transition::Reset { removed };
        }

        if let Some(k) = self.position(&node.id) {
            let removed = self.entries.split_off(k + 1);
            return Transition::Truncate { removed };
        }

        self.entries.push(node);
        Transition::Push
    }

    /// Identities whose one-hop neighbourhood survives `transition`.
    ///
    /// Reset keeps only the new root's neighbourhood; Truncate keeps the
    /// neighbourhood of every remaining stack member.
    pub fn prune_roots(&self, transition: &Transition) -> Option<Vec<IdentityKey>> {
        match transition {
            Transition::Reset { .. } => self.root().map(|n| vec![n.id.clone()]),
            Transition::Truncate { .. } => Some(self.ids().cloned().collect()),
            Transition::Noop | Transition::Push => None,
        }
    }

    /// Prune `store` as required by `transition`. Push and Noop leave it alone.
    pub fn apply_prune(&self, transition: &Transition, store: &mut GraphStore) -> PruneReport {
        match self.prune_roots(transition) {
            Some(roots) => store.retain_neighborhood(roots.iter()),
            None => PruneReport::default(),
        }
    }

    /// Whether every identity appears at most once.
    pub fn is_well_formed(&self) -> bool {
        let mut seen = HashSet::new();
        self.ids().all(|id| seen.insert(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::Edge;
    use proptest::prelude::*;

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s)
    }

    fn node(s: &str) -> Node {
        Node::fallback(key(s))
    }

    fn focus(s: &str) -> Node {
        node(s).with_focus(true)
    }

    fn ids(stack: &NavigationStack) -> Vec<&str> {
        stack.ids().map(IdentityKey::as_str).collect()
    }

    /// Star around each of `hubs`, with `fanout` leaves named `{hub}{i}`.
    fn star_graph(hubs: &[&str], fanout: usize) -> GraphStore {
        let mut store = GraphStore::new();
        for hub in hubs {
            store.merge_node(node(hub));
            for i in 0..fanout {
                let leaf = key(&format!("{hub}{i}"));
                store.merge_node(Node::fallback(leaf.clone()));
                store.merge_edge(Edge::follows(key(hub), leaf));
            }
        }
        for pair in hubs.windows(2) {
            store.merge_edge(Edge::follows(key(pair[0]), key(pair[1])));
        }
        store
    }

    #[test]
    fn push_appends_without_pruning() {
        let mut stack = NavigationStack::seeded(focus("u"));
        let mut store = star_graph(&["u", "a"], 3);
        let before = (store.node_count(), store.edge_count());

        let t = stack.select(node("a"));
        assert_eq!(t, Transition::Push);
        assert!(stack.apply_prune(&t, &mut store).is_empty());
        assert_eq!((store.node_count(), store.edge_count()), before);
        assert_eq!(ids(&stack), vec!["u", "a"]);
    }

    #[test]
    fn reselecting_top_is_noop() {
        let mut stack = NavigationStack::seeded(focus("u"));
        stack.select(node("a"));
        assert_eq!(stack.select(node("a")), Transition::Noop);
        assert_eq!(stack.select(focus("u")), Transition::Reset { removed: vec![node("a")] });
        assert_eq!(stack.select(focus("u")), Transition::Noop);
    }

    #[test]
    fn truncate_keeps_stack_neighborhood() {
        let mut store = star_graph(&["a", "b", "c", "d"], 2);
        let mut stack = NavigationStack::seeded(focus("a"));
        for id in ["b", "c", "d"] {
            stack.select(node(id));
        }

        let t = stack.select(node("b"));
        assert!(matches!(&t, Transition::Truncate { removed } if removed.len() == 2));
        assert_eq!(ids(&stack), vec!["a", "b"]);

        stack.apply_prune(&t, &mut store);
        let mut kept: Vec<String> = store.nodes().map(|n| n.id.to_string()).collect();
        kept.sort();
        assert_eq!(kept, vec!["a", "a0", "a1", "b", "b0", "b1", "c"]);
    }

    #[test]
    fn reset_keeps_focus_neighborhood() {
        let mut store = star_graph(&["u", "a", "b"], 9);
        let mut stack = NavigationStack::seeded(focus("u"));
        stack.select(node("a"));
        stack.select(node("b"));
        assert_eq!(store.node_count(), 30);

        // A plain node with the root's id also resets.
        let t = stack.select(node("u"));
        assert!(matches!(t, Transition::Reset { .. }));
        assert_eq!(ids(&stack), vec!["u"]);

        stack.apply_prune(&t, &mut store);
        let expected = store.neighborhood([&key("u")]);
        assert_eq!(store.node_count(), 11);
        assert_eq!(expected.len(), 11);
        assert!(store.contains_node(&key("a")));
        assert!(!store.contains_node(&key("b")));
    }

    #[test]
    fn empty_stack_push_seeds() {
        let mut stack = NavigationStack::new();
        assert_eq!(stack.select(node("x")), Transition::Push);
        assert_eq!(stack.root().map(|n| n.id.as_str()), Some("x"));
    }

    proptest! {
        #[test]
        fn stack_never_holds_duplicates(picks in proptest::collection::vec(0u8..6, 0..60)) {
            let mut stack = NavigationStack::seeded(focus("0"));
            let mut last_was_reset = false;
            for p in picks {
                let selected = if p == 0 { focus("0") } else { node(&p.to_string()) };
                let t = stack.select(selected);
                if t != Transition::Noop {
                    last_was_reset = matches!(t, Transition::Reset { .. });
                }
                prop_assert!(stack.is_well_formed());
                prop_assert!(!stack.is_empty());
            }
            if last_was_reset {
                prop_assert_eq!(stack.root().map(|n| n.id.as_str()), Some("0"));
                prop_assert_eq!(stack.len(), 1);
            }
        }

        #[test]
        fn push_never_shrinks(picks in proptest::collection::vec(1u8..6, 1..20)) {
            let hubs: Vec<String> = (0..6).map(|i| i.to_string()).collect();
            let hub_refs: Vec<&str> = hubs.iter().map(String::as_str).collect();
            let mut store = star_graph(&hub_refs, 2);
            let mut stack = NavigationStack::seeded(focus("0"));

            for p in picks {
                let before = (store.node_count(), store.edge_count());
                let t = stack.select(node(&p.to_string()));
                stack.apply_prune(&t, &mut store);
                if t == Transition::Push {
                    prop_assert!(store.node_count() >= before.0);
                    prop_assert!(store.edge_count() >= before.1);
                }
            }
        }
    }
}
