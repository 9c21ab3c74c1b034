//! Kith Graph - social graph state for interactive exploration
//!
//! The synchronous half of Kith: the data model and the two pieces of
//! state every pipeline shares.
//!
//! # Architecture
//!
//! - **Identity**: [`IdentityKey`] and decoded [`Profile`] metadata
//! - **Nodes/Edges**: one [`Node`] per identity, one [`Edge`] per unordered pair
//! - **Store**: [`GraphStore`], the only owner of graph data, mutated through merges
//! - **Navigation**: [`NavigationStack`], whose transitions decide when the store is pruned
//!
//! # Example
//!
//! ```
//! use kith_graph::{Edge, GraphStore, IdentityKey, NavigationStack, Node, Transition};
//!
//! let me = IdentityKey::new("me");
//! let friend = IdentityKey::new("friend");
//!
//! let mut store = GraphStore::new();
//! store.merge_node(Node::fallback(me.clone()).with_focus(true));
//! store.merge_node(Node::placeholder(friend.clone()));
//! store.merge_edge(Edge::follows(me.clone(), friend.clone()));
//!
//! let mut stack = NavigationStack::seeded(store.node(&me).unwrap().clone());
//! let transition = stack.select(store.node(&friend).unwrap().clone());
//! assert_eq!(transition, Transition::Push);
//! assert!(stack.apply_prune(&transition, &mut store).is_empty());
//! ```

pub mod color;
pub mod edge;
pub mod error;
pub mod identity;
pub mod navigation;
pub mod node;
pub mod store;

pub use color::{node_color, EDGE_COLOR, NEUTRAL_COLOR};
pub use edge::{Edge, EdgeId};
pub use error::{Error, Result};
pub use identity::{IdentityKey, Profile};
pub use navigation::{NavigationStack, Transition};
pub use node::{sanitize_score, Node, NodeUpdate, Position, PLACEHOLDER_LABEL};
pub use store::{EdgeMerge, Graph, GraphStore, NodeMerge, PruneReport};
