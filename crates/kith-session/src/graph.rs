//! The shared graph handle every pipeline writes through.
//!
//! One [`SharedGraph`] owns the store and the navigation stack for the
//! lifetime of a session. Each write names the [`Epoch`] it was started
//! under; the epoch is checked under the same write lock that applies
//! the change, so a completion that outlives a logout is rejected instead
//! of landing in the next session's store.

use std::fmt;
use std::sync::Arc;

use kith_graph::{Graph, GraphStore, IdentityKey, NavigationStack, Node, Position, PruneReport, Transition};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Session generation. Bumped on every login and logout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Epoch(u64);

impl Epoch {
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "epoch-{}", self.0)
    }
}

/// Notifications for renderers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphEvent {
    /// A session started with `focus` as its only node.
    Seeded { epoch: Epoch, focus: IdentityKey },
    /// Nodes or edges were merged.
    Updated { epoch: Epoch, revision: u64 },
    /// A navigation transition happened, possibly pruning the graph.
    Navigated {
        epoch: Epoch,
        transition: &'static str,
        nodes_removed: usize,
        edges_removed: usize,
    },
    /// The session ended and the graph was emptied.
    Cleared { epoch: Epoch },
}

/// What [`SharedGraph::navigate`] did.
#[derive(Debug, Clone)]
pub struct Navigation {
    pub transition: Transition,
    pub pruned: PruneReport,
    /// Top of the stack after the transition.
    pub top: IdentityKey,
    /// The top identity has no follow edges yet and should be synced.
    pub needs_sync: bool,
}

#[derive(Debug, Default)]
struct GraphState {
    epoch: u64,
    active: bool,
    store: GraphStore,
    stack: NavigationStack,
}

impl GraphState {
    fn check(&self, epoch: Epoch) -> Result<()> {
        if self.active && self.epoch == epoch.0 {
            Ok(())
        } else {
            Err(Error::StaleSession)
        }
    }
}

/// Cloneable handle to the session's store and stack.
#[derive(Debug, Clone)]
pub struct SharedGraph {
    state: Arc<RwLock<GraphState>>,
    events: broadcast::Sender<GraphEvent>,
}

impl SharedGraph {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            state: Arc::new(RwLock::new(GraphState::default())),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: GraphEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Current epoch, if a session is active.
    pub async fn current_epoch(&self) -> Option<Epoch> {
        let state = self.state.read().await;
        state.active.then_some(Epoch(state.epoch))
    }

    pub async fn is_current(&self, epoch: Epoch) -> bool {
        self.state.read().await.check(epoch).is_ok()
    }

    /// Start a new session seeded with `focus`.
    pub async fn begin(&self, focus: Node) -> Epoch {
        let mut state = self.state.write().await;
        state.epoch += 1;
        state.active = true;
        state.store.clear();
        state.store.merge_node(focus.clone());
        let id = focus.id.clone();
        state.stack = NavigationStack::seeded(focus);
        let epoch = Epoch(state.epoch);
        drop(state);

        debug!(%epoch, focus = %id, "Graph seeded");
        self.emit(GraphEvent::Seeded { epoch, focus: id });
        epoch
    }

    /// End the current session: invalidate its epoch and empty everything.
    pub async fn end(&self) -> Epoch {
        let mut state = self.state.write().await;
        state.epoch += 1;
        state.active = false;
        state.store.clear();
        state.stack.clear();
        let epoch = Epoch(state.epoch);
        drop(state);

        self.emit(GraphEvent::Cleared { epoch });
        epoch
    }

    /// Run `f` against the latest store, if `epoch` is still current.
    ///
    /// The check and the mutation happen under one write lock, so `f`
    /// always sees the state it is writing to.
    pub async fn apply<R>(&self, epoch: Epoch, f: impl FnOnce(&mut GraphStore) -> R) -> Result<R> {
        let mut state = self.state.write().await;
        state.check(epoch)?;
        let before = state.store.revision();
        let out = f(&mut state.store);
        let revision = state.store.revision();
        drop(state);

        if revision != before {
            trace!(%epoch, revision, "Graph updated");
            self.emit(GraphEvent::Updated { epoch, revision });
        }
        Ok(out)
    }

    /// Move the navigation stack and prune the store in one step.
    ///
    /// `node` is refreshed from the store when present so the stack holds
    /// the latest profile data.
    pub async fn navigate(&self, epoch: Epoch, node: Node) -> Result<Navigation> {
        let mut state = self.state.write().await;
        state.check(epoch)?;

        let selected = state.store.node(&node.id).cloned().unwrap_or(node);
        let GraphState { store, stack, .. } = &mut *state;
        let transition = stack.select(selected);
        let pruned = stack.apply_prune(&transition, store);
        let top = stack.top().map(|n| n.id.clone()).ok_or(Error::NoSession)?;
        let needs_sync = transition != Transition::Noop && !store.has_outgoing_edges(&top);
        drop(state);

        if transition != Transition::Noop {
            debug!(
                %epoch,
                transition = transition.name(),
                top = %top,
                nodes_removed = pruned.nodes_removed,
                edges_removed = pruned.edges_removed,
                "Navigated"
            );
            self.emit(GraphEvent::Navigated {
                epoch,
                transition: transition.name(),
                nodes_removed: pruned.nodes_removed,
                edges_removed: pruned.edges_removed,
            });
        }

        Ok(Navigation {
            transition,
            pruned,
            top,
            needs_sync,
        })
    }

    /// Record a renderer-assigned position. Returns false for unknown nodes.
    pub async fn set_position(&self, id: &IdentityKey, position: Position) -> bool {
        self.state.write().await.store.set_position(id, position)
    }

    /// Read from the store without mutating it.
    pub async fn read<R>(&self, f: impl FnOnce(&GraphStore) -> R) -> R {
        f(&self.state.read().await.store)
    }

    pub async fn snapshot(&self) -> Graph {
        self.state.read().await.store.snapshot()
    }

    pub async fn stack(&self) -> Vec<Node> {
        self.state.read().await.stack.entries().to_vec()
    }

    /// Focus identity of the active session.
    pub async fn root(&self) -> Option<IdentityKey> {
        let state = self.state.read().await;
        if !state.active {
            return None;
        }
        state.stack.root().map(|n| n.id.clone())
    }
}
