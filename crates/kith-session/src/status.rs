//! Loading and error flags for the UI layer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use kith_graph::IdentityKey;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::trace;

use crate::error::Error;
use crate::graph::Epoch;

/// The pipelines that report status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    Connections,
    Profiles,
    Notes,
    Trust,
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connections => write!(f, "connections"),
            Self::Profiles => write!(f, "profiles"),
            Self::Notes => write!(f, "notes"),
            Self::Trust => write!(f, "trust"),
        }
    }
}

/// Flags for one pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub loading: BTreeSet<IdentityKey>,
    pub errors: BTreeMap<IdentityKey, String>,
}

/// Point-in-time copy of every flag.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub pipelines: BTreeMap<Pipeline, PipelineStatus>,
    /// Sticky transport error, kept until a later fetch succeeds.
    pub connectivity: Option<String>,
}

impl StatusSnapshot {
    pub fn is_loading(&self, pipeline: Pipeline, id: &IdentityKey) -> bool {
        self.pipelines
            .get(&pipeline)
            .is_some_and(|p| p.loading.contains(id))
    }

    pub fn error(&self, pipeline: Pipeline, id: &IdentityKey) -> Option<&str> {
        self.pipelines
            .get(&pipeline)
            .and_then(|p| p.errors.get(id))
            .map(String::as_str)
    }
}

#[derive(Debug, Default)]
struct BoardState {
    epoch: Option<Epoch>,
    flags: StatusSnapshot,
}

impl BoardState {
    /// Flags for `epoch`, or `None` once that session has ended.
    fn flags_for(&mut self, epoch: Epoch) -> Option<&mut StatusSnapshot> {
        if self.epoch == Some(epoch) {
            Some(&mut self.flags)
        } else {
            trace!(%epoch, "Ignoring status change from an ended session");
            None
        }
    }
}

/// Shared, cloneable status board.
///
/// Every change names the epoch it belongs to, so a fetch that completes
/// after logout cannot mark anything in the next session.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<BoardState>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every flag and accept changes for `epoch` only.
    pub async fn reset(&self, epoch: Option<Epoch>) {
        let mut inner = self.inner.write().await;
        inner.epoch = epoch;
        inner.flags = StatusSnapshot::default();
    }

    /// Mark `id` loading and clear its previous error.
    pub async fn begin(&self, epoch: Epoch, pipeline: Pipeline, id: &IdentityKey) {
        let mut inner = self.inner.write().await;
        if let Some(flags) = inner.flags_for(epoch) {
            let status = flags.pipelines.entry(pipeline).or_default();
            status.loading.insert(id.clone());
            status.errors.remove(id);
        }
    }

    /// Mark `id` done. A success on the connection pipeline also clears
    /// the connectivity banner.
    pub async fn finish(&self, epoch: Epoch, pipeline: Pipeline, id: &IdentityKey) {
        let mut inner = self.inner.write().await;
        if let Some(flags) = inner.flags_for(epoch) {
            flags.pipelines.entry(pipeline).or_default().loading.remove(id);
            if pipeline == Pipeline::Connections {
                flags.connectivity = None;
            }
        }
    }

    /// Mark `id` failed with `error`.
    pub async fn fail(&self, epoch: Epoch, pipeline: Pipeline, id: &IdentityKey, error: &Error) {
        let mut inner = self.inner.write().await;
        if let Some(flags) = inner.flags_for(epoch) {
            let status = flags.pipelines.entry(pipeline).or_default();
            status.loading.remove(id);
            status.errors.insert(id.clone(), error.to_string());
            if error.is_connectivity() {
                flags.connectivity = Some(error.to_string());
            }
        }
    }

    /// Drop the loading flag without recording success or failure.
    pub async fn cancel(&self, epoch: Epoch, pipeline: Pipeline, id: &IdentityKey) {
        let mut inner = self.inner.write().await;
        if let Some(flags) = inner.flags_for(epoch) {
            flags.pipelines.entry(pipeline).or_default().loading.remove(id);
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        self.inner.read().await.flags.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SharedGraph;
    use kith_graph::Node;

    async fn started(board: &StatusBoard, graph: &SharedGraph, focus: &str) -> Epoch {
        let epoch = graph.begin(Node::fallback(IdentityKey::new(focus))).await;
        board.reset(Some(epoch)).await;
        epoch
    }

    #[tokio::test]
    async fn connectivity_banner_is_sticky_until_success() {
        let graph = SharedGraph::new(16);
        let board = StatusBoard::new();
        let epoch = started(&board, &graph, "u").await;
        let a = IdentityKey::new("a");
        let b = IdentityKey::new("b");

        board.begin(epoch, Pipeline::Connections, &a).await;
        board
            .fail(epoch, Pipeline::Connections, &a, &Error::Connectivity("offline".into()))
            .await;

        // Unrelated pipelines do not clear the banner.
        board.begin(epoch, Pipeline::Notes, &b).await;
        board.finish(epoch, Pipeline::Notes, &b).await;
        let snapshot = board.snapshot().await;
        assert!(snapshot.connectivity.is_some());
        assert!(snapshot.error(Pipeline::Connections, &a).is_some());

        board.begin(epoch, Pipeline::Connections, &a).await;
        assert!(board.snapshot().await.is_loading(Pipeline::Connections, &a));
        board.finish(epoch, Pipeline::Connections, &a).await;

        let snapshot = board.snapshot().await;
        assert!(snapshot.connectivity.is_none());
        assert!(snapshot.error(Pipeline::Connections, &a).is_none());
        assert!(!snapshot.is_loading(Pipeline::Connections, &a));
    }

    #[tokio::test]
    async fn changes_from_an_ended_session_are_ignored() {
        let graph = SharedGraph::new(16);
        let board = StatusBoard::new();
        let old = started(&board, &graph, "u").await;
        let x = IdentityKey::new("x");
        board.begin(old, Pipeline::Notes, &x).await;

        graph.end().await;
        let current = started(&board, &graph, "v").await;
        board
            .fail(old, Pipeline::Notes, &x, &Error::Connectivity("offline".into()))
            .await;
        board.begin(old, Pipeline::Trust, &x).await;

        assert_eq!(board.snapshot().await, StatusSnapshot::default());

        board.begin(current, Pipeline::Trust, &x).await;
        assert!(board.snapshot().await.is_loading(Pipeline::Trust, &x));
    }
}
