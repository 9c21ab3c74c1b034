//! Connection sync pipeline.
//!
//! Turns an identity's follow list into graph structure. Placeholder
//! nodes and their follow edges are written in one atomic store update,
//! so an edge is never visible before its target node. Profile
//! enrichment of those placeholders runs afterwards through the
//! [`ProfileBatcher`].
//!
//! A failed list fetch leaves the store untouched. A timed-out fetch is
//! treated as an empty partial result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kith_graph::{Edge, IdentityKey, Node};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::batch::{EnrichReport, ProfileBatcher};
use crate::error::{Error, Result};
use crate::factory::NodeFactory;
use crate::graph::{Epoch, SharedGraph};
use crate::inflight::{FetchOutcome, InFlight};
use crate::source::ConnectionSource;
use crate::status::{Pipeline, StatusBoard};
use crate::trust::ScoreBook;

/// What one sync did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub focus: IdentityKey,
    /// Distinct followed identities in the fetched list.
    pub discovered: usize,
    pub nodes_added: usize,
    pub edges_added: usize,
    /// Identities dropped by the fan-out cap.
    pub capped: usize,
    /// The list fetch timed out and an empty list was used.
    pub timed_out: bool,
    /// The focus node had been pruned by the time the list arrived.
    pub focus_missing: bool,
    pub enrichment: Option<EnrichReport>,
}

#[derive(Clone)]
pub struct ConnectionSync {
    graph: SharedGraph,
    source: Arc<dyn ConnectionSource>,
    factory: NodeFactory,
    batcher: ProfileBatcher,
    scores: ScoreBook,
    status: StatusBoard,
    inflight: InFlight,
    max_connections: usize,
    timeout: Duration,
}

impl ConnectionSync {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: SharedGraph,
        source: Arc<dyn ConnectionSource>,
        factory: NodeFactory,
        batcher: ProfileBatcher,
        scores: ScoreBook,
        status: StatusBoard,
        max_connections: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            graph,
            source,
            factory,
            batcher,
            scores,
            status,
            inflight: InFlight::new(),
            max_connections,
            timeout,
        }
    }

    /// Whether a sync for `focus` is currently running.
    pub fn is_syncing(&self, focus: &IdentityKey) -> bool {
        self.inflight.contains(focus)
    }

    /// Fetch `focus`'s follow list and merge it into the graph.
    ///
    /// A second call for the same identity while one is running returns
    /// `AlreadyInFlight` without fetching.
    pub async fn sync_connections(&self, epoch: Epoch, focus: &IdentityKey) -> Result<FetchOutcome<SyncReport>> {
        let Some(_guard) = self.inflight.try_begin(focus) else {
            debug!(focus = %focus, "Connection sync already running, skipping");
            return Ok(FetchOutcome::AlreadyInFlight);
        };

        self.status.begin(epoch, Pipeline::Connections, focus).await;
        let fetched = tokio::time::timeout(self.timeout, self.source.fetch_connections(focus)).await;
        let (follows, timed_out) = match fetched {
            Ok(Ok(follows)) => (follows, false),
            Ok(Err(e)) => {
                warn!(focus = %focus, error = %e, "Connection list fetch failed");
                self.status.fail(epoch, Pipeline::Connections, focus, &e).await;
                return Err(e);
            }
            Err(_) => {
                warn!(focus = %focus, timeout = ?self.timeout, "Connection list fetch timed out, continuing with nothing");
                (Vec::new(), true)
            }
        };

        let mut report = match self.merge_connections(epoch, focus, follows).await {
            Ok(report) => report,
            Err(e) => {
                self.status.cancel(epoch, Pipeline::Connections, focus).await;
                return Err(e);
            }
        };
        report.timed_out = timed_out;
        if timed_out {
            self.status.cancel(epoch, Pipeline::Connections, focus).await;
        } else {
            self.status.finish(epoch, Pipeline::Connections, focus).await;
        }

        report.enrichment = self.enrich(epoch, focus).await?;
        Ok(FetchOutcome::Completed(report))
    }

    /// Keep `focus`'s follow edges current for as long as the task runs.
    ///
    /// Every delivered list goes through the same merge and enrichment
    /// path as [`sync_connections`](Self::sync_connections). The task ends
    /// when the feed closes or the session moves on; aborting the handle
    /// stops the subscription.
    pub async fn watch(&self, epoch: Epoch, focus: IdentityKey) -> Result<JoinHandle<()>> {
        let mut sub = match self.source.subscribe_connections(&focus).await {
            Ok(sub) => sub,
            Err(e) => {
                self.status.fail(epoch, Pipeline::Connections, &focus, &e).await;
                return Err(e);
            }
        };

        let this = self.clone();
        Ok(tokio::spawn(async move {
            debug!(focus = %focus, %epoch, "Watching connections");
            while let Some(follows) = sub.next().await {
                let merged = match this.merge_connections(epoch, &focus, follows).await {
                    Ok(report) => report,
                    Err(e) if e.is_stale() => break,
                    Err(e) => {
                        warn!(focus = %focus, error = %e, "Dropped connection update");
                        continue;
                    }
                };
                this.status.finish(epoch, Pipeline::Connections, &focus).await;
                debug!(
                    focus = %focus,
                    nodes_added = merged.nodes_added,
                    edges_added = merged.edges_added,
                    "Applied connection update"
                );
                if let Err(e) = this.enrich(epoch, &focus).await {
                    if e.is_stale() {
                        break;
                    }
                    warn!(focus = %focus, error = %e, "Profile enrichment failed");
                }
            }
            sub.stop();
            debug!(focus = %focus, %epoch, "Connection watch ended");
        }))
    }

    /// Merge one follow list: missing nodes first, then edges, in a single
    /// store update.
    async fn merge_connections(&self, epoch: Epoch, focus: &IdentityKey, follows: Vec<IdentityKey>) -> Result<SyncReport> {
        let mut seen = HashSet::new();
        let mut follows: Vec<IdentityKey> = follows
            .into_iter()
            .filter(|id| id != focus && !id.as_str().is_empty())
            .filter(|id| seen.insert(id.clone()))
            .collect();

        let discovered = follows.len();
        let capped = discovered.saturating_sub(self.max_connections);
        if capped > 0 {
            info!(focus = %focus, discovered, kept = self.max_connections, dropped = capped, "Connection list capped");
            follows.truncate(self.max_connections);
        }

        let mut candidates: Vec<Node> = Vec::with_capacity(follows.len());
        for id in &follows {
            candidates.push(self.factory.cached_or_placeholder(id).await);
        }

        let focus_key = focus.clone();
        let scores = self.scores.clone();
        let merged = self
            .graph
            .apply(epoch, move |store| {
                if !store.contains_node(&focus_key) {
                    return None;
                }
                let mut nodes_added = 0;
                for node in candidates {
                    if !store.contains_node(&node.id) {
                        // Read under the graph lock so a concurrent trust load
                        // either sees this node or is seen by it.
                        let score = scores.get(&node.id);
                        store.merge_node(node.with_trust_score(score));
                        nodes_added += 1;
                    }
                }
                let edges_added = follows
                    .into_iter()
                    .map(|id| store.merge_edge(Edge::follows(focus_key.clone(), id)))
                    .filter(|m| m.changed())
                    .count();
                Some((nodes_added, edges_added))
            })
            .await?;

        let mut report = SyncReport {
            focus: focus.clone(),
            discovered,
            capped,
            ..Default::default()
        };
        match merged {
            Some((nodes_added, edges_added)) => {
                report.nodes_added = nodes_added;
                report.edges_added = edges_added;
            }
            None => {
                debug!(focus = %focus, "Focus no longer in graph, skipping connection merge");
                report.focus_missing = true;
            }
        }
        Ok(report)
    }

    /// Enrich every placeholder among `focus` and its follows.
    async fn enrich(&self, epoch: Epoch, focus: &IdentityKey) -> Result<Option<EnrichReport>> {
        let pending: Vec<IdentityKey> = self
            .graph
            .read(|store| {
                let mut keys: Vec<IdentityKey> = store
                    .edges()
                    .filter(|e| e.is_outgoing_from(focus))
                    .filter_map(|e| e.other(focus).cloned())
                    .chain(std::iter::once(focus.clone()))
                    .filter(|id| store.node(id).is_some_and(Node::is_placeholder))
                    .collect();
                keys.sort();
                keys.dedup();
                keys
            })
            .await;
        if pending.is_empty() {
            return Ok(None);
        }

        self.status.begin(epoch, Pipeline::Profiles, focus).await;
        let result = self.batcher.enrich(epoch, pending).await;
        match &result {
            Ok(_) => self.status.finish(epoch, Pipeline::Profiles, focus).await,
            Err(Error::StaleSession) => self.status.cancel(epoch, Pipeline::Profiles, focus).await,
            Err(e) => self.status.fail(epoch, Pipeline::Profiles, focus, e).await,
        }
        result.map(Some)
    }
}

impl std::fmt::Debug for ConnectionSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSync")
            .field("max_connections", &self.max_connections)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
