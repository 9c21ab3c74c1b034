//! Trust score pipeline.
//!
//! Scores are computed remotely from a root identity's point of view and
//! attached to nodes as `trust_score`. A score that could not be obtained
//! stays absent, never zero, so "unknown" and "untrusted" remain
//! distinguishable.
//!
//! Lookup order for a root: skip if a fetch is already running, skip if
//! it was fetched within the refresh window, use the persisted cache if
//! fresh, and only then call the scorer.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock as StdRwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use kith_graph::{sanitize_score, IdentityKey, NodeUpdate};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::TrustScoreCache;
use crate::error::{Error, Result};
use crate::graph::{Epoch, SharedGraph};
use crate::inflight::{FetchOutcome, InFlight};
use crate::source::TrustScorer;
use crate::status::{Pipeline, StatusBoard};

/// Where a set of scores came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreOrigin {
    Cache,
    Remote,
    /// The scorer failed or timed out; nothing was applied.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrustReport {
    pub root: IdentityKey,
    pub origin: ScoreOrigin,
    /// Valid scores known after the load.
    pub scores: usize,
    /// Scores dropped as NaN or out of range.
    pub rejected: usize,
    /// Nodes in the store whose score changed.
    pub applied: usize,
}

#[derive(Debug, Default)]
struct BookState {
    epoch: Option<Epoch>,
    scores: HashMap<IdentityKey, f64>,
}

/// Latest known scores for the active session.
///
/// Synchronous so it can be read and written inside a graph update,
/// which keeps the book and the nodes' `trust_score` in step. Writes
/// carry the epoch they were started under and are dropped if the
/// session has moved on.
#[derive(Debug, Clone, Default)]
pub struct ScoreBook {
    inner: Arc<StdRwLock<BookState>>,
}

impl ScoreBook {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BookState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BookState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forget everything and accept writes for `epoch` only.
    pub fn reset(&self, epoch: Option<Epoch>) {
        let mut inner = self.write();
        inner.epoch = epoch;
        inner.scores.clear();
    }

    /// Replace the known scores. Returns false if `epoch` is stale.
    pub fn replace(&self, epoch: Epoch, scores: HashMap<IdentityKey, f64>) -> bool {
        let mut inner = self.write();
        if inner.epoch != Some(epoch) {
            return false;
        }
        inner.scores = scores;
        true
    }

    pub fn get(&self, id: &IdentityKey) -> Option<f64> {
        self.read().scores.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.read().scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().scores.is_empty()
    }
}

#[derive(Clone)]
pub struct TrustPipeline {
    graph: SharedGraph,
    scorer: Arc<dyn TrustScorer>,
    cache: TrustScoreCache,
    book: ScoreBook,
    status: StatusBoard,
    inflight: InFlight,
    recent: Arc<RwLock<HashMap<IdentityKey, Instant>>>,
    timeout: Duration,
    refresh_window: Duration,
}

impl TrustPipeline {
    pub fn new(
        graph: SharedGraph,
        scorer: Arc<dyn TrustScorer>,
        cache: TrustScoreCache,
        book: ScoreBook,
        status: StatusBoard,
        timeout: Duration,
        refresh_window: Duration,
    ) -> Self {
        Self {
            graph,
            scorer,
            cache,
            book,
            status,
            inflight: InFlight::new(),
            recent: Arc::new(RwLock::new(HashMap::new())),
            timeout,
            refresh_window,
        }
    }

    pub fn book(&self) -> &ScoreBook {
        &self.book
    }

    /// Score for `id` from the active session, if one is known.
    pub fn trust_score(&self, id: &IdentityKey) -> Option<f64> {
        self.book.get(id)
    }

    /// Load scores for `root` and attach them to nodes already in the store.
    ///
    /// Scorer failures are absorbed: the outcome is `Completed` with
    /// `ScoreOrigin::Unavailable`, and existing scores are left alone.
    /// Only a stale session is returned as an error.
    pub async fn load_trust_scores(&self, epoch: Epoch, root: &IdentityKey) -> Result<FetchOutcome<TrustReport>> {
        let Some(_guard) = self.inflight.try_begin(root) else {
            debug!(root = %root, "Trust scores already loading, skipping");
            return Ok(FetchOutcome::AlreadyInFlight);
        };

        if let Some(at) = self.recent.read().await.get(root) {
            if at.elapsed() < self.refresh_window {
                debug!(root = %root, "Trust scores fetched recently, skipping");
                return Ok(FetchOutcome::RecentlyFetched);
            }
        }

        let cached = self.cache.get_cached_trust_scores(root);
        if !cached.is_empty() {
            debug!(root = %root, count = cached.len(), "Using cached trust scores");
            let report = self.install(epoch, root, cached, ScoreOrigin::Cache, 0).await?;
            self.mark_recent(root).await;
            return Ok(FetchOutcome::Completed(report));
        }

        self.status.begin(epoch, Pipeline::Trust, root).await;
        let fetched = match tokio::time::timeout(self.timeout, self.scorer.fetch_trust_scores(root)).await {
            Ok(result) => result,
            Err(_) => Err(Error::FetchTimeout(self.timeout)),
        };

        let raw = match fetched {
            Ok(raw) => raw,
            Err(e) => {
                // Degrade to "no score" without surfacing a per-identity error.
                warn!(root = %root, error = %e, "Trust scores unavailable");
                self.status.cancel(epoch, Pipeline::Trust, root).await;
                return Ok(FetchOutcome::Completed(TrustReport {
                    root: root.clone(),
                    origin: ScoreOrigin::Unavailable,
                    scores: self.book.len(),
                    rejected: 0,
                    applied: 0,
                }));
            }
        };

        let (scores, rejected) = validate(raw);
        if let Err(e) = self.cache.cache_trust_scores(root, &scores) {
            warn!(root = %root, error = %e, "Failed to persist trust scores");
        }

        let result = self.install(epoch, root, scores, ScoreOrigin::Remote, rejected).await;
        self.status.finish(epoch, Pipeline::Trust, root).await;
        let report = result?;
        self.mark_recent(root).await;
        info!(root = %root, scores = report.scores, applied = report.applied, "Loaded trust scores");
        Ok(FetchOutcome::Completed(report))
    }

    async fn install(
        &self,
        epoch: Epoch,
        root: &IdentityKey,
        scores: HashMap<IdentityKey, f64>,
        origin: ScoreOrigin,
        rejected: usize,
    ) -> Result<TrustReport> {
        let count = scores.len();
        let book = self.book.clone();
        let applied = self
            .graph
            .apply(epoch, move |store| {
                let updates: Vec<NodeUpdate> = scores
                    .iter()
                    .map(|(id, score)| NodeUpdate::trust_score(id.clone(), *score))
                    .collect();
                if !book.replace(epoch, scores) {
                    return None;
                }
                let applied = updates
                    .into_iter()
                    .filter_map(|u| store.merge_existing(u))
                    .filter(|m| m.changed())
                    .count();
                Some(applied)
            })
            .await?
            .ok_or(Error::StaleSession)?;
        Ok(TrustReport {
            root: root.clone(),
            origin,
            scores: count,
            rejected,
            applied,
        })
    }

    async fn mark_recent(&self, root: &IdentityKey) {
        self.recent.write().await.insert(root.clone(), Instant::now());
    }

    /// Forget refresh timestamps. Called when the session changes.
    pub async fn reset(&self) {
        self.recent.write().await.clear();
    }
}

impl std::fmt::Debug for TrustPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustPipeline")
            .field("timeout", &self.timeout)
            .field("refresh_window", &self.refresh_window)
            .finish_non_exhaustive()
    }
}

/// Keep scores in [0, 1]; drop the rest.
fn validate(raw: HashMap<IdentityKey, f64>) -> (HashMap<IdentityKey, f64>, usize) {
    let mut rejected = 0;
    let scores = raw
        .into_iter()
        .filter_map(|(id, score)| match sanitize_score(score) {
            Some(s) if s == score => Some((id, s)),
            _ => {
                warn!(identity = %id, score, "Skipping invalid trust score");
                rejected += 1;
                None
            }
        })
        .collect();
    (scores, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Call, MemorySource};
    use kith_graph::Node;
    use std::time::SystemTime;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn key(s: &str) -> IdentityKey {
        IdentityKey::new(s)
    }

    struct Harness {
        graph: SharedGraph,
        epoch: Epoch,
        source: Arc<MemorySource>,
        cache: TrustScoreCache,
        pipeline: TrustPipeline,
    }

    async fn harness(window: Duration) -> Harness {
        let graph = SharedGraph::new(32);
        let epoch = graph.begin(Node::fallback(key("root")).with_focus(true)).await;
        graph
            .apply(epoch, |s| s.merge_nodes([Node::placeholder(key("a")), Node::placeholder(key("b"))]))
            .await
            .unwrap();
        let source = Arc::new(MemorySource::new());
        let cache = TrustScoreCache::in_memory(WEEK);
        let book = ScoreBook::new();
        book.reset(Some(epoch));
        let status = StatusBoard::new();
        status.reset(Some(epoch)).await;
        let pipeline = TrustPipeline::new(
            graph.clone(),
            source.clone(),
            cache.clone(),
            book,
            status,
            Duration::from_millis(200),
            window,
        );
        Harness {
            graph,
            epoch,
            source,
            cache,
            pipeline,
        }
    }

    fn scores(pairs: &[(&str, f64)]) -> HashMap<IdentityKey, f64> {
        pairs.iter().map(|(k, v)| (key(k), *v)).collect()
    }

    #[tokio::test]
    async fn remote_scores_are_validated_persisted_and_applied() {
        let h = harness(Duration::from_secs(300)).await;
        h.source
            .set_trust_scores(&key("root"), scores(&[("a", 0.8), ("b", f64::NAN), ("c", 3.0)]));

        let report = h
            .pipeline
            .load_trust_scores(h.epoch, &key("root"))
            .await
            .unwrap()
            .completed()
            .unwrap();

        assert_eq!(report.origin, ScoreOrigin::Remote);
        assert_eq!(report.scores, 1);
        assert_eq!(report.rejected, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(h.pipeline.trust_score(&key("a")), Some(0.8));
        assert_eq!(h.pipeline.trust_score(&key("b")), None);

        let snapshot = h.graph.snapshot().await;
        assert_eq!(snapshot.node(&key("a")).unwrap().trust_score, Some(0.8));
        assert_eq!(snapshot.node(&key("b")).unwrap().trust_score, None);
        assert_eq!(h.cache.get_cached_trust_scores(&key("root")), scores(&[("a", 0.8)]));
    }

    #[tokio::test]
    async fn fresh_cache_skips_remote_call() {
        let h = harness(Duration::from_secs(300)).await;
        h.cache
            .cache_trust_scores(&key("root"), &scores(&[("b", 0.4)]))
            .unwrap();

        let report = h
            .pipeline
            .load_trust_scores(h.epoch, &key("root"))
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.origin, ScoreOrigin::Cache);
        assert_eq!(h.source.calls(Call::FetchTrustScores), 0);
        assert_eq!(h.pipeline.trust_score(&key("b")), Some(0.4));
    }

    #[tokio::test]
    async fn expired_cache_goes_remote() {
        let h = harness(Duration::from_secs(300)).await;
        let old = SystemTime::now() - WEEK - Duration::from_secs(60);
        h.cache
            .cache_trust_scores_at(&key("root"), &scores(&[("b", 0.4)]), old)
            .unwrap();
        h.source.set_trust_scores(&key("root"), scores(&[("a", 0.1)]));

        let report = h
            .pipeline
            .load_trust_scores(h.epoch, &key("root"))
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.origin, ScoreOrigin::Remote);
        assert_eq!(h.pipeline.trust_score(&key("b")), None);
        assert_eq!(h.pipeline.trust_score(&key("a")), Some(0.1));
    }

    #[tokio::test]
    async fn refresh_window_skips_second_load() {
        let h = harness(Duration::from_secs(300)).await;
        h.source.set_trust_scores(&key("root"), scores(&[("a", 0.5)]));

        assert!(h.pipeline.load_trust_scores(h.epoch, &key("root")).await.unwrap().is_completed());
        let second = h.pipeline.load_trust_scores(h.epoch, &key("root")).await.unwrap();
        assert_eq!(second, FetchOutcome::RecentlyFetched);
        assert_eq!(h.source.calls(Call::FetchTrustScores), 1);
    }

    #[tokio::test]
    async fn failure_leaves_scores_absent_and_allows_retry() {
        let h = harness(Duration::from_secs(300)).await;
        h.source.fail(Call::FetchTrustScores, &key("root"));

        let report = h
            .pipeline
            .load_trust_scores(h.epoch, &key("root"))
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.origin, ScoreOrigin::Unavailable);
        assert_eq!(h.pipeline.trust_score(&key("a")), None);
        assert_eq!(h.graph.snapshot().await.node(&key("a")).unwrap().trust_score, None);

        // A failure does not start the refresh window.
        h.source.clear_failures();
        h.source.set_trust_scores(&key("root"), scores(&[("a", 0.5)]));
        let retry = h.pipeline.load_trust_scores(h.epoch, &key("root")).await.unwrap();
        assert!(retry.is_completed());
        assert_eq!(h.pipeline.trust_score(&key("a")), Some(0.5));
    }

    #[tokio::test]
    async fn concurrent_loads_fetch_once() {
        let h = harness(Duration::ZERO).await;
        h.source.set_trust_scores(&key("root"), scores(&[("a", 0.5)]));
        h.source.set_delay(Duration::from_millis(50));

        let root = key("root");
        let (first, second) = tokio::join!(
            h.pipeline.load_trust_scores(h.epoch, &root),
            h.pipeline.load_trust_scores(h.epoch, &root),
        );
        let outcomes = [first.unwrap(), second.unwrap()];
        assert_eq!(outcomes.iter().filter(|o| o.is_completed()).count(), 1);
        assert!(outcomes.contains(&FetchOutcome::AlreadyInFlight));
        assert_eq!(h.source.calls(Call::FetchTrustScores), 1);
    }

    #[tokio::test]
    async fn stale_epoch_is_not_applied() {
        let h = harness(Duration::from_secs(300)).await;
        h.source.set_trust_scores(&key("root"), scores(&[("a", 0.5)]));
        h.graph.end().await;

        let result = h.pipeline.load_trust_scores(h.epoch, &key("root")).await;
        assert!(matches!(result, Err(Error::StaleSession)));
        assert_eq!(h.pipeline.trust_score(&key("a")), None);
    }
}
