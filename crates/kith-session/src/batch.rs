//! Batched profile enrichment.
//!
//! Placeholder nodes are upgraded to full profiles as profile events
//! arrive. Updates are accumulated and written to the store together,
//! flushing when the batch fills or the flush interval elapses, whichever
//! comes first, so a large follow list produces a handful of graph
//! updates rather than one per profile.
//!
//! ```text
//! subscribe_profiles(keys) ──► decode ──► cache ──► pending
//!                                                     │
//!                          len >= batch_size ─────────┤
//!                          flush interval tick ───────┼──► merge_existing (one write)
//!                          stream closed / timeout ───┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use kith_graph::{IdentityKey, NodeUpdate};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::cache::ProfileCache;
use crate::config::MIN_FLUSH_INTERVAL;
use crate::error::Result;
use crate::graph::{Epoch, SharedGraph};
use crate::source::{ProfileSource, RawProfile};

/// Counts from one enrichment run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub requested: usize,
    pub resolved: usize,
    pub decode_failures: usize,
    pub flushes: usize,
    /// The drain stopped at the timeout rather than at end of stream.
    pub timed_out: bool,
}

#[derive(Clone)]
pub struct ProfileBatcher {
    graph: SharedGraph,
    source: Arc<dyn ProfileSource>,
    cache: ProfileCache,
    batch_size: usize,
    flush_interval: Duration,
    drain_timeout: Duration,
}

impl ProfileBatcher {
    pub fn new(
        graph: SharedGraph,
        source: Arc<dyn ProfileSource>,
        cache: ProfileCache,
        batch_size: usize,
        flush_interval: Duration,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            source,
            cache,
            batch_size: batch_size.max(1),
            flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
            drain_timeout,
        }
    }

    /// Resolve profiles for `keys` and merge them over existing nodes.
    ///
    /// Keys whose profile never arrives keep their placeholder. Returns
    /// `StaleSession` if the session ended mid-run; whatever was flushed
    /// before that stays.
    pub async fn enrich(&self, epoch: Epoch, keys: Vec<IdentityKey>) -> Result<EnrichReport> {
        let mut report = EnrichReport {
            requested: keys.len(),
            ..Default::default()
        };
        if keys.is_empty() {
            return Ok(report);
        }

        match self.source.subscribe_profiles(&keys).await {
            Ok(sub) => self.drain(epoch, sub, &mut report).await?,
            Err(e) => {
                debug!(error = %e, count = keys.len(), "Profile subscription unavailable, fetching individually");
                self.fetch_each(epoch, keys, &mut report).await?;
            }
        }

        debug!(
            %epoch,
            requested = report.requested,
            resolved = report.resolved,
            flushes = report.flushes,
            timed_out = report.timed_out,
            "Profile enrichment finished"
        );
        Ok(report)
    }

    async fn drain(
        &self,
        epoch: Epoch,
        mut sub: crate::source::Subscription<RawProfile>,
        report: &mut EnrichReport,
    ) -> Result<()> {
        let mut pending: Vec<NodeUpdate> = Vec::with_capacity(self.batch_size);
        let mut ticker = interval_at(Instant::now() + self.flush_interval, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let deadline = sleep(self.drain_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                item = sub.next() => match item {
                    Some(raw) => {
                        if let Some(update) = self.decode(raw, report).await {
                            pending.push(update);
                        }
                        if pending.len() >= self.batch_size {
                            self.flush(epoch, &mut pending, report).await?;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        self.flush(epoch, &mut pending, report).await?;
                    }
                }
                _ = &mut deadline => {
                    warn!(%epoch, resolved = report.resolved, requested = report.requested, "Profile drain timed out, keeping partial results");
                    report.timed_out = true;
                    break;
                }
            }
        }

        sub.stop();
        self.flush(epoch, &mut pending, report).await
    }

    async fn fetch_each(&self, epoch: Epoch, keys: Vec<IdentityKey>, report: &mut EnrichReport) -> Result<()> {
        let source = self.source.clone();
        let timeout = self.drain_timeout;
        let mut results = stream::iter(keys)
            .map(|id| {
                let source = source.clone();
                async move {
                    let fetched = tokio::time::timeout(timeout, source.fetch_profile(&id)).await;
                    (id, fetched)
                }
            })
            .buffer_unordered(self.batch_size);

        let mut pending = Vec::with_capacity(self.batch_size);
        while let Some((id, fetched)) = results.next().await {
            match fetched {
                Ok(Ok(raw)) => {
                    if let Some(update) = self.decode(raw, report).await {
                        pending.push(update);
                    }
                }
                Ok(Err(e)) => debug!(identity = %id, error = %e, "Profile fetch failed, keeping placeholder"),
                Err(_) => {
                    debug!(identity = %id, "Profile fetch timed out, keeping placeholder");
                    report.timed_out = true;
                }
            }
            if pending.len() >= self.batch_size {
                self.flush(epoch, &mut pending, report).await?;
            }
        }
        self.flush(epoch, &mut pending, report).await
    }

    async fn decode(&self, raw: RawProfile, report: &mut EnrichReport) -> Option<NodeUpdate> {
        match raw.decode() {
            Ok(profile) => {
                self.cache.insert(raw.identity.clone(), profile.clone()).await;
                Some(NodeUpdate::profile(raw.identity, profile))
            }
            Err(e) => {
                warn!(identity = %raw.identity, error = %e, "Skipping malformed profile");
                report.decode_failures += 1;
                None
            }
        }
    }

    async fn flush(&self, epoch: Epoch, pending: &mut Vec<NodeUpdate>, report: &mut EnrichReport) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        let count = batch.len();
        let merged = self
            .graph
            .apply(epoch, move |store| {
                batch
                    .into_iter()
                    .filter_map(|update| store.merge_existing(update))
                    .count()
            })
            .await?;
        trace!(%epoch, count, merged, "Flushed profile batch");
        report.resolved += merged;
        report.flushes += 1;
        Ok(())
    }
}

impl std::fmt::Debug for ProfileBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProfileBatcher")
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("drain_timeout", &self.drain_timeout)
            .finish_non_exhaustive()
    }
}
