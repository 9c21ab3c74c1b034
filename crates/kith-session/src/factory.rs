//! Identity node factory.
//!
//! Builds the [`Node`] for an identity from whatever is known about it:
//! a cached profile if there is one, otherwise a single profile fetch,
//! otherwise a label derived from the key itself. Colour never depends
//! on any of that, only on the key.

use std::sync::Arc;
use std::time::Duration;

use kith_graph::{IdentityKey, Node};
use tracing::{debug, warn};

use crate::cache::ProfileCache;
use crate::error::Error;
use crate::source::ProfileSource;

#[derive(Clone)]
pub struct NodeFactory {
    source: Arc<dyn ProfileSource>,
    cache: ProfileCache,
    timeout: Duration,
}

impl NodeFactory {
    pub fn new(source: Arc<dyn ProfileSource>, cache: ProfileCache, timeout: Duration) -> Self {
        Self {
            source,
            cache,
            timeout,
        }
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    /// Node for `id`, fetching its profile on a cache miss.
    ///
    /// Never fails: an unreachable or malformed profile yields a node
    /// labelled with the short key.
    pub async fn make_node(&self, id: &IdentityKey, is_focus: bool) -> Node {
        if let Some(profile) = self.cache.get(id).await {
            return Node::from_profile(id.clone(), profile).with_focus(is_focus);
        }

        let fetched = match tokio::time::timeout(self.timeout, self.source.fetch_profile(id)).await {
            Ok(Ok(raw)) => raw.decode(),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::FetchTimeout(self.timeout)),
        };

        match fetched {
            Ok(profile) => {
                debug!(identity = %id, "Resolved profile");
                self.cache.insert(id.clone(), profile.clone()).await;
                Node::from_profile(id.clone(), profile).with_focus(is_focus)
            }
            Err(e) => {
                warn!(identity = %id, error = %e, "Profile unavailable, using fallback label");
                Node::fallback(id.clone()).with_focus(is_focus)
            }
        }
    }

    /// Node for `id` from the cache only: enriched on a hit, a loading
    /// placeholder on a miss. Never touches the network.
    pub async fn cached_or_placeholder(&self, id: &IdentityKey) -> Node {
        match self.cache.get(id).await {
            Some(profile) => Node::from_profile(id.clone(), profile),
            None => Node::placeholder(id.clone()),
        }
    }
}

impl std::fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFactory").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}
