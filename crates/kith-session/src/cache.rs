//! Profile and trust-score caches.
//!
//! - [`ProfileCache`]: session-scoped, grows for the life of the session
//! - [`TrustScoreCache`]: persisted through a [`ScoreStore`], entries
//!   older than the configured TTL are treated as absent

use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use kith_graph::{IdentityKey, Profile};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;

/// Profiles resolved during the current session.
#[derive(Debug, Clone, Default)]
pub struct ProfileCache {
    inner: Arc<RwLock<HashMap<IdentityKey, Profile>>>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, id: &IdentityKey) -> Option<Profile> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn insert(&self, id: IdentityKey, profile: Profile) {
        self.inner.write().await.insert(id, profile);
    }

    /// Cached profiles for every key in `ids` that has one.
    pub async fn get_many(&self, ids: &[IdentityKey]) -> HashMap<IdentityKey, Profile> {
        let inner = self.inner.read().await;
        ids.iter()
            .filter_map(|id| inner.get(id).map(|p| (id.clone(), p.clone())))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

/// Trust scores as written to persistent storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedScores {
    /// Identity the scores were computed for.
    pub root: IdentityKey,
    /// Unix seconds at which the scores were saved.
    pub saved_at: u64,
    pub scores: BTreeMap<IdentityKey, f64>,
}

/// Persistent get/set/clear store for trust scores.
pub trait ScoreStore: Send + Sync {
    fn get(&self) -> Result<Option<CachedScores>>;
    fn set(&self, scores: &CachedScores) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Score store that lives only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryScoreStore {
    slot: Mutex<Option<CachedScores>>,
}

impl MemoryScoreStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScoreStore for MemoryScoreStore {
    fn get(&self) -> Result<Option<CachedScores>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set(&self, scores: &CachedScores) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(scores.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Score store backed by a single JSON file.
#[derive(Debug)]
pub struct JsonFileScoreStore {
    path: PathBuf,
}

impl JsonFileScoreStore {
    /// Use `path`, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScoreStore for JsonFileScoreStore {
    fn get(&self) -> Result<Option<CachedScores>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, scores: &CachedScores) -> Result<()> {
        // Write aside and rename so readers never see a half-written file.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(scores)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Expiring trust-score cache over a [`ScoreStore`].
#[derive(Clone)]
pub struct TrustScoreCache {
    store: Arc<dyn ScoreStore>,
    ttl: Duration,
}

impl TrustScoreCache {
    pub fn new(store: Arc<dyn ScoreStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// In-memory cache, mostly for tests.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryScoreStore::new()), ttl)
    }

    /// Persist `scores` for `root`, stamped with the current time.
    pub fn cache_trust_scores(&self, root: &IdentityKey, scores: &HashMap<IdentityKey, f64>) -> Result<()> {
        self.cache_trust_scores_at(root, scores, SystemTime::now())
    }

    pub fn cache_trust_scores_at(
        &self,
        root: &IdentityKey,
        scores: &HashMap<IdentityKey, f64>,
        now: SystemTime,
    ) -> Result<()> {
        let entry = CachedScores {
            root: root.clone(),
            saved_at: unix_secs(now),
            scores: scores.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        };
        self.store.set(&entry)?;
        debug!(root = %root, count = entry.scores.len(), "Cached trust scores");
        Ok(())
    }

    /// Cached scores for `root`, or an empty map when missing or expired.
    pub fn get_cached_trust_scores(&self, root: &IdentityKey) -> HashMap<IdentityKey, f64> {
        self.get_cached_trust_scores_at(root, SystemTime::now())
    }

    pub fn get_cached_trust_scores_at(&self, root: &IdentityKey, now: SystemTime) -> HashMap<IdentityKey, f64> {
        let entry = match self.store.get() {
            Ok(Some(entry)) => entry,
            Ok(None) => return HashMap::new(),
            Err(e) => {
                warn!(error = %e, "Unreadable trust cache, ignoring");
                return HashMap::new();
            }
        };

        if &entry.root != root {
            return HashMap::new();
        }

        let age = unix_secs(now).saturating_sub(entry.saved_at);
        if age > self.ttl.as_secs() {
            debug!(root = %root, age_secs = age, "Trust cache expired");
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear expired trust cache");
            }
            return HashMap::new();
        }

        entry.scores.into_iter().collect()
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }
}

impl std::fmt::Debug for TrustScoreCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustScoreCache").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    fn scores() -> HashMap<IdentityKey, f64> {
        [("a", 0.9), ("b", 0.1)]
            .into_iter()
            .map(|(k, v)| (IdentityKey::new(k), v))
            .collect()
    }

    #[test]
    fn round_trip_within_expiry() {
        let cache = TrustScoreCache::in_memory(WEEK);
        let root = IdentityKey::new("root");

        cache.cache_trust_scores(&root, &scores()).unwrap();
        assert_eq!(cache.get_cached_trust_scores(&root), scores());
    }

    #[test]
    fn forced_expiry_empties() {
        let cache = TrustScoreCache::in_memory(WEEK);
        let root = IdentityKey::new("root");
        cache.cache_trust_scores(&root, &scores()).unwrap();

        let later = SystemTime::now() + WEEK + Duration::from_secs(60);
        assert!(cache.get_cached_trust_scores_at(&root, later).is_empty());
        // The expired entry was dropped, not just hidden.
        assert!(cache.get_cached_trust_scores(&root).is_empty());
    }

    #[test]
    fn other_root_misses() {
        let cache = TrustScoreCache::in_memory(WEEK);
        cache.cache_trust_scores(&IdentityKey::new("root"), &scores()).unwrap();
        assert!(cache.get_cached_trust_scores(&IdentityKey::new("other")).is_empty());
    }

    #[test]
    fn json_file_store_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("trust.json");
        let root = IdentityKey::new("root");

        let cache = TrustScoreCache::new(Arc::new(JsonFileScoreStore::open(&path).unwrap()), WEEK);
        cache.cache_trust_scores(&root, &scores()).unwrap();
        assert!(path.exists());

        // A second handle on the same file sees the same scores.
        let reopened = TrustScoreCache::new(Arc::new(JsonFileScoreStore::open(&path).unwrap()), WEEK);
        assert_eq!(reopened.get_cached_trust_scores(&root), scores());

        reopened.clear().unwrap();
        assert!(!path.exists());
        reopened.clear().unwrap();
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("trust.json");
        std::fs::write(&path, b"{broken").unwrap();

        let cache = TrustScoreCache::new(Arc::new(JsonFileScoreStore::open(&path).unwrap()), WEEK);
        assert!(cache.get_cached_trust_scores(&IdentityKey::new("root")).is_empty());
    }

    #[tokio::test]
    async fn profile_cache_grows() {
        let cache = ProfileCache::new();
        cache.insert(IdentityKey::new("a"), Profile::default()).await;
        cache.insert(IdentityKey::new("b"), Profile::default()).await;

        let hits = cache
            .get_many(&[IdentityKey::new("a"), IdentityKey::new("z")])
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(cache.len().await, 2);
    }
}
