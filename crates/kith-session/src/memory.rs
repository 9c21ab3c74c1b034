//! In-memory collaborator.
//!
//! [`MemorySource`] implements every source trait over plain maps. It
//! counts calls, can be told to fail or go offline, can delay responses,
//! and pushes updates to live subscriptions when its data changes. Tests
//! and the fixture-driven explorer binary both run sessions against it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use kith_graph::IdentityKey;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::source::{ConnectionSource, Note, NoteSource, ProfileSource, RawProfile, Subscription, TrustScorer};

/// Calls the source can count and fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    FetchConnections,
    SubscribeConnections,
    FetchProfile,
    SubscribeProfiles,
    FetchNotes,
    SubscribeNotes,
    FetchTrustScores,
}

/// Graph data loaded from JSON.
#[derive(Debug, Default, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub connections: HashMap<IdentityKey, Vec<IdentityKey>>,
    /// Profile metadata, either as a JSON object or as raw text.
    #[serde(default)]
    pub profiles: HashMap<IdentityKey, serde_json::Value>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub trust_scores: HashMap<IdentityKey, HashMap<IdentityKey, f64>>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<IdentityKey, Vec<IdentityKey>>,
    profiles: HashMap<IdentityKey, String>,
    notes: HashMap<IdentityKey, Vec<Note>>,
    scores: HashMap<IdentityKey, HashMap<IdentityKey, f64>>,
    failing: HashSet<(Call, IdentityKey)>,
    offline: bool,
    delay: Duration,
    calls: HashMap<Call, usize>,
    connection_subs: HashMap<IdentityKey, Vec<mpsc::Sender<Vec<IdentityKey>>>>,
    note_subs: HashMap<IdentityKey, Vec<mpsc::Sender<Note>>>,
}

/// Map-backed implementation of every source trait.
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Self {
        let source = Self::new();
        for (id, follows) in fixture.connections {
            source.set_connections(&id, follows);
        }
        for (id, value) in fixture.profiles {
            let raw = match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            source.set_profile(&id, raw);
        }
        for note in fixture.notes {
            source.add_note(note);
        }
        for (root, scores) in fixture.trust_scores {
            source.set_trust_scores(&root, scores);
        }
        source
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace `id`'s follow list and push it to live subscribers.
    pub fn set_connections<I>(&self, id: &IdentityKey, follows: I)
    where
        I: IntoIterator<Item = IdentityKey>,
    {
        let follows: Vec<IdentityKey> = follows.into_iter().collect();
        let mut inner = self.lock();
        if let Some(subs) = inner.connection_subs.get_mut(id) {
            subs.retain(|tx| !tx.is_closed() && tx.try_send(follows.clone()).is_ok());
        }
        inner.connections.insert(id.clone(), follows);
    }

    pub fn set_profile(&self, id: &IdentityKey, raw: impl Into<String>) {
        self.lock().profiles.insert(id.clone(), raw.into());
    }

    /// Store a note and push it to live subscribers of its author.
    pub fn add_note(&self, note: Note) {
        let mut inner = self.lock();
        if let Some(subs) = inner.note_subs.get_mut(&note.author) {
            subs.retain(|tx| !tx.is_closed() && tx.try_send(note.clone()).is_ok());
        }
        inner.notes.entry(note.author.clone()).or_default().push(note);
    }

    pub fn set_trust_scores(&self, root: &IdentityKey, scores: HashMap<IdentityKey, f64>) {
        self.lock().scores.insert(root.clone(), scores);
    }

    /// Make `call` fail for `id` until cleared.
    pub fn fail(&self, call: Call, id: &IdentityKey) {
        self.lock().failing.insert((call, id.clone()));
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// While offline every call fails with a connectivity error.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay applied before every response.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = delay;
    }

    pub fn calls(&self, call: Call) -> usize {
        self.lock().calls.get(&call).copied().unwrap_or(0)
    }

    /// Open connection subscriptions for `id`.
    pub fn live_connection_subscriptions(&self, id: &IdentityKey) -> usize {
        self.lock()
            .connection_subs
            .get(id)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Count the call, check for injected failures, and wait out the delay.
    async fn enter(&self, call: Call, id: &IdentityKey) -> Result<()> {
        let delay = {
            let mut inner = self.lock();
            *inner.calls.entry(call).or_insert(0) += 1;
            if inner.offline {
                return Err(Error::Connectivity("no relay reachable".into()));
            }
            if inner.failing.contains(&(call, id.clone())) {
                return Err(Error::Source(format!("{call:?} rejected for {id}")));
            }
            inner.delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionSource for MemorySource {
    async fn fetch_connections(&self, identity: &IdentityKey) -> Result<Vec<IdentityKey>> {
        self.enter(Call::FetchConnections, identity).await?;
        Ok(self.lock().connections.get(identity).cloned().unwrap_or_default())
    }

    async fn subscribe_connections(&self, identity: &IdentityKey) -> Result<Subscription<Vec<IdentityKey>>> {
        self.enter(Call::SubscribeConnections, identity).await?;
        let (tx, sub) = Subscription::channel(16);
        let mut inner = self.lock();
        if let Some(current) = inner.connections.get(identity) {
            // Fresh channel with spare capacity.
            let _ = tx.try_send(current.clone());
        }
        inner.connection_subs.entry(identity.clone()).or_default().push(tx);
        Ok(sub)
    }
}

#[async_trait]
impl ProfileSource for MemorySource {
    async fn fetch_profile(&self, identity: &IdentityKey) -> Result<RawProfile> {
        self.enter(Call::FetchProfile, identity).await?;
        self.lock()
            .profiles
            .get(identity)
            .map(|raw| RawProfile::new(identity.clone(), raw.clone()))
            .ok_or_else(|| Error::Source(format!("no profile for {identity}")))
    }

    async fn subscribe_profiles(&self, identities: &[IdentityKey]) -> Result<Subscription<RawProfile>> {
        let first = identities.first().cloned().unwrap_or_else(|| IdentityKey::new(""));
        let delay = {
            let mut inner = self.lock();
            *inner.calls.entry(Call::SubscribeProfiles).or_insert(0) += 1;
            if inner.offline {
                return Err(Error::Connectivity("no relay reachable".into()));
            }
            if inner.failing.contains(&(Call::SubscribeProfiles, first)) {
                return Err(Error::Source("profile subscription rejected".into()));
            }
            inner.delay
        };

        let items: Vec<RawProfile> = {
            let inner = self.lock();
            identities
                .iter()
                .filter_map(|id| {
                    inner
                        .profiles
                        .get(id)
                        .map(|raw| RawProfile::new(id.clone(), raw.clone()))
                })
                .collect()
        };

        let (tx, sub) = Subscription::channel(items.len());
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });
        Ok(sub)
    }
}

#[async_trait]
impl NoteSource for MemorySource {
    async fn fetch_notes(&self, identity: &IdentityKey, limit: usize) -> Result<Vec<Note>> {
        self.enter(Call::FetchNotes, identity).await?;
        let notes = self.lock().notes.get(identity).cloned().unwrap_or_default();

        // Like a relay: only the newest `limit`, in whatever order they were stored.
        let mut newest: Vec<&Note> = notes.iter().collect();
        newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let keep: HashSet<&str> = newest.iter().take(limit).map(|n| n.id.as_str()).collect();
        Ok(notes.iter().filter(|n| keep.contains(n.id.as_str())).cloned().collect())
    }

    async fn subscribe_notes(&self, identity: &IdentityKey) -> Result<Subscription<Note>> {
        self.enter(Call::SubscribeNotes, identity).await?;
        let (tx, sub) = Subscription::channel(64);
        self.lock().note_subs.entry(identity.clone()).or_default().push(tx);
        Ok(sub)
    }
}

#[async_trait]
impl TrustScorer for MemorySource {
    async fn fetch_trust_scores(&self, root: &IdentityKey) -> Result<HashMap<IdentityKey, f64>> {
        self.enter(Call::FetchTrustScores, root).await?;
        Ok(self.lock().scores.get(root).cloned().unwrap_or_default())
    }
}
