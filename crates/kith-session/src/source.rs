//! Collaborator capabilities consumed by the session.
//!
//! The event network client, the profile resolver, and the reputation
//! scorer all live outside this crate. The session only sees them through
//! these traits, which keeps every pipeline testable against
//! [`MemorySource`](crate::memory::MemorySource).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use kith_graph::{IdentityKey, Profile};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// A live feed of updates. Dropping or stopping it ends delivery.
///
/// Producers hold the matching `mpsc::Sender` and should stop as soon as
/// `Sender::closed` resolves.
#[derive(Debug)]
pub struct Subscription<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Subscription<T> {
    /// Create a subscription and the sender that feeds it.
    pub fn channel(buffer: usize) -> (mpsc::Sender<T>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self { rx })
    }

    /// Next update, or `None` once the producer is gone or the feed stopped.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// End delivery. Buffered items can still be drained with `next`.
    pub fn stop(&mut self) {
        self.rx.close();
    }
}

/// Profile metadata as published: the raw JSON document and its author.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProfile {
    pub identity: IdentityKey,
    pub content: String,
    #[serde(default)]
    pub created_at: u64,
}

impl RawProfile {
    pub fn new(identity: IdentityKey, content: impl Into<String>) -> Self {
        Self {
            identity,
            content: content.into(),
            created_at: 0,
        }
    }

    pub fn decode(&self) -> Result<Profile> {
        Ok(Profile::from_json(&self.content)?)
    }
}

/// A short text note authored by an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub author: IdentityKey,
    pub content: String,
    /// Unix seconds.
    pub created_at: u64,
}

impl Note {
    pub fn new(id: impl Into<String>, author: IdentityKey, content: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            author,
            content: content.into(),
            created_at,
        }
    }
}

/// Follow lists.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Identities `identity` currently follows.
    async fn fetch_connections(&self, identity: &IdentityKey) -> Result<Vec<IdentityKey>>;

    /// Every updated follow list for `identity`, as it changes.
    async fn subscribe_connections(&self, identity: &IdentityKey) -> Result<Subscription<Vec<IdentityKey>>>;
}

/// Profile metadata.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, identity: &IdentityKey) -> Result<RawProfile>;

    /// Profiles for a set of identities. The feed closes once the source
    /// has nothing more to deliver.
    async fn subscribe_profiles(&self, identities: &[IdentityKey]) -> Result<Subscription<RawProfile>>;
}

/// Notes authored by an identity.
#[async_trait]
pub trait NoteSource: Send + Sync {
    async fn fetch_notes(&self, identity: &IdentityKey, limit: usize) -> Result<Vec<Note>>;

    async fn subscribe_notes(&self, identity: &IdentityKey) -> Result<Subscription<Note>>;
}

/// Remote reputation scorer.
#[async_trait]
pub trait TrustScorer: Send + Sync {
    /// Scores computed from `root`'s point of view.
    async fn fetch_trust_scores(&self, root: &IdentityKey) -> Result<HashMap<IdentityKey, f64>>;
}

/// The full set of collaborators a session needs.
#[derive(Clone)]
pub struct Sources {
    pub connections: Arc<dyn ConnectionSource>,
    pub profiles: Arc<dyn ProfileSource>,
    pub notes: Arc<dyn NoteSource>,
    pub trust: Arc<dyn TrustScorer>,
}

impl Sources {
    /// Use one object for every capability.
    pub fn from_single<S>(source: Arc<S>) -> Self
    where
        S: ConnectionSource + ProfileSource + NoteSource + TrustScorer + 'static,
    {
        Self {
            connections: source.clone(),
            profiles: source.clone(),
            notes: source.clone(),
            trust: source,
        }
    }
}

impl std::fmt::Debug for Sources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sources").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stopped_subscription_closes_sender() {
        let (tx, mut sub) = Subscription::<u32>::channel(4);
        tx.send(1).await.unwrap();
        sub.stop();

        assert!(tx.send(2).await.is_err());
        assert_eq!(sub.next().await, Some(1));
        assert_eq!(sub.next().await, None);
    }

    #[test]
    fn raw_profile_decodes() {
        let raw = RawProfile::new(IdentityKey::new("a"), r#"{"name":"alice"}"#);
        assert_eq!(raw.decode().unwrap().name.as_deref(), Some("alice"));

        let bad = RawProfile::new(IdentityKey::new("a"), "nope");
        assert!(matches!(bad.decode(), Err(crate::Error::Decode(_))));
    }
}
