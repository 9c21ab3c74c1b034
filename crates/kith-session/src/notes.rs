//! Notes pipeline.
//!
//! Notes live beside the graph, not in it: one newest-first list per
//! identity, capped at a fixed size and always replaced wholesale.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use kith_graph::IdentityKey;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::graph::Epoch;
use crate::inflight::{FetchOutcome, InFlight};
use crate::source::{Note, NoteSource};
use crate::status::{Pipeline, StatusBoard};

#[derive(Debug, Default)]
struct BookState {
    epoch: Option<Epoch>,
    notes: HashMap<IdentityKey, Vec<Note>>,
}

/// Notes by identity for the active session.
#[derive(Debug, Clone)]
pub struct NotesBook {
    inner: Arc<RwLock<BookState>>,
    capacity: usize,
}

impl NotesBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(BookState::default())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Forget everything and accept writes for `epoch` only.
    pub async fn reset(&self, epoch: Option<Epoch>) {
        let mut inner = self.inner.write().await;
        inner.epoch = epoch;
        inner.notes.clear();
    }

    /// Replace `id`'s notes with `notes`, normalised. Returns the stored
    /// count, or `StaleSession` if `epoch` has been superseded.
    pub async fn replace(&self, epoch: Epoch, id: &IdentityKey, notes: Vec<Note>) -> Result<usize> {
        let notes = normalize(notes, self.capacity);
        let mut inner = self.inner.write().await;
        if inner.epoch != Some(epoch) {
            return Err(Error::StaleSession);
        }
        let count = notes.len();
        inner.notes.insert(id.clone(), notes);
        Ok(count)
    }

    /// Fold `note` into `id`'s current list and replace it.
    pub async fn insert(&self, epoch: Epoch, id: &IdentityKey, note: Note) -> Result<usize> {
        let mut inner = self.inner.write().await;
        if inner.epoch != Some(epoch) {
            return Err(Error::StaleSession);
        }
        let mut notes = inner.notes.get(id).cloned().unwrap_or_default();
        notes.push(note);
        let notes = normalize(notes, self.capacity);
        let count = notes.len();
        inner.notes.insert(id.clone(), notes);
        Ok(count)
    }

    pub async fn notes_for(&self, id: &IdentityKey) -> Vec<Note> {
        self.inner.read().await.notes.get(id).cloned().unwrap_or_default()
    }
}

/// Newest first, one entry per note id, at most `capacity`.
fn normalize(mut notes: Vec<Note>, capacity: usize) -> Vec<Note> {
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
    let mut seen = HashSet::new();
    notes.retain(|n| seen.insert(n.id.clone()));
    notes.truncate(capacity);
    notes
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotesReport {
    pub identity: IdentityKey,
    pub stored: usize,
    /// Notes dropped for a missing id or a foreign author.
    pub rejected: usize,
}

#[derive(Clone)]
pub struct NotesPipeline {
    source: Arc<dyn NoteSource>,
    book: NotesBook,
    status: StatusBoard,
    inflight: InFlight,
    timeout: Duration,
}

impl NotesPipeline {
    pub fn new(source: Arc<dyn NoteSource>, book: NotesBook, status: StatusBoard, timeout: Duration) -> Self {
        Self {
            source,
            book,
            status,
            inflight: InFlight::new(),
            timeout,
        }
    }

    pub fn book(&self) -> &NotesBook {
        &self.book
    }

    pub async fn notes_for(&self, id: &IdentityKey) -> Vec<Note> {
        self.book.notes_for(id).await
    }

    /// Fetch `id`'s latest notes and replace the stored set.
    ///
    /// Skipped if a fetch for `id` is already running. On timeout the
    /// previously stored notes are kept.
    pub async fn load_notes_for_node(&self, epoch: Epoch, id: &IdentityKey) -> Result<FetchOutcome<NotesReport>> {
        let Some(_guard) = self.inflight.try_begin(id) else {
            debug!(identity = %id, "Notes already loading, skipping");
            return Ok(FetchOutcome::AlreadyInFlight);
        };

        self.status.begin(epoch, Pipeline::Notes, id).await;
        let fetched = match tokio::time::timeout(self.timeout, self.source.fetch_notes(id, self.book.capacity())).await {
            Ok(result) => result,
            Err(_) => Err(Error::FetchTimeout(self.timeout)),
        };

        let notes = match fetched {
            Ok(notes) => notes,
            Err(e) => {
                warn!(identity = %id, error = %e, "Notes fetch failed");
                self.status.fail(epoch, Pipeline::Notes, id, &e).await;
                return Err(e);
            }
        };

        let total = notes.len();
        let notes: Vec<Note> = notes.into_iter().filter(|n| is_valid(n, id)).collect();
        let rejected = total - notes.len();

        match self.book.replace(epoch, id, notes).await {
            Ok(stored) => {
                self.status.finish(epoch, Pipeline::Notes, id).await;
                debug!(identity = %id, stored, rejected, "Loaded notes");
                Ok(FetchOutcome::Completed(NotesReport {
                    identity: id.clone(),
                    stored,
                    rejected,
                }))
            }
            Err(e) => {
                self.status.cancel(epoch, Pipeline::Notes, id).await;
                Err(e)
            }
        }
    }

    /// Fold streamed notes for `id` into the book until the feed closes or
    /// the session moves on.
    pub async fn watch(&self, epoch: Epoch, id: IdentityKey) -> Result<JoinHandle<()>> {
        let mut sub = self.source.subscribe_notes(&id).await?;
        let book = self.book.clone();
        Ok(tokio::spawn(async move {
            while let Some(note) = sub.next().await {
                if !is_valid(&note, &id) {
                    continue;
                }
                if book.insert(epoch, &id, note).await.is_err() {
                    break;
                }
            }
            sub.stop();
            debug!(identity = %id, %epoch, "Notes watch ended");
        }))
    }
}

impl std::fmt::Debug for NotesPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotesPipeline")
            .field("capacity", &self.book.capacity())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn is_valid(note: &Note, author: &IdentityKey) -> bool {
    if note.id.is_empty() || &note.author != author {
        warn!(identity = %author, note = %note.id, "Skipping malformed note");
        return false;
    }
    true
}
