//! Session lifecycle and the UI-facing surface.
//!
//! A [`Session`] wires every pipeline to one [`SharedGraph`] and owns
//! the background tasks they run. Login seeds the graph with the
//! authenticated identity and starts the initial sync, trust load and
//! connection watch. Logout aborts all of that before clearing state, and
//! anything that still completes afterwards is rejected by the epoch
//! check.

use std::future::Future;
use std::sync::Arc;

use kith_graph::{Graph, IdentityKey, Node, Position, Transition};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::batch::ProfileBatcher;
use crate::cache::{JsonFileScoreStore, MemoryScoreStore, ProfileCache, ScoreStore, TrustScoreCache};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::factory::NodeFactory;
use crate::graph::{Epoch, GraphEvent, SharedGraph};
use crate::inflight::FetchOutcome;
use crate::notes::{NotesBook, NotesPipeline, NotesReport};
use crate::source::{Note, Sources};
use crate::status::{StatusBoard, StatusSnapshot};
use crate::sync::{ConnectionSync, SyncReport};
use crate::trust::{ScoreBook, TrustPipeline, TrustReport};

#[derive(Debug, Default)]
struct Tasks {
    identity: Option<IdentityKey>,
    background: JoinSet<()>,
    watchers: Vec<JoinHandle<()>>,
    /// Fetches a caller is awaiting directly.
    requests: Vec<AbortHandle>,
}

impl Tasks {
    fn abort_all(&mut self) {
        self.background.abort_all();
        for handle in self.watchers.drain(..) {
            handle.abort();
        }
        for handle in self.requests.drain(..) {
            handle.abort();
        }
    }

    fn reap(&mut self) {
        while let Some(joined) = self.background.try_join_next() {
            report_join(joined);
        }
        self.requests.retain(|handle| !handle.is_finished());
    }
}

fn report_join(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            warn!(error = %e, "Background task panicked");
        }
    }
}

/// Counts one running background task until dropped, finished or aborted.
struct Running(Arc<watch::Sender<usize>>);

impl Running {
    fn start(counter: &Arc<watch::Sender<usize>>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter.clone())
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

impl Drop for Tasks {
    fn drop(&mut self) {
        self.abort_all();
    }
}

/// The graph exploration engine for one authenticated identity at a time.
pub struct Session {
    config: SessionConfig,
    graph: SharedGraph,
    status: StatusBoard,
    profiles: ProfileCache,
    factory: NodeFactory,
    sync: ConnectionSync,
    trust: TrustPipeline,
    notes: NotesPipeline,
    tasks: Mutex<Tasks>,
    running: Arc<watch::Sender<usize>>,
}

impl Session {
    /// Build a session, persisting trust scores to `config.trust_cache_path`
    /// when set.
    pub fn new(config: SessionConfig, sources: Sources) -> Result<Self> {
        let store: Arc<dyn ScoreStore> = match &config.trust_cache_path {
            Some(path) => Arc::new(JsonFileScoreStore::open(path)?),
            None => Arc::new(MemoryScoreStore::new()),
        };
        Ok(Self::with_score_store(config, sources, store))
    }

    pub fn with_score_store(config: SessionConfig, sources: Sources, store: Arc<dyn ScoreStore>) -> Self {
        let graph = SharedGraph::new(config.event_capacity);
        let status = StatusBoard::new();
        let profiles = ProfileCache::new();
        let scores = ScoreBook::new();

        let factory = NodeFactory::new(sources.profiles.clone(), profiles.clone(), config.profile_timeout);
        let batcher = ProfileBatcher::new(
            graph.clone(),
            sources.profiles.clone(),
            profiles.clone(),
            config.profile_batch_size,
            config.profile_flush_interval,
            config.profile_timeout,
        );
        let sync = ConnectionSync::new(
            graph.clone(),
            sources.connections.clone(),
            factory.clone(),
            batcher,
            scores.clone(),
            status.clone(),
            config.max_connections,
            config.connection_timeout,
        );
        let trust = TrustPipeline::new(
            graph.clone(),
            sources.trust.clone(),
            TrustScoreCache::new(store, config.trust_cache_ttl),
            scores,
            status.clone(),
            config.trust_timeout,
            config.trust_refresh_window,
        );
        let notes = NotesPipeline::new(
            sources.notes.clone(),
            NotesBook::new(config.notes_limit),
            status.clone(),
            config.notes_timeout,
        );

        Self {
            config,
            graph,
            status,
            profiles,
            factory,
            sync,
            trust,
            notes,
            tasks: Mutex::new(Tasks::default()),
            running: Arc::new(watch::channel(0).0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Authenticate as `identity`, replacing any current session.
    pub async fn login(&self, identity: IdentityKey) -> Result<Epoch> {
        if identity.as_str().is_empty() {
            return Err(Error::Decode("empty identity key".into()));
        }

        let mut tasks = self.tasks.lock().await;
        self.end_session(&mut tasks).await;

        let focus = self.factory.make_node(&identity, true).await;
        let epoch = self.graph.begin(focus).await;
        self.trust.book().reset(Some(epoch));
        self.notes.book().reset(Some(epoch)).await;
        self.status.reset(Some(epoch)).await;
        tasks.identity = Some(identity.clone());

        let sync = self.sync.clone();
        let id = identity.clone();
        self.spawn_background(&mut tasks, async move {
            if let Err(e) = sync.sync_connections(epoch, &id).await {
                if !e.is_stale() {
                    warn!(identity = %id, error = %e, "Initial connection sync failed");
                }
            }
        });

        let trust = self.trust.clone();
        let id = identity.clone();
        self.spawn_background(&mut tasks, async move {
            if let Err(e) = trust.load_trust_scores(epoch, &id).await {
                debug!(identity = %id, error = %e, "Trust load abandoned");
            }
        });

        match self.sync.watch(epoch, identity.clone()).await {
            Ok(handle) => tasks.watchers.push(handle),
            Err(e) => warn!(identity = %identity, error = %e, "Connection watch unavailable"),
        }

        info!(identity = %identity, %epoch, "Session started");
        Ok(epoch)
    }

    /// End the current session: stop every task and subscription, then
    /// clear the graph, stack, notes, scores, status and profile cache.
    /// Returns false if no session was active.
    pub async fn logout(&self) -> bool {
        let mut tasks = self.tasks.lock().await;
        self.end_session(&mut tasks).await
    }

    async fn end_session(&self, tasks: &mut Tasks) -> bool {
        // Tasks spawned by a call that raced a logout are stopped too.
        for handle in tasks.requests.drain(..) {
            handle.abort();
        }
        tasks.background.shutdown().await;
        for handle in tasks.watchers.drain(..) {
            handle.abort();
            // Wait for the cancelled task to drop its subscription.
            let _ = handle.await;
        }
        let Some(identity) = tasks.identity.take() else {
            return false;
        };

        let epoch = self.graph.end().await;
        self.trust.book().reset(None);
        self.trust.reset().await;
        self.notes.book().reset(None).await;
        self.status.reset(None).await;
        self.profiles.clear().await;

        info!(identity = %identity, %epoch, "Session ended");
        true
    }

    fn spawn_background(&self, tasks: &mut Tasks, task: impl Future<Output = ()> + Send + 'static) {
        tasks.reap();
        let running = Running::start(&self.running);
        tasks.background.spawn(async move {
            let _running = running;
            task.await;
        });
    }

    /// Run a fetch the caller awaits as a task logout can abort. An
    /// aborted fetch reports `StaleSession`.
    async fn request<T>(&self, fetch: impl Future<Output = Result<T>> + Send + 'static) -> Result<T>
    where
        T: Send + 'static,
    {
        let handle = {
            let mut tasks = self.tasks.lock().await;
            tasks.reap();
            let handle = tokio::spawn(fetch);
            tasks.requests.push(handle.abort_handle());
            handle
        };
        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(Error::StaleSession),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }

    /// The authenticated identity, if any.
    pub async fn identity(&self) -> Option<IdentityKey> {
        self.tasks.lock().await.identity.clone()
    }

    async fn epoch(&self) -> Result<Epoch> {
        self.graph.current_epoch().await.ok_or(Error::NoSession)
    }

    /// Navigate to `node`, pruning per the resulting transition, and sync
    /// the new top if its connections are not in the graph yet.
    pub async fn select_identity(&self, node: Node) -> Result<Transition> {
        let epoch = self.epoch().await?;
        let nav = self.graph.navigate(epoch, node).await?;

        if nav.needs_sync {
            let sync = self.sync.clone();
            let top = nav.top.clone();
            let mut tasks = self.tasks.lock().await;
            self.spawn_background(&mut tasks, async move {
                if let Err(e) = sync.sync_connections(epoch, &top).await {
                    if !e.is_stale() {
                        warn!(identity = %top, error = %e, "Connection sync failed");
                    }
                }
            });
        }
        Ok(nav.transition)
    }

    /// [`select_identity`](Self::select_identity) by key, using the stored
    /// node when there is one.
    pub async fn select_key(&self, id: &IdentityKey) -> Result<Transition> {
        let node = match self.graph.read(|store| store.node(id).cloned()).await {
            Some(node) => node,
            None => self.factory.cached_or_placeholder(id).await,
        };
        self.select_identity(node).await
    }

    pub async fn sync_connections(&self, id: &IdentityKey) -> Result<FetchOutcome<SyncReport>> {
        let epoch = self.epoch().await?;
        let sync = self.sync.clone();
        let id = id.clone();
        self.request(async move { sync.sync_connections(epoch, &id).await }).await
    }

    pub async fn load_notes_for_node(&self, id: &IdentityKey) -> Result<FetchOutcome<NotesReport>> {
        let epoch = self.epoch().await?;
        let notes = self.notes.clone();
        let id = id.clone();
        self.request(async move { notes.load_notes_for_node(epoch, &id).await }).await
    }

    /// Keep `id`'s notes current until logout.
    pub async fn watch_notes(&self, id: &IdentityKey) -> Result<()> {
        let epoch = self.epoch().await?;
        let handle = self.notes.watch(epoch, id.clone()).await?;
        self.tasks.lock().await.watchers.push(handle);
        Ok(())
    }

    /// Trust scores from the authenticated identity's point of view.
    pub async fn load_trust_scores(&self) -> Result<FetchOutcome<TrustReport>> {
        let epoch = self.epoch().await?;
        let root = self.graph.root().await.ok_or(Error::NoSession)?;
        let trust = self.trust.clone();
        self.request(async move { trust.load_trust_scores(epoch, &root).await }).await
    }

    /// Score for `id`, or `None` when unknown.
    pub fn trust_score(&self, id: &IdentityKey) -> Option<f64> {
        self.trust.trust_score(id)
    }

    pub async fn notes_for(&self, id: &IdentityKey) -> Vec<Note> {
        self.notes.notes_for(id).await
    }

    pub async fn graph(&self) -> Graph {
        self.graph.snapshot().await
    }

    pub async fn stack(&self) -> Vec<Node> {
        self.graph.stack().await
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.status.snapshot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GraphEvent> {
        self.graph.subscribe()
    }

    pub async fn set_position(&self, id: &IdentityKey, position: Position) -> bool {
        self.graph.set_position(id, position).await
    }

    /// Wait until no background sync or trust load is running. Tasks
    /// cancelled by a logout count as done. Watchers are not waited on.
    pub async fn wait_idle(&self) {
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|n| *n == 0).await;
        self.tasks.lock().await.reap();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
