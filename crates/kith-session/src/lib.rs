//! Kith Session - async exploration engine for the social graph
//!
//! Drives a [`kith_graph::GraphStore`] from remote collaborators: follow
//! lists become nodes and edges, profiles enrich placeholders in batches,
//! and notes and trust scores are loaded on demand. All of it is scoped to
//! one authenticated identity at a time.
//!
//! # Architecture
//!
//! - **Sources**: collaborator traits ([`ConnectionSource`], [`ProfileSource`],
//!   [`NoteSource`], [`TrustScorer`]) plus the in-memory [`MemorySource`]
//! - **Graph**: [`SharedGraph`], the epoch-checked handle every pipeline writes through
//! - **Pipelines**: [`ConnectionSync`], [`ProfileBatcher`], [`NotesPipeline`], [`TrustPipeline`]
//! - **Session**: [`Session`], login/logout, navigation and the UI-facing accessors
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use kith_session::{IdentityKey, MemorySource, Session, SessionConfig, Sources};
//!
//! #[tokio::main]
//! async fn main() -> kith_session::Result<()> {
//!     let source = Arc::new(MemorySource::new());
//!     let session = Session::new(SessionConfig::from_env(), Sources::from_single(source))?;
//!
//!     session.login(IdentityKey::new("npub1me")).await?;
//!     session.wait_idle().await;
//!     println!("{} nodes", session.graph().await.nodes.len());
//!     Ok(())
//! }
//! ```

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod factory;
pub mod graph;
pub mod inflight;
pub mod memory;
pub mod notes;
pub mod session;
pub mod source;
pub mod status;
pub mod sync;
pub mod trust;

pub use batch::{EnrichReport, ProfileBatcher};
pub use cache::{CachedScores, JsonFileScoreStore, MemoryScoreStore, ProfileCache, ScoreStore, TrustScoreCache};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use factory::NodeFactory;
pub use graph::{Epoch, GraphEvent, Navigation, SharedGraph};
pub use inflight::{FetchOutcome, InFlight, InFlightGuard};
pub use memory::{Call, Fixture, MemorySource};
pub use notes::{NotesBook, NotesPipeline, NotesReport};
pub use session::Session;
pub use source::{ConnectionSource, Note, NoteSource, ProfileSource, RawProfile, Sources, Subscription, TrustScorer};
pub use status::{Pipeline, PipelineStatus, StatusBoard, StatusSnapshot};
pub use sync::{ConnectionSync, SyncReport};
pub use trust::{ScoreBook, ScoreOrigin, TrustPipeline, TrustReport};

pub use kith_graph::{Graph, IdentityKey, Node, Position, Transition};
