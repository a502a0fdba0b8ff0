//! Agora Core Library
//!
//! Content store and engagement aggregation for a content-sharing site:
//! published content with denormalized counters, per-content comment
//! partitions with threaded listings, one-vote-per-identity toggling and
//! append-only view tracking.
//!
//! # Architecture
//!
//! - **DocumentStore**: async capability over schemaless JSON collections,
//!   implemented on SQLite
//! - **Stores**: typed components built on it (content, comments, votes,
//!   views), each taking a cancellation token on every operation
//! - **Site**: facade wiring the components and keeping counters in step
//!
//! # Quick Start
//!
//! ```text
//! let site = Site::open()?;
//! let cancel = CancellationToken::new();
//!
//! let post = site.publish(ContentEntity::new(owner, "alice", "Vintage Lamp", ""), &cancel).await?;
//! site.read_content("BOB", post.id, &cancel).await?;
//! site.toggle_content_vote("BOB", post.id, VoteType::Like, &cancel).await?;
//!
//! let found = site.content().search_by_keyword(0, Some(20), "lamp", &cancel).await?;
//! ```
//!
//! # Modules
//!
//! - `site`: request-level flows (main entry point)
//! - `content`: content CRUD, search and counters
//! - `comments`: comment partitions and threading
//! - `votes`: vote toggling and like counters
//! - `views`: view events and popularity
//! - `engagement`: engagement-rate ranking
//! - `models`: persisted entities
//! - `storage`: document store trait, query model and SQLite engine
//! - `config`: application configuration

pub mod collection;
pub mod comments;
pub mod config;
pub mod content;
pub mod engagement;
pub mod lifecycle;
pub mod models;
pub mod site;
pub mod storage;
pub mod views;
pub mod votes;

pub use collection::Collection;
pub use comments::{
    build_threads, partition_name, CommentPartition, CommentPartitionManager, CommentThread,
};
pub use config::{Config, CounterMode};
pub use content::{ContentStore, CONTENT_COLLECTION};
pub use engagement::{content_rate, engagement_rate, rank_by_engagement};
pub use models::{
    normalize_key, CommentEntity, ContentEntity, Entity, TargetKind, Timestamps, ViewEvent,
    VoteRecord, VoteTarget, VoteType,
};
pub use site::Site;
pub use storage::{
    DocumentStore, Filter, FindOptions, SortDirection, SqliteDocumentStore, StoreError,
    StoreResult, Update, WriteOp,
};
pub use views::{PopularTarget, ViewCounter, VIEWS_COLLECTION};
pub use votes::{ToggleOutcome, VoteAggregationEngine, VoteState, VOTES_COLLECTION};

// Re-exported so callers need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;
