//! Site facade
//!
//! `Site` opens the document store and wires the content store, comment
//! partitions, vote engine and view counter together. Its methods are the
//! request-level flows a front end performs: publishing, reading with
//! view registration, commenting and voting. Each flow keeps the
//! denormalized counters on the content (or comment) in step according to
//! the configured [`CounterMode`].
//!
//! ## Usage
//!
//! ```ignore
//! let site = Site::open()?;
//! let cancel = CancellationToken::new();
//!
//! let post = site.publish(ContentEntity::new(owner, "alice", "Lamp", "..."), &cancel).await?;
//! let post = site.read_content("BOB", post.id, &cancel).await?;
//! site.toggle_content_vote("BOB", post.id, VoteType::Like, &cancel).await?;
//! ```
//!
//! In [`CounterMode::Atomic`] a vote, view or comment and its counter
//! increment commit as one batch: either both land or neither does. In
//! [`CounterMode::Recompute`] the counter is recounted after the record
//! write; a failed recount leaves it stale until the next successful write
//! or [`VoteAggregationEngine::reconcile`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::comments::{CommentPartitionManager, CommentThread};
use crate::config::{Config, CounterMode};
use crate::content::{ContentStore, CONTENT_COLLECTION};
use crate::engagement::rank_by_engagement;
use crate::models::{
    fields, normalize_key, CommentEntity, ContentEntity, ViewEvent, VoteTarget, VoteType,
};
use crate::storage::{
    DocumentStore, SortDirection, SqliteDocumentStore, StoreError, StoreResult,
};
use crate::views::ViewCounter;
use crate::votes::{ToggleOutcome, VoteAggregationEngine};

pub struct Site {
    config: Config,
    store: Arc<dyn DocumentStore>,
    content: Arc<ContentStore>,
    comments: Arc<CommentPartitionManager>,
    votes: VoteAggregationEngine,
    views: ViewCounter,
}

impl Site {
    /// Open the site using the default configuration sources
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the site's SQLite database at `config.sqlite_path()`
    pub fn open_with_config(config: Config) -> Result<Self> {
        let store =
            SqliteDocumentStore::open(&config).context("Failed to open SQLite database")?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Open a site backed by an in-memory database (for testing)
    pub fn open_in_memory(config: Config) -> Result<Self> {
        let store = SqliteDocumentStore::open_in_memory()
            .context("Failed to open in-memory database")?;
        Ok(Self::with_store(config, Arc::new(store)))
    }

    /// Build a site over any document store
    pub fn with_store(config: Config, store: Arc<dyn DocumentStore>) -> Self {
        let content = Arc::new(ContentStore::new(Arc::clone(&store)));
        let comments = Arc::new(CommentPartitionManager::new(Arc::clone(&store)));
        let votes = VoteAggregationEngine::new(
            Arc::clone(&store),
            Arc::clone(&content),
            Arc::clone(&comments),
            config.counter_mode,
        );
        let views = ViewCounter::new(Arc::clone(&store));

        info!(counter_mode = %config.counter_mode, "Site ready");
        Self {
            config,
            store,
            content,
            comments,
            votes,
            views,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    pub fn comments(&self) -> &CommentPartitionManager {
        &self.comments
    }

    pub fn votes(&self) -> &VoteAggregationEngine {
        &self.votes
    }

    pub fn views(&self) -> &ViewCounter {
        &self.views
    }

    // ==================== Content ====================

    pub async fn publish(
        &self,
        entity: ContentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.content.create(entity, cancel).await
    }

    /// Register a view by `identity` and return the refreshed content
    ///
    /// Deleted content reads as not found.
    pub async fn read_content(
        &self,
        identity: &str,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.live_content(id, cancel).await?;
        let event = ViewEvent::new(normalize_key(identity), id);

        match self.config.counter_mode {
            CounterMode::Atomic => {
                let bump = self.content.counter_op(id, fields::VIEWS_COUNT, 1, cancel)?;
                let written = self
                    .views
                    .record_view_with(event, vec![bump], cancel)
                    .await?
                    .map(|(_, written)| written);
                self.content.decode(counter_doc(written, id)?)
            }
            CounterMode::Recompute => {
                self.views.record_view(event, cancel).await?;
                let views = self.views.count(id, cancel).await?;
                self.content.set_views_count(id, views, cancel).await
            }
        }
    }

    /// Most viewed non-deleted content, most views first
    pub async fn popular(
        &self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        let ranked = self.views.top_by_views(limit, cancel).await?;
        if ranked.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = ranked.iter().map(|r| r.target_id).collect();
        let mut found: HashMap<Uuid, ContentEntity> = self
            .content
            .find_many(&ids, cancel)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// The newest page of content ranked by engagement rate, cut to `limit`
    ///
    /// The page size is `items_per_page` from the configuration.
    pub async fn most_engaging(
        &self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut recent = self
            .content
            .list(
                0,
                Some(self.config.items_per_page),
                SortDirection::Descending,
                cancel,
            )
            .await?;
        rank_by_engagement(&mut recent);
        recent.truncate(limit);
        Ok(recent)
    }

    // ==================== Comments ====================

    /// Add a comment under `parent_id` and bump its comment counter
    pub async fn post_comment(
        &self,
        parent_id: Uuid,
        comment: CommentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentEntity> {
        self.live_content(parent_id, cancel).await?;

        let partition = self
            .comments
            .get_or_create_partition(parent_id, cancel)
            .await?;

        match self.config.counter_mode {
            CounterMode::Atomic => {
                let bump =
                    self.content
                        .counter_op(parent_id, fields::COMMENTS_COUNT, 1, cancel)?;
                partition
                    .create_with(comment, vec![bump], cancel)
                    .await?
                    .map(|(created, _)| created)
                    .ok_or_else(|| StoreError::not_found(CONTENT_COLLECTION, parent_id))
            }
            CounterMode::Recompute => {
                let created = partition.create(comment, cancel).await?;
                let count = partition.count(cancel).await?;
                self.content
                    .set_comments_count(parent_id, count, cancel)
                    .await?;
                Ok(created)
            }
        }
    }

    /// Soft-delete a comment
    ///
    /// Returns `false` if it was already deleted, in which case the
    /// counter is left alone.
    pub async fn delete_comment(
        &self,
        parent_id: Uuid,
        comment_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<bool> {
        let partition = self.comments.partition(parent_id, cancel).await?;

        match self.config.counter_mode {
            CounterMode::Atomic => {
                let decrement =
                    self.content
                        .counter_op(parent_id, fields::COMMENTS_COUNT, -1, cancel)?;
                if partition
                    .soft_delete_with(comment_id, vec![decrement], cancel)
                    .await?
                    .is_some()
                {
                    return Ok(true);
                }

                // Nothing written: tell an earlier delete from a missing row
                let comment = partition.find_by_id(comment_id, cancel).await?;
                if comment.timestamps.is_deleted {
                    Ok(false)
                } else {
                    Err(StoreError::not_found(CONTENT_COLLECTION, parent_id))
                }
            }
            CounterMode::Recompute => {
                if !partition.soft_delete(comment_id, cancel).await? {
                    return Ok(false);
                }
                let count = partition.count(cancel).await?;
                self.content
                    .set_comments_count(parent_id, count, cancel)
                    .await?;
                Ok(true)
            }
        }
    }

    /// Threaded comments of `parent_id`; a parent never commented on has none
    ///
    /// `limit` defaults to `comments_per_parent` from the configuration.
    pub async fn threaded_comments(
        &self,
        parent_id: Uuid,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<CommentThread>> {
        let limit = limit.unwrap_or(self.config.comments_per_parent);
        match self
            .comments
            .list_threaded(parent_id, Some(limit), cancel)
            .await
        {
            Err(StoreError::PartitionNotFound { .. }) => Ok(Vec::new()),
            other => other,
        }
    }

    // ==================== Votes ====================

    pub async fn toggle_content_vote(
        &self,
        identity: &str,
        content_id: Uuid,
        vote_type: VoteType,
        cancel: &CancellationToken,
    ) -> StoreResult<ToggleOutcome> {
        self.votes
            .toggle(
                &normalize_key(identity),
                VoteTarget::Content(content_id),
                vote_type,
                cancel,
            )
            .await
    }

    pub async fn toggle_comment_vote(
        &self,
        identity: &str,
        parent_id: Uuid,
        comment_id: Uuid,
        vote_type: VoteType,
        cancel: &CancellationToken,
    ) -> StoreResult<ToggleOutcome> {
        self.votes
            .toggle(
                &normalize_key(identity),
                VoteTarget::Comment {
                    parent_id,
                    comment_id,
                },
                vote_type,
                cancel,
            )
            .await
    }

    /// Close every component; later writes fail with `Disposed`
    pub fn close(&self) {
        self.content.close();
        self.comments.close();
        self.votes.close();
        self.views.close();
    }

    async fn live_content(&self, id: Uuid, cancel: &CancellationToken) -> StoreResult<ContentEntity> {
        let entity = self.content.find_by_id(id, cancel).await?;
        if entity.timestamps.is_deleted {
            return Err(StoreError::not_found(CONTENT_COLLECTION, id));
        }
        Ok(entity)
    }
}

/// The content document a counter companion wrote; `None` means the
/// content vanished before the batch ran
fn counter_doc(written: Option<Vec<Value>>, id: Uuid) -> StoreResult<Value> {
    written
        .and_then(|docs| docs.into_iter().next())
        .ok_or_else(|| StoreError::not_found(CONTENT_COLLECTION, id))
}
