//! Comment partitions
//!
//! Each piece of content owns an isolated collection of comments, named
//! after the parent id and created the first time a comment is written.
//! [`CommentPartitionManager`] keeps an in-process registry of the
//! partitions it has seen; the store stays the source of truth.
//!
//! Threaded listings are rebuilt from a flat, creation-ordered page of
//! comments by [`build_threads`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collection::Collection;
use crate::lifecycle::Lifecycle;
use crate::models::{fields, CommentEntity};
use crate::storage::{
    DocumentStore, Filter, SortDirection, StoreError, StoreResult, Update, WriteOp,
};

type Comments = Collection<CommentEntity>;

/// Collection name of the partition holding `parent_id`'s comments
pub fn partition_name(parent_id: Uuid) -> String {
    format!("comments_{}", parent_id.simple())
}

/// A top-level comment with its direct replies
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentThread {
    pub comment: CommentEntity,
    pub replies: Vec<CommentEntity>,
}

/// Group a creation-ordered page of comments into threads
///
/// Replies whose target is not a top-level comment of the same page are
/// dropped.
pub fn build_threads(comments: Vec<CommentEntity>) -> Vec<CommentThread> {
    let (top_level, replies): (Vec<_>, Vec<_>) = comments
        .into_iter()
        .partition(|c| c.reply_target().is_none());

    let mut threads: Vec<CommentThread> = top_level
        .into_iter()
        .map(|comment| CommentThread {
            comment,
            replies: Vec::new(),
        })
        .collect();

    let index: HashMap<Uuid, usize> = threads
        .iter()
        .enumerate()
        .map(|(i, t)| (t.comment.id, i))
        .collect();

    for reply in replies {
        match reply.reply_target().and_then(|target| index.get(&target)) {
            Some(&i) => threads[i].replies.push(reply),
            None => debug!(comment = %reply.id, "Dropping reply without a listed parent"),
        }
    }

    threads
}

/// Handle to the comments of one parent
#[derive(Clone)]
pub struct CommentPartition {
    parent_id: Uuid,
    comments: Comments,
    lifecycle: Arc<Lifecycle>,
}

impl CommentPartition {
    fn new(store: Arc<dyn DocumentStore>, parent_id: Uuid, lifecycle: Arc<Lifecycle>) -> Self {
        Self {
            parent_id,
            comments: Collection::new(store, partition_name(parent_id)),
            lifecycle,
        }
    }

    pub fn parent_id(&self) -> Uuid {
        self.parent_id
    }

    pub fn name(&self) -> &str {
        self.comments.name()
    }

    /// Insert a comment
    ///
    /// A reply must answer a live, top-level comment of this partition.
    pub async fn create(
        &self,
        comment: CommentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentEntity> {
        self.lifecycle.check_write(cancel)?;
        self.validate(&comment).await?;

        let created = self.comments.insert(comment).await?;
        debug!(partition = %self.name(), comment = %created.id, "Created comment");
        Ok(created)
    }

    /// `create` with companion writes committed in the same batch
    pub(crate) async fn create_with(
        &self,
        comment: CommentEntity,
        companions: Vec<WriteOp>,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<(CommentEntity, Vec<Value>)>> {
        self.lifecycle.check_write(cancel)?;
        self.validate(&comment).await?;

        let created = self.comments.insert_with(comment, companions).await?;
        if let Some((comment, _)) = &created {
            debug!(partition = %self.name(), comment = %comment.id, "Created comment");
        }
        Ok(created)
    }

    async fn validate(&self, comment: &CommentEntity) -> StoreResult<()> {
        if comment.parent_id != self.parent_id {
            return Err(StoreError::InvalidArgument(format!(
                "Comment belongs to {} but was written to the partition of {}",
                comment.parent_id, self.parent_id
            )));
        }

        let Some(target_id) = comment.reply_target() else {
            return Ok(());
        };
        match self.comments.get_opt(target_id).await? {
            None => Err(StoreError::InvalidArgument(format!(
                "No comment {} to reply to",
                target_id
            ))),
            Some(target) if target.timestamps.is_deleted => Err(StoreError::InvalidArgument(
                format!("Comment {} was deleted", target_id),
            )),
            Some(target) if target.reply_target().is_some() => Err(StoreError::InvalidArgument(
                format!("Comment {} is a reply; replies can only target top-level comments", target_id),
            )),
            Some(_) => Ok(()),
        }
    }

    pub async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentEntity> {
        self.lifecycle.check_read(cancel)?;
        self.comments.get(id).await
    }

    /// Non-deleted comments in creation order
    pub async fn list(
        &self,
        offset: usize,
        limit: Option<usize>,
        direction: SortDirection,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<CommentEntity>> {
        self.lifecycle.check_read(cancel)?;
        self.comments
            .find(&Comments::active(), &Comments::page(direction, offset, limit))
            .await
    }

    /// Non-deleted comments written by one profile, newest first
    pub async fn list_by_profile(
        &self,
        profile_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<CommentEntity>> {
        self.lifecycle.check_read(cancel)?;
        let filter = Filter::eq(fields::PROFILE_ID, profile_id.to_string()).and(Comments::active());
        self.comments
            .find(&filter, &Comments::page(SortDirection::Descending, 0, None))
            .await
    }

    /// Returns `false` if the comment was already deleted
    pub async fn soft_delete(&self, id: Uuid, cancel: &CancellationToken) -> StoreResult<bool> {
        self.lifecycle.check_write(cancel)?;
        self.comments.soft_delete(id, &[]).await
    }

    /// `soft_delete` with companion writes committed in the same batch
    ///
    /// `None` means nothing was written.
    pub(crate) async fn soft_delete_with(
        &self,
        id: Uuid,
        companions: Vec<WriteOp>,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<Vec<Value>>> {
        self.lifecycle.check_write(cancel)?;
        self.comments.soft_delete_with(id, &[], companions).await
    }

    pub async fn replace(
        &self,
        comment: CommentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentEntity> {
        self.lifecycle.check_write(cancel)?;
        self.comments.replace(comment).await
    }

    pub async fn set_votes_count(
        &self,
        id: Uuid,
        count: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentEntity> {
        self.lifecycle.check_write(cancel)?;
        self.comments
            .update(id, &[Update::set(fields::VOTES_COUNT, count)])
            .await
    }

    /// Increment inside the store; a sum below zero reads as zero
    pub async fn add_votes(
        &self,
        id: Uuid,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentEntity> {
        self.lifecycle.check_write(cancel)?;
        self.comments
            .update(id, &[Update::inc(fields::VOTES_COUNT, delta)])
            .await
    }

    /// The increment of `add_votes` as a batch companion
    pub(crate) fn counter_op(
        &self,
        id: Uuid,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<WriteOp> {
        self.lifecycle.check_write(cancel)?;
        Ok(self
            .comments
            .update_op(id, vec![Update::inc(fields::VOTES_COUNT, delta)]))
    }

    /// Total stored comments, deleted ones included
    pub async fn estimated_count(&self, cancel: &CancellationToken) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        self.comments.estimated_count().await
    }

    /// Exact number of non-deleted comments
    pub async fn count(&self, cancel: &CancellationToken) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        self.comments.count(&Comments::active()).await
    }
}

/// Creates and tracks the comment partitions of every parent
pub struct CommentPartitionManager {
    store: Arc<dyn DocumentStore>,
    registry: RwLock<HashMap<Uuid, CommentPartition>>,
    lifecycle: Arc<Lifecycle>,
}

impl CommentPartitionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            registry: RwLock::new(HashMap::new()),
            lifecycle: Arc::new(Lifecycle::new("CommentPartitionManager")),
        }
    }

    /// Get the partition of `parent_id`, creating its collection if needed
    pub async fn get_or_create_partition(
        &self,
        parent_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentPartition> {
        self.lifecycle.check_write(cancel)?;

        let cached = self.registry.read().get(&parent_id).cloned();
        if let Some(partition) = cached {
            return Ok(partition);
        }

        let name = partition_name(parent_id);
        if self.store.create_collection(&name).await? {
            info!(partition = %name, "Created comment partition");
        }

        Ok(self.register(parent_id))
    }

    /// Get an existing partition
    pub async fn partition(
        &self,
        parent_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<CommentPartition> {
        self.lifecycle.check_read(cancel)?;

        let cached = self.registry.read().get(&parent_id).cloned();
        if let Some(partition) = cached {
            return Ok(partition);
        }

        if self.store.has_collection(&partition_name(parent_id)).await? {
            Ok(self.register(parent_id))
        } else {
            Err(StoreError::PartitionNotFound { parent_id })
        }
    }

    /// Physically remove a partition and every comment in it
    pub async fn drop_partition(
        &self,
        parent_id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        self.lifecycle.check_write(cancel)?;

        let name = partition_name(parent_id);
        let dropped = self.store.drop_collection(&name).await?;
        self.registry.write().remove(&parent_id);

        if !dropped {
            return Err(StoreError::PartitionNotFound { parent_id });
        }
        info!(partition = %name, "Dropped comment partition");
        Ok(())
    }

    /// Up to `limit` non-deleted comments of `parent_id`, grouped into threads
    pub async fn list_threaded(
        &self,
        parent_id: Uuid,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<CommentThread>> {
        let comments = self
            .partition(parent_id, cancel)
            .await?
            .list(0, limit, SortDirection::Ascending, cancel)
            .await?;
        Ok(build_threads(comments))
    }

    /// Stop accepting writes, through this manager and every handle it gave out
    pub fn close(&self) {
        self.lifecycle.close();
    }

    fn register(&self, parent_id: Uuid) -> CommentPartition {
        self.registry
            .write()
            .entry(parent_id)
            .or_insert_with(|| {
                CommentPartition::new(Arc::clone(&self.store), parent_id, Arc::clone(&self.lifecycle))
            })
            .clone()
    }
}
