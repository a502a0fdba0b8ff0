//! Content store
//!
//! CRUD, soft deletion, pagination and keyword search over the `content`
//! collection, plus maintenance of the denormalized engagement counters.
//!
//! Every listing excludes soft-deleted entities and orders by creation
//! time with the id as tie-breaker, so consecutive pages never overlap.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::collection::Collection;
use crate::lifecycle::Lifecycle;
use crate::models::{fields, normalize_key, ContentEntity};
use crate::storage::{
    DocumentStore, Filter, SortDirection, StoreError, StoreResult, Update, WriteOp, ID_FIELD,
};

/// Name of the content collection
pub const CONTENT_COLLECTION: &str = "content";

type Items = Collection<ContentEntity>;

pub struct ContentStore {
    items: Items,
    lifecycle: Lifecycle,
}

impl ContentStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            items: Collection::new(store, CONTENT_COLLECTION),
            lifecycle: Lifecycle::new("ContentStore"),
        }
    }

    /// Insert new content
    ///
    /// Fills `normalized_profile_name` when it was left empty.
    pub async fn create(
        &self,
        mut entity: ContentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.lifecycle.check_write(cancel)?;

        if entity.normalized_profile_name.is_empty() {
            entity.normalized_profile_name = normalize_key(&entity.profile_name);
        }

        let created = self.items.insert(entity).await?;
        info!(id = %created.id, owner = %created.profile_id, "Created content");
        Ok(created)
    }

    /// Get content by id, including soft-deleted content
    pub async fn find_by_id(
        &self,
        id: Uuid,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.lifecycle.check_read(cancel)?;
        self.items.get(id).await
    }

    /// Get content by id, falling back to `default` when it does not exist
    pub async fn find_by_id_or(
        &self,
        id: Uuid,
        default: ContentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        match self.find_by_id(id, cancel).await {
            Err(StoreError::NotFound { .. }) => Ok(default),
            other => other,
        }
    }

    /// Non-deleted content among `ids`, newest first
    pub async fn find_many(
        &self,
        ids: &[Uuid],
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        if ids.is_empty() {
            return Err(StoreError::InvalidArgument(
                "At least one id is required".to_string(),
            ));
        }
        self.lifecycle.check_read(cancel)?;

        let ids = ids.iter().map(|id| Value::from(id.to_string())).collect();
        let filter = Filter::any_of(ID_FIELD, ids).and(Items::active());
        self.items
            .find(&filter, &Items::page(SortDirection::Descending, 0, None))
            .await
    }

    /// Page through non-deleted content in creation order
    pub async fn list(
        &self,
        offset: usize,
        limit: Option<usize>,
        direction: SortDirection,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        self.lifecycle.check_read(cancel)?;
        self.items
            .find(&Items::active(), &Items::page(direction, offset, limit))
            .await
    }

    /// Non-deleted content of one owner, newest first
    pub async fn list_by_owner(
        &self,
        owner: Uuid,
        offset: usize,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        self.lifecycle.check_read(cancel)?;
        self.items
            .find(
                &owned_by(owner),
                &Items::page(SortDirection::Descending, offset, limit),
            )
            .await
    }

    /// Non-deleted hidden content of one owner, newest first
    pub async fn list_hidden_by_owner(
        &self,
        owner: Uuid,
        offset: usize,
        limit: Option<usize>,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        self.lifecycle.check_read(cancel)?;
        let filter = owned_by(owner).and(Filter::eq(fields::HIDDEN, true));
        self.items
            .find(&filter, &Items::page(SortDirection::Descending, offset, limit))
            .await
    }

    /// Case-insensitive literal substring search on titles, newest first
    pub async fn search_by_keyword(
        &self,
        offset: usize,
        limit: Option<usize>,
        keyword: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<ContentEntity>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(StoreError::InvalidArgument(
                "Search keyword must not be blank".to_string(),
            ));
        }
        self.lifecycle.check_read(cancel)?;

        let filter = Filter::contains_ignore_case(fields::TITLE, keyword)?.and(Items::active());
        debug!(keyword, "Searching content");
        self.items
            .find(&filter, &Items::page(SortDirection::Descending, offset, limit))
            .await
    }

    /// Soft-delete content
    ///
    /// Returns `false` if it was already deleted.
    pub async fn soft_delete(&self, id: Uuid, cancel: &CancellationToken) -> StoreResult<bool> {
        self.lifecycle.check_write(cancel)?;
        let deleted = self.items.soft_delete(id, &[]).await?;
        if deleted {
            info!(id = %id, "Deleted content");
        }
        Ok(deleted)
    }

    /// Replace non-deleted content as a whole
    pub async fn replace(
        &self,
        entity: ContentEntity,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.lifecycle.check_write(cancel)?;
        self.items.replace(entity).await
    }

    // ==================== Counters ====================

    pub async fn set_views_count(
        &self,
        id: Uuid,
        count: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.set_counter(id, fields::VIEWS_COUNT, count, cancel).await
    }

    pub async fn set_likes_count(
        &self,
        id: Uuid,
        count: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.set_counter(id, fields::LIKES_COUNT, count, cancel).await
    }

    pub async fn set_comments_count(
        &self,
        id: Uuid,
        count: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.set_counter(id, fields::COMMENTS_COUNT, count, cancel).await
    }

    pub async fn add_views(
        &self,
        id: Uuid,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.add_to_counter(id, fields::VIEWS_COUNT, delta, cancel).await
    }

    pub async fn add_likes(
        &self,
        id: Uuid,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.add_to_counter(id, fields::LIKES_COUNT, delta, cancel).await
    }

    pub async fn add_comments(
        &self,
        id: Uuid,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.add_to_counter(id, fields::COMMENTS_COUNT, delta, cancel).await
    }

    async fn set_counter(
        &self,
        id: Uuid,
        field: &str,
        count: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.lifecycle.check_write(cancel)?;
        debug!(id = %id, field, count, "Setting counter");
        self.items.update(id, &[Update::set(field, count)]).await
    }

    /// Increment inside the store
    ///
    /// The stored value is the raw sum of deltas, so increments commute; a
    /// sum below zero reads back as zero.
    async fn add_to_counter(
        &self,
        id: Uuid,
        field: &str,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<ContentEntity> {
        self.lifecycle.check_write(cancel)?;
        debug!(id = %id, field, delta, "Adjusting counter");
        self.items.update(id, &[Update::inc(field, delta)]).await
    }

    /// The increment of `add_to_counter` as a batch companion
    pub(crate) fn counter_op(
        &self,
        id: Uuid,
        field: &str,
        delta: i64,
        cancel: &CancellationToken,
    ) -> StoreResult<WriteOp> {
        self.lifecycle.check_write(cancel)?;
        Ok(self.items.update_op(id, vec![Update::inc(field, delta)]))
    }

    /// Decode a content document written by a batch
    pub(crate) fn decode(&self, doc: Value) -> StoreResult<ContentEntity> {
        self.items.decode(doc)
    }

    // ==================== Counts ====================

    /// Exact number of non-deleted entities owned by `owner`
    pub async fn count_by_owner(&self, owner: Uuid, cancel: &CancellationToken) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        self.items.count(&owned_by(owner)).await
    }

    /// Total stored documents, deleted ones included
    pub async fn estimated_count(&self, cancel: &CancellationToken) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        self.items.estimated_count().await
    }

    /// Stop accepting writes
    pub fn close(&self) {
        self.lifecycle.close();
    }
}

fn owned_by(owner: Uuid) -> Filter {
    Filter::eq(fields::PROFILE_ID, owner.to_string()).and(Items::active())
}
