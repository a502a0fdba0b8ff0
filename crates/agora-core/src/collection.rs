//! Typed access to one collection of entities
//!
//! [`Collection`] wraps a [`DocumentStore`] and a collection name and
//! converts between entities and JSON documents. The concrete stores
//! (content, comment partitions, votes, views) are built on top of it.
//!
//! The `*_with` writes take companion [`WriteOp`]s (usually counter updates
//! built with [`Collection::update_op`]) and commit them in the same
//! atomic batch as the entity write.

use std::marker::PhantomData;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{fields, Entity};
use crate::storage::{
    DocumentStore, Filter, FindOptions, SortDirection, StoreError, StoreResult, Update, WriteOp,
    ID_FIELD,
};

pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: String,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            name: self.name.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Collection<T> {
    pub fn new(store: Arc<dyn DocumentStore>, name: impl Into<String>) -> Self {
        Self {
            store,
            name: name.into(),
            _entity: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // ==================== Filters ====================

    pub fn by_id(id: Uuid) -> Filter {
        Filter::eq(ID_FIELD, id.to_string())
    }

    /// Documents that have not been soft-deleted
    pub fn active() -> Filter {
        Filter::eq(fields::IS_DELETED, false)
    }

    /// Creation-time order with the id as tie-breaker, then offset/limit
    pub fn page(direction: SortDirection, offset: usize, limit: Option<usize>) -> FindOptions {
        FindOptions::new()
            .sort_by(fields::CREATED_AT, direction)
            .sort_by(ID_FIELD, direction)
            .skip(offset)
            .limit(limit)
    }

    // ==================== Reads ====================

    pub async fn get(&self, id: Uuid) -> StoreResult<T> {
        self.get_opt(id)
            .await?
            .ok_or_else(|| StoreError::not_found(&self.name, id))
    }

    pub async fn get_opt(&self, id: Uuid) -> StoreResult<Option<T>> {
        self.find_one(&Self::by_id(id)).await
    }

    pub async fn find(&self, filter: &Filter, options: &FindOptions) -> StoreResult<Vec<T>> {
        self.store
            .find(&self.name, filter, options)
            .await?
            .into_iter()
            .map(|doc| self.decode(doc))
            .collect()
    }

    pub async fn find_one(&self, filter: &Filter) -> StoreResult<Option<T>> {
        self.store
            .find_one(&self.name, filter)
            .await?
            .map(|doc| self.decode(doc))
            .transpose()
    }

    pub async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.store.count(&self.name, filter).await
    }

    pub async fn estimated_count(&self) -> StoreResult<u64> {
        self.store.estimated_count(&self.name).await
    }

    // ==================== Writes ====================

    /// Insert an entity, stamping `created_at` if it was left unset
    pub async fn insert(&self, entity: T) -> StoreResult<T> {
        let entity = stamped(entity);
        let doc = self.encode(&entity)?;
        self.store.insert_one(&self.name, doc).await?;
        Ok(entity)
    }

    /// Insert an entity and apply `companions` as one atomic batch
    ///
    /// Returns the entity with the documents written by the companions, or
    /// `None` (and no write at all) when a companion update matched nothing.
    pub async fn insert_with(
        &self,
        entity: T,
        companions: Vec<WriteOp>,
    ) -> StoreResult<Option<(T, Vec<Value>)>> {
        let entity = stamped(entity);
        let mut ops = vec![WriteOp::Insert {
            collection: self.name.clone(),
            doc: self.encode(&entity)?,
        }];
        ops.extend(companions);

        Ok(self
            .store
            .write_batch(ops)
            .await?
            .map(|written| (entity, written.into_iter().skip(1).collect())))
    }

    /// An update of the entity with `id`, for use as a batch companion
    pub fn update_op(&self, id: Uuid, updates: Vec<Update>) -> WriteOp {
        WriteOp::Update {
            collection: self.name.clone(),
            filter: Self::by_id(id),
            updates,
        }
    }

    /// Apply field updates to the entity with `id`, deleted or not
    pub async fn update(&self, id: Uuid, updates: &[Update]) -> StoreResult<T> {
        let doc = self
            .store
            .update_one(&self.name, &Self::by_id(id), updates)
            .await?
            .ok_or_else(|| StoreError::not_found(&self.name, id))?;
        self.decode(doc)
    }

    /// Replace a non-deleted entity, stamping `updated_at`
    pub async fn replace(&self, mut entity: T) -> StoreResult<T> {
        entity.timestamps_mut().touch();
        let id = entity.id();
        let doc = self.encode(&entity)?;

        let filter = Self::by_id(id).and(Self::active());
        if self.store.replace_one(&self.name, &filter, doc).await? {
            Ok(entity)
        } else {
            Err(StoreError::not_found(&self.name, id))
        }
    }

    /// Mark an entity deleted, applying `extra` updates in the same write
    ///
    /// Returns `false` when the entity was already deleted, leaving its
    /// `deleted_at` untouched.
    pub async fn soft_delete(&self, id: Uuid, extra: &[Update]) -> StoreResult<bool> {
        let filter = Self::by_id(id).and(Self::active());
        if self
            .store
            .update_one(&self.name, &filter, &deletion(extra)?)
            .await?
            .is_some()
        {
            return Ok(true);
        }

        match self.get_opt(id).await? {
            Some(_) => Ok(false),
            None => Err(StoreError::not_found(&self.name, id)),
        }
    }

    /// Soft-delete a live entity and apply `companions` as one atomic batch
    ///
    /// Returns the documents written by the companions. `None` means nothing
    /// was written: the entity is missing or already deleted, or a companion
    /// update matched nothing.
    pub async fn soft_delete_with(
        &self,
        id: Uuid,
        extra: &[Update],
        companions: Vec<WriteOp>,
    ) -> StoreResult<Option<Vec<Value>>> {
        let mut ops = vec![WriteOp::Update {
            collection: self.name.clone(),
            filter: Self::by_id(id).and(Self::active()),
            updates: deletion(extra)?,
        }];
        ops.extend(companions);

        Ok(self
            .store
            .write_batch(ops)
            .await?
            .map(|written| written.into_iter().skip(1).collect()))
    }

    // ==================== Encoding ====================

    fn encode(&self, entity: &T) -> StoreResult<Value> {
        serde_json::to_value(entity).map_err(|e| StoreError::invalid_document(&self.name, e))
    }

    pub(crate) fn decode(&self, doc: Value) -> StoreResult<T> {
        serde_json::from_value(doc).map_err(|e| StoreError::invalid_document(&self.name, e))
    }
}

fn stamped<T: Entity>(mut entity: T) -> T {
    if entity.timestamps().is_unset() {
        entity.timestamps_mut().created_at = Utc::now();
    }
    entity
}

fn deletion(extra: &[Update]) -> StoreResult<Vec<Update>> {
    let mut updates = vec![
        Update::set(fields::IS_DELETED, true),
        Update::set(fields::DELETED_AT, nanos(Utc::now())?),
    ];
    updates.extend_from_slice(extra);
    Ok(updates)
}

fn nanos(time: DateTime<Utc>) -> StoreResult<i64> {
    time.timestamp_nanos_opt()
        .ok_or_else(|| StoreError::InvalidArgument(format!("Timestamp {} is out of range", time)))
}
