//! Document store capability
//!
//! The core talks to its database only through [`DocumentStore`]. An
//! implementation must provide:
//!
//! - schemaless JSON object documents, each carrying a string `_id`
//! - per-document atomic writes (`update_one` and `replace_one` never
//!   expose a half-applied change)
//! - uniqueness of `_id` within a collection and of the optional `_key`
//!   field, reported as [`StoreError::Conflict`](super::StoreError::Conflict)
//! - idempotent `create_collection`
//! - all-or-nothing `write_batch`, so a record and the counters derived from
//!   it move together

use async_trait::async_trait;
use serde_json::Value;

use super::error::StoreResult;
use super::query::{Filter, FindOptions, Update, WriteOp};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the collection if it does not exist
    ///
    /// Returns `true` when this call created it.
    async fn create_collection(&self, name: &str) -> StoreResult<bool>;

    /// Check whether a collection has been created
    async fn has_collection(&self, name: &str) -> StoreResult<bool>;

    /// Physically remove a collection and all of its documents
    ///
    /// Returns `false` if the collection did not exist.
    async fn drop_collection(&self, name: &str) -> StoreResult<bool>;

    /// Insert a document, creating the collection on demand
    async fn insert_one(&self, collection: &str, doc: Value) -> StoreResult<()>;

    /// Find documents matching `filter`, ordered and sliced by `options`
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>>;

    /// Find the first document matching `filter`
    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Value>> {
        let options = FindOptions::new().limit(Some(1));
        Ok(self
            .find(collection, filter, &options)
            .await?
            .into_iter()
            .next())
    }

    /// Apply `updates` to the first document matching `filter`
    ///
    /// Returns the document as it is after the update, or `None` if nothing
    /// matched.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> StoreResult<Option<Value>>;

    /// Replace the first document matching `filter`, keeping its `_id`
    ///
    /// Returns `false` if nothing matched.
    async fn replace_one(&self, collection: &str, filter: &Filter, doc: Value)
        -> StoreResult<bool>;

    /// Apply `ops` in order as one atomic unit
    ///
    /// Returns the written documents, one per op. When an update matches
    /// nothing, no op takes effect and `None` is returned; any error also
    /// leaves the store untouched.
    async fn write_batch(&self, ops: Vec<WriteOp>) -> StoreResult<Option<Vec<Value>>>;

    /// Exact number of documents matching `filter`
    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Total number of documents in the collection, ignoring any filter
    async fn estimated_count(&self, collection: &str) -> StoreResult<u64>;

    /// Number of matching documents per distinct value of `field`
    async fn count_by(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<(Value, u64)>>;
}
