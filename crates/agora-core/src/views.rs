//! View counter
//!
//! Append-only log of view events. Views are not deduplicated: every call
//! to [`ViewCounter::record_view`] counts.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::collection::Collection;
use crate::lifecycle::Lifecycle;
use crate::models::{fields, ViewEvent};
use crate::storage::{DocumentStore, Filter, StoreResult, WriteOp};

/// Name of the views collection
pub const VIEWS_COLLECTION: &str = "views";

/// A target and how often it was viewed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PopularTarget {
    pub target_id: Uuid,
    pub views: u64,
}

pub struct ViewCounter {
    views: Collection<ViewEvent>,
    lifecycle: Lifecycle,
}

impl ViewCounter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            views: Collection::new(store, VIEWS_COLLECTION),
            lifecycle: Lifecycle::new("ViewCounter"),
        }
    }

    pub async fn record_view(
        &self,
        event: ViewEvent,
        cancel: &CancellationToken,
    ) -> StoreResult<ViewEvent> {
        self.lifecycle.check_write(cancel)?;
        self.views.insert(event).await
    }

    /// `record_view` with companion writes committed in the same batch
    pub(crate) async fn record_view_with(
        &self,
        event: ViewEvent,
        companions: Vec<WriteOp>,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<(ViewEvent, Vec<Value>)>> {
        self.lifecycle.check_write(cancel)?;
        self.views.insert_with(event, companions).await
    }

    /// Number of views recorded for `target_id`
    pub async fn count(&self, target_id: Uuid, cancel: &CancellationToken) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        self.views.count(&for_target(target_id)).await
    }

    /// Number of views `identity` produced for `target_id`
    pub async fn count_by_identity(
        &self,
        target_id: Uuid,
        identity: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        let filter = for_target(target_id).and(Filter::eq(fields::IDENTITY, identity));
        self.views.count(&filter).await
    }

    /// The `limit` most viewed targets, most views first
    ///
    /// Ties are ordered by target id.
    pub async fn top_by_views(
        &self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<PopularTarget>> {
        self.lifecycle.check_read(cancel)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let groups = self
            .views
            .store()
            .count_by(self.views.name(), &Filter::All, fields::TARGET_ID)
            .await?;

        let mut ranked: Vec<PopularTarget> = groups
            .into_iter()
            .filter_map(|(key, views)| match parse_target(&key) {
                Some(target_id) => Some(PopularTarget { target_id, views }),
                None => {
                    warn!(key = %key, "Skipping view group with malformed target id");
                    None
                }
            })
            .collect();

        ranked.sort_by(|a, b| b.views.cmp(&a.views).then(a.target_id.cmp(&b.target_id)));
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Stop accepting new views
    pub fn close(&self) {
        self.lifecycle.close();
    }
}

fn for_target(target_id: Uuid) -> Filter {
    Filter::eq(fields::TARGET_ID, target_id.to_string())
}

fn parse_target(key: &Value) -> Option<Uuid> {
    key.as_str().and_then(|s| Uuid::parse_str(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{SqliteDocumentStore, StoreError};

    fn counter() -> ViewCounter {
        let db = SqliteDocumentStore::open_in_memory().unwrap();
        ViewCounter::new(Arc::new(db))
    }

    #[tokio::test]
    async fn test_views_are_not_deduplicated() {
        let counter = counter();
        let cancel = CancellationToken::new();
        let target = Uuid::new_v4();

        for _ in 0..3 {
            counter
                .record_view(ViewEvent::new("U1", target), &cancel)
                .await
                .unwrap();
        }
        counter
            .record_view(ViewEvent::new("U2", target), &cancel)
            .await
            .unwrap();

        assert_eq!(counter.count(target, &cancel).await.unwrap(), 4);
        assert_eq!(
            counter.count_by_identity(target, "U1", &cancel).await.unwrap(),
            3
        );
        assert_eq!(counter.count(Uuid::new_v4(), &cancel).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_top_by_views() {
        let counter = counter();
        let cancel = CancellationToken::new();

        let mut ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        ids.sort();
        let [first, second, third] = ids;

        for (target, views) in [(first, 2), (second, 3), (third, 2)] {
            for _ in 0..views {
                counter
                    .record_view(ViewEvent::new("U1", target), &cancel)
                    .await
                    .unwrap();
            }
        }

        let top = counter.top_by_views(2, &cancel).await.unwrap();
        assert_eq!(
            top,
            vec![
                PopularTarget {
                    target_id: second,
                    views: 3
                },
                PopularTarget {
                    target_id: first,
                    views: 2
                },
            ]
        );

        assert!(counter.top_by_views(0, &cancel).await.unwrap().is_empty());
        assert_eq!(counter.top_by_views(10, &cancel).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_closed_counter_rejects_views() {
        let counter = counter();
        let cancel = CancellationToken::new();

        counter.close();
        let err = counter
            .record_view(ViewEvent::new("U1", Uuid::new_v4()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Disposed { .. }));
        assert_eq!(counter.count(Uuid::new_v4(), &cancel).await.unwrap(), 0);
    }
}
