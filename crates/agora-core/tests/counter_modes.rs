//! Counter maintenance under interleaved and failing writes
//!
//! `PacedStore` wraps the SQLite store and can hold back or fail selected
//! writes, so concurrent flows interleave in a known order on a
//! multi-threaded runtime.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use agora_core::{
    partition_name, CancellationToken, CommentEntity, Config, ContentEntity, CounterMode,
    DocumentStore, Filter, FindOptions, Site, SqliteDocumentStore, StoreError, StoreResult,
    Update, VoteTarget, VoteType, WriteOp,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

#[derive(Default)]
struct Pacing {
    /// Hold back the next batch this long
    batch_delay: Option<Duration>,
    /// Fail the next batch that writes to this collection
    fail_batch_into: Option<String>,
    /// Hold back the next overwrite of a like counter with this value
    slow_likes_set: Option<(u64, Duration)>,
    /// Fail the next overwrite of a like counter
    fail_likes_set: bool,
}

struct PacedStore {
    inner: SqliteDocumentStore,
    pacing: Mutex<Pacing>,
}

impl PacedStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteDocumentStore::open_in_memory().unwrap(),
            pacing: Mutex::new(Pacing::default()),
        })
    }

    fn delay_next_batch(&self, delay: Duration) {
        self.pacing.lock().batch_delay = Some(delay);
    }

    fn fail_next_batch_into(&self, collection: &str) {
        self.pacing.lock().fail_batch_into = Some(collection.to_string());
    }

    fn slow_likes_set(&self, value: u64, delay: Duration) {
        self.pacing.lock().slow_likes_set = Some((value, delay));
    }

    fn fail_next_likes_set(&self) {
        self.pacing.lock().fail_likes_set = true;
    }
}

fn link_down() -> StoreError {
    StoreError::unavailable(io::Error::new(io::ErrorKind::ConnectionReset, "link down"))
}

fn likes_overwrite(updates: &[Update]) -> Option<u64> {
    updates.iter().find_map(|update| match update {
        Update::Set(field, value) if field == "likes_count" => value.as_u64(),
        _ => None,
    })
}

#[async_trait]
impl DocumentStore for PacedStore {
    async fn create_collection(&self, name: &str) -> StoreResult<bool> {
        self.inner.create_collection(name).await
    }

    async fn has_collection(&self, name: &str) -> StoreResult<bool> {
        self.inner.has_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        self.inner.drop_collection(name).await
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> StoreResult<()> {
        self.inner.insert_one(collection, doc).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        self.inner.find(collection, filter, options).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> StoreResult<Option<Value>> {
        let (delay, fail) = {
            let mut pacing = self.pacing.lock();
            let overwrite = likes_overwrite(updates);
            let delay = match (pacing.slow_likes_set, overwrite) {
                (Some((value, delay)), Some(set)) if set == value => {
                    pacing.slow_likes_set = None;
                    Some(delay)
                }
                _ => None,
            };
            let fail = overwrite.is_some() && std::mem::take(&mut pacing.fail_likes_set);
            (delay, fail)
        };

        if fail {
            return Err(link_down());
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.update_one(collection, filter, updates).await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        doc: Value,
    ) -> StoreResult<bool> {
        self.inner.replace_one(collection, filter, doc).await
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> StoreResult<Option<Vec<Value>>> {
        let (delay, fail) = {
            let mut pacing = self.pacing.lock();
            let fail = match &pacing.fail_batch_into {
                Some(name) => ops.iter().any(|op| op.collection() == name),
                None => false,
            };
            if fail {
                pacing.fail_batch_into = None;
            }
            (pacing.batch_delay.take(), fail)
        };

        if fail {
            return Err(link_down());
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.write_batch(ops).await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.inner.count(collection, filter).await
    }

    async fn estimated_count(&self, collection: &str) -> StoreResult<u64> {
        self.inner.estimated_count(collection).await
    }

    async fn count_by(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<(Value, u64)>> {
        self.inner.count_by(collection, filter, field).await
    }
}

struct Harness {
    site: Arc<Site>,
    store: Arc<PacedStore>,
    post: ContentEntity,
    cancel: CancellationToken,
}

impl Harness {
    async fn new(mode: CounterMode) -> Self {
        let store = PacedStore::new();
        let config = Config {
            counter_mode: mode,
            ..Config::default()
        };
        let site = Arc::new(Site::with_store(
            config,
            Arc::clone(&store) as Arc<dyn DocumentStore>,
        ));
        let cancel = CancellationToken::new();
        let post = site
            .publish(ContentEntity::new(Uuid::new_v4(), "alice", "Lamp", ""), &cancel)
            .await
            .unwrap();

        Self {
            site,
            store,
            post,
            cancel,
        }
    }

    fn target(&self) -> VoteTarget {
        VoteTarget::Content(self.post.id)
    }

    /// Toggle a like on a background task after `after`
    fn like_later(
        &self,
        identity: &str,
        after: Duration,
    ) -> tokio::task::JoinHandle<StoreResult<agora_core::ToggleOutcome>> {
        let site = Arc::clone(&self.site);
        let cancel = self.cancel.clone();
        let identity = identity.to_string();
        let id = self.post.id;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            site.toggle_content_vote(&identity, id, VoteType::Like, &cancel)
                .await
        })
    }

    async fn active_likes(&self) -> u64 {
        self.site
            .votes()
            .count_by_type(self.target(), VoteType::Like, &self.cancel)
            .await
            .unwrap()
    }

    async fn stored(&self) -> ContentEntity {
        self.site
            .content()
            .find_by_id(self.post.id, &self.cancel)
            .await
            .unwrap()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn atomic_counter_matches_votes_under_interleaving() {
    let h = Harness::new(CounterMode::Atomic).await;

    let mut handles = Vec::new();
    for i in 0..16 {
        handles.push(h.like_later(&format!("user{}", i), Duration::from_millis(i % 4)));
    }
    // One identity flips like, clear, like while the others land
    for i in 0..3 {
        handles.push(h.like_later("flipper", Duration::from_millis(i)));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.active_likes().await, 17);
    assert_eq!(h.stored().await.likes_count, 17);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delayed_like_cannot_outlive_its_clear() {
    let h = Harness::new(CounterMode::Atomic).await;

    // The first toggle's write is held back until the second has committed
    h.store.delay_next_batch(Duration::from_millis(150));
    let slow = h.like_later("u1", Duration::ZERO);
    let fast = h.like_later("u1", Duration::from_millis(30));

    let fast = fast.await.unwrap().unwrap();
    let slow = slow.await.unwrap().unwrap();
    // One toggle saw the like, the other cleared it
    assert_eq!(fast.likes_count + slow.likes_count, 1);

    assert_eq!(h.active_likes().await, 0);
    assert_eq!(h.stored().await.likes_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recompute_can_lose_an_interleaved_update() {
    let h = Harness::new(CounterMode::Recompute).await;

    // u1 counts one like but its overwrite lands after u2 wrote two
    h.store.slow_likes_set(1, Duration::from_millis(200));
    let first = h.like_later("u1", Duration::ZERO);
    let second = h.like_later("u2", Duration::from_millis(50));
    second.await.unwrap().unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(h.active_likes().await, 2);
    assert_eq!(h.stored().await.likes_count, 1);

    // A reconcile recounts and repairs it
    let likes = h
        .site
        .votes()
        .reconcile(h.target(), &h.cancel)
        .await
        .unwrap();
    assert_eq!(likes, 2);
    assert_eq!(h.stored().await.likes_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn atomic_keeps_an_interleaved_update() {
    let h = Harness::new(CounterMode::Atomic).await;

    // Same pacing as above; atomic mode never overwrites the counter
    h.store.slow_likes_set(1, Duration::from_millis(200));
    let first = h.like_later("u1", Duration::ZERO);
    let second = h.like_later("u2", Duration::from_millis(50));
    second.await.unwrap().unwrap();
    first.await.unwrap().unwrap();

    assert_eq!(h.active_likes().await, 2);
    assert_eq!(h.stored().await.likes_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_atomic_toggle_leaves_no_vote() {
    let h = Harness::new(CounterMode::Atomic).await;

    h.store.fail_next_batch_into("votes");
    let err = h
        .site
        .toggle_content_vote("u1", h.post.id, VoteType::Like, &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StoreUnavailable { .. }));
    assert!(err.is_retryable());

    assert_eq!(h.active_likes().await, 0);
    assert!(h
        .site
        .votes()
        .find_active("u1", h.target(), &h.cancel)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.stored().await.likes_count, 0);

    // The retry and later voters agree with the records
    for identity in ["u1", "u2", "u3"] {
        h.site
            .toggle_content_vote(identity, h.post.id, VoteType::Like, &h.cancel)
            .await
            .unwrap();
    }
    assert_eq!(h.active_likes().await, 3);
    assert_eq!(h.stored().await.likes_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_atomic_view_and_comment_leave_nothing_behind() {
    let h = Harness::new(CounterMode::Atomic).await;

    h.store.fail_next_batch_into("views");
    let err = h
        .site
        .read_content("u1", h.post.id, &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StoreUnavailable { .. }));
    assert_eq!(h.site.views().count(h.post.id, &h.cancel).await.unwrap(), 0);
    assert_eq!(h.stored().await.views_count, 0);

    let read = h
        .site
        .read_content("u1", h.post.id, &h.cancel)
        .await
        .unwrap();
    assert_eq!(read.views_count, 1);

    h.store.fail_next_batch_into(&partition_name(h.post.id));
    let err = h
        .site
        .post_comment(
            h.post.id,
            CommentEntity::new(h.post.id, Uuid::new_v4(), "bob", "hello"),
            &h.cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StoreUnavailable { .. }));

    let partition = h
        .site
        .comments()
        .partition(h.post.id, &h.cancel)
        .await
        .unwrap();
    assert_eq!(partition.count(&h.cancel).await.unwrap(), 0);
    assert_eq!(h.stored().await.comments_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recompute_heals_on_the_next_successful_write() {
    let h = Harness::new(CounterMode::Recompute).await;

    // The record lands but the recount write fails
    h.store.fail_next_likes_set();
    let err = h
        .site
        .toggle_content_vote("u1", h.post.id, VoteType::Like, &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::StoreUnavailable { .. }));
    assert_eq!(h.active_likes().await, 1);
    assert_eq!(h.stored().await.likes_count, 0);

    let outcome = h
        .site
        .toggle_content_vote("u2", h.post.id, VoteType::Like, &h.cancel)
        .await
        .unwrap();
    assert_eq!(outcome.likes_count, 2);
    assert_eq!(h.stored().await.likes_count, 2);
}
