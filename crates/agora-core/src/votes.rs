//! Vote aggregation
//!
//! Each (identity, target) pair has at most one active [`VoteRecord`].
//! Toggling either creates one or soft-deletes the existing one, and the
//! target's denormalized like counter follows the configured
//! [`CounterMode`].
//!
//! An active record carries a unique `_key`, so two concurrent toggles of
//! the same pair cannot both insert: the loser sees a conflict, re-reads
//! and applies the transition to the state it finds.
//!
//! In [`CounterMode::Atomic`] the counter increment is committed in the
//! same batch as the record write, so a failed toggle changes neither.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collection::Collection;
use crate::comments::CommentPartitionManager;
use crate::config::CounterMode;
use crate::content::ContentStore;
use crate::lifecycle::Lifecycle;
use crate::models::{active_vote_key, fields, read_counter, VoteRecord, VoteTarget, VoteType};
use crate::storage::{
    DocumentStore, Filter, StoreError, StoreResult, Update, WriteOp, UNIQUE_KEY_FIELD,
};

/// Name of the votes collection
pub const VOTES_COLLECTION: &str = "votes";

/// Attempts at re-reading the active vote after losing a race
const MAX_TOGGLE_ATTEMPTS: usize = 4;

type Votes = Collection<VoteRecord>;

/// Vote state of one identity on one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "vote_type", rename_all = "snake_case")]
pub enum VoteState {
    NoVote,
    Voted(VoteType),
}

impl fmt::Display for VoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteState::NoVote => write!(f, "no vote"),
            VoteState::Voted(vote_type) => write!(f, "voted {}", vote_type),
        }
    }
}

/// Result of a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub state: VoteState,
    /// Target's like counter after the toggle
    pub likes_count: u64,
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Created(VoteType),
    Cleared(VoteType),
}

impl Transition {
    fn like_delta(self) -> i64 {
        match self {
            Transition::Created(VoteType::Like) => 1,
            Transition::Cleared(VoteType::Like) => -1,
            _ => 0,
        }
    }

    fn state(self) -> VoteState {
        match self {
            Transition::Created(vote_type) => VoteState::Voted(vote_type),
            Transition::Cleared(_) => VoteState::NoVote,
        }
    }
}

pub struct VoteAggregationEngine {
    votes: Votes,
    content: Arc<ContentStore>,
    comments: Arc<CommentPartitionManager>,
    mode: CounterMode,
    lifecycle: Lifecycle,
}

impl VoteAggregationEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        content: Arc<ContentStore>,
        comments: Arc<CommentPartitionManager>,
        mode: CounterMode,
    ) -> Self {
        Self {
            votes: Collection::new(store, VOTES_COLLECTION),
            content,
            comments,
            mode,
            lifecycle: Lifecycle::new("VoteAggregationEngine"),
        }
    }

    pub fn counter_mode(&self) -> CounterMode {
        self.mode
    }

    /// Flip the vote of `identity` on `target`
    ///
    /// With no active vote a new one of `vote_type` is recorded. An active
    /// vote of any type is cleared, so a dislike followed by a like leaves
    /// no vote at all.
    pub async fn toggle(
        &self,
        identity: &str,
        target: VoteTarget,
        vote_type: VoteType,
        cancel: &CancellationToken,
    ) -> StoreResult<ToggleOutcome> {
        if vote_type == VoteType::None {
            return Err(StoreError::InvalidVoteType);
        }
        self.lifecycle.check_write(cancel)?;
        self.current_likes(target, cancel).await?;

        let mut applied = None;
        for attempt in 1..=MAX_TOGGLE_ATTEMPTS {
            match self.try_toggle(identity, target, vote_type, cancel).await {
                Ok(Some(done)) => {
                    applied = Some(done);
                    break;
                }
                Ok(None) | Err(StoreError::Conflict { .. }) => {
                    debug!(%target, identity, attempt, "Lost vote race, re-reading");
                }
                Err(e) => return Err(e),
            }
        }

        let Some((transition, batched)) = applied else {
            warn!(%target, identity, "Giving up on contended vote");
            return Err(StoreError::Conflict {
                collection: VOTES_COLLECTION.to_string(),
                key: active_vote_key(identity, target.target_id()),
            });
        };

        let likes_count = match batched {
            Some(likes) => likes,
            None => self.push_counter(target, transition, cancel).await?,
        };
        info!(%target, identity, state = %transition.state(), likes_count, "Toggled vote");

        Ok(ToggleOutcome {
            state: transition.state(),
            likes_count,
        })
    }

    /// One read-then-write pass; `None` means the state moved underneath us
    ///
    /// Alongside the transition comes the like counter when it was written
    /// in the same batch as the record.
    async fn try_toggle(
        &self,
        identity: &str,
        target: VoteTarget,
        vote_type: VoteType,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<(Transition, Option<u64>)>> {
        match self.active_record(identity, target).await? {
            None => {
                let transition = Transition::Created(vote_type);
                let companions = self.counter_companions(target, transition, cancel).await?;
                let record = VoteRecord::new(identity, target, vote_type);

                match self.votes.insert_with(record, companions).await? {
                    Some((_, written)) => Ok(Some((transition, batched_likes(target, &written)))),
                    None => {
                        // Fails with NotFound if the target went away
                        self.current_likes(target, cancel).await?;
                        Ok(None)
                    }
                }
            }
            Some(record) => {
                let transition = Transition::Cleared(record.vote_type);
                let companions = self.counter_companions(target, transition, cancel).await?;

                let written = self
                    .votes
                    .soft_delete_with(record.id, &[Update::unset(UNIQUE_KEY_FIELD)], companions)
                    .await?;
                Ok(written.map(|written| (transition, batched_likes(target, &written))))
            }
        }
    }

    /// Counter update to commit with the record write, in atomic mode only
    async fn counter_companions(
        &self,
        target: VoteTarget,
        transition: Transition,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<WriteOp>> {
        let delta = transition.like_delta();
        if self.mode != CounterMode::Atomic || delta == 0 {
            return Ok(Vec::new());
        }

        let op = match target {
            VoteTarget::Content(id) => {
                self.content
                    .counter_op(id, fields::LIKES_COUNT, delta, cancel)?
            }
            VoteTarget::Comment {
                parent_id,
                comment_id,
            } => self
                .comments
                .partition(parent_id, cancel)
                .await?
                .counter_op(comment_id, delta, cancel)?,
        };
        Ok(vec![op])
    }

    async fn active_record(
        &self,
        identity: &str,
        target: VoteTarget,
    ) -> StoreResult<Option<VoteRecord>> {
        let key = active_vote_key(identity, target.target_id());
        self.votes
            .find_one(&Filter::eq(UNIQUE_KEY_FIELD, key).and(Votes::active()))
            .await
    }

    /// Number of active votes of `vote_type` on `target`
    pub async fn count_by_type(
        &self,
        target: VoteTarget,
        vote_type: VoteType,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        self.lifecycle.check_read(cancel)?;
        let filter = Filter::eq(fields::TARGET_ID, target.target_id().to_string())
            .and(Filter::eq(fields::VOTE_TYPE, vote_type.to_string()))
            .and(Votes::active());
        self.votes.count(&filter).await
    }

    /// The active vote of `identity` on `target`, if any
    pub async fn find_active(
        &self,
        identity: &str,
        target: VoteTarget,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<VoteRecord>> {
        self.lifecycle.check_read(cancel)?;
        self.active_record(identity, target).await
    }

    /// Recount likes on `target` and overwrite its counter
    pub async fn reconcile(
        &self,
        target: VoteTarget,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        self.lifecycle.check_write(cancel)?;
        let likes = self.count_by_type(target, VoteType::Like, cancel).await?;
        self.set_likes(target, likes, cancel).await?;
        info!(%target, likes, "Reconciled like counter");
        Ok(likes)
    }

    /// Stop accepting toggles
    pub fn close(&self) {
        self.lifecycle.close();
    }

    // ==================== Target counters ====================

    async fn push_counter(
        &self,
        target: VoteTarget,
        transition: Transition,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        match self.mode {
            CounterMode::Atomic => self.current_likes(target, cancel).await,
            CounterMode::Recompute => {
                let likes = self.count_by_type(target, VoteType::Like, cancel).await?;
                self.set_likes(target, likes, cancel).await?;
                Ok(likes)
            }
        }
    }

    /// Like counter of the target; fails if the target does not exist
    async fn current_likes(&self, target: VoteTarget, cancel: &CancellationToken) -> StoreResult<u64> {
        match target {
            VoteTarget::Content(id) => Ok(self.content.find_by_id(id, cancel).await?.likes_count),
            VoteTarget::Comment {
                parent_id,
                comment_id,
            } => Ok(self
                .comments
                .partition(parent_id, cancel)
                .await?
                .find_by_id(comment_id, cancel)
                .await?
                .votes_count),
        }
    }

    async fn set_likes(
        &self,
        target: VoteTarget,
        likes: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        match target {
            VoteTarget::Content(id) => {
                self.content.set_likes_count(id, likes, cancel).await?;
            }
            VoteTarget::Comment {
                parent_id,
                comment_id,
            } => {
                self.comments
                    .partition(parent_id, cancel)
                    .await?
                    .set_votes_count(comment_id, likes, cancel)
                    .await?;
            }
        }
        Ok(())
    }
}

/// Like counter of the target document a batch wrote, if it wrote one
fn batched_likes(target: VoteTarget, written: &[Value]) -> Option<u64> {
    let field = match target {
        VoteTarget::Content(_) => fields::LIKES_COUNT,
        VoteTarget::Comment { .. } => fields::VOTES_COUNT,
    };
    written.first().map(|doc| read_counter(doc, field))
}
