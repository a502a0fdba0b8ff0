//! Data models for Agora
//!
//! Defines the persisted entities: content, comments, votes and view
//! events. Every entity flattens a shared [`Timestamps`] block and is
//! stored as a JSON document whose `_id` is a time-ordered UUID.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Persisted field names used in filters and updates
pub mod fields {
    pub const CREATED_AT: &str = "created_at";
    pub const UPDATED_AT: &str = "updated_at";
    pub const DELETED_AT: &str = "deleted_at";
    pub const IS_DELETED: &str = "is_deleted";

    pub const PROFILE_ID: &str = "profile_id";
    pub const TITLE: &str = "title";
    pub const HIDDEN: &str = "hidden";
    pub const VIEWS_COUNT: &str = "views_count";
    pub const LIKES_COUNT: &str = "likes_count";
    pub const COMMENTS_COUNT: &str = "comments_count";

    pub const VOTES_COUNT: &str = "votes_count";

    pub const IDENTITY: &str = "identity";
    pub const TARGET_ID: &str = "target_id";
    pub const VOTE_TYPE: &str = "vote_type";
}

/// Creation, modification and soft-deletion times
///
/// Times are stored as integer nanoseconds so they sort numerically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timestamps {
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(
        default,
        with = "chrono::serde::ts_nanoseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(
        default,
        with = "chrono::serde::ts_nanoseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub deleted_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub is_deleted: bool,
}

impl Default for Timestamps {
    /// Unset timestamps; the store stamps `created_at` on insert
    fn default() -> Self {
        Self {
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: None,
            deleted_at: None,
            is_deleted: false,
        }
    }
}

impl Timestamps {
    pub fn now() -> Self {
        Self {
            created_at: Utc::now(),
            ..Self::default()
        }
    }

    /// Whether `created_at` still holds the zero value
    pub fn is_unset(&self) -> bool {
        self.created_at == DateTime::<Utc>::UNIX_EPOCH
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

/// A persisted record with an id and timestamps
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;
    fn timestamps(&self) -> &Timestamps;
    fn timestamps_mut(&mut self) -> &mut Timestamps;

    fn is_deleted(&self) -> bool {
        self.timestamps().is_deleted
    }
}

macro_rules! impl_entity {
    ($ty:ty) => {
        impl Entity for $ty {
            fn id(&self) -> Uuid {
                self.id
            }

            fn timestamps(&self) -> &Timestamps {
                &self.timestamps
            }

            fn timestamps_mut(&mut self) -> &mut Timestamps {
                &mut self.timestamps
            }
        }
    };
}

/// Case-folded search key for names and identities
pub fn normalize_key(value: &str) -> String {
    value.trim().to_uppercase()
}

/// Stored counters track raw deltas and may dip below zero; they read as zero
fn counter<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(i64::deserialize(deserializer)?.max(0) as u64)
}

/// A counter field of a raw document, read the way entities read it
pub fn read_counter(doc: &Value, field: &str) -> u64 {
    doc.get(field)
        .and_then(Value::as_i64)
        .map_or(0, |n| n.max(0) as u64)
}

// ==================== Content ====================

/// A published piece of content with denormalized engagement counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntity {
    #[serde(rename = "_id")]
    pub id: Uuid,
    /// Owner
    pub profile_id: Uuid,
    pub profile_name: String,
    #[serde(default)]
    pub normalized_profile_name: String,
    pub title: String,
    pub text: String,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, deserialize_with = "counter")]
    pub views_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub likes_count: u64,
    #[serde(default, deserialize_with = "counter")]
    pub comments_count: u64,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl_entity!(ContentEntity);

impl ContentEntity {
    /// Create new content owned by `profile_id`
    pub fn new(
        profile_id: Uuid,
        profile_name: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let profile_name = profile_name.into();
        Self {
            id: Uuid::now_v7(),
            profile_id,
            normalized_profile_name: normalize_key(&profile_name),
            profile_name,
            title: title.into(),
            text: text.into(),
            hidden: false,
            views_count: 0,
            likes_count: 0,
            comments_count: 0,
            timestamps: Timestamps::now(),
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.timestamps.touch();
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.timestamps.touch();
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
        self.timestamps.touch();
    }
}

// ==================== Comments ====================

/// A comment inside the partition of its parent content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentEntity {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub parent_id: Uuid,
    /// Comment this one answers; absent for top-level comments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub text: String,
    pub profile_id: Uuid,
    pub profile_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_image: Option<String>,
    #[serde(default, deserialize_with = "counter")]
    pub votes_count: u64,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl_entity!(CommentEntity);

impl CommentEntity {
    pub fn new(
        parent_id: Uuid,
        profile_id: Uuid,
        profile_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            parent_id,
            reply_to: None,
            text: text.into(),
            profile_id,
            profile_name: profile_name.into(),
            profile_image: None,
            votes_count: 0,
            timestamps: Timestamps::now(),
        }
    }

    /// Mark this comment as a reply
    pub fn replying_to(mut self, comment_id: Uuid) -> Self {
        self.reply_to = Some(comment_id);
        self
    }

    /// The comment answered, treating the nil id as "none"
    pub fn reply_target(&self) -> Option<Uuid> {
        self.reply_to.filter(|id| !id.is_nil())
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.timestamps.touch();
    }
}

// ==================== Votes ====================

/// Kind of vote; `None` is the "no vote" sentinel and is never stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteType {
    #[default]
    None,
    Like,
    Dislike,
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::None => write!(f, "none"),
            VoteType::Like => write!(f, "like"),
            VoteType::Dislike => write!(f, "dislike"),
        }
    }
}

impl FromStr for VoteType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(VoteType::None),
            "like" => Ok(VoteType::Like),
            "dislike" => Ok(VoteType::Dislike),
            other => Err(format!("Unknown vote type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Content,
    Comment,
}

/// What a vote is cast on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteTarget {
    Content(Uuid),
    /// A comment, addressed through the content that owns it
    Comment { parent_id: Uuid, comment_id: Uuid },
}

impl VoteTarget {
    pub fn target_id(&self) -> Uuid {
        match self {
            VoteTarget::Content(id) => *id,
            VoteTarget::Comment { comment_id, .. } => *comment_id,
        }
    }

    pub fn kind(&self) -> TargetKind {
        match self {
            VoteTarget::Content(_) => TargetKind::Content,
            VoteTarget::Comment { .. } => TargetKind::Comment,
        }
    }

    pub fn parent_id(&self) -> Option<Uuid> {
        match self {
            VoteTarget::Content(_) => None,
            VoteTarget::Comment { parent_id, .. } => Some(*parent_id),
        }
    }
}

impl fmt::Display for VoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteTarget::Content(id) => write!(f, "content:{}", id),
            VoteTarget::Comment {
                parent_id,
                comment_id,
            } => write!(f, "comment:{}/{}", parent_id, comment_id),
        }
    }
}

/// Unique key an active vote holds for its (identity, target) pair
pub fn active_vote_key(identity: &str, target_id: Uuid) -> String {
    format!("{}|{}", identity, target_id)
}

/// One vote by one identity on one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub identity: String,
    pub target_id: Uuid,
    pub target_kind: TargetKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    pub vote_type: VoteType,
    /// Present while the vote is active; cleared by soft deletion
    #[serde(rename = "_key", default, skip_serializing_if = "Option::is_none")]
    pub active_key: Option<String>,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl_entity!(VoteRecord);

impl VoteRecord {
    pub fn new(identity: impl Into<String>, target: VoteTarget, vote_type: VoteType) -> Self {
        let identity = identity.into();
        Self {
            id: Uuid::now_v7(),
            active_key: Some(active_vote_key(&identity, target.target_id())),
            identity,
            target_id: target.target_id(),
            target_kind: target.kind(),
            parent_id: target.parent_id(),
            vote_type,
            timestamps: Timestamps::now(),
        }
    }
}

// ==================== Views ====================

/// One view of a target by one identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewEvent {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub identity: String,
    pub target_id: Uuid,
    #[serde(flatten)]
    pub timestamps: Timestamps,
}

impl_entity!(ViewEvent);

impl ViewEvent {
    pub fn new(identity: impl Into<String>, target_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            identity: identity.into(),
            target_id,
            timestamps: Timestamps::now(),
        }
    }
}
