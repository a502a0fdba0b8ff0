//! Storage error handling
//!
//! Every fallible operation in the core returns a [`StoreError`]. The
//! variants follow the failure taxonomy callers map onto their own
//! responses (see [`StoreError::status_code`]).

use thiserror::Error;
use uuid::Uuid;

type BoxedSource = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Point lookup on an id that does not exist
    #[error("No document '{id}' in collection '{collection}'")]
    NotFound { collection: String, id: String },

    /// A comment partition was addressed before it was ever created
    #[error("No comment partition exists for parent '{parent_id}'")]
    PartitionNotFound { parent_id: Uuid },

    /// Malformed caller input
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The "no vote" sentinel was passed to a toggle
    #[error("Vote type 'none' cannot be registered. Use 'like' or 'dislike'.")]
    InvalidVoteType,

    /// A uniqueness constraint was violated
    #[error("Document with key '{key}' already exists in collection '{collection}'")]
    Conflict { collection: String, key: String },

    /// Transport or database failure
    #[error("Document store unavailable: {source}")]
    StoreUnavailable {
        #[source]
        source: BoxedSource,
    },

    /// A stored document could not be decoded into its entity type
    #[error("Document in collection '{collection}' is malformed: {details}")]
    InvalidDocument { collection: String, details: String },

    /// The cancellation signal fired before the operation reached the store
    #[error("Operation cancelled")]
    Cancelled,

    /// Write attempted after the component was closed
    #[error("{component} has been closed and no longer accepts writes")]
    Disposed { component: &'static str },
}

impl StoreError {
    /// Create a not-found error for a document id
    pub fn not_found(collection: impl Into<String>, id: impl ToString) -> Self {
        StoreError::NotFound {
            collection: collection.into(),
            id: id.to_string(),
        }
    }

    /// Wrap a transport-level failure
    pub fn unavailable(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        StoreError::StoreUnavailable {
            source: Box::new(source),
        }
    }

    /// Classify a SQLite error raised while writing `key` into `collection`
    ///
    /// Constraint violations become [`StoreError::Conflict`]; anything else
    /// is treated as the store being unavailable.
    pub fn from_sqlite(error: rusqlite::Error, collection: &str, key: &str) -> Self {
        match &error {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict {
                    collection: collection.to_string(),
                    key: key.to_string(),
                }
            }
            _ => StoreError::unavailable(error),
        }
    }

    /// Create an error for a document that failed to decode
    pub fn invalid_document(collection: impl Into<String>, error: serde_json::Error) -> Self {
        StoreError::InvalidDocument {
            collection: collection.into(),
            details: error.to_string(),
        }
    }

    /// HTTP-equivalent status for the request-handling layer
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound { .. } | StoreError::PartitionNotFound { .. } => 404,
            StoreError::InvalidArgument(_) | StoreError::InvalidVoteType => 400,
            StoreError::Conflict { .. } => 409,
            StoreError::Cancelled => 499,
            StoreError::InvalidDocument { .. } => 500,
            StoreError::StoreUnavailable { .. } | StoreError::Disposed { .. } => 503,
        }
    }

    /// Check if repeating the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::StoreUnavailable { .. } | StoreError::Conflict { .. }
        )
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        StoreError::unavailable(error)
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn constraint_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: documents.collection, documents.id".to_string()),
        )
    }

    #[test]
    fn test_constraint_violation_is_conflict() {
        let err = StoreError::from_sqlite(constraint_error(), "content", "abc");

        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(err.status_code(), 409);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_sqlite_errors_are_unavailable() {
        let err = StoreError::from_sqlite(rusqlite::Error::InvalidQuery, "content", "abc");

        assert!(matches!(err, StoreError::StoreUnavailable { .. }));
        assert_eq!(err.status_code(), 503);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::not_found("content", "x").status_code(), 404);
        assert_eq!(
            StoreError::PartitionNotFound {
                parent_id: Uuid::nil()
            }
            .status_code(),
            404
        );
        assert_eq!(StoreError::InvalidVoteType.status_code(), 400);
        assert_eq!(
            StoreError::InvalidArgument("empty".into()).status_code(),
            400
        );
        assert_eq!(StoreError::Cancelled.status_code(), 499);
        assert!(!StoreError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::not_found("content", "1234");
        let msg = err.to_string();
        assert!(msg.contains("content"));
        assert!(msg.contains("1234"));

        let err = StoreError::Disposed {
            component: "ContentStore",
        };
        assert!(err.to_string().contains("ContentStore"));
    }
}
