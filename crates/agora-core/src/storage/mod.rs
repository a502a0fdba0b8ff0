//! Storage layer
//!
//! Everything below the entity stores: the [`DocumentStore`] capability,
//! the query model it speaks, the error taxonomy and the embedded SQLite
//! engine that implements it.
//!
//! ## Architecture
//!
//! - **DocumentStore**: async trait over schemaless JSON collections
//! - **SQLite**: the shipped engine, one `documents` table keyed by
//!   `(collection, id)` plus a `collections` registry

pub mod document_store;
pub mod error;
pub mod query;
pub mod schema;
pub mod sqlite;

pub use document_store::DocumentStore;
pub use error::{StoreError, StoreResult};
pub use query::{
    Filter, FindOptions, SortDirection, Update, WriteOp, ID_FIELD, UNIQUE_KEY_FIELD,
};
pub use schema::{init_schema, needs_init, SCHEMA_VERSION};
pub use sqlite::SqliteDocumentStore;
