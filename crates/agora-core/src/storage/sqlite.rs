//! SQLite document store
//!
//! Embedded implementation of [`DocumentStore`]. Each document is one row of
//! the `documents` table holding its JSON body; filters, sorting and
//! grouping are evaluated in-process by the [`query`](super::query) module.
//!
//! ## Atomicity
//!
//! The connection sits behind a mutex and is only touched from tokio's
//! blocking pool. Every read-modify-write (`update_one`, `replace_one`)
//! runs inside a single transaction while the lock is held, so two
//! concurrent increments of the same field always both land. A
//! `write_batch` commits all of its writes or none of them.
//!
//! ## Tables
//!
//! - `collections` - registry of created collections
//! - `documents` - `(collection, id)` keyed JSON bodies, plus the optional
//!   `unique_key` column mirrored from the `_key` field

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{debug, info};

use super::document_store::DocumentStore;
use super::error::{StoreError, StoreResult};
use super::query::{apply_updates, group_counts, Filter, FindOptions, Update, WriteOp};
use super::query::{ID_FIELD, UNIQUE_KEY_FIELD};
use super::schema::{init_schema, needs_init};
use crate::config::Config;

/// Document store backed by a single SQLite database
#[derive(Clone)]
pub struct SqliteDocumentStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDocumentStore {
    /// Open or create the database configured in `config`
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.sqlite_path())
    }

    /// Open or create a database file at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {:?}", path))?;
        info!(path = ?path, "Opened document store");

        Self::initialize(conn)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        if needs_init(&conn) {
            init_schema(&conn).context("Failed to initialize SQLite schema")?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl SqliteDocumentStore {
    /// Run `work` against the locked connection on the blocking pool
    async fn with_connection<T, F>(&self, work: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            work(&mut conn)
        })
        .await
        .map_err(StoreError::unavailable)?
    }
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn create_collection(&self, name: &str) -> StoreResult<bool> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let created = register_collection(conn, &name)?;
            if created {
                debug!(collection = %name, "Created collection");
            }
            Ok(created)
        })
        .await
    }

    async fn has_collection(&self, name: &str) -> StoreResult<bool> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1)",
                params![name],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        let name = name.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;

            let documents =
                tx.execute("DELETE FROM documents WHERE collection = ?1", params![name])?;
            let removed = tx.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
            tx.commit()?;

            if removed > 0 {
                debug!(collection = %name, documents, "Dropped collection");
            }
            Ok(removed > 0)
        })
        .await
    }

    async fn insert_one(&self, collection: &str, doc: Value) -> StoreResult<()> {
        let collection = collection.to_string();
        self.with_connection(move |conn| insert_doc(conn, &collection, &doc))
            .await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        options: &FindOptions,
    ) -> StoreResult<Vec<Value>> {
        let collection = collection.to_string();
        let filter = filter.clone();
        let docs = self
            .with_connection(move |conn| load_matching(conn, &collection, &filter))
            .await?;

        Ok(options.apply(docs.into_iter().map(|(_, doc)| doc).collect()))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        updates: &[Update],
    ) -> StoreResult<Option<Value>> {
        check_updates(updates)?;

        let collection = collection.to_string();
        let filter = filter.clone();
        let updates = updates.to_vec();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let updated = update_doc(&tx, &collection, &filter, &updates)?;
            if updated.is_some() {
                tx.commit()?;
            }
            Ok(updated)
        })
        .await
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        mut doc: Value,
    ) -> StoreResult<bool> {
        if !doc.is_object() {
            return Err(StoreError::InvalidArgument(
                "Replacement document is not an object".to_string(),
            ));
        }

        let collection = collection.to_string();
        let filter = filter.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;

            let Some((id, _)) = load_matching(&tx, &collection, &filter)?.into_iter().next()
            else {
                return Ok(false);
            };

            doc[ID_FIELD] = Value::String(id.clone());
            write_back(&tx, &collection, &id, &doc)?;
            tx.commit()?;

            Ok(true)
        })
        .await
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> StoreResult<Option<Vec<Value>>> {
        for op in &ops {
            if let WriteOp::Update { updates, .. } = op {
                check_updates(updates)?;
            }
        }

        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let mut written = Vec::with_capacity(ops.len());

            for op in &ops {
                match op {
                    WriteOp::Insert { collection, doc } => {
                        insert_doc(&tx, collection, doc)?;
                        written.push(doc.clone());
                    }
                    WriteOp::Update {
                        collection,
                        filter,
                        updates,
                    } => match update_doc(&tx, collection, filter, updates)? {
                        Some(doc) => written.push(doc),
                        None => {
                            debug!(collection = %collection, "Batch target missing, rolling back");
                            return Ok(None);
                        }
                    },
                }
            }

            tx.commit()?;
            Ok(Some(written))
        })
        .await
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let collection = collection.to_string();
        let filter = filter.clone();
        self.with_connection(move |conn| {
            Ok(load_matching(conn, &collection, &filter)?.len() as u64)
        })
        .await
    }

    async fn estimated_count(&self, collection: &str) -> StoreResult<u64> {
        let collection = collection.to_string();
        self.with_connection(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![collection],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    async fn count_by(
        &self,
        collection: &str,
        filter: &Filter,
        field: &str,
    ) -> StoreResult<Vec<(Value, u64)>> {
        let collection = collection.to_string();
        let filter = filter.clone();
        let docs = self
            .with_connection(move |conn| load_matching(conn, &collection, &filter))
            .await?;

        Ok(group_counts(docs.iter().map(|(_, doc)| doc), field))
    }
}

// ==================== Private helpers ====================

fn register_collection(conn: &Connection, name: &str) -> StoreResult<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2)",
        params![name, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(inserted > 0)
}

fn insert_doc(conn: &Connection, collection: &str, doc: &Value) -> StoreResult<()> {
    let id = document_id(doc)?;
    let key = unique_key(doc);
    let body = encode(collection, doc)?;

    register_collection(conn, collection)?;
    conn.execute(
        "INSERT INTO documents (collection, id, unique_key, body) VALUES (?1, ?2, ?3, ?4)",
        params![collection, id, key, body],
    )
    .map_err(|e| StoreError::from_sqlite(e, collection, key.as_deref().unwrap_or(&id)))?;

    Ok(())
}

/// Apply `updates` to the first match; the caller owns the transaction
fn update_doc(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
    updates: &[Update],
) -> StoreResult<Option<Value>> {
    let Some((id, mut doc)) = load_matching(conn, collection, filter)?.into_iter().next() else {
        return Ok(None);
    };

    apply_updates(&mut doc, updates)?;
    write_back(conn, collection, &id, &doc)?;
    Ok(Some(doc))
}

/// Load `(id, document)` pairs of a collection that satisfy `filter`,
/// in insertion order
///
/// A pinned `_id` or `_key` narrows the SQL query to that row.
fn load_matching(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
) -> StoreResult<Vec<(String, Value)>> {
    let (sql, pinned) = match (filter.pinned_id(), filter.pinned_key()) {
        (Some(id), _) => (
            "SELECT id, body FROM documents WHERE collection = ?1 AND id = ?2",
            Some(id),
        ),
        (None, Some(key)) => (
            "SELECT id, body FROM documents WHERE collection = ?1 AND unique_key = ?2",
            Some(key),
        ),
        (None, None) => (
            "SELECT id, body FROM documents WHERE collection = ?1 ORDER BY rowid",
            None,
        ),
    };

    let mut stmt = conn.prepare_cached(sql)?;
    let rows: Vec<(String, String)> = match pinned {
        Some(value) => stmt
            .query_map(params![collection, value], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(params![collection], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?,
    };

    let mut matching = Vec::new();
    for (id, body) in rows {
        let doc: Value = serde_json::from_str(&body)
            .map_err(|e| StoreError::invalid_document(collection, e))?;
        if filter.matches(&doc) {
            matching.push((id, doc));
        }
    }
    Ok(matching)
}

fn write_back(conn: &Connection, collection: &str, id: &str, doc: &Value) -> StoreResult<()> {
    let key = unique_key(doc);
    let body = encode(collection, doc)?;

    conn.execute(
        "UPDATE documents SET body = ?1, unique_key = ?2 WHERE collection = ?3 AND id = ?4",
        params![body, key, collection, id],
    )
    .map_err(|e| StoreError::from_sqlite(e, collection, key.as_deref().unwrap_or(id)))?;
    Ok(())
}

fn encode(collection: &str, doc: &Value) -> StoreResult<String> {
    serde_json::to_string(doc).map_err(|e| StoreError::invalid_document(collection, e))
}

fn document_id(doc: &Value) -> StoreResult<String> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            StoreError::InvalidArgument(format!("Document has no string {} field", ID_FIELD))
        })
}

fn unique_key(doc: &Value) -> Option<String> {
    doc.get(UNIQUE_KEY_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn check_updates(updates: &[Update]) -> StoreResult<()> {
    let touches_id = updates.iter().any(|update| match update {
        Update::Set(field, _) | Update::Unset(field) | Update::Inc(field, _) => field == ID_FIELD,
    });
    if touches_id {
        return Err(StoreError::InvalidArgument(format!(
            "The {} field cannot be updated",
            ID_FIELD
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::query::SortDirection;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> SqliteDocumentStore {
        SqliteDocumentStore::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = store();
        store
            .insert_one("content", json!({"_id": "a", "title": "First"}))
            .await
            .unwrap();
        store
            .insert_one("content", json!({"_id": "b", "title": "Second"}))
            .await
            .unwrap();

        let all = store
            .find("content", &Filter::All, &FindOptions::new())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["_id"], "a");

        let one = store
            .find_one("content", &Filter::eq(ID_FIELD, "b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(one["title"], "Second");
    }

    #[tokio::test]
    async fn test_insert_creates_collection() {
        let store = store();
        assert!(!store.has_collection("views").await.unwrap());

        store.insert_one("views", json!({"_id": "v1"})).await.unwrap();
        assert!(store.has_collection("views").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_id_is_conflict() {
        let store = store();
        store.insert_one("content", json!({"_id": "a"})).await.unwrap();

        let err = store
            .insert_one("content", json!({"_id": "a"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Same id in another collection is fine
        store.insert_one("other", json!({"_id": "a"})).await.unwrap();
    }

    #[tokio::test]
    async fn test_document_without_id_is_rejected() {
        let store = store();
        let err = store
            .insert_one("content", json!({"title": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_unique_key_enforced_until_cleared() {
        let store = store();
        store
            .insert_one("votes", json!({"_id": "1", "_key": "u1|t"}))
            .await
            .unwrap();

        let err = store
            .insert_one("votes", json!({"_id": "2", "_key": "u1|t"}))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        store
            .update_one(
                "votes",
                &Filter::eq(ID_FIELD, "1"),
                &[Update::unset(UNIQUE_KEY_FIELD)],
            )
            .await
            .unwrap();

        store
            .insert_one("votes", json!({"_id": "2", "_key": "u1|t"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_one_returns_updated_document() {
        let store = store();
        store
            .insert_one("content", json!({"_id": "a", "likes_count": 0}))
            .await
            .unwrap();

        let updated = store
            .update_one(
                "content",
                &Filter::eq(ID_FIELD, "a"),
                &[Update::inc("likes_count", 1)],
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["likes_count"], 1);

        let missing = store
            .update_one(
                "content",
                &Filter::eq(ID_FIELD, "zzz"),
                &[Update::inc("likes_count", 1)],
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_cannot_change_id() {
        let store = store();
        store.insert_one("content", json!({"_id": "a"})).await.unwrap();

        let err = store
            .update_one("content", &Filter::All, &[Update::set(ID_FIELD, "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidArgument(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_all_land() {
        let store = store();
        store
            .insert_one("content", json!({"_id": "a", "views_count": 0}))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_one(
                        "content",
                        &Filter::eq(ID_FIELD, "a"),
                        &[Update::inc("views_count", 1)],
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let doc = store
            .find_one("content", &Filter::eq(ID_FIELD, "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["views_count"], 20);
    }

    #[tokio::test]
    async fn test_replace_keeps_id() {
        let store = store();
        store
            .insert_one("content", json!({"_id": "a", "title": "Old"}))
            .await
            .unwrap();

        let replaced = store
            .replace_one(
                "content",
                &Filter::eq(ID_FIELD, "a"),
                json!({"_id": "ignored", "title": "New"}),
            )
            .await
            .unwrap();
        assert!(replaced);

        let doc = store
            .find_one("content", &Filter::eq(ID_FIELD, "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["title"], "New");
        assert_eq!(doc["_id"], "a");

        let missing = store
            .replace_one("content", &Filter::eq(ID_FIELD, "b"), json!({}))
            .await
            .unwrap();
        assert!(!missing);
    }

    #[tokio::test]
    async fn test_counts() {
        let store = store();
        for (id, hidden) in [("a", true), ("b", false), ("c", true)] {
            store
                .insert_one("content", json!({"_id": id, "hidden": hidden}))
                .await
                .unwrap();
        }

        assert_eq!(store.estimated_count("content").await.unwrap(), 3);
        assert_eq!(
            store
                .count("content", &Filter::eq("hidden", true))
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.estimated_count("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_count_by() {
        let store = store();
        for (id, target) in [("1", "x"), ("2", "y"), ("3", "x")] {
            store
                .insert_one("views", json!({"_id": id, "target_id": target}))
                .await
                .unwrap();
        }

        let groups = store
            .count_by("views", &Filter::All, "target_id")
            .await
            .unwrap();
        assert_eq!(groups, vec![(json!("x"), 2), (json!("y"), 1)]);
    }

    #[tokio::test]
    async fn test_write_batch_commits_together() {
        let store = store();
        store
            .insert_one("content", json!({"_id": "a", "views_count": 0}))
            .await
            .unwrap();

        let written = store
            .write_batch(vec![
                WriteOp::Insert {
                    collection: "views".to_string(),
                    doc: json!({"_id": "v1", "target_id": "a"}),
                },
                WriteOp::Update {
                    collection: "content".to_string(),
                    filter: Filter::eq(ID_FIELD, "a"),
                    updates: vec![Update::inc("views_count", 1)],
                },
            ])
            .await
            .unwrap()
            .unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(written[1]["views_count"], 1);
        assert_eq!(store.estimated_count("views").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_write_batch_rolls_back_on_missing_target() {
        let store = store();

        let written = store
            .write_batch(vec![
                WriteOp::Insert {
                    collection: "views".to_string(),
                    doc: json!({"_id": "v1", "target_id": "gone"}),
                },
                WriteOp::Update {
                    collection: "content".to_string(),
                    filter: Filter::eq(ID_FIELD, "gone"),
                    updates: vec![Update::inc("views_count", 1)],
                },
            ])
            .await
            .unwrap();

        assert!(written.is_none());
        assert_eq!(store.estimated_count("views").await.unwrap(), 0);
        assert!(!store.has_collection("views").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_batch_rolls_back_on_conflict() {
        let store = store();
        store
            .insert_one("content", json!({"_id": "a", "likes_count": 0}))
            .await
            .unwrap();
        store
            .insert_one("votes", json!({"_id": "1", "_key": "u1|a"}))
            .await
            .unwrap();

        let err = store
            .write_batch(vec![
                WriteOp::Update {
                    collection: "content".to_string(),
                    filter: Filter::eq(ID_FIELD, "a"),
                    updates: vec![Update::inc("likes_count", 1)],
                },
                WriteOp::Insert {
                    collection: "votes".to_string(),
                    doc: json!({"_id": "2", "_key": "u1|a"}),
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        let doc = store
            .find_one("content", &Filter::eq(ID_FIELD, "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["likes_count"], 0);
    }

    #[tokio::test]
    async fn test_find_by_unique_key() {
        let store = store();
        for (id, key, active) in [("1", "u1|a", true), ("2", "u2|a", true), ("3", "u3|a", false)] {
            store
                .insert_one(
                    "votes",
                    json!({"_id": id, "_key": key, "is_deleted": !active}),
                )
                .await
                .unwrap();
        }

        let found = store
            .find(
                "votes",
                &Filter::eq(UNIQUE_KEY_FIELD, "u2|a").and(Filter::eq("is_deleted", false)),
                &FindOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["_id"], "2");

        // The remaining conditions still apply to the pinned row
        let inactive = store
            .count(
                "votes",
                &Filter::eq(UNIQUE_KEY_FIELD, "u3|a").and(Filter::eq("is_deleted", false)),
            )
            .await
            .unwrap();
        assert_eq!(inactive, 0);
    }

    #[tokio::test]
    async fn test_create_and_drop_collection() {
        let store = store();

        assert!(store.create_collection("comments_a").await.unwrap());
        assert!(!store.create_collection("comments_a").await.unwrap());
        assert!(store.has_collection("comments_a").await.unwrap());

        store
            .insert_one("comments_a", json!({"_id": "c1"}))
            .await
            .unwrap();

        assert!(store.drop_collection("comments_a").await.unwrap());
        assert!(!store.has_collection("comments_a").await.unwrap());
        assert_eq!(store.estimated_count("comments_a").await.unwrap(), 0);
        assert!(!store.drop_collection("comments_a").await.unwrap());
    }

    #[tokio::test]
    async fn test_find_sorted_and_sliced() {
        let store = store();
        for (id, created) in [("a", 2), ("b", 3), ("c", 1)] {
            store
                .insert_one("content", json!({"_id": id, "created_at": created}))
                .await
                .unwrap();
        }

        let options = FindOptions::new()
            .sort_by("created_at", SortDirection::Ascending)
            .skip(1)
            .limit(Some(5));
        let docs = store.find("content", &Filter::All, &options).await.unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_data_persists_across_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("agora.db");

        {
            let store = SqliteDocumentStore::open_path(&path).unwrap();
            store
                .insert_one("content", json!({"_id": "a", "title": "Persistent"}))
                .await
                .unwrap();
            store.create_collection("comments_a").await.unwrap();
        }

        let store = SqliteDocumentStore::open_path(&path).unwrap();
        let doc = store
            .find_one("content", &Filter::eq(ID_FIELD, "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["title"], "Persistent");
        assert!(store.has_collection("comments_a").await.unwrap());
    }
}
