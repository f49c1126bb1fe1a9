//! libSQL backend — durable `DocumentStore` implementation.
//!
//! One `documents` table holds every document as JSON text alongside an
//! integer revision column. Conditional writes are plain `UPDATE … WHERE
//! id = ? AND rev = ?`; zero affected rows means the revision was stale.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{params, Connection, Database};
use serde_json::Value;
use tracing::info;

use crate::error::StoreError;
use crate::store::{doc_type_of, DocumentStore, Revision, Versioned};

/// libSQL document store.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Backend(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Document store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create in-memory db: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| StoreError::Backend(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .execute(
                "CREATE TABLE IF NOT EXISTS documents (
                    id       TEXT PRIMARY KEY,
                    doc_type TEXT NOT NULL,
                    rev      INTEGER NOT NULL,
                    body     TEXT NOT NULL
                )",
                (),
            )
            .await
            .map_err(|e| StoreError::Backend(format!("Schema init failed: {e}")))?;
        self.conn
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_documents_type ON documents (doc_type)",
                (),
            )
            .await
            .map_err(|e| StoreError::Backend(format!("Schema init failed: {e}")))?;
        Ok(())
    }
}

fn backend_err(e: libsql::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn parse_body(id: &str, body: &str) -> Result<Value, StoreError> {
    serde_json::from_str(body)
        .map_err(|e| StoreError::Backend(format!("Corrupt document {id}: {e}")))
}

#[async_trait]
impl DocumentStore for LibSqlStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Value>>, StoreError> {
        let mut rows = self
            .conn
            .query("SELECT body, rev FROM documents WHERE id = ?1", params![id])
            .await
            .map_err(backend_err)?;

        match rows.next().await.map_err(backend_err)? {
            Some(row) => {
                let body: String = row.get(0).map_err(backend_err)?;
                let rev: i64 = row.get(1).map_err(backend_err)?;
                Ok(Some(Versioned {
                    id: id.to_string(),
                    rev: rev as Revision,
                    doc: parse_body(id, &body)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert(&self, id: &str, doc: &Value) -> Result<Revision, StoreError> {
        let body = serde_json::to_string(doc)?;
        let doc_type = doc_type_of(doc).to_string();
        self.conn
            .execute(
                "INSERT INTO documents (id, doc_type, rev, body) VALUES (?1, ?2, 1, ?3)",
                params![id, doc_type, body],
            )
            .await
            .map_err(|_| StoreError::Conflict {
                id: id.to_string(),
                expected: 0,
            })?;
        Ok(1)
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: Revision,
        doc: &Value,
    ) -> Result<Revision, StoreError> {
        let body = serde_json::to_string(doc)?;
        let doc_type = doc_type_of(doc).to_string();
        let affected = self
            .conn
            .execute(
                "UPDATE documents SET body = ?1, doc_type = ?2, rev = rev + 1
                 WHERE id = ?3 AND rev = ?4",
                params![body, doc_type, id, expected as i64],
            )
            .await
            .map_err(backend_err)?;

        if affected == 0 {
            return match self.get(id).await? {
                Some(_) => Err(StoreError::Conflict {
                    id: id.to_string(),
                    expected,
                }),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }
        Ok(expected + 1)
    }

    async fn list(&self, doc_type: &str) -> Result<Vec<Versioned<Value>>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, body, rev FROM documents WHERE doc_type = ?1 ORDER BY id",
                params![doc_type],
            )
            .await
            .map_err(backend_err)?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await.map_err(backend_err)? {
            let id: String = row.get(0).map_err(backend_err)?;
            let body: String = row.get(1).map_err(backend_err)?;
            let rev: i64 = row.get(2).map_err(backend_err)?;
            let doc = parse_body(&id, &body)?;
            docs.push(Versioned {
                id,
                rev: rev as Revision,
                doc,
            });
        }
        Ok(docs)
    }
}
