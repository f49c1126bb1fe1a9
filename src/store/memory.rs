//! In-memory store — `DocumentStore` fake for tests and local runs.
//!
//! Mirrors the conflict semantics of the durable backend exactly, so
//! claiming races can be simulated deterministically in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{doc_type_of, DocumentStore, Revision, Versioned};

/// In-memory document store.
#[derive(Default)]
pub struct MemoryStore {
    docs: RwLock<BTreeMap<String, (Revision, Value)>>,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    /// Whether the store holds no documents.
    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<Value>>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs.get(id).map(|(rev, doc)| Versioned {
            id: id.to_string(),
            rev: *rev,
            doc: doc.clone(),
        }))
    }

    async fn insert(&self, id: &str, doc: &Value) -> Result<Revision, StoreError> {
        let mut docs = self.docs.write().await;
        if docs.contains_key(id) {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected: 0,
            });
        }
        docs.insert(id.to_string(), (1, doc.clone()));
        Ok(1)
    }

    async fn compare_and_swap(
        &self,
        id: &str,
        expected: Revision,
        doc: &Value,
    ) -> Result<Revision, StoreError> {
        let mut docs = self.docs.write().await;
        let Some((rev, body)) = docs.get_mut(id) else {
            return Err(StoreError::NotFound(id.to_string()));
        };
        if *rev != expected {
            return Err(StoreError::Conflict {
                id: id.to_string(),
                expected,
            });
        }
        *rev += 1;
        *body = doc.clone();
        Ok(*rev)
    }

    async fn list(&self, doc_type: &str) -> Result<Vec<Versioned<Value>>, StoreError> {
        let docs = self.docs.read().await;
        Ok(docs
            .iter()
            .filter(|(_, (_, doc))| doc_type_of(doc) == doc_type)
            .map(|(id, (rev, doc))| Versioned {
                id: id.clone(),
                rev: *rev,
                doc: doc.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_and_get() {
        let store = MemoryStore::new();
        let rev = store.insert("j1", &json!({"type": "job"})).await.unwrap();
        assert_eq!(rev, 1);

        let doc = store.get("j1").await.unwrap().unwrap();
        assert_eq!(doc.rev, 1);
        assert_eq!(doc.doc["type"], "job");

        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryStore::new();
        store.insert("j1", &json!({"type": "job"})).await.unwrap();
        let err = store.insert("j1", &json!({"type": "job"})).await;
        assert!(matches!(err, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn cas_accepts_current_revision_only() {
        let store = MemoryStore::new();
        store.insert("j1", &json!({"n": 0})).await.unwrap();

        let rev = store
            .compare_and_swap("j1", 1, &json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(rev, 2);

        // Replay against the stale revision loses
        let stale = store.compare_and_swap("j1", 1, &json!({"n": 2})).await;
        assert!(matches!(stale, Err(StoreError::Conflict { .. })));

        let doc = store.get("j1").await.unwrap().unwrap();
        assert_eq!(doc.doc["n"], 1);
        assert_eq!(doc.rev, 2);
    }

    #[tokio::test]
    async fn cas_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store.compare_and_swap("ghost", 1, &json!({})).await;
        assert!(matches!(err, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_filters_by_type() {
        let store = MemoryStore::new();
        store.insert("j1", &json!({"type": "job"})).await.unwrap();
        store.insert("f1", &json!({"type": "flow"})).await.unwrap();
        store.insert("j2", &json!({"type": "job"})).await.unwrap();

        let jobs = store.list("job").await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].id, "j1");
        assert_eq!(jobs[1].id, "j2");
    }
}
