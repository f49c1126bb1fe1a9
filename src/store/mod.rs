//! Document store abstraction — revision-checked reads and writes.
//!
//! Every engine mutation is a conditional write keyed on the revision
//! last read. A write against a stale revision fails with
//! [`StoreError::Conflict`] and is simply discarded by the caller; the
//! next observation of the document re-evaluates from current state.

pub mod libsql_backend;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;

pub use libsql_backend::LibSqlStore;
pub use memory::MemoryStore;

/// Per-document optimistic-concurrency token. Starts at 1 on insert and
/// increments by 1 on every accepted write.
pub type Revision = u64;

/// A document together with its identity and revision.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub id: String,
    pub rev: Revision,
    pub doc: T,
}

impl<T> Versioned<T> {
    /// Replace the payload, keeping id and revision.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            id: self.id,
            rev: self.rev,
            doc: f(self.doc),
        }
    }
}

/// Backend-agnostic document store.
///
/// `compare_and_swap` is the single mutating primitive for existing
/// documents, keeping every race auditable and testable with the
/// in-memory fake.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document with its current revision.
    async fn get(&self, id: &str) -> Result<Option<Versioned<Value>>, StoreError>;

    /// Create a new document. Fails with `Conflict` if the id exists.
    async fn insert(&self, id: &str, doc: &Value) -> Result<Revision, StoreError>;

    /// Conditionally replace a document.
    ///
    /// Succeeds only if the stored revision equals `expected`, returning
    /// the new revision; otherwise fails with `Conflict` (or `NotFound`
    /// if the document vanished).
    async fn compare_and_swap(
        &self,
        id: &str,
        expected: Revision,
        doc: &Value,
    ) -> Result<Revision, StoreError>;

    /// List all documents of a given type, id-ordered.
    async fn list(&self, doc_type: &str) -> Result<Vec<Versioned<Value>>, StoreError>;
}

/// Extract the `type` discriminator from a document body.
pub(crate) fn doc_type_of(doc: &Value) -> &str {
    doc.get("type").and_then(Value::as_str).unwrap_or("")
}
