//! Flow/Task catalog — read-only lookup of named definitions.
//!
//! Flows are keyed by `name::owner`, tasks by `name`. Catalog documents
//! are pre-existing and read-only to the engine; a job snapshots what it
//! needs at initialization, so later catalog edits never affect jobs
//! already in flight.

use std::sync::Arc;

use crate::error::CatalogError;
use crate::model::{Flow, Task, DOC_TYPE_FLOW, DOC_TYPE_TASK};
use crate::store::DocumentStore;

/// Read-only view over flow and task definitions in the store.
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn DocumentStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Resolve a flow by its `name::owner` key.
    pub async fn flow(&self, name: &str, owner: &str) -> Result<Flow, CatalogError> {
        for entry in self.store.list(DOC_TYPE_FLOW).await? {
            let flow: Flow =
                serde_json::from_value(entry.doc).map_err(|e| CatalogError::Decode {
                    id: entry.id.clone(),
                    message: e.to_string(),
                })?;
            if flow.name == name && flow.owner == owner {
                return Ok(flow);
            }
        }
        Err(CatalogError::FlowNotFound {
            key: format!("{name}::{owner}"),
        })
    }

    /// Resolve a task definition by name.
    pub async fn task(&self, name: &str) -> Result<Task, CatalogError> {
        for entry in self.store.list(DOC_TYPE_TASK).await? {
            let task: Task =
                serde_json::from_value(entry.doc).map_err(|e| CatalogError::Decode {
                    id: entry.id.clone(),
                    message: e.to_string(),
                })?;
            if task.name == name {
                return Ok(task);
            }
        }
        Err(CatalogError::TaskNotFound {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    async fn seeded() -> Catalog {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                "flow:onboard",
                &json!({
                    "type": "flow",
                    "name": "onboard",
                    "owner": "ops",
                    "tasks": {"structure": "sequence", "sequence": ["t1", "t2"]},
                    "retry": 1
                }),
            )
            .await
            .unwrap();
        store
            .insert(
                "task:t1",
                &json!({"type": "task", "name": "t1", "plugin": "shell", "retry": 2}),
            )
            .await
            .unwrap();
        Catalog::new(store)
    }

    #[tokio::test]
    async fn resolves_flow_by_name_and_owner() {
        let catalog = seeded().await;
        let flow = catalog.flow("onboard", "ops").await.unwrap();
        assert_eq!(flow.tasks.sequence, vec!["t1", "t2"]);
        assert_eq!(flow.retry, 1);
        assert_eq!(flow.key(), "onboard::ops");
    }

    #[tokio::test]
    async fn owner_scopes_flow_lookup() {
        let catalog = seeded().await;
        let missing = catalog.flow("onboard", "someone-else").await;
        assert!(matches!(missing, Err(CatalogError::FlowNotFound { .. })));
    }

    #[tokio::test]
    async fn resolves_task_by_name() {
        let catalog = seeded().await;
        let task = catalog.task("t1").await.unwrap();
        assert_eq!(task.plugin.as_deref(), Some("shell"));
        assert_eq!(task.retry, 2);

        assert!(matches!(
            catalog.task("ghost").await,
            Err(CatalogError::TaskNotFound { .. })
        ));
    }
}
