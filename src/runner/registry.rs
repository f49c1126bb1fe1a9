//! Runner registry — maps plugin names to loaded task runners.
//!
//! Constructed at startup and passed into the engine explicitly, so
//! tests can inject fake runners. A task whose plugin is absent from the
//! local registry is silently skipped by the engine: a differently
//! configured worker in the pool may carry it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::ConfigError;
use crate::model::deep_merge;
use crate::runner::{RunnerContext, RunnerOutput, TaskRunner};

/// Registry of available task runners.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: RwLock<HashMap<String, Arc<dyn TaskRunner>>>,
}

impl RunnerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner under its own name.
    pub async fn register(&self, runner: Arc<dyn TaskRunner>) {
        let name = runner.name().to_string();
        self.runners.write().await.insert(name.clone(), runner);
        tracing::debug!(runner = %name, "Registered task runner");
    }

    /// Get a runner by plugin name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn TaskRunner>> {
        self.runners.read().await.get(name).cloned()
    }

    /// Check whether a plugin name is available locally.
    pub async fn has(&self, name: &str) -> bool {
        self.runners.read().await.contains_key(name)
    }

    /// List registered runner names.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.runners.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered runners.
    pub async fn count(&self) -> usize {
        self.runners.read().await.len()
    }

    /// Load runner definitions from a directory.
    ///
    /// Every `*.json` file describes a named runner: `{"plugin": "...",
    /// "params": {...}}`. The file stem becomes the registered name; the
    /// definition delegates to the named plugin with its params bound as
    /// defaults. Returns the number of runners loaded.
    pub async fn load_dir(&self, dir: &Path) -> Result<usize, ConfigError> {
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let raw = std::fs::read_to_string(&path)?;
            let spec: RunnerSpec = match serde_json::from_str(&raw) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping malformed runner definition");
                    continue;
                }
            };

            let Some(delegate) = self.get(&spec.plugin).await else {
                tracing::warn!(
                    file = %path.display(),
                    plugin = %spec.plugin,
                    "Skipping runner definition: plugin not registered"
                );
                continue;
            };

            self.register(Arc::new(ConfiguredRunner {
                name: stem.to_string(),
                defaults: spec.params,
                delegate,
            }))
            .await;
            loaded += 1;
        }
        Ok(loaded)
    }
}

/// On-disk runner definition.
#[derive(Debug, Deserialize)]
struct RunnerSpec {
    plugin: String,
    #[serde(default)]
    params: Value,
}

/// A runner definition loaded from disk: a named delegate with bound
/// default params (invocation params win on conflict).
struct ConfiguredRunner {
    name: String,
    defaults: Value,
    delegate: Arc<dyn TaskRunner>,
}

#[async_trait::async_trait]
impl TaskRunner for ConfiguredRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, mut ctx: RunnerContext) -> Result<RunnerOutput, crate::error::RunnerError> {
        ctx.params = deep_merge(&self.defaults, &ctx.params);
        self.delegate.run(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunnerError;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoRunner;

    #[async_trait]
    impl TaskRunner for EchoRunner {
        fn name(&self) -> &str {
            "echo"
        }
        async fn run(&self, ctx: RunnerContext) -> Result<RunnerOutput, RunnerError> {
            Ok(RunnerOutput::result(ctx.params))
        }
    }

    fn ctx(params: Value) -> RunnerContext {
        RunnerContext {
            job_id: "j1".to_string(),
            step_name: "t1".to_string(),
            worker_id: "w1".to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = RunnerRegistry::new();
        registry.register(Arc::new(EchoRunner)).await;

        assert!(registry.has("echo").await);
        assert!(!registry.has("ghost").await);
        assert_eq!(registry.list().await, vec!["echo"]);
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn load_dir_binds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("greet.json"),
            r#"{"plugin": "echo", "params": {"greeting": "hello", "who": "world"}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let registry = RunnerRegistry::new();
        registry.register(Arc::new(EchoRunner)).await;
        let loaded = registry.load_dir(dir.path()).await.unwrap();
        assert_eq!(loaded, 1);

        let greet = registry.get("greet").await.unwrap();
        let out = greet.run(ctx(json!({"who": "ops"}))).await.unwrap();
        assert_eq!(out.result["greeting"], "hello");
        assert_eq!(out.result["who"], "ops"); // invocation wins
    }

    #[tokio::test]
    async fn load_dir_skips_unknown_plugins_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"{"plugin": "ghost"}"#).unwrap();
        std::fs::write(dir.path().join("b.json"), "not json").unwrap();

        let registry = RunnerRegistry::new();
        assert_eq!(registry.load_dir(dir.path()).await.unwrap(), 0);
        assert_eq!(registry.count().await, 0);
    }
}
