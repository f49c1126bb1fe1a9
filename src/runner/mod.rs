//! Task runner abstraction — the pluggable units that perform a task's
//! actual side effect.

pub mod builtin;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RunnerError;

pub use registry::RunnerRegistry;

/// Invocation context handed to a runner.
///
/// `params` is the task's snapshotted parameters deep-merged over the
/// job-level parameters; connection settings (SMTP hosts and the like)
/// live in the runner's own configuration, not in documents.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    pub job_id: String,
    pub step_name: String,
    pub worker_id: String,
    pub params: Value,
}

/// Structured result of a runner invocation.
///
/// `stdout`/`stderr` are small diagnostic objects recorded on the step,
/// not raw process streams (though the shell runner maps them directly).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerOutput {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<Value>,
}

impl RunnerOutput {
    /// Output carrying only a result value.
    pub fn result(value: Value) -> Self {
        Self {
            result: value,
            stdout: None,
            stderr: None,
        }
    }
}

/// A task runner, registered under its task's `plugin` name.
///
/// Runners validate required params up front and fail fast with a
/// descriptive error. The engine wraps every invocation in a watchdog
/// timer that drops the future on expiry, so runners must be safe to
/// cancel at any await point. A result that arrives after the step was
/// superseded loses the conditional save and is discarded.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Registry lookup key.
    fn name(&self) -> &str;

    /// Perform the side effect.
    async fn run(&self, ctx: RunnerContext) -> Result<RunnerOutput, RunnerError>;
}

/// Extract a required string param, failing fast when absent.
pub fn require_str<'a>(
    runner: &str,
    params: &'a Value,
    key: &str,
) -> Result<&'a str, RunnerError> {
    match params.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(other) if !other.is_null() => Err(RunnerError::InvalidParam {
            runner: runner.to_string(),
            key: key.to_string(),
            message: format!("expected a string, got {other}"),
        }),
        _ => Err(RunnerError::MissingParam {
            runner: runner.to_string(),
            key: key.to_string(),
        }),
    }
}

/// Extract an optional string param.
pub fn optional_str<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_str_accepts_present_strings() {
        let params = json!({"to": "ops@example.com"});
        assert_eq!(require_str("mail", &params, "to").unwrap(), "ops@example.com");
    }

    #[test]
    fn require_str_rejects_missing_and_mistyped() {
        let params = json!({"to": 42});
        assert!(matches!(
            require_str("mail", &params, "to"),
            Err(RunnerError::InvalidParam { .. })
        ));
        assert!(matches!(
            require_str("mail", &params, "subject"),
            Err(RunnerError::MissingParam { .. })
        ));
        assert!(matches!(
            require_str("mail", &json!({"to": ""}), "to"),
            Err(RunnerError::MissingParam { .. })
        ));
    }
}
