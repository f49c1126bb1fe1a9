//! Job / Step / Flow / Task data model.
//!
//! Documents are stored as JSON. The wire format keeps the legacy state
//! markers (`$$ready`, `$$complete`, `<task>-<n>`, …) so existing
//! documents and dashboards remain readable, while the in-memory
//! representation is a proper tagged enum.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Document type discriminator for jobs.
pub const DOC_TYPE_JOB: &str = "job";
/// Document type discriminator for flow catalog entries.
pub const DOC_TYPE_FLOW: &str = "flow";
/// Document type discriminator for task catalog entries.
pub const DOC_TYPE_TASK: &str = "task";

/// Shape of a task list. Only linear sequences are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Structure {
    #[default]
    Sequence,
}

/// Ordered task names for a job, snapshotted from the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskList {
    #[serde(default)]
    pub structure: Structure,
    pub sequence: Vec<String>,
}

/// Job-level state.
///
/// `Running` carries the task name and step index purely for diagnostics;
/// control flow is derived from the step history, never from this marker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobState {
    /// No state field on the document yet — initialization pending.
    #[default]
    Uninitialized,
    Ready,
    Running {
        task: String,
        step_index: usize,
    },
    Timeout,
    Error,
    Complete,
}

impl JobState {
    /// Wire marker for this state, `None` for `Uninitialized` (the field
    /// is simply absent on an uninitialized document).
    pub fn marker(&self) -> Option<String> {
        match self {
            Self::Uninitialized => None,
            Self::Ready => Some("$$ready".to_string()),
            Self::Running { task, step_index } => Some(format!("{task}-{step_index}")),
            Self::Timeout => Some("$$timeout".to_string()),
            Self::Error => Some("$$error".to_string()),
            Self::Complete => Some("$$complete".to_string()),
        }
    }

    /// Parse a wire marker. Any non-reserved string is a running marker.
    pub fn from_marker(s: &str) -> Self {
        match s {
            "$$ready" => Self::Ready,
            "$$timeout" => Self::Timeout,
            "$$error" => Self::Error,
            "$$complete" => Self::Complete,
            other => {
                if let Some((task, index)) = other.rsplit_once('-')
                    && let Ok(step_index) = index.parse::<usize>()
                {
                    return Self::Running {
                        task: task.to_string(),
                        step_index,
                    };
                }
                Self::Running {
                    task: other.to_string(),
                    step_index: 0,
                }
            }
        }
    }

    pub fn is_uninitialized(&self) -> bool {
        matches!(self, Self::Uninitialized)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.marker() {
            Some(m) => write!(f, "{m}"),
            None => write!(f, "(uninitialized)"),
        }
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.marker() {
            Some(m) => serializer.serialize_str(&m),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for JobState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let marker = Option::<String>::deserialize(deserializer)?;
        Ok(marker
            .map(|m| Self::from_marker(&m))
            .unwrap_or(Self::Uninitialized))
    }
}

/// State of a single step attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
    #[serde(rename = "$$ready")]
    Ready,
    #[serde(rename = "$$active")]
    Active,
    #[serde(rename = "$$complete")]
    Complete,
    #[serde(rename = "$$timeout")]
    Timeout,
    #[serde(rename = "$$error")]
    Error,
}

impl StepState {
    /// Terminal states are permanent: forward progress after a terminal
    /// non-complete state is always a new appended step, never a rewrite.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Timeout | Self::Error)
    }
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ready => "$$ready",
            Self::Active => "$$active",
            Self::Complete => "$$complete",
            Self::Timeout => "$$timeout",
            Self::Error => "$$error",
        };
        write!(f, "{s}")
    }
}

/// One attempted execution of a named task within a job's history.
///
/// Appended at claim time, cloned from the Task catalog definition.
/// `name` and `start` are never altered after the append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    /// Runner lookup key; defaults to `name` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    /// Remaining retry budget for this step lineage.
    #[serde(default)]
    pub retry: u32,
    /// Per-step timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Task-level error handler task name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Identity of the worker that claimed this step.
    pub pid: String,
    /// Marks steps appended by error escalation rather than the sequence.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cleanup: bool,
    pub start: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<Value>,
}

impl Step {
    /// Runner registry lookup key.
    pub fn plugin_name(&self) -> &str {
        self.plugin.as_deref().unwrap_or(&self.name)
    }

    /// Effective timeout in milliseconds given job and engine fallbacks.
    pub fn timeout_ms(&self, job_timeout: Option<u64>, default_ms: u64) -> u64 {
        self.timeout.or(job_timeout).unwrap_or(default_ms)
    }

    /// Instant after which any worker may mark this step timed out.
    pub fn deadline(&self, job_timeout: Option<u64>, default_ms: u64) -> DateTime<Utc> {
        self.start + Duration::milliseconds(self.timeout_ms(job_timeout, default_ms) as i64)
    }

    /// Clone this failed step into a fresh retry attempt.
    ///
    /// Retries are visible as new audit entries rather than mutations:
    /// the clone is reset to ready with a decremented budget and cleared
    /// outputs, and is owned by the worker that generated it.
    pub fn retry_clone(&self, pid: &str, now: DateTime<Utc>) -> Step {
        Step {
            name: self.name.clone(),
            plugin: self.plugin.clone(),
            params: self.params.clone(),
            retry: self.retry.saturating_sub(1),
            timeout: self.timeout,
            error: self.error.clone(),
            pid: pid.to_string(),
            cleanup: self.cleanup,
            start: now,
            end: None,
            state: StepState::Ready,
            result: None,
            stdout: None,
            stderr: None,
        }
    }
}

/// One persisted unit of requested work, tracked through an ordered,
/// append-only list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub flow: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Snapshotted from the flow at initialization; immutable afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskList>,
    /// Job-level error handler task, snapshotted from the flow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Remaining job-level retry budget, snapshotted from the flow.
    #[serde(default)]
    pub retry: u32,
    /// Job-level step timeout override in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "JobState::is_uninitialized")]
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Step>,
    /// Index into `steps` where the current run of the sequence begins.
    /// Advanced by job-level retries so history stays append-only.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub restart_from: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    /// Result code, set only when the job reaches `$$complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit: Option<i32>,
}

fn default_owner() -> String {
    "default".to_string()
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl Job {
    /// Steps belonging to the current run of the sequence.
    pub fn window(&self) -> &[Step] {
        &self.steps[self.restart_from.min(self.steps.len())..]
    }

    /// Last step of the current run, if any.
    pub fn last_step(&self) -> Option<&Step> {
        self.window().last()
    }

    /// Absolute index of the last step, if any.
    pub fn last_step_index(&self) -> Option<usize> {
        self.steps.len().checked_sub(1)
    }

    /// A job is on a task boundary when no step is currently owned and
    /// unfinished, making it eligible for claiming the next task.
    pub fn at_boundary(&self) -> bool {
        self.last_step().is_none_or(|s| s.state.is_terminal())
    }

    /// Catalog key resolving this job's flow.
    pub fn flow_key(&self) -> String {
        format!("{}::{}", self.flow, self.owner)
    }
}

/// A named, owner-scoped template defining the task sequence and default
/// policy for jobs created against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub name: String,
    #[serde(default = "default_owner")]
    pub owner: String,
    pub tasks: TaskList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Flow {
    /// Catalog key: `name::owner`.
    pub fn key(&self) -> String {
        format!("{}::{}", self.name, self.owner)
    }
}

/// A named definition of a unit of work with default policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default)]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Recursively merge two JSON values, overlay winning on conflicts.
///
/// Objects merge key-by-key; a null overlay leaves the base untouched;
/// anything else replaces the base outright.
pub fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (key, value) in o {
                let entry = match b.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        _ => overlay.clone(),
    }
}
