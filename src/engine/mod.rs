//! Job state machine — classifies a job document and performs at most
//! one state-advancing action per pass.
//!
//! Every mutation is a conditional save against the revision last read.
//! A save that loses the race is discarded without complaint; the worker
//! re-evaluates from current state on its next observation. That makes
//! each pass idempotent-safe to run concurrently across the pool.

mod claim;
mod escalate;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::error::{CatalogError, Result, StoreError};
use crate::model::{deep_merge, Job, JobState, StepState, DOC_TYPE_JOB};
use crate::runner::{RunnerContext, RunnerOutput, RunnerRegistry};
use crate::store::{doc_type_of, DocumentStore, Revision, Versioned};

pub use claim::{next_action, NextAction};

/// What a single dispatch pass did to a job document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not an engine-relevant job document.
    Ignored,
    /// Nothing for this worker to do right now.
    Idle,
    Initialized,
    Claimed { task: String },
    /// No local runner for the task's plugin; left for another worker.
    Skipped { plugin: String },
    Executed { step: String, state: StepState },
    TimedOut { step: String },
    Retried { step: String },
    /// Job-level retry: the sequence restarts with fresh steps.
    Restarted,
    Completed { exit: i32 },
    /// A competing worker's write landed first; action discarded.
    LostRace,
}

impl Outcome {
    /// True when the pass changed nothing and re-dispatching immediately
    /// would change nothing either.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Outcome::Ignored
                | Outcome::Idle
                | Outcome::Skipped { .. }
                | Outcome::Completed { .. }
                | Outcome::LostRace
        )
    }
}

/// How a runner invocation ended.
enum Settle {
    Complete(RunnerOutput),
    Error(String),
    Timeout,
}

/// The scheduler core. One per worker process; safe to share.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    catalog: Catalog,
    runners: Arc<RunnerRegistry>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        catalog: Catalog,
        runners: Arc<RunnerRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            catalog,
            runners,
        }
    }

    /// This worker's identity, stamped into claimed steps.
    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Top-level dispatch entry point.
    ///
    /// Never returns an error: every internal failure is converted into
    /// a document state transition or a log line, since an exception
    /// crossing the worker boundary would only stall the job.
    pub async fn dispatch(&self, observed: Versioned<Value>) -> Outcome {
        if doc_type_of(&observed.doc) != DOC_TYPE_JOB {
            return Outcome::Ignored;
        }
        let job: Job = match serde_json::from_value(observed.doc.clone()) {
            Ok(job) => job,
            Err(e) => {
                warn!(id = %observed.id, error = %e, "Ignoring malformed job document");
                return Outcome::Ignored;
            }
        };
        let id = observed.id.clone();
        let job = Versioned {
            id: observed.id,
            rev: observed.rev,
            doc: job,
        };

        match self.pass(job).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_conflict() => {
                debug!(job = %id, "Lost the race; awaiting next observation");
                Outcome::LostRace
            }
            Err(e) => {
                error!(job = %id, error = %e, "Dispatch pass failed; job left for re-observation");
                Outcome::Idle
            }
        }
    }

    /// Dispatch a job repeatedly, re-reading after every state-advancing
    /// pass, until it settles or the pass budget for one observation
    /// runs out.
    pub async fn drive(&self, id: &str) -> Result<Outcome> {
        let mut last = Outcome::Idle;
        for _ in 0..self.config.max_passes_per_observation {
            let Some(doc) = self.store.get(id).await? else {
                return Ok(last);
            };
            last = self.dispatch(doc).await;
            if last.is_settled() {
                break;
            }
        }
        Ok(last)
    }

    /// Perform at most one state-advancing action.
    async fn pass(&self, job: Versioned<Job>) -> Result<Outcome> {
        match &job.doc.state {
            JobState::Uninitialized => self.initialize(job).await,
            JobState::Complete => {
                debug!(job = %job.id, "Job already complete");
                Ok(Outcome::Idle)
            }
            _ => {
                // Deadline sweep first: any worker may mark an expired
                // step timed out, and the save must propagate before
                // further action.
                if let Some(index) = self.expired_step(&job.doc, Utc::now()) {
                    return self.mark_step_timeout(job, index).await;
                }
                if job.doc.at_boundary() {
                    self.advance(job).await
                } else {
                    self.execute_current(job).await
                }
            }
        }
    }

    /// Resolve the flow, snapshot its policy onto the job, and mark it
    /// ready. A missing flow leaves the job uninitialized for an
    /// operator to fix; nothing retries it automatically.
    async fn initialize(&self, mut job: Versioned<Job>) -> Result<Outcome> {
        let flow = match self.catalog.flow(&job.doc.flow, &job.doc.owner).await {
            Ok(flow) => flow,
            Err(CatalogError::FlowNotFound { key }) => {
                error!(
                    job = %job.id,
                    flow = %key,
                    "Cannot initialize job: flow not found; operator intervention required"
                );
                return Ok(Outcome::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        let task_count = flow.tasks.sequence.len();
        let doc = &mut job.doc;
        doc.tasks = Some(flow.tasks);
        doc.error = flow.error;
        doc.retry = flow.retry;
        doc.timeout = flow.timeout;
        doc.params = deep_merge(&flow.params, &doc.params);
        doc.steps = Vec::new();
        doc.restart_from = 0;
        doc.start = Some(Utc::now());
        doc.state = JobState::Ready;

        self.save(&job).await?;
        info!(job = %job.id, flow = %job.doc.flow, tasks = task_count, "Job initialized");
        Ok(Outcome::Initialized)
    }

    /// Claim the next task, retry, escalate, or complete — whatever the
    /// step history makes legal at this boundary.
    async fn advance(&self, job: Versioned<Job>) -> Result<Outcome> {
        match next_action(&job.doc) {
            NextAction::Wait => Ok(Outcome::Idle),
            NextAction::Accept(name) => self.accept_task(job, &name, false).await,
            NextAction::RetryStep(index) => self.retry_task(job, index).await,
            NextAction::SequenceFailed => self.cleanup_job(job).await,
            // Every task completed; a timed-out attempt that was retried
            // successfully does not taint the result.
            NextAction::Finished => self.finalize(job, -1).await,
        }
    }

    /// Index of the first unfinished step past its deadline, if any.
    fn expired_step(&self, job: &Job, now: DateTime<Utc>) -> Option<usize> {
        job.steps.iter().position(|step| {
            !step.state.is_terminal()
                && now >= step.deadline(job.timeout, self.config.default_timeout_ms)
        })
    }

    /// Mark an expired step timed out. This is a safety check, not task
    /// execution, so it is the one transition any worker may perform on
    /// a step it does not own.
    async fn mark_step_timeout(&self, mut job: Versioned<Job>, index: usize) -> Result<Outcome> {
        let name;
        {
            let step = &mut job.doc.steps[index];
            name = step.name.clone();
            warn!(
                job = %job.id,
                step = %name,
                owner = %step.pid,
                "Step exceeded its deadline; marking timed out"
            );
            step.state = StepState::Timeout;
            step.end = Some(Utc::now());
        }
        job.doc.state = JobState::Timeout;
        self.save(&job).await?;
        Ok(Outcome::TimedOut { step: name })
    }

    /// Run the last step if this worker owns it and it is still ready.
    ///
    /// Other workers' unfinished steps are left alone; the deadline
    /// sweep is the only cross-worker action on an owned step.
    async fn execute_current(&self, mut job: Versioned<Job>) -> Result<Outcome> {
        let Some(index) = job.doc.last_step_index() else {
            return Ok(Outcome::Idle);
        };
        {
            let step = &job.doc.steps[index];
            if step.pid != self.config.worker_id || step.state != StepState::Ready {
                return Ok(Outcome::Idle);
            }
        }

        // Announce execution before side effects so a crash here is
        // recoverable via the deadline sweep.
        job.doc.steps[index].state = StepState::Active;
        job.rev = self.save(&job).await?;

        let step = job.doc.steps[index].clone();
        let Some(runner) = self.runners.get(step.plugin_name()).await else {
            // Registry changed between claim and execution
            return self
                .settle_step(
                    &job.id,
                    index,
                    Settle::Error(format!("runner {} not available", step.plugin_name())),
                )
                .await;
        };

        let ctx = RunnerContext {
            job_id: job.id.clone(),
            step_name: step.name.clone(),
            worker_id: self.config.worker_id.clone(),
            params: deep_merge(&job.doc.params, &step.params),
        };
        let timeout_ms = step.timeout_ms(job.doc.timeout, self.config.default_timeout_ms);
        debug!(job = %job.id, step = %step.name, timeout_ms, "Invoking task runner");

        let settle =
            match tokio::time::timeout(Duration::from_millis(timeout_ms), runner.run(ctx)).await {
                Ok(Ok(output)) => Settle::Complete(output),
                Ok(Err(e)) => Settle::Error(e.to_string()),
                Err(_) => Settle::Timeout,
            };
        self.settle_step(&job.id, index, settle).await
    }

    /// Record a runner result against the step, unless the step was
    /// superseded while the runner was in flight — a late result against
    /// a superseded step is stale and must be a no-op.
    async fn settle_step(&self, id: &str, index: usize, settle: Settle) -> Result<Outcome> {
        let Some(current) = self.store.get(id).await? else {
            warn!(job = %id, "Job document vanished mid-execution");
            return Ok(Outcome::Idle);
        };
        let mut current: Versioned<Job> = Versioned {
            id: current.id,
            rev: current.rev,
            doc: serde_json::from_value(current.doc).map_err(StoreError::from)?,
        };

        let Some(step) = current.doc.steps.get(index) else {
            return Ok(Outcome::LostRace);
        };
        if step.state != StepState::Active || step.pid != self.config.worker_id {
            debug!(job = %id, step = %step.name, "Step superseded; dropping stale runner result");
            return Ok(Outcome::LostRace);
        }

        let name;
        let outcome;
        {
            let step = &mut current.doc.steps[index];
            name = step.name.clone();
            step.end = Some(Utc::now());
            match settle {
                Settle::Complete(output) => {
                    step.state = StepState::Complete;
                    step.result = Some(output.result);
                    step.stdout = output.stdout;
                    step.stderr = output.stderr;
                    outcome = Outcome::Executed {
                        step: name.clone(),
                        state: StepState::Complete,
                    };
                }
                Settle::Error(reason) => {
                    warn!(job = %id, step = %name, error = %reason, "Task runner failed");
                    step.state = StepState::Error;
                    step.result = Some(json!({ "error": reason }));
                    outcome = Outcome::Executed {
                        step: name.clone(),
                        state: StepState::Error,
                    };
                }
                Settle::Timeout => {
                    warn!(job = %id, step = %name, "Task runner exceeded its timeout");
                    step.state = StepState::Timeout;
                    outcome = Outcome::TimedOut { step: name.clone() };
                }
            }
        }
        match &outcome {
            Outcome::TimedOut { .. } => current.doc.state = JobState::Timeout,
            Outcome::Executed {
                state: StepState::Error,
                ..
            } => current.doc.state = JobState::Error,
            _ => {}
        }

        self.save(&current).await?;
        if let Outcome::Executed { state, .. } = &outcome {
            info!(job = %id, step = %name, state = %state, "Step settled");
        }
        Ok(outcome)
    }

    /// Conditional save of a job document against its read revision.
    pub(crate) async fn save(&self, job: &Versioned<Job>) -> Result<Revision> {
        let doc = serde_json::to_value(&job.doc).map_err(StoreError::from)?;
        Ok(self.store.compare_and_swap(&job.id, job.rev, &doc).await?)
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn runners(&self) -> &RunnerRegistry {
        &self.runners
    }
}
