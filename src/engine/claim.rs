//! Boundary decisions and task claiming.
//!
//! `next_action` is a pure function of the job document so the whole
//! decision table is unit-testable without a store or a runner.

use chrono::Utc;
use tracing::{debug, error, info};

use crate::engine::{Engine, Outcome};
use crate::error::{CatalogError, Result};
use crate::model::{Job, JobState, Step, StepState};
use crate::store::Versioned;

/// Next legal state-advancing action for a job at a task boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextAction {
    /// A step is unfinished, or the job has no task list yet.
    Wait,
    /// Claim the named task as a new step.
    Accept(String),
    /// The step at this absolute index failed; retry or escalate it.
    RetryStep(usize),
    /// The current run contains a failure that escalation has already
    /// worked through; job-level cleanup owns it now.
    SequenceFailed,
    /// Every task in the sequence completed.
    Finished,
}

/// Decide what a worker may do with a job at a task boundary.
///
/// Reads only the current run of the step history (steps before the last
/// job-level restart are audit record, not control flow).
pub fn next_action(job: &Job) -> NextAction {
    let Some(tasks) = &job.tasks else {
        return NextAction::Wait;
    };
    let window = job.window();

    let Some(last) = window.last() else {
        return match tasks.sequence.first() {
            Some(name) => NextAction::Accept(name.clone()),
            None => NextAction::Finished,
        };
    };

    match last.state {
        StepState::Ready | StepState::Active => NextAction::Wait,
        StepState::Timeout | StepState::Error => NextAction::RetryStep(job.steps.len() - 1),
        StepState::Complete => {
            // Once a run has errored or entered cleanup it never resumes
            // the main sequence; the completed handler step hands control
            // to job-level cleanup for the final verdict.
            if window
                .iter()
                .any(|s| s.cleanup || s.state == StepState::Error)
            {
                return NextAction::SequenceFailed;
            }
            for name in &tasks.sequence {
                let done = window
                    .iter()
                    .any(|s| s.name == *name && s.state == StepState::Complete);
                if !done {
                    return NextAction::Accept(name.clone());
                }
            }
            NextAction::Finished
        }
    }
}

impl Engine {
    /// Claim a task: resolve its catalog definition and append a ready
    /// step owned by this worker.
    ///
    /// A plugin absent from the local registry is not an error; the task
    /// is left unclaimed for a differently equipped worker in the pool.
    pub(crate) async fn accept_task(
        &self,
        mut job: Versioned<Job>,
        name: &str,
        cleanup: bool,
    ) -> Result<Outcome> {
        let task = match self.catalog().task(name).await {
            Ok(task) => task,
            Err(CatalogError::TaskNotFound { name }) => {
                error!(
                    job = %job.id,
                    task = %name,
                    "Cannot claim task: no catalog definition; job stalled until the catalog is fixed"
                );
                return Ok(Outcome::Idle);
            }
            Err(e) => return Err(e.into()),
        };

        let plugin = task.plugin.clone().unwrap_or_else(|| task.name.clone());
        if !self.runners().has(&plugin).await {
            debug!(
                job = %job.id,
                task = %task.name,
                plugin = %plugin,
                "No local runner for plugin; leaving the task unclaimed"
            );
            return Ok(Outcome::Skipped { plugin });
        }

        let step_index = job.doc.steps.len();
        let step = Step {
            name: task.name.clone(),
            plugin: task.plugin,
            params: task.params,
            retry: task.retry,
            timeout: task.timeout,
            error: task.error,
            pid: self.worker_id().to_string(),
            cleanup,
            start: Utc::now(),
            end: None,
            state: StepState::Ready,
            result: None,
            stdout: None,
            stderr: None,
        };
        job.doc.state = JobState::Running {
            task: task.name.clone(),
            step_index,
        };
        job.doc.steps.push(step);

        self.save(&job).await?;
        info!(job = %job.id, task = %task.name, step = step_index, cleanup, "Claimed task");
        Ok(Outcome::Claimed { task: task.name })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn job(sequence: &[&str]) -> Job {
        serde_json::from_value(json!({
            "type": "job",
            "flow": "f",
            "state": "$$ready",
            "tasks": {"structure": "sequence", "sequence": sequence},
        }))
        .unwrap()
    }

    fn step(name: &str, state: StepState) -> Step {
        Step {
            name: name.to_string(),
            plugin: None,
            params: Value::Null,
            retry: 0,
            timeout: None,
            error: None,
            pid: "w1".to_string(),
            cleanup: false,
            start: Utc::now(),
            end: None,
            state,
            result: None,
            stdout: None,
            stderr: None,
        }
    }

    #[test]
    fn empty_history_accepts_first_task() {
        assert_eq!(
            next_action(&job(&["t1", "t2"])),
            NextAction::Accept("t1".to_string())
        );
    }

    #[test]
    fn empty_sequence_finishes_immediately() {
        assert_eq!(next_action(&job(&[])), NextAction::Finished);
    }

    #[test]
    fn unfinished_step_means_wait() {
        for state in [StepState::Ready, StepState::Active] {
            let mut j = job(&["t1", "t2"]);
            j.steps.push(step("t1", state));
            assert_eq!(next_action(&j), NextAction::Wait);
        }
    }

    #[test]
    fn completed_step_accepts_next_task() {
        let mut j = job(&["t1", "t2"]);
        j.steps.push(step("t1", StepState::Complete));
        assert_eq!(next_action(&j), NextAction::Accept("t2".to_string()));
    }

    #[test]
    fn failed_last_step_goes_to_retry() {
        for state in [StepState::Timeout, StepState::Error] {
            let mut j = job(&["t1"]);
            j.steps.push(step("t1", state));
            assert_eq!(next_action(&j), NextAction::RetryStep(0));
        }
    }

    #[test]
    fn retry_index_is_absolute_across_restarts() {
        let mut j = job(&["t1"]);
        j.steps.push(step("t1", StepState::Error));
        j.steps.push(step("t1", StepState::Error));
        j.restart_from = 1;
        assert_eq!(next_action(&j), NextAction::RetryStep(1));
    }

    #[test]
    fn all_tasks_complete_finishes() {
        let mut j = job(&["t1", "t2"]);
        j.steps.push(step("t1", StepState::Complete));
        j.steps.push(step("t2", StepState::Complete));
        assert_eq!(next_action(&j), NextAction::Finished);
    }

    #[test]
    fn error_in_run_fails_sequence_at_next_boundary() {
        // t1 errored, its retry completed, but the run is tainted: the
        // sequence never resumes past a recorded error.
        let mut j = job(&["t1", "t2"]);
        j.steps.push(step("t1", StepState::Error));
        j.steps.push(step("t1", StepState::Complete));
        assert_eq!(next_action(&j), NextAction::SequenceFailed);
    }

    #[test]
    fn completed_cleanup_step_never_resumes_sequence() {
        // t1 timed out, exhausted retries, its handler ran and completed.
        // Without this guard the scan would re-accept t1 forever.
        let mut j = job(&["t1", "t2"]);
        j.steps.push(step("t1", StepState::Timeout));
        let mut handler = step("notify", StepState::Complete);
        handler.cleanup = true;
        j.steps.push(handler);
        assert_eq!(next_action(&j), NextAction::SequenceFailed);
    }

    #[test]
    fn restart_window_hides_old_failures() {
        let mut j = job(&["t1"]);
        j.steps.push(step("t1", StepState::Error));
        j.restart_from = 1;
        assert_eq!(next_action(&j), NextAction::Accept("t1".to_string()));
    }

    #[test]
    fn missing_task_list_waits() {
        let mut j = job(&["t1"]);
        j.tasks = None;
        assert_eq!(next_action(&j), NextAction::Wait);
    }
}
