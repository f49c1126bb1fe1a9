//! Failure escalation — step retries, error handlers, job retries, and
//! final completion.
//!
//! Escalation order for a failed step: step retry budget, then the
//! task-level error handler, then the job retry budget, then job-level
//! cleanup. Every level appends steps; nothing in the history is ever
//! rewritten.

use chrono::Utc;
use tracing::info;

use crate::engine::{Engine, Outcome};
use crate::error::Result;
use crate::model::{Job, JobState, Step, StepState};
use crate::store::Versioned;

impl Engine {
    /// React to the failed step at `index`: clone it into a fresh retry
    /// attempt while budget remains, escalate otherwise.
    pub(crate) async fn retry_task(&self, mut job: Versioned<Job>, index: usize) -> Result<Outcome> {
        let failed = &job.doc.steps[index];
        if failed.retry == 0 {
            return self.cleanup_task(job, index).await;
        }

        let retry = failed.retry_clone(self.worker_id(), Utc::now());
        let name = retry.name.clone();
        info!(
            job = %job.id,
            step = %name,
            remaining = retry.retry,
            "Retrying failed step"
        );
        job.doc.state = JobState::Running {
            task: name.clone(),
            step_index: job.doc.steps.len(),
        };
        job.doc.steps.push(retry);

        self.save(&job).await?;
        Ok(Outcome::Retried { step: name })
    }

    /// Step retries exhausted: run the task-level error handler if one
    /// is defined, otherwise escalate to the job level.
    pub(crate) async fn cleanup_task(&self, job: Versioned<Job>, index: usize) -> Result<Outcome> {
        let failed = &job.doc.steps[index];
        if let Some(handler) = failed.error.clone() {
            info!(
                job = %job.id,
                step = %failed.name,
                handler = %handler,
                "Step retries exhausted; claiming task-level error handler"
            );
            return self.accept_task(job, &handler, true).await;
        }
        if job.doc.retry > 0 {
            return self.retry_job(job).await;
        }
        self.cleanup_job(job).await
    }

    /// Job-level retry: restart the sequence from scratch.
    ///
    /// The restart advances the run window instead of clearing steps, so
    /// the full attempt history survives as audit record.
    pub(crate) async fn retry_job(&self, mut job: Versioned<Job>) -> Result<Outcome> {
        let remaining = job.doc.retry - 1;
        job.doc.retry = remaining;
        job.doc.restart_from = job.doc.steps.len();
        job.doc.state = JobState::Ready;

        self.save(&job).await?;
        info!(job = %job.id, remaining, "Restarting job sequence from scratch");
        Ok(Outcome::Restarted)
    }

    /// Job-level cleanup: run the job's error task once, then finalize.
    ///
    /// The handler runs at most once per run; if its step already exists
    /// in the window the job finalizes regardless of how the handler
    /// itself fared, which is what breaks handler failure loops.
    pub(crate) async fn cleanup_job(&self, job: Versioned<Job>) -> Result<Outcome> {
        if let Some(handler) = job.doc.error.clone() {
            let already_ran = job
                .doc
                .window()
                .iter()
                .any(|s| s.cleanup && s.name == handler);
            if !already_ran {
                info!(
                    job = %job.id,
                    handler = %handler,
                    "Job failed; claiming job-level error task"
                );
                return self.accept_task(job, &handler, true).await;
            }
        }
        let exit = exit_code(job.doc.window());
        self.finalize(job, exit).await
    }

    /// Terminal transition: record the result code and close the job.
    pub(crate) async fn finalize(&self, mut job: Versioned<Job>, exit: i32) -> Result<Outcome> {
        job.doc.state = JobState::Complete;
        job.doc.end = Some(Utc::now());
        job.doc.exit = Some(exit);

        self.save(&job).await?;
        info!(job = %job.id, exit, "Job complete");
        Ok(Outcome::Completed { exit })
    }
}

/// Result code for a failed run: 1 for the most recent timeout, 2 for
/// the most recent error. Completed handler steps are skipped so they
/// never mask the failure that triggered them.
fn exit_code(window: &[Step]) -> i32 {
    for step in window.iter().rev() {
        match step.state {
            StepState::Timeout => return 1,
            StepState::Error => return 2,
            _ => {}
        }
    }
    -1
}
