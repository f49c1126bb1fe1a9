//! Poll observer — periodically sweeps job documents and dispatches
//! each one through the engine.
//!
//! Polling is the only observation mechanism: it makes every worker in
//! the pool equivalent and means a crashed worker's jobs are picked up
//! by whoever polls next.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::engine::Engine;
use crate::model::DOC_TYPE_JOB;
use crate::store::DocumentStore;

/// Spawn the background poll loop.
pub fn spawn_poll_loop(
    engine: Arc<Engine>,
    store: Arc<dyn DocumentStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Desynchronize workers started together so their sweeps
        // interleave instead of racing on every document at once.
        let jitter = Duration::from_millis(rand::random::<u64>() % 1000);
        tokio::time::sleep(jitter).await;

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&engine, &store).await;
        }
    })
}

/// One pass over every job document.
pub async fn sweep(engine: &Engine, store: &Arc<dyn DocumentStore>) {
    let jobs = match store.list(DOC_TYPE_JOB).await {
        Ok(jobs) => jobs,
        Err(e) => {
            error!(error = %e, "Job sweep failed to list documents");
            return;
        }
    };
    if jobs.is_empty() {
        return;
    }
    debug!(jobs = jobs.len(), "Sweeping job documents");

    let passes = jobs.iter().map(|job| engine.drive(&job.id));
    for (job, result) in jobs.iter().zip(futures::future::join_all(passes).await) {
        match result {
            Ok(outcome) => debug!(job = %job.id, ?outcome, "Sweep pass finished"),
            Err(e) => error!(job = %job.id, error = %e, "Sweep pass failed"),
        }
    }
}
