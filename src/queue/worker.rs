//! Worker thread pool. `spawn_workers` starts exactly `max_concurrent`
//! threads, each a loop of: wait for a claimable job, claim it under the
//! coordinator's lock, run it outside the lock, then write the outcome back
//! through the lock. Panics inside a job are caught and turned into a
//! failed-job outcome rather than taking the whole worker down.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crate::queue::events::UpdateEvent;
use crate::queue::job::{FailureReason, Job, JobResult, JobStatus};
use crate::queue::processor;
use crate::queue::state::{now_millis, Inner};
use crate::sync_ext::{CondvarExt, MutexExt};
use crate::toolchain::CancellationToken;

pub(crate) fn spawn_workers(inner: &Arc<Inner>) {
    let count = inner.config.max_concurrent.max(1);
    for worker_index in 0..count {
        let inner = inner.clone();
        thread::Builder::new()
            .name(format!("reelqueue-worker-{worker_index}"))
            .spawn(move || worker_loop(inner))
            .expect("spawning worker thread");
    }
}

fn worker_loop(inner: Arc<Inner>) {
    loop {
        let claimed = {
            let mut state = inner.state.lock_unpoisoned();
            loop {
                if state.shutting_down {
                    return;
                }
                if let Some(id) = state.next_claimable(inner.config.max_concurrent) {
                    break id;
                }
                state = inner.cv.wait_unpoisoned(state);
            }
        };

        let (job_snapshot, cancel) = {
            let mut state = inner.state.lock_unpoisoned();
            let Some(job) = state.jobs.get_mut(&claimed) else {
                continue;
            };
            job.status = JobStatus::Processing;
            job.started_at = Some(now_millis());
            job.progress = 0;
            state.processing.insert(claimed.clone());
            let cancel = CancellationToken::new();
            state.cancellations.insert(claimed.clone(), cancel.clone());
            let snapshot = job.clone();
            persist_and_announce(&inner, &snapshot, UpdateEvent::JobUpdated { id: claimed.clone() });
            (snapshot, cancel)
        };

        let outcome = guarded_job_runner(&job_snapshot, &inner, &cancel);

        let mut state = inner.state.lock_unpoisoned();
        state.processing.remove(&claimed);
        state.cancellations.remove(&claimed);
        let requeued_by_cancel_current = state.cancel_requeue_pending.remove(&claimed);

        let Some(job) = state.jobs.get_mut(&claimed) else {
            // Forced removal during processing: completion is a no-op.
            drop(state);
            inner.cv.notify_all();
            continue;
        };

        match outcome {
            Ok(result) => {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.completed_at = Some(now_millis());
                job.result = Some(result);
                job.error = None;
                job.failure_reason = None;
            }
            Err(JobOutcomeError::Cancelled) => {
                if requeued_by_cancel_current {
                    // `cancel_current` already rewound this job to `pending`
                    // ahead of us; leave its state as the coordinator set it
                    // rather than overwriting it with a failure.
                } else {
                    // Cooperative cancellation without an explicit
                    // `cancel_current` call (e.g. a forced removal that lost
                    // the race to requeue first): treated like a user
                    // cancellation, eligible for retry.
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(now_millis());
                    job.error = Some("cancelled".to_string());
                    job.failure_reason = Some(FailureReason::UserCancelled);
                }
            }
            Err(JobOutcomeError::Processing(message)) => {
                job.status = JobStatus::Failed;
                job.completed_at = Some(now_millis());
                job.error = Some(message);
                job.failure_reason = Some(FailureReason::ApiError);
            }
        }
        let snapshot = job.clone();
        persist_and_announce(&inner, &snapshot, UpdateEvent::JobUpdated { id: claimed.clone() });
        drop(state);
        inner.cv.notify_all();
    }
}

enum JobOutcomeError {
    Cancelled,
    Processing(String),
}

fn guarded_job_runner(
    job: &Job,
    inner: &Arc<Inner>,
    cancel: &CancellationToken,
) -> Result<JobResult, JobOutcomeError> {
    let binary = inner.config.toolchain_binary.clone();
    let config = inner.config.clone();
    let registry = inner.registry.clone();
    let inner_for_progress = inner.clone();
    let id = job.id.clone();

    let result = catch_unwind(AssertUnwindSafe(|| {
        processor::run_job(
            job,
            &binary,
            &config,
            registry.as_ref(),
            |percent| report_progress(&inner_for_progress, &id, percent),
            cancel,
        )
    }));

    match result {
        Ok(Ok(job_result)) => Ok(job_result),
        Ok(Err(processor::ProcessorError::Toolchain(crate::error::ToolchainError::Cancelled))) => {
            Err(JobOutcomeError::Cancelled)
        }
        Ok(Err(err)) => Err(JobOutcomeError::Processing(err.to_string())),
        Err(payload) => Err(JobOutcomeError::Processing(panic_payload_to_string(payload))),
    }
}

fn report_progress(inner: &Arc<Inner>, id: &str, percent: u8) {
    let mut state = inner.state.lock_unpoisoned();
    if let Some(job) = state.jobs.get_mut(id) {
        job.progress = percent;
        let snapshot = job.clone();
        persist_and_announce(inner, &snapshot, UpdateEvent::JobUpdated { id: id.to_string() });
    }
}

fn persist_and_announce(inner: &Arc<Inner>, job: &Job, event: UpdateEvent) {
    let store = inner.store.lock_unpoisoned();
    if let Err(err) = store.save_job(job) {
        tracing::error!(job_id = %job.id, error = %err, "failed to persist job");
    }
    drop(store);
    inner.broadcast.announce(event);
}

fn panic_payload_to_string(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "job processor panicked".to_string()
    }
}
