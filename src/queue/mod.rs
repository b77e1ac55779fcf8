//! The queue manager: the facade over the job state machine, its durable
//! persistence, its worker pool and its crash-recovery procedure. A single
//! [`Queue`] is constructed once per process and handed explicitly to every
//! caller — there is no ambient global instance.

pub mod events;
pub mod job;
mod processor;
mod state;
mod worker;

use std::sync::Arc;

use uuid::Uuid;

use crate::ai_fallback::AdapterRegistry;
use crate::config::Config;
use crate::error::QueueError;
use crate::path_safety::is_path_safe;
use crate::store::Store;

use events::{Broadcast, Subscription, UpdateEvent};
use job::{FailureReason, FileRecord, Job, JobMetadata, JobStatus};
use state::{now_millis, Inner};

use crate::sync_ext::MutexExt;

/// A fully-constructed, not-yet-scheduled job submission.
pub struct JobSubmission {
    pub file: FileRecord,
    pub metadata: JobMetadata,
}

#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    /// Opens the durable store, runs crash recovery (must complete before
    /// any submission is accepted), and starts the worker pool. `registry`
    /// resolves the AI providers a `transcribe`-kind job's fallback chain
    /// names; pass [`crate::ai_fallback::NoAdapters`] when the embedder never
    /// submits that job kind.
    pub fn new(config: Config, registry: Arc<dyn AdapterRegistry>) -> Result<Self, QueueError> {
        let store = Store::open(&config.queue_db_path())?;
        let inner = Arc::new(Inner::new(config, store, registry));

        recover(&inner)?;

        worker::spawn_workers(&inner);
        Ok(Self { inner })
    }

    pub fn submit(&self, submission: JobSubmission) -> Result<Job, QueueError> {
        let job = Job {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending,
            progress: 0,
            file: submission.file,
            metadata: submission.metadata,
            result: None,
            error: None,
            failure_reason: None,
            retry_count: 0,
            created_at: now_millis(),
            started_at: None,
            completed_at: None,
            log_tail: Vec::new(),
        };

        {
            let mut state = self.inner.state.lock_unpoisoned();
            state.order.push(job.id.clone());
            state.jobs.insert(job.id.clone(), job.clone());
        }
        self.persist(&job);
        self.inner.broadcast.announce(UpdateEvent::JobAdded { id: job.id.clone() });
        self.inner.cv.notify_all();
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.inner.state.lock_unpoisoned().jobs.get(id).cloned()
    }

    /// Returns all known jobs ordered by creation (FIFO).
    pub fn get_all_jobs(&self) -> Vec<Job> {
        let state = self.inner.state.lock_unpoisoned();
        state
            .order
            .iter()
            .filter_map(|id| state.jobs.get(id).cloned())
            .collect()
    }

    pub fn is_paused(&self) -> bool {
        self.inner.state.lock_unpoisoned().paused
    }

    pub fn pause(&self) {
        let mut state = self.inner.state.lock_unpoisoned();
        state.paused = true;
        drop(state);
        self.set_flag("paused", "true");
        self.inner.broadcast.announce(UpdateEvent::Paused);
    }

    /// Resumes scheduling. If recovery left crash-failed jobs pending
    /// re-queue, this performs that deferred `failed -> pending` transition
    /// (retryCount already incremented at recovery time) before clearing the
    /// paused flag, so those jobs are scheduled ahead of everything else.
    pub fn resume(&self) {
        let mut to_persist = Vec::new();
        {
            let mut state = self.inner.state.lock_unpoisoned();
            let crashed: Vec<String> = std::mem::take(&mut state.crashed_awaiting_requeue);
            for id in crashed {
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.status = JobStatus::Pending;
                    job.error = None;
                    job.completed_at = None;
                    job.progress = 0;
                    to_persist.push(job.clone());
                }
            }
            state.paused = false;
        }
        for job in &to_persist {
            self.persist(job);
        }
        self.set_flag("paused", "false");
        self.inner.broadcast.announce(UpdateEvent::Resumed);
        self.inner.cv.notify_all();
    }

    /// Idempotent per §8: a no-op (returns `false`) unless the job is
    /// `failed`, in which case it transitions to `pending` and
    /// `retryCount` increases by exactly one.
    pub fn retry(&self, id: &str) -> bool {
        let mut persisted = None;
        {
            let mut state = self.inner.state.lock_unpoisoned();
            let Some(job) = state.jobs.get_mut(id) else {
                return false;
            };
            if job.status != JobStatus::Failed {
                return false;
            }
            job.status = JobStatus::Pending;
            job.retry_count += 1;
            job.error = None;
            job.completed_at = None;
            job.progress = 0;
            persisted = Some(job.clone());
        }
        if let Some(job) = persisted {
            self.persist(&job);
            self.inner.broadcast.announce(UpdateEvent::JobUpdated { id: id.to_string() });
            self.inner.cv.notify_all();
            true
        } else {
            false
        }
    }

    /// `processing -> pending` cancel-current: rewinds `startedAt` and
    /// places the job back at the head of the schedule. The worker that
    /// currently holds the job is still tearing down its child process when
    /// this returns; `cancel_requeue_pending` tells that worker's eventual
    /// completion handling to leave the rewind alone instead of marking the
    /// job `failed`/`user_cancelled`.
    pub fn cancel_current(&self, id: &str) -> bool {
        let mut persisted = None;
        {
            let mut state = self.inner.state.lock_unpoisoned();
            if !state.processing.contains(id) {
                return false;
            }
            if let Some(token) = state.cancellations.get(id) {
                token.cancel();
            }
            state.cancel_requeue_pending.insert(id.to_string());
            if let Some(job) = state.jobs.get_mut(id) {
                job.status = JobStatus::Pending;
                job.started_at = None;
                job.progress = 0;
                persisted = Some(job.clone());
            }
            state.order.retain(|existing| existing != id);
            state.order.insert(0, id.to_string());
        }
        if let Some(job) = persisted {
            self.persist(&job);
            self.inner.broadcast.announce(UpdateEvent::JobUpdated { id: id.to_string() });
            self.inner.cv.notify_all();
            true
        } else {
            false
        }
    }

    /// Removes a job. A `processing` job requires `force`; forcing
    /// cooperatively terminates its child process and makes the worker's
    /// eventual completion attempt a no-op.
    pub fn remove(&self, id: &str, force: bool) -> Result<bool, QueueError> {
        {
            let mut state = self.inner.state.lock_unpoisoned();
            let Some(job) = state.jobs.get(id).cloned() else {
                return Ok(false);
            };
            if job.status == JobStatus::Processing {
                if !force {
                    return Err(QueueError::ProcessingRemovalRequiresForce(id.to_string()));
                }
                if let Some(token) = state.cancellations.get(id) {
                    token.cancel();
                }
            }
            self.release_job_files(&job);
            state.jobs.remove(id);
            state.order.retain(|existing| existing != id);
            state.processing.remove(id);
        }
        self.delete_persisted(id)?;
        self.inner.broadcast.announce(UpdateEvent::JobRemoved { id: id.to_string() });
        self.inner.cv.notify_all();
        Ok(true)
    }

    /// Removes all `completed` and `failed` jobs, releasing the files they
    /// own via the path-safety gate.
    pub fn clear_completed(&self) -> Result<usize, QueueError> {
        self.clear_where(|status| matches!(status, JobStatus::Completed | JobStatus::Failed))
    }

    /// Removes every job except those currently `processing`.
    pub fn clear_all(&self) -> Result<usize, QueueError> {
        self.clear_where(|status| !matches!(status, JobStatus::Processing))
    }

    fn clear_where(&self, predicate: impl Fn(JobStatus) -> bool) -> Result<usize, QueueError> {
        let removed_ids: Vec<String> = {
            let mut state = self.inner.state.lock_unpoisoned();
            let ids: Vec<String> = state
                .jobs
                .values()
                .filter(|job| predicate(job.status))
                .map(|job| job.id.clone())
                .collect();
            for id in &ids {
                if let Some(job) = state.jobs.get(id).cloned() {
                    self.release_job_files(&job);
                }
                state.jobs.remove(id);
            }
            state.order.retain(|id| !ids.contains(id));
            ids
        };
        for id in &removed_ids {
            self.delete_persisted(id)?;
        }
        self.inner
            .broadcast
            .announce(UpdateEvent::BulkCleared { removed: removed_ids.len() });
        Ok(removed_ids.len())
    }

    pub fn subscribe(&self) -> Subscription {
        self.inner.broadcast.subscribe()
    }

    pub fn broadcast(&self) -> &Broadcast {
        &self.inner.broadcast
    }

    /// `(pendingCount × avgDuration) + (processingCount × avgDuration × 0.5)`.
    /// `None` when no completed job exists to derive `avgDuration` from.
    pub fn estimated_time_remaining_ms(&self) -> Option<f64> {
        let state = self.inner.state.lock_unpoisoned();
        let completed: Vec<&Job> = state.jobs.values().filter(|j| j.status == JobStatus::Completed).collect();
        if completed.is_empty() {
            return None;
        }
        let durations: Vec<f64> = completed
            .iter()
            .filter_map(|j| match (j.started_at, j.completed_at) {
                (Some(start), Some(end)) => Some((end - start) as f64),
                _ => None,
            })
            .collect();
        if durations.is_empty() {
            return None;
        }
        let avg = durations.iter().sum::<f64>() / durations.len() as f64;
        let pending_count = state.jobs.values().filter(|j| j.status == JobStatus::Pending).count();
        let processing_count = state.processing.len();
        Some(pending_count as f64 * avg + processing_count as f64 * avg * 0.5)
    }

    /// Closes the durable store cleanly and signals workers to stop
    /// claiming new work. Called on `SIGINT`/`SIGTERM`.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock_unpoisoned();
        state.shutting_down = true;
        drop(state);
        self.inner.cv.notify_all();
        let store = self.inner.store.lock_unpoisoned();
        if let Err(err) = store.checkpoint() {
            tracing::warn!(error = %err, "failed to checkpoint durable store on shutdown");
        }
    }

    /// Installs `SIGINT`/`SIGTERM` handlers that call [`Queue::shutdown`]
    /// before the process exits.
    pub fn install_signal_handlers(&self) -> Result<(), ctrlc::Error> {
        let queue = self.clone();
        ctrlc::set_handler(move || {
            queue.shutdown();
            std::process::exit(0);
        })
    }

    fn persist(&self, job: &Job) {
        let store = self.inner.store.lock_unpoisoned();
        if let Err(err) = store.save_job(job) {
            tracing::error!(job_id = %job.id, error = %err, "failed to persist job");
        }
    }

    fn delete_persisted(&self, id: &str) -> Result<(), QueueError> {
        let store = self.inner.store.lock_unpoisoned();
        store.delete_job(id)?;
        Ok(())
    }

    fn set_flag(&self, key: &str, value: &str) {
        let store = self.inner.store.lock_unpoisoned();
        if let Err(err) = store.set_flag(key, value) {
            tracing::error!(error = %err, "failed to persist queue flag");
        }
    }

    fn release_job_files(&self, job: &Job) {
        let staging_root = &self.inner.config.staging_root;
        let mut candidates = Vec::new();
        if let Some(path) = &job.file.staging_path {
            candidates.push(path.clone());
        }
        if let Some(result) = &job.result {
            if let Some(path) = &result.output_video_path {
                candidates.push(path.clone());
            }
            if let Some(path) = &result.output_subtitle_path {
                candidates.push(path.clone());
            }
        }
        for candidate in candidates {
            if !is_path_safe(&candidate, staging_root) {
                tracing::warn!(path = %candidate, "refusing to remove path rejected by safety gate");
                continue;
            }
            if let Err(err) =
                crate::config::remove_file_securely(std::path::Path::new(&candidate), self.inner.config.secure_erase)
            {
                tracing::warn!(path = %candidate, error = %err, "failed to remove job file");
            }
        }
    }
}

/// Loads all jobs, marks interrupted (`processing`) ones `failed`/`crash`
/// with a rewritten `createdAt` so they sort ahead of every other pending
/// job, and forces `paused = true` when any outstanding work remains. The
/// deferred `failed -> pending` transition for those jobs happens on the
/// next [`Queue::resume`] call.
fn recover(inner: &Arc<Inner>) -> Result<(), QueueError> {
    let loaded = {
        let store = inner.store.lock_unpoisoned();
        store.load_all_jobs()?
    };

    let min_created_at = loaded.iter().map(|j| j.created_at).min().unwrap_or(0);
    let crashed_indices: Vec<usize> = loaded
        .iter()
        .enumerate()
        .filter(|(_, job)| job.status == JobStatus::Processing)
        .map(|(idx, _)| idx)
        .collect();
    let crashed_count = crashed_indices.len() as i64;

    let mut jobs = loaded;
    let mut crashed_ids = Vec::new();
    for (rank, idx) in crashed_indices.iter().enumerate() {
        let job = &mut jobs[*idx];
        job.status = JobStatus::Failed;
        job.failure_reason = Some(FailureReason::Crash);
        job.error = Some("interrupted by restart".to_string());
        job.progress = 0;
        job.completed_at = Some(now_millis());
        job.retry_count += 1;
        job.created_at = min_created_at - (crashed_count - rank as i64);
        crashed_ids.push(job.id.clone());
    }

    let any_pending = jobs.iter().any(|j| j.status == JobStatus::Pending) || !crashed_ids.is_empty();

    {
        let store = inner.store.lock_unpoisoned();
        for job in &jobs {
            store.save_job(job)?;
        }
        if any_pending {
            store.set_flag("paused", "true")?;
        }
    }

    let mut order: Vec<(String, i64)> = jobs.iter().map(|j| (j.id.clone(), j.created_at)).collect();
    order.sort_by_key(|(_, created_at)| *created_at);

    let mut state = inner.state.lock_unpoisoned();
    state.paused = any_pending;
    state.crashed_awaiting_requeue = crashed_ids;
    state.order = order.into_iter().map(|(id, _)| id).collect();
    state.jobs = jobs.into_iter().map(|job| (job.id.clone(), job)).collect();
    Ok(())
}
