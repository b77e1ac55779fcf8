//! In-memory state shared by the coordinator and its workers: the job map,
//! the creation-order list used for FIFO scheduling, the processing set and
//! the paused flag. All mutation happens under `Inner::state`'s lock;
//! workers perform blocking I/O outside it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};

use crate::ai_fallback::AdapterRegistry;
use crate::config::Config;
use crate::queue::events::Broadcast;
use crate::queue::job::Job;
use crate::store::Store;
use crate::toolchain::CancellationToken;

pub(crate) struct EngineState {
    pub(crate) jobs: HashMap<String, Job>,
    /// Ids in creation order; crash-recovered jobs are spliced at the front
    /// so they are scheduled ahead of everything else, per the
    /// hold-on-restart rule. The scheduler scans this for the first
    /// `pending` id.
    pub(crate) order: Vec<String>,
    pub(crate) processing: HashSet<String>,
    pub(crate) paused: bool,
    pub(crate) cancellations: HashMap<String, CancellationToken>,
    pub(crate) shutting_down: bool,
    /// Ids marked `failed`/`crash` by recovery, awaiting the deferred
    /// `failed -> pending` transition performed by the next `resume()`.
    pub(crate) crashed_awaiting_requeue: Vec<String>,
    /// Ids that `cancel_current` has rewound to `pending` while their
    /// worker is still tearing down. The worker's own finalize step
    /// consults (and clears) this set so it does not clobber the rewind
    /// back to `failed` once the cancelled run unwinds.
    pub(crate) cancel_requeue_pending: HashSet<String>,
}

impl EngineState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            order: Vec::new(),
            processing: HashSet::new(),
            paused: false,
            cancellations: HashMap::new(),
            shutting_down: false,
            crashed_awaiting_requeue: Vec::new(),
            cancel_requeue_pending: HashSet::new(),
        }
    }

    /// Returns the id of the oldest pending job eligible to be claimed, if
    /// any, respecting `paused` and `max_concurrent`.
    pub(crate) fn next_claimable(&self, max_concurrent: usize) -> Option<String> {
        if self.paused || self.processing.len() >= max_concurrent {
            return None;
        }
        self.order.iter().find_map(|id| {
            let job = self.jobs.get(id)?;
            (job.status == crate::queue::job::JobStatus::Pending).then(|| id.clone())
        })
    }
}

pub(crate) struct Inner {
    pub(crate) state: Mutex<EngineState>,
    pub(crate) cv: Condvar,
    pub(crate) store: Mutex<Store>,
    pub(crate) broadcast: Broadcast,
    pub(crate) config: Config,
    pub(crate) registry: Arc<dyn AdapterRegistry>,
}

impl Inner {
    pub(crate) fn new(config: Config, store: Store, registry: Arc<dyn AdapterRegistry>) -> Self {
        Self {
            state: Mutex::new(EngineState::new()),
            cv: Condvar::new(),
            store: Mutex::new(store),
            broadcast: Broadcast::default(),
            config,
            registry,
        }
    }
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
