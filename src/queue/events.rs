//! Observer fan-out: each subscriber gets an independent bounded queue so a
//! slow observer cannot block producers or starve other subscribers.
//! Replaces a process-global emitter with a hand-raised listener cap; this
//! broadcast primitive supports at least 50 concurrent subscribers and
//! drops the oldest buffered event on overflow.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::sync_ext::MutexExt;

/// Minimum number of subscribers the broadcast must support without
/// degrading delivery to existing ones.
pub const MIN_SUPPORTED_SUBSCRIBERS: usize = 50;

const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateEvent {
    JobAdded { id: String },
    JobUpdated { id: String },
    JobRemoved { id: String },
    Paused,
    Resumed,
    BulkCleared { removed: usize },
}

struct SubscriberState {
    buffer: VecDeque<UpdateEvent>,
}

/// A single observer's handle. Drop it to unsubscribe.
pub struct Subscription {
    id: u64,
    state: Arc<Mutex<SubscriberState>>,
    broadcast: Arc<Mutex<BroadcastInner>>,
}

impl Subscription {
    /// Drains all events currently buffered for this subscriber, oldest
    /// first, without blocking.
    pub fn drain(&self) -> Vec<UpdateEvent> {
        let mut state = self.state.lock_unpoisoned();
        state.buffer.drain(..).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.broadcast.lock_unpoisoned();
        inner.subscribers.retain(|(id, _)| *id != self.id);
    }
}

struct BroadcastInner {
    next_id: u64,
    subscribers: Vec<(u64, Arc<Mutex<SubscriberState>>)>,
    buffer_capacity: usize,
}

/// Broadcasts [`UpdateEvent`]s to any number of subscribers.
#[derive(Clone)]
pub struct Broadcast {
    inner: Arc<Mutex<BroadcastInner>>,
}

impl Default for Broadcast {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl Broadcast {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BroadcastInner {
                next_id: 0,
                subscribers: Vec::new(),
                buffer_capacity,
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.inner.lock_unpoisoned();
        let id = inner.next_id;
        inner.next_id += 1;
        let state = Arc::new(Mutex::new(SubscriberState {
            buffer: VecDeque::new(),
        }));
        inner.subscribers.push((id, state.clone()));
        Subscription {
            id,
            state,
            broadcast: self.inner.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_unpoisoned().subscribers.len()
    }

    /// Announces `event` to every current subscriber. Each subscriber's
    /// buffer drops its oldest entry on overflow rather than blocking this
    /// call.
    pub fn announce(&self, event: UpdateEvent) {
        let inner = self.inner.lock_unpoisoned();
        let capacity = inner.buffer_capacity;
        for (_, state) in &inner.subscribers {
            let mut state = state.lock_unpoisoned();
            if state.buffer.len() >= capacity {
                state.buffer.pop_front();
            }
            state.buffer.push_back(event.clone());
        }
    }
}
