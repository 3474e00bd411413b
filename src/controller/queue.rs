/**
 * Deduplicating, rate-limited work queue
 *
 * The sole synchronization point between the watch stream and the worker
 * pool. Pending keys are deduplicated, in-flight keys are never delivered
 * to a second worker, and a key re-added while in flight is marked dirty
 * and redelivered once its current attempt calls `done`.
 */
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::trace;

#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    // permits == order.len(); closed on shut_down to wake blocked workers
    ready: Semaphore,
    base_delay: Duration,
    max_delay: Duration,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Delivery order of keys not currently in flight
    order: VecDeque<String>,
    /// Keys awaiting processing, whether queued or waiting for redelivery
    dirty: HashSet<String>,
    /// Keys currently held by a worker
    processing: HashSet<String>,
    /// Consecutive rate-limited requeues per key since the last forget
    requeues: HashMap<String, u32>,
    shutting_down: bool,
}

impl WorkQueue {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            ready: Semaphore::new(0),
            base_delay,
            max_delay,
        }
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a key. Idempotent while the key is already pending; a key in
    /// flight is marked for redelivery after its current attempt completes.
    pub fn add(&self, key: &str) {
        let mut state = self.state();
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            trace!("key {key} in flight, marked for redelivery");
            return;
        }
        state.order.push_back(key.to_string());
        drop(state);
        self.ready.add_permits(1);
    }

    /// Enqueue a key after an exponentially increasing delay computed from
    /// its consecutive-failure count.
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            let failures = state.requeues.entry(key.to_string()).or_insert(0);
            let delay = backoff_delay(self.base_delay, self.max_delay, *failures);
            *failures += 1;
            delay
        };

        trace!("requeueing {key} in {delay:?}");
        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }

    /// Block until a key is available. Returns `None` once the queue has
    /// been shut down; the calling worker must exit.
    pub async fn get(&self) -> Option<String> {
        let permit = self.ready.acquire().await.ok()?;
        permit.forget();

        let mut state = self.state();
        let key = state.order.pop_front()?;
        state.dirty.remove(&key);
        state.processing.insert(key.clone());
        Some(key)
    }

    /// Release a key taken via `get`. Must be called exactly once per
    /// delivery; a key dirtied while in flight is requeued here.
    pub fn done(&self, key: &str) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.order.push_back(key.to_string());
            drop(state);
            self.ready.add_permits(1);
        }
    }

    /// Clear the retry history for a key
    pub fn forget(&self, key: &str) {
        self.state().requeues.remove(key);
    }

    /// Consecutive rate-limited requeues for a key since its last forget
    #[must_use]
    pub fn num_requeues(&self, key: &str) -> u32 {
        self.state().requeues.get(key).copied().unwrap_or(0)
    }

    /// Stop accepting new work and wake all workers blocked in `get`
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.ready.close();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state().order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `base * 2^failures`, capped at `max`
fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let millis = u64::try_from(base.as_millis())
        .unwrap_or(u64::MAX)
        .saturating_mul(1_u64 << failures.min(20));
    Duration::from_millis(millis).min(max)
}
