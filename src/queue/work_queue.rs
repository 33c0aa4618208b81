//! Rate-limited, de-duplicating work queue of string keys.
//!
//! Semantics:
//! - `add` collapses while a key is queued and not yet handed out.
//! - A key handed out by `get` is "processing" until `done`; adds during that
//!   window mark it dirty and it is requeued by `done`. No two workers hold the
//!   same key at once.
//! - `add_after`/`add_rate_limited` park the key in a timer heap until ready.
//! - After `shut_down`, `get` drains what is queued and then returns `None`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limiter::{RateLimiter, default_controller_rate_limiter};

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    waiting: BinaryHeap<Reverse<(Instant, u64, String)>>,
    /// Earliest ready time per parked key.
    waiting_ready: HashMap<String, Instant>,
    seq: u64,
}

impl State {
    fn add(&mut self, key: String) -> bool {
        if self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    /// Moves ready keys from the timer heap into the queue. Returns how many
    /// became runnable and the next wake-up time, if any.
    fn promote_ready(&mut self, now: Instant) -> (usize, Option<Instant>) {
        let mut added = 0;
        while let Some(Reverse((ready, _, _))) = self.waiting.peek() {
            if *ready > now {
                return (added, Some(*ready));
            }
            let Some(Reverse((ready, _, key))) = self.waiting.pop() else {
                break;
            };
            // Stale entry superseded by an earlier schedule for the same key.
            if self.waiting_ready.get(&key) != Some(&ready) {
                continue;
            }
            self.waiting_ready.remove(&key);
            if self.add(key) {
                added += 1;
            }
        }
        (added, None)
    }
}

pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    limiter: Box<dyn RateLimiter>,
    shutdown: CancellationToken,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(Box::new(default_controller_rate_limiter()))
    }
}

impl WorkQueue {
    pub fn new(limiter: Box<dyn RateLimiter>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            limiter,
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add(&self, key: impl Into<String>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if self.lock().add(key.into()) {
            self.notify.notify_one();
        }
    }

    /// Adds `key` once `delay` has passed.
    pub fn add_after(&self, key: impl Into<String>, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        if self.shutdown.is_cancelled() {
            return;
        }
        let key = key.into();
        let ready = Instant::now() + delay;
        let mut state = self.lock();
        if let Some(existing) = state.waiting_ready.get(&key) {
            if *existing <= ready {
                return;
            }
        }
        state.seq += 1;
        let seq = state.seq;
        state.waiting_ready.insert(key.clone(), ready);
        state.waiting.push(Reverse((ready, seq, key)));
        drop(state);
        // Wake a sleeper so it can re-arm its timer for the new deadline.
        self.notify.notify_one();
    }

    /// Adds `key` after the rate limiter's delay for it.
    pub fn add_rate_limited(&self, key: impl Into<String>) {
        let key = key.into();
        let delay = self.limiter.when(&key);
        self.add_after(key, delay);
    }

    /// Clears the backoff history of `key`.
    pub fn forget(&self, key: &str) {
        self.limiter.forget(key);
    }

    pub fn num_requeues(&self, key: &str) -> u32 {
        self.limiter.num_requeues(key)
    }

    /// Waits for the next ready key. Returns `None` once shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let next_wake = {
                let mut state = self.lock();
                let (_, next_wake) = state.promote_ready(Instant::now());
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if self.shutdown.is_cancelled() {
                    return None;
                }
                next_wake
            };

            let sleep = async {
                match next_wake {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = sleep => {}
                _ = self.shutdown.cancelled() => {}
            }
        }
    }

    /// Marks `key` finished. A key re-added while processing is queued again.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.lock();
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Keys queued and ready to hand out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
