// SPDX-FileCopyrightText: 2026 Beacon Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rate-limited, deduplicating work queue.
//!
//! A key is held at most once in the queue and is never handed to two
//! workers at the same time: re-adding a key that is being processed marks
//! it dirty, and it is re-queued when the worker calls [`WorkQueue::done`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    shutting_down: bool,
}

impl<T> Default for State<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
            shutting_down: false,
        }
    }
}

struct Inner<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    base_delay: Duration,
    max_delay: Duration,
}

/// Work queue shared by an informer's event handler and a pool of workers.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Creates a queue whose rate-limited re-adds back off exponentially
    /// from `base_delay` up to `max_delay`.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                base_delay,
                max_delay,
            }),
        }
    }

    /// Enqueues `key` unless it is already waiting. No-op after shutdown.
    pub async fn add(&self, key: T) {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Enqueues `key` once `delay` has elapsed.
    pub fn add_after(&self, key: T, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            queue.add(key).await;
        });
    }

    /// Re-enqueues `key` after an exponential backoff based on how many
    /// times it was rate-limited since the last [`forget`](Self::forget).
    pub async fn add_rate_limited(&self, key: T) {
        let delay = {
            let mut state = self.inner.state.lock().await;
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let exponent = (*failures).min(30);
            *failures += 1;
            self.inner
                .base_delay
                .saturating_mul(1u32 << exponent)
                .min(self.inner.max_delay)
        };
        self.add_after(key, delay);
    }

    /// How many times `key` has been rate-limited.
    pub async fn num_requeues(&self, key: &T) -> u32 {
        self.inner
            .state
            .lock()
            .await
            .failures
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Clears the backoff history for `key`.
    pub async fn forget(&self, key: &T) {
        self.inner.state.lock().await.failures.remove(key);
    }

    /// Waits for the next key. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock().await;
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Marks `key` as no longer being processed, re-queueing it if it was
    /// added again in the meantime.
    pub async fn done(&self, key: &T) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stops handing out keys; waiting workers wake up with `None`.
    pub async fn shut_down(&self) {
        self.inner.state.lock().await.shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().await.shutting_down
    }

    /// Number of keys waiting to be processed.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> WorkQueue<&'static str> {
        WorkQueue::new(Duration::from_millis(5), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn duplicate_adds_collapse() {
        let q = queue();
        q.add("a").await;
        q.add("a").await;
        q.add("b").await;
        assert_eq!(q.len().await, 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
    }

    #[tokio::test]
    async fn key_in_flight_is_requeued_on_done() {
        let q = queue();
        q.add("a").await;
        let key = q.get().await.unwrap();

        q.add("a").await;
        assert!(q.is_empty().await, "in-flight key must not be handed out twice");

        q.done(&key).await;
        assert_eq!(q.len().await, 1);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_backoff_doubles_and_caps() {
        let q = WorkQueue::new(Duration::from_millis(100), Duration::from_millis(300));
        for _ in 0..4 {
            q.add_rate_limited("a").await;
        }
        assert_eq!(q.num_requeues(&"a").await, 4);

        tokio::time::sleep(Duration::from_millis(99)).await;
        assert!(q.is_empty().await);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(q.get().await, Some("a"));

        q.forget(&"a").await;
        assert_eq!(q.num_requeues(&"a").await, 0);
    }

    #[tokio::test]
    async fn shut_down_wakes_waiting_workers() {
        let q = queue();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::task::yield_now().await;
        q.shut_down().await;
        assert_eq!(waiter.await.unwrap(), None);

        q.add("late").await;
        assert!(q.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn add_after_delays_delivery() {
        let q = queue();
        q.add_after("a", Duration::from_secs(5));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(q.is_empty().await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(q.len().await, 1);
    }
}
