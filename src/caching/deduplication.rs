//! # Request Coalescing
//!
//! Single-flight execution per key: while a fill for a key is running, later callers
//! for the same key wait for its result instead of starting their own.
//!
//! The in-flight table maps a key to the receiving half of a `watch` channel. The
//! caller that inserts the entry is the leader and holds a [`FlightGuard`]; it
//! publishes the value, then the entry is removed. If the leader goes away without
//! publishing (cancelled or panicked), the entry is removed anyway and one of the
//! waiting callers takes over.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Result of a coalesced call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coalesced<T> {
    pub value: T,
    /// `true` when the value was produced by another caller's fill
    pub shared: bool,
}

/// Per-key single-flight executor
pub struct RequestCoalescer<T> {
    in_flight: Arc<DashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T> Clone for RequestCoalescer<T> {
    fn clone(&self) -> Self {
        Self {
            in_flight: self.in_flight.clone(),
        }
    }
}

impl<T> Default for RequestCoalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
        }
    }
}

enum Role<T> {
    Leader(FlightGuard<T>),
    Follower(watch::Receiver<Option<T>>),
}

impl<T: Clone + Send + Sync + 'static> RequestCoalescer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fill` unless a flight for `key` is already running, in which case wait
    /// for that flight's value.
    pub async fn run<F, Fut>(&self, key: &str, fill: F) -> Coalesced<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = loop {
            match self.join(key) {
                Role::Leader(guard) => break guard,
                Role::Follower(mut rx) => {
                    let published = rx
                        .wait_for(Option::is_some)
                        .await
                        .ok()
                        .and_then(|value| value.clone());

                    if let Some(value) = published {
                        debug!(key, "joined in-flight fill");
                        return Coalesced {
                            value,
                            shared: true,
                        };
                    }
                    debug!(key, "in-flight leader went away, retrying");
                }
            }
        };

        let value = fill().await;
        guard.complete(value.clone());
        Coalesced {
            value,
            shared: false,
        }
    }

    /// Claim leadership for `key` without waiting. Returns `None` when a flight is
    /// already running.
    pub fn try_lead(&self, key: &str) -> Option<FlightGuard<T>> {
        match self.join(key) {
            Role::Leader(guard) => Some(guard),
            Role::Follower(_) => None,
        }
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Number of keys with a running flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn join(&self, key: &str) -> Role<T> {
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(entry) => Role::Follower(entry.get().clone()),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());
                Role::Leader(FlightGuard {
                    key: key.to_string(),
                    tx,
                    rx,
                    in_flight: self.in_flight.clone(),
                })
            }
        }
    }
}

/// Leadership of one flight. Dropping it without [`FlightGuard::complete`] releases
/// the key and wakes the waiters so that one of them can take over.
pub struct FlightGuard<T> {
    key: String,
    tx: watch::Sender<Option<T>>,
    rx: watch::Receiver<Option<T>>,
    in_flight: Arc<DashMap<String, watch::Receiver<Option<T>>>>,
}

impl<T> FlightGuard<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Publish the value to every waiter and release the key
    pub fn complete(self, value: T) {
        self.tx.send_replace(Some(value));
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        // Only remove our own entry; a successor may already own the key.
        self.in_flight
            .remove_if(&self.key, |_, current| current.same_channel(&self.rx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fill() {
        let coalescer: RequestCoalescer<String> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let coalescer = coalescer.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    coalescer
                        .run("k", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            "value".to_string()
                        })
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let results: Vec<_> = results.into_iter().map(Result::unwrap).collect();
        assert!(results.iter().all(|r| r.value == "value"));
        assert_eq!(results.iter().filter(|r| !r.shared).count(), 1);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let calls = calls.clone();
            coalescer.run("a", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                1
            })
        };
        let b = {
            let calls = calls.clone();
            coalescer.run("b", || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                2
            })
        };

        let (a, b) = tokio::join!(a, b);
        assert_eq!((a.value, b.value), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let first = coalescer.run("k", || async { 1 }).await;
        let second = coalescer.run("k", || async { 2 }).await;
        assert_eq!(first.value, 1);
        assert_eq!(second.value, 2);
        assert!(!second.shared);
    }

    #[tokio::test]
    async fn test_try_lead_is_exclusive() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();

        let guard = coalescer.try_lead("refresh:k").unwrap();
        assert!(coalescer.try_lead("refresh:k").is_none());
        assert!(coalescer.is_in_flight("refresh:k"));

        guard.complete(7);
        assert!(!coalescer.is_in_flight("refresh:k"));
        assert!(coalescer.try_lead("refresh:k").is_some());
    }

    #[tokio::test]
    async fn test_waiter_takes_over_when_leader_drops() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();
        let guard = coalescer.try_lead("k").unwrap();

        let waiter = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move { coalescer.run("k", || async { 42 }).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);

        let result = waiter.await.unwrap();
        assert_eq!(result.value, 42);
        assert!(!result.shared);
        assert_eq!(coalescer.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_key() {
        let coalescer: RequestCoalescer<u32> = RequestCoalescer::new();

        let leader = {
            let coalescer = coalescer.clone();
            tokio::spawn(async move {
                coalescer
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(coalescer.is_in_flight("k"));

        leader.abort();
        let _ = leader.await;

        assert!(!coalescer.is_in_flight("k"));
        assert_eq!(coalescer.run("k", || async { 2 }).await.value, 2);
    }
}
