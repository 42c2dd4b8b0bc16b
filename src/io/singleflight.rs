use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

type Slot<V> = watch::Receiver<Option<V>>;

/// Collapses concurrent computations of the same key into one.
///
/// The first caller for a key becomes the leader and runs the computation;
/// callers arriving while it runs wait for and share its result. Results
/// (including errors) are only shared with callers that were waiting, never
/// stored, so a failed computation is retried by the next caller.
///
/// If the leader is cancelled before producing a value, waiters race to
/// become the next leader.
pub struct SingleFlight<K, V> {
    calls: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

/// Removes the leader's slot when its computation ends or is cancelled.
struct Registration<'a, K: Eq + Hash, V> {
    flight: &'a SingleFlight<K, V>,
    key: K,
    rx: Slot<V>,
}

impl<K: Eq + Hash, V> Drop for Registration<'_, K, V> {
    fn drop(&mut self) {
        let mut calls = self.flight.lock();
        // The slot may have been forgotten and replaced by a newer leader
        if calls
            .get(&self.key)
            .is_some_and(|rx| rx.same_channel(&self.rx))
        {
            calls.remove(&self.key);
        }
    }
}

impl<K, V> SingleFlight<K, V> {
    fn lock(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `compute` for `key`, or join the computation already running.
    ///
    /// Returns the value and whether it came from another caller's computation.
    pub async fn run<F, Fut>(&self, key: K, compute: F) -> (V, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let (tx, rx) = loop {
            let mut waiting = {
                let mut calls = self.lock();
                match calls.get(&key) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        calls.insert(key.clone(), rx.clone());
                        break (tx, rx);
                    }
                }
            };

            if let Ok(value) = waiting.wait_for(Option::is_some).await {
                if let Some(value) = &*value {
                    return (value.clone(), true);
                }
            };
        };

        let _registration = Registration {
            flight: self,
            key,
            rx,
        };
        let value = compute().await;
        tx.send_replace(Some(value.clone()));
        (value, false)
    }

    /// Detach running computations whose key matches `predicate`.
    ///
    /// Callers already waiting still receive the result; new callers start
    /// a fresh computation.
    pub fn forget(&self, predicate: impl Fn(&K) -> bool) {
        self.lock().retain(|key, _| !predicate(key));
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.lock().len()
    }
}
