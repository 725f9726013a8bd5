//! In-flight registry — leader election and waiter fan-out per request key.
//!
//! The first caller to [`join`](InFlightRegistry::join) a key becomes the
//! leader and is responsible for invoking the transport and settling the key;
//! every caller after it becomes a follower and just waits. Settlement drains
//! the waiter list in last-in-first-out order and removes the entry, so the
//! next join starts a fresh epoch.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

/// The role [`InFlightRegistry::join`] assigns to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// No call for this key was in flight; this caller must invoke the
    /// transport and settle the key.
    Leader,
    /// A call for this key is already in flight; this caller must only wait.
    Follower,
}

/// Registry of waiters for transport calls currently in flight, keyed by
/// canonical request key.
///
/// `join` is a single atomic check-and-insert: between a `Leader` return and
/// the matching [`settle`](Self::settle), every other `join` for that key
/// observes `Follower`. Distinct keys never contend beyond the brief map
/// lock — no waiter for one key ever blocks on another key's transport.
pub struct InFlightRegistry<T> {
    waiters: Mutex<HashMap<String, Vec<oneshot::Sender<T>>>>,
}

impl<T: Clone> InFlightRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a waiter for `key` and reports whether it leads the call.
    ///
    /// The leader's own continuation is registered like any follower's, so a
    /// single [`settle`](Self::settle) resolves every caller of the epoch
    /// through the returned receiver.
    pub fn join(&self, key: &str) -> (Role, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();

        let role = match self.lock().entry(key.to_owned()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().push(tx);
                Role::Follower
            }
            Entry::Vacant(vacant) => {
                vacant.insert(vec![tx]);
                Role::Leader
            }
        };

        debug!(key, ?role, "joined in-flight call");
        (role, rx)
    }

    /// Resolves every waiter for `key` with a clone of `outcome`, most
    /// recently joined first, and removes the entry.
    ///
    /// Waiters that stopped listening (dropped their receiver) are skipped
    /// without disturbing the rest of the drain. No-op for a key with no
    /// in-flight call.
    pub fn settle(&self, key: &str, outcome: T) {
        let mut waiters = self.lock();
        let Some(mut list) = waiters.remove(key) else {
            return;
        };

        debug!(key, waiters = list.len(), "settling in-flight call");
        while let Some(tx) = list.pop() {
            let _ = tx.send(outcome.clone());
        }
    }

    /// Returns `true` while a call for `key` is outstanding.
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<oneshot::Sender<T>>>> {
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Clone> Default for InFlightRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
