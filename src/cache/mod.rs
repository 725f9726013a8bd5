//! Response cache — TTL-bounded store for the last successful payload per key.
//!
//! Each entry is evicted proactively by a spawned tokio task once its TTL
//! elapses, and defensively on read if the task has not run yet. Payloads are
//! stored in serialized form; an entry that no longer parses is dropped and
//! reported as a miss rather than surfaced as an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Window during which a cached payload short-circuits the transport (60 s).
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    /// Payload in serialized JSON form, re-parsed on every read.
    payload: String,
    expires_at: Instant,
    /// Eviction task armed for this entry; aborted when the entry is
    /// overwritten or removed. At most one is live per key.
    reaper: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<String, CacheEntry>>>;

/// Time-bounded store mapping a canonical request key to its last successful
/// payload.
///
/// All operations take `&self` and complete without awaiting: the entry map
/// is guarded by a plain mutex held only for map mutation. [`put`](Self::put)
/// spawns the eviction task onto the ambient tokio runtime, so the cache must
/// be used from within one.
pub struct ResponseCache {
    entries: Entries,
    ttl: Duration,
}

impl ResponseCache {
    /// Creates an empty cache whose entries live for `ttl` after each write.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Looks up the payload stored under `key`.
    ///
    /// Misses on absent, expired, or unparseable entries. Expired and
    /// unparseable entries are removed on the way out, so the next write
    /// starts clean.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = lock(&self.entries);

        let entry = entries.get(key)?;

        if entry.expires_at <= Instant::now() {
            // The reaper has not fired yet; evict here instead.
            remove_entry(&mut entries, key);
            return None;
        }

        match serde_json::from_str(&entry.payload) {
            Ok(payload) => Some(payload),
            Err(error) => {
                warn!(key, %error, "evicting unparseable cache entry");
                remove_entry(&mut entries, key);
                None
            }
        }
    }

    /// Stores `payload` under `key`, replacing any previous entry and
    /// re-arming its eviction timer for a fresh TTL.
    ///
    /// Storing [`Value::Null`] removes the entry instead: the explicit
    /// "empty" result is never cached.
    pub fn put(&self, key: &str, payload: &Value) {
        if payload.is_null() {
            self.remove(key);
            return;
        }

        let Ok(serialized) = serde_json::to_string(payload) else {
            debug!(key, "payload not serializable, skipping cache write");
            return;
        };

        let expires_at = Instant::now() + self.ttl;
        let reaper = spawn_reaper(&self.entries, key, self.ttl);

        let mut entries = lock(&self.entries);
        remove_entry(&mut entries, key);
        entries.insert(
            key.to_owned(),
            CacheEntry {
                payload: serialized,
                expires_at,
                reaper,
            },
        );
    }

    /// Removes the entry under `key` and cancels its eviction timer.
    /// No-op when the key is absent.
    pub fn remove(&self, key: &str) {
        remove_entry(&mut lock(&self.entries), key);
    }

    /// Returns the number of live entries. Expired entries awaiting their
    /// reaper still count.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Returns `true` when the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

impl Drop for ResponseCache {
    fn drop(&mut self) {
        for entry in lock(&self.entries).values() {
            entry.reaper.abort();
        }
    }
}

// A poisoned map only means another thread panicked mid-mutation of plain
// data; the map itself is still coherent, so recover the guard.
fn lock(entries: &Entries) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn remove_entry(entries: &mut HashMap<String, CacheEntry>, key: &str) {
    if let Some(entry) = entries.remove(key) {
        entry.reaper.abort();
    }
}

/// Arms the eviction task for one entry epoch. The deadline check keeps a
/// stale reaper (aborted after its sleep already returned) from deleting a
/// newer entry for the same key.
fn spawn_reaper(entries: &Entries, key: &str, ttl: Duration) -> JoinHandle<()> {
    let entries = Arc::clone(entries);
    let key = key.to_owned();

    tokio::spawn(async move {
        tokio::time::sleep(ttl).await;

        let mut entries = lock(&entries);
        if entries
            .get(&key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(&key);
            debug!(%key, "cache entry expired");
        }
    })
}
