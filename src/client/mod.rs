//! Coalescing client — the coordinator tying key derivation, response cache,
//! and in-flight registry together in front of an injected transport.
//!
//! [`Client::request`] is the sole entry point. A cached payload resolves
//! without suspending; otherwise the caller joins the in-flight registry and
//! either leads the transport call or waits for the leader's settlement. The
//! transport is invoked at most once per canonical key while a call is
//! outstanding, and successful payloads short-circuit further calls for the
//! TTL window.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::cache::{DEFAULT_TTL, ResponseCache};
use crate::descriptor::RequestDescriptor;
use crate::inflight::{InFlightRegistry, Role};
use crate::key::canonical_key;

/// Boxed error type the injected transport may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by [`Client::request`].
///
/// Cloneable so one settlement fans the same outcome out to every waiter of
/// an in-flight epoch.
#[derive(Debug, Clone, ThisError)]
pub enum Error {
    /// The descriptor could not be canonicalized into a cache key. Surfaced
    /// before any cache or registry interaction.
    #[error("descriptor cannot be canonicalized: {0}")]
    InvalidDescriptor(Arc<serde_json::Error>),

    /// The transport call for this caller's key failed. Every waiter of the
    /// failing epoch receives the same error; nothing is cached and the next
    /// request for the key starts fresh.
    #[error("transport error: {0}")]
    Transport(Arc<BoxError>),

    /// The leader for this caller's key went away without settling (its
    /// request future was dropped mid-call).
    #[error("in-flight request was abandoned before settling")]
    Abandoned,
}

/// Outcome delivered to every waiter of one in-flight epoch.
type Settlement = Result<Value, Error>;

/// An injected asynchronous transport: performs exactly one network round
/// trip per invocation, with no caching or deduplication of its own.
///
/// Implemented automatically for any async closure of the right shape, in
/// the same spirit as handler functions elsewhere in the ecosystem:
///
/// ```
/// use reqflight::{BoxError, Client, RequestDescriptor};
/// use serde_json::{Value, json};
///
/// let client = Client::new(|descriptor: RequestDescriptor| async move {
///     // hand off to your actual HTTP stack here
///     Ok::<Value, BoxError>(json!({ "echo": descriptor.url() }))
/// });
/// ```
pub trait Transport: Send + Sync + 'static {
    /// Performs the network call described by `descriptor`.
    fn call(
        &self,
        descriptor: RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>;
}

impl<T, F> Transport for T
where
    T: Fn(RequestDescriptor) -> F + Send + Sync + 'static,
    F: Future<Output = Result<Value, BoxError>> + Send + 'static,
{
    fn call(
        &self,
        descriptor: RequestDescriptor,
    ) -> Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>> {
        Box::pin((self)(descriptor))
    }
}

/// Request-coalescing response cache wrapped around an injected transport.
///
/// All coordination state is owned by the instance — independent clients
/// share nothing, so tests (and multi-tenant setups) can run several side by
/// side.
///
/// # Examples
///
/// ```rust,no_run
/// use reqflight::{BoxError, Client, RequestDescriptor};
/// use serde_json::{Value, json};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new(|_descriptor: RequestDescriptor| async {
///         Ok::<Value, BoxError>(json!({ "status": "ok" }))
///     });
///
///     let descriptor = RequestDescriptor::get("/status");
///     let payload = client.request(&descriptor).await?;
///     assert_eq!(payload["status"], "ok");
///     Ok(())
/// }
/// ```
pub struct Client<T: Transport> {
    transport: T,
    cache: ResponseCache,
    inflight: InFlightRegistry<Settlement>,
}

impl<T: Transport> Client<T> {
    /// Creates a client with the default 60-second cache TTL.
    pub fn new(transport: T) -> Self {
        Self::with_ttl(transport, DEFAULT_TTL)
    }

    /// Creates a client whose successful payloads are served from cache for
    /// `ttl` after each settlement.
    pub fn with_ttl(transport: T, ttl: Duration) -> Self {
        Self {
            transport,
            cache: ResponseCache::new(ttl),
            inflight: InFlightRegistry::new(),
        }
    }

    /// Resolves `descriptor` to a payload, deduplicating concurrent identical
    /// requests and serving recent successes from cache.
    ///
    /// A cache hit resolves without suspending. Otherwise the caller joins
    /// the in-flight registry: a follower suspends until the leader settles;
    /// the leader invokes the transport with the original descriptor, caches
    /// the payload on success (never on failure, and never for `null`), and
    /// fans the outcome out to every waiter, most recently joined first.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDescriptor`] — the descriptor has no canonical key;
    ///   no cache or registry side effects.
    /// - [`Error::Transport`] — the transport call this caller waited on
    ///   failed. Not cached; the next request for the key starts fresh.
    /// - [`Error::Abandoned`] — the leading request future was dropped
    ///   before it could settle.
    pub async fn request(&self, descriptor: &RequestDescriptor) -> Result<Value, Error> {
        let key =
            canonical_key(descriptor).map_err(|e| Error::InvalidDescriptor(Arc::new(e)))?;

        if let Some(payload) = self.cache.get(&key) {
            debug!(%key, "cache hit");
            return Ok(payload);
        }

        let (role, receiver) = self.inflight.join(&key);

        if role == Role::Follower {
            return receiver.await.unwrap_or(Err(Error::Abandoned));
        }

        debug!(%key, method = %descriptor.method(), url = descriptor.url(), "dispatching transport call");

        // Guarantees a settlement even if this future is dropped mid-call,
        // so followers are released instead of waiting forever.
        let guard = SettleGuard::new(&self.inflight, &key);

        let outcome = match self.transport.call(descriptor.clone()).await {
            Ok(payload) => {
                self.cache.put(&key, &payload);
                Ok(payload)
            }
            Err(error) => {
                debug!(%key, %error, "transport call failed");
                Err(Error::Transport(Arc::new(error)))
            }
        };

        guard.complete(outcome);

        // The leader registered its own waiter, so its outcome arrives
        // through the same drain as everyone else's.
        receiver.await.unwrap_or(Err(Error::Abandoned))
    }

    /// Drops the cached payload for `descriptor`, forcing the next request
    /// for its key back to the transport. No-op when nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDescriptor`] when the descriptor has no
    /// canonical key.
    pub fn invalidate(&self, descriptor: &RequestDescriptor) -> Result<(), Error> {
        let key =
            canonical_key(descriptor).map_err(|e| Error::InvalidDescriptor(Arc::new(e)))?;
        self.cache.remove(&key);
        Ok(())
    }
}

/// Settles the key with [`Error::Abandoned`] on drop unless completed first.
struct SettleGuard<'a> {
    inflight: &'a InFlightRegistry<Settlement>,
    key: &'a str,
    armed: bool,
}

impl<'a> SettleGuard<'a> {
    fn new(inflight: &'a InFlightRegistry<Settlement>, key: &'a str) -> Self {
        Self {
            inflight,
            key,
            armed: true,
        }
    }

    fn complete(mut self, outcome: Settlement) {
        self.armed = false;
        self.inflight.settle(self.key, outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inflight.settle(self.key, Err(Error::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Transport stub that counts invocations and waits for a permit before
    /// settling, so tests control exactly when calls complete.
    fn gated_transport(
        calls: Arc<AtomicUsize>,
        gate: Arc<Semaphore>,
    ) -> impl Fn(RequestDescriptor) -> Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>
    + Send
    + Sync
    + 'static {
        move |descriptor: RequestDescriptor| {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let _permit = gate.acquire().await.map_err(Box::new)?;
                if descriptor.url().ends_with("/fail") {
                    Err::<Value, BoxError>("upstream unavailable".into())
                } else {
                    Ok(json!({ "v": 1 }))
                }
            })
        }
    }

    fn counting_transport(
        calls: Arc<AtomicUsize>,
        payload: Value,
    ) -> impl Fn(RequestDescriptor) -> Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>
    + Send
    + Sync
    + 'static {
        move |_descriptor: RequestDescriptor| {
            let calls = Arc::clone(&calls);
            let payload = payload.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(payload)
            })
        }
    }

    #[tokio::test]
    async fn concurrent_identical_requests_call_the_transport_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(Client::new(gated_transport(
            Arc::clone(&calls),
            Arc::clone(&gate),
        )));

        let descriptor = RequestDescriptor::get("/users").params(json!({ "page": 1 }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = Arc::clone(&client);
            let descriptor = descriptor.clone();
            handles.push(tokio::spawn(
                async move { client.request(&descriptor).await },
            ));
        }

        // Let every caller reach the registry before the call settles.
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), json!({ "v": 1 }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn descriptors_differing_only_in_key_order_coalesce() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(Client::new(gated_transport(
            Arc::clone(&calls),
            Arc::clone(&gate),
        )));

        let first = RequestDescriptor::get("/a").params(json!({ "b": 1, "a": 2 }));
        let second = RequestDescriptor::get("/a").params(json!({ "a": 2, "b": 1 }));

        let task_one = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(&first).await })
        };
        let task_two = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.request(&second).await })
        };

        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);

        assert_eq!(task_one.await.unwrap().unwrap(), json!({ "v": 1 }));
        assert_eq!(task_two.await.unwrap().unwrap(), json!({ "v": 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeated_request_within_ttl_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Client::new(counting_transport(Arc::clone(&calls), json!({ "v": 1 })));
        let descriptor = RequestDescriptor::get("/users");

        assert_eq!(client.request(&descriptor).await.unwrap(), json!({ "v": 1 }));
        assert_eq!(client.request(&descriptor).await.unwrap(), json!({ "v": 1 }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_after_ttl_hits_the_transport_again() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);
        let client = Client::with_ttl(
            counting_transport(Arc::clone(&calls), json!({ "v": 1 })),
            ttl,
        );
        let descriptor = RequestDescriptor::get("/users");

        client.request(&descriptor).await.unwrap();
        tokio::time::advance(ttl + Duration::from_millis(1)).await;
        client.request(&descriptor).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transport = {
            let calls = Arc::clone(&calls);
            move |_descriptor: RequestDescriptor| {
                let attempt = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err::<Value, BoxError>("boom".into())
                    } else {
                        Ok(json!({ "v": 2 }))
                    }
                }
            }
        };
        let client = Client::new(transport);
        let descriptor = RequestDescriptor::get("/flaky");

        let first = client.request(&descriptor).await;
        assert!(matches!(first, Err(Error::Transport(_))));

        // The failure did not poison the key; the next call goes out fresh.
        assert_eq!(client.request(&descriptor).await.unwrap(), json!({ "v": 2 }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn null_payload_resolves_but_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Client::new(counting_transport(Arc::clone(&calls), Value::Null));
        let descriptor = RequestDescriptor::get("/maybe-empty");

        assert_eq!(client.request(&descriptor).await.unwrap(), Value::Null);
        assert_eq!(client.request(&descriptor).await.unwrap(), Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_on_one_key_leaves_other_keys_untouched() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(Client::new(gated_transport(
            Arc::clone(&calls),
            Arc::clone(&gate),
        )));

        let failing = RequestDescriptor::get("/fail");
        let healthy = RequestDescriptor::get("/ok");

        let mut failing_waiters = Vec::new();
        let mut healthy_waiters = Vec::new();
        for _ in 0..2 {
            let client_a = Arc::clone(&client);
            let d = failing.clone();
            failing_waiters.push(tokio::spawn(async move { client_a.request(&d).await }));

            let client_b = Arc::clone(&client);
            let d = healthy.clone();
            healthy_waiters.push(tokio::spawn(async move { client_b.request(&d).await }));
        }

        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(2);

        for waiter in failing_waiters {
            assert!(matches!(waiter.await.unwrap(), Err(Error::Transport(_))));
        }
        for waiter in healthy_waiters {
            assert_eq!(waiter.await.unwrap().unwrap(), json!({ "v": 1 }));
        }
        // One call per key: followers on each key joined their leader.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_transport_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let client = Client::new(counting_transport(Arc::clone(&calls), json!({ "v": 1 })));
        let descriptor = RequestDescriptor::get("/users");

        client.request(&descriptor).await.unwrap();
        client.request(&descriptor).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        client.invalidate(&descriptor).unwrap();
        client.request(&descriptor).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_leader_releases_followers() {
        let calls = Arc::new(AtomicUsize::new(0));
        // Gate never opens: the leader hangs until its task is aborted.
        let gate = Arc::new(Semaphore::new(0));
        let client = Arc::new(Client::new(gated_transport(calls, gate)));

        let descriptor = RequestDescriptor::get("/slow");

        let leader = {
            let client = Arc::clone(&client);
            let descriptor = descriptor.clone();
            tokio::spawn(async move { client.request(&descriptor).await })
        };
        tokio::task::yield_now().await;

        let follower = {
            let client = Arc::clone(&client);
            let descriptor = descriptor.clone();
            tokio::spawn(async move { client.request(&descriptor).await })
        };
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }

        leader.abort();
        assert!(matches!(
            follower.await.unwrap(),
            Err(Error::Abandoned)
        ));
    }

    #[tokio::test]
    async fn independent_clients_share_no_state() {
        let calls_a = Arc::new(AtomicUsize::new(0));
        let calls_b = Arc::new(AtomicUsize::new(0));
        let client_a = Client::new(counting_transport(Arc::clone(&calls_a), json!(1)));
        let client_b = Client::new(counting_transport(Arc::clone(&calls_b), json!(2)));
        let descriptor = RequestDescriptor::get("/shared-path");

        assert_eq!(client_a.request(&descriptor).await.unwrap(), json!(1));
        assert_eq!(client_b.request(&descriptor).await.unwrap(), json!(2));
        assert_eq!(calls_a.load(Ordering::SeqCst), 1);
        assert_eq!(calls_b.load(Ordering::SeqCst), 1);
    }
}
