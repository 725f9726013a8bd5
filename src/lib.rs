//! # reqflight
//!
//! A request-coalescing response cache for async HTTP clients.
//!
//! reqflight sits in front of an injected transport function and guarantees
//! that semantically identical requests issued concurrently trigger exactly
//! one network call — every caller receives the single outcome — and that a
//! successful payload short-circuits further calls for a fixed TTL window,
//! even for sequential, non-overlapping bursts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reqflight::{BoxError, Client, RequestDescriptor};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Inject your transport: one invocation, one network round trip.
//!     let client = Client::new(|descriptor: RequestDescriptor| async move {
//!         // call reqwest/hyper/etc. here
//!         Ok::<Value, BoxError>(json!({ "url": descriptor.url() }))
//!     });
//!
//!     let descriptor = RequestDescriptor::get("/users").params(json!({ "page": 1 }));
//!     let payload = client.request(&descriptor).await?;
//!     println!("{payload}");
//!     Ok(())
//! }
//! ```
//!
//! Requests are identified by a canonical key that ignores mapping-key order,
//! so `{"a": 1, "b": 2}` and `{"b": 2, "a": 1}` name the same request. See
//! [`key::canonical_key`] for the details.

// ── Core pipeline: key derivation → cache → in-flight coordination ───────────
pub mod cache;
pub mod client;
pub mod descriptor;
pub mod inflight;
pub mod key;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{DEFAULT_TTL, ResponseCache};
pub use client::{BoxError, Client, Error, Transport};
pub use descriptor::{Method, RequestDescriptor};
pub use inflight::{InFlightRegistry, Role};
