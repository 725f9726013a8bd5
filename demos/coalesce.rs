//! Demonstrates request coalescing: eight concurrent identical requests,
//! one transport call.
//!
//! Run with:
//!
//! ```text
//! RUST_LOG=debug cargo run --example coalesce
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use reqflight::{BoxError, Client, RequestDescriptor};
use serde_json::{Value, json};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    // Stub transport standing in for a real HTTP stack: counts invocations
    // and takes long enough that every caller below piles onto one call.
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = {
        let calls = Arc::clone(&calls);
        move |descriptor: RequestDescriptor| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<Value, BoxError>(json!({ "url": descriptor.url(), "v": 1 }))
            }
        }
    };

    let client = Arc::new(Client::new(transport));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        let descriptor = RequestDescriptor::get("/users").params(json!({ "page": 1 }));
        handles.push(tokio::spawn(async move { client.request(&descriptor).await }));
    }

    for handle in handles {
        println!("payload: {}", handle.await??);
    }
    println!("transport calls: {}", calls.load(Ordering::SeqCst));

    Ok(())
}
