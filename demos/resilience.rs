//! Demonstrates the resilience stack: retries, caching, and interceptors.
//!
//! This example shows how to:
//! - Configure jittered exponential backoff
//! - Attach a stale-while-revalidate cache
//! - Register interceptors for logging and timing
//! - Match on the error taxonomy
//!
//! Run with: `cargo run --example resilience`

use seawall::cache::{Cache, CacheConfig};
use seawall::interceptors::{log_requests, log_responses, response_timing};
use seawall::{Client, Error, RetryPolicy};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct Post {
    id: u32,
    title: String,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("seawall=debug,resilience=info")
        .init();

    let cache = Arc::new(Cache::new(
        CacheConfig::new(Duration::from_secs(300)).with_stale_time(Duration::from_secs(30)),
    ));

    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .timeout(Duration::from_secs(10))
        .retry_policy(
            RetryPolicy::new(3)
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(5)),
        )
        .cache(cache.clone())
        .build()?;

    client.interceptors().request.use_fn(log_requests());
    client.interceptors().response.use_fn(log_responses());
    client.interceptors().response.use_fn(response_timing());

    println!("=== First call (network) ===");
    let first = client.get::<Post>("/posts/1").await?;
    println!("{} (from cache: {})", first.data.title, first.from_cache());

    println!("=== Second call (cache) ===");
    let second = client.get::<Post>("/posts/1").await?;
    println!("{} (from cache: {})", second.data.title, second.from_cache());

    let stats = cache.stats();
    println!("Cache: {} entries ({} fresh, {} stale)", stats.size, stats.fresh, stats.stale);

    println!("=== Error taxonomy ===");
    match client.get::<Post>("/posts/99999999").await {
        Ok(post) => println!("unexpected: {:?}", post.data),
        Err(Error::NotFound { resource, .. }) => println!("not found: {}", resource),
        Err(e) if e.is_retryable() => println!("transient after retries: {}", e),
        Err(e) => println!("permanent: {}", e),
    }

    Ok(())
}
