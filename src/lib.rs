//! # Seawall - a resilience core for commerce API clients
//!
//! Seawall wraps one logical HTTP call in a full resilience stack: a closed
//! error taxonomy, a stale-while-revalidate cache, a retry engine with
//! jittered exponential backoff, and mutable interceptor chains for
//! cross-cutting behavior. Platform adapters build on the [`Client`] and
//! never touch the wire directly.
//!
//! ## Quick start
//!
//! ```no_run
//! use seawall::{Client, RetryPolicy};
//! use serde::Deserialize;
//! use std::time::Duration;
//!
//! #[derive(Deserialize)]
//! struct Product {
//!     sku: String,
//!     name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), seawall::Error> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")?
//!         .timeout(Duration::from_secs(10))
//!         .retry_policy(
//!             RetryPolicy::new(3)
//!                 .with_initial_delay(Duration::from_millis(100))
//!                 .with_max_delay(Duration::from_secs(10)),
//!         )
//!         .build()?;
//!
//!     let product = client.get::<Product>("/products/42").await?;
//!     println!("{} ({} attempts)", product.data.name, product.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Error handling
//!
//! Every failure surfaces as one [`Error`] variant; there is no escape hatch
//! for raw transport errors. Match on the variant, or branch coarsely with
//! [`Error::kind`] and [`Error::is_retryable`]:
//!
//! ```no_run
//! use seawall::Error;
//!
//! # async fn example(client: seawall::Client) {
//! match client.get::<serde_json::Value>("/orders/7").await {
//!     Ok(order) => println!("{:?}", order.data),
//!     Err(Error::NotFound { resource, .. }) => println!("{resource} does not exist"),
//!     Err(Error::RateLimit { retry_after, .. }) => println!("slow down: {retry_after:?}"),
//!     Err(e) if e.is_retryable() => println!("transient: {e}"),
//!     Err(e) => println!("permanent: {e}"),
//! }
//! # }
//! ```
//!
//! ## Caching
//!
//! Attach a [`cache::Cache`] to serve fresh GET responses without touching
//! the network and to fall back to stale entries when revalidation hits a
//! transient fault:
//!
//! ```no_run
//! use seawall::cache::{Cache, CacheConfig};
//! use seawall::Client;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), seawall::Error> {
//! let cache = Arc::new(Cache::new(
//!     CacheConfig::new(Duration::from_secs(300))
//!         .with_stale_time(Duration::from_secs(60)),
//! ));
//! let client = Client::builder()
//!     .base_url("https://api.example.com")?
//!     .cache(cache)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Interceptors
//!
//! Chains for request, response, and error interception live on the client;
//! [`interceptors`] ships ready-made ones for bearer auth, timing stamps,
//! logging, and refresh-on-401:
//!
//! ```no_run
//! use seawall::interceptors::{bearer_auth, TokenProvider};
//! use std::sync::Arc;
//!
//! # fn example(client: seawall::Client) {
//! let provider: TokenProvider = Arc::new(|| Box::pin(async { Ok("token".to_string()) }));
//! let handle = client.interceptors().request.use_fn(bearer_auth(provider));
//! // ... later
//! handle.remove();
//! # }
//! ```

pub mod cache;
pub mod cancel;
pub mod client;
pub mod error;
pub mod interceptor;
pub mod interceptors;
pub mod request;
pub mod retry;
pub mod transport;

pub use cancel::CancellationToken;
pub use client::{Client, ClientBuilder};
pub use error::{Details, Error, ErrorKind, FieldError, Result};
pub use interceptor::{
    error_interceptor, request_interceptor, response_interceptor, InterceptorChain,
    InterceptorHandle, InterceptorManager,
};
pub use request::{ErrorContext, Metadata, RequestConfig, Response, ResponseEnvelope};
pub use retry::{retry, RetryOutcome, RetryPolicy, RetryPredicate};
pub use transport::{RawResponse, Transport};
