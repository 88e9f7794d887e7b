//! Per-call request and response shapes.
//!
//! A [`RequestConfig`] describes one logical call; the interceptor pipeline
//! folds over it before dispatch. A [`ResponseEnvelope`] pairs the parsed
//! body with the request that produced it. Both carry an open metadata map
//! for cross-cutting concerns (timing stamps, trace ids, cache annotations).

use crate::{cancel::CancellationToken, Error};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::collections::HashMap;
use std::time::Duration;

/// An open key/value map carried by requests and responses.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Configuration for an individual call.
///
/// # Examples
///
/// ```
/// use seawall::RequestConfig;
/// use http::Method;
///
/// let config = RequestConfig::new(Method::GET, "/products")
///     .with_query_param("page", "1")
///     .with_query_param("limit", "24");
/// assert_eq!(config.path, "/products");
/// ```
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// The HTTP method.
    pub method: Method,

    /// The request path, relative to the client's base URL.
    pub path: String,

    /// Query parameters appended to the URL. `None`-like omissions are the
    /// caller's responsibility; only present pairs are serialized.
    pub query_params: HashMap<String, String>,

    /// Headers for this request; names are case-insensitive.
    pub headers: HeaderMap,

    /// Optional JSON body.
    pub body: Option<serde_json::Value>,

    /// Per-request timeout override.
    pub timeout: Option<Duration>,

    /// Caller-supplied cancellation token.
    pub cancel: Option<CancellationToken>,

    /// Open metadata propagated through the interceptor pipeline.
    pub metadata: Metadata,
}

impl RequestConfig {
    /// Creates a config with the given method and path.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query_params: HashMap::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            cancel: None,
            metadata: Metadata::new(),
        }
    }

    /// Adds a header.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl AsRef<str>,
    ) -> Result<Self, Error> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Adds a query parameter.
    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    /// Adds multiple query parameters.
    pub fn with_query_params(
        mut self,
        params: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.query_params.extend(params);
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sets a metadata entry.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self::new(Method::GET, "")
    }
}

/// The untyped result of a successful call.
///
/// `data` holds the parsed body: a JSON value for structured responses, a
/// JSON string for plain-text ones. The request that produced the response
/// travels along for interceptors and debugging.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// The parsed response body.
    pub data: serde_json::Value,

    /// The raw response body as received.
    pub raw_body: String,

    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// The request configuration that produced this response.
    pub config: RequestConfig,

    /// Open metadata stamped by interceptors.
    pub metadata: Metadata,
}

/// The context handed to error interceptors.
///
/// Holds the current error (interceptors may transform it) together with the
/// request that failed.
#[derive(Debug)]
pub struct ErrorContext {
    /// The current error. Updated with each interceptor's thrown value.
    pub error: Error,

    /// The request configuration that failed.
    pub config: RequestConfig,
}

/// A typed wrapper around a successful response.
///
/// This is what the typed verb helpers (`get`, `post`, ...) return: the
/// deserialized data plus the transaction metadata needed for observability.
///
/// # Examples
///
/// ```no_run
/// use seawall::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Product {
///     sku: String,
///     name: String,
/// }
///
/// # async fn example() -> Result<(), seawall::Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// let response = client.get::<Product>("/products/42").await?;
/// println!("{} took {:?}", response.data.name, response.latency);
/// if response.was_retried() {
///     println!("needed {} attempts", response.attempts);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Response<T> {
    /// The deserialized response data.
    pub data: T,

    /// The raw response body.
    pub raw_body: String,

    /// The HTTP status code.
    pub status: StatusCode,

    /// The response headers.
    pub headers: HeaderMap,

    /// Total latency across all attempts.
    pub latency: Duration,

    /// Attempts made, including the first.
    pub attempts: u32,

    /// Metadata stamped by the interceptor pipeline (cache annotations,
    /// timing marks).
    pub metadata: Metadata,
}

impl<T> Response<T> {
    /// Maps the response data to a different type, preserving metadata.
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        Response {
            data: f(self.data),
            raw_body: self.raw_body,
            status: self.status,
            headers: self.headers,
            latency: self.latency,
            attempts: self.attempts,
            metadata: self.metadata,
        }
    }

    /// Returns `true` if the call required retries.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Returns `true` if the response was served from the cache.
    pub fn from_cache(&self) -> bool {
        self.metadata
            .get("cache_hit")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }
}

impl<T> AsRef<T> for Response<T> {
    fn as_ref(&self) -> &T {
        &self.data
    }
}

impl<T> std::ops::Deref for Response<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}
