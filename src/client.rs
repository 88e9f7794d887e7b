//! The base client: one logical HTTP call, end to end.
//!
//! [`Client`] owns the resilience stack — cache consult, interceptor
//! pipeline, retry engine, timeout/cancellation composition — and is the
//! single place transport and HTTP outcomes become taxonomy errors. Commerce
//! adapters build [`RequestConfig`]s, call the typed verb helpers, and only
//! ever see typed envelopes or typed errors.

use crate::{
    cache::{generate_cache_key, Cache, CacheKeyParams},
    cancel::{cancelled_opt, CancellationToken},
    interceptor::InterceptorManager,
    request::{ErrorContext, RequestConfig, Response, ResponseEnvelope},
    retry::{retry, RetryOutcome, RetryPolicy},
    transport::{RawResponse, ReqwestTransport, Transport},
    Error, Result,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A resilient HTTP client for commerce API calls.
///
/// The client is cheap to clone and designed to be reused; it maintains a
/// connection pool (through its transport) and configuration that applies to
/// all requests.
///
/// # Examples
///
/// ```no_run
/// use seawall::{Client, RetryPolicy};
/// use serde::Deserialize;
/// use std::time::Duration;
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
///     .timeout(Duration::from_secs(10))
///     .retry_policy(RetryPolicy::new(3))
///     .build()?;
///
/// let product = client.get::<Product>("/products/42").await?;
/// println!("{} after {} attempts", product.data.name, product.attempts);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    base_url: Url,
    default_headers: HeaderMap,
    auth_token: Option<String>,
    timeout: Duration,
    retry_policy: RetryPolicy,
    cache: Option<Arc<Cache>>,
    interceptors: InterceptorManager,
}

impl Client {
    /// Creates a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// The client's interceptor chains.
    ///
    /// Chains may be mutated at any time; in-flight calls keep the snapshot
    /// they started with.
    pub fn interceptors(&self) -> &InterceptorManager {
        &self.inner.interceptors
    }

    /// The cache instance, if one was configured.
    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.inner.cache.as_ref()
    }

    /// Executes a call and returns the untyped envelope.
    ///
    /// The full pipeline applies: cache consult for GETs, request
    /// interceptors, transport with combined timeout/cancellation, status
    /// mapping, response/error interceptors, and the retry engine around the
    /// whole attempt. Attempt count and latency land in the envelope
    /// metadata (`attempts`, `latency_ms`).
    pub async fn request(&self, config: RequestConfig) -> Result<ResponseEnvelope> {
        let (mut envelope, attempts, latency) = self.dispatch(config).await?;
        envelope
            .metadata
            .insert("attempts".into(), serde_json::json!(attempts));
        envelope.metadata.insert(
            "latency_ms".into(),
            serde_json::json!(latency.as_millis() as u64),
        );
        Ok(envelope)
    }

    /// Executes a call and deserializes the result.
    ///
    /// This is the main typed entry point; the verb helpers are thin
    /// wrappers over it.
    pub async fn call<Res>(&self, config: RequestConfig) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        let (envelope, attempts, latency) = self.dispatch(config).await?;
        let data = serde_json::from_value(envelope.data).map_err(|e| Error::Deserialization {
            raw_response: envelope.raw_body.clone(),
            serde_error: e.to_string(),
            status: envelope.status,
        })?;
        Ok(Response {
            data,
            raw_body: envelope.raw_body,
            status: envelope.status,
            headers: envelope.headers,
            latency,
            attempts,
            metadata: envelope.metadata,
        })
    }

    /// Makes a GET request.
    pub async fn get<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call(RequestConfig::new(Method::GET, path)).await
    }

    /// Makes a POST request with a JSON body.
    pub async fn post<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| Error::Serialization(e.to_string()))?;
        self.call(RequestConfig::new(Method::POST, path).with_body(body))
            .await
    }

    /// Makes a PUT request with a JSON body.
    pub async fn put<Req, Res>(&self, path: impl Into<String>, body: &Req) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| Error::Serialization(e.to_string()))?;
        self.call(RequestConfig::new(Method::PUT, path).with_body(body))
            .await
    }

    /// Makes a PATCH request with a JSON body.
    pub async fn patch<Req, Res>(
        &self,
        path: impl Into<String>,
        body: &Req,
    ) -> Result<Response<Res>>
    where
        Req: Serialize,
        Res: DeserializeOwned,
    {
        let body = serde_json::to_value(body).map_err(|e| Error::Serialization(e.to_string()))?;
        self.call(RequestConfig::new(Method::PATCH, path).with_body(body))
            .await
    }

    /// Makes a DELETE request.
    pub async fn delete<Res>(&self, path: impl Into<String>) -> Result<Response<Res>>
    where
        Res: DeserializeOwned,
    {
        self.call(RequestConfig::new(Method::DELETE, path)).await
    }

    /// Runs the full pipeline, returning the envelope plus attempt count and
    /// total latency.
    async fn dispatch(
        &self,
        config: RequestConfig,
    ) -> Result<(ResponseEnvelope, u32, Duration)> {
        let start = std::time::Instant::now();

        let cache_key = self.cache_key_for(&config);
        let mut stale_fallback: Option<serde_json::Value> = None;

        if let (Some(cache), Some(key)) = (&self.inner.cache, &cache_key) {
            if let Some(hit) = cache.get(key).await? {
                if !hit.is_stale {
                    tracing::debug!(key = %key, "Serving fresh cache entry");
                    let envelope = self.envelope_from_cache(&config, hit.data, false);
                    return Ok((envelope, 0, start.elapsed()));
                }
                // Stale entries are revalidated; kept around in case the
                // network is down.
                stale_fallback = Some(hit.data);
            }
        }

        let policy = self.effective_policy(&config);
        // A zero-retry policy surfaces the taxonomy error directly instead
        // of an exhaustion wrapper around a single attempt.
        let outcome = if policy.max_retries == 0 {
            let attempt_start = std::time::Instant::now();
            self.execute_once(&config).await.map(|data| RetryOutcome {
                data,
                attempts: 1,
                total_time: attempt_start.elapsed(),
            })
        } else {
            retry(&policy, || self.execute_once(&config)).await
        };

        match outcome {
            Ok(outcome) => {
                let envelope = outcome.data;
                if let (Some(cache), Some(key)) = (&self.inner.cache, &cache_key) {
                    if envelope.status.is_success() {
                        cache.set(key, envelope.data.clone(), None).await?;
                    }
                }
                Ok((envelope, outcome.attempts, start.elapsed()))
            }
            Err(error) => {
                if let (Some(data), true) = (stale_fallback, is_transient(&error)) {
                    tracing::warn!(
                        error = %error,
                        "Revalidation failed; serving stale cache entry"
                    );
                    let envelope = self.envelope_from_cache(&config, data, true);
                    return Ok((envelope, 0, start.elapsed()));
                }
                Err(error)
            }
        }
    }

    /// Executes a single attempt: request chain, transport under combined
    /// cancellation, parse, status mapping, response chain; on failure the
    /// error chain gets a chance to recover before the retry engine sees the
    /// error.
    async fn execute_once(&self, initial: &RequestConfig) -> Result<ResponseEnvelope> {
        let config = self
            .inner
            .interceptors
            .run_request_interceptors(initial)
            .await?;

        let result = self.transport_round_trip(&config).await;

        match result {
            Ok(envelope) => {
                self.inner
                    .interceptors
                    .run_response_interceptors(envelope)
                    .await
            }
            Err(error) => {
                if error.is_cancellation() {
                    return Err(error);
                }
                self.inner
                    .interceptors
                    .run_error_interceptors(ErrorContext { error, config })
                    .await
            }
        }
    }

    async fn transport_round_trip(&self, config: &RequestConfig) -> Result<ResponseEnvelope> {
        let url = self.build_url(config)?;
        let headers = self.build_headers(config);
        let body = config.body.as_ref().map(|b| b.to_string());
        let timeout = config.timeout.unwrap_or(self.inner.timeout);

        tracing::debug!(
            method = %config.method,
            url = %url,
            timeout_ms = timeout.as_millis() as u64,
            "Executing HTTP request"
        );

        // One combined signal governs the call: the internal timeout and any
        // caller token race, first to fire wins. The timer is dropped with
        // the select on every exit path.
        let call_token = CancellationToken::new();
        let raw = tokio::select! {
            result = self.inner.transport.send(
                config.method.clone(),
                url,
                headers,
                body,
                &call_token,
            ) => result?,
            _ = tokio::time::sleep(timeout) => {
                call_token.cancel();
                return Err(Error::Timeout { timeout });
            }
            _ = cancelled_opt(config.cancel.as_ref()) => {
                call_token.cancel();
                return Err(Error::Cancelled);
            }
        };

        self.parse_response(raw, config)
    }

    fn parse_response(&self, raw: RawResponse, config: &RequestConfig) -> Result<ResponseEnvelope> {
        let RawResponse {
            status,
            headers,
            body,
        } = raw;

        tracing::info!(
            status = status.as_u16(),
            method = %config.method,
            path = %config.path,
            "Received HTTP response"
        );

        if !status.is_success() {
            if status.is_client_error() {
                tracing::error!(status = status.as_u16(), response = %body, "Client error");
            } else {
                tracing::warn!(status = status.as_u16(), response = %body, "Server error");
            }
            return Err(Error::from_status(status, body, &headers, &config.path));
        }

        let is_json = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false);

        let data = if is_json && !body.trim().is_empty() {
            serde_json::from_str(&body).map_err(|e| Error::Deserialization {
                raw_response: body.clone(),
                serde_error: e.to_string(),
                status,
            })?
        } else {
            serde_json::Value::String(body.clone())
        };

        Ok(ResponseEnvelope {
            data,
            raw_body: body,
            status,
            headers,
            config: config.clone(),
            metadata: Default::default(),
        })
    }

    fn build_url(&self, config: &RequestConfig) -> Result<Url> {
        let mut url = self.inner.base_url.clone();
        url.set_path(&config.path);
        for (key, value) in &config.query_params {
            url.query_pairs_mut().append_pair(key, value);
        }
        Ok(url)
    }

    /// Merges default headers, the bearer token, and request headers; the
    /// request's own headers win.
    fn build_headers(&self, config: &RequestConfig) -> HeaderMap {
        let mut headers = self.inner.default_headers.clone();
        if let Some(token) = &self.inner.auth_token {
            if let Ok(value) = HeaderValue::try_from(format!("Bearer {}", token)) {
                headers.insert(http::header::AUTHORIZATION, value);
            }
        }
        for (name, value) in &config.headers {
            headers.insert(name.clone(), value.clone());
        }
        headers
    }

    fn cache_key_for(&self, config: &RequestConfig) -> Option<String> {
        if self.inner.cache.is_none() || config.method != Method::GET {
            return None;
        }
        Some(generate_cache_key(&CacheKeyParams {
            method: config.method.as_str(),
            path: &config.path,
            params: (!config.query_params.is_empty()).then_some(&config.query_params),
            body: config.body.as_ref(),
            tags: &[],
        }))
    }

    fn envelope_from_cache(
        &self,
        config: &RequestConfig,
        data: serde_json::Value,
        stale: bool,
    ) -> ResponseEnvelope {
        let raw_body = data.to_string();
        let mut metadata = crate::request::Metadata::new();
        metadata.insert("cache_hit".into(), serde_json::json!(true));
        metadata.insert("cache_stale".into(), serde_json::json!(stale));
        ResponseEnvelope {
            data,
            raw_body,
            status: http::StatusCode::OK,
            headers: HeaderMap::new(),
            config: config.clone(),
            metadata,
        }
    }

    /// A per-request cancellation token takes the policy token's place for
    /// the duration of the call.
    fn effective_policy(&self, config: &RequestConfig) -> RetryPolicy {
        let mut policy = self.inner.retry_policy.clone();
        if let Some(token) = &config.cancel {
            policy.cancel = Some(token.clone());
        }
        policy
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("timeout", &self.inner.timeout)
            .field("retry_policy", &self.inner.retry_policy)
            .field("cache", &self.inner.cache.is_some())
            .finish()
    }
}

/// `true` for faults worth papering over with a stale cache entry.
///
/// Exhaustion is only transient if the underlying failure was; a 404 that
/// survived a retry budget is still a 404.
fn is_transient(error: &Error) -> bool {
    match error {
        Error::RetryExhausted { last_error, .. } => last_error.is_retryable(),
        _ => error.is_retryable(),
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// # Examples
///
/// ```no_run
/// use seawall::{cache::{Cache, CacheConfig}, Client, RetryPolicy};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), seawall::Error> {
/// let cache = Arc::new(Cache::new(
///     CacheConfig::new(Duration::from_secs(300)).with_stale_time(Duration::from_secs(60)),
/// ));
///
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .default_header("User-Agent", "storefront/1.0")?
///     .auth_token("secret")
///     .retry_policy(RetryPolicy::new(2))
///     .cache(cache)
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    base_url: Option<Url>,
    default_headers: HeaderMap,
    auth_token: Option<String>,
    timeout: Duration,
    retry_policy: RetryPolicy,
    cache: Option<Arc<Cache>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Creates a builder with default settings: 30s timeout, no retries, no
    /// cache.
    pub fn new() -> Self {
        Self {
            base_url: None,
            default_headers: HeaderMap::new(),
            auth_token: None,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: RetryPolicy::none(),
            cache: None,
            transport: None,
        }
    }

    /// Sets the base URL for all requests.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Adds a header included in every request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn default_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::Configuration(format!("Invalid header value: {}", e)))?;
        self.default_headers.insert(name, value);
        Ok(self)
    }

    /// Sets a bearer token injected as the `Authorization` header.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the default per-call timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy applied to every call.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Attaches a cache for GET responses.
    ///
    /// The cache is an explicit instance owned by whoever constructed it;
    /// several clients may share one by cloning the `Arc`.
    pub fn cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replaces the default `reqwest` transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the configured [`Client`].
    ///
    /// # Errors
    ///
    /// Returns an error if no base URL was provided or the transport cannot
    /// be constructed.
    pub fn build(self) -> Result<Client> {
        let base_url = self
            .base_url
            .ok_or_else(|| Error::Configuration("Base URL is required".to_string()))?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };

        Ok(Client {
            inner: Arc::new(ClientInner {
                transport,
                base_url,
                default_headers: self.default_headers,
                auth_token: self.auth_token,
                timeout: self.timeout,
                retry_policy: self.retry_policy,
                cache: self.cache,
                interceptors: InterceptorManager::new(),
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheConfig};
    use crate::interceptor::error_interceptor;
    use crate::transport::RawResponse;
    use async_trait::async_trait;
    use http::StatusCode;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedTransport {
        responses: Mutex<VecDeque<Result<RawResponse>>>,
        seen: Mutex<Vec<(Method, Url, HeaderMap, Option<String>)>>,
        delay: Option<Duration>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<Result<RawResponse>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
                delay: None,
            })
        }

        fn slow(responses: Vec<Result<RawResponse>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                seen: Mutex::new(Vec::new()),
                delay: Some(delay),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            method: Method,
            url: Url,
            headers: HeaderMap,
            body: Option<String>,
            cancel: &CancellationToken,
        ) -> Result<RawResponse> {
            self.seen.lock().push((method, url, headers, body));
            if let Some(delay) = self.delay {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
            self.responses.lock().pop_front().unwrap_or_else(|| {
                Err(Error::Network {
                    message: "script exhausted".to_string(),
                    source: None,
                })
            })
        }
    }

    fn json_response(status: StatusCode, body: serde_json::Value) -> RawResponse {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        RawResponse {
            status,
            headers,
            body: body.to_string(),
        }
    }

    fn client_with(transport: Arc<dyn Transport>) -> Client {
        Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .transport(transport)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn typed_get_deserializes_and_counts_attempts() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(
            StatusCode::OK,
            json!({"sku": "A-1"}),
        ))]);
        let client = client_with(transport.clone());

        #[derive(serde::Deserialize)]
        struct Product {
            sku: String,
        }

        let response = client.get::<Product>("/products/1").await.unwrap();
        assert_eq!(response.data.sku, "A-1");
        assert_eq!(response.attempts, 1);
        assert!(!response.was_retried());
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn request_headers_override_defaults_and_auth() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(StatusCode::OK, json!({})))]);
        let client = Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .default_header("X-Store-Id", "default")
            .unwrap()
            .auth_token("builder-token")
            .transport(transport.clone())
            .build()
            .unwrap();

        let config = RequestConfig::new(Method::GET, "/me")
            .with_header("X-Store-Id", "override")
            .unwrap()
            .with_header("Authorization", "Bearer per-request")
            .unwrap();
        client.request(config).await.unwrap();

        let seen = transport.seen.lock();
        let (_, _, headers, _) = &seen[0];
        assert_eq!(headers.get("x-store-id").unwrap(), "override");
        assert_eq!(headers.get("authorization").unwrap(), "Bearer per-request");
    }

    #[tokio::test]
    async fn plain_text_body_becomes_a_json_string() {
        let transport = ScriptedTransport::new(vec![Ok(RawResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: "pong".to_string(),
        })]);
        let client = client_with(transport);

        let envelope = client
            .request(RequestConfig::new(Method::GET, "/ping"))
            .await
            .unwrap();
        assert_eq!(envelope.data, json!("pong"));
    }

    #[tokio::test]
    async fn http_404_maps_into_the_taxonomy() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(
            StatusCode::NOT_FOUND,
            json!({"message": "no such product"}),
        ))]);
        let client = client_with(transport);

        let error = client
            .request(RequestConfig::new(Method::GET, "/products/999"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn timeout_produces_a_timeout_error() {
        let transport = ScriptedTransport::slow(
            vec![Ok(json_response(StatusCode::OK, json!({})))],
            Duration::from_secs(60),
        );
        let client = client_with(transport);

        let config =
            RequestConfig::new(Method::GET, "/slow").with_timeout(Duration::from_millis(20));
        let error = client.request(config).await.unwrap_err();
        assert!(matches!(error, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn caller_cancellation_wins_over_the_transport() {
        let transport = ScriptedTransport::slow(
            vec![Ok(json_response(StatusCode::OK, json!({})))],
            Duration::from_secs(60),
        );
        let client = client_with(transport);

        let token = CancellationToken::new();
        let config = RequestConfig::new(Method::GET, "/slow").with_cancel(token.clone());
        let handle = tokio::spawn(async move { client.request(config).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let error = handle.await.unwrap().unwrap_err();
        assert!(matches!(error, Error::Cancelled));
    }

    #[tokio::test]
    async fn fresh_cache_hit_skips_the_network() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(
            StatusCode::OK,
            json!({"sku": "A-1"}),
        ))]);
        let cache = Arc::new(Cache::new(CacheConfig::new(Duration::from_secs(60))));
        let client = Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .cache(cache)
            .transport(transport.clone())
            .build()
            .unwrap();

        let first = client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap();
        assert!(first.metadata.get("cache_hit").is_none());

        let second = client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap();
        assert_eq!(second.metadata.get("cache_hit"), Some(&json!(true)));
        assert_eq!(second.metadata.get("attempts"), Some(&json!(0)));
        assert_eq!(second.data, json!({"sku": "A-1"}));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn stale_entry_served_when_revalidation_fails_transiently() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(StatusCode::OK, json!({"sku": "A-1"}))),
            Err(Error::Network {
                message: "connection refused".to_string(),
                source: None,
            }),
        ]);
        let cache = Arc::new(Cache::new(
            CacheConfig::new(Duration::from_secs(60)).with_stale_time(Duration::from_millis(10)),
        ));
        let client = Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .cache(cache)
            .transport(transport.clone())
            .build()
            .unwrap();

        client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let served = client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap();
        assert_eq!(served.data, json!({"sku": "A-1"}));
        assert_eq!(served.metadata.get("cache_stale"), Some(&json!(true)));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn stale_entry_not_served_for_definitive_failures() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(StatusCode::OK, json!({"sku": "A-1"}))),
            Ok(json_response(
                StatusCode::NOT_FOUND,
                json!({"message": "gone"}),
            )),
        ]);
        let cache = Arc::new(Cache::new(
            CacheConfig::new(Duration::from_secs(60)).with_stale_time(Duration::from_millis(10)),
        ));
        let client = Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .cache(cache)
            .transport(transport)
            .build()
            .unwrap();

        client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let error = client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn stale_entry_not_served_when_a_retry_policy_wraps_the_failure() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(StatusCode::OK, json!({"sku": "A-1"}))),
            Ok(json_response(
                StatusCode::NOT_FOUND,
                json!({"message": "gone"}),
            )),
        ]);
        let cache = Arc::new(Cache::new(
            CacheConfig::new(Duration::from_secs(60)).with_stale_time(Duration::from_millis(10)),
        ));
        let client = Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .retry_policy(
                RetryPolicy::new(2)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
            .cache(cache)
            .transport(transport.clone())
            .build()
            .unwrap();

        client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // The 404 is declined by the predicate and comes back wrapped; the
        // stale entry must not resurrect the deleted resource.
        let error = client
            .request(RequestConfig::new(Method::GET, "/products/1"))
            .await
            .unwrap_err();
        match error {
            Error::RetryExhausted { last_error, .. } => {
                assert!(matches!(*last_error, Error::NotFound { .. }));
            }
            other => panic!("expected RetryExhausted over NotFound, got {:?}", other),
        }
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn error_interceptor_can_recover_a_failed_call() {
        let transport = ScriptedTransport::new(vec![Ok(json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"message": "down"}),
        ))]);
        let client = client_with(transport);

        client.interceptors().error.use_fn(error_interceptor(|ctx| async move {
            Ok(ResponseEnvelope {
                data: json!({"fallback": true}),
                raw_body: String::new(),
                status: http::StatusCode::OK,
                headers: HeaderMap::new(),
                config: ctx.config,
                metadata: Default::default(),
            })
        }));

        let envelope = client
            .request(RequestConfig::new(Method::GET, "/inventory"))
            .await
            .unwrap();
        assert_eq!(envelope.data, json!({"fallback": true}));
    }

    #[tokio::test]
    async fn retries_then_succeeds_under_policy() {
        let transport = ScriptedTransport::new(vec![
            Ok(json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"message": "down"}),
            )),
            Ok(json_response(StatusCode::OK, json!({"ok": true}))),
        ]);
        let client = Client::builder()
            .base_url("https://api.example.test")
            .unwrap()
            .retry_policy(
                RetryPolicy::new(2)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            )
            .transport(transport.clone())
            .build()
            .unwrap();

        let envelope = client
            .request(RequestConfig::new(Method::GET, "/flaky"))
            .await
            .unwrap();
        assert_eq!(envelope.metadata.get("attempts"), Some(&json!(2)));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn missing_base_url_is_a_configuration_error() {
        let error = Client::builder().build().unwrap_err();
        assert!(matches!(error, Error::Configuration(_)));
    }
}
