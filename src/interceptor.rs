//! Ordered, mutable chains for request/response/error interception.
//!
//! Cross-cutting behavior (auth injection, timing, logging, error-to-success
//! recovery) composes here instead of inside the client. Request and
//! response chains are sequential folds over immutable snapshots; the error
//! chain is a recovery search: the first interceptor to produce a response
//! wins, and an interceptor that fails hands its (possibly transformed)
//! error to the next.
//!
//! Chains may be mutated at any time; every pipeline run folds over a
//! snapshot taken at its start, so mid-run mutation never affects an
//! in-flight call.

use crate::request::{ErrorContext, RequestConfig, ResponseEnvelope};
use crate::Result;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

/// Transforms an outgoing request; receives the prior config and returns the
/// next.
pub type RequestInterceptor =
    Arc<dyn Fn(RequestConfig) -> BoxFuture<'static, Result<RequestConfig>> + Send + Sync>;

/// Transforms an incoming response.
pub type ResponseInterceptor =
    Arc<dyn Fn(ResponseEnvelope) -> BoxFuture<'static, Result<ResponseEnvelope>> + Send + Sync>;

/// Attempts to recover from an error: `Ok(response)` recovers, `Err` passes
/// the (possibly transformed) error to the next interceptor.
pub type ErrorInterceptor =
    Arc<dyn Fn(ErrorContext) -> BoxFuture<'static, Result<ResponseEnvelope>> + Send + Sync>;

struct ChainInner<I> {
    entries: Vec<(u64, I)>,
    next_id: u64,
}

/// An ordered list of interceptors with stable registration ids.
///
/// Entries are identified by id, not function identity, so the same closure
/// registered twice yields two independently removable registrations.
pub struct InterceptorChain<I> {
    inner: Arc<Mutex<ChainInner<I>>>,
}

impl<I> Clone for InterceptorChain<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: Clone + Send + 'static> Default for InterceptorChain<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: Clone + Send + 'static> InterceptorChain<I> {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChainInner {
                entries: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Appends an interceptor and returns a handle that removes exactly this
    /// registration.
    pub fn use_fn(&self, interceptor: I) -> InterceptorHandle {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.push((id, interceptor));

        let weak: Weak<Mutex<ChainInner<I>>> = Arc::downgrade(&self.inner);
        InterceptorHandle {
            id,
            remover: Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }),
        }
    }

    /// Returns the interceptors in registration order.
    pub fn snapshot(&self) -> Vec<I> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(_, f)| f.clone())
            .collect()
    }

    /// Removes every interceptor.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Number of registered interceptors.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// `true` if no interceptors are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Detaches the single registration it was returned for.
pub struct InterceptorHandle {
    id: u64,
    remover: Box<dyn FnOnce() + Send>,
}

impl InterceptorHandle {
    /// The registration id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the registration from its chain. Removing an
    /// already-removed or cleared registration is a no-op.
    pub fn remove(self) {
        (self.remover)();
    }
}

impl std::fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorHandle")
            .field("id", &self.id)
            .finish()
    }
}

/// Owns the request, response, and error chains for one client.
#[derive(Clone, Default)]
pub struct InterceptorManager {
    /// Runs over outgoing requests, in registration order.
    pub request: InterceptorChain<RequestInterceptor>,
    /// Runs over incoming responses, in registration order.
    pub response: InterceptorChain<ResponseInterceptor>,
    /// Consulted on failures, in registration order, until one recovers.
    pub error: InterceptorChain<ErrorInterceptor>,
}

impl InterceptorManager {
    /// Creates a manager with three empty chains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds the request chain over `config`.
    ///
    /// Starts from a defensive copy so interceptors never observe a caller's
    /// original. Any error aborts the fold and propagates.
    pub async fn run_request_interceptors(&self, config: &RequestConfig) -> Result<RequestConfig> {
        let mut current = config.clone();
        for interceptor in self.request.snapshot() {
            current = interceptor(current).await?;
        }
        Ok(current)
    }

    /// Folds the response chain over `response`.
    pub async fn run_response_interceptors(
        &self,
        response: ResponseEnvelope,
    ) -> Result<ResponseEnvelope> {
        let mut current = response;
        for interceptor in self.response.snapshot() {
            current = interceptor(current).await?;
        }
        Ok(current)
    }

    /// Runs the recovery search over the error chain.
    ///
    /// Each interceptor sees the current error with the failed request's
    /// config. The first to return a response ends the search; one that
    /// fails replaces the context's error and the search continues. If every
    /// interceptor fails (or none is registered), the final error
    /// propagates.
    pub async fn run_error_interceptors(&self, context: ErrorContext) -> Result<ResponseEnvelope> {
        let ErrorContext { mut error, config } = context;
        for interceptor in self.error.snapshot() {
            let attempt = ErrorContext {
                error,
                config: config.clone(),
            };
            match interceptor(attempt).await {
                Ok(response) => return Ok(response),
                Err(next_error) => error = next_error,
            }
        }
        Err(error)
    }

    /// Empties all three chains.
    pub fn clear(&self) {
        self.request.clear();
        self.response.clear();
        self.error.clear();
    }
}

/// Wraps an async closure as a [`RequestInterceptor`].
pub fn request_interceptor<F, Fut>(f: F) -> RequestInterceptor
where
    F: Fn(RequestConfig) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<RequestConfig>> + Send + 'static,
{
    Arc::new(move |config| Box::pin(f(config)))
}

/// Wraps an async closure as a [`ResponseInterceptor`].
pub fn response_interceptor<F, Fut>(f: F) -> ResponseInterceptor
where
    F: Fn(ResponseEnvelope) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ResponseEnvelope>> + Send + 'static,
{
    Arc::new(move |response| Box::pin(f(response)))
}

/// Wraps an async closure as an [`ErrorInterceptor`].
pub fn error_interceptor<F, Fut>(f: F) -> ErrorInterceptor
where
    F: Fn(ErrorContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<ResponseEnvelope>> + Send + 'static,
{
    Arc::new(move |context| Box::pin(f(context)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use http::Method;

    fn tag_request(tag: &'static str) -> RequestInterceptor {
        request_interceptor(move |mut config: RequestConfig| async move {
            let trail = config
                .metadata
                .get("trail")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            config
                .metadata
                .insert("trail".into(), serde_json::json!(format!("{trail}{tag}")));
            Ok(config)
        })
    }

    fn envelope_for(config: RequestConfig) -> ResponseEnvelope {
        ResponseEnvelope {
            data: serde_json::json!({}),
            raw_body: String::new(),
            status: http::StatusCode::OK,
            headers: http::HeaderMap::new(),
            config,
            metadata: Default::default(),
        }
    }

    fn trail_of(config: &RequestConfig) -> &str {
        config
            .metadata
            .get("trail")
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    #[tokio::test]
    async fn request_fold_runs_in_registration_order() {
        let manager = InterceptorManager::new();
        manager.request.use_fn(tag_request("a"));
        manager.request.use_fn(tag_request("b"));
        manager.request.use_fn(tag_request("c"));

        let config = RequestConfig::new(Method::GET, "/");
        let result = manager.run_request_interceptors(&config).await.unwrap();
        assert_eq!(trail_of(&result), "abc");
        // The caller's config is untouched.
        assert_eq!(trail_of(&config), "");
    }

    #[tokio::test]
    async fn handle_removes_exactly_its_registration() {
        let manager = InterceptorManager::new();
        manager.request.use_fn(tag_request("a"));
        let handle = manager.request.use_fn(tag_request("b"));
        manager.request.use_fn(tag_request("c"));

        handle.remove();

        let config = RequestConfig::new(Method::GET, "/");
        let result = manager.run_request_interceptors(&config).await.unwrap();
        assert_eq!(trail_of(&result), "ac");
        assert_eq!(manager.request.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_registrations_are_independent() {
        let chain: InterceptorChain<RequestInterceptor> = InterceptorChain::new();
        let duplicate = tag_request("x");
        let first = chain.use_fn(duplicate.clone());
        let second = chain.use_fn(duplicate);

        assert_ne!(first.id(), second.id());
        first.remove();
        assert_eq!(chain.len(), 1);
    }

    #[tokio::test]
    async fn request_fold_aborts_on_error() {
        let manager = InterceptorManager::new();
        manager.request.use_fn(request_interceptor(|_| async {
            Err(Error::Configuration("rejected".into()))
        }));
        manager.request.use_fn(tag_request("never"));

        let config = RequestConfig::new(Method::GET, "/");
        let err = manager.run_request_interceptors(&config).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn error_chain_returns_first_recovery() {
        let manager = InterceptorManager::new();
        manager.error.use_fn(error_interceptor(|context| async move {
            Err(context.error) // declines
        }));
        manager.error.use_fn(error_interceptor(|context| async move {
            Ok(envelope_for(context.config)) // recovers
        }));
        manager.error.use_fn(error_interceptor(|_| async {
            panic!("must not run after a recovery")
        }));

        let context = ErrorContext {
            error: Error::Cancelled,
            config: RequestConfig::new(Method::GET, "/"),
        };
        let response = manager.run_error_interceptors(context).await.unwrap();
        assert_eq!(response.status, http::StatusCode::OK);
    }

    #[tokio::test]
    async fn error_chain_propagates_transformed_error() {
        let manager = InterceptorManager::new();
        manager.error.use_fn(error_interceptor(|_| async {
            Err(Error::Configuration("transformed".into()))
        }));
        manager.error.use_fn(error_interceptor(|context| async move {
            // Sees the transformed error, fails with it again.
            assert!(matches!(context.error, Error::Configuration(_)));
            Err(context.error)
        }));

        let context = ErrorContext {
            error: Error::Cancelled,
            config: RequestConfig::new(Method::GET, "/"),
        };
        let err = manager.run_error_interceptors(context).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[tokio::test]
    async fn empty_error_chain_propagates_original() {
        let manager = InterceptorManager::new();
        let context = ErrorContext {
            error: Error::Cancelled,
            config: RequestConfig::new(Method::GET, "/"),
        };
        let err = manager.run_error_interceptors(context).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn mutation_during_a_run_does_not_affect_it() {
        let manager = InterceptorManager::new();
        let chain = manager.request.clone();
        // The first interceptor empties the chain mid-run; the snapshot
        // keeps the rest of this run intact.
        manager.request.use_fn(request_interceptor(move |config| {
            let chain = chain.clone();
            async move {
                chain.clear();
                Ok(config)
            }
        }));
        manager.request.use_fn(tag_request("b"));

        let config = RequestConfig::new(Method::GET, "/");
        let result = manager.run_request_interceptors(&config).await.unwrap();
        assert_eq!(trail_of(&result), "b");
        assert!(manager.request.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_all_three_chains() {
        let manager = InterceptorManager::new();
        manager.request.use_fn(tag_request("a"));
        manager
            .response
            .use_fn(response_interceptor(|r| async move { Ok(r) }));
        manager
            .error
            .use_fn(error_interceptor(|c| async move { Err(c.error) }));

        manager.clear();
        assert!(manager.request.is_empty());
        assert!(manager.response.is_empty());
        assert!(manager.error.is_empty());
    }
}
