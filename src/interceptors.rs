//! Pre-built interceptors for common cross-cutting concerns.
//!
//! These are conveniences composed from the pipeline primitives in
//! [`crate::interceptor`]; the client does not depend on any of them.

use crate::interceptor::{
    error_interceptor, request_interceptor, response_interceptor, ErrorInterceptor,
    RequestInterceptor, ResponseInterceptor,
};
use crate::{Error, Result};
use futures::future::BoxFuture;
use http::{HeaderMap, HeaderValue};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Async source of bearer tokens for [`bearer_auth`].
pub type TokenProvider = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Injects `Authorization: Bearer <token>` from an async token provider.
///
/// The provider runs on every request, so rotating credentials are picked up
/// without re-registering the interceptor. A provider failure aborts the
/// request fold.
///
/// # Examples
///
/// ```
/// use seawall::interceptors::bearer_auth;
/// use std::sync::Arc;
///
/// let interceptor = bearer_auth(Arc::new(|| {
///     Box::pin(async { Ok("token-from-vault".to_string()) })
/// }));
/// ```
pub fn bearer_auth(provider: TokenProvider) -> RequestInterceptor {
    request_interceptor(move |mut config| {
        let provider = provider.clone();
        async move {
            let token = provider().await?;
            let value = HeaderValue::try_from(format!("Bearer {}", token))
                .map_err(|e| Error::Configuration(format!("Invalid bearer token: {}", e)))?;
            config.headers.insert(http::header::AUTHORIZATION, value);
            Ok(config)
        }
    })
}

/// Merges a fixed header set into every request.
///
/// Request-specific headers win: a name already present on the config is
/// left alone.
pub fn static_headers(headers: HeaderMap) -> RequestInterceptor {
    request_interceptor(move |mut config| {
        let headers = headers.clone();
        async move {
            for (name, value) in &headers {
                if !config.headers.contains_key(name) {
                    config.headers.insert(name.clone(), value.clone());
                }
            }
            Ok(config)
        }
    })
}

/// Stamps the dispatch time into request metadata as `request_started_at`
/// (epoch milliseconds).
pub fn request_timing() -> RequestInterceptor {
    request_interceptor(|mut config| async move {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        config
            .metadata
            .insert("request_started_at".into(), serde_json::json!(now_ms));
        Ok(config)
    })
}

/// Computes `request_duration_ms` from the [`request_timing`] stamp and
/// writes it into response metadata.
pub fn response_timing() -> ResponseInterceptor {
    response_interceptor(|mut response| async move {
        if let Some(started) = response
            .config
            .metadata
            .get("request_started_at")
            .and_then(|v| v.as_u64())
        {
            let now_ms = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64;
            response.metadata.insert(
                "request_duration_ms".into(),
                serde_json::json!(now_ms.saturating_sub(started)),
            );
        }
        Ok(response)
    })
}

/// Logs every outgoing request.
pub fn log_requests() -> RequestInterceptor {
    request_interceptor(|config| async move {
        tracing::debug!(
            method = %config.method,
            path = %config.path,
            query_params = config.query_params.len(),
            "Dispatching request"
        );
        Ok(config)
    })
}

/// Logs every incoming response.
pub fn log_responses() -> ResponseInterceptor {
    response_interceptor(|response| async move {
        tracing::info!(
            status = response.status.as_u16(),
            method = %response.config.method,
            path = %response.config.path,
            "Received response"
        );
        Ok(response)
    })
}

/// Logs every error without recovering from it.
pub fn log_errors() -> ErrorInterceptor {
    error_interceptor(|context| async move {
        tracing::error!(
            error = %context.error,
            kind = %context.error.kind(),
            method = %context.config.method,
            path = %context.config.path,
            "Request failed"
        );
        Err(context.error)
    })
}

/// Replaces the envelope's data with the value at a dot-separated path.
///
/// Commerce backends routinely nest the useful payload (`{"data": {"items":
/// [...]}}`); this unwraps it once for every caller. A missing path is a
/// deserialization error carrying the raw body.
///
/// # Examples
///
/// ```
/// use seawall::interceptors::unwrap_data_path;
///
/// // With `{"data": {"product": {...}}}` responses:
/// let interceptor = unwrap_data_path("data.product");
/// ```
pub fn unwrap_data_path(path: impl Into<String>) -> ResponseInterceptor {
    let path = path.into();
    response_interceptor(move |mut response| {
        let path = path.clone();
        async move {
            let mut current = &response.data;
            for segment in path.split('.') {
                match current.get(segment) {
                    Some(next) => current = next,
                    None => {
                        return Err(Error::Deserialization {
                            raw_response: response.raw_body,
                            serde_error: format!("missing path segment '{}'", segment),
                            status: response.status,
                        });
                    }
                }
            }
            response.data = current.clone();
            Ok(response)
        }
    })
}

/// Async side effect run by [`refresh_on_unauthorized`].
pub type RefreshAction = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// On a 401, runs `refresh` (e.g. renew the token) and rethrows the original
/// error so an outer retry policy configured to retry 401s re-attempts the
/// call with the fresh credential.
///
/// Pair it with
/// `RetryPolicy::new(1).with_retry_on_status([401])` — the interceptor never
/// recovers by itself; it only makes the next attempt viable. If the refresh
/// itself fails, the refresh error propagates instead.
pub fn refresh_on_unauthorized(refresh: RefreshAction) -> ErrorInterceptor {
    error_interceptor(move |context| {
        let refresh = refresh.clone();
        async move {
            if !matches!(context.error, Error::Authentication { .. }) {
                return Err(context.error);
            }
            tracing::info!(
                path = %context.config.path,
                "Refreshing credential after 401"
            );
            refresh().await?;
            Err(context.error)
        }
    })
}
