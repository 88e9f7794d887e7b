//! Pluggable transport seam.
//!
//! The client depends only on the [`Transport`] trait, so tests and exotic
//! deployments can substitute their own wire layer. [`ReqwestTransport`] is
//! the default, built on a pooled `reqwest` client.

use crate::{cancel::CancellationToken, Error, Result};
use async_trait::async_trait;
use http::{HeaderMap, Method, StatusCode};
use url::Url;

/// The untyped outcome of one wire exchange.
#[derive(Debug)]
pub struct RawResponse {
    /// The HTTP status code.
    pub status: StatusCode,
    /// The response headers.
    pub headers: HeaderMap,
    /// The response body, decoded as text.
    pub body: String,
}

impl RawResponse {
    /// `true` if the response declared a JSON content type.
    pub fn is_json(&self) -> bool {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }
}

/// Executes one wire exchange.
///
/// Implementations must honor the cancellation token: when it fires the
/// in-flight exchange is abandoned and [`Error::Cancelled`] returned.
/// Transport-level faults are reported as [`Error::Network`]; mapping into
/// the richer taxonomy happens in the client, never here.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request and collects the response.
    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse>;
}

/// The default transport, a pooled `reqwest` client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Builds the transport with default pool settings.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            Error::Configuration(format!("Failed to build HTTP client: {}", e))
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<RawResponse> {
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let exchange = async {
            let response = request.send().await.map_err(|e| Error::Network {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.text().await.map_err(|e| Error::Network {
                message: e.to_string(),
                source: Some(Box::new(e)),
            })?;

            Ok(RawResponse {
                status,
                headers,
                body,
            })
        };

        tokio::select! {
            result = exchange => result,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}
