//! The error taxonomy shared by every commerce-backend integration.
//!
//! All transport and HTTP outcomes are mapped into [`Error`] in exactly one
//! place (the client's response mapping), so callers never see a raw
//! transport failure. Each variant preserves maximum debugging information:
//! status codes, raw bodies, server-directed retry hints, and an open
//! metadata map for backend-specific detail.

use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An open key/value detail map attached to server-originated errors.
pub type Details = serde_json::Map<String, serde_json::Value>;

/// A single field-level validation failure, as reported by a 400 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// The field the server rejected.
    pub field: String,
    /// The server's message for that field.
    pub message: String,
}

/// The main error type for commerce API calls.
///
/// # Examples
///
/// ```no_run
/// use seawall::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder()
///     .base_url("https://api.example.com")?
///     .build()?;
///
/// match client.get::<serde_json::Value>("/products/42").await {
///     Ok(response) => println!("Success: {:?}", response.data),
///     Err(Error::NotFound { resource, identifier }) => {
///         eprintln!("No such {resource}: {identifier}");
///     }
///     Err(Error::RateLimit { retry_after, .. }) => {
///         eprintln!("Throttled, server says wait {:?}", retry_after);
///     }
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A network-level fault (connection refused, DNS failure, reset).
    ///
    /// This is the synthetic wrap of transport-layer failures; the original
    /// transport message is preserved as the cause.
    #[error("Network error: {message}")]
    Network {
        /// Human-readable description of the transport fault.
        message: String,
        /// The underlying transport error, if one was captured.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The request exceeded its configured timeout.
    #[error("Request timed out after {timeout:?}")]
    Timeout {
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// A caller-supplied cancellation token fired before the call completed.
    #[error("Request cancelled")]
    Cancelled,

    /// The server rejected the credentials (HTTP 401).
    #[error("Authentication failed: {message}")]
    Authentication {
        /// The server's message.
        message: String,
        /// Backend-specific detail fields.
        details: Details,
    },

    /// The credentials are valid but lack permission (HTTP 403).
    #[error("Not authorized: {message}")]
    Authorization {
        /// The server's message.
        message: String,
        /// Backend-specific detail fields.
        details: Details,
    },

    /// The requested resource does not exist (HTTP 404).
    #[error("{resource} not found: {identifier}")]
    NotFound {
        /// The kind of resource that was requested.
        resource: String,
        /// The identifier that failed to resolve.
        identifier: String,
    },

    /// The server rejected the request as malformed (HTTP 400).
    #[error("Validation failed: {message}")]
    Validation {
        /// The server's top-level message.
        message: String,
        /// Per-field failures, when the body carried a structured list.
        errors: Vec<FieldError>,
        /// Backend-specific detail fields.
        details: Details,
    },

    /// The server is throttling this caller (HTTP 429).
    ///
    /// `retry_after` carries the server-directed wait parsed from the
    /// `Retry-After` header (seconds or HTTP-date form). The retry engine
    /// never waits less than this.
    #[error("Rate limited: {message}")]
    RateLimit {
        /// The server's message.
        message: String,
        /// The server-directed wait, if the response carried one.
        retry_after: Option<Duration>,
        /// Backend-specific detail fields.
        details: Details,
    },

    /// Any other non-2xx HTTP response.
    #[error("HTTP error {status}: {body}")]
    Http {
        /// The HTTP status code.
        status: StatusCode,
        /// The raw response body.
        body: String,
        /// The response headers.
        headers: Box<HeaderMap>,
        /// Backend-specific detail fields.
        details: Details,
    },

    /// A 2xx body could not be decoded into the expected type.
    ///
    /// Preserves both the raw body and the serde message so production
    /// decode failures stay debuggable.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    Deserialization {
        /// The raw response body that failed to decode.
        raw_response: String,
        /// The serde error message.
        serde_error: String,
        /// The HTTP status of the response.
        status: StatusCode,
    },

    /// The request body could not be serialized.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// Invalid client or request configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Every retry attempt failed.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
        /// The last error observed before giving up.
        last_error: Box<Error>,
    },
}

/// The kind of an [`Error`], used for set-membership retry rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Cancelled,
    Authentication,
    Authorization,
    NotFound,
    Validation,
    RateLimit,
    Http,
    Deserialization,
    Serialization,
    Configuration,
    InvalidUrl,
    RetryExhausted,
}

impl ErrorKind {
    /// The stable name for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Http => "http",
            ErrorKind::Deserialization => "deserialization",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Configuration => "configuration",
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::RetryExhausted => "retry_exhausted",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Authentication { .. } => ErrorKind::Authentication,
            Error::Authorization { .. } => ErrorKind::Authorization,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Http { .. } => ErrorKind::Http,
            Error::Deserialization { .. } => ErrorKind::Deserialization,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::InvalidUrl(_) => ErrorKind::InvalidUrl,
            Error::RetryExhausted { .. } => ErrorKind::RetryExhausted,
        }
    }

    /// Returns the HTTP status associated with this error, if any.
    ///
    /// Variants that map a fixed status report it (401/403/404/400/429);
    /// timeouts report 408, the conventional synthetic status for them.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Authentication { .. } => Some(StatusCode::UNAUTHORIZED),
            Error::Authorization { .. } => Some(StatusCode::FORBIDDEN),
            Error::NotFound { .. } => Some(StatusCode::NOT_FOUND),
            Error::Validation { .. } => Some(StatusCode::BAD_REQUEST),
            Error::RateLimit { .. } => Some(StatusCode::TOO_MANY_REQUESTS),
            Error::Timeout { .. } => Some(StatusCode::REQUEST_TIMEOUT),
            Error::Http { status, .. } => Some(*status),
            Error::Deserialization { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the open detail map attached to server-originated errors.
    pub fn details(&self) -> Option<&Details> {
        match self {
            Error::Authentication { details, .. }
            | Error::Authorization { details, .. }
            | Error::Validation { details, .. }
            | Error::RateLimit { details, .. }
            | Error::Http { details, .. } => Some(details),
            _ => None,
        }
    }

    /// Returns the server-directed wait, if this error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network errors, timeouts, 429s, and 5xx HTTP errors are retryable.
    /// 4xx identity/validation errors, decode failures, cancellation, and
    /// configuration errors are not.
    ///
    /// # Examples
    ///
    /// ```
    /// use seawall::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::Http {
    ///     status: StatusCode::INTERNAL_SERVER_ERROR,
    ///     body: "server error".to_string(),
    ///     headers: Box::new(http::HeaderMap::new()),
    ///     details: Default::default(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// assert!(!Error::Cancelled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } => true,
            Error::Timeout { .. } => true,
            Error::RateLimit { .. } => true,
            Error::Http { status, .. } => status.is_server_error(),
            _ => false,
        }
    }

    /// Returns `true` if this error represents cancellation.
    ///
    /// Cancellation is never consulted against retry policy; the retry
    /// engine re-raises it immediately.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Maps a non-success HTTP response to the appropriate taxonomy variant.
    ///
    /// This is the single place HTTP statuses become typed errors:
    /// 400 → [`Error::Validation`] (field errors parsed from the body when it
    /// carries a structured list), 401 → [`Error::Authentication`],
    /// 403 → [`Error::Authorization`], 404 → [`Error::NotFound`],
    /// 429 → [`Error::RateLimit`] (with parsed `Retry-After`), anything else
    /// → [`Error::Http`] carrying the status and raw body.
    pub fn from_status(status: StatusCode, body: String, headers: &HeaderMap, path: &str) -> Error {
        let details = parse_details(&body);
        match status {
            StatusCode::BAD_REQUEST => Error::Validation {
                message: message_from_body(&body, "Bad request"),
                errors: parse_field_errors(&body),
                details,
            },
            StatusCode::UNAUTHORIZED => Error::Authentication {
                message: message_from_body(&body, "Authentication required"),
                details,
            },
            StatusCode::FORBIDDEN => Error::Authorization {
                message: message_from_body(&body, "Access denied"),
                details,
            },
            StatusCode::NOT_FOUND => Error::NotFound {
                resource: "Resource".to_string(),
                identifier: path.to_string(),
            },
            StatusCode::TOO_MANY_REQUESTS => Error::RateLimit {
                message: message_from_body(&body, "Too many requests"),
                retry_after: parse_retry_after(headers),
                details,
            },
            _ => Error::Http {
                status,
                body,
                headers: Box::new(headers.clone()),
                details,
            },
        }
    }
}

/// Parses the `Retry-After` header into a duration.
///
/// Supports both delay-seconds (integer) and HTTP-date (RFC 7231) forms.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(seconds) = header.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    if let Ok(date_time) = httpdate::parse_http_date(header) {
        if let Ok(duration) = date_time.duration_since(std::time::SystemTime::now()) {
            return Some(duration);
        }
    }

    None
}

/// Extracts a top-level `message` (or `error`) string from a JSON body.
fn message_from_body(body: &str, fallback: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "error"] {
            if let Some(msg) = value.get(key).and_then(|v| v.as_str()) {
                return msg.to_string();
            }
        }
    }
    if body.trim().is_empty() {
        fallback.to_string()
    } else {
        body.to_string()
    }
}

/// Parses a field-error list from a structured 400 body.
///
/// Accepts the common `{"errors": [{"field": ..., "message": ...}]}` shape;
/// anything else yields an empty list.
fn parse_field_errors(body: &str) -> Vec<FieldError> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return Vec::new();
    };
    let Some(items) = value.get("errors").and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

/// Retains the structured body as the error's open detail map.
fn parse_details(body: &str) -> Details {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => Details::new(),
    }
}

/// A specialized `Result` type for commerce API calls.
pub type Result<T> = std::result::Result<T, Error>;
