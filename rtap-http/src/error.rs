//! Error types for the HTTP transport layer.

#[cfg(feature = "proxy")]
use rtap::error::TapError;

/// Errors that can occur while forwarding a request upstream.
#[cfg(feature = "proxy")]
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upstream URL could not be built.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// Connection failure or timeout.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Failed to read the response body.
    #[error("Failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The body does not match the endpoint's response format.
    #[error("Malformed upstream body: {context}: {reason}")]
    MalformedBody {
        /// Human-readable context.
        context: &'static str,
        /// What was wrong with the body.
        reason: String,
    },
}

#[cfg(feature = "proxy")]
impl From<ProxyError> for TapError {
    fn from(err: ProxyError) -> Self {
        match err {
            ProxyError::MalformedBody { reason, .. } => Self::UpstreamMalformed(reason),
            ProxyError::UrlParse { .. }
            | ProxyError::Http { .. }
            | ProxyError::ResponseBodyRead { .. } => Self::UpstreamUnreachable(err.to_string()),
        }
    }
}
