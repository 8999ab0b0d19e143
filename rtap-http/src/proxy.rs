//! Forwarding authorized requests to upstream services.
//!
//! [`UpstreamProxy`] sends a request to an endpoint's upstream, passing only
//! allow-listed headers (see [`FORWARDED_HEADERS`](crate::constants::FORWARDED_HEADERS))
//! and attaching the caller's tier as `X-Access-*` headers. The inbound query
//! is appended to any query already on the upstream path. Successful
//! responses are decoded according to the endpoint's [`ResponseFormat`].
//!
//! The proxy never retries. A failed or timed-out call surfaces as
//! [`TapError::UpstreamUnreachable`].

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use reqwest::Client;
use rtap::consumption::AuthorizedRequest;
use rtap::error::TapError;
use rtap::registry::{EndpointDefinition, ResponseFormat};
use std::time::Duration;

use crate::constants::{
    ACCESS_FEATURES_HEADER, ACCESS_PRIORITY_HEADER, ACCESS_TIER_HEADER, is_forwarded,
};
use crate::error::ProxyError;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// An inbound request to relay.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    /// HTTP method.
    pub method: Method,
    /// Raw query string, without the leading `?`.
    pub query: Option<String>,
    /// Request body.
    pub body: Bytes,
    /// Inbound headers, filtered before sending.
    pub headers: HeaderMap,
    /// Consumed token backing the request, if any.
    pub authorization: Option<AuthorizedRequest>,
}

/// Decoded upstream body.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    /// No body.
    Empty,
    /// JSON document.
    Json(serde_json::Value),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes, also used for non-success responses.
    Binary(Bytes),
}

impl UpstreamBody {
    /// Re-encodes the body for relaying.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Empty => Bytes::new(),
            Self::Json(value) => Bytes::from(value.to_string()),
            Self::Text(text) => Bytes::from(text),
            Self::Binary(bytes) => bytes,
        }
    }
}

/// Response received from an upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    /// Upstream status code.
    pub status: StatusCode,
    /// Upstream `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Decoded body.
    pub body: UpstreamBody,
}

/// Relays requests to upstream services.
#[derive(Clone, Debug, Default)]
pub struct UpstreamProxy {
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional per-request timeout
    timeout: Option<Duration>,
}

impl UpstreamProxy {
    /// Creates a proxy with no timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `client` for all requests.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Sets a timeout for every forwarded request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the configured timeout, if any.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Forwards `request` to `endpoint`'s upstream.
    ///
    /// # Errors
    ///
    /// - [`TapError::UpstreamUnreachable`] on connection failure or timeout.
    /// - [`TapError::UpstreamMalformed`] if a successful response does not
    ///   match the endpoint's response format.
    #[cfg_attr(
        feature = "telemetry",
        instrument(
            name = "rtap.proxy.forward",
            skip_all,
            fields(endpoint = %endpoint.path, method = %request.method),
            err
        )
    )]
    pub async fn forward(
        &self,
        endpoint: &EndpointDefinition,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse, TapError> {
        self.send(endpoint, request).await.map_err(|err| {
            #[cfg(feature = "telemetry")]
            tracing::warn!(error = %err, "upstream request failed");
            TapError::from(err)
        })
    }

    async fn send(
        &self,
        endpoint: &EndpointDefinition,
        request: ProxyRequest,
    ) -> Result<UpstreamResponse, ProxyError> {
        const CONTEXT: &str = "forward";

        let mut url = endpoint
            .upstream_url()
            .map_err(|source| ProxyError::UrlParse {
                context: "Failed to construct upstream URL",
                source,
            })?;
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            let merged = match url.query().filter(|q| !q.is_empty()) {
                Some(existing) => format!("{existing}&{query}"),
                None => query.to_owned(),
            };
            url.set_query(Some(&merged));
        }

        let headers = outbound_headers(&request.headers, request.authorization.as_ref());
        let mut req = self
            .client
            .request(request.method, url)
            .headers(headers)
            .body(request.body);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req.send().await.map_err(|source| ProxyError::Http {
            context: CONTEXT,
            source,
        })?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let raw = response
            .bytes()
            .await
            .map_err(|source| ProxyError::ResponseBodyRead {
                context: CONTEXT,
                source,
            })?;

        let body = if raw.is_empty() {
            UpstreamBody::Empty
        } else if status.is_success() {
            decode(endpoint.response_format, raw)?
        } else {
            UpstreamBody::Binary(raw)
        };

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Filters inbound headers through the allow-list and adds tier metadata.
fn outbound_headers(inbound: &HeaderMap, authorization: Option<&AuthorizedRequest>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if is_forwarded(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }

    if let Some(auth) = authorization {
        let features = auth
            .tier
            .features
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let tier_headers = [
            (ACCESS_TIER_HEADER, auth.tier.name.as_str()),
            (ACCESS_PRIORITY_HEADER, auth.tier.priority.as_str()),
            (ACCESS_FEATURES_HEADER, features.as_str()),
        ];
        for (name, value) in tier_headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
    }
    headers
}

fn decode(format: ResponseFormat, raw: Bytes) -> Result<UpstreamBody, ProxyError> {
    const CONTEXT: &str = "decode upstream body";
    match format {
        ResponseFormat::Json => serde_json::from_slice(&raw)
            .map(UpstreamBody::Json)
            .map_err(|e| ProxyError::MalformedBody {
                context: CONTEXT,
                reason: format!("expected JSON: {e}"),
            }),
        ResponseFormat::Text => String::from_utf8(raw.to_vec())
            .map(UpstreamBody::Text)
            .map_err(|e| ProxyError::MalformedBody {
                context: CONTEXT,
                reason: format!("expected UTF-8 text: {e}"),
            }),
        ResponseFormat::Binary => Ok(UpstreamBody::Binary(raw)),
    }
}
