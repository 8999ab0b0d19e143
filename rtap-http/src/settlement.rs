//! A [`SettlementVerifier`] backed by a _remote_ x402 validation service.
//!
//! [`SettlementClient`] posts the payment proof to `{base}/validate` and maps
//! the answer to a [`SettlementStatus`]:
//!
//! - `200 {"valid": true}` → [`SettlementStatus::Verified`]
//! - `200 {"valid": false}` → [`SettlementStatus::Unverified`]
//! - anything else (transport error, other status, undecodable body) →
//!   [`SettlementStatus::Unknown`]
//!
//! The client never settles or broadcasts; it only asks.

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::{HeaderMap, HeaderValue, StatusCode};
use reqwest::Client;
use rtap::proof::PaymentProof;
use rtap::settlement::{SettlementStatus, SettlementVerifier};
use rtap::tier::TierPolicy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[cfg(feature = "telemetry")]
use tracing::instrument;

/// Body of `POST /validate`.
#[derive(Debug, Clone, Serialize)]
pub struct ValidateRequest<'a> {
    /// The proof under test.
    pub payment_proof: &'a PaymentProof,
    /// Minimum payment of the requested tier.
    pub required_amount: Decimal,
    /// Requested tier name.
    pub tier: &'a str,
    /// Contract of the token the payment must be made in, if configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_contract: Option<&'a str>,
}

/// Answer of `POST /validate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidateResponse {
    /// Whether the ledger confirms the payment.
    pub valid: bool,
    /// Optional explanation from the service.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Errors that can occur while talking to the validation service.
#[derive(Debug, thiserror::Error)]
pub enum SettlementClientError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// A configured header value is not valid.
    #[error("Invalid header value: {context}")]
    InvalidHeader {
        /// Human-readable context.
        context: &'static str,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
}

/// A client for a remote payment validation service.
#[derive(Clone, Debug)]
pub struct SettlementClient {
    /// Base URL of the service (e.g. `https://x402.example/`)
    base_url: Url,
    /// Full URL to `POST /validate` requests
    validate_url: Url,
    /// Shared Reqwest HTTP client
    client: Client,
    /// Optional custom headers sent with each request
    headers: HeaderMap,
    /// Optional request timeout
    timeout: Option<Duration>,
    /// Optional token contract sent with each request
    token_contract: Option<String>,
}

impl SettlementClient {
    /// Returns the base URL used by this client.
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Returns the computed `./validate` URL relative to [`SettlementClient::base_url`].
    pub const fn validate_url(&self) -> &Url {
        &self.validate_url
    }

    /// Returns the configured timeout, if any.
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Constructs a new [`SettlementClient`] from a base URL.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementClientError`] if URL construction fails.
    pub fn try_new(base_url: Url) -> Result<Self, SettlementClientError> {
        let validate_url =
            base_url
                .join("./validate")
                .map_err(|e| SettlementClientError::UrlParse {
                    context: "Failed to construct ./validate URL",
                    source: e,
                })?;
        Ok(Self {
            base_url,
            validate_url,
            client: Client::new(),
            headers: HeaderMap::new(),
            timeout: None,
            token_contract: None,
        })
    }

    /// Attaches custom headers to all future requests.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sends `Authorization: Bearer <key>` with every request.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementClientError::InvalidHeader`] if the key contains
    /// characters not allowed in a header.
    pub fn with_bearer_token(mut self, key: &str) -> Result<Self, SettlementClientError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
            SettlementClientError::InvalidHeader {
                context: "Authorization",
            }
        })?;
        value.set_sensitive(true);
        self.headers.insert(AUTHORIZATION, value);
        Ok(self)
    }

    /// Sets a timeout for all future requests.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Asks the service to check payments against this token contract.
    #[must_use]
    pub fn with_token_contract(mut self, contract: impl Into<String>) -> Self {
        self.token_contract = Some(contract.into());
        self
    }

    /// Sends a `POST /validate` request.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementClientError`] if the HTTP request fails or the
    /// answer cannot be decoded.
    #[cfg_attr(
        feature = "telemetry",
        instrument(name = "rtap.settlement_client.validate", skip_all, err)
    )]
    pub async fn validate(
        &self,
        proof: &PaymentProof,
        tier: &TierPolicy,
    ) -> Result<ValidateResponse, SettlementClientError> {
        const CONTEXT: &str = "POST /validate";

        let payload = ValidateRequest {
            payment_proof: proof,
            required_amount: tier.min_payment,
            tier: &tier.name,
            token_contract: self.token_contract.as_deref(),
        };
        let mut req = self
            .client
            .post(self.validate_url.clone())
            .headers(self.headers.clone())
            .json(&payload);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| SettlementClientError::Http {
                context: CONTEXT,
                source: e,
            })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<ValidateResponse>()
                .await
                .map_err(|e| SettlementClientError::JsonDeserialization {
                    context: CONTEXT,
                    source: e,
                })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| SettlementClientError::ResponseBodyRead {
                    context: CONTEXT,
                    source: e,
                })?;
            Err(SettlementClientError::HttpStatus {
                context: CONTEXT,
                status,
                body,
            })
        }
    }
}

#[async_trait]
impl SettlementVerifier for SettlementClient {
    #[cfg_attr(not(feature = "telemetry"), allow(unused_variables))]
    async fn verify(&self, proof: &PaymentProof, tier: &TierPolicy) -> SettlementStatus {
        match self.validate(proof, tier).await {
            Ok(ValidateResponse { valid: true, .. }) => SettlementStatus::Verified,
            Ok(ValidateResponse { valid: false, reason }) => {
                #[cfg(feature = "telemetry")]
                tracing::info!(reason = ?reason, "settlement service rejected payment");
                SettlementStatus::Unverified
            }
            Err(err) => {
                #[cfg(feature = "telemetry")]
                tracing::error!(error = %err, "payment validation error");
                SettlementStatus::Unknown
            }
        }
    }
}

/// Converts a string URL into a `SettlementClient`, parsing the URL and calling `try_new`.
impl TryFrom<&str> for SettlementClient {
    type Error = SettlementClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalize: strip trailing slashes and add a single trailing slash
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| SettlementClientError::UrlParse {
            context: "Failed to parse base url",
            source: e,
        })?;
        Self::try_new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtap::tier::TierPolicyTable;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn proof() -> PaymentProof {
        PaymentProof::new(Decimal::new(5, 2), "sender", "sig")
    }

    fn enhanced() -> TierPolicy {
        TierPolicyTable::default().get("enhanced").unwrap().clone()
    }

    #[tokio::test]
    async fn test_valid_answer_is_verified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/x402/validate"))
            .and(header("authorization", "Bearer wallet-key"))
            .and(body_partial_json(json!({
                "tier": "enhanced",
                "required_amount": "0.05",
                "token_contract": "mint",
                "payment_proof": {"sender_address": "sender", "tx_signature": "sig"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"valid": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = SettlementClient::try_from(format!("{}/x402", server.uri()).as_str())
            .unwrap()
            .with_bearer_token("wallet-key")
            .unwrap()
            .with_token_contract("mint");
        assert_eq!(
            client.verify(&proof(), &enhanced()).await,
            SettlementStatus::Verified
        );
    }

    #[tokio::test]
    async fn test_invalid_answer_is_unverified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"valid": false, "reason": "unknown tx"})),
            )
            .mount(&server)
            .await;

        let client = SettlementClient::try_from(server.uri().as_str()).unwrap();
        let answer = client.validate(&proof(), &enhanced()).await.unwrap();
        assert_eq!(answer.reason.as_deref(), Some("unknown tx"));
        assert_eq!(
            client.verify(&proof(), &enhanced()).await,
            SettlementStatus::Unverified
        );
    }

    #[tokio::test]
    async fn test_failures_are_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/validate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = SettlementClient::try_from(server.uri().as_str()).unwrap();
        let err = client.validate(&proof(), &enhanced()).await.unwrap_err();
        assert!(matches!(
            err,
            SettlementClientError::HttpStatus { status, .. } if status == StatusCode::INTERNAL_SERVER_ERROR
        ));
        assert_eq!(
            client.verify(&proof(), &enhanced()).await,
            SettlementStatus::Unknown
        );

        let unreachable = SettlementClient::try_from("http://127.0.0.1:1").unwrap();
        assert_eq!(
            unreachable.verify(&proof(), &enhanced()).await,
            SettlementStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_garbage_body_is_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = SettlementClient::try_from(server.uri().as_str()).unwrap();
        assert_eq!(
            client.verify(&proof(), &enhanced()).await,
            SettlementStatus::Unknown
        );
    }
}
