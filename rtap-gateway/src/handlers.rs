//! Axum route handlers for the gateway service.
//!
//! Provides REST endpoints to buy access tokens, redeem them, and call
//! fronted upstream endpoints with them.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, RawQuery, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use bytes::Bytes;
use rtap::consumption::{ConsumptionService, RequestContext};
use rtap::error::TapError;
use rtap::issuance::{IssuanceService, IssuedToken};
use rtap::proof::PaymentProof;
use rtap::registry::EndpointRegistry;
use rtap::settlement::SettlementVerifier;
use rtap::store::{StoreStats, TokenStore};
use rtap::tier::{Priority, TierPolicyTable};
use rtap::timestamp::UnixTimestamp;
use rtap::token::TokenId;
use rtap_http::constants::ACCESS_TOKEN_HEADER;
use rtap_http::proxy::{ProxyRequest, UpstreamProxy};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Services shared by all handlers.
#[derive(Debug, Clone)]
pub struct GatewayState {
    /// Token issuance.
    pub issuance: IssuanceService,
    /// Token redemption.
    pub consumption: ConsumptionService,
    /// Fronted endpoints.
    pub registry: Arc<EndpointRegistry>,
    /// Upstream client.
    pub proxy: UpstreamProxy,
    /// Token store, for statistics.
    pub store: Arc<TokenStore>,
}

impl GatewayState {
    /// Wires the services over one shared store and tier table.
    #[must_use]
    pub fn new(
        table: Arc<TierPolicyTable>,
        store: Arc<TokenStore>,
        registry: Arc<EndpointRegistry>,
        proxy: UpstreamProxy,
    ) -> Self {
        Self {
            issuance: IssuanceService::new(Arc::clone(&table), Arc::clone(&store)),
            consumption: ConsumptionService::new(table, Arc::clone(&store)),
            registry,
            proxy,
            store,
        }
    }

    /// Confirms payments with `verifier` before issuing.
    #[must_use]
    pub fn with_verifier(mut self, verifier: Arc<dyn SettlementVerifier>, reject_unknown: bool) -> Self {
        self.issuance = self
            .issuance
            .with_verifier(verifier)
            .reject_unknown_settlement(reject_unknown);
        self
    }
}

/// Shared application state for the gateway service.
pub type SharedState = Arc<GatewayState>;

/// Body of `POST /access`.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessRequest {
    /// Requested tier name.
    pub tier: String,
    /// Raw payment proof, validated field by field.
    #[serde(default)]
    pub payment_proof: serde_json::Value,
}

/// Body of `POST /use`.
#[derive(Debug, Clone, Deserialize)]
pub struct UseRequest {
    /// Token to redeem.
    pub token: TokenId,
    /// Service the token is redeemed for.
    #[serde(default)]
    pub service: Option<String>,
}

/// Answer of `POST /use`.
#[derive(Debug, Clone, Serialize)]
pub struct UseResponse {
    /// Always `true`; failures are reported as errors.
    pub success: bool,
    /// Tier of the redeemed token.
    pub tier: String,
    /// Priority granted by the tier.
    pub priority: Priority,
    /// Features unlocked by the tier.
    pub features: BTreeSet<String>,
    /// Expiry of the token record.
    pub remaining_access: UnixTimestamp,
}

/// `POST /access` - Issues a token for a valid payment proof.
///
/// # Errors
///
/// Returns 400 on a malformed body or proof or an unknown tier, 402 if the
/// payment is insufficient or unverified, 503 if the store is full.
pub async fn post_access(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<IssuedToken>, ApiError> {
    let request: AccessRequest = serde_json::from_slice(&body)?;
    let proof = PaymentProof::from_value(&request.payment_proof)?;
    let issued = state.issuance.issue(&request.tier, &proof).await?;
    Ok(Json(issued))
}

/// `POST /use` - Redeems a token once.
///
/// # Errors
///
/// Returns 401 if the token is unknown or expired, 403 if it was already
/// used.
pub async fn post_use(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<UseResponse>, ApiError> {
    let request: UseRequest = serde_json::from_slice(&body)?;
    let context = RequestContext::new(request.service.unwrap_or_default());
    let authorized = state.consumption.use_token(&request.token, context)?;
    Ok(Json(UseResponse {
        success: true,
        tier: authorized.tier.name,
        priority: authorized.tier.priority,
        features: authorized.tier.features,
        remaining_access: authorized.expires_at,
    }))
}

/// `ANY /gateway/{*path}` - Redeems the `X-Access-Token` header and relays
/// the request to the endpoint registered at `/{path}`.
///
/// Routing is checked before the token is touched, and a token whose tier is
/// too low for the endpoint stays unused. A missing or blank token header is
/// answered like an unknown token.
///
/// # Errors
///
/// Returns 404/405 for unknown routes or methods, 401/403 for token
/// failures, 502 if the upstream fails.
pub async fn any_gateway(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let path = format!("/{path}");
    let endpoint = state.registry.resolve(&path, method.as_str())?;

    let token = headers
        .get(ACCESS_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(TokenId::from)
        .ok_or(TapError::NotFound)?;

    let context = RequestContext::new(endpoint.path.clone())
        .with_metadata("method", method.as_str());
    let authorized = state.consumption.use_token_with(&token, context, |tier| {
        state.registry.authorize_tier(endpoint, tier)
    })?;

    let upstream = state
        .proxy
        .forward(
            endpoint,
            ProxyRequest {
                method,
                query,
                body,
                headers,
                authorization: Some(authorized),
            },
        )
        .await?;

    let content_type = upstream
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok());
    let mut response = (upstream.status, upstream.body.into_bytes()).into_response();
    match content_type {
        Some(ct) => {
            response.headers_mut().insert(CONTENT_TYPE, ct);
        }
        None => {
            response.headers_mut().remove(CONTENT_TYPE);
        }
    }
    Ok(response)
}

/// `GET /stats` - Token store statistics.
pub async fn get_stats(State(state): State<SharedState>) -> Json<StoreStats> {
    Json(state.store.stats())
}

/// `GET /health` - Health check.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Creates an Axum [`Router`] with all gateway endpoints.
///
/// Endpoints:
/// - `POST /access` - buy a token
/// - `POST /use` - redeem a token
/// - `ANY /gateway/{*path}` - redeem a token and call an upstream
/// - `GET /stats` - token store statistics
/// - `GET /health` - health check
pub fn gateway_router(state: SharedState) -> Router {
    Router::new()
        .route("/access", post(post_access))
        .route("/use", post(post_use))
        .route("/gateway/{*path}", any(any_gateway))
        .route("/stats", get(get_stats))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use rtap::registry::EndpointDefinition;
    use rtap::timestamp::ManualClock;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;
    use url::Url;
    use wiremock::matchers::{header, method as http_method, path as http_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct TestApp {
        router: Router,
        clock: ManualClock,
    }

    fn app(endpoints: Vec<EndpointDefinition>) -> TestApp {
        let clock = ManualClock::new(UnixTimestamp::from_millis(1_700_000_000_000));
        let table = Arc::new(TierPolicyTable::default());
        let store = Arc::new(TokenStore::with_clock(100, Arc::new(clock.clone())));
        let registry = Arc::new(EndpointRegistry::new(endpoints, Arc::clone(&table)).unwrap());
        let state = GatewayState::new(table, store, registry, UpstreamProxy::new());
        TestApp {
            router: gateway_router(Arc::new(state)),
            clock,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn access_body(tier: &str, amount: Value) -> Value {
        json!({
            "tier": tier,
            "payment_proof": {
                "amount": amount,
                "sender": "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
                "tx_signature": "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnb"
            }
        })
    }

    async fn buy(router: &Router, tier: &str, amount: Value) -> String {
        let (status, body) = send(router, post_json("/access", &access_body(tier, amount))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token_id"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn test_enhanced_scenario() {
        let app = app(vec![]);

        let (status, body) =
            send(&app.router, post_json("/access", &access_body("enhanced", json!(0.04)))).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(
            body,
            json!({"error": "Payment validation failed. Required: 0.05, provided: 0.04"})
        );

        let (status, issued) =
            send(&app.router, post_json("/access", &access_body("enhanced", json!(0.05)))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(issued["tier"], "enhanced");
        assert_eq!(issued["priority"], "medium");
        assert_eq!(
            issued["features"],
            json!(["bundled_data", "extended_responses", "higher_priority"])
        );
        let token = issued["token_id"].as_str().unwrap();
        assert_eq!(token.len(), 64);

        let use_body = json!({"token": token, "service": "bundled_data"});
        let (status, used) = send(&app.router, post_json("/use", &use_body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(used["success"], true);
        assert_eq!(used["tier"], "enhanced");
        assert_eq!(used["remaining_access"], issued["expires_at"]);

        let (status, body) = send(&app.router, post_json("/use", &use_body)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"error": "Access token expired or already used."}));
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let app = app(vec![]);

        let (status, body) =
            send(&app.router, post_json("/access", &access_body("platinum", json!(1)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Invalid tier: platinum"}));

        let missing_sig = json!({"tier": "basic", "payment_proof": {"amount": 1, "sender": "a"}});
        let (status, body) = send(&app.router, post_json("/access", &missing_sig)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("Malformed payment proof"));

        let request = Request::post("/access").body(Body::from("{not json")).unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().starts_with("invalid request body"));
    }

    #[tokio::test]
    async fn test_unknown_and_expired_tokens() {
        let app = app(vec![]);

        let (status, body) = send(&app.router, post_json("/use", &json!({"token": "nope"}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Access token not found."}));

        let token = buy(&app.router, "basic", json!("0.01")).await;
        app.clock.advance(Duration::from_secs(3600));
        let (status, body) = send(&app.router, post_json("/use", &json!({"token": token}))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Access token not found."}));
    }

    #[tokio::test]
    async fn test_stats_and_health() {
        let app = app(vec![]);
        let token = buy(&app.router, "premium", json!(0.1)).await;
        buy(&app.router, "basic", json!(0.01)).await;
        send(&app.router, post_json("/use", &json!({"token": token}))).await;

        let request = Request::get("/stats").body(Body::empty()).unwrap();
        let (status, stats) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_tokens"], 2);
        assert_eq!(stats["consumed_tokens"], 1);
        assert_eq!(stats["by_tier"]["premium"]["consumed"], 1);
        assert_eq!(stats["by_tier"]["basic"]["active"], 1);

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, health) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "ok");
    }

    #[tokio::test]
    async fn test_gateway_forwards_once() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("POST"))
            .and(http_path("/v1/chat"))
            .and(header("x-access-tier", "enhanced"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reply": "gm"})))
            .expect(1)
            .mount(&upstream)
            .await;

        let endpoint = EndpointDefinition::new(
            "/smolting/chat",
            ["POST"],
            upstream.uri().parse::<Url>().unwrap(),
        )
        .with_upstream_path("/v1/chat")
        .with_required_tier("enhanced");
        let app = app(vec![endpoint]);
        let token = buy(&app.router, "enhanced", json!(0.05)).await;

        let call = |token: &str| {
            Request::post("/gateway/smolting/chat")
                .header(ACCESS_TOKEN_HEADER, token)
                .header("content-type", "application/json")
                .body(Body::from(r#"{"prompt":"gm"}"#))
                .unwrap()
        };

        let (status, body) = send(&app.router, call(token.as_str())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"reply": "gm"}));

        let (status, body) = send(&app.router, call(token.as_str())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"error": "Access token expired or already used."}));
    }

    #[tokio::test]
    async fn test_gateway_rejections_do_not_burn_token() {
        let upstream = MockServer::start().await;
        Mock::given(http_method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .mount(&upstream)
            .await;
        let base = upstream.uri().parse::<Url>().unwrap();
        let app = app(vec![
            EndpointDefinition::new("/alpha", ["GET"], base.clone()).with_required_tier("premium"),
            EndpointDefinition::new("/open", ["GET"], base),
        ]);
        let token = buy(&app.router, "basic", json!(0.01)).await;
        let get = |uri: &str, token: Option<&str>| {
            let mut builder = Request::get(uri);
            if let Some(token) = token {
                builder = builder.header(ACCESS_TOKEN_HEADER, token);
            }
            builder.body(Body::empty()).unwrap()
        };

        let (status, body) = send(&app.router, get("/gateway/alpha", Some(token.as_str()))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(
            body,
            json!({"error": "Tier 'basic' does not grant access; 'premium' or higher is required"})
        );

        let (status, _) = send(&app.router, get("/gateway/missing", Some(token.as_str()))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::delete("/gateway/open")
            .header(ACCESS_TOKEN_HEADER, token.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

        let (status, body) = send(&app.router, get("/gateway/open", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Access token not found."}));

        let (status, body) = send(&app.router, get("/gateway/open", Some("  "))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": "Access token not found."}));

        let (status, body) = send(&app.router, get("/gateway/open", Some(token.as_str()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_gateway_upstream_down_is_bad_gateway() {
        let endpoint = EndpointDefinition::new(
            "/dead",
            ["GET"],
            Url::parse("http://127.0.0.1:1").unwrap(),
        );
        let app = app(vec![endpoint]);
        let token = buy(&app.router, "basic", json!(0.01)).await;

        let request = Request::get("/gateway/dead")
            .header(ACCESS_TOKEN_HEADER, token.as_str())
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().starts_with("Upstream unreachable"));
    }
}
