//! Static endpoint table and request routing.
//!
//! The [`EndpointRegistry`] maps inbound paths to [`EndpointDefinition`]s and
//! checks that a caller's tier is good enough for the endpoint. It is built
//! once at startup and only read afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use url::Url;

use crate::consumption::AuthorizedRequest;
use crate::error::{RegistryError, TapError};
use crate::tier::{TierPolicy, TierPolicyTable};

/// How an upstream's response body is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// JSON document.
    #[default]
    Json,
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Binary,
}

/// An endpoint exposed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDefinition {
    /// Public path, starting with `/`.
    pub path: String,
    /// Display name of the agent or service behind the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Accepted HTTP methods, matched ignoring case.
    pub allowed_methods: BTreeSet<String>,
    /// Base URL of the upstream service.
    pub upstream_base_url: Url,
    /// Path appended to the base URL.
    #[serde(default)]
    pub upstream_path: String,
    /// Lowest tier allowed to call the endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_tier: Option<String>,
    /// Expected response body format.
    #[serde(default)]
    pub response_format: ResponseFormat,
}

impl EndpointDefinition {
    /// Creates an open endpoint returning JSON.
    pub fn new<P, M, S>(path: P, methods: M, upstream_base_url: Url) -> Self
    where
        P: Into<String>,
        M: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            path: path.into(),
            name: None,
            allowed_methods: methods
                .into_iter()
                .map(|m| m.as_ref().to_ascii_uppercase())
                .collect(),
            upstream_base_url,
            upstream_path: String::new(),
            required_tier: None,
            response_format: ResponseFormat::Json,
        }
    }

    /// Sets the agent name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the upstream path.
    #[must_use]
    pub fn with_upstream_path(mut self, path: impl Into<String>) -> Self {
        self.upstream_path = path.into();
        self
    }

    /// Restricts the endpoint to `tier` and above.
    #[must_use]
    pub fn with_required_tier(mut self, tier: impl Into<String>) -> Self {
        self.required_tier = Some(tier.into());
        self
    }

    /// Sets the expected response format.
    #[must_use]
    pub const fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Returns `true` if `method` is accepted, ignoring case.
    #[must_use]
    pub fn allows(&self, method: &str) -> bool {
        self.allowed_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Full upstream URL: base URL joined with the upstream path.
    ///
    /// # Errors
    ///
    /// Returns [`url::ParseError`] if the joined URL is invalid.
    pub fn upstream_url(&self) -> Result<Url, url::ParseError> {
        let base = self.upstream_base_url.as_str().trim_end_matches('/');
        let path = self.upstream_path.trim_start_matches('/');
        if path.is_empty() {
            Url::parse(base)
        } else {
            Url::parse(&format!("{base}/{path}"))
        }
    }
}

/// Immutable routing table.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    endpoints: Vec<EndpointDefinition>,
    by_path: HashMap<String, usize>,
    table: Arc<TierPolicyTable>,
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

impl EndpointRegistry {
    /// Builds the registry. Definitions are stored as given; lookups ignore a
    /// trailing `/` on the path and the case of the method.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if a path is invalid or repeated, an
    /// endpoint allows no methods, or a required tier is not in `table`.
    pub fn new(
        definitions: Vec<EndpointDefinition>,
        table: Arc<TierPolicyTable>,
    ) -> Result<Self, RegistryError> {
        let mut by_path = HashMap::with_capacity(definitions.len());

        for (idx, def) in definitions.iter().enumerate() {
            if !def.path.starts_with('/') {
                return Err(RegistryError::InvalidPath(def.path.clone()));
            }
            if def.allowed_methods.is_empty() {
                return Err(RegistryError::NoMethods(def.path.clone()));
            }
            if let Some(tier) = &def.required_tier
                && !table.contains(tier)
            {
                return Err(RegistryError::UnknownTier {
                    path: def.path.clone(),
                    tier: tier.clone(),
                });
            }
            let key = normalize(&def.path);
            if by_path.insert(key.to_owned(), idx).is_some() {
                return Err(RegistryError::DuplicatePath(key.to_owned()));
            }
        }

        Ok(Self {
            endpoints: definitions,
            by_path,
            table,
        })
    }

    /// All endpoints, in registration order.
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointDefinition] {
        &self.endpoints
    }

    /// Finds the endpoint for `path` accepting `method`.
    ///
    /// # Errors
    ///
    /// - [`TapError::RouteNotFound`] if no endpoint has this path.
    /// - [`TapError::MethodNotAllowed`] if it does not accept `method`.
    pub fn resolve(&self, path: &str, method: &str) -> Result<&EndpointDefinition, TapError> {
        let endpoint = self
            .by_path
            .get(normalize(path))
            .map(|&idx| &self.endpoints[idx])
            .ok_or_else(|| TapError::RouteNotFound(path.to_owned()))?;
        if !endpoint.allows(method) {
            return Err(TapError::MethodNotAllowed {
                path: endpoint.path.clone(),
                method: method.to_ascii_uppercase(),
            });
        }
        Ok(endpoint)
    }

    /// Checks that `request` carries a tier good enough for `endpoint`.
    ///
    /// Open endpoints accept anyone, including callers without a request.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::InsufficientTier`] if the endpoint requires a tier
    /// and `request` is absent or ranks lower.
    pub fn authorize(
        &self,
        endpoint: &EndpointDefinition,
        request: Option<&AuthorizedRequest>,
    ) -> Result<(), TapError> {
        match (endpoint.required_tier.as_deref(), request) {
            (None, _) => Ok(()),
            (Some(_), Some(req)) => self.authorize_tier(endpoint, &req.tier),
            (Some(required), None) => Err(TapError::InsufficientTier {
                required: required.to_owned(),
                actual: "none".to_owned(),
            }),
        }
    }

    /// Checks that `tier` ranks at least as high as `endpoint` requires.
    ///
    /// # Errors
    ///
    /// Returns [`TapError::InsufficientTier`] if it ranks lower.
    pub fn authorize_tier(
        &self,
        endpoint: &EndpointDefinition,
        tier: &TierPolicy,
    ) -> Result<(), TapError> {
        let Some(required) = endpoint.required_tier.as_deref() else {
            return Ok(());
        };
        // Registry construction rejects unknown tiers.
        let required_tier = self
            .table
            .get(required)
            .ok_or_else(|| TapError::UnknownTier(required.to_owned()))?;
        if tier.satisfies(required_tier) {
            Ok(())
        } else {
            Err(TapError::InsufficientTier {
                required: required.to_owned(),
                actual: tier.name.clone(),
            })
        }
    }

    /// [`Self::resolve`] followed by [`Self::authorize`].
    ///
    /// # Errors
    ///
    /// Any error of the two steps.
    pub fn resolve_authorized(
        &self,
        path: &str,
        method: &str,
        request: Option<&AuthorizedRequest>,
    ) -> Result<&EndpointDefinition, TapError> {
        let endpoint = self.resolve(path, method)?;
        self.authorize(endpoint, request)?;
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumption::RequestContext;
    use crate::timestamp::UnixTimestamp;
    use crate::token::TokenId;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn definitions() -> Vec<EndpointDefinition> {
        vec![
            EndpointDefinition::new("/smolting/chat", ["post"], url("http://agents.local"))
                .with_name("smolting")
                .with_upstream_path("/v1/chat"),
            EndpointDefinition::new("/alpha/", ["GET", "POST"], url("http://alpha.local/api/"))
                .with_required_tier("premium")
                .with_response_format(ResponseFormat::Text),
            EndpointDefinition::new("/bundle", ["GET"], url("http://bundle.local"))
                .with_required_tier("enhanced"),
        ]
    }

    fn registry() -> EndpointRegistry {
        EndpointRegistry::new(definitions(), Arc::new(TierPolicyTable::default())).unwrap()
    }

    fn authorized(tier: &str) -> AuthorizedRequest {
        let table = TierPolicyTable::default();
        AuthorizedRequest {
            token_id: TokenId::from("t"),
            tier: table.get(tier).unwrap().clone(),
            payer: "p".into(),
            consumed_at: UnixTimestamp::from_millis(0),
            expires_at: UnixTimestamp::from_millis(1),
            context: RequestContext::default(),
        }
    }

    #[test]
    fn test_every_endpoint_resolves_to_itself() {
        let defs = definitions();
        let registry = EndpointRegistry::new(defs.clone(), Arc::new(TierPolicyTable::default())).unwrap();
        for def in &defs {
            for method in &def.allowed_methods {
                assert_eq!(registry.resolve(&def.path, method).unwrap(), def);
            }
        }
    }

    #[test]
    fn test_definitions_are_kept_verbatim() {
        let mut def = EndpointDefinition::new("/alpha/", ["GET"], url("http://alpha.local"));
        def.allowed_methods = ["get".to_owned()].into();
        let registry =
            EndpointRegistry::new(vec![def.clone()], Arc::new(TierPolicyTable::default())).unwrap();
        assert_eq!(registry.resolve("/alpha/", "GET").unwrap(), &def);
        assert_eq!(registry.resolve("/alpha", "get").unwrap(), &def);
        assert_eq!(registry.endpoints(), [def]);
    }

    #[test]
    fn test_trailing_slash_and_method_case_ignored() {
        let registry = registry();
        assert_eq!(registry.resolve("/alpha", "get").unwrap().path, "/alpha/");
        assert_eq!(registry.resolve("/smolting/chat/", "POST").unwrap().path, "/smolting/chat");
    }

    #[test]
    fn test_route_and_method_errors() {
        let registry = registry();
        assert_eq!(
            registry.resolve("/missing", "GET").unwrap_err(),
            TapError::RouteNotFound("/missing".into())
        );
        assert_eq!(
            registry.resolve("/smolting/chat", "delete").unwrap_err(),
            TapError::MethodNotAllowed {
                path: "/smolting/chat".into(),
                method: "DELETE".into(),
            }
        );
    }

    #[test]
    fn test_tier_ranking() {
        let registry = registry();
        let bundle = registry.resolve("/bundle", "GET").unwrap();
        assert!(registry.authorize(bundle, Some(&authorized("enhanced"))).is_ok());
        assert!(registry.authorize(bundle, Some(&authorized("premium"))).is_ok());
        assert_eq!(
            registry.authorize(bundle, Some(&authorized("basic"))).unwrap_err(),
            TapError::InsufficientTier {
                required: "enhanced".into(),
                actual: "basic".into(),
            }
        );
        assert!(matches!(
            registry.resolve_authorized("/bundle", "GET", None),
            Err(TapError::InsufficientTier { .. })
        ));

        let open = registry.resolve("/smolting/chat", "POST").unwrap();
        assert!(registry.authorize(open, None).is_ok());
    }

    #[test]
    fn test_upstream_url_join() {
        let registry = registry();
        let chat = registry.resolve("/smolting/chat", "POST").unwrap();
        assert_eq!(chat.upstream_url().unwrap().as_str(), "http://agents.local/v1/chat");
        let alpha = registry.resolve("/alpha", "GET").unwrap();
        assert_eq!(alpha.upstream_url().unwrap().as_str(), "http://alpha.local/api");
    }

    #[test]
    fn test_invalid_definitions() {
        let table = Arc::new(TierPolicyTable::default());
        let base = url("http://up.local");

        let dup = vec![
            EndpointDefinition::new("/a", ["GET"], base.clone()),
            EndpointDefinition::new("/a/", ["POST"], base.clone()),
        ];
        assert_eq!(
            EndpointRegistry::new(dup, table.clone()).unwrap_err(),
            RegistryError::DuplicatePath("/a".into())
        );

        let unknown = vec![EndpointDefinition::new("/a", ["GET"], base.clone()).with_required_tier("gold")];
        assert!(matches!(
            EndpointRegistry::new(unknown, table.clone()).unwrap_err(),
            RegistryError::UnknownTier { .. }
        ));

        let relative = vec![EndpointDefinition::new("a", ["GET"], base.clone())];
        assert!(matches!(
            EndpointRegistry::new(relative, table.clone()).unwrap_err(),
            RegistryError::InvalidPath(_)
        ));

        let no_methods = vec![EndpointDefinition::new("/a", Vec::<String>::new(), base)];
        assert!(matches!(
            EndpointRegistry::new(no_methods, table).unwrap_err(),
            RegistryError::NoMethods(_)
        ));
    }
}
