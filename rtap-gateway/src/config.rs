//! Gateway server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8402
//!
//! [store]
//! capacity = 100000
//! sweep_interval_secs = 60
//!
//! [settlement]
//! url = "https://x402.example/api"
//! api_key = "$X402_WALLET_KEY"
//! reject_unknown = false
//!
//! [tiers.basic]
//! min_payment = "0.01"
//! lifespan_secs = 3600
//! priority = "low"
//! features = ["standard_processing", "basic_data"]
//!
//! [[endpoints]]
//! path = "/smolting/chat"
//! name = "smolting"
//! allowed_methods = ["POST"]
//! upstream_base_url = "http://127.0.0.1:9000"
//! upstream_path = "/chat"
//! required_tier = "basic"
//! ```
//!
//! When `[tiers]` is absent the stock basic / enhanced / premium table is
//! used.
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override server bind address
//! - `PORT` - Override server port
//! - Secrets referenced by `$VAR` in the config file

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rtap::error::{PolicyError, RegistryError};
use rtap::registry::{EndpointDefinition, EndpointRegistry};
use rtap::store::DEFAULT_CAPACITY;
use rtap::tier::{Priority, TierPolicy, TierPolicyTable};
use rtap_http::proxy::UpstreamProxy;
use rtap_http::settlement::{SettlementClient, SettlementClientError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8402`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Token store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Remote settlement service. Without it payments are accepted on policy
    /// validation alone.
    #[serde(default)]
    pub settlement: Option<SettlementConfig>,

    /// Upstream proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Tier policies keyed by tier name.
    #[serde(default)]
    pub tiers: BTreeMap<String, TierConfig>,

    /// Endpoints fronted by the gateway.
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}

/// Token store settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Maximum number of live tokens.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Seconds between background sweeps of expired tokens.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

/// Remote settlement service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Base URL; requests go to `{url}/validate`.
    pub url: String,

    /// Bearer token sent with each request.
    /// Supports `$VAR` / `${VAR}` for environment variable expansion.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    #[serde(default = "default_settlement_timeout")]
    pub timeout_secs: u64,

    /// Refuse to issue when the service cannot give an answer.
    #[serde(default)]
    pub reject_unknown: bool,

    /// Contract of the token payments must be made in.
    #[serde(default)]
    pub token_contract: Option<String>,
}

/// Upstream proxy settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Per-request timeout in seconds.
    #[serde(default = "default_proxy_timeout")]
    pub timeout_secs: u64,
}

/// One tier of the policy table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Minimum accepted payment.
    pub min_payment: Decimal,
    /// Token lifespan in seconds.
    pub lifespan_secs: u64,
    /// Priority granted.
    pub priority: Priority,
    /// Features unlocked.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// The tier table violates its invariants.
    #[error("invalid tier table: {0}")]
    Policy(#[from] PolicyError),

    /// An endpoint definition is invalid.
    #[error("invalid endpoint: {0}")]
    Registry(#[from] RegistryError),

    /// The settlement client could not be built.
    #[error("invalid settlement service: {0}")]
    Settlement(#[from] SettlementClientError),
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

const fn default_port() -> u16 {
    8402
}

const fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

const fn default_sweep_interval() -> u64 {
    60
}

const fn default_settlement_timeout() -> u64 {
    10
}

const fn default_proxy_timeout() -> u64 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_proxy_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from a specific file path.
    ///
    /// A missing file yields the defaults. After loading, `$VAR` / `${VAR}`
    /// references are expanded from the process environment, and `HOST` /
    /// `PORT` override the file values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_owned(),
                source,
            })?
        } else {
            // If no config file exists, use empty TOML and rely on defaults
            String::new()
        };
        let mut config = Self::parse(&content, |name| std::env::var(name).ok())?;
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Parses TOML after expanding variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on invalid TOML.
    pub fn parse<F>(content: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let expanded = expand_vars(content, lookup);
        Ok(toml::from_str(&expanded)?)
    }

    /// Applies `HOST` / `PORT` overrides. Unparseable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("HOST").and_then(|h| h.parse().ok()) {
            self.host = addr;
        }
        if let Some(port) = lookup("PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }

    /// Builds the tier table, falling back to the stock tiers.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Policy`] if the configured tiers are invalid.
    pub fn tier_table(&self) -> Result<TierPolicyTable, ConfigError> {
        if self.tiers.is_empty() {
            return Ok(TierPolicyTable::default());
        }
        let tiers = self
            .tiers
            .iter()
            .map(|(name, tier)| {
                TierPolicy::new(
                    name.clone(),
                    tier.min_payment,
                    Duration::from_secs(tier.lifespan_secs),
                    tier.priority,
                    tier.features.iter().cloned(),
                )
            })
            .collect();
        Ok(TierPolicyTable::new(tiers)?)
    }

    /// Builds the endpoint registry over `table`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Registry`] if an endpoint is invalid.
    pub fn registry(&self, table: Arc<TierPolicyTable>) -> Result<EndpointRegistry, ConfigError> {
        Ok(EndpointRegistry::new(self.endpoints.clone(), table)?)
    }

    /// Builds the upstream proxy.
    #[must_use]
    pub fn upstream_proxy(&self) -> UpstreamProxy {
        UpstreamProxy::new().with_timeout(Duration::from_secs(self.proxy.timeout_secs))
    }

    /// Builds the settlement client, if one is configured.
    ///
    /// An `api_key` that is empty or still an unresolved `$VAR` is skipped
    /// with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Settlement`] if the URL or key is invalid.
    pub fn settlement_client(&self) -> Result<Option<SettlementClient>, ConfigError> {
        let Some(cfg) = &self.settlement else {
            return Ok(None);
        };
        let mut client = SettlementClient::try_from(cfg.url.as_str())?
            .with_timeout(Duration::from_secs(cfg.timeout_secs));
        match cfg.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() && !key.starts_with('$') => {
                client = client.with_bearer_token(key)?;
            }
            Some(_) => {
                tracing::warn!("Settlement api_key not resolved (missing env var?), sending no credentials");
            }
            None => {}
        }
        if let Some(contract) = &cfg.token_contract {
            client = client.with_token_contract(contract.clone());
        }
        Ok(Some(client))
    }
}

/// Expands `$VAR` and `${VAR}` patterns through `lookup`. Unresolved
/// variables are left as-is.
fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next(); // consume '{'
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Some(val) = lookup(&var_name) {
            result.push_str(&val);
        } else {
            // Leave unresolved variable as-is
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}
