//! HTTP-specific constants for tiered access.

/// Request header carrying the access token (client → gateway).
pub const ACCESS_TOKEN_HEADER: &str = "X-Access-Token";

/// Tier name of the consumed token (gateway → upstream).
pub const ACCESS_TIER_HEADER: &str = "X-Access-Tier";

/// Priority of the consumed token's tier (gateway → upstream).
pub const ACCESS_PRIORITY_HEADER: &str = "X-Access-Priority";

/// Comma-separated features of the consumed token's tier (gateway → upstream).
pub const ACCESS_FEATURES_HEADER: &str = "X-Access-Features";

/// x402 V2 payment signature header, relayed untouched to upstreams.
pub const PAYMENT_SIGNATURE_HEADER: &str = "PAYMENT-SIGNATURE";

/// x402 V1 payment payload header, relayed untouched to upstreams.
pub const X_PAYMENT_HEADER: &str = "X-PAYMENT";

/// Inbound headers the proxy forwards upstream, lower-case.
///
/// Everything else, including cookies, `authorization`, the access token
/// and hop-by-hop headers, is dropped.
pub const FORWARDED_HEADERS: &[&str] = &[
    "accept",
    "accept-language",
    "cache-control",
    "content-type",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "user-agent",
    "payment-signature",
    "x-payment",
];

/// Returns `true` if the proxy forwards a header with this name.
#[must_use]
pub fn is_forwarded(name: &str) -> bool {
    FORWARDED_HEADERS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        assert!(is_forwarded("Content-Type"));
        assert!(is_forwarded(PAYMENT_SIGNATURE_HEADER));
        assert!(is_forwarded(X_PAYMENT_HEADER));
        assert!(!is_forwarded("cookie"));
        assert!(!is_forwarded("Authorization"));
        assert!(!is_forwarded(ACCESS_TOKEN_HEADER));
        assert!(!is_forwarded("connection"));
    }
}
