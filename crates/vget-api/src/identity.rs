//! Caller identity resolution.
//!
//! Precedence: a Bearer API key resolved through the account directory, then
//! an anonymous session id, then the client IP. An unknown API key is a hard
//! 401 rather than a silent downgrade to anonymous. The resolved key is also
//! what the rate limiter and job ownership checks see, so the prefixes keep
//! the three namespaces disjoint.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request};

use vget_jobs::Caller;
use vget_models::Tier;

use crate::error::ApiError;
use crate::state::AppState;

/// Looks up API keys. The production directory is loaded from configuration;
/// a deployment with real account storage plugs in its own.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Resolve an API key to its tier, or `None` for an unknown key.
    async fn resolve(&self, api_key: &str) -> Option<Tier>;
}

/// Directory backed by a fixed key-to-tier table.
pub struct StaticDirectory {
    keys: HashMap<String, Tier>,
}

impl StaticDirectory {
    pub fn new(keys: HashMap<String, Tier>) -> Self {
        Self { keys }
    }

    /// Parse `VGET_API_KEYS`, a comma-separated list of `key:tier` pairs.
    pub fn from_env() -> Self {
        let keys = std::env::var("VGET_API_KEYS")
            .map(|raw| {
                raw.split(',')
                    .filter_map(|pair| {
                        let (key, tier) = pair.trim().split_once(':')?;
                        if key.is_empty() {
                            return None;
                        }
                        Some((key.to_string(), Tier::from_str(tier)))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self { keys }
    }
}

#[async_trait]
impl AccountDirectory for StaticDirectory {
    async fn resolve(&self, api_key: &str) -> Option<Tier> {
        self.keys.get(api_key).copied()
    }
}

/// The authenticated (or anonymous) caller, as an extractor.
#[derive(Debug, Clone)]
pub struct Identity(pub Caller);

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(&parts.headers) {
            let tier = state
                .accounts
                .resolve(token)
                .await
                .ok_or_else(|| ApiError::unauthorized("Unknown API key"))?;
            return Ok(Identity(Caller::new(format!("key:{token}"), tier)));
        }

        if let Some(session) = parts
            .headers
            .get("X-Session-Id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.trim().is_empty())
        {
            return Ok(Identity(Caller::new(
                format!("session:{}", session.trim()),
                Tier::Anonymous,
            )));
        }

        let ip = parts
            .headers
            .get("X-Forwarded-For")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<std::net::SocketAddr>>()
                    .map(|ci| ci.0.ip())
            });

        match ip {
            Some(ip) => Ok(Identity(Caller::new(format!("ip:{ip}"), Tier::Anonymous))),
            None => Err(ApiError::bad_request(
                "Could not determine caller identity",
            )),
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Client IP for the generic rate-limit middleware, where full identity
/// resolution has not happened yet. Proxy headers win over the socket
/// address; `X-Forwarded-For` keeps only the first (client-most) hop.
pub fn client_ip(request: &Request<Body>) -> Option<IpAddr> {
    let header_ip = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse().ok())
    };

    header_ip("X-Forwarded-For")
        .or_else(|| header_ip("X-Real-IP"))
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<std::net::SocketAddr>>()
                .map(|ci| ci.0.ip())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_directory_lookup() {
        let mut keys = HashMap::new();
        keys.insert("k-free".to_string(), Tier::Free);
        keys.insert("k-pro".to_string(), Tier::Pro);
        let dir = StaticDirectory::new(keys);

        assert_eq!(dir.resolve("k-free").await, Some(Tier::Free));
        assert_eq!(dir.resolve("k-pro").await, Some(Tier::Pro));
        assert_eq!(dir.resolve("nope").await, None);
    }

    #[test]
    fn test_client_ip_precedence() {
        let request = Request::builder()
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "203.0.113.7".parse::<IpAddr>().ok());

        let request = Request::builder()
            .header("X-Real-IP", "198.51.100.2")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request), "198.51.100.2".parse::<IpAddr>().ok());

        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_ip(&request), None);
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", "Bearer ".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
