//! Upstream credentials.
//!
//! Vendor URL-signing schemes plug in behind [`UpstreamAuth`]; the relay
//! ships with plain bearer tokens only.

use std::fmt;
use std::sync::Arc;

use url::Url;

use crate::upstream::types::{UpstreamError, UpstreamResult};

/// Prefix marking an API key that is read from the environment.
const ENV_PREFIX: &str = "env:";

/// Applies credentials to an outbound connection.
pub trait UpstreamAuth: Send + Sync + fmt::Debug {
    /// URL to connect to. Signing schemes rewrite the query string here.
    fn connect_url(&self, base: &Url) -> UpstreamResult<Url> {
        Ok(base.clone())
    }

    /// Value for the `Authorization` header, if any.
    fn authorization(&self) -> Option<String> {
        None
    }
}

/// No credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl UpstreamAuth for NoAuth {}

/// `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct BearerToken {
    token: String,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for BearerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerToken(***)")
    }
}

impl UpstreamAuth for BearerToken {
    fn authorization(&self) -> Option<String> {
        Some(format!("Bearer {}", self.token))
    }
}

/// Resolve a configured key, reading `env:NAME` from the environment.
pub fn resolve_secret(raw: &str) -> UpstreamResult<String> {
    match raw.strip_prefix(ENV_PREFIX) {
        Some(var) => std::env::var(var)
            .map_err(|_| UpstreamError::Auth(format!("environment variable {var} is not set"))),
        None => Ok(raw.to_string()),
    }
}

/// Build the auth strategy for an optional configured key.
pub fn from_api_key(api_key: Option<&str>) -> UpstreamResult<Arc<dyn UpstreamAuth>> {
    match api_key {
        Some(raw) if !raw.trim().is_empty() => Ok(Arc::new(BearerToken::new(resolve_secret(raw)?))),
        _ => Ok(Arc::new(NoAuth)),
    }
}
