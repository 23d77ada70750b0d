//! Client configuration.
//!
//! The base URL is where relative resource URIs are resolved; it always ends
//! in `/` so that `testcases/3` joins under it rather than replacing its last
//! segment. The namespace is the prefix the endpoint puts on every JSON key.

use std::time::Duration;

use url::Url;

use crate::cache::DEFAULT_CACHE_TTL;
use crate::error::ConfigError;

/// Prefix the endpoint wraps around field names, e.g. `ns1.name`.
pub const DEFAULT_NAMESPACE: &str = "ns1.";

/// Media type requested from and expected back from the endpoint.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Media type of mutation bodies.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Longest cache TTL accepted from the environment.
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub const ENV_API_URL: &str = "TCM_API_URL";
pub const ENV_CACHE_TTL: &str = "TCM_CACHE_TTL_SECS";
pub const ENV_NAMESPACE: &str = "TCM_NAMESPACE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    base_url: Url,
    namespace: String,
    cache_ttl: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let mut url = Url::parse(base_url).map_err(|source| ConfigError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        if url.cannot_be_a_base() {
            return Err(ConfigError::NotABase(base_url.to_string()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(Self {
            base_url: url,
            namespace: DEFAULT_NAMESPACE.to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
        })
    }

    /// Reads `TCM_API_URL`, and optionally `TCM_CACHE_TTL_SECS` and
    /// `TCM_NAMESPACE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup(ENV_API_URL).ok_or(ConfigError::MissingVar(ENV_API_URL))?;
        let mut config = Self::new(&base_url)?;
        if let Some(raw) = lookup(ENV_CACHE_TTL) {
            let ttl = raw
                .trim()
                .parse()
                .map(Duration::from_secs)
                .ok()
                .filter(|ttl| *ttl <= MAX_CACHE_TTL)
                .ok_or_else(|| ConfigError::InvalidTtl(raw.clone()))?;
            config.cache_ttl = ttl;
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.namespace = namespace;
        }
        Ok(config)
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn cache_ttl(&self) -> Duration {
        self.cache_ttl
    }
}
