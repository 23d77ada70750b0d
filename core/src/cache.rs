//! Response caching for safe retrievals.
//!
//! # Design
//! [`CachedTransport`] sits in front of any [`Transport`]. Only `GET` requests
//! consult the cache, and only `200 OK` answers are stored, keyed by the exact
//! request URL. `PUT`, `POST` and `DELETE` go straight through and never read
//! or write an entry.
//!
//! The store is a service object ([`ResponseCache`]) shared by `Arc`, so one
//! cache can back every client in a process, and tests can substitute their
//! own. [`MemoryCache`] measures expiry against an injected [`Clock`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, Transport};

/// TTL applied to cached responses unless configured otherwise.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);

/// Storage for cached responses.
pub trait ResponseCache: Send + Sync {
    fn get(&self, key: &str) -> Option<HttpResponse>;
    fn set(&self, key: &str, response: HttpResponse, ttl: Duration);
}

/// Source of "now" for expiry checks.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: HttpResponse,
    expires_at: Instant,
}

/// In-process [`ResponseCache`].
///
/// Entries are replaced whole. Two readers racing on an expired entry may both
/// miss; the cost is one redundant fetch.
pub struct MemoryCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, expired ones included until the next
    /// lookup or store.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseCache for MemoryCache {
    fn get(&self, key: &str) -> Option<HttpResponse> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.response.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).is_some_and(|entry| entry.expires_at <= now) {
            entries.remove(key);
        }
        None
    }

    /// Stores the response and drops every entry that has already expired.
    /// A TTL too long to represent as an instant is not stored.
    fn set(&self, key: &str, response: HttpResponse, ttl: Duration) {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.expires_at > now);
        match now.checked_add(ttl) {
            Some(expires_at) => {
                entries.insert(key.to_string(), CacheEntry { response, expires_at });
            }
            None => debug!(key, ttl_secs = ttl.as_secs(), "TTL out of range, not caching"),
        }
    }
}

/// A [`Transport`] that answers repeated `GET`s from a [`ResponseCache`].
pub struct CachedTransport<T> {
    inner: T,
    cache: Arc<dyn ResponseCache>,
    ttl: Duration,
}

impl<T: Transport> CachedTransport<T> {
    pub fn new(inner: T, cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            inner,
            cache,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    pub fn request(
        &self,
        method: HttpMethod,
        uri: &str,
        headers: Vec<(String, String)>,
        body: Option<String>,
    ) -> Result<HttpResponse, TransportError> {
        self.send(&HttpRequest {
            method,
            url: uri.to_string(),
            headers,
            body,
        })
    }
}

impl<T: Transport> Transport for CachedTransport<T> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if !request.method.is_cache_eligible() {
            return self.inner.send(request);
        }

        if let Some(hit) = self.cache.get(&request.url) {
            debug!(url = %request.url, "cache hit");
            return Ok(hit);
        }

        let response = self.inner.send(request)?;
        if response.status == 200 {
            debug!(url = %request.url, ttl_secs = self.ttl.as_secs(), "caching response");
            self.cache.set(&request.url, response.clone(), self.ttl);
        } else {
            debug!(url = %request.url, status = response.status, "not caching response");
        }
        Ok(response)
    }
}
