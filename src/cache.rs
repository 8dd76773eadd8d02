//! Cache-aware outbound transport for mirror requests
//!
//! Wraps the HTTP client used to reach the mirror and memoizes successful
//! fetches. Repeated requests for the same URL are answered from the local
//! store while the entry is fresh, revalidated with the origin when stale
//! validators exist, and refetched otherwise. Responses served from the
//! store carry a synthetic marker header so callers can tell a cache serve
//! from a live one.
//!
//! The store is the only state shared between request workers; it
//! synchronizes internally and no lock is held across an await point.

use crate::error::Result;
use crate::models::RewrittenRequest;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Marker header set on responses answered from the local store
pub const FROM_CACHE_HEADER: &str = "x-from-cache";

/// Response produced by the cached transport
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// True when the body came out of the local store (fresh hit or a
    /// revalidation that returned 304)
    pub from_cache: bool,
}

/// Freshness metadata extracted from response headers
#[derive(Debug, Clone, Default)]
struct Freshness {
    max_age: Option<Duration>,
    no_cache: bool,
    etag: Option<HeaderValue>,
    last_modified: Option<HeaderValue>,
}

impl Freshness {
    fn from_headers(headers: &HeaderMap) -> Self {
        let mut freshness = Freshness {
            etag: headers.get(ETAG).cloned(),
            last_modified: headers.get(LAST_MODIFIED).cloned(),
            ..Freshness::default()
        };
        for value in headers.get_all(CACHE_CONTROL) {
            let Ok(value) = value.to_str() else { continue };
            for directive in value.split(',') {
                let directive = directive.trim();
                if directive.eq_ignore_ascii_case("no-cache") {
                    freshness.no_cache = true;
                } else if let Some(secs) = directive
                    .strip_prefix("max-age=")
                    .and_then(|s| s.parse::<u64>().ok())
                {
                    freshness.max_age = Some(Duration::from_secs(secs));
                }
            }
        }
        freshness
    }

    fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

/// Whether a response may be stored at all
fn storable(headers: &HeaderMap) -> bool {
    for value in headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else { continue };
        if value
            .split(',')
            .any(|d| d.trim().eq_ignore_ascii_case("no-store"))
        {
            return false;
        }
    }
    true
}

/// One memoized mirror response
#[derive(Debug, Clone)]
struct CacheEntry {
    headers: HeaderMap,
    body: Bytes,
    stored_at: SystemTime,
    last_accessed: SystemTime,
    freshness: Freshness,
}

impl CacheEntry {
    fn is_fresh(&self, now: SystemTime) -> bool {
        if self.freshness.no_cache {
            return false;
        }
        match self.freshness.max_age {
            Some(max_age) => now < self.stored_at + max_age,
            None => false,
        }
    }
}

/// Memoizing transport in front of the mirror registry
pub struct CachedTransport {
    client: Client,
    enabled: bool,
    max_entries: usize,
    store: RwLock<HashMap<String, CacheEntry>>,
}

impl CachedTransport {
    pub fn new(client: Client, enabled: bool, max_entries: usize) -> Self {
        CachedTransport {
            client,
            enabled,
            max_entries,
            store: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a rewritten request, preferring the local store
    ///
    /// Returns a transport error only when the network fetch itself fails;
    /// non-200 statuses come back as ordinary responses for the caller to
    /// judge. Only GET responses with status 200 are ever stored.
    pub async fn execute(&self, request: &RewrittenRequest) -> Result<TransportResponse> {
        if !self.enabled || request.method != Method::GET {
            let response = self.fetch(request, None).await?;
            return Ok(response);
        }

        let now = SystemTime::now();
        if let Some(entry) = self.lookup(&request.url, now) {
            if entry.is_fresh(now) {
                debug!(url = %request.url, "serving fresh cache entry");
                return Ok(Self::serve_stored(&entry));
            }
            if entry.freshness.has_validators() {
                debug!(url = %request.url, "revalidating stale cache entry");
                let response = self.fetch(request, Some(&entry.freshness)).await?;
                if response.status == StatusCode::NOT_MODIFIED {
                    self.refresh(&request.url, &response.headers, now);
                    return Ok(Self::serve_stored(&entry));
                }
                self.maybe_store(&request.url, &response, now);
                return Ok(response);
            }
            // Stale with nothing to revalidate against: fall through and
            // replace the entry with whatever the mirror returns.
        }

        let response = self.fetch(request, None).await?;
        self.maybe_store(&request.url, &response, now);
        Ok(response)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fetch(
        &self,
        request: &RewrittenRequest,
        conditional: Option<&Freshness>,
    ) -> Result<TransportResponse> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone())
            .body(request.body.clone());
        if let Some(freshness) = conditional {
            if let Some(etag) = &freshness.etag {
                builder = builder.header(IF_NONE_MATCH, etag.clone());
            }
            if let Some(last_modified) = &freshness.last_modified {
                builder = builder.header(IF_MODIFIED_SINCE, last_modified.clone());
            }
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        Ok(TransportResponse {
            status,
            headers,
            body,
            from_cache: false,
        })
    }

    fn serve_stored(entry: &CacheEntry) -> TransportResponse {
        let mut headers = entry.headers.clone();
        headers.insert(FROM_CACHE_HEADER, HeaderValue::from_static("1"));
        TransportResponse {
            status: StatusCode::OK,
            headers,
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Read-only lookup plus an access-time touch for eviction ordering
    fn lookup(&self, url: &str, now: SystemTime) -> Option<CacheEntry> {
        let entry = match self.store.read() {
            Ok(store) => store.get(url).cloned(),
            Err(e) => {
                warn!(url, error = %e, "cache read lock poisoned");
                None
            }
        }?;
        if let Ok(mut store) = self.store.write() {
            if let Some(stored) = store.get_mut(url) {
                stored.last_accessed = now;
            }
        }
        Some(entry)
    }

    fn maybe_store(&self, url: &str, response: &TransportResponse, now: SystemTime) {
        if response.status != StatusCode::OK || !storable(&response.headers) {
            return;
        }
        let entry = CacheEntry {
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: now,
            last_accessed: now,
            freshness: Freshness::from_headers(&response.headers),
        };
        if let Ok(mut store) = self.store.write() {
            if !store.contains_key(url) && store.len() >= self.max_entries {
                Self::evict_lru(&mut store);
            }
            store.insert(url.to_string(), entry);
            debug!(url, entries = store.len(), "stored mirror response");
        }
    }

    /// After a 304, restamp the entry so freshness counts from now
    fn refresh(&self, url: &str, revalidation_headers: &HeaderMap, now: SystemTime) {
        if let Ok(mut store) = self.store.write() {
            if let Some(entry) = store.get_mut(url) {
                entry.stored_at = now;
                entry.last_accessed = now;
                let updated = Freshness::from_headers(revalidation_headers);
                if updated.max_age.is_some() {
                    entry.freshness.max_age = updated.max_age;
                }
            }
        }
    }

    fn evict_lru(store: &mut HashMap<String, CacheEntry>) {
        let oldest = store
            .iter()
            .min_by_key(|(_, entry)| entry.last_accessed)
            .map(|(url, _)| url.clone());
        if let Some(url) = oldest {
            store.remove(&url);
            debug!(url, "evicted least recently used cache entry");
        }
    }
}
