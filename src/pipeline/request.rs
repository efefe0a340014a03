//! Request and response values flowing through the pipeline.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, ETAG, LAST_MODIFIED};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::FetchError;

// == Cache Options ==
/// Per-request caching opt-in.
///
/// Fields left as None fall back to the coordinator's configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub stale_time: Option<Duration>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }
}

// == Resource Request ==
/// A logical request for a remote resource.
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: String,
    /// Query parameters; ordered so the derived identity is stable
    pub params: BTreeMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Caching opt-in; None means the response is never cached
    pub cache: Option<CacheOptions>,
    /// Caller-supplied cache key overriding the derived identity
    pub cache_key: Option<String>,
    /// Skip in-flight deduplication for this request
    pub bypass_dedupe: bool,
}

impl ResourceRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: BTreeMap::new(),
            headers: HeaderMap::new(),
            body: None,
            cache: None,
            cache_key: None,
            bypass_dedupe: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Opts into caching with the configured defaults.
    pub fn cached(self) -> Self {
        self.with_cache(CacheOptions::default())
    }

    pub fn with_cache(mut self, options: CacheOptions) -> Self {
        self.cache = Some(options);
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn bypass_dedupe(mut self) -> Self {
        self.bypass_dedupe = true;
        self
    }

    /// Default identity: method, URL and serialized query parameters.
    ///
    /// `GET https://api/users?page=2&sort=name`
    pub fn identity(&self) -> String {
        let mut identity = format!("{} {}", self.method, self.url);
        for (index, (name, value)) in self.params.iter().enumerate() {
            let sep = if index == 0 { '?' } else { '&' };
            let _ = write!(identity, "{sep}{name}={value}");
        }
        identity
    }
}

// == Response Source ==
/// Where the value handed to the caller came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// Fresh response from the network
    #[default]
    Network,
    /// Served from a fresh cache entry without contacting the network
    Cache,
    /// Origin answered 304; the cached body was substituted
    Revalidated,
}

impl ResponseSource {
    /// Value for the gateway's `x-cache` header.
    pub fn as_header_value(&self, was_stale: bool) -> &'static str {
        match (self, was_stale) {
            (ResponseSource::Cache, _) => "HIT",
            (ResponseSource::Revalidated, _) => "REVALIDATED",
            (ResponseSource::Network, true) => "STALE",
            (ResponseSource::Network, false) => "MISS",
        }
    }
}

// == Resource Response ==
/// A response as seen by callers (never a bare 304 once it left the
/// interceptor with a cached entry available).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl ResourceResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            source: ResponseSource::Network,
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_source(mut self, source: ResponseSource) -> Self {
        self.source = source;
        self
    }

    pub fn etag(&self) -> Option<&HeaderValue> {
        self.headers.get(ETAG)
    }

    pub fn last_modified(&self) -> Option<&HeaderValue> {
        self.headers.get(LAST_MODIFIED)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as UTF-8 text, lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Converts 4xx/5xx responses into [`FetchError::Status`].
    pub fn error_for_status(self) -> Result<Self, FetchError> {
        // A 304 only reaches here when no cached body could replace it.
        let unanswered = self.status == StatusCode::NOT_MODIFIED;
        if unanswered || self.status.is_client_error() || self.status.is_server_error() {
            let message = self
                .status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string();
            return Err(FetchError::Status {
                status: self.status,
                message,
            });
        }
        Ok(self)
    }
}
