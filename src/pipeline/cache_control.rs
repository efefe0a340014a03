//! `Cache-Control` directive parsing and retention resolution.

use std::time::Duration;

use http::header::CACHE_CONTROL;
use http::HeaderMap;

// == Retention ==
/// How long a response stays fresh and how long it is kept at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub stale_time: Duration,
    pub ttl: Duration,
}

impl Retention {
    pub fn new(stale_time: Duration, ttl: Duration) -> Self {
        Self { stale_time, ttl }
    }

    /// Never stale, never expires.
    pub fn forever() -> Self {
        Self::new(Duration::MAX, Duration::MAX)
    }
}

// == Cache Directives ==
/// Recognised response directives. Unknown tokens and numeric values that do
/// not parse are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub no_store: bool,
    pub no_cache: bool,
    /// `must-revalidate` or `proxy-revalidate`
    pub must_revalidate: bool,
    pub immutable: bool,
    pub max_age: Option<u64>,
    pub s_max_age: Option<u64>,
    pub stale_while_revalidate: Option<u64>,
}

impl CacheDirectives {
    /// Parses a single header value such as `public, max-age=60, immutable`.
    pub fn parse(header: &str) -> Self {
        let mut directives = Self::default();

        for token in header.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (token, None),
            };
            let seconds = value.and_then(|v| v.parse::<u64>().ok());

            match name.to_ascii_lowercase().as_str() {
                "no-store" => directives.no_store = true,
                "no-cache" => directives.no_cache = true,
                "must-revalidate" | "proxy-revalidate" => directives.must_revalidate = true,
                "immutable" => directives.immutable = true,
                "max-age" => directives.max_age = seconds.or(directives.max_age),
                "s-maxage" | "s-max-age" => directives.s_max_age = seconds.or(directives.s_max_age),
                "stale-while-revalidate" => {
                    directives.stale_while_revalidate =
                        seconds.or(directives.stale_while_revalidate)
                }
                _ => {}
            }
        }

        directives
    }

    /// Parses every `Cache-Control` header in the map as one directive list.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let joined = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        Self::parse(&joined)
    }

    /// Resolves the retention for a response, starting from `defaults`.
    ///
    /// Returns None when the response must not be stored.
    ///
    /// 1. `no-store` wins over everything.
    /// 2. `immutable` keeps the response forever, ignoring `max-age`.
    /// 3. `no-cache` / `must-revalidate` force a zero stale time; a
    ///    `stale-while-revalidate` value then sets it; `s-maxage` (else
    ///    `max-age`) sets the TTL.
    pub fn resolve(&self, defaults: Retention) -> Option<Retention> {
        if self.no_store {
            return None;
        }
        if self.immutable {
            return Some(Retention::forever());
        }

        let mut retention = defaults;
        if self.no_cache || self.must_revalidate {
            retention.stale_time = Duration::ZERO;
        }
        if let Some(swr) = self.stale_while_revalidate {
            retention.stale_time = Duration::from_secs(swr);
        }
        if let Some(age) = self.s_max_age.or(self.max_age) {
            retention.ttl = Duration::from_secs(age);
        }
        Some(retention)
    }
}
