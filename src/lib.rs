#![warn(missing_docs)]
//! Conditional-request validation and server-side response caching for HTTP handlers.
//! Computes and compares `ETag` validation tokens to short-circuit unchanged responses,
//! builds `Cache-Control`/`Expires` response headers from a small option set, and wraps
//! a computation so its JSON-serialized result is cached under a derived key through an
//! injected [`CacheStore`].

use http::header;
use http::HeaderMap;
use http::HeaderValue;
use sha1::Digest;
use sha1::Sha1;
use std::fmt;
use std::time::Duration;
use std::time::SystemTime;
use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;
use tracing::debug;

/// Freshness lifetime used when the caller doesn't pick one.
const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(2 * 3600);

/// Extra `Cache-Control` directives, kept in caller-provided order.
///
/// A `None` value emits the bare directive name (`immutable`); `Some(v)` emits
/// `name=v` (`stale-while-revalidate=30`). Names keep the caller's casing.
pub type Directives = Vec<(Box<str>, Option<Box<str>>)>;

/// Boxed error type for computations and store implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by [`ResponseCache::cache`].
///
/// An ETag match is not a failure; it is reported as [`CacheOutcome::NotModified`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// `CacheOptions::key` was empty. Caller bug; nothing was written or fetched.
    #[error("cache options are missing the base cache key")]
    MissingKey,
    /// The wrapped computation failed. Nothing was stored; a later call with a
    /// succeeding computation starts from a clean miss.
    #[error("cached computation failed")]
    Computation(#[source] BoxError),
    /// The computation's result could not be serialized to JSON.
    #[error("failed to serialize computation result")]
    Serialize(#[from] serde_json::Error),
    /// The cache store itself failed. Propagated as-is; there is no
    /// compute-and-skip-caching fallback.
    #[error("cache store failure")]
    Store(#[source] BoxError),
}

/// Server-side cache consumed by [`ResponseCache::cache`]. Entries are raw text;
/// whatever the producer returned is the exact byte content handed back later.
///
/// Implementations map their own failures to [`CacheError::Store`] and pass
/// producer errors through unchanged, storing nothing on that path. When
/// concurrent requests race for an absent key, the implementation should run the
/// producer once under per-key mutual exclusion, or document duplicate computes
/// as an accepted relaxation (the returned value must be correct either way).
pub trait CacheStore {
    /// Returns the live entry at `key`, or runs `producer`, stores its output
    /// under `key` with expiry `ttl`, and returns that output.
    fn fetch_or_compute(
        &self,
        key: &str,
        ttl: Duration,
        producer: &mut dyn FnMut() -> Result<String, CacheError>,
    ) -> Result<String, CacheError>;
}

/// Per-call configuration for [`ResponseCache::cache`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Base cache-store key. Required; an empty key fails the call with
    /// [`CacheError::MissingKey`].
    pub key: String,
    /// Validation token. When present it is used both to answer conditional
    /// requests (`If-None-Match`) and to scope the store key, so each token
    /// value gets its own entry.
    pub etag: Option<String>,
    /// Freshness lifetime advertised to clients. The default is 2 hours.
    pub expires_in: Duration,
    /// Server-side entry lifetime, when it should differ from `expires_in`.
    pub cache_store_expires_in: Option<Duration>,
    /// Whether shared caches may store the response. Defaults to `true`.
    pub public: bool,
    /// Whether to also emit an absolute `Expires` header. Defaults to `false`.
    pub expires_header: bool,
    /// Extra `Cache-Control` directives forwarded verbatim, in order.
    pub directives: Directives,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            key: String::new(),
            etag: None,
            expires_in: DEFAULT_EXPIRES_IN,
            cache_store_expires_in: None,
            public: true,
            expires_header: false,
            directives: Directives::new(),
        }
    }
}

impl CacheOptions {
    /// Options for the given base key, everything else at its default.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }
}

/// Configuration for [`ResponseCache::expires_in`].
///
/// This is the slice of [`CacheOptions`] the header builder actually consumes;
/// key and expiry fields never reach it.
#[derive(Debug, Clone, Default)]
pub struct CacheControlOptions {
    /// Emit `public` instead of `private`. Unlike [`CacheOptions::public`],
    /// this defaults to `false`: the builder marks responses `private` unless
    /// told otherwise.
    pub public: bool,
    /// Emit an absolute `Expires` header alongside `max-age`.
    pub expires_header: bool,
    /// Extra directives appended after the mandatory two, in order.
    pub extra: Directives,
}

/// Result of an `If-None-Match` comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// The client already holds the current representation. Respond
    /// `304 Not Modified` with no body; no `ETag` header was written.
    NotModified,
    /// No match (or no conditional header). The `ETag` response header has
    /// been set to the computed digest.
    Mismatch,
}

/// What to send back after [`ResponseCache::cache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOutcome {
    /// The client's validation token matched. Respond `304` with an empty
    /// body; the computation never ran and the store was not consulted.
    NotModified,
    /// The response body, fetched from the store or freshly computed.
    Body(String),
}

/// Request-scoped caching helper.
///
/// Construct one per request from the inbound headers, call [`cache`] (or the
/// [`compare_etag`]/[`expires_in`] leaves directly), then copy the accumulated
/// response headers onto the outgoing response. Holds no state across requests.
///
/// [`cache`]: ResponseCache::cache
/// [`compare_etag`]: ResponseCache::compare_etag
/// [`expires_in`]: ResponseCache::expires_in
#[derive(Debug, Clone)]
pub struct ResponseCache {
    if_none_match: Option<Box<str>>,
    headers: HeaderMap,
}

impl ResponseCache {
    /// Captures the inbound `If-None-Match` header (if any) and starts an
    /// empty outbound header sink.
    pub fn new(request_headers: &HeaderMap) -> Self {
        let if_none_match = request_headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .map(From::from);
        Self {
            if_none_match,
            headers: HeaderMap::new(),
        }
    }

    /// Headers accumulated so far (`Cache-Control`, and possibly `Expires` and
    /// `ETag`). The framework layer copies these onto the wire response.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Consumes the helper, yielding the outbound headers.
    pub fn into_headers(self) -> HeaderMap {
        self.headers
    }

    /// Hashes `token` and compares the digest against the client's
    /// `If-None-Match` token.
    ///
    /// The digest is the lowercase hex SHA-1 of the token's string form, so it
    /// is byte-identical for identical string forms. Comparison is
    /// case-sensitive exact equality. On a mismatch the `ETag` response header
    /// is set to the digest; on a match nothing is written and the caller
    /// should stop and respond `304`.
    pub fn compare_etag(&mut self, token: impl fmt::Display) -> Validation {
        let digest = hex::encode(Sha1::digest(token.to_string()));
        if self.if_none_match.as_deref() == Some(digest.as_str()) {
            debug!(etag = %digest, "client representation is current");
            return Validation::NotModified;
        }
        self.headers
            .insert(header::ETAG, HeaderValue::from_str(&digest).unwrap());
        Validation::Mismatch
    }

    /// Sets `Cache-Control` (and optionally `Expires`) for a response that
    /// stays fresh for `max_age`.
    ///
    /// A zero `max_age` is the "do not cache" signal: the header becomes
    /// `no-cache` and no `Expires` is emitted regardless of
    /// `opts.expires_header`. Otherwise the directive list is
    /// `max-age=<seconds>`, then `public` or `private`, then `opts.extra` in
    /// order, joined with `", "`. `now` anchors the `Expires` date.
    pub fn expires_in(&mut self, max_age: Duration, opts: &CacheControlOptions, now: SystemTime) {
        let mut directives = Vec::with_capacity(2 + opts.extra.len());
        if max_age == Duration::ZERO {
            directives.push("no-cache".to_string());
        } else {
            directives.push(format!("max-age={}", max_age.as_secs()));
            if opts.expires_header {
                let expires = OffsetDateTime::from(now + max_age);
                self.headers.insert(
                    header::EXPIRES,
                    HeaderValue::from_str(&expires.format(&Rfc2822).unwrap()).unwrap(),
                );
            }
        }
        directives.push(String::from(if opts.public { "public" } else { "private" }));
        for (name, value) in &opts.extra {
            directives.push(match value {
                Some(value) => format!("{name}={value}"),
                None => name.to_string(),
            });
        }
        self.headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_str(&directives.join(", ")).unwrap(),
        );
    }

    /// Caches one response: sets freshness headers, answers the conditional
    /// request when an `etag` is configured, and otherwise serves the
    /// JSON-serialized result of `computation` through `store`.
    ///
    /// The store key is `opts.key`, extended by direct concatenation of the
    /// etag's string form when one is present, so distinct tokens occupy
    /// distinct entries. The store TTL is `opts.cache_store_expires_in`,
    /// falling back to `opts.expires_in`.
    ///
    /// `computation` runs only on a store miss, and its result is cached only
    /// on success; errors (and store failures) propagate as [`CacheError`].
    pub fn cache<T, F>(
        &mut self,
        store: &dyn CacheStore,
        opts: &CacheOptions,
        now: SystemTime,
        computation: F,
    ) -> Result<CacheOutcome, CacheError>
    where
        T: serde::Serialize,
        F: FnOnce() -> Result<T, BoxError>,
    {
        if opts.key.is_empty() {
            return Err(CacheError::MissingKey);
        }

        self.expires_in(
            opts.expires_in,
            &CacheControlOptions {
                public: opts.public,
                expires_header: opts.expires_header,
                extra: opts.directives.clone(),
            },
            now,
        );

        let mut effective_key = opts.key.clone();
        if let Some(etag) = &opts.etag {
            effective_key.push_str(etag);
            if self.compare_etag(etag) == Validation::NotModified {
                return Ok(CacheOutcome::NotModified);
            }
        }

        let ttl = opts.cache_store_expires_in.unwrap_or(opts.expires_in);
        debug!(key = %effective_key, ttl_secs = ttl.as_secs(), "consulting cache store");

        let mut computation = Some(computation);
        let mut producer = || {
            let computation = computation.take().expect("producer ran more than once");
            let value = computation().map_err(CacheError::Computation)?;
            Ok(serde_json::to_string(&value)?)
        };
        let body = store.fetch_or_compute(&effective_key, ttl, &mut producer)?;
        Ok(CacheOutcome::Body(body))
    }
}
