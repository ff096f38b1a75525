//! Signing key resolution.
//!
//! Symmetric algorithms use the configured static secret. Asymmetric algorithms
//! resolve public keys from JWKS documents, cached per URL with:
//! - TTL-based expiry (default 10 minutes)
//! - Single-flight refresh: one fetch per URL regardless of concurrent callers
//! - Negative caching of fetch failures for a short window
//! - Structural validation of every document before it is cached

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::Jwk;
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::KeyStoreError;

/// Upper bound on distinct JWKS URLs held in the cache.
const MAX_CACHED_URLS: u64 = 64;

/// Whether `alg` is an HMAC algorithm.
#[must_use]
pub const fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// Where a signing key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Configured shared secret.
    StaticSecret,
    /// Published JWKS document.
    Jwks,
}

/// A key usable to verify token signatures.
#[derive(Clone)]
pub struct SigningKey {
    /// Key identifier, absent for the static secret.
    pub kid: Option<String>,
    /// Algorithm this key verifies.
    pub algorithm: Algorithm,
    /// Verification material.
    pub material: DecodingKey,
    /// Origin of the key.
    pub source: KeySource,
    /// JWKS document the key was published in.
    pub jwks_url: Option<String>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("source", &self.source)
            .field("jwks_url", &self.jwks_url)
            .finish()
    }
}

/// Cached keys for one JWKS URL.
#[derive(Debug)]
pub struct JwksCacheEntry {
    /// Validated keys from the document.
    pub keys: Vec<Arc<SigningKey>>,
    /// When the document was fetched.
    pub fetched_at: Instant,
    /// How long the document may be served.
    pub ttl: Duration,
}

impl JwksCacheEntry {
    /// Whether the entry is still within its TTL.
    #[must_use]
    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }

    /// Find a key by id. Without a `kid`, a single-key set is unambiguous.
    #[must_use]
    pub fn find(&self, kid: Option<&str>) -> Option<Arc<SigningKey>> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.kid.as_deref() == Some(kid))
                .cloned(),
            None if self.keys.len() == 1 => self.keys.first().cloned(),
            None => None,
        }
    }
}

/// Recorded fetch failure.
#[derive(Debug)]
struct FetchFailure {
    reason: String,
    failed_at: Instant,
}

/// Holds the static secret and caches JWKS-published public keys.
pub struct SigningKeyStore {
    secret: Option<DecodingKey>,
    default_jwks_url: Option<String>,
    http: reqwest::Client,
    entries: Cache<String, Arc<JwksCacheEntry>>,
    failures: Cache<String, Arc<FetchFailure>>,
    /// One refresh lock per trusted URL. Built at startup, never mutated.
    refresh_locks: HashMap<String, Arc<Mutex<()>>>,
    cache_ttl: Duration,
    failure_ttl: Duration,
    refresh_cooldown: Duration,
}

impl SigningKeyStore {
    /// Create a key store from configuration.
    ///
    /// Every trusted JWKS URL must be HTTPS; plain HTTP is accepted for loopback hosts only.
    pub fn new(config: &Config) -> Result<Self, KeyStoreError> {
        let trusted = config.trusted_urls();
        for url in &trusted {
            validate_jwks_url(url)?;
        }

        let http = reqwest::Client::builder()
            .timeout(config.jwks_fetch_timeout)
            .user_agent(concat!("movie-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| KeyStoreError::ClientInit(e.to_string()))?;

        let entries = Cache::builder()
            .max_capacity(MAX_CACHED_URLS)
            .time_to_live(config.jwks_cache_ttl)
            .build();

        let failures = Cache::builder()
            .max_capacity(MAX_CACHED_URLS)
            .time_to_live(config.jwks_failure_ttl.max(Duration::from_millis(1)))
            .build();

        let refresh_locks = trusted
            .into_iter()
            .map(|url| (url, Arc::new(Mutex::new(()))))
            .collect();

        Ok(Self {
            secret: config
                .secret_key
                .as_deref()
                .map(|s| DecodingKey::from_secret(s.as_bytes())),
            default_jwks_url: config.jwks_url.clone(),
            http,
            entries,
            failures,
            refresh_locks,
            cache_ttl: config.jwks_cache_ttl,
            failure_ttl: config.jwks_failure_ttl,
            refresh_cooldown: config.jwks_refresh_cooldown,
        })
    }

    /// JWKS URL used when a token names none.
    #[must_use]
    pub fn default_jwks_url(&self) -> Option<&str> {
        self.default_jwks_url.as_deref()
    }

    /// Whether a token's `jku` may be followed.
    #[must_use]
    pub fn is_trusted(&self, url: &str) -> bool {
        self.refresh_locks.contains_key(url)
    }

    /// Key for a symmetric algorithm, built from the static secret.
    pub fn symmetric_key(&self, alg: Algorithm) -> Result<Arc<SigningKey>, KeyStoreError> {
        let material = self
            .secret
            .clone()
            .ok_or_else(|| KeyStoreError::MissingSecret(format!("{alg:?}")))?;

        Ok(Arc::new(SigningKey {
            kid: None,
            algorithm: alg,
            material,
            source: KeySource::StaticSecret,
            jwks_url: None,
        }))
    }

    /// Resolve a public key from the JWKS document at `jwks_url`.
    ///
    /// Fetches on cache miss or expiry. An unknown `kid` forces one refresh once the
    /// cached document is older than the refresh cooldown, which picks up key rotation.
    pub async fn resolve_asymmetric(
        &self,
        jwks_url: &str,
        kid: Option<&str>,
    ) -> Result<Arc<SigningKey>, KeyStoreError> {
        let lock = self
            .refresh_locks
            .get(jwks_url)
            .ok_or_else(|| KeyStoreError::UntrustedUrl(jwks_url.to_string()))?;

        let cached = self.entries.get(jwks_url).await;

        if let Some(entry) = cached.as_ref().filter(|e| e.is_fresh()) {
            if let Some(key) = entry.find(kid) {
                return Ok(key);
            }
            if entry.fetched_at.elapsed() < self.refresh_cooldown {
                return Err(unknown_key(jwks_url, kid));
            }
            tracing::debug!(jwks_url, kid = ?kid, "Key id not in cached JWKS, refreshing");
        }

        let entry = self.refresh(jwks_url, lock, cached).await?;
        entry.find(kid).ok_or_else(|| unknown_key(jwks_url, kid))
    }

    /// Fetch a fresh document, coalescing concurrent refreshes of the same URL.
    ///
    /// `seen` is the entry the caller found wanting; if another task replaced it while
    /// this one waited for the lock, the replacement is returned without a fetch.
    async fn refresh(
        &self,
        url: &str,
        lock: &Mutex<()>,
        seen: Option<Arc<JwksCacheEntry>>,
    ) -> Result<Arc<JwksCacheEntry>, KeyStoreError> {
        let _guard = lock.lock().await;

        if let Some(current) = self.entries.get(url).await {
            let replaced = seen.as_ref().is_none_or(|s| !Arc::ptr_eq(s, &current));
            if replaced && current.is_fresh() {
                return Ok(current);
            }
        }

        if let Some(failure) = self.failures.get(url).await {
            if failure.failed_at.elapsed() < self.failure_ttl {
                return Err(KeyStoreError::RecentlyFailed {
                    url: url.to_string(),
                    reason: failure.reason.clone(),
                });
            }
        }

        match self.fetch(url).await {
            Ok(keys) => {
                tracing::info!(jwks_url = url, key_count = keys.len(), "Fetched JWKS");
                let entry = Arc::new(JwksCacheEntry {
                    keys,
                    fetched_at: Instant::now(),
                    ttl: self.cache_ttl,
                });
                self.entries.insert(url.to_string(), Arc::clone(&entry)).await;
                self.failures.invalidate(url).await;
                Ok(entry)
            }
            Err(e) => {
                tracing::warn!(jwks_url = url, error = %e, "JWKS fetch failed");
                if !self.failure_ttl.is_zero() {
                    let failure = Arc::new(FetchFailure {
                        reason: e.to_string(),
                        failed_at: Instant::now(),
                    });
                    self.failures.insert(url.to_string(), failure).await;
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<Arc<SigningKey>>, KeyStoreError> {
        let response = self.http.get(url).send().await.map_err(|e| KeyStoreError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(KeyStoreError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let document: Value = response.json().await.map_err(|e| KeyStoreError::Malformed {
            url: url.to_string(),
            reason: format!("body is not JSON: {e}"),
        })?;

        parse_jwks(url, &document)
    }
}

impl fmt::Debug for SigningKeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyStore")
            .field("has_secret", &self.secret.is_some())
            .field("default_jwks_url", &self.default_jwks_url)
            .field("trusted_urls", &self.refresh_locks.len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

fn unknown_key(url: &str, kid: Option<&str>) -> KeyStoreError {
    KeyStoreError::UnknownKey {
        url: url.to_string(),
        kid: kid.unwrap_or("<none>").to_string(),
    }
}

/// Accept `https` URLs, and `http` only for loopback hosts.
pub fn validate_jwks_url(raw: &str) -> Result<(), KeyStoreError> {
    let invalid = |reason: &str| KeyStoreError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let url = url::Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
    match url.scheme() {
        "https" => Ok(()),
        "http" => match url.host_str() {
            Some("localhost" | "127.0.0.1" | "[::1]") => Ok(()),
            _ => Err(invalid("plain HTTP is only allowed for loopback hosts")),
        },
        _ => Err(invalid("scheme must be https")),
    }
}

/// Validate a JWKS document and convert its keys.
///
/// Every key must carry `kid`, `alg` and usable public key material. Symmetric
/// keys and duplicate key ids reject the whole document.
pub fn parse_jwks(url: &str, document: &Value) -> Result<Vec<Arc<SigningKey>>, KeyStoreError> {
    let malformed = |reason: String| KeyStoreError::Malformed {
        url: url.to_string(),
        reason,
    };

    let keys = document
        .get("keys")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing 'keys' array".to_string()))?;

    if keys.is_empty() {
        return Err(malformed("'keys' array is empty".to_string()));
    }

    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(keys.len());

    for (index, raw) in keys.iter().enumerate() {
        let kid = raw
            .get("kid")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| malformed(format!("key {index} has no 'kid'")))?;

        let alg_name = raw
            .get("alg")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed(format!("key '{kid}' has no 'alg'")))?;

        let algorithm = Algorithm::from_str(alg_name)
            .map_err(|_| malformed(format!("key '{kid}' has unsupported alg '{alg_name}'")))?;

        if is_symmetric(algorithm) || raw.get("kty").and_then(Value::as_str) == Some("oct") {
            return Err(malformed(format!("key '{kid}' is symmetric")));
        }

        if !seen.insert(kid.to_string()) {
            return Err(malformed(format!("duplicate kid '{kid}'")));
        }

        let jwk: Jwk = serde_json::from_value(raw.clone())
            .map_err(|e| malformed(format!("key '{kid}' is not a valid JWK: {e}")))?;

        let material = DecodingKey::from_jwk(&jwk)
            .map_err(|e| malformed(format!("key '{kid}' has unusable material: {e}")))?;

        parsed.push(Arc::new(SigningKey {
            kid: Some(kid.to_string()),
            algorithm,
            material,
            source: KeySource::Jwks,
            jwks_url: Some(url.to_string()),
        }));
    }

    Ok(parsed)
}
