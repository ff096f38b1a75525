//! Bearer token verification.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use serde_json::{Map, Value};

use super::keys::{SigningKey, SigningKeyStore, is_symmetric};
use crate::config::Config;
use crate::error::AuthError;

/// Authenticated caller, built from a verified claim set.
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    /// `sub` claim.
    pub subject: Option<String>,
    /// `iss` claim.
    pub issuer: Option<String>,
    /// Every claim in the token.
    pub claims: Map<String, Value>,
    /// Algorithm the token was verified with.
    pub algorithm: Algorithm,
}

impl Principal {
    fn from_claims(claims: Map<String, Value>, algorithm: Algorithm) -> Self {
        let text = |name: &str| claims.get(name).and_then(Value::as_str).map(str::to_string);
        Self {
            subject: text("sub"),
            issuer: text("iss"),
            claims,
            algorithm,
        }
    }

    /// Look up a string claim.
    #[must_use]
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }
}

/// Validates bearer tokens against the algorithm allow-list and the key store.
#[derive(Debug)]
pub struct TokenVerifier {
    allowed: Vec<Algorithm>,
    leeway: Duration,
    keys: Arc<SigningKeyStore>,
}

impl TokenVerifier {
    /// Create a verifier sharing `keys`.
    #[must_use]
    pub fn new(config: &Config, keys: Arc<SigningKeyStore>) -> Self {
        Self {
            allowed: config.allowed_algorithms.clone(),
            leeway: config.clock_skew,
            keys,
        }
    }

    /// The key store backing this verifier.
    #[must_use]
    pub fn key_store(&self) -> &Arc<SigningKeyStore> {
        &self.keys
    }

    /// Verify `token` end to end.
    ///
    /// The header algorithm is checked against the allow-list before any key is
    /// resolved or any signature computed.
    pub async fn verify(&self, token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(token).map_err(|e| match declared_algorithm(token) {
            Some(alg) if alg.parse::<Algorithm>().is_err() => AuthError::AlgorithmNotAllowed(alg),
            _ => AuthError::Malformed(e.to_string()),
        })?;
        let alg = header.alg;

        if !self.allowed.contains(&alg) {
            return Err(AuthError::AlgorithmNotAllowed(format!("{alg:?}")));
        }

        let key = self
            .resolve_key(alg, header.jku.as_deref(), header.kid.as_deref())
            .await?;

        if key.algorithm != alg {
            return Err(AuthError::InvalidSignature(format!(
                "token algorithm {alg:?} does not match key algorithm {:?}",
                key.algorithm
            )));
        }

        let mut validation = Validation::new(alg);
        validation.leeway = self.leeway.as_secs();
        validation.validate_nbf = true;
        validation.validate_aud = false;

        let data = decode::<Map<String, Value>>(token, &key.material, &validation)
            .map_err(|e| classify(e.kind(), &e.to_string()))?;

        check_issued_at(&data.claims, self.leeway)?;

        let principal = Principal::from_claims(data.claims, alg);
        tracing::debug!(subject = ?principal.subject, algorithm = ?alg, "Token verified");
        Ok(principal)
    }

    /// Symmetric algorithms use the static secret and ignore `jku`. Asymmetric
    /// algorithms follow `jku` when present, else the default JWKS URL.
    async fn resolve_key(
        &self,
        alg: Algorithm,
        jku: Option<&str>,
        kid: Option<&str>,
    ) -> Result<Arc<SigningKey>, AuthError> {
        if is_symmetric(alg) {
            return Ok(self.keys.symmetric_key(alg)?);
        }

        let url = jku.or_else(|| self.keys.default_jwks_url()).ok_or_else(|| {
            AuthError::KeyResolutionFailed(
                "token names no JWKS URL and no default is configured".to_string(),
            )
        })?;

        Ok(self.keys.resolve_asymmetric(url, kid).await?)
    }
}

/// The raw `alg` of a header `decode_header` refused, so algorithms it does not
/// know (`none` included) are reported as disallowed rather than malformed.
fn declared_algorithm(token: &str) -> Option<String> {
    let segment = token.split('.').next()?;
    let bytes = URL_SAFE_NO_PAD.decode(segment).ok()?;
    let header: Value = serde_json::from_slice(&bytes).ok()?;
    header.get("alg")?.as_str().map(str::to_string)
}

fn classify(kind: &ErrorKind, message: &str) -> AuthError {
    match kind {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => {
            AuthError::ExpiredOrNotYetValid(message.to_string())
        }
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
            AuthError::InvalidSignature(message.to_string())
        }
        _ => AuthError::Malformed(message.to_string()),
    }
}

/// Reject tokens issued in the future beyond the skew tolerance.
fn check_issued_at(claims: &Map<String, Value>, leeway: Duration) -> Result<(), AuthError> {
    let Some(iat) = claims.get("iat") else {
        return Ok(());
    };

    let iat = iat
        .as_i64()
        .or_else(|| iat.as_f64().map(|f| f as i64))
        .ok_or_else(|| AuthError::Malformed("'iat' is not a number".to_string()))?;

    let now = chrono::Utc::now().timestamp();
    let leeway = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);

    if iat > now.saturating_add(leeway) {
        return Err(AuthError::ExpiredOrNotYetValid(format!(
            "token issued {}s in the future",
            iat - now
        )));
    }
    Ok(())
}
