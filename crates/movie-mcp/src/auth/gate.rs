//! Request-level authentication.
//!
//! [`AuthGate`] is transport independent; [`require_bearer`] adapts it to axum
//! as a `from_fn_with_state` middleware.

use std::sync::Arc;

use axum::Json;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use serde_json::Value;

use super::verifier::{Principal, TokenVerifier};
use crate::error::{AuthError, ProtocolError};

/// Bodies larger than this are not inspected for a request id on rejection.
const MAX_REJECTED_BODY: usize = 64 * 1024;

/// Authentication outcome attached to each request that passes the gate.
///
/// `None` when authentication is disabled.
#[derive(Debug, Clone, Default)]
pub struct Authenticated(pub Option<Principal>);

/// Decides whether a request may reach the dispatcher.
#[derive(Debug)]
pub struct AuthGate {
    verifier: Option<Arc<TokenVerifier>>,
    dev_mode: bool,
}

impl AuthGate {
    /// Gate that verifies every request with `verifier`.
    #[must_use]
    pub fn new(verifier: Arc<TokenVerifier>, dev_mode: bool) -> Self {
        Self {
            verifier: Some(verifier),
            dev_mode,
        }
    }

    /// Gate that lets every request through untouched.
    #[must_use]
    pub fn disabled(dev_mode: bool) -> Self {
        Self {
            verifier: None,
            dev_mode,
        }
    }

    /// Whether tokens are checked.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// Whether rejection responses may carry internal detail.
    #[must_use]
    pub const fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    /// Authenticate a request carrying `token`.
    pub async fn authenticate(&self, token: Option<&str>) -> Result<Authenticated, AuthError> {
        let Some(verifier) = &self.verifier else {
            return Ok(Authenticated(None));
        };

        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AuthError::Malformed("missing bearer token".to_string()))?;

        match verifier.verify(token).await {
            Ok(principal) => Ok(Authenticated(Some(principal))),
            Err(e) => {
                tracing::warn!(kind = e.kind(), "Rejected bearer token");
                tracing::debug!(error = %e, "Token rejection detail");
                Err(e)
            }
        }
    }
}

/// Axum middleware enforcing [`AuthGate`] on the wrapped routes.
pub async fn require_bearer(
    State(gate): State<Arc<AuthGate>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !gate.is_enabled() {
        request.extensions_mut().insert(Authenticated(None));
        return next.run(request).await;
    }

    let bearer = request.headers().typed_get::<Authorization<Bearer>>();
    let has_authorization = request.headers().contains_key(header::AUTHORIZATION);
    let outcome = match (&bearer, has_authorization) {
        (None, true) => Err(AuthError::Malformed(
            "authorization header is not a bearer token".into(),
        )),
        _ => gate.authenticate(bearer.as_ref().map(|b| b.token())).await,
    };

    match outcome {
        Ok(authenticated) => {
            request.extensions_mut().insert(authenticated);
            next.run(request).await
        }
        Err(err) => {
            let id = request_id(request.into_body()).await;
            reject(err, id, gate.dev_mode())
        }
    }
}

async fn request_id(body: Body) -> Value {
    match to_bytes(body, MAX_REJECTED_BODY).await {
        Ok(bytes) => rejected_id(&bytes),
        Err(_) => Value::Null,
    }
}

/// Best-effort recovery of the JSON-RPC id so the client can correlate the rejection.
pub(crate) fn rejected_id(raw: &[u8]) -> Value {
    serde_json::from_slice::<Value>(raw)
        .ok()
        .and_then(|v| v.get("id").cloned())
        .filter(|id| id.is_string() || id.is_number())
        .unwrap_or(Value::Null)
}

fn reject(err: AuthError, id: Value, dev_mode: bool) -> Response {
    let body = ProtocolError::Unauthenticated(err).to_response(id, dev_mode);
    let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
    response.headers_mut().insert(
        header::WWW_AUTHENTICATE,
        header::HeaderValue::from_static("Bearer error=\"invalid_token\""),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::keys::SigningKeyStore;
    use crate::config::Config;

    fn enabled_gate() -> AuthGate {
        let config = Config::for_testing().with_hs256_secret("a-secret-of-reasonable-length-123");
        let keys = Arc::new(SigningKeyStore::new(&config).unwrap());
        AuthGate::new(Arc::new(TokenVerifier::new(&config, keys)), true)
    }

    #[tokio::test]
    async fn test_disabled_gate_passes_everything() {
        let gate = AuthGate::disabled(false);
        assert!(!gate.is_enabled());
        let outcome = gate.authenticate(None).await.unwrap();
        assert!(outcome.0.is_none());
    }

    #[tokio::test]
    async fn test_enabled_gate_requires_token() {
        let gate = enabled_gate();
        assert!(matches!(gate.authenticate(None).await, Err(AuthError::Malformed(_))));
        assert!(matches!(gate.authenticate(Some("  ")).await, Err(AuthError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_request_id_recovery() {
        let id = request_id(Body::from(r#"{"jsonrpc":"2.0","id":7,"method":"ping"}"#)).await;
        assert_eq!(id, serde_json::json!(7));

        let id = request_id(Body::from("not json")).await;
        assert!(id.is_null());

        assert_eq!(rejected_id(br#"{"id":"abc","method":"ping"}"#), serde_json::json!("abc"));
        assert!(rejected_id(br#"{"id":{"nested":true}}"#).is_null());
    }
}
