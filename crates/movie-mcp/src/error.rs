//! Error types for the movie MCP server.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! The split between [`ProtocolError`] and [`ToolError`] mirrors the JSON-RPC contract:
//! protocol errors become JSON-RPC error objects, tool errors become `isError` results.

use std::time::Duration;

use serde_json::{Value, json};

use crate::server::elicitation::SessionState;

/// JSON-RPC 2.0 error codes used by the server.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Bearer token missing or rejected.
    pub const AUTHENTICATION_FAILED: i32 = -32001;
    /// Elicitation session could not accept the message.
    pub const ELICITATION_ERROR: i32 = -32002;
}

/// Bearer token verification failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Token could not be parsed, or the credential is missing.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token header names an algorithm outside the configured allow-list.
    #[error("algorithm {0} is not allowed")]
    AlgorithmNotAllowed(String),

    /// `exp`, `nbf` or `iat` places the token outside its validity window.
    #[error("token expired or not yet valid: {0}")]
    ExpiredOrNotYetValid(String),

    /// Signature does not verify against the resolved key.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signing key could not be obtained (missing secret, JWKS failure, unknown kid).
    #[error("signing key resolution failed: {0}")]
    KeyResolutionFailed(String),
}

impl AuthError {
    /// Short machine-readable kind, safe to log and to return to callers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::AlgorithmNotAllowed(_) => "algorithm_not_allowed",
            Self::ExpiredOrNotYetValid(_) => "expired_or_not_yet_valid",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::KeyResolutionFailed(_) => "key_resolution_failed",
        }
    }
}

/// Failures while resolving signing keys.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    /// The token named a JWKS URL that is not configured as trusted.
    #[error("JWKS URL {0} is not trusted")]
    UntrustedUrl(String),

    /// A configured JWKS URL is unusable.
    #[error("invalid JWKS URL {url}: {reason}")]
    InvalidUrl {
        /// Offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Transport failure while fetching a JWKS document.
    #[error("JWKS fetch from {url} failed: {reason}")]
    Fetch {
        /// JWKS URL
        url: String,
        /// Underlying error
        reason: String,
    },

    /// JWKS endpoint answered with a non-success status.
    #[error("JWKS endpoint {url} returned status {status}")]
    Status {
        /// JWKS URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// JWKS document failed structural validation.
    #[error("malformed JWKS document from {url}: {reason}")]
    Malformed {
        /// JWKS URL
        url: String,
        /// Validation failure
        reason: String,
    },

    /// A recent fetch failed and the failure is still negative-cached.
    #[error("JWKS endpoint {url} failed recently: {reason}")]
    RecentlyFailed {
        /// JWKS URL
        url: String,
        /// Reason recorded with the failure
        reason: String,
    },

    /// No key with the requested `kid` exists in the set.
    #[error("key {kid} not found in JWKS {url}")]
    UnknownKey {
        /// JWKS URL
        url: String,
        /// Requested key id
        kid: String,
    },

    /// Symmetric algorithm allowed but no secret configured.
    #[error("no secret configured for symmetric algorithm {0}")]
    MissingSecret(String),

    /// HTTP client could not be constructed.
    #[error("HTTP client initialization failed: {0}")]
    ClientInit(String),
}

impl From<KeyStoreError> for AuthError {
    fn from(err: KeyStoreError) -> Self {
        Self::KeyResolutionFailed(err.to_string())
    }
}

/// Elicitation session failures.
///
/// Delivered to the suspended handler on resume, or returned to the caller of
/// `submit`/`cancel` when the session cannot accept the message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ElicitationError {
    /// No response arrived before the session deadline.
    #[error("elicitation timed out waiting for a response")]
    Expired,

    /// The session was cancelled.
    #[error("elicitation was cancelled")]
    Cancelled,

    /// The user declined to answer.
    #[error("elicitation was declined by the user")]
    Declined,

    /// Too many responses failed schema validation.
    #[error("elicitation cancelled after {0} invalid submissions")]
    TooManyInvalidSubmissions(u32),

    /// No session with this id exists.
    #[error("unknown elicitation session: {0}")]
    UnknownSession(String),

    /// The session already reached a terminal state.
    #[error("elicitation session {id} is already {state}")]
    AlreadyResolved {
        /// Session id
        id: String,
        /// Terminal state the session is in
        state: SessionState,
    },

    /// The submitted response does not match the requested schema.
    #[error("response does not match the requested schema: {0}")]
    SchemaMismatch(String),

    /// The requested schema could not be compiled.
    #[error("invalid elicitation schema: {0}")]
    InvalidSchema(String),

    /// Elicitation is disabled by configuration.
    #[error("elicitation is disabled")]
    Disabled,

    /// The request could not be delivered to the client.
    #[error("no client channel available to deliver the elicitation request")]
    Undeliverable,
}

/// Errors rejected at the dispatch boundary; rendered as JSON-RPC error objects.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// Body is not valid JSON.
    #[error("Parse error")]
    Parse {
        /// Parser message
        detail: String,
    },

    /// Valid JSON but not a valid JSON-RPC 2.0 envelope.
    #[error("Invalid request")]
    InvalidRequest {
        /// What was wrong with the envelope
        detail: String,
    },

    /// Method is not part of the supported surface.
    #[error("Method not found: {method}")]
    MethodNotFound {
        /// Requested method
        method: String,
    },

    /// Parameters are missing, unknown, or fail schema validation.
    #[error("{message}")]
    InvalidParams {
        /// Caller-facing message
        message: String,
        /// Validation detail, only returned in development mode
        detail: Option<String>,
    },

    /// Authentication failed before dispatch.
    #[error("Authentication failed")]
    Unauthenticated(AuthError),

    /// Elicitation session rejected the message.
    #[error("{0}")]
    Elicitation(ElicitationError),

    /// Unexpected server-side failure.
    #[error("Internal error")]
    Internal {
        /// Internal detail
        detail: String,
    },
}

impl ProtocolError {
    /// Create an invalid params error without extra detail.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams {
            message: message.into(),
            detail: None,
        }
    }

    /// Create an invalid params error carrying development-only detail.
    #[must_use]
    pub fn invalid_params_with_detail(
        message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::InvalidParams {
            message: message.into(),
            detail: Some(detail.into()),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    /// JSON-RPC error code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::Parse { .. } => codes::PARSE_ERROR,
            Self::InvalidRequest { .. } => codes::INVALID_REQUEST,
            Self::MethodNotFound { .. } => codes::METHOD_NOT_FOUND,
            Self::InvalidParams { .. } => codes::INVALID_PARAMS,
            Self::Unauthenticated(_) => codes::AUTHENTICATION_FAILED,
            Self::Elicitation(ElicitationError::SchemaMismatch(_)) => codes::INVALID_PARAMS,
            Self::Elicitation(_) => codes::ELICITATION_ERROR,
            Self::Internal { .. } => codes::INTERNAL_ERROR,
        }
    }

    /// Internal detail that is only exposed in development mode.
    #[must_use]
    pub fn detail(&self) -> Option<String> {
        match self {
            Self::Parse { detail }
            | Self::InvalidRequest { detail }
            | Self::Internal { detail } => Some(detail.clone()),
            Self::InvalidParams { detail, .. } => detail.clone(),
            Self::Unauthenticated(err) => Some(err.to_string()),
            Self::MethodNotFound { .. } | Self::Elicitation(_) => None,
        }
    }

    /// The `data` member of the JSON-RPC error object.
    ///
    /// Production deployments only learn the auth failure kind; development
    /// deployments also receive the full detail.
    #[must_use]
    pub fn data(&self, dev_mode: bool) -> Option<Value> {
        let kind = match self {
            Self::Unauthenticated(err) => Some(err.kind()),
            _ => None,
        };
        let detail = if dev_mode { self.detail() } else { None };

        match (kind, detail) {
            (None, None) => None,
            (Some(kind), None) => Some(json!({ "kind": kind })),
            (None, Some(detail)) => Some(json!({ "detail": detail })),
            (Some(kind), Some(detail)) => Some(json!({ "kind": kind, "detail": detail })),
        }
    }
}

impl From<ElicitationError> for ProtocolError {
    fn from(err: ElicitationError) -> Self {
        Self::Elicitation(err)
    }
}

impl From<AuthError> for ProtocolError {
    fn from(err: AuthError) -> Self {
        Self::Unauthenticated(err)
    }
}

/// Errors from MCP tool execution.
///
/// Never cross the dispatcher boundary as JSON-RPC errors: they are reported
/// inside a normal result with `isError: true`.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Elicitation did not produce a usable answer
    #[error("Elicitation failed: {0}")]
    Elicitation(#[from] ElicitationError),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal tool logic error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Handler exceeded its time budget
    #[error("Operation timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    /// Handler task failed without returning
    #[error("Tool execution aborted: {0}")]
    Aborted(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Convert to a user-friendly error message for the MCP response.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            Self::Timeout(limit) => {
                format!("Operation timed out after {} seconds. Please try again.", limit.as_secs())
            }
            Self::Elicitation(ElicitationError::Declined) => {
                "No input was provided, so the request could not be completed.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Configuration loading and validation failures.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the expected shape.
    #[error("failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A value is out of range or unparseable.
    #[error("invalid value for {key}: {message}")]
    Invalid {
        /// Configuration key
        key: String,
        /// What was wrong
        message: String,
    },
}

impl ConfigError {
    /// Create an invalid value error.
    #[must_use]
    pub fn invalid(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Result type alias for protocol handling.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        let detail = || "x".to_string();
        assert_eq!(ProtocolError::Parse { detail: detail() }.code(), -32700);
        assert_eq!(ProtocolError::InvalidRequest { detail: detail() }.code(), -32600);
        assert_eq!(ProtocolError::MethodNotFound { method: detail() }.code(), -32601);
        assert_eq!(ProtocolError::invalid_params("x").code(), -32602);
        assert_eq!(ProtocolError::internal("x").code(), -32603);
        assert_eq!(
            ProtocolError::Unauthenticated(AuthError::Malformed("x".into())).code(),
            codes::AUTHENTICATION_FAILED
        );
        assert_eq!(ProtocolError::Elicitation(ElicitationError::Expired).code(), -32002);
        assert_eq!(
            ProtocolError::Elicitation(ElicitationError::SchemaMismatch("x".into())).code(),
            -32602
        );
    }

    #[test]
    fn test_auth_detail_hidden_in_production() {
        let err = ProtocolError::Unauthenticated(AuthError::InvalidSignature(
            "signature mismatch for kid k1".into(),
        ));

        let prod = err.data(false).unwrap();
        assert_eq!(prod["kind"], "invalid_signature");
        assert!(prod.get("detail").is_none());

        let dev = err.data(true).unwrap();
        assert!(dev["detail"].as_str().unwrap().contains("kid k1"));
        assert_eq!(err.to_string(), "Authentication failed");
    }

    #[test]
    fn test_invalid_params_message_is_public() {
        let err =
            ProtocolError::invalid_params_with_detail("Unknown tool: nonexistent", "registry miss");
        assert_eq!(err.to_string(), "Unknown tool: nonexistent");
        assert!(err.data(false).is_none());
        assert_eq!(err.data(true).unwrap()["detail"], "registry miss");
    }

    #[test]
    fn test_key_store_error_maps_to_key_resolution() {
        let err: AuthError = KeyStoreError::MissingSecret("HS256".into()).into();
        assert_eq!(err.kind(), "key_resolution_failed");
        assert!(err.to_string().contains("HS256"));
    }

    #[test]
    fn test_tool_error_user_message() {
        let err = ToolError::validation("genre", "cannot be empty");
        assert!(err.to_user_message().contains("genre"));
        assert!(err.to_user_message().contains("cannot be empty"));

        let err = ToolError::Timeout(Duration::from_secs(60));
        assert!(err.to_user_message().contains("timed out after 60 seconds"));
    }
}
