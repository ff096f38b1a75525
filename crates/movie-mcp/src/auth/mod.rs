//! Bearer token authentication.
//!
//! - [`keys`]: static secret and cached JWKS public keys
//! - [`verifier`]: end-to-end token validation producing a [`Principal`]
//! - [`gate`]: request-level enforcement, bypassed when JWT is disabled

pub mod gate;
pub mod keys;
pub mod verifier;

pub use gate::{AuthGate, Authenticated, require_bearer};
pub use keys::{JwksCacheEntry, KeySource, SigningKey, SigningKeyStore};
pub use verifier::{Principal, TokenVerifier};
