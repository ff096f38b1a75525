//! Shared helpers for integration tests: token minting and JWKS documents.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};

use movie_mcp::auth::{SigningKeyStore, TokenVerifier};
use movie_mcp::config::Config;

/// HMAC secret shared by HS256 tests.
pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

/// An RSA key pair from `tests/fixtures` with its public modulus.
pub struct RsaFixture {
    pub pem: &'static [u8],
    pub modulus: &'static str,
}

pub const PRIMARY: RsaFixture = RsaFixture {
    pem: include_bytes!("../fixtures/rsa_primary.pem"),
    modulus: "5946sdNY9ewbm8v5zKGyAixIl7-smQgHX8GIqDRTYrcKkBLp50pFUiyHJurxz8YstHVZOf7K28GyipIZ7hdDxkYlpTyQVOr1Lo28BXaW5Grq9EOzt4tIZLjXC9HLd7eCK98EKz4dUEvEQ6xOPMfD2wMtSENafHc0yxdeYNKu2IT_HMDh-gdapt0lnpVldaBRSsomh9y_lblsFzI7KXRCZJ5VrIJ4jIfaAz5eoQf4wJO-zkRoYO7WuRYc23egK4Mw6JthkpiRZJrnDQF_CFZ2V3QWicQhrLclr8s2hXun-bukedFzVmRnmrpjMYGs4uxdDLTC9Wxkbycc3Ttfu8fgrw",
};

pub const ROTATED: RsaFixture = RsaFixture {
    pem: include_bytes!("../fixtures/rsa_rotated.pem"),
    modulus: "m4fCGAXz0bf2BkCzS7OWBtFl1g5NujWXtGiDjJ6-V1FTpGYNveOX5VZL6wjKBfHoQep1PFfBWfbzeAlrCgMjn4G34hoGBq0lkaL6cEnuqcp54ccdAux-qwvTictz1DOrJzq99yh6itg5hkTxwAni34gWntAh3hCSYEaUSBi2T4xp7y-U4nPFmx4t7Bik4Aon8hUnpzaEEW_i5OY-JLzSppLrRb7WuvLbNhFTFe_97Uz7LOmXyo6ELKzv1b8tPXsFJnf9kphrHbARKwzRlK03IOoFS82W29V2jfXWaEf2XU-B0jFzj7WrelmLsq0aI_oEUvfyMUikQEAHbygrC8YFww",
};

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims valid for the next five minutes.
pub fn valid_claims(subject: &str) -> Value {
    json!({ "sub": subject, "iss": "movie-mcp-tests", "iat": now(), "exp": now() + 300 })
}

pub fn hs256_token(secret: &str, claims: &Value) -> String {
    encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret.as_bytes()))
        .expect("sign HS256 token")
}

pub fn rs256_token(
    key: &RsaFixture,
    kid: Option<&str>,
    jku: Option<&str>,
    claims: &Value,
) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    header.jku = jku.map(str::to_string);
    let encoding = EncodingKey::from_rsa_pem(key.pem).expect("fixture PEM");
    encode(&header, claims, &encoding).expect("sign RS256 token")
}

/// Public JWK for `key`.
pub fn jwk(kid: &str, key: &RsaFixture) -> Value {
    json!({
        "kty": "RSA",
        "kid": kid,
        "alg": "RS256",
        "use": "sig",
        "n": key.modulus,
        "e": "AQAB"
    })
}

pub fn jwks(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}

/// HS256-only configuration with [`SECRET`].
pub fn hs256_config() -> Config {
    Config::for_testing().with_hs256_secret(SECRET)
}

/// RS256-only configuration resolving keys from `jwks_url`.
pub fn rs256_config(jwks_url: &str) -> Config {
    let mut config = Config::for_testing();
    config.enable_jwt = true;
    config.allowed_algorithms = vec![Algorithm::RS256];
    config.jwks_url = Some(jwks_url.to_string());
    config.jwks_failure_ttl = Duration::from_secs(30);
    config
}

pub fn verifier(config: &Config) -> TokenVerifier {
    let keys = Arc::new(SigningKeyStore::new(config).expect("key store"));
    TokenVerifier::new(config, keys)
}
