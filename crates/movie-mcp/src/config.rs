//! Configuration for the movie MCP server.
//!
//! Values are layered: built-in defaults, then an optional YAML file
//! (`app_config.<env>.yaml`), then environment variables and CLI flags.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::Deserialize;

use crate::auth::keys::is_symmetric;
use crate::error::ConfigError;

/// Default values.
pub mod defaults {
    use std::time::Duration;

    /// Default handler time budget.
    pub const TOOL_TIMEOUT: Duration = Duration::from_secs(60);

    /// Tolerance applied to `exp`, `nbf` and `iat`.
    pub const CLOCK_SKEW: Duration = Duration::from_secs(30);

    /// How long a fetched JWKS document is served before a refresh.
    pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(600);

    /// How long a failed JWKS fetch is remembered.
    pub const JWKS_FAILURE_TTL: Duration = Duration::from_secs(30);

    /// Timeout for a single JWKS fetch.
    pub const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    /// Minimum age of a cached JWKS before an unknown `kid` forces a refresh.
    pub const JWKS_REFRESH_COOLDOWN: Duration = Duration::from_secs(10);

    /// How long an elicitation waits for the user.
    pub const ELICITATION_TIMEOUT: Duration = Duration::from_secs(300);

    /// Invalid responses tolerated before an elicitation is cancelled.
    pub const MAX_INVALID_SUBMISSIONS: u32 = 5;

    /// Tools returned per `tools/list` page.
    pub const PAGE_SIZE: usize = 50;

    /// Default symmetric algorithm.
    pub const ALGORITHM: jsonwebtoken::Algorithm = jsonwebtoken::Algorithm::HS256;

    /// HTTP bind host.
    pub const HOST: &str = "0.0.0.0";

    /// HTTP port.
    pub const PORT: u16 = 8000;

    /// Directory searched for `app_config.<env>.yaml`.
    pub const CONFIG_DIR: &str = "config";
}

/// Deployment environment.
///
/// Development deployments include internal detail in error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development, verbose errors.
    #[default]
    Dev,
    /// Production, sanitized errors.
    Prod,
}

impl Environment {
    /// Name used in config file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Prod => "prod",
        }
    }

    /// Whether internal error detail may be returned to callers.
    #[must_use]
    pub const fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" | "test" => Ok(Self::Dev),
            "prod" | "production" => Ok(Self::Prod),
            other => Err(ConfigError::invalid(
                "environment",
                format!("unknown environment '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// Deployment environment.
    pub environment: Environment,

    /// Require a bearer token on every request.
    pub enable_jwt: bool,

    /// Shared secret for symmetric algorithms.
    pub secret_key: Option<String>,

    /// Default symmetric algorithm.
    pub algorithm: Algorithm,

    /// Algorithms a token header may name.
    pub allowed_algorithms: Vec<Algorithm>,

    /// Tolerance for temporal claims.
    pub clock_skew: Duration,

    /// JWKS document used when a token carries no `jku`.
    pub jwks_url: Option<String>,

    /// JWKS URLs a token's `jku` may name.
    pub trusted_jwks_urls: Vec<String>,

    /// JWKS cache lifetime.
    pub jwks_cache_ttl: Duration,

    /// Negative-cache window after a failed fetch.
    pub jwks_failure_ttl: Duration,

    /// Per-fetch timeout.
    pub jwks_fetch_timeout: Duration,

    /// Minimum entry age before an unknown `kid` triggers a refresh.
    pub jwks_refresh_cooldown: Duration,

    /// Default tool timeout.
    pub tool_timeout: Duration,

    /// Allow tools to request input mid-call.
    pub enable_elicitation: bool,

    /// Elicitation response deadline.
    pub elicitation_timeout: Duration,

    /// Invalid submissions before an elicitation is cancelled.
    pub max_invalid_submissions: u32,

    /// `tools/list` page size.
    pub page_size: usize,

    /// CORS origin allow-list. Empty or `*` allows any origin.
    pub allowed_hosts: Vec<String>,

    /// HTTP bind host.
    pub host: String,

    /// HTTP port.
    pub port: u16,
}

impl Config {
    /// Load configuration for `environment`.
    ///
    /// `path` overrides the default `config/app_config.<env>.yaml` location. A missing
    /// default file is not an error; a missing explicit file is.
    pub fn load(environment: Environment, path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self {
            environment,
            ..Self::default()
        };

        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(environment), false),
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                let file = FileConfig::from_yaml(&contents)?;
                file.apply(&mut config)?;
                tracing::info!(path = %path.display(), "Loaded configuration file");
            }
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        }

        Ok(config)
    }

    /// Create a test configuration: development mode, JWT disabled, no refresh cooldown.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            environment: Environment::Dev,
            jwks_fetch_timeout: Duration::from_secs(2),
            jwks_refresh_cooldown: Duration::ZERO,
            tool_timeout: Duration::from_secs(5),
            elicitation_timeout: Duration::from_secs(30),
            ..Self::default()
        }
    }

    /// Enable HS256 verification with the given secret.
    #[must_use]
    pub fn with_hs256_secret(mut self, secret: impl Into<String>) -> Self {
        self.enable_jwt = true;
        self.secret_key = Some(secret.into());
        self.algorithm = Algorithm::HS256;
        self.allowed_algorithms = vec![Algorithm::HS256];
        self
    }

    /// Check values that cannot be expressed in the type system.
    ///
    /// A symmetric algorithm without a secret is accepted with a warning; tokens
    /// using it are rejected at verification time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allowed_algorithms.is_empty() && self.enable_jwt {
            return Err(ConfigError::invalid(
                "allowed_algorithms",
                "must name at least one algorithm",
            ));
        }

        for (key, value) in [
            ("tool_timeout", self.tool_timeout),
            ("elicitation_timeout", self.elicitation_timeout),
            ("jwks_fetch_timeout", self.jwks_fetch_timeout),
            ("jwks_cache_ttl", self.jwks_cache_ttl),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(key, "must be greater than zero"));
            }
        }

        if self.page_size == 0 {
            return Err(ConfigError::invalid("page_size", "must be greater than zero"));
        }

        if self.max_invalid_submissions == 0 {
            return Err(ConfigError::invalid(
                "max_invalid_submissions",
                "must be greater than zero",
            ));
        }

        if self.enable_jwt && self.secret_key.is_none() {
            for alg in self.allowed_algorithms.iter().filter(|a| is_symmetric(**a)) {
                tracing::warn!(
                    algorithm = ?alg,
                    "Symmetric algorithm allowed without secret_key; its tokens will be rejected"
                );
            }
        }

        if self.enable_jwt
            && self.jwks_url.is_none()
            && self.trusted_jwks_urls.is_empty()
            && self.allowed_algorithms.iter().any(|a| !is_symmetric(*a))
        {
            tracing::warn!("Asymmetric algorithm allowed without any JWKS URL configured");
        }

        Ok(())
    }

    /// Whether development-only error detail may be returned.
    #[must_use]
    pub const fn dev_mode(&self) -> bool {
        self.environment.is_dev()
    }

    /// JWKS URLs a token may reference, including the default `jwks_url`.
    #[must_use]
    pub fn trusted_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.jwks_url.iter().cloned().collect();
        for url in &self.trusted_jwks_urls {
            if !urls.contains(url) {
                urls.push(url.clone());
            }
        }
        urls
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            enable_jwt: false,
            secret_key: None,
            algorithm: defaults::ALGORITHM,
            allowed_algorithms: vec![defaults::ALGORITHM],
            clock_skew: defaults::CLOCK_SKEW,
            jwks_url: None,
            trusted_jwks_urls: Vec::new(),
            jwks_cache_ttl: defaults::JWKS_CACHE_TTL,
            jwks_failure_ttl: defaults::JWKS_FAILURE_TTL,
            jwks_fetch_timeout: defaults::JWKS_FETCH_TIMEOUT,
            jwks_refresh_cooldown: defaults::JWKS_REFRESH_COOLDOWN,
            tool_timeout: defaults::TOOL_TIMEOUT,
            enable_elicitation: true,
            elicitation_timeout: defaults::ELICITATION_TIMEOUT,
            max_invalid_submissions: defaults::MAX_INVALID_SUBMISSIONS,
            page_size: defaults::PAGE_SIZE,
            allowed_hosts: vec!["*".to_string()],
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("enable_jwt", &self.enable_jwt)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "[REDACTED]"))
            .field("algorithm", &self.algorithm)
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("jwks_url", &self.jwks_url)
            .field("trusted_jwks_urls", &self.trusted_jwks_urls)
            .field("tool_timeout", &self.tool_timeout)
            .field("enable_elicitation", &self.enable_elicitation)
            .field("page_size", &self.page_size)
            .field("port", &self.port)
            .finish()
    }
}

fn default_config_path(environment: Environment) -> PathBuf {
    Path::new(defaults::CONFIG_DIR)
        .join(format!("app_config.{}.yaml", environment.as_str()))
}

/// Parse an algorithm name, rejecting `none`.
pub fn parse_algorithm(key: &str, name: &str) -> Result<Algorithm, ConfigError> {
    let trimmed = name.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return Err(ConfigError::invalid(key, "the 'none' algorithm is never accepted"));
    }
    Algorithm::from_str(&trimmed.to_ascii_uppercase())
        .map_err(|_| ConfigError::invalid(key, format!("unknown algorithm '{trimmed}'")))
}

/// Parse a comma-separated algorithm list.
pub fn parse_algorithm_list(key: &str, names: &str) -> Result<Vec<Algorithm>, ConfigError> {
    names
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| parse_algorithm(key, name))
        .collect()
}

/// Shape of `app_config.<env>.yaml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    server: ServerSection,
    mcp: McpSection,
    auth: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ServerSection {
    allowed_hosts: Option<Vec<String>>,
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct McpSection {
    tool_timeout: Option<u64>,
    enable_elicitation: Option<bool>,
    elicitation_timeout: Option<u64>,
    max_invalid_submissions: Option<u32>,
    page_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuthSection {
    enable_jwt: Option<bool>,
    secret_key: Option<String>,
    algorithm: Option<String>,
    allowed_algorithms: Option<Vec<String>>,
    clock_skew: Option<u64>,
    jwks_url: Option<String>,
    trusted_jwks_urls: Option<Vec<String>>,
    jwks_cache_ttl: Option<u64>,
    jwks_failure_ttl: Option<u64>,
    jwks_fetch_timeout: Option<u64>,
}

impl FileConfig {
    fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        // An empty file deserializes to unit, not to a mapping.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(contents)?)
    }

    fn apply(self, config: &mut Config) -> Result<(), ConfigError> {
        let Self { server, mcp, auth } = self;

        if let Some(hosts) = server.allowed_hosts {
            config.allowed_hosts = hosts;
        }
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }

        if let Some(secs) = mcp.tool_timeout {
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = mcp.enable_elicitation {
            config.enable_elicitation = enabled;
        }
        if let Some(secs) = mcp.elicitation_timeout {
            config.elicitation_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = mcp.max_invalid_submissions {
            config.max_invalid_submissions = max;
        }
        if let Some(size) = mcp.page_size {
            config.page_size = size;
        }

        if let Some(enabled) = auth.enable_jwt {
            config.enable_jwt = enabled;
        }
        if let Some(secret) = auth.secret_key.filter(|s| !s.is_empty()) {
            config.secret_key = Some(secret);
        }
        if let Some(name) = auth.algorithm {
            config.algorithm = parse_algorithm("auth.algorithm", &name)?;
            // The default algorithm is always allowed unless a list says otherwise.
            config.allowed_algorithms = vec![config.algorithm];
        }
        if let Some(names) = auth.allowed_algorithms {
            config.allowed_algorithms = names
                .iter()
                .map(|name| parse_algorithm("auth.allowed_algorithms", name))
                .collect::<Result<_, _>>()?;
        }
        if let Some(secs) = auth.clock_skew {
            config.clock_skew = Duration::from_secs(secs);
        }
        if let Some(url) = auth.jwks_url {
            config.jwks_url = Some(url);
        }
        if let Some(urls) = auth.trusted_jwks_urls {
            config.trusted_jwks_urls = urls;
        }
        if let Some(secs) = auth.jwks_cache_ttl {
            config.jwks_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = auth.jwks_failure_ttl {
            config.jwks_failure_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = auth.jwks_fetch_timeout {
            config.jwks_fetch_timeout = Duration::from_secs(secs);
        }

        Ok(())
    }
}

/// Values supplied through environment variables or CLI flags.
///
/// Every field is optional; `None` keeps the value from the file or defaults.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    /// `ENABLE_JWT`
    pub enable_jwt: Option<bool>,
    /// `JWT_SECRET_KEY`
    pub secret_key: Option<String>,
    /// `JWT_ALGORITHM`
    pub algorithm: Option<String>,
    /// `JWT_ALLOWED_ALGORITHMS`, comma separated
    pub allowed_algorithms: Option<String>,
    /// `JWKS_URL`
    pub jwks_url: Option<String>,
    /// `MCP_TOOL_TIMEOUT`, seconds
    pub tool_timeout: Option<u64>,
    /// `ENABLE_ELICITATION`
    pub enable_elicitation: Option<bool>,
    /// `PORT`
    pub port: Option<u16>,
}

impl ConfigOverrides {
    /// Apply overrides on top of `config`.
    pub fn apply(self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(enabled) = self.enable_jwt {
            config.enable_jwt = enabled;
        }
        if let Some(secret) = self.secret_key.filter(|s| !s.is_empty()) {
            config.secret_key = Some(secret);
        }
        if let Some(name) = self.algorithm {
            config.algorithm = parse_algorithm("JWT_ALGORITHM", &name)?;
            if !config.allowed_algorithms.contains(&config.algorithm) {
                config.allowed_algorithms.push(config.algorithm);
            }
        }
        if let Some(names) = self.allowed_algorithms {
            config.allowed_algorithms = parse_algorithm_list("JWT_ALLOWED_ALGORITHMS", &names)?;
        }
        if let Some(url) = self.jwks_url {
            config.jwks_url = Some(url);
        }
        if let Some(secs) = self.tool_timeout {
            config.tool_timeout = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.enable_elicitation {
            config.enable_elicitation = enabled;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        Ok(())
    }
}
