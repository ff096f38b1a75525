//! MCP server implementation.
//!
//! Provides both stdio and HTTP transports over one [`McpDispatcher`].
//!
//! ## Layout
//!
//! - [`jsonrpc`]: envelope parsing and response types
//! - [`dispatcher`]: method routing and timeout-bounded tool execution
//! - [`elicitation`]: suspended tool calls awaiting user input
//! - [`session`]: per-client SSE buffers used as the outbound channel over HTTP
//! - [`transport`] and [`stdio`]: the two wire transports

pub mod dispatcher;
pub mod elicitation;
pub mod jsonrpc;
pub mod session;
pub mod stdio;
pub mod transport;

use std::sync::Arc;

use axum::Router;

use crate::auth::{AuthGate, SigningKeyStore, TokenVerifier};
use crate::catalog::MovieCatalog;
use crate::config::Config;
use crate::tools::{self, ToolRegistry};
use dispatcher::McpDispatcher;
use elicitation::ElicitationCoordinator;
use session::SessionManager;

/// MCP movie server.
pub struct McpServer {
    config: Config,
    dispatcher: Arc<McpDispatcher>,
    gate: Arc<AuthGate>,
    sessions: Arc<SessionManager>,
}

impl McpServer {
    /// Create a server with every built-in tool registered.
    ///
    /// # Errors
    ///
    /// Returns error on invalid configuration or a tool registration failure.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let registry = tools::register_all_tools(&config)?;
        Self::with_registry(config, registry)
    }

    /// Create a server exposing `registry`.
    ///
    /// # Errors
    ///
    /// Returns error on invalid configuration or unusable JWKS settings.
    pub fn with_registry(config: Config, registry: ToolRegistry) -> anyhow::Result<Self> {
        config.validate()?;

        let gate = if config.enable_jwt {
            let keys = Arc::new(SigningKeyStore::new(&config)?);
            let verifier = Arc::new(TokenVerifier::new(&config, keys));
            AuthGate::new(verifier, config.dev_mode())
        } else {
            tracing::warn!("JWT authentication is disabled");
            AuthGate::disabled(config.dev_mode())
        };

        let catalog = Arc::new(MovieCatalog::bundled()?);
        let elicitation = ElicitationCoordinator::new(&config);
        let dispatcher = Arc::new(McpDispatcher::new(&config, registry, catalog, elicitation));

        Ok(Self {
            config,
            dispatcher,
            gate: Arc::new(gate),
            sessions: Arc::new(SessionManager::new()),
        })
    }

    /// Shared dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<McpDispatcher> {
        &self.dispatcher
    }

    /// Authentication gate.
    #[must_use]
    pub fn gate(&self) -> &Arc<AuthGate> {
        &self.gate
    }

    /// HTTP router; starts the session cleanup task.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::create_router(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.gate),
            Arc::clone(&self.sessions),
            &self.config.allowed_hosts,
        )
    }

    /// Run the server in stdio mode.
    ///
    /// # Errors
    ///
    /// Returns error on I/O failure.
    pub async fn run_stdio(self, bearer: Option<String>) -> anyhow::Result<()> {
        tracing::info!("Starting MCP server in stdio mode");
        tracing::info!("Registered {} tools", self.dispatcher.registry().len());

        if self.gate.is_enabled() && bearer.is_none() {
            tracing::warn!(
                "JWT is enabled but no bearer token was supplied; every request will be rejected"
            );
        }

        self.dispatcher.elicitation().start_cleanup_task();
        stdio::run_stdio(self.dispatcher, self.gate, bearer).await
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tracing::info!("Starting MCP server in HTTP mode on {}", addr);
        tracing::info!("Registered {} tools", self.dispatcher.registry().len());

        self.dispatcher.elicitation().start_cleanup_task();
        let router = self.router();

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!("HTTP server listening on http://{}", listener.local_addr()?);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        let cancelled = self.dispatcher.elicitation().cancel_all();
        tracing::info!(cancelled_elicitations = cancelled, "HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("environment", &self.config.environment)
            .field("tools", &self.dispatcher.registry().len())
            .field("auth", &self.gate.is_enabled())
            .finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
