//! Movie MCP Server
//!
//! A Model Context Protocol (MCP) server offering movie recommendations,
//! with optional JWT bearer authentication (static HMAC secrets or JWKS-published
//! public keys) and mid-call elicitation of structured user input.
//!
//! # Features
//!
//! - **Algorithm allow-list**: checked before any signature work
//! - **JWKS cache**: per-URL single-flight refresh with negative caching
//! - **Elicitation**: tools suspend on a session and resume exactly once
//! - **Timeouts**: every tool call is bounded; failures are reported as `isError` results
//!
//! # Example
//!
//! ```no_run
//! use movie_mcp::{config::{Config, Environment}, server::McpServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Environment::Dev, None)?;
//!     let server = McpServer::new(config)?;
//!
//!     server.run_http().await
//! }
//! ```

pub mod auth;
pub mod catalog;
pub mod config;
pub mod error;
pub mod formatters;
pub mod models;
pub mod schema;
pub mod server;
pub mod tools;

pub use catalog::MovieCatalog;
pub use config::Config;
pub use error::{AuthError, ElicitationError, ProtocolError, ToolError};
pub use server::McpServer;
