//! Movie MCP Server - Entry Point
//!
//! Provides both stdio and HTTP transports.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use movie_mcp::config::{Config, ConfigOverrides, Environment};
use movie_mcp::server::McpServer;

#[derive(Parser, Debug)]
#[command(name = "movie-mcp")]
#[command(about = "MCP server for movie recommendations")]
#[command(version)]
struct Cli {
    /// Transport mode: stdio or http
    #[arg(long, default_value = "stdio")]
    transport: Transport,

    /// Deployment environment (dev or prod); selects config/app_config.<env>.yaml
    #[arg(long = "env", default_value = "dev", env = "ENVIRONMENT")]
    environment: Environment,

    /// Explicit configuration file
    #[arg(long, env = "MCP_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP server port (only used with --transport http)
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Bearer token presented on every stdio request when JWT is enabled
    #[arg(long, env = "MCP_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Require a valid bearer token
    #[arg(long, env = "ENABLE_JWT")]
    enable_jwt: Option<bool>,

    /// Shared secret for symmetric algorithms
    #[arg(long, env = "JWT_SECRET_KEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// Default symmetric algorithm (e.g., HS256)
    #[arg(long, env = "JWT_ALGORITHM")]
    algorithm: Option<String>,

    /// Comma-separated algorithm allow-list (e.g., "HS256,RS256")
    #[arg(long, env = "JWT_ALLOWED_ALGORITHMS")]
    allowed_algorithms: Option<String>,

    /// JWKS document used when a token has no jku header
    #[arg(long, env = "JWKS_URL")]
    jwks_url: Option<String>,

    /// Default tool timeout in seconds
    #[arg(long, env = "MCP_TOOL_TIMEOUT")]
    tool_timeout: Option<u64>,

    /// Allow tools to ask the user for input mid-call
    #[arg(long, env = "ENABLE_ELICITATION")]
    enable_elicitation: Option<bool>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            enable_jwt: self.enable_jwt,
            secret_key: self.secret_key.clone(),
            algorithm: self.algorithm.clone(),
            allowed_algorithms: self.allowed_algorithms.clone(),
            jwks_url: self.jwks_url.clone(),
            tool_timeout: self.tool_timeout,
            enable_elicitation: self.enable_elicitation,
            port: self.port,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
enum Transport {
    /// Standard input/output
    #[default]
    Stdio,
    /// HTTP with Server-Sent Events
    Http,
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // stdout carries the protocol in stdio mode, so logs always go to stderr.
    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    init_tracing(&cli.log_level, cli.json_logs);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cli.transport,
        environment = %cli.environment,
        "Starting Movie MCP server"
    );

    let mut config = Config::load(cli.environment, cli.config.as_deref())?;
    cli.overrides().apply(&mut config)?;
    tracing::debug!(?config, "Effective configuration");

    let server = McpServer::new(config)?;

    match cli.transport {
        Transport::Stdio => {
            tracing::info!("Running in stdio mode");
            server.run_stdio(cli.bearer_token).await?;
        }
        Transport::Http => {
            tracing::info!("Running in HTTP mode");
            server.run_http().await?;
        }
    }

    Ok(())
}
