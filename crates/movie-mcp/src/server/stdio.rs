//! Stdio transport for MCP protocol.
//!
//! One JSON-RPC message per line on stdin; responses and server-initiated
//! requests are written one per line to stdout. Every line is handled on its
//! own task so an `elicitation/submit` can arrive while a `tools/call` waits.

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::dispatcher::{McpDispatcher, RequestContext};
use super::jsonrpc::{JsonRpcResponse, parse_message};
use super::session::Outbound;
use crate::auth::gate::rejected_id;
use crate::auth::{AuthGate, Authenticated};
use crate::error::{ElicitationError, ProtocolError};

/// Writes server-initiated messages to the stdout writer task.
#[derive(Debug, Clone)]
pub struct LineOutbound {
    tx: mpsc::UnboundedSender<String>,
}

impl LineOutbound {
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }
}

#[async_trait::async_trait]
impl Outbound for LineOutbound {
    async fn send(&self, message: Value) -> Result<(), ElicitationError> {
        self.tx
            .send(message.to_string())
            .map_err(|_| ElicitationError::Undeliverable)
    }
}

/// Handle MCP protocol over stdio until stdin closes.
///
/// With authentication enabled, every line is authenticated with `bearer`.
pub async fn run_stdio(
    dispatcher: Arc<McpDispatcher>,
    gate: Arc<AuthGate>,
    bearer: Option<String>,
) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let outbound: Arc<dyn Outbound> = Arc::new(LineOutbound::new(tx.clone()));
    let bearer: Option<Arc<str>> = bearer.map(Arc::from);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tasks = JoinSet::new();

    tracing::info!("MCP stdio server ready, waiting for requests...");

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let dispatcher = Arc::clone(&dispatcher);
        let gate = Arc::clone(&gate);
        let outbound = Arc::clone(&outbound);
        let bearer = bearer.clone();
        let tx = tx.clone();

        tasks.spawn(async move {
            let bearer = bearer.as_deref();
            let response = handle_line(&dispatcher, &gate, bearer, outbound, line.as_bytes()).await;
            if let Some(response) = response {
                match serde_json::to_string(&response) {
                    Ok(json) => {
                        if tx.send(json).is_err() {
                            tracing::warn!("Stdout writer closed, dropping response");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
                }
            }
        });

        // Reap finished handlers so the set does not grow unbounded.
        while tasks.try_join_next().is_some() {}
    }

    tracing::info!("Stdin closed, shutting down");

    let cancelled = dispatcher.elicitation().cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, "Cancelled pending elicitations");
    }
    while tasks.join_next().await.is_some() {}

    drop(outbound);
    drop(tx);
    writer.await??;

    Ok(())
}

/// Authenticate and dispatch one line. Returns `None` when no response is owed.
///
/// Authentication runs before the line is parsed, so an unauthenticated caller
/// learns nothing about the envelope.
pub async fn handle_line(
    dispatcher: &McpDispatcher,
    gate: &AuthGate,
    bearer: Option<&str>,
    outbound: Arc<dyn Outbound>,
    line: &[u8],
) -> Option<JsonRpcResponse> {
    let principal = match gate.authenticate(bearer).await {
        Ok(Authenticated(principal)) => principal,
        Err(e) => {
            if !expects_response(line) {
                return None;
            }
            let error = ProtocolError::Unauthenticated(e);
            return Some(error.to_response(rejected_id(line), gate.dev_mode()));
        }
    };

    let message = match parse_message(line) {
        Ok(message) => message,
        Err(rejected) => {
            let dev_mode = dispatcher.dev_mode();
            return Some(rejected.error.to_response(rejected.id, dev_mode));
        }
    };

    let ctx = RequestContext::new(principal, Some(outbound));
    dispatcher.handle_message(message, &ctx).await
}

/// Notifications and client responses never get a reply, not even a rejection.
/// Anything that is not a JSON object is answered.
fn expects_response(line: &[u8]) -> bool {
    match serde_json::from_slice::<Value>(line) {
        Ok(Value::Object(map)) => {
            map.contains_key("method") && map.get("id").is_some_and(|id| !id.is_null())
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{SigningKeyStore, TokenVerifier};
    use crate::catalog::MovieCatalog;
    use crate::config::Config;
    use crate::error::codes;
    use crate::server::elicitation::ElicitationCoordinator;
    use crate::tools::register_all_tools;
    use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "a-secret-of-reasonable-length-123";

    fn dispatcher() -> McpDispatcher {
        let config = Config::for_testing();
        McpDispatcher::new(
            &config,
            register_all_tools(&config).unwrap(),
            Arc::new(MovieCatalog::bundled().unwrap()),
            ElicitationCoordinator::new(&config),
        )
    }

    fn outbound() -> (Arc<dyn Outbound>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(LineOutbound::new(tx)), rx)
    }

    fn enabled_gate() -> AuthGate {
        let config = Config::for_testing().with_hs256_secret(SECRET);
        let keys = Arc::new(SigningKeyStore::new(&config).unwrap());
        AuthGate::new(Arc::new(TokenVerifier::new(&config, keys)), true)
    }

    async fn send(gate: &AuthGate, bearer: Option<&str>, line: &[u8]) -> Option<JsonRpcResponse> {
        let (outbound, _rx) = outbound();
        handle_line(&dispatcher(), gate, bearer, outbound, line).await
    }

    fn ping(id: i64) -> String {
        json!({ "jsonrpc": "2.0", "id": id, "method": "ping" }).to_string()
    }

    #[tokio::test]
    async fn test_handle_line_without_auth() {
        let gate = AuthGate::disabled(true);
        let response = send(&gate, None, ping(1).as_bytes()).await.unwrap();
        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_parse_error_line() {
        let gate = AuthGate::disabled(true);
        let response = send(&gate, None, b"{oops").await.unwrap();
        assert_eq!(response.error.unwrap().code, codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_unauthenticated_line_is_rejected_before_parsing() {
        let response = send(&enabled_gate(), None, b"{oops").await.unwrap();

        assert_eq!(response.error.unwrap().code, codes::AUTHENTICATION_FAILED);
        assert_eq!(response.id, Value::Null);
    }

    #[tokio::test]
    async fn test_unauthenticated_request_keeps_its_id() {
        let gate = enabled_gate();
        let response = send(&gate, None, ping(9).as_bytes()).await.unwrap();

        assert_eq!(response.id, json!(9));
        assert_eq!(response.error.unwrap().code, codes::AUTHENTICATION_FAILED);
    }

    #[tokio::test]
    async fn test_unauthenticated_notification_is_dropped() {
        let line = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }).to_string();
        assert!(send(&enabled_gate(), None, line.as_bytes()).await.is_none());
    }

    #[tokio::test]
    async fn test_authenticated_line_is_dispatched() {
        let exp = chrono::Utc::now().timestamp() + 300;
        let token = encode(
            &Header::new(Algorithm::HS256),
            &json!({ "sub": "alice", "exp": exp }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();

        let gate = enabled_gate();
        let response = send(&gate, Some(&token), ping(1).as_bytes()).await.unwrap();
        assert_eq!(response.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_line_outbound_reports_closed_channel() {
        let (outbound, rx) = outbound();
        drop(rx);
        assert_eq!(
            outbound.send(json!({})).await,
            Err(ElicitationError::Undeliverable)
        );
    }
}
